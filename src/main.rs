//! `legallens` command line: analyze a contract PDF, review its clauses,
//! or explain a terms-and-conditions text.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use legallens::config::{self, Settings};
use legallens::pipeline::batch::{CancellationToken, PipelineRunner, RunEvent, RunReport, WindowConfig};
use legallens::pipeline::extraction::{ExtractionMode, PdfiumRenderer};
use legallens::pipeline::structuring::{AnalysisMode, ChatClient, TermsAnalyst};
use legallens::pipeline_config::PipelineConfig;
use legallens::review::{parse_decisions, ClauseAnalyst, EmailDrafter, ReviewSession};

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// 128 + SIGINT, as shells report it.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug, Parser)]
#[command(name = "legallens", version, about = "Clause-by-clause review of contract PDFs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Extract and deduplicate the clauses of a contract PDF
    Analyze(AnalyzeArgs),
    /// Explain a terms-and-conditions text file, risky terms first
    Terms(TermsArgs),
}

#[derive(Debug, Args)]
struct AnalyzeArgs {
    /// Contract PDF
    #[arg(value_name = "PDF")]
    pdf: PathBuf,

    /// detailed (titled clauses) or summary (risky clauses only)
    #[arg(long, default_value_t = AnalysisMode::Detailed)]
    mode: AnalysisMode,

    /// Pages per batch
    #[arg(long, default_value_t = legallens::pipeline::batch::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Pages shared by consecutive batches
    #[arg(long, default_value_t = legallens::pipeline::batch::DEFAULT_OVERLAP)]
    overlap: usize,

    /// per-page (one vision call per page) or per-batch
    #[arg(long, default_value_t = ExtractionMode::PerPage)]
    extraction: ExtractionMode,

    /// Also ask for the legal implications of every clause
    #[arg(long, default_value_t = false)]
    implications: bool,

    /// JSON decisions file; drafts the review email
    #[arg(long, value_name = "FILE")]
    decisions: Option<PathBuf>,

    /// Print the full result as JSON on stdout
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Debug, Args)]
struct TermsArgs {
    /// UTF-8 text file with the terms
    #[arg(value_name = "TEXT_FILE")]
    file: PathBuf,
}

#[derive(Serialize)]
struct AnalyzeOutput<'a> {
    report: &'a RunReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    notice: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    implications: BTreeMap<usize, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
}

#[tokio::main]
async fn main() -> CliResult<()> {
    legallens::init_tracing();
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    // First Ctrl-C stops scheduling work; a second one exits at once.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("Interrupted, stopping after the call in flight (Ctrl-C again to quit)");
        signal_token.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Aborted.");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    });

    // The pipeline and its HTTP client are blocking.
    tokio::task::spawn_blocking(move || match cli.command {
        Command::Analyze(args) => analyze(args, &cancel),
        Command::Terms(args) => terms(args),
    })
    .await?
}

fn analyze(args: AnalyzeArgs, cancel: &CancellationToken) -> CliResult<()> {
    let settings = Settings::load()?;
    tracing::info!("{} v{} analyzing {}", config::APP_NAME, config::APP_VERSION, args.pdf.display());

    let config = PipelineConfig {
        window: WindowConfig::new(args.batch_size, args.overlap)?,
        mode: args.mode,
        extraction_mode: args.extraction,
        ..PipelineConfig::from_settings(&settings)
    };
    // Read decisions up front so a bad file fails before any remote call.
    let decisions = match &args.decisions {
        Some(path) => Some(parse_decisions(&std::fs::read_to_string(path)?)?),
        None => None,
    };

    let client = Arc::new(ChatClient::from_settings(&settings)?.with_temperature(config.temperature));
    let renderer = Arc::new(PdfiumRenderer::new()?);
    let pdf_bytes = std::fs::read(&args.pdf)?;

    let runner = PipelineRunner::new(renderer, client.clone(), client.clone(), config)
        .with_dump_dir(settings.dump_dir.clone());
    let quiet = args.json;
    let progress = move |event: &RunEvent| {
        if !quiet {
            print_progress(event);
        }
    };
    let report = runner.run(&pdf_bytes, cancel, Some(&progress))?;
    let notice = report.incomplete_notice();

    let mut session = ReviewSession::from_report(report.clone());
    let mut implications = BTreeMap::new();
    if args.implications {
        let analyst = ClauseAnalyst::new(client.clone()).with_model(&settings.text_model);
        let ids: Vec<_> = session.clauses().iter().map(|e| e.id).collect();
        for (i, id) in ids.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            match session.implications(id, &analyst) {
                Ok(text) => {
                    implications.insert(i + 1, text.to_string());
                }
                Err(e) => tracing::warn!(clause = i + 1, error = %e, "Implications unavailable"),
            }
        }
    }

    let mut email = None;
    if let Some(entries) = decisions {
        session.apply_entries(&entries)?;
        let drafter = EmailDrafter::new(client).with_model(&settings.email_model);
        email = Some(session.draft_email(&drafter)?.to_string());
    }

    if args.json {
        let output = AnalyzeOutput {
            report: &report,
            notice: notice.clone(),
            implications,
            email,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_clauses(&report, &implications);
        if let Some(email) = email.filter(|e| !e.is_empty()) {
            println!("\n## Review email\n\n{email}");
        }
    }

    if let Some(notice) = notice {
        eprintln!("{notice}");
    }
    Ok(())
}

fn terms(args: TermsArgs) -> CliResult<()> {
    let settings = Settings::load()?;
    let text = std::fs::read_to_string(&args.file)?;
    let client = Arc::new(ChatClient::from_settings(&settings)?);
    let analysis = TermsAnalyst::new(client)
        .with_model(&settings.email_model)
        .analyze_terms(&text)?;
    println!("{analysis}");
    Ok(())
}

fn print_progress(event: &RunEvent) {
    match event {
        RunEvent::Started {
            page_count,
            batch_count,
            ..
        } => eprintln!("{page_count} page(s), {batch_count} batch(es)"),
        RunEvent::BatchCompleted {
            batch,
            outcome,
            clauses_total,
        } => eprintln!("batch {}: {outcome:?} ({clauses_total} clauses so far)", batch + 1),
        _ => {}
    }
}

fn print_clauses(report: &RunReport, implications: &BTreeMap<usize, String>) {
    let label = match report.mode {
        AnalysisMode::Detailed => "Clause",
        AnalysisMode::Summary => "Risk",
    };
    for (i, entry) in report.clauses.iter().enumerate() {
        let number = i + 1;
        println!("### {label} {number}: {}", entry.record.title);
        println!("{}", entry.record.description);
        if let Some(text) = implications.get(&number) {
            println!("\n{text}");
        }
        println!();
    }
    if report.clauses.is_empty() {
        println!("No clauses found.");
    }
}
