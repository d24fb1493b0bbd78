use serde::Deserialize;

use super::types::{AnalysisMode, ClauseRecord};
use super::StructuringError;

#[derive(Deserialize)]
struct DetailedWire {
    clause_title: String,
    description: String,
}

#[derive(Deserialize)]
struct SummaryWire {
    topic: String,
    description: String,
}

/// Parse the classifier's response body into clause records.
///
/// The whole body (after trimming whitespace) must be a JSON array of
/// objects carrying the mode's two string fields. Markdown fences, leading
/// prose or trailing text are all rejected. Extra object fields are ignored.
pub fn parse_clause_payload(
    raw: &str,
    mode: AnalysisMode,
) -> Result<Vec<ClauseRecord>, StructuringError> {
    let body = raw.trim();
    if body.is_empty() {
        return Err(StructuringError::MalformedPayload("empty response body".into()));
    }

    let records = match mode {
        AnalysisMode::Detailed => serde_json::from_str::<Vec<DetailedWire>>(body)
            .map_err(|e| malformed(body, e))?
            .into_iter()
            .map(|w| ClauseRecord::new(w.clause_title, w.description))
            .collect(),
        AnalysisMode::Summary => serde_json::from_str::<Vec<SummaryWire>>(body)
            .map_err(|e| malformed(body, e))?
            .into_iter()
            .map(|w| ClauseRecord::new(w.topic, w.description))
            .collect(),
    };

    Ok(records)
}

fn malformed(body: &str, e: serde_json::Error) -> StructuringError {
    let preview: String = body.chars().take(80).collect();
    StructuringError::MalformedPayload(format!("{e} (response starts with {preview:?})"))
}
