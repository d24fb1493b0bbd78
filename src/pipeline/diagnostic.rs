//! Run diagnostic dump: writes intermediate artifacts to disk.
//!
//! Enabled only when a dump directory is configured (`LEGALLENS_DUMP_DIR` or
//! `dump_dir` in the settings file). Every write is best-effort: failures are
//! logged and never interrupt the run.
//!
//! Layout:
//! ```text
//! {dump_dir}/{run_id}/
//!   01-page-0.png
//!   02-batch-0-text.txt
//!   03-batch-0-clauses.json
//!   04-report.json
//! ```

use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Per-run artifact writer.
#[derive(Debug, Clone)]
pub struct DiagnosticDump {
    dir: PathBuf,
}

impl DiagnosticDump {
    /// Returns a writer for `run_id` under `base`, or `None` if diagnostics
    /// are disabled or the directory cannot be created.
    pub fn for_run(base: Option<&Path>, run_id: &Uuid) -> Option<Self> {
        let dir = base?.join(run_id.to_string());

        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(
                path = %dir.display(),
                error = %e,
                "Cannot create dump directory, diagnostics off for this run"
            );
            return None;
        }

        tracing::info!(path = %dir.display(), "Writing run diagnostics");
        Some(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn page_image(&self, page_index: usize, png: &[u8]) {
        self.write(&format!("01-page-{page_index}.png"), png);
    }

    pub fn batch_text(&self, batch_index: usize, text: &str) {
        self.write(&format!("02-batch-{batch_index}-text.txt"), text.as_bytes());
    }

    pub fn batch_clauses<T: serde::Serialize>(&self, batch_index: usize, clauses: &T) {
        self.write_json(&format!("03-batch-{batch_index}-clauses.json"), clauses);
    }

    pub fn report<T: serde::Serialize>(&self, report: &T) {
        self.write_json("04-report.json", report);
    }

    fn write_json<T: serde::Serialize>(&self, name: &str, value: &T) {
        match serde_json::to_vec_pretty(value) {
            Ok(bytes) => self.write(name, &bytes),
            Err(e) => tracing::warn!(artifact = name, error = %e, "Dump artifact not serializable"),
        }
    }

    /// Best-effort write; failures are logged only.
    fn write(&self, name: &str, bytes: &[u8]) {
        let path = self.dir.join(name);
        match std::fs::write(&path, bytes) {
            Ok(()) => tracing::debug!(path = %path.display(), bytes = bytes.len(), "Dump artifact written"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Dump artifact not written"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_base_dir() {
        assert!(DiagnosticDump::for_run(None, &Uuid::new_v4()).is_none());
    }

    #[test]
    fn creates_run_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let run_id = Uuid::new_v4();
        let dump = DiagnosticDump::for_run(Some(tmp.path()), &run_id).unwrap();

        assert!(dump.dir().exists());
        assert!(dump.dir().ends_with(run_id.to_string()));
    }

    #[test]
    fn writes_named_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let dump = DiagnosticDump::for_run(Some(tmp.path()), &Uuid::new_v4()).unwrap();

        dump.page_image(3, b"png bytes");
        dump.batch_text(1, "CLAUSE 1. Definitions");
        dump.batch_clauses(1, &vec![serde_json::json!({"title": "Definitions"})]);
        dump.report(&serde_json::json!({"complete": true}));

        assert_eq!(std::fs::read(dump.dir().join("01-page-3.png")).unwrap(), b"png bytes");
        assert_eq!(
            std::fs::read_to_string(dump.dir().join("02-batch-1-text.txt")).unwrap(),
            "CLAUSE 1. Definitions"
        );
        let clauses = std::fs::read_to_string(dump.dir().join("03-batch-1-clauses.json")).unwrap();
        assert!(clauses.contains("\"title\": \"Definitions\""));
        assert!(dump.dir().join("04-report.json").exists());
    }

    #[test]
    fn vanished_directory_only_logs() {
        let tmp = tempfile::tempdir().unwrap();
        let dump = DiagnosticDump::for_run(Some(tmp.path()), &Uuid::new_v4()).unwrap();
        std::fs::remove_dir_all(dump.dir()).unwrap();

        dump.page_image(0, b"png");
        dump.batch_text(0, "text");
        dump.report(&serde_json::json!({}));
        assert!(!dump.dir().exists());
    }
}
