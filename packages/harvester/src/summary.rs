//! Run-scoped counters.
//!
//! A [`Summary`] lives for exactly one harvest run. It is filled while pages
//! settle, read once at the end to decide between commit and rollback, and
//! handed back to the caller; it is never stored with the harvested data.

use serde::Serialize;

/// Outcome of publishing to a CSW-T catalogue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishStats {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub failed: u64,
    pub errors: Vec<String>,
}

/// Diagnostic state of one harvest run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub source_id: String,
    pub incremental: bool,
    /// Records mapped and staged.
    pub num_docs: u64,
    /// Records excluded from persistence.
    pub skipped_docs: u64,
    pub app_errors: Vec<String>,
    pub database_errors: Vec<String>,
    pub warnings: Vec<String>,
    pub couplings: u64,
    /// Previously stored records removed by a full run.
    pub deleted: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub non_fetched_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishStats>,
}

impl Summary {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ..Self::default()
        }
    }

    /// Records delivered by the source, staged or not.
    pub fn records_seen(&self) -> u64 {
        self.num_docs + self.skipped_docs
    }

    pub fn app_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(source = %self.source_id, "{message}");
        self.app_errors.push(message);
    }

    pub fn database_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(source = %self.source_id, "{message}");
        self.database_errors.push(message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(source = %self.source_id, "{message}");
        self.warnings.push(message);
    }

    /// Whether any error recorded so far forces a rollback.
    pub fn has_fatal_errors(&self) -> bool {
        !self.app_errors.is_empty() || !self.database_errors.is_empty()
    }

    /// The representative message for a failed run: database errors first.
    pub fn first_error(&self) -> Option<&str> {
        self.database_errors
            .first()
            .or_else(|| self.app_errors.first())
            .map(String::as_str)
    }
}
