// Error taxonomy for the ingestion pipeline.
//
// The guiding rule: no error from a single record or source may terminate
// a run. Only storage unavailability is run-fatal; everything else is
// converted into a logged skip, a retry, or a manual-review conflict.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Network/API failure from a fetcher. Retried with backoff up to the
    /// configured limit, then reported as a source failure.
    #[error("transient fetch failure: {0}")]
    TransientFetch(String),

    /// Malformed row or document. The record (or document) is skipped,
    /// extraction continues.
    #[error("parse failure: {0}")]
    Parse(String),

    /// Invariant violation at ingest time (employee count below floor,
    /// missing required field). The record is discarded, not stored.
    #[error("validation failure: {0}")]
    Validation(String),

    /// Natural key exists but an immutable field differs (e.g. a case
    /// number re-ingested under a different entity). The existing row is
    /// left untouched and a manual-review conflict is recorded.
    #[error("conflict on {key}: {detail}")]
    Conflict { key: String, detail: String },

    /// Unexpected state while scoring one entity. Fatal only to that
    /// entity's score row, never to the run.
    #[error("aggregation failure for entity {entity_id}: {detail}")]
    Aggregation { entity_id: String, detail: String },

    /// Storage-layer failure. The only run-fatal variant.
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl IngestError {
    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Storage(_))
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        IngestError::Parse(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        IngestError::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_is_fatal() {
        assert!(!IngestError::TransientFetch("timeout".into()).is_fatal());
        assert!(!IngestError::parse("bad row").is_fatal());
        assert!(!IngestError::validation("below floor").is_fatal());
        assert!(!IngestError::Conflict {
            key: "1:24-bk-100".into(),
            detail: "entity mismatch".into()
        }
        .is_fatal());
        assert!(IngestError::Storage(rusqlite::Error::InvalidQuery).is_fatal());
    }
}
