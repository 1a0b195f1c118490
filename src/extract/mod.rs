// Source extractors - one external raw source each, mutually independent
//
// Every extractor follows the same discipline: bad rows are skipped and
// logged, bad documents abort only themselves, and only a storage failure
// propagates. Everything else is folded into the SourceReport the
// orchestrator collects.

pub mod filing;
pub mod litigation;
pub mod notice;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::warn;

use crate::db::UpsertOutcome;
use crate::error::{IngestError, Result};
use crate::model::SourceKind;

// ============================================================================
// SOURCE REPORT
// ============================================================================

/// Per-source tally for one extraction pass.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct SourceReport {
    /// Raw entries encountered across all documents.
    pub records_seen: usize,

    pub inserted: usize,
    pub updated: usize,

    /// Rows dropped for parse or validation reasons. Never affects the
    /// run's exit status.
    pub skipped: usize,

    /// Manual-review conflicts raised during upserts.
    pub conflicts: usize,

    /// Whole documents that could not be read.
    pub documents_failed: usize,
}

impl SourceReport {
    pub fn stored(&self) -> usize {
        self.inserted + self.updated
    }

    /// Fold one upsert result into the tally. Storage errors propagate;
    /// everything else is absorbed as a skip or a conflict.
    pub(crate) fn absorb(
        &mut self,
        source: SourceKind,
        key: &str,
        result: Result<UpsertOutcome>,
    ) -> Result<()> {
        match result {
            Ok(UpsertOutcome::Inserted) => self.inserted += 1,
            Ok(UpsertOutcome::Updated) => self.updated += 1,
            Err(IngestError::Conflict { detail, .. }) => {
                self.conflicts += 1;
                warn!(source = source.as_str(), key, %detail, "upsert conflict");
            }
            Err(IngestError::Validation(reason)) => {
                self.skipped += 1;
                warn!(source = source.as_str(), key, %reason, "record discarded");
            }
            Err(fatal) if fatal.is_fatal() => return Err(fatal),
            Err(other) => {
                self.skipped += 1;
                warn!(source = source.as_str(), key, error = %other, "record skipped");
            }
        }
        Ok(())
    }

    pub(crate) fn skip(&mut self, source: SourceKind, reason: &str) {
        self.skipped += 1;
        warn!(source = source.as_str(), reason, "record skipped");
    }
}

// ============================================================================
// SHARED PARSING
// ============================================================================

/// Business dates arrive as either ISO or US-style strings.
pub(crate) fn parse_flex_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%m/%d/%Y"))
        .ok()
}
