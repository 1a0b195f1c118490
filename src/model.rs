// Data model - watchlist entities and the three observational record types
//
// Identity vs value: entity_id is identity (a UUID minted on first
// sighting, never reassigned); names are values that accumulate as aliases.
// Each record type carries its natural key explicitly so upserts and
// deduplication never depend on a synthetic row id.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// SOURCES
// ============================================================================

/// The three independent ingestion sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    /// Regulatory loan tables (schedule of investments).
    Filings,

    /// Government layoff notices.
    Notices,

    /// Court docket search results.
    Litigation,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [
        SourceKind::Filings,
        SourceKind::Notices,
        SourceKind::Litigation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Filings => "filings",
            SourceKind::Notices => "notices",
            SourceKind::Litigation => "litigation",
        }
    }

    pub fn parse(s: &str) -> Option<SourceKind> {
        match s.to_lowercase().as_str() {
            "filings" | "filing" | "loans" => Some(SourceKind::Filings),
            "notices" | "notice" | "layoffs" => Some(SourceKind::Notices),
            "litigation" | "legal" | "cases" => Some(SourceKind::Litigation),
            _ => None,
        }
    }
}

// ============================================================================
// WATCHLIST ENTITY
// ============================================================================

/// Canonical company identity, shared by all three sources.
///
/// Created on first unresolved mention, mutated only to add aliases,
/// never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistEntity {
    /// Stable identity - never changes once minted.
    pub entity_id: String,

    /// The name as first seen, used for display.
    pub canonical_name: String,

    /// Normalized form of the canonical name, used for exact lookup.
    pub normalized_name: String,

    /// Raw name forms that resolved to this entity. Additive only.
    pub aliases: Vec<String>,

    pub sector: Option<String>,

    pub first_seen: DateTime<Utc>,
}

impl WatchlistEntity {
    pub fn new(canonical_name: &str, normalized_name: &str, sector: Option<String>) -> Self {
        WatchlistEntity {
            entity_id: uuid::Uuid::new_v4().to_string(),
            canonical_name: canonical_name.to_string(),
            normalized_name: normalized_name.to_string(),
            aliases: Vec::new(),
            sector,
            first_seen: Utc::now(),
        }
    }
}

// ============================================================================
// LOAN RECORD
// ============================================================================

/// One line item from a regulatory loan table.
///
/// Natural key: (issuer_entity_id, loan_id, filing_period). Distinct
/// filing periods are distinct rows - history is append-only across
/// periods, and only fields within one period are ever updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanRecord {
    pub issuer_entity_id: String,
    pub loan_id: String,
    pub filing_period: String,

    pub fair_value: f64,
    pub cost_basis: f64,

    /// fair_value / cost_basis. Always recomputed at ingest from the two
    /// stored fields, never trusted from input.
    pub value_ratio: f64,

    /// Eligibility for alerting only - all parseable rows are stored.
    pub flagged: bool,

    pub filing_date: NaiveDate,

    /// Digest of the source document this row came from.
    pub source_document_ref: String,
}

impl LoanRecord {
    /// Build a record, computing value_ratio and the distress flag.
    /// Returns None when cost_basis is not a usable denominator.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        issuer_entity_id: &str,
        loan_id: &str,
        filing_period: &str,
        fair_value: f64,
        cost_basis: f64,
        filing_date: NaiveDate,
        source_document_ref: &str,
        distress_threshold: f64,
    ) -> Option<LoanRecord> {
        let value_ratio = value_ratio(fair_value, cost_basis)?;
        Some(LoanRecord {
            issuer_entity_id: issuer_entity_id.to_string(),
            loan_id: loan_id.to_string(),
            filing_period: filing_period.to_string(),
            fair_value,
            cost_basis,
            value_ratio,
            flagged: is_distressed(value_ratio, distress_threshold),
            filing_date,
            source_document_ref: source_document_ref.to_string(),
        })
    }

    pub fn natural_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.issuer_entity_id, self.loan_id, self.filing_period
        )
    }
}

/// fair_value / cost_basis, or None when the denominator is unusable.
pub fn value_ratio(fair_value: f64, cost_basis: f64) -> Option<f64> {
    if cost_basis <= 0.0 || !cost_basis.is_finite() || !fair_value.is_finite() {
        return None;
    }
    Some(fair_value / cost_basis)
}

/// Strictly below the threshold. A ratio of exactly the threshold is
/// NOT distressed.
pub fn is_distressed(ratio: f64, threshold: f64) -> bool {
    ratio < threshold
}

// ============================================================================
// LAYOFF RECORD
// ============================================================================

/// One reported workforce reduction.
///
/// Natural key: (entity_id, state, notice_date, facility). The source
/// jurisdiction is deliberately NOT part of the key, so the same notice
/// surfacing in two jurisdictions' feeds collapses to one row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoffRecord {
    pub entity_id: String,
    pub state: String,
    pub notice_date: NaiveDate,
    pub facility: String,

    pub employee_count: u32,
    pub effective_date: Option<NaiveDate>,
    pub sector: Option<String>,
    pub source_jurisdiction: String,
}

impl LayoffRecord {
    pub fn natural_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.entity_id, self.state, self.notice_date, self.facility
        )
    }
}

// ============================================================================
// LITIGATION RECORD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseType {
    BreachOfContract,
    Receivership,
    Other,
}

impl CaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseType::BreachOfContract => "breach_of_contract",
            CaseType::Receivership => "receivership",
            CaseType::Other => "other",
        }
    }

    /// Lenient parse of source-supplied case type strings.
    pub fn parse(s: &str) -> CaseType {
        let lower = s.to_lowercase();
        if lower.contains("breach") {
            CaseType::BreachOfContract
        } else if lower.contains("receiver") {
            CaseType::Receivership
        } else {
            CaseType::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Open,
    Dismissed,
    Settled,
    Closed,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Open => "open",
            CaseStatus::Dismissed => "dismissed",
            CaseStatus::Settled => "settled",
            CaseStatus::Closed => "closed",
        }
    }

    /// Unknown statuses default to Open: an unrecognized docket state is
    /// still a live signal until told otherwise.
    pub fn parse(s: &str) -> CaseStatus {
        let lower = s.to_lowercase();
        if lower.contains("dismiss") {
            CaseStatus::Dismissed
        } else if lower.contains("settle") {
            CaseStatus::Settled
        } else if lower.contains("closed") || lower.contains("terminated") {
            CaseStatus::Closed
        } else {
            CaseStatus::Open
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, CaseStatus::Open)
    }
}

/// One case matched to a watchlist entity.
///
/// Natural key: case_number (source-assigned, globally unique). A case
/// number binds to exactly one entity_id forever - later ingests may
/// update status and descriptive fields only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LitigationRecord {
    pub case_number: String,
    pub entity_id: String,
    pub case_type: CaseType,
    pub filed_date: Option<NaiveDate>,
    pub court: String,
    pub status: CaseStatus,
}

// ============================================================================
// DISTRESS SCORE
// ============================================================================

/// One computed score per entity per as-of date. Entirely derived from the
/// three record tables; recomputed, never incrementally mutated. Prior
/// as-of dates are retained as a time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistressScore {
    pub entity_id: String,
    pub as_of_date: NaiveDate,
    pub loan_component: f64,
    pub labor_component: f64,
    pub litigation_component: f64,
    pub composite_score: f64,
}

// ============================================================================
// CONFLICTS (manual-review queue)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Multiple entities passed the fuzzy-match threshold for one name.
    AmbiguousMatch,

    /// A case number was re-ingested under a different entity.
    CaseEntityMismatch,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::AmbiguousMatch => "ambiguous_match",
            ConflictKind::CaseEntityMismatch => "case_entity_mismatch",
        }
    }

    pub fn parse(s: &str) -> Option<ConflictKind> {
        match s {
            "ambiguous_match" => Some(ConflictKind::AmbiguousMatch),
            "case_entity_mismatch" => Some(ConflictKind::CaseEntityMismatch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub kind: ConflictKind,
    pub record_key: String,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}

// ============================================================================
// TESTS
// ============================================================================
