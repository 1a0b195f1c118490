// Data health check - is the record set fit to score from?
//
// A small battery of volume, freshness, and integrity checks over the
// stored tables, rolled up into a 0-100 score. Warn means degraded but
// usable; Fail means something that should never happen given the ingest
// invariants, and is worth investigating before trusting the scores.

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::info;

use crate::db::Store;
use crate::error::Result;

/// Sources older than this are flagged as stale.
const STALE_AFTER_DAYS: i64 = 30;

const RATIO_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl HealthCheck {
    fn new(name: &str, status: CheckStatus, detail: String) -> HealthCheck {
        HealthCheck {
            name: name.to_string(),
            status,
            detail,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    /// Fraction of passing checks, 0-100.
    pub fn score(&self) -> f64 {
        if self.checks.is_empty() {
            return 100.0;
        }
        let passed = self
            .checks
            .iter()
            .filter(|c| c.status == CheckStatus::Pass)
            .count();
        passed as f64 / self.checks.len() as f64 * 100.0
    }

    pub fn worst(&self) -> CheckStatus {
        if self.checks.iter().any(|c| c.status == CheckStatus::Fail) {
            CheckStatus::Fail
        } else if self.checks.iter().any(|c| c.status == CheckStatus::Warn) {
            CheckStatus::Warn
        } else {
            CheckStatus::Pass
        }
    }
}

/// Run every check against the store as of a reference date.
pub fn run_health_check(store: &Store, today: NaiveDate) -> Result<HealthReport> {
    let mut checks = Vec::new();

    // Volume: every record table should have something in it once the
    // pipeline has run at least once.
    let counts = store.table_counts()?;
    for (name, count) in [
        ("volume.entities", counts.entities),
        ("volume.loans", counts.loans),
        ("volume.layoffs", counts.layoffs),
        ("volume.litigation", counts.litigation),
    ] {
        let status = if count > 0 {
            CheckStatus::Pass
        } else {
            CheckStatus::Warn
        };
        checks.push(HealthCheck::new(name, status, format!("{count} rows")));
    }

    // Freshness: a source that has gone quiet is a warning, a record dated
    // in the future is corrupt input that slipped through.
    checks.push(freshness_check(
        "freshness.loans",
        store.loan_date_bounds()?,
        today,
    ));
    checks.push(freshness_check(
        "freshness.layoffs",
        store.layoff_date_bounds()?,
        today,
    ));
    checks.push(freshness_check(
        "freshness.litigation",
        store.litigation_date_bounds()?,
        today,
    ));

    // Integrity: stored ratios always match their inputs, by construction.
    let mismatches = store.ratio_mismatch_count(RATIO_EPSILON)?;
    checks.push(HealthCheck::new(
        "integrity.value_ratio",
        if mismatches == 0 {
            CheckStatus::Pass
        } else {
            CheckStatus::Fail
        },
        format!("{mismatches} loans with inconsistent stored ratio"),
    ));

    // Duplicate audit: the UNIQUE natural keys make duplicates impossible,
    // which is exactly why a nonzero count here is a corruption tripwire.
    let duplicates = store.natural_key_duplicate_count()?;
    checks.push(HealthCheck::new(
        "integrity.natural_keys",
        if duplicates == 0 {
            CheckStatus::Pass
        } else {
            CheckStatus::Fail
        },
        format!("{duplicates} natural keys with more than one row"),
    ));

    let junk = store.junk_name_count()?;
    checks.push(HealthCheck::new(
        "integrity.entity_names",
        if junk == 0 {
            CheckStatus::Pass
        } else {
            CheckStatus::Warn
        },
        format!("{junk} entities with empty or placeholder names"),
    ));

    // Review backlog: conflicts are expected occasionally but should not
    // pile up unexamined.
    let conflicts = store.pending_conflicts()?.len();
    checks.push(HealthCheck::new(
        "review.conflicts",
        if conflicts == 0 {
            CheckStatus::Pass
        } else {
            CheckStatus::Warn
        },
        format!("{conflicts} records awaiting manual review"),
    ));

    let report = HealthReport { checks };
    info!(
        score = report.score(),
        status = ?report.worst(),
        "health check complete"
    );
    Ok(report)
}

fn freshness_check(
    name: &str,
    bounds: Option<(NaiveDate, NaiveDate)>,
    today: NaiveDate,
) -> HealthCheck {
    match bounds {
        None => HealthCheck::new(name, CheckStatus::Warn, "no records".to_string()),
        Some((_, max)) if max > today => HealthCheck::new(
            name,
            CheckStatus::Fail,
            format!("latest record dated {max}, in the future"),
        ),
        Some((_, max)) if max < today - Duration::days(STALE_AFTER_DAYS) => HealthCheck::new(
            name,
            CheckStatus::Warn,
            format!("latest record dated {max}, stale"),
        ),
        Some((min, max)) => HealthCheck::new(
            name,
            CheckStatus::Pass,
            format!("records span {min} to {max}"),
        ),
    }
}

// ============================================================================
// TESTS
// ============================================================================
