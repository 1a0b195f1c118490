// Distress scoring - deterministic aggregation over the record tables
//
// Each component is a pure function of one source's records, scaled 0-100;
// the composite is a weight-normalized blend. Scores are recomputed from
// scratch every run, never incrementally adjusted, so the same database
// state always yields the same scores. Only entities with at least one
// observational record are scored.

use chrono::{Duration, NaiveDate};
use tracing::{info, warn};

use crate::config::ScoringConfig;
use crate::db::Store;
use crate::error::Result;
use crate::model::{CaseType, DistressScore};

// ============================================================================
// COMPONENTS (pure)
// ============================================================================

/// Loan write-down severity from the worst recent value_ratio.
///
/// No recent loans is no signal (0). A ratio at or above par maps to 0,
/// at or below the floor to 100, linear in between.
pub fn loan_component(min_recent_ratio: Option<f64>, config: &ScoringConfig) -> f64 {
    let Some(ratio) = min_recent_ratio else {
        return 0.0;
    };
    if ratio >= 1.0 {
        return 0.0;
    }
    if ratio <= config.ratio_floor {
        return 100.0;
    }
    (1.0 - ratio) / (1.0 - config.ratio_floor) * 100.0
}

/// Labor distress from cumulative recent layoffs, log-scaled so the jump
/// from 0 to 500 matters more than the jump from 4,000 to 4,500. Saturates
/// at the configured head count.
pub fn labor_component(recent_layoff_total: u32, config: &ScoringConfig) -> f64 {
    if recent_layoff_total == 0 || config.labor_saturation == 0 {
        return 0.0;
    }
    let scaled = (1.0 + f64::from(recent_layoff_total)).ln()
        / (1.0 + f64::from(config.labor_saturation)).ln()
        * 100.0;
    scaled.min(100.0)
}

/// Litigation pressure: every open case contributes its type weight,
/// capped at 100.
pub fn litigation_component(open_cases: &[CaseType], config: &ScoringConfig) -> f64 {
    let total: f64 = open_cases
        .iter()
        .map(|case| match case {
            CaseType::Receivership => config.receivership_case_weight,
            CaseType::BreachOfContract => config.breach_case_weight,
            CaseType::Other => config.other_case_weight,
        })
        .sum();
    total.min(100.0)
}

/// Weight-normalized blend of the three components.
pub fn composite(loan: f64, labor: f64, litigation: f64, config: &ScoringConfig) -> f64 {
    let w = &config.weights;
    let total_weight = w.loan + w.labor + w.litigation;
    if total_weight <= 0.0 {
        return 0.0;
    }
    (loan * w.loan + labor * w.labor + litigation * w.litigation) / total_weight
}

// ============================================================================
// AGGREGATOR
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AggregationSummary {
    pub entities_scored: usize,

    /// Entities whose score could not be computed this run. Their prior
    /// score rows are left untouched.
    pub entities_failed: usize,
}

pub struct Aggregator<'a> {
    store: &'a Store,
    config: &'a ScoringConfig,
}

impl<'a> Aggregator<'a> {
    pub fn new(store: &'a Store, config: &'a ScoringConfig) -> Self {
        Aggregator { store, config }
    }

    /// Score one entity as of a date. Pure given the database state.
    pub fn score_entity(&self, entity_id: &str, as_of: NaiveDate) -> Result<DistressScore> {
        let loan_since = as_of - Duration::days(self.config.loan_lookback_days);
        let layoff_since = as_of - Duration::days(self.config.layoff_lookback_days);

        let min_ratio = self.store.min_recent_value_ratio(entity_id, loan_since)?;
        let layoff_total = self.store.recent_layoff_total(entity_id, layoff_since)?;
        let cases = self.store.open_cases(entity_id)?;

        let loan = loan_component(min_ratio, self.config);
        let labor = labor_component(layoff_total, self.config);
        let litigation = litigation_component(&cases, self.config);

        Ok(DistressScore {
            entity_id: entity_id.to_string(),
            as_of_date: as_of,
            loan_component: loan,
            labor_component: labor,
            litigation_component: litigation,
            composite_score: composite(loan, labor, litigation, self.config),
        })
    }

    /// Recompute and persist scores for every entity with records. One
    /// entity failing does not stop the rest; re-running the same as-of
    /// date replaces that date's rows only.
    pub fn recompute(&self, as_of: NaiveDate) -> Result<AggregationSummary> {
        let mut summary = AggregationSummary::default();

        for entity_id in self.store.entity_ids_with_records()? {
            let result = self
                .score_entity(&entity_id, as_of)
                .and_then(|score| self.store.insert_score(&score));
            match result {
                Ok(()) => summary.entities_scored += 1,
                Err(e) => {
                    summary.entities_failed += 1;
                    warn!(entity_id = %entity_id, error = %e, "scoring failed for entity");
                }
            }
        }

        info!(
            as_of = %as_of,
            scored = summary.entities_scored,
            failed = summary.entities_failed,
            "score recompute complete"
        );
        Ok(summary)
    }
}

// ============================================================================
// TESTS
// ============================================================================
