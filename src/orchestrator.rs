// Run orchestration - fetch, extract, aggregate, in that order
//
// The three sources are independent and run on their own threads; a source
// failing (fetch exhausted, storage error mid-extract) is recorded and the
// rest continue. Aggregation always runs afterwards over whatever the
// record set now contains, so a partial run still refreshes the scores.

use chrono::NaiveDate;
use std::thread;
use tracing::{error, info};

use crate::config::Config;
use crate::db::Store;
use crate::error::Result;
use crate::extract::{filing, litigation, notice, SourceReport};
use crate::fetch::{fetch_with_retry, RawDocument, SourceFetcher};
use crate::model::SourceKind;
use crate::score::{AggregationSummary, Aggregator};

// ============================================================================
// RUN SUMMARY
// ============================================================================

#[derive(Debug)]
pub struct SourceOutcome {
    pub source: SourceKind,
    pub report: SourceReport,

    /// Set when the source did not complete: fetch attempts exhausted or a
    /// storage failure mid-extraction.
    pub failure: Option<String>,
}

impl SourceOutcome {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub as_of: NaiveDate,
    pub sources: Vec<SourceOutcome>,
    pub aggregation: AggregationSummary,
}

impl RunSummary {
    pub fn all_sources_succeeded(&self) -> bool {
        self.sources.iter().all(SourceOutcome::succeeded)
    }

    /// Process exit code: zero only when every source completed and every
    /// entity scored.
    pub fn exit_code(&self) -> i32 {
        if self.all_sources_succeeded() && self.aggregation.entities_failed == 0 {
            0
        } else {
            1
        }
    }
}

// ============================================================================
// ORCHESTRATION
// ============================================================================

fn extract_source(
    store: &Store,
    config: &Config,
    source: SourceKind,
    docs: &[RawDocument],
) -> Result<SourceReport> {
    match source {
        SourceKind::Filings => filing::extract_filings(store, config, docs),
        SourceKind::Notices => notice::extract_notices(store, config, docs),
        SourceKind::Litigation => litigation::extract_litigation(store, config, docs),
    }
}

fn run_source(
    store: &Store,
    config: &Config,
    fetcher: &dyn SourceFetcher,
    source: SourceKind,
) -> SourceOutcome {
    let docs = match fetch_with_retry(fetcher, source, &config.fetch) {
        Ok(docs) => docs,
        Err(e) => {
            error!(source = source.as_str(), error = %e, "source fetch failed");
            return SourceOutcome {
                source,
                report: SourceReport::default(),
                failure: Some(e.to_string()),
            };
        }
    };

    match extract_source(store, config, source, &docs) {
        Ok(report) => SourceOutcome {
            source,
            report,
            failure: None,
        },
        Err(e) => {
            error!(source = source.as_str(), error = %e, "source extraction failed");
            SourceOutcome {
                source,
                report: SourceReport::default(),
                failure: Some(e.to_string()),
            }
        }
    }
}

/// One full pipeline run: all three sources concurrently, then a score
/// recompute over the combined record set.
pub fn run(
    store: &Store,
    config: &Config,
    fetcher: &dyn SourceFetcher,
    as_of: NaiveDate,
) -> Result<RunSummary> {
    info!(as_of = %as_of, "starting ingestion run");

    let sources = thread::scope(|scope| {
        let handles: Vec<_> = SourceKind::ALL
            .into_iter()
            .map(|source| {
                (
                    source,
                    scope.spawn(move || run_source(store, config, fetcher, source)),
                )
            })
            .collect();
        handles
            .into_iter()
            .map(|(source, handle)| match handle.join() {
                Ok(outcome) => outcome,
                Err(_) => SourceOutcome {
                    source,
                    report: SourceReport::default(),
                    failure: Some("extractor thread panicked".to_string()),
                },
            })
            .collect::<Vec<_>>()
    });

    for outcome in &sources {
        info!(
            source = outcome.source.as_str(),
            stored = outcome.report.stored(),
            skipped = outcome.report.skipped,
            conflicts = outcome.report.conflicts,
            failed = outcome.failure.is_some(),
            "source complete"
        );
    }

    // Aggregation runs even after source failures: the scores should
    // reflect whatever made it into the record set.
    let aggregation = Aggregator::new(store, &config.scoring).recompute(as_of)?;

    Ok(RunSummary {
        as_of,
        sources,
        aggregation,
    })
}

/// Run one source by itself, then recompute scores.
pub fn run_single(
    store: &Store,
    config: &Config,
    fetcher: &dyn SourceFetcher,
    source: SourceKind,
    as_of: NaiveDate,
) -> Result<RunSummary> {
    info!(as_of = %as_of, source = source.as_str(), "starting single-source run");
    let outcome = run_source(store, config, fetcher, source);
    let aggregation = Aggregator::new(store, &config.scoring).recompute(as_of)?;
    Ok(RunSummary {
        as_of,
        sources: vec![outcome],
        aggregation,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use serde_json::json;

    /// Serves canned documents; the filing source can be forced to fail.
    struct CannedFetcher {
        fail_filings: bool,
    }

    impl SourceFetcher for CannedFetcher {
        fn fetch(&self, source: SourceKind) -> Result<Vec<RawDocument>> {
            match source {
                SourceKind::Filings => {
                    if self.fail_filings {
                        return Err(IngestError::TransientFetch("portal down".into()));
                    }
                    Ok(vec![RawDocument::new(
                        "Ares Capital__2024-Q4__2025-02-15",
                        b"borrower,loan_id,sector,cost_basis,fair_value\n\
                          Orion Credit,L-1,Credit,100.00,70.00\n"
                            .to_vec(),
                    )])
                }
                SourceKind::Notices => Ok(vec![RawDocument::new(
                    "CA",
                    serde_json::to_vec(&json!([
                        {"company": "Orion Credit", "state": "CA",
                         "notice_date": "2025-02-20", "employees": 150}
                    ]))
                    .unwrap(),
                )]),
                SourceKind::Litigation => Ok(vec![RawDocument::new(
                    "SDNY",
                    serde_json::to_vec(&json!([
                        {"case_number": "1:25-cv-100",
                         "title": "Lender Trust v. Orion Credit",
                         "case_type": "breach_of_contract",
                         "filed_date": "2025-02-01"}
                    ]))
                    .unwrap(),
                )]),
            }
        }
    }

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.fetch.max_attempts = 2;
        config.fetch.backoff_base_ms = 1;
        config.fetch.backoff_cap_ms = 2;
        config
    }

    #[test]
    fn full_run_ingests_all_sources_and_scores() {
        let config = fast_config();
        let store = Store::open_in_memory(&config).unwrap();
        let fetcher = CannedFetcher {
            fail_filings: false,
        };
        let as_of = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();

        let summary = run(&store, &config, &fetcher, as_of).unwrap();
        assert!(summary.all_sources_succeeded());
        assert_eq!(summary.exit_code(), 0);

        // All three sources resolved to the same entity, which got scored.
        let counts = store.table_counts().unwrap();
        assert_eq!(counts.entities, 1);
        assert_eq!(counts.loans, 1);
        assert_eq!(counts.layoffs, 1);
        assert_eq!(counts.litigation, 1);
        assert_eq!(summary.aggregation.entities_scored, 1);

        let scores = store.current_scores().unwrap();
        assert_eq!(scores.len(), 1);
        assert!(scores[0].composite_score > 0.0);
    }

    #[test]
    fn failed_source_does_not_block_the_others_or_scoring() {
        let config = fast_config();
        let store = Store::open_in_memory(&config).unwrap();
        let fetcher = CannedFetcher { fail_filings: true };
        let as_of = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();

        let summary = run(&store, &config, &fetcher, as_of).unwrap();
        assert!(!summary.all_sources_succeeded());
        assert_eq!(summary.exit_code(), 1);

        let filing_outcome = summary
            .sources
            .iter()
            .find(|o| o.source == SourceKind::Filings)
            .unwrap();
        assert!(filing_outcome.failure.is_some());

        // The other two sources landed and scoring still ran.
        let counts = store.table_counts().unwrap();
        assert_eq!(counts.loans, 0);
        assert_eq!(counts.layoffs, 1);
        assert_eq!(counts.litigation, 1);
        assert_eq!(summary.aggregation.entities_scored, 1);
    }

    #[test]
    fn single_source_run_touches_one_source() {
        let config = fast_config();
        let store = Store::open_in_memory(&config).unwrap();
        let fetcher = CannedFetcher {
            fail_filings: false,
        };
        let as_of = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();

        let summary =
            run_single(&store, &config, &fetcher, SourceKind::Notices, as_of).unwrap();
        assert_eq!(summary.sources.len(), 1);
        assert_eq!(summary.exit_code(), 0);

        let counts = store.table_counts().unwrap();
        assert_eq!(counts.loans, 0);
        assert_eq!(counts.layoffs, 1);
        assert_eq!(counts.litigation, 0);
    }
}
