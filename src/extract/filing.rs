// Filing Extractor - regulatory loan tables (schedule of investments)
//
// Each fetched document is one issuer fund's schedule for one filing
// period, delivered as a CSV table. Every parseable row is persisted so
// the trend history stays complete; the distress flag only marks
// eligibility for alerting. Rows with unusable numeric fields are skipped
// and logged, a malformed document aborts only that document.

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::Store;
use crate::error::{IngestError, Result};
use crate::extract::{parse_flex_date, SourceReport};
use crate::fetch::RawDocument;
use crate::model::{LoanRecord, SourceKind};
use crate::resolver::Resolver;

/// One row of a schedule-of-investments table.
#[derive(Debug, Deserialize)]
struct FilingRow {
    borrower: String,
    loan_id: String,
    #[serde(default)]
    sector: Option<String>,
    cost_basis: String,
    fair_value: String,
}

/// Document metadata parsed off the label: `<fund>__<period>__<filing-date>`,
/// e.g. `Ares Capital__2024-Q4__2025-02-15`.
#[derive(Debug, PartialEq)]
struct FilingLabel {
    fund: String,
    period: String,
    filing_date: NaiveDate,
}

fn parse_label(label: &str) -> Result<FilingLabel> {
    let parts: Vec<&str> = label.split("__").collect();
    match parts.as_slice() {
        [fund, period, date] if !fund.is_empty() && !period.is_empty() => {
            let filing_date = parse_flex_date(date).ok_or_else(|| {
                IngestError::parse(format!("filing label {label:?} has bad date {date:?}"))
            })?;
            Ok(FilingLabel {
                fund: fund.to_string(),
                period: period.to_string(),
                filing_date,
            })
        }
        _ => Err(IngestError::parse(format!(
            "filing label {label:?} is not fund__period__date"
        ))),
    }
}

/// Currency fields arrive as "$15,500,000.00" or "(500,000)" for negatives.
fn parse_money(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let negative = trimmed.starts_with('(') && trimmed.ends_with(')');
    let cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let value: f64 = cleaned.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Run the filing extractor over a batch of fetched documents.
pub fn extract_filings(
    store: &Store,
    config: &Config,
    docs: &[RawDocument],
) -> Result<SourceReport> {
    let source = SourceKind::Filings;
    let resolver = Resolver::new(store, &config.resolver);
    let mut report = SourceReport::default();

    for doc in docs {
        let label = match parse_label(&doc.label) {
            Ok(label) => label,
            Err(e) => {
                report.documents_failed += 1;
                warn!(document = %doc.label, error = %e, "filing document unreadable");
                continue;
            }
        };
        info!(fund = %label.fund, period = %label.period, "parsing schedule of investments");

        let mut reader = csv::Reader::from_reader(doc.bytes.as_slice());
        for row in reader.deserialize::<FilingRow>() {
            report.records_seen += 1;

            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    report.skip(source, &format!("malformed schedule row: {e}"));
                    continue;
                }
            };

            let (fair_value, cost_basis) =
                match (parse_money(&row.fair_value), parse_money(&row.cost_basis)) {
                    (Some(fair), Some(cost)) => (fair, cost),
                    _ => {
                        report.skip(
                            source,
                            &format!(
                                "loan {} ({}): unparseable fair_value/cost_basis",
                                row.loan_id, row.borrower
                            ),
                        );
                        continue;
                    }
                };

            let resolution = match resolver.resolve(&row.borrower, source, row.sector.as_deref()) {
                Ok(resolution) => resolution,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    report.skip(source, &format!("borrower {:?}: {e}", row.borrower));
                    continue;
                }
            };

            let record = match LoanRecord::build(
                &resolution.entity_id,
                &row.loan_id,
                &label.period,
                fair_value,
                cost_basis,
                label.filing_date,
                &doc.digest,
                config.ingest.distress_ratio_threshold,
            ) {
                Some(record) => record,
                None => {
                    report.skip(
                        source,
                        &format!("loan {}: unusable cost basis {cost_basis}", row.loan_id),
                    );
                    continue;
                }
            };

            let key = record.natural_key();
            report.absorb(source, &key, store.upsert_loan(&record))?;
        }
    }

    info!(
        seen = report.records_seen,
        stored = report.stored(),
        skipped = report.skipped,
        failed_documents = report.documents_failed,
        "filing extraction complete"
    );
    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule_doc(label: &str, body: &str) -> RawDocument {
        RawDocument::new(label, body.as_bytes().to_vec())
    }

    fn test_store() -> (Store, Config) {
        let config = Config::default();
        let store = Store::open_in_memory(&config).unwrap();
        (store, config)
    }

    #[test]
    fn parses_rows_and_flags_distress() {
        let (store, config) = test_store();
        let doc = schedule_doc(
            "Ares Capital__2024-Q4__2025-02-15",
            "borrower,loan_id,sector,cost_basis,fair_value\n\
             Apex Software Solutions LLC,L-1,Technology,\"$15,500,000\",\"$15,200,000\"\n\
             Pacific Retail Holdings LLC,L-2,Consumer Retail,\"$6,800,000\",\"$5,950,000\"\n",
        );

        let report = extract_filings(&store, &config, &[doc]).unwrap();
        assert_eq!(report.records_seen, 2);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.skipped, 0);

        // 5.95/6.8 = 0.875 is above the threshold; only ratios below 0.85 flag.
        assert_eq!(store.distressed_loan_count().unwrap(), 0);
    }

    #[test]
    fn boundary_ratio_is_not_flagged() {
        let (store, config) = test_store();
        let doc = schedule_doc(
            "Ares Capital__2024-Q4__2025-02-15",
            "borrower,loan_id,sector,cost_basis,fair_value\n\
             At The Line Corp,L-1,Industrials,100.00,85.00\n\
             Just Below Inc,L-2,Industrials,10000.00,8499.00\n",
        );

        extract_filings(&store, &config, &[doc]).unwrap();
        assert_eq!(store.distressed_loan_count().unwrap(), 1);
    }

    #[test]
    fn bad_rows_skip_but_document_continues() {
        let (store, config) = test_store();
        let doc = schedule_doc(
            "Ares Capital__2024-Q4__2025-02-15",
            "borrower,loan_id,sector,cost_basis,fair_value\n\
             Good Borrower Inc,L-1,Tech,100.00,90.00\n\
             Bad Numbers Inc,L-2,Tech,not-a-number,90.00\n\
             Also Good LLC,L-3,Tech,200.00,150.00\n",
        );

        let report = extract_filings(&store, &config, &[doc]).unwrap();
        assert_eq!(report.records_seen, 3);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn malformed_document_fails_alone() {
        let (store, config) = test_store();
        let bad = schedule_doc("not-a-filing-label", "garbage");
        let good = schedule_doc(
            "Ares Capital__2024-Q4__2025-02-15",
            "borrower,loan_id,sector,cost_basis,fair_value\n\
             Good Borrower Inc,L-1,Tech,100.00,90.00\n",
        );

        let report = extract_filings(&store, &config, &[bad, good]).unwrap();
        assert_eq!(report.documents_failed, 1);
        assert_eq!(report.inserted, 1);
    }

    #[test]
    fn reingest_same_document_is_idempotent() {
        let (store, config) = test_store();
        let doc = schedule_doc(
            "Ares Capital__2024-Q4__2025-02-15",
            "borrower,loan_id,sector,cost_basis,fair_value\n\
             Orion Credit,L-100,Credit,100.00,70.00\n",
        );

        let first = extract_filings(&store, &config, &[doc.clone()]).unwrap();
        let second = extract_filings(&store, &config, &[doc]).unwrap();
        assert_eq!(first.inserted, 1);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 1);
        assert_eq!(store.table_counts().unwrap().loans, 1);
        assert_eq!(store.table_counts().unwrap().entities, 1);
    }

    #[test]
    fn money_parsing_handles_formats() {
        assert_eq!(parse_money("$15,500,000.00"), Some(15_500_000.0));
        assert_eq!(parse_money("1234.5"), Some(1234.5));
        assert_eq!(parse_money("(500)"), Some(-500.0));
        assert_eq!(parse_money(""), None);
        assert_eq!(parse_money("n/a"), None);
    }

    #[test]
    fn label_parsing() {
        let label = parse_label("Ares Capital__2024-Q4__2025-02-15").unwrap();
        assert_eq!(label.fund, "Ares Capital");
        assert_eq!(label.period, "2024-Q4");
        assert!(parse_label("missing-parts").is_err());
        assert!(parse_label("Fund__2024-Q4__not-a-date").is_err());
    }
}
