// Notice Extractor - government layoff notices, one feed per jurisdiction
//
// Feeds are JSON arrays keyed by the document label (the jurisdiction that
// published the feed). The same underlying notice frequently appears in a
// state feed and a federal roll-up; the natural key excludes the source
// jurisdiction so both collapse to one row. Cheap filters (head-count
// floor, sector allowlist) run before entity resolution so junk entries
// never mint entities.

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::Store;
use crate::error::Result;
use crate::extract::{parse_flex_date, SourceReport};
use crate::fetch::RawDocument;
use crate::model::{LayoffRecord, SourceKind};
use crate::resolver::Resolver;

const FACILITY_FALLBACK: &str = "unspecified";

/// One entry from a jurisdiction feed. Head counts arrive as JSON numbers
/// in some feeds and formatted strings ("1,200") in others.
#[derive(Debug, Deserialize)]
struct NoticeRow {
    company: String,
    state: String,
    notice_date: String,
    employees: Value,
    #[serde(default)]
    effective_date: Option<String>,
    #[serde(default)]
    facility: Option<String>,
    #[serde(default)]
    sector: Option<String>,
}

fn parse_employee_count(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => {
            let cleaned: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
            if cleaned.is_empty() {
                None
            } else {
                cleaned.parse().ok()
            }
        }
        _ => None,
    }
}

fn sector_allowed(allowlist: &[String], sector: Option<&str>) -> bool {
    if allowlist.is_empty() {
        return true;
    }
    match sector {
        Some(s) => allowlist.iter().any(|a| a.eq_ignore_ascii_case(s)),
        None => false,
    }
}

/// Run the notice extractor over a batch of jurisdiction feeds.
pub fn extract_notices(
    store: &Store,
    config: &Config,
    docs: &[RawDocument],
) -> Result<SourceReport> {
    let source = SourceKind::Notices;
    let resolver = Resolver::new(store, &config.resolver);
    let mut report = SourceReport::default();

    for doc in docs {
        let rows: Vec<NoticeRow> = match serde_json::from_slice(&doc.bytes) {
            Ok(rows) => rows,
            Err(e) => {
                report.documents_failed += 1;
                warn!(feed = %doc.label, error = %e, "notice feed unreadable");
                continue;
            }
        };
        info!(feed = %doc.label, entries = rows.len(), "parsing layoff feed");

        for row in rows {
            report.records_seen += 1;

            let Some(notice_date) = parse_flex_date(&row.notice_date) else {
                report.skip(
                    source,
                    &format!("{}: bad notice_date {:?}", row.company, row.notice_date),
                );
                continue;
            };
            let Some(employee_count) = parse_employee_count(&row.employees) else {
                report.skip(
                    source,
                    &format!("{}: unparseable head count {}", row.company, row.employees),
                );
                continue;
            };

            // Below-floor and off-sector entries are filtered here, before
            // resolution, so they never create watchlist entities.
            if employee_count < config.ingest.employee_floor {
                report.skip(
                    source,
                    &format!(
                        "{}: {} employees below reporting floor",
                        row.company, employee_count
                    ),
                );
                continue;
            }
            if !sector_allowed(&config.ingest.sector_allowlist, row.sector.as_deref()) {
                report.skip(
                    source,
                    &format!("{}: sector {:?} not tracked", row.company, row.sector),
                );
                continue;
            }

            let resolution = match resolver.resolve(&row.company, source, row.sector.as_deref()) {
                Ok(resolution) => resolution,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    report.skip(source, &format!("company {:?}: {e}", row.company));
                    continue;
                }
            };

            let record = LayoffRecord {
                entity_id: resolution.entity_id,
                state: row.state.trim().to_uppercase(),
                notice_date,
                facility: row
                    .facility
                    .as_deref()
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .unwrap_or(FACILITY_FALLBACK)
                    .to_string(),
                employee_count,
                effective_date: row.effective_date.as_deref().and_then(parse_flex_date),
                sector: row.sector.clone(),
                source_jurisdiction: doc.label.clone(),
            };

            let key = record.natural_key();
            report.absorb(source, &key, store.upsert_layoff(&record))?;
        }
    }

    info!(
        seen = report.records_seen,
        stored = report.stored(),
        skipped = report.skipped,
        failed_documents = report.documents_failed,
        "notice extraction complete"
    );
    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================
