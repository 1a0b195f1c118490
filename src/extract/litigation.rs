// Litigation Extractor - court docket search results
//
// Docket feeds are JSON arrays of case entries whose titles carry the party
// of interest in a handful of caption shapes ("A v. B", "In re: X",
// "X, Debtor"). Only tracked case types are kept. The case number is the
// natural key and binds to one entity forever; the store turns a re-ingest
// under a different entity into a manual-review conflict.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::Store;
use crate::error::Result;
use crate::extract::{parse_flex_date, SourceReport};
use crate::fetch::RawDocument;
use crate::model::{CaseStatus, CaseType, LitigationRecord, SourceKind};
use crate::resolver::Resolver;

/// One docket entry from a search-results page.
#[derive(Debug, Deserialize)]
struct DocketRow {
    case_number: String,
    title: String,
    case_type: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    filed_date: Option<String>,
    #[serde(default)]
    court: Option<String>,
}

// ============================================================================
// CAPTION PARSING
// ============================================================================

fn in_re_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^in\s+re:?\s+(.+)$").unwrap())
}

fn versus_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(.+?)\s+vs?\.?\s+(.+)$").unwrap())
}

fn debtor_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(.+?),\s+debtors?\.?$").unwrap())
}

/// Pull the company of interest out of a case caption. Distress signals
/// attach to the respondent side, so "A v. B" yields B.
fn party_of_interest(title: &str) -> Option<String> {
    let title = title.trim();
    if let Some(caps) = in_re_pattern().captures(title) {
        return Some(caps[1].trim().to_string());
    }
    if let Some(caps) = versus_pattern().captures(title) {
        return Some(caps[2].trim().to_string());
    }
    if let Some(caps) = debtor_pattern().captures(title) {
        return Some(caps[1].trim().to_string());
    }
    None
}

fn is_tracked(tracked: &[String], case_type: CaseType) -> bool {
    tracked.iter().any(|t| t == case_type.as_str())
}

// ============================================================================
// EXTRACTION
// ============================================================================

/// Run the litigation extractor over a batch of docket search results.
pub fn extract_litigation(
    store: &Store,
    config: &Config,
    docs: &[RawDocument],
) -> Result<SourceReport> {
    let source = SourceKind::Litigation;
    let resolver = Resolver::new(store, &config.resolver);
    let mut report = SourceReport::default();

    for doc in docs {
        let rows: Vec<DocketRow> = match serde_json::from_slice(&doc.bytes) {
            Ok(rows) => rows,
            Err(e) => {
                report.documents_failed += 1;
                warn!(feed = %doc.label, error = %e, "docket feed unreadable");
                continue;
            }
        };
        info!(feed = %doc.label, entries = rows.len(), "parsing docket results");

        for row in rows {
            report.records_seen += 1;

            if row.case_number.trim().is_empty() {
                report.skip(source, &format!("{:?}: missing case number", row.title));
                continue;
            }

            let case_type = CaseType::parse(&row.case_type);
            if !is_tracked(&config.ingest.tracked_case_types, case_type) {
                report.skip(
                    source,
                    &format!("case {}: type {:?} not tracked", row.case_number, row.case_type),
                );
                continue;
            }

            let Some(party) = party_of_interest(&row.title) else {
                report.skip(
                    source,
                    &format!("case {}: unparseable caption {:?}", row.case_number, row.title),
                );
                continue;
            };

            let resolution = match resolver.resolve(&party, source, None) {
                Ok(resolution) => resolution,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    report.skip(source, &format!("case {}: {e}", row.case_number));
                    continue;
                }
            };

            let record = LitigationRecord {
                case_number: row.case_number.trim().to_string(),
                entity_id: resolution.entity_id,
                case_type,
                filed_date: row.filed_date.as_deref().and_then(parse_flex_date),
                court: row.court.unwrap_or_else(|| doc.label.clone()),
                status: row
                    .status
                    .as_deref()
                    .map(CaseStatus::parse)
                    .unwrap_or(CaseStatus::Open),
            };

            let key = record.case_number.clone();
            report.absorb(source, &key, store.upsert_litigation(&record))?;
        }
    }

    info!(
        seen = report.records_seen,
        stored = report.stored(),
        skipped = report.skipped,
        conflicts = report.conflicts,
        failed_documents = report.documents_failed,
        "litigation extraction complete"
    );
    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn docket_doc(label: &str, entries: Value) -> RawDocument {
        RawDocument::new(label, serde_json::to_vec(&entries).unwrap())
    }

    fn test_store() -> (Store, Config) {
        let config = Config::default();
        let store = Store::open_in_memory(&config).unwrap();
        (store, config)
    }

    #[test]
    fn caption_shapes_parse_to_the_respondent() {
        assert_eq!(
            party_of_interest("Prudential Lenders LP v. Orion Credit Holdings LLC"),
            Some("Orion Credit Holdings LLC".to_string())
        );
        assert_eq!(
            party_of_interest("Apollo Fund III vs. Summit Business Services"),
            Some("Summit Business Services".to_string())
        );
        assert_eq!(
            party_of_interest("In re: Pacific Retail Holdings LLC"),
            Some("Pacific Retail Holdings LLC".to_string())
        );
        assert_eq!(
            party_of_interest("In Re Orion Credit"),
            Some("Orion Credit".to_string())
        );
        assert_eq!(
            party_of_interest("Pacific Retail Holdings LLC, Debtor"),
            Some("Pacific Retail Holdings LLC".to_string())
        );
        assert_eq!(party_of_interest("Notice of hearing schedule"), None);
    }

    #[test]
    fn untracked_case_types_are_skipped() {
        let (store, config) = test_store();
        let doc = docket_doc(
            "SDNY",
            json!([
                {"case_number": "1:25-cv-100",
                 "title": "Lender Trust v. Orion Credit",
                 "case_type": "Breach of Contract"},
                {"case_number": "1:25-cv-101",
                 "title": "Smith v. Orion Credit",
                 "case_type": "Employment Discrimination"}
            ]),
        );

        let report = extract_litigation(&store, &config, &[doc]).unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn status_updates_on_reingest() {
        let (store, config) = test_store();
        let open = docket_doc(
            "SDNY",
            json!([
                {"case_number": "1:25-cv-100",
                 "title": "Lender Trust v. Orion Credit",
                 "case_type": "breach_of_contract",
                 "filed_date": "2025-01-10"}
            ]),
        );
        let dismissed = docket_doc(
            "SDNY",
            json!([
                {"case_number": "1:25-cv-100",
                 "title": "Lender Trust v. Orion Credit",
                 "case_type": "breach_of_contract",
                 "status": "Dismissed with prejudice"}
            ]),
        );

        extract_litigation(&store, &config, &[open]).unwrap();
        let report = extract_litigation(&store, &config, &[dismissed]).unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(store.table_counts().unwrap().litigation, 1);

        let entity = store
            .find_entity_by_normalized("orion credit")
            .unwrap()
            .unwrap();
        assert!(store.open_cases(&entity.entity_id).unwrap().is_empty());
    }

    #[test]
    fn case_reassignment_becomes_a_conflict() {
        let (store, config) = test_store();
        let first = docket_doc(
            "DE Chancery",
            json!([
                {"case_number": "2025-0042",
                 "title": "In re: Pacific Retail Holdings LLC",
                 "case_type": "Receivership"}
            ]),
        );
        let reassigned = docket_doc(
            "DE Chancery",
            json!([
                {"case_number": "2025-0042",
                 "title": "In re: Midwest Logistics Partners",
                 "case_type": "Receivership"}
            ]),
        );

        extract_litigation(&store, &config, &[first]).unwrap();
        let report = extract_litigation(&store, &config, &[reassigned]).unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.stored(), 0);

        // Original binding intact, conflict queued.
        let original = store
            .find_entity_by_normalized("pacific retail")
            .unwrap()
            .unwrap();
        assert_eq!(store.open_cases(&original.entity_id).unwrap().len(), 1);
        assert_eq!(store.pending_conflicts().unwrap().len(), 1);
    }

    #[test]
    fn missing_court_falls_back_to_feed_label() {
        let (store, config) = test_store();
        let doc = docket_doc(
            "NY Supreme",
            json!([
                {"case_number": "650123/2025",
                 "title": "Apex Lending v. Summit Business Services",
                 "case_type": "breach of contract"}
            ]),
        );

        let report = extract_litigation(&store, &config, &[doc]).unwrap();
        assert_eq!(report.inserted, 1);
    }
}
