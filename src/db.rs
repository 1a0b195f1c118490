// Storage & upsert layer - owns the schema and every invariant on it
//
// Single-writer discipline: one Connection behind a Mutex, one transaction
// per natural-key upsert. Extractors buffer candidate records and submit
// them record by record, so no long-lived lock is ever held. Natural keys
// are enforced as UNIQUE constraints; upserts insert on a missing key and
// update mutable fields only, leaving keys and entity references untouched.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::config::Config;
use crate::error::{IngestError, Result};
use crate::model::{
    is_distressed, value_ratio, CaseStatus, CaseType, ConflictKind, ConflictRecord, DistressScore,
    LayoffRecord, LitigationRecord, LoanRecord, WatchlistEntity,
};

// ============================================================================
// STORE
// ============================================================================

/// Outcome of a natural-key upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Counts of rows touched since a timestamp, per record table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TouchedCounts {
    pub loans: i64,
    pub layoffs: i64,
    pub cases: i64,
}

/// Row counts per table, for the health check.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableCounts {
    pub entities: i64,
    pub loans: i64,
    pub layoffs: i64,
    pub litigation: i64,
    pub scores: i64,
    pub conflicts: i64,
}

pub struct Store {
    conn: Mutex<Connection>,
    distress_threshold: f64,
    employee_floor: u32,
}

impl Store {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: &Path, config: &Config) -> Result<Store> {
        let conn = Connection::open(path)?;
        Store::from_connection(conn, config)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory(config: &Config) -> Result<Store> {
        let conn = Connection::open_in_memory()?;
        Store::from_connection(conn, config)
    }

    fn from_connection(conn: Connection, config: &Config) -> Result<Store> {
        // WAL for crash recovery; a no-op for in-memory connections.
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        setup_schema(&conn)?;
        Ok(Store {
            conn: Mutex::new(conn),
            distress_threshold: config.ingest.distress_ratio_threshold,
            employee_floor: config.ingest.employee_floor,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // An extractor thread panicking while it holds the lock poisons it.
        // Every write is a single-row transaction, so the connection state
        // stays consistent; the surviving sources keep going.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ========================================================================
    // ENTITIES
    // ========================================================================

    pub fn insert_entity(&self, entity: &WatchlistEntity) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO entities (entity_id, canonical_name, normalized_name, sector, first_seen)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entity.entity_id,
                entity.canonical_name,
                entity.normalized_name,
                entity.sector,
                entity.first_seen.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Attach a raw name form to an entity. Idempotent: re-adding an alias
    /// is a no-op, and aliases are never moved between entities.
    pub fn add_alias(&self, entity_id: &str, raw_name: &str, normalized_name: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO entity_aliases (entity_id, raw_name, normalized_name, added_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![entity_id, raw_name, normalized_name, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Exact lookup against canonical names and aliases, both normalized.
    pub fn find_entity_by_normalized(&self, normalized: &str) -> Result<Option<WatchlistEntity>> {
        let conn = self.conn();
        let entity_id: Option<String> = conn
            .query_row(
                "SELECT entity_id FROM entities WHERE normalized_name = ?1
                 UNION
                 SELECT entity_id FROM entity_aliases WHERE normalized_name = ?1
                 LIMIT 1",
                params![normalized],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(ignore_no_rows)?;

        match entity_id {
            Some(id) => Ok(Some(load_entity(&conn, &id)?)),
            None => Ok(None),
        }
    }

    pub fn get_entity(&self, entity_id: &str) -> Result<Option<WatchlistEntity>> {
        let conn = self.conn();
        let exists: Option<String> = conn
            .query_row(
                "SELECT entity_id FROM entities WHERE entity_id = ?1",
                params![entity_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(ignore_no_rows)?;
        match exists {
            Some(id) => Ok(Some(load_entity(&conn, &id)?)),
            None => Ok(None),
        }
    }

    /// Every entity with its aliases loaded, for the fuzzy matcher.
    pub fn all_entities(&self) -> Result<Vec<WatchlistEntity>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT entity_id FROM entities ORDER BY first_seen")?;
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);

        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            entities.push(load_entity(&conn, &id)?);
        }
        Ok(entities)
    }

    // ========================================================================
    // UPSERTS
    // ========================================================================

    /// Insert-or-update one loan row by its natural key. value_ratio and the
    /// distress flag are recomputed here from fair_value/cost_basis - the
    /// values on the incoming record are never trusted.
    pub fn upsert_loan(&self, record: &LoanRecord) -> Result<UpsertOutcome> {
        let ratio = value_ratio(record.fair_value, record.cost_basis).ok_or_else(|| {
            IngestError::validation(format!(
                "loan {} has unusable cost_basis {}",
                record.natural_key(),
                record.cost_basis
            ))
        })?;
        let flagged = is_distressed(ratio, self.distress_threshold);
        let now = Utc::now().to_rfc3339();

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM loans
                 WHERE issuer_entity_id = ?1 AND loan_id = ?2 AND filing_period = ?3",
                params![record.issuer_entity_id, record.loan_id, record.filing_period],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(ignore_no_rows)?;

        let outcome = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE loans
                     SET fair_value = ?1, cost_basis = ?2, value_ratio = ?3, flagged = ?4,
                         filing_date = ?5, source_document_ref = ?6, last_updated_at = ?7
                     WHERE id = ?8",
                    params![
                        record.fair_value,
                        record.cost_basis,
                        ratio,
                        flagged as i64,
                        record.filing_date.to_string(),
                        record.source_document_ref,
                        now,
                        id,
                    ],
                )?;
                UpsertOutcome::Updated
            }
            None => {
                tx.execute(
                    "INSERT INTO loans (
                        issuer_entity_id, loan_id, filing_period, fair_value, cost_basis,
                        value_ratio, flagged, filing_date, source_document_ref,
                        first_ingested_at, last_updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                    params![
                        record.issuer_entity_id,
                        record.loan_id,
                        record.filing_period,
                        record.fair_value,
                        record.cost_basis,
                        ratio,
                        flagged as i64,
                        record.filing_date.to_string(),
                        record.source_document_ref,
                        now,
                    ],
                )?;
                UpsertOutcome::Inserted
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// Insert-or-update one layoff row. Enforces the reporting floor:
    /// records below it are rejected, not stored.
    pub fn upsert_layoff(&self, record: &LayoffRecord) -> Result<UpsertOutcome> {
        if record.employee_count < self.employee_floor {
            return Err(IngestError::validation(format!(
                "layoff {} below reporting floor ({} < {})",
                record.natural_key(),
                record.employee_count,
                self.employee_floor
            )));
        }
        let now = Utc::now().to_rfc3339();

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM layoffs
                 WHERE entity_id = ?1 AND state = ?2 AND notice_date = ?3 AND facility = ?4",
                params![
                    record.entity_id,
                    record.state,
                    record.notice_date.to_string(),
                    record.facility,
                ],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(ignore_no_rows)?;

        let outcome = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE layoffs
                     SET employee_count = ?1, effective_date = ?2, sector = ?3, last_updated_at = ?4
                     WHERE id = ?5",
                    params![
                        record.employee_count,
                        record.effective_date.map(|d| d.to_string()),
                        record.sector,
                        now,
                        id,
                    ],
                )?;
                UpsertOutcome::Updated
            }
            None => {
                tx.execute(
                    "INSERT INTO layoffs (
                        entity_id, state, notice_date, facility, employee_count,
                        effective_date, sector, source_jurisdiction,
                        first_ingested_at, last_updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                    params![
                        record.entity_id,
                        record.state,
                        record.notice_date.to_string(),
                        record.facility,
                        record.employee_count,
                        record.effective_date.map(|d| d.to_string()),
                        record.sector,
                        record.source_jurisdiction,
                        now,
                    ],
                )?;
                UpsertOutcome::Inserted
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// Insert-or-update one case by case number. A case number binds to one
    /// entity forever: re-ingest under a different entity leaves the row
    /// untouched, records a manual-review conflict, and returns
    /// `IngestError::Conflict`.
    pub fn upsert_litigation(&self, record: &LitigationRecord) -> Result<UpsertOutcome> {
        let now = Utc::now().to_rfc3339();

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let existing_entity: Option<String> = tx
            .query_row(
                "SELECT entity_id FROM litigation WHERE case_number = ?1",
                params![record.case_number],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(ignore_no_rows)?;

        let outcome = match existing_entity {
            Some(ref bound) if bound != &record.entity_id => {
                let detail = format!(
                    "case {} already bound to entity {}, re-ingested for entity {}",
                    record.case_number, bound, record.entity_id
                );
                tx.execute(
                    "INSERT INTO conflicts (kind, record_key, detail, recorded_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        ConflictKind::CaseEntityMismatch.as_str(),
                        record.case_number,
                        detail,
                        now,
                    ],
                )?;
                tx.commit()?;
                return Err(IngestError::Conflict {
                    key: record.case_number.clone(),
                    detail,
                });
            }
            Some(_) => {
                tx.execute(
                    "UPDATE litigation
                     SET case_type = ?1, filed_date = ?2, court = ?3, status = ?4,
                         last_updated_at = ?5
                     WHERE case_number = ?6",
                    params![
                        record.case_type.as_str(),
                        record.filed_date.map(|d| d.to_string()),
                        record.court,
                        record.status.as_str(),
                        now,
                        record.case_number,
                    ],
                )?;
                UpsertOutcome::Updated
            }
            None => {
                tx.execute(
                    "INSERT INTO litigation (
                        case_number, entity_id, case_type, filed_date, court, status,
                        first_ingested_at, last_updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                    params![
                        record.case_number,
                        record.entity_id,
                        record.case_type.as_str(),
                        record.filed_date.map(|d| d.to_string()),
                        record.court,
                        record.status.as_str(),
                        now,
                    ],
                )?;
                UpsertOutcome::Inserted
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    // ========================================================================
    // CONFLICTS
    // ========================================================================

    pub fn record_conflict(&self, kind: ConflictKind, record_key: &str, detail: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO conflicts (kind, record_key, detail, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![kind.as_str(), record_key, detail, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn pending_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT kind, record_key, detail, recorded_at FROM conflicts ORDER BY recorded_at",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let kind_str: String = row.get(0)?;
                let recorded: String = row.get(3)?;
                Ok(ConflictRecord {
                    kind: ConflictKind::parse(&kind_str).unwrap_or(ConflictKind::AmbiguousMatch),
                    record_key: row.get(1)?,
                    detail: row.get(2)?,
                    recorded_at: parse_timestamp(&recorded, 3)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    // ========================================================================
    // SCORES
    // ========================================================================

    /// Write one score row. Re-running the same as-of date replaces the row
    /// for that date; other dates stay as a time series.
    pub fn insert_score(&self, score: &DistressScore) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO scores (
                entity_id, as_of_date, loan_component, labor_component,
                litigation_component, composite_score, computed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(entity_id, as_of_date) DO UPDATE SET
                loan_component = excluded.loan_component,
                labor_component = excluded.labor_component,
                litigation_component = excluded.litigation_component,
                composite_score = excluded.composite_score,
                computed_at = excluded.computed_at",
            params![
                score.entity_id,
                score.as_of_date.to_string(),
                score.loan_component,
                score.labor_component,
                score.litigation_component,
                score.composite_score,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Latest score row per entity.
    pub fn current_scores(&self) -> Result<Vec<DistressScore>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.entity_id, s.as_of_date, s.loan_component, s.labor_component,
                    s.litigation_component, s.composite_score
             FROM scores s
             JOIN (SELECT entity_id, MAX(as_of_date) AS latest FROM scores GROUP BY entity_id) t
               ON s.entity_id = t.entity_id AND s.as_of_date = t.latest
             ORDER BY s.composite_score DESC",
        )?;
        let rows = stmt
            .query_map([], score_from_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    /// Entities whose current composite score is at or above a threshold.
    pub fn entities_above(&self, threshold: f64) -> Result<Vec<DistressScore>> {
        Ok(self
            .current_scores()?
            .into_iter()
            .filter(|s| s.composite_score >= threshold)
            .collect())
    }

    /// Full score time series for one entity, oldest first.
    pub fn score_history(&self, entity_id: &str) -> Result<Vec<DistressScore>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT entity_id, as_of_date, loan_component, labor_component,
                    litigation_component, composite_score
             FROM scores WHERE entity_id = ?1 ORDER BY as_of_date",
        )?;
        let rows = stmt
            .query_map(params![entity_id], score_from_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    // ========================================================================
    // AGGREGATOR READS
    // ========================================================================

    /// Every entity id with at least one observational record.
    pub fn entity_ids_with_records(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT issuer_entity_id FROM loans
             UNION
             SELECT entity_id FROM layoffs
             UNION
             SELECT entity_id FROM litigation
             ORDER BY 1",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(ids)
    }

    pub fn min_recent_value_ratio(&self, entity_id: &str, since: NaiveDate) -> Result<Option<f64>> {
        let conn = self.conn();
        let min: Option<f64> = conn.query_row(
            "SELECT MIN(value_ratio) FROM loans
             WHERE issuer_entity_id = ?1 AND filing_date >= ?2",
            params![entity_id, since.to_string()],
            |row| row.get(0),
        )?;
        Ok(min)
    }

    pub fn recent_layoff_total(&self, entity_id: &str, since: NaiveDate) -> Result<u32> {
        let conn = self.conn();
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(employee_count), 0) FROM layoffs
             WHERE entity_id = ?1 AND notice_date >= ?2",
            params![entity_id, since.to_string()],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u32)
    }

    pub fn open_cases(&self, entity_id: &str) -> Result<Vec<CaseType>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT case_type FROM litigation WHERE entity_id = ?1 AND status = ?2")?;
        let rows = stmt
            .query_map(params![entity_id, CaseStatus::Open.as_str()], |row| {
                let raw: String = row.get(0)?;
                Ok(CaseType::parse(&raw))
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    // ========================================================================
    // READ CONTRACTS (dashboard / digest collaborators)
    // ========================================================================

    pub fn records_touched_since(&self, since: DateTime<Utc>) -> Result<TouchedCounts> {
        let conn = self.conn();
        let cutoff = since.to_rfc3339();
        let count = |table: &str| -> rusqlite::Result<i64> {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE last_updated_at >= ?1"),
                params![cutoff],
                |row| row.get(0),
            )
        };
        Ok(TouchedCounts {
            loans: count("loans")?,
            layoffs: count("layoffs")?,
            cases: count("litigation")?,
        })
    }

    pub fn layoffs_by_state(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT state, SUM(employee_count) AS total FROM layoffs
             GROUP BY state ORDER BY total DESC",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    pub fn distressed_loan_count(&self) -> Result<i64> {
        let conn = self.conn();
        let count = conn.query_row("SELECT COUNT(*) FROM loans WHERE flagged = 1", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    /// value_ratio trend for one loan across filing periods - a plain range
    /// scan, since period rows are append-only.
    pub fn value_ratio_trend(&self, entity_id: &str, loan_id: &str) -> Result<Vec<(String, f64)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT filing_period, value_ratio FROM loans
             WHERE issuer_entity_id = ?1 AND loan_id = ?2
             ORDER BY filing_period",
        )?;
        let rows = stmt
            .query_map(params![entity_id, loan_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    // ========================================================================
    // HEALTH READS
    // ========================================================================

    pub fn table_counts(&self) -> Result<TableCounts> {
        let conn = self.conn();
        let count = |table: &str| -> rusqlite::Result<i64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        };
        Ok(TableCounts {
            entities: count("entities")?,
            loans: count("loans")?,
            layoffs: count("layoffs")?,
            litigation: count("litigation")?,
            scores: count("scores")?,
            conflicts: count("conflicts")?,
        })
    }

    pub fn loan_date_bounds(&self) -> Result<Option<(NaiveDate, NaiveDate)>> {
        self.date_bounds("SELECT MIN(filing_date), MAX(filing_date) FROM loans")
    }

    pub fn layoff_date_bounds(&self) -> Result<Option<(NaiveDate, NaiveDate)>> {
        self.date_bounds("SELECT MIN(notice_date), MAX(notice_date) FROM layoffs")
    }

    pub fn litigation_date_bounds(&self) -> Result<Option<(NaiveDate, NaiveDate)>> {
        self.date_bounds(
            "SELECT MIN(filed_date), MAX(filed_date) FROM litigation WHERE filed_date IS NOT NULL",
        )
    }

    fn date_bounds(&self, sql: &str) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let conn = self.conn();
        let bounds: (Option<String>, Option<String>) =
            conn.query_row(sql, [], |row| Ok((row.get(0)?, row.get(1)?)))?;
        match bounds {
            (Some(min), Some(max)) => {
                let min = NaiveDate::parse_from_str(&min, "%Y-%m-%d")
                    .map_err(|e| IngestError::parse(format!("bad stored date {min}: {e}")))?;
                let max = NaiveDate::parse_from_str(&max, "%Y-%m-%d")
                    .map_err(|e| IngestError::parse(format!("bad stored date {max}: {e}")))?;
                Ok(Some((min, max)))
            }
            _ => Ok(None),
        }
    }

    /// Loans whose stored ratio disagrees with fair_value / cost_basis.
    /// Should always be zero; the ratio is recomputed on every ingest.
    pub fn ratio_mismatch_count(&self, epsilon: f64) -> Result<i64> {
        let conn = self.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM loans
             WHERE cost_basis > 0 AND ABS(value_ratio - fair_value / cost_basis) > ?1",
            params![epsilon],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Natural-key groups holding more than one row. The UNIQUE constraints
    /// make this structurally zero; a nonzero count means the schema was
    /// tampered with or a migration went wrong.
    pub fn natural_key_duplicate_count(&self) -> Result<i64> {
        let conn = self.conn();
        let dup_groups = |sql: &str| -> rusqlite::Result<i64> {
            conn.query_row(sql, [], |row| row.get(0))
        };
        let loans = dup_groups(
            "SELECT COUNT(*) FROM (
                SELECT 1 FROM loans
                GROUP BY issuer_entity_id, loan_id, filing_period
                HAVING COUNT(*) > 1
             )",
        )?;
        let layoffs = dup_groups(
            "SELECT COUNT(*) FROM (
                SELECT 1 FROM layoffs
                GROUP BY entity_id, state, notice_date, facility
                HAVING COUNT(*) > 1
             )",
        )?;
        let cases = dup_groups(
            "SELECT COUNT(*) FROM (
                SELECT 1 FROM litigation GROUP BY case_number HAVING COUNT(*) > 1
             )",
        )?;
        Ok(loans + layoffs + cases)
    }

    /// Entities with empty or placeholder names.
    pub fn junk_name_count(&self) -> Result<i64> {
        let conn = self.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM entities
             WHERE TRIM(canonical_name) = '' OR LOWER(canonical_name) IN ('nan', 'none', 'n/a')",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

fn setup_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS entities (
            entity_id TEXT PRIMARY KEY,
            canonical_name TEXT NOT NULL,
            normalized_name TEXT UNIQUE NOT NULL,
            sector TEXT,
            first_seen TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entity_aliases (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL REFERENCES entities(entity_id),
            raw_name TEXT NOT NULL,
            normalized_name TEXT NOT NULL,
            added_at TEXT NOT NULL,
            UNIQUE(entity_id, normalized_name)
        );

        CREATE TABLE IF NOT EXISTS loans (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            issuer_entity_id TEXT NOT NULL,
            loan_id TEXT NOT NULL,
            filing_period TEXT NOT NULL,
            fair_value REAL NOT NULL,
            cost_basis REAL NOT NULL,
            value_ratio REAL NOT NULL,
            flagged INTEGER NOT NULL,
            filing_date TEXT NOT NULL,
            source_document_ref TEXT NOT NULL,
            first_ingested_at TEXT NOT NULL,
            last_updated_at TEXT NOT NULL,
            UNIQUE(issuer_entity_id, loan_id, filing_period)
        );

        CREATE TABLE IF NOT EXISTS layoffs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            state TEXT NOT NULL,
            notice_date TEXT NOT NULL,
            facility TEXT NOT NULL,
            employee_count INTEGER NOT NULL,
            effective_date TEXT,
            sector TEXT,
            source_jurisdiction TEXT NOT NULL,
            first_ingested_at TEXT NOT NULL,
            last_updated_at TEXT NOT NULL,
            UNIQUE(entity_id, state, notice_date, facility)
        );

        CREATE TABLE IF NOT EXISTS litigation (
            case_number TEXT PRIMARY KEY,
            entity_id TEXT NOT NULL,
            case_type TEXT NOT NULL,
            filed_date TEXT,
            court TEXT NOT NULL,
            status TEXT NOT NULL,
            first_ingested_at TEXT NOT NULL,
            last_updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS scores (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            as_of_date TEXT NOT NULL,
            loan_component REAL NOT NULL,
            labor_component REAL NOT NULL,
            litigation_component REAL NOT NULL,
            composite_score REAL NOT NULL,
            computed_at TEXT NOT NULL,
            UNIQUE(entity_id, as_of_date)
        );

        CREATE TABLE IF NOT EXISTS conflicts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            record_key TEXT NOT NULL,
            detail TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_aliases_normalized ON entity_aliases(normalized_name);
        CREATE INDEX IF NOT EXISTS idx_loans_entity ON loans(issuer_entity_id, filing_date);
        CREATE INDEX IF NOT EXISTS idx_layoffs_entity ON layoffs(entity_id, notice_date);
        CREATE INDEX IF NOT EXISTS idx_litigation_entity ON litigation(entity_id, status);
        CREATE INDEX IF NOT EXISTS idx_scores_entity ON scores(entity_id, as_of_date);",
    )
}

// ============================================================================
// ROW HELPERS
// ============================================================================

fn ignore_no_rows<T>(err: rusqlite::Error) -> rusqlite::Result<Option<T>> {
    match err {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}

fn load_entity(conn: &Connection, entity_id: &str) -> rusqlite::Result<WatchlistEntity> {
    let (canonical_name, normalized_name, sector, first_seen): (
        String,
        String,
        Option<String>,
        String,
    ) = conn.query_row(
        "SELECT canonical_name, normalized_name, sector, first_seen
         FROM entities WHERE entity_id = ?1",
        params![entity_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )?;

    let mut stmt =
        conn.prepare("SELECT raw_name FROM entity_aliases WHERE entity_id = ?1 ORDER BY added_at")?;
    let aliases: Vec<String> = stmt
        .query_map(params![entity_id], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    Ok(WatchlistEntity {
        entity_id: entity_id.to_string(),
        canonical_name,
        normalized_name,
        aliases,
        sector,
        first_seen: parse_timestamp(&first_seen, 3)?,
    })
}

fn parse_timestamp(raw: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn score_from_row(row: &Row<'_>) -> rusqlite::Result<DistressScore> {
    let as_of: String = row.get(1)?;
    Ok(DistressScore {
        entity_id: row.get(0)?,
        as_of_date: NaiveDate::parse_from_str(&as_of, "%Y-%m-%d").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?,
        loan_component: row.get(2)?,
        labor_component: row.get(3)?,
        litigation_component: row.get(4)?,
        composite_score: row.get(5)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CaseStatus, CaseType};

    fn test_store() -> Store {
        Store::open_in_memory(&Config::default()).unwrap()
    }

    fn seed_entity(store: &Store, name: &str) -> String {
        let entity = WatchlistEntity::new(name, &name.to_lowercase(), None);
        let id = entity.entity_id.clone();
        store.insert_entity(&entity).unwrap();
        id
    }

    fn loan(entity_id: &str, loan_id: &str, period: &str, fair: f64, cost: f64) -> LoanRecord {
        LoanRecord::build(
            entity_id,
            loan_id,
            period,
            fair,
            cost,
            NaiveDate::from_ymd_opt(2025, 2, 15).unwrap(),
            "doc-digest",
            0.85,
        )
        .unwrap()
    }

    #[test]
    fn loan_upsert_is_idempotent() {
        let store = test_store();
        let entity = seed_entity(&store, "Orion Credit");
        let rec = loan(&entity, "L-100", "2024-Q4", 70.0, 100.0);

        assert_eq!(store.upsert_loan(&rec).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert_loan(&rec).unwrap(), UpsertOutcome::Updated);

        let counts = store.table_counts().unwrap();
        assert_eq!(counts.loans, 1);
        let trend = store.value_ratio_trend(&entity, "L-100").unwrap();
        assert_eq!(trend.len(), 1);
        assert!((trend[0].1 - 0.70).abs() < 1e-9);
    }

    #[test]
    fn loan_reingest_updates_ratio_and_flag() {
        // fair 70/100 -> flagged; re-ingest fair 95 -> unflagged,
        // still one row for the natural key.
        let store = test_store();
        let entity = seed_entity(&store, "Orion Credit");

        store
            .upsert_loan(&loan(&entity, "L-100", "2024-Q4", 70.0, 100.0))
            .unwrap();
        assert_eq!(store.distressed_loan_count().unwrap(), 1);

        store
            .upsert_loan(&loan(&entity, "L-100", "2024-Q4", 95.0, 100.0))
            .unwrap();
        assert_eq!(store.table_counts().unwrap().loans, 1);
        assert_eq!(store.distressed_loan_count().unwrap(), 0);
        let trend = store.value_ratio_trend(&entity, "L-100").unwrap();
        assert!((trend[0].1 - 0.95).abs() < 1e-9);
    }

    #[test]
    fn loan_periods_are_distinct_rows() {
        let store = test_store();
        let entity = seed_entity(&store, "Orion Credit");
        store
            .upsert_loan(&loan(&entity, "L-100", "2024-Q3", 90.0, 100.0))
            .unwrap();
        store
            .upsert_loan(&loan(&entity, "L-100", "2024-Q4", 70.0, 100.0))
            .unwrap();

        let trend = store.value_ratio_trend(&entity, "L-100").unwrap();
        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0].0, "2024-Q3");
        assert_eq!(trend[1].0, "2024-Q4");
    }

    #[test]
    fn loan_ratio_never_trusted_from_input() {
        let store = test_store();
        let entity = seed_entity(&store, "Orion Credit");
        let mut rec = loan(&entity, "L-100", "2024-Q4", 70.0, 100.0);
        // Tamper with the computed fields; the store must recompute both.
        rec.value_ratio = 1.5;
        rec.flagged = false;
        store.upsert_loan(&rec).unwrap();

        let trend = store.value_ratio_trend(&entity, "L-100").unwrap();
        assert!((trend[0].1 - 0.70).abs() < 1e-9);
        assert_eq!(store.distressed_loan_count().unwrap(), 1);
        assert_eq!(store.ratio_mismatch_count(1e-9).unwrap(), 0);
    }

    #[test]
    fn layoff_floor_rejects_small_notices() {
        let store = test_store();
        let entity = seed_entity(&store, "Tech Layoff Inc");
        let rec = LayoffRecord {
            entity_id: entity.clone(),
            state: "CA".into(),
            notice_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            facility: "Fremont plant".into(),
            employee_count: 10,
            effective_date: None,
            sector: None,
            source_jurisdiction: "CA".into(),
        };
        let err = store.upsert_layoff(&rec).unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
        assert_eq!(store.table_counts().unwrap().layoffs, 0);
    }

    #[test]
    fn cross_jurisdiction_layoffs_collapse() {
        let store = test_store();
        let entity = seed_entity(&store, "Midwest Logistics Partners");
        let base = LayoffRecord {
            entity_id: entity.clone(),
            state: "OH".into(),
            notice_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            facility: "Columbus DC".into(),
            employee_count: 210,
            effective_date: None,
            sector: Some("Logistics".into()),
            source_jurisdiction: "OH".into(),
        };
        let mut federal = base.clone();
        federal.source_jurisdiction = "US-DOL".into();

        assert_eq!(store.upsert_layoff(&base).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert_layoff(&federal).unwrap(), UpsertOutcome::Updated);
        assert_eq!(store.table_counts().unwrap().layoffs, 1);
    }

    #[test]
    fn case_number_binds_to_one_entity() {
        let store = test_store();
        let orion = seed_entity(&store, "Orion Credit");
        let acme = seed_entity(&store, "Acme Capital");

        let rec = LitigationRecord {
            case_number: "1:24-cv-100".into(),
            entity_id: orion.clone(),
            case_type: CaseType::BreachOfContract,
            filed_date: NaiveDate::from_ymd_opt(2024, 11, 3),
            court: "SDNY".into(),
            status: CaseStatus::Open,
        };
        store.upsert_litigation(&rec).unwrap();

        let mut reassigned = rec.clone();
        reassigned.entity_id = acme;
        let err = store.upsert_litigation(&reassigned).unwrap_err();
        assert!(matches!(err, IngestError::Conflict { .. }));

        // Original row untouched, conflict queued for review.
        let open = store.open_cases(&orion).unwrap();
        assert_eq!(open, vec![CaseType::BreachOfContract]);
        let conflicts = store.pending_conflicts().unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::CaseEntityMismatch);
    }

    #[test]
    fn case_status_updates_in_place() {
        let store = test_store();
        let entity = seed_entity(&store, "Orion Credit");
        let mut rec = LitigationRecord {
            case_number: "1:24-cv-100".into(),
            entity_id: entity.clone(),
            case_type: CaseType::Receivership,
            filed_date: NaiveDate::from_ymd_opt(2024, 11, 3),
            court: "DE Chancery".into(),
            status: CaseStatus::Open,
        };
        store.upsert_litigation(&rec).unwrap();
        assert_eq!(store.open_cases(&entity).unwrap().len(), 1);

        rec.status = CaseStatus::Dismissed;
        assert_eq!(
            store.upsert_litigation(&rec).unwrap(),
            UpsertOutcome::Updated
        );
        assert!(store.open_cases(&entity).unwrap().is_empty());
        assert_eq!(store.table_counts().unwrap().litigation, 1);
    }

    #[test]
    fn score_rerun_replaces_same_as_of_only() {
        let store = test_store();
        let entity = seed_entity(&store, "Orion Credit");
        let day1 = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2025, 3, 2).unwrap();

        let mut score = DistressScore {
            entity_id: entity.clone(),
            as_of_date: day1,
            loan_component: 40.0,
            labor_component: 10.0,
            litigation_component: 25.0,
            composite_score: 28.75,
        };
        store.insert_score(&score).unwrap();
        score.as_of_date = day2;
        score.composite_score = 30.0;
        store.insert_score(&score).unwrap();
        // Re-run day2.
        store.insert_score(&score).unwrap();

        let history = store.score_history(&entity).unwrap();
        assert_eq!(history.len(), 2);
        let current = store.current_scores().unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].as_of_date, day2);
    }

    #[test]
    fn alias_lookup_and_idempotent_add() {
        let store = test_store();
        let entity = seed_entity(&store, "Acme Capital");
        store
            .add_alias(&entity, "ACME CAPITAL, LLC", "acme capital")
            .unwrap();
        store
            .add_alias(&entity, "ACME CAPITAL, LLC", "acme capital")
            .unwrap();

        let found = store
            .find_entity_by_normalized("acme capital")
            .unwrap()
            .unwrap();
        assert_eq!(found.entity_id, entity);
        assert_eq!(found.aliases.len(), 1);
    }

    #[test]
    fn store_survives_a_panic_while_locked() {
        use std::panic::{catch_unwind, AssertUnwindSafe};

        let store = test_store();
        let entity = seed_entity(&store, "Orion Credit");

        let result = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store.conn();
            panic!("extractor thread died mid-write");
        }));
        assert!(result.is_err());

        // The poisoned lock is recovered; other sources can still write.
        store
            .upsert_loan(&loan(&entity, "L-100", "2024-Q4", 70.0, 100.0))
            .unwrap();
        assert_eq!(store.table_counts().unwrap().loans, 1);
    }

    #[test]
    fn touched_since_counts_recent_writes() {
        let store = test_store();
        let entity = seed_entity(&store, "Orion Credit");
        let before = Utc::now() - chrono::Duration::seconds(5);
        store
            .upsert_loan(&loan(&entity, "L-100", "2024-Q4", 70.0, 100.0))
            .unwrap();

        let touched = store.records_touched_since(before).unwrap();
        assert_eq!(touched.loans, 1);
        let later = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(store.records_touched_since(later).unwrap().loans, 0);
    }
}
