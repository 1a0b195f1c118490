// Entity Resolver - one stable identity per company across all sources
//
// Resolution ladder: normalize, exact lookup (canonical name or alias),
// fuzzy match, create. The fuzzy step is a pure scoring function over
// normalized strings returning a ranked candidate list; the surrounding
// logic is a plain threshold decision. Aliases are additive and persisted
// immediately, so concurrent extractors observe each other's entities.
//
// Ambiguity is handled conservatively: when more than one existing entity
// clears the confidence threshold, nothing is merged. The name gets a fresh
// entity and a manual-review conflict so a human can merge later - merging
// records is recoverable, un-merging silently fused companies is not.

use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::db::Store;
use crate::error::{IngestError, Result};
use crate::model::{ConflictKind, SourceKind, WatchlistEntity};

// ============================================================================
// RESOLUTION RESULT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Exact hit on a canonical name or known alias.
    Matched,

    /// Confident fuzzy hit; the raw form was added as a new alias.
    AliasAdded,

    /// No plausible existing entity; a new one was created.
    Created,

    /// Multiple entities cleared the threshold. A new entity was created
    /// and the ambiguity queued for manual review.
    NeedsReview,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub entity_id: String,
    pub outcome: ResolutionOutcome,
}

/// One fuzzy-match candidate from the pure scorer.
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub entity_id: String,
    pub matched_name: String,
    pub confidence: f64,
}

// ============================================================================
// NAME NORMALIZATION
// ============================================================================

/// Legal suffixes stripped from the tail of every name.
const LEGAL_SUFFIXES: &[&str] = &[
    "llc", "inc", "corp", "corporation", "incorporated", "lp", "llp", "ltd", "limited", "co",
    "company", "holdings", "plc",
];

/// Extra tail tokens per source: court filings append debtor language,
/// filings and notices generally do not.
fn hint_suffixes(hint: SourceKind) -> &'static [&'static str] {
    match hint {
        SourceKind::Litigation => &["debtor", "debtors", "et", "al"],
        SourceKind::Filings | SourceKind::Notices => &[],
    }
}

/// Case-fold, replace punctuation with spaces, collapse whitespace, then
/// strip legal suffixes off the tail (repeatedly, so "Holdings LLC" goes too).
pub fn normalize_name(raw: &str, hint: SourceKind) -> String {
    let lowered = raw.to_lowercase();
    let mut tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    let extra = hint_suffixes(hint);
    while let Some(last) = tokens.last() {
        if tokens.len() > 1 && (LEGAL_SUFFIXES.contains(last) || extra.contains(last)) {
            tokens.pop();
        } else {
            break;
        }
    }

    tokens.join(" ")
}

// ============================================================================
// FUZZY SCORING (pure)
// ============================================================================

/// Score a normalized name against every known entity, best alias wins.
/// Returns candidates sorted by confidence, highest first. Deterministic
/// and side-effect free so the threshold logic stays independently testable.
pub fn score_candidates(normalized: &str, entities: &[WatchlistEntity]) -> Vec<MatchCandidate> {
    let mut candidates: Vec<MatchCandidate> = entities
        .iter()
        .map(|entity| {
            let mut best = strsim::jaro_winkler(normalized, &entity.normalized_name);
            let mut matched = entity.normalized_name.clone();
            for alias in &entity.aliases {
                let alias_norm = normalize_name(alias, SourceKind::Filings);
                let score = strsim::jaro_winkler(normalized, &alias_norm);
                if score > best {
                    best = score;
                    matched = alias_norm;
                }
            }
            MatchCandidate {
                entity_id: entity.entity_id.clone(),
                matched_name: matched,
                confidence: best,
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    candidates
}

// ============================================================================
// RESOLVER
// ============================================================================

pub struct Resolver<'a> {
    store: &'a Store,
    confidence_threshold: f64,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a Store, config: &ResolverConfig) -> Self {
        Resolver {
            store,
            confidence_threshold: config.fuzzy_confidence_threshold,
        }
    }

    /// Resolve a free-text company name to a stable entity id. Resolving
    /// the same raw string twice yields the same id: the first call leaves
    /// an exact-matchable canonical name or alias behind.
    pub fn resolve(
        &self,
        raw_name: &str,
        hint: SourceKind,
        sector: Option<&str>,
    ) -> Result<Resolution> {
        let normalized = normalize_name(raw_name, hint);
        if normalized.is_empty() {
            return Err(IngestError::validation(format!(
                "company name {raw_name:?} is empty after normalization"
            )));
        }

        // 1. Exact match against canonical names and aliases.
        if let Some(entity) = self.store.find_entity_by_normalized(&normalized)? {
            self.store
                .add_alias(&entity.entity_id, raw_name, &normalized)?;
            debug!(entity_id = %entity.entity_id, name = raw_name, "exact entity match");
            return Ok(Resolution {
                entity_id: entity.entity_id,
                outcome: ResolutionOutcome::Matched,
            });
        }

        // 2. Fuzzy match.
        let entities = self.store.all_entities()?;
        let candidates = score_candidates(&normalized, &entities);
        let passing: Vec<&MatchCandidate> = candidates
            .iter()
            .take_while(|c| c.confidence >= self.confidence_threshold)
            .collect();

        match passing.len() {
            1 => {
                let hit = passing[0];
                self.store.add_alias(&hit.entity_id, raw_name, &normalized)?;
                info!(
                    entity_id = %hit.entity_id,
                    name = raw_name,
                    confidence = hit.confidence,
                    "fuzzy entity match, alias added"
                );
                Ok(Resolution {
                    entity_id: hit.entity_id.clone(),
                    outcome: ResolutionOutcome::AliasAdded,
                })
            }
            0 => {
                let entity_id = self.create_entity(raw_name, &normalized, sector)?;
                info!(entity_id = %entity_id, name = raw_name, "new watchlist entity");
                Ok(Resolution {
                    entity_id,
                    outcome: ResolutionOutcome::Created,
                })
            }
            _ => {
                // Multiple plausible matches: never merge on a guess.
                let detail = passing
                    .iter()
                    .map(|c| format!("{} ({:.3})", c.entity_id, c.confidence))
                    .collect::<Vec<_>>()
                    .join(", ");
                let entity_id = self.create_entity(raw_name, &normalized, sector)?;
                self.store.record_conflict(
                    ConflictKind::AmbiguousMatch,
                    raw_name,
                    &format!("candidates above threshold: {detail}"),
                )?;
                warn!(
                    name = raw_name,
                    candidates = %detail,
                    "ambiguous fuzzy match, queued for manual review"
                );
                Ok(Resolution {
                    entity_id,
                    outcome: ResolutionOutcome::NeedsReview,
                })
            }
        }
    }

    /// Insert a new entity for a normalized name. Extractors run
    /// concurrently, so another thread may mint the same normalized name
    /// between our lookup and insert; on that unique-constraint collision,
    /// adopt the winner's entity instead.
    fn create_entity(
        &self,
        raw_name: &str,
        normalized: &str,
        sector: Option<&str>,
    ) -> Result<String> {
        let entity = WatchlistEntity::new(raw_name, normalized, sector.map(str::to_string));
        match self.store.insert_entity(&entity) {
            Ok(()) => Ok(entity.entity_id),
            Err(IngestError::Storage(e)) if is_constraint_violation(&e) => {
                let existing = self.store.find_entity_by_normalized(normalized)?.ok_or(
                    IngestError::Storage(e),
                )?;
                debug!(
                    entity_id = %existing.entity_id,
                    name = raw_name,
                    "lost entity creation race, adopting existing"
                );
                Ok(existing.entity_id)
            }
            Err(e) => Err(e),
        }
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_setup() -> (Store, Config) {
        let config = Config::default();
        let store = Store::open_in_memory(&config).unwrap();
        (store, config)
    }

    #[test]
    fn normalization_strips_suffixes_and_punctuation() {
        assert_eq!(
            normalize_name("ACME CAPITAL, LLC", SourceKind::Filings),
            "acme capital"
        );
        assert_eq!(
            normalize_name("Acme Capital LLC", SourceKind::Notices),
            "acme capital"
        );
        assert_eq!(
            normalize_name("  acme   capital ", SourceKind::Filings),
            "acme capital"
        );
        assert_eq!(
            normalize_name("Orion Credit Holdings LLC", SourceKind::Filings),
            "orion credit"
        );
        assert_eq!(
            normalize_name("Orion Credit, Debtor", SourceKind::Litigation),
            "orion credit"
        );
        // A bare suffix word is a name, not a suffix.
        assert_eq!(normalize_name("LLC", SourceKind::Filings), "llc");
    }

    #[test]
    fn same_company_three_spellings_one_entity() {
        let (store, config) = test_setup();
        let resolver = Resolver::new(&store, &config.resolver);

        let first = resolver
            .resolve("Acme Capital LLC", SourceKind::Filings, None)
            .unwrap();
        assert_eq!(first.outcome, ResolutionOutcome::Created);

        let second = resolver
            .resolve("ACME CAPITAL, LLC", SourceKind::Notices, None)
            .unwrap();
        let third = resolver
            .resolve("acme capital", SourceKind::Litigation, None)
            .unwrap();

        assert_eq!(second.entity_id, first.entity_id);
        assert_eq!(third.entity_id, first.entity_id);
        assert_eq!(store.table_counts().unwrap().entities, 1);
    }

    #[test]
    fn resolve_is_idempotent() {
        let (store, config) = test_setup();
        let resolver = Resolver::new(&store, &config.resolver);

        let a = resolver
            .resolve("Orion Credit", SourceKind::Filings, None)
            .unwrap();
        let b = resolver
            .resolve("Orion Credit", SourceKind::Filings, None)
            .unwrap();
        assert_eq!(a.entity_id, b.entity_id);
        assert_eq!(b.outcome, ResolutionOutcome::Matched);
    }

    #[test]
    fn fuzzy_match_adds_alias() {
        let (store, config) = test_setup();
        let resolver = Resolver::new(&store, &config.resolver);

        let first = resolver
            .resolve("Continental Manufacturing Inc", SourceKind::Filings, None)
            .unwrap();
        // Minor typo, well above the default confidence threshold.
        let second = resolver
            .resolve("Continental Manufactring Inc", SourceKind::Notices, None)
            .unwrap();

        assert_eq!(second.entity_id, first.entity_id);
        assert_eq!(second.outcome, ResolutionOutcome::AliasAdded);

        let entity = store.get_entity(&first.entity_id).unwrap().unwrap();
        assert!(entity
            .aliases
            .iter()
            .any(|a| a == "Continental Manufactring Inc"));
    }

    #[test]
    fn distinct_names_get_distinct_entities() {
        let (store, config) = test_setup();
        let resolver = Resolver::new(&store, &config.resolver);

        let a = resolver
            .resolve("Orion Credit", SourceKind::Filings, None)
            .unwrap();
        let b = resolver
            .resolve("Pacific Retail Holdings LLC", SourceKind::Filings, None)
            .unwrap();
        assert_ne!(a.entity_id, b.entity_id);
        assert_eq!(store.table_counts().unwrap().entities, 2);
    }

    #[test]
    fn ambiguous_match_goes_to_review_not_merge() {
        let (store, config) = test_setup();
        let resolver = Resolver::new(&store, &config.resolver);

        // Two near-identical entities, seeded directly as if resolved from
        // sources before the fuzzy threshold could conflate them.
        store
            .insert_entity(&WatchlistEntity::new(
                "Summit Business Services",
                "summit business services",
                None,
            ))
            .unwrap();
        store
            .insert_entity(&WatchlistEntity::new(
                "Summit Business Service",
                "summit business service",
                None,
            ))
            .unwrap();
        assert_eq!(store.table_counts().unwrap().entities, 2);

        // A third variant plausibly matches both.
        let third = resolver
            .resolve("Summit Business Servces", SourceKind::Notices, None)
            .unwrap();
        assert_eq!(third.outcome, ResolutionOutcome::NeedsReview);
        assert_eq!(store.table_counts().unwrap().entities, 3);

        let conflicts = store.pending_conflicts().unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::AmbiguousMatch);
    }

    #[test]
    fn empty_name_is_rejected() {
        let (store, config) = test_setup();
        let resolver = Resolver::new(&store, &config.resolver);
        let err = resolver
            .resolve("  , .", SourceKind::Filings, None)
            .unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
    }

    #[test]
    fn scorer_ranks_closest_first() {
        let entities = vec![
            WatchlistEntity::new("Orion Credit", "orion credit", None),
            WatchlistEntity::new("Pacific Retail", "pacific retail", None),
        ];
        let ranked = score_candidates("orion credit", &entities);
        assert_eq!(ranked[0].matched_name, "orion credit");
        assert!(ranked[0].confidence > ranked[1].confidence);
        assert!((ranked[0].confidence - 1.0).abs() < 1e-9);
    }
}
