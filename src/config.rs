// Configuration - every tunable threshold and weight in one place
//
// Defaults are the documented production values; a TOML file can override
// any subset. Nothing here is read from the environment at runtime, so a
// run is reproducible from its config file alone.

use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// TOP-LEVEL CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub fetch: FetchConfig,
}

impl Config {
    /// Load config from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Config> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Load from a file when given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
        match path {
            Some(p) => Config::from_toml_file(p),
            None => Ok(Config::default()),
        }
    }
}

// ============================================================================
// INGEST THRESHOLDS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// A loan is flagged when value_ratio is strictly below this.
    /// A ratio of exactly 0.85 is NOT flagged.
    #[serde(default = "default_distress_ratio")]
    pub distress_ratio_threshold: f64,

    /// Layoff notices below this head count are discarded, not stored.
    #[serde(default = "default_employee_floor")]
    pub employee_floor: u32,

    /// Sector allowlist for layoff notices. Empty = all sectors pass.
    #[serde(default)]
    pub sector_allowlist: Vec<String>,

    /// Case types the litigation extractor keeps.
    #[serde(default = "default_tracked_case_types")]
    pub tracked_case_types: Vec<String>,
}

fn default_distress_ratio() -> f64 {
    0.85
}

fn default_employee_floor() -> u32 {
    50
}

fn default_tracked_case_types() -> Vec<String> {
    vec!["breach_of_contract".to_string(), "receivership".to_string()]
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            distress_ratio_threshold: default_distress_ratio(),
            employee_floor: default_employee_floor(),
            sector_allowlist: Vec::new(),
            tracked_case_types: default_tracked_case_types(),
        }
    }
}

// ============================================================================
// ENTITY RESOLVER
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Jaro-Winkler confidence required for a fuzzy match to count.
    #[serde(default = "default_fuzzy_confidence")]
    pub fuzzy_confidence_threshold: f64,
}

fn default_fuzzy_confidence() -> f64 {
    0.93
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            fuzzy_confidence_threshold: default_fuzzy_confidence(),
        }
    }
}

// ============================================================================
// SCORING
// ============================================================================

/// Component weights for the composite distress score.
///
/// Weights are normalized at use, so any positive values work; the defaults
/// give loan write-downs half the signal and split the rest between labor
/// and litigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "default_loan_weight")]
    pub loan: f64,

    #[serde(default = "default_labor_weight")]
    pub labor: f64,

    #[serde(default = "default_litigation_weight")]
    pub litigation: f64,
}

fn default_loan_weight() -> f64 {
    0.5
}

fn default_labor_weight() -> f64 {
    0.25
}

fn default_litigation_weight() -> f64 {
    0.25
}

impl Default for ScoreWeights {
    fn default() -> Self {
        ScoreWeights {
            loan: default_loan_weight(),
            labor: default_labor_weight(),
            litigation: default_litigation_weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: ScoreWeights,

    /// value_ratio at or below this maps to a loan component of 100.
    /// Ratios at or above 1.0 map to 0; linear in between.
    #[serde(default = "default_ratio_floor")]
    pub ratio_floor: f64,

    /// Cumulative recent head count at which the labor component
    /// saturates at 100 (log-scaled below that).
    #[serde(default = "default_labor_saturation")]
    pub labor_saturation: u32,

    /// Per-open-case contribution to the litigation component.
    /// Receivership is weighted above breach of contract by design.
    #[serde(default = "default_receivership_weight")]
    pub receivership_case_weight: f64,

    #[serde(default = "default_breach_weight")]
    pub breach_case_weight: f64,

    #[serde(default = "default_other_case_weight")]
    pub other_case_weight: f64,

    /// Lookback window for loan ratios (covers four quarterly filings).
    #[serde(default = "default_loan_lookback")]
    pub loan_lookback_days: i64,

    /// Lookback window for layoff notices.
    #[serde(default = "default_layoff_lookback")]
    pub layoff_lookback_days: i64,
}

fn default_ratio_floor() -> f64 {
    0.5
}

fn default_labor_saturation() -> u32 {
    5_000
}

fn default_receivership_weight() -> f64 {
    40.0
}

fn default_breach_weight() -> f64 {
    25.0
}

fn default_other_case_weight() -> f64 {
    10.0
}

fn default_loan_lookback() -> i64 {
    370
}

fn default_layoff_lookback() -> i64 {
    180
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            weights: ScoreWeights::default(),
            ratio_floor: default_ratio_floor(),
            labor_saturation: default_labor_saturation(),
            receivership_case_weight: default_receivership_weight(),
            breach_case_weight: default_breach_weight(),
            other_case_weight: default_other_case_weight(),
            loan_lookback_days: default_loan_lookback(),
            layoff_lookback_days: default_layoff_lookback(),
        }
    }
}

// ============================================================================
// FETCH / RETRY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Attempts per source before the fetch counts as a source failure.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff between attempts.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Cap on any single backoff delay.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    250
}

fn default_backoff_cap_ms() -> u64 {
    5_000
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
