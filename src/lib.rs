// Risk Observatory - Core Library
// Exposes all modules for use in the CLI and tests

pub mod config;
pub mod db;
pub mod error;
pub mod extract; // Source extractors: filings, notices, litigation
pub mod fetch;
pub mod health;
pub mod model;
pub mod orchestrator;
pub mod resolver;
pub mod score;

// Re-export commonly used types
pub use config::{Config, FetchConfig, IngestConfig, ResolverConfig, ScoreWeights, ScoringConfig};
pub use db::{Store, TableCounts, TouchedCounts, UpsertOutcome};
pub use error::{IngestError, Result};
pub use extract::SourceReport;
pub use fetch::{fetch_with_retry, FileFetcher, RawDocument, SourceFetcher};
pub use health::{run_health_check, CheckStatus, HealthCheck, HealthReport};
pub use model::{
    CaseStatus, CaseType, ConflictKind, ConflictRecord, DistressScore, LayoffRecord,
    LitigationRecord, LoanRecord, SourceKind, WatchlistEntity,
};
pub use orchestrator::{run, run_single, RunSummary, SourceOutcome};
pub use resolver::{normalize_name, score_candidates, Resolution, ResolutionOutcome, Resolver};
pub use score::{AggregationSummary, Aggregator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
