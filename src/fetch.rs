// Fetcher boundary - raw payload hand-off from the fetch collaborator
//
// The fetch side (HTTP, EDGAR, state portals) lives outside this crate.
// Extractors see only `RawDocument`s supplied through the `SourceFetcher`
// trait: transport is assumed well-formed, content is not. Transient
// failures are retried with exponential backoff before they count as a
// source failure for the run.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::FetchConfig;
use crate::error::{IngestError, Result};
use crate::model::SourceKind;

// ============================================================================
// RAW DOCUMENT
// ============================================================================

/// One raw payload from a source: a filing table, a jurisdiction feed, or
/// a page of docket search results.
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// Provenance label - file stem or feed name, carries document metadata
    /// such as issuer and period for filings, jurisdiction for notices.
    pub label: String,

    /// Content digest, recorded on stored rows as source_document_ref.
    pub digest: String,

    pub bytes: Vec<u8>,
}

impl RawDocument {
    pub fn new(label: &str, bytes: Vec<u8>) -> RawDocument {
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        RawDocument {
            label: label.to_string(),
            digest: format!("{:x}", hasher.finalize()),
            bytes,
        }
    }
}

// ============================================================================
// FETCHER TRAIT
// ============================================================================

pub trait SourceFetcher: Send + Sync {
    /// Fetch every pending document for one source.
    fn fetch(&self, source: SourceKind) -> Result<Vec<RawDocument>>;
}

/// Retry wrapper: transient failures back off exponentially up to the
/// configured attempt limit; any other error propagates immediately.
pub fn fetch_with_retry(
    fetcher: &dyn SourceFetcher,
    source: SourceKind,
    config: &FetchConfig,
) -> Result<Vec<RawDocument>> {
    let attempts = config.max_attempts.max(1);
    let mut last_failure = String::new();

    for attempt in 1..=attempts {
        match fetcher.fetch(source) {
            Ok(docs) => {
                info!(source = source.as_str(), documents = docs.len(), "fetch ok");
                return Ok(docs);
            }
            Err(IngestError::TransientFetch(reason)) => {
                warn!(
                    source = source.as_str(),
                    attempt,
                    max_attempts = attempts,
                    %reason,
                    "transient fetch failure"
                );
                last_failure = reason;
                if attempt < attempts {
                    let delay = config
                        .backoff_base_ms
                        .saturating_mul(1 << (attempt - 1).min(16))
                        .min(config.backoff_cap_ms);
                    thread::sleep(Duration::from_millis(delay));
                }
            }
            Err(other) => return Err(other),
        }
    }

    Err(IngestError::TransientFetch(format!(
        "{} attempts exhausted: {last_failure}",
        attempts
    )))
}

// ============================================================================
// FILE FETCHER
// ============================================================================

/// Reads documents the external fetch jobs drop on disk, one subdirectory
/// per source. Missing drop directory means the collaborator has not
/// delivered yet and is treated as transient.
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    pub fn new(root: &Path) -> FileFetcher {
        FileFetcher {
            root: root.to_path_buf(),
        }
    }
}

impl SourceFetcher for FileFetcher {
    fn fetch(&self, source: SourceKind) -> Result<Vec<RawDocument>> {
        let dir = self.root.join(source.as_str());
        if !dir.is_dir() {
            return Err(IngestError::TransientFetch(format!(
                "drop directory {} not present",
                dir.display()
            )));
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| IngestError::TransientFetch(format!("{}: {e}", dir.display())))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let mut docs = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = std::fs::read(&path)
                .map_err(|e| IngestError::TransientFetch(format!("{}: {e}", path.display())))?;
            let label = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            docs.push(RawDocument::new(&label, bytes));
        }
        Ok(docs)
    }
}

// ============================================================================
// TESTS
// ============================================================================
