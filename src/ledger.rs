//! Codex-Lock trust ledger: the authoritative mapping from artifact path to
//! expected digest, trust domain, and drift tolerance.
//!
//! The ledger holds at most one active entry per `(path, trust_domain)` key.
//! Mutations go through [`TrustLedger::update`], which replaces the entry
//! atomically: the on-disk store is written temp-then-rename, so a concurrent
//! reader observes either the previous entry or the new one, never a partial
//! write. Comparison is exact-match only — drift tolerance is fixed at 0.0
//! under zero-trust policy and no fuzzy comparison path exists.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
};
use time::OffsetDateTime;

use crate::hasher;

/// Upper bound for ledger/attestation store files (64 MB of JSON is already
/// far past any sane deployment).
pub(crate) const MAX_STORE_BYTES: u64 = 64 * 1024 * 1024;

/// Authoritative record for one artifact within one trust domain.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    /// Artifact path, unique within the trust domain.
    pub path: String,
    /// Expected hex SHA-256 digest (64 chars).
    pub sha256: String,
    /// Trust domain namespace owning this entry.
    pub trust_domain: String,
    /// Permitted digest deviation. Always 0.0 in zero-trust mode; a nonzero
    /// value is rejected at startup, never honored here.
    pub drift_tolerance: f64,
    /// Set only after a successful end-to-end attestation, never
    /// speculatively.
    #[serde(with = "time::serde::rfc3339")]
    pub verified_at: OffsetDateTime,
}

/// Outcome of comparing an observed digest against the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompareOutcome {
    /// Observed digest equals the recorded digest exactly.
    Match,
    /// Observed digest differs. Always a hard failure.
    Mismatch {
        /// The digest the ledger expects.
        expected: String,
    },
    /// No entry for this `(path, trust_domain)`.
    NotFound,
}

/// The trust ledger. Reads are concurrent; mutations for any key are
/// serialized behind the write lock, so two admissions of the same path
/// cannot interleave their read-modify-write of `verified_at`.
pub struct TrustLedger {
    entries: RwLock<BTreeMap<(String, String), LedgerEntry>>,
    store_path: Option<PathBuf>,
}

impl TrustLedger {
    /// Ledger with no persistence, for tests and one-shot operations.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            store_path: None,
        }
    }

    /// Opens (or initializes) a ledger store file. The on-disk shape is an
    /// ordered list of entries, so diffs between store snapshots are
    /// reproducible.
    pub fn open(path: &Path) -> Result<Self> {
        let mut entries = BTreeMap::new();
        if path.exists() {
            let bytes = hasher::read_validated(path, MAX_STORE_BYTES)?;
            let list: Vec<LedgerEntry> = serde_json::from_slice(&bytes)
                .with_context(|| format!("parse ledger store {}", path.display()))?;
            for e in list {
                entries.insert((e.path.clone(), e.trust_domain.clone()), e);
            }
        }
        Ok(Self {
            entries: RwLock::new(entries),
            store_path: Some(path.to_path_buf()),
        })
    }

    /// Returns the active entry for `(path, trust_domain)`, if any.
    pub fn lookup(&self, path: &str, trust_domain: &str) -> Option<LedgerEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(path.to_string(), trust_domain.to_string()))
            .cloned()
    }

    /// Compares an observed digest against the recorded one. Exact match
    /// only: under zero-trust policy there is no tolerance band.
    pub fn compare(&self, path: &str, trust_domain: &str, observed: &str) -> CompareOutcome {
        match self.lookup(path, trust_domain) {
            None => CompareOutcome::NotFound,
            Some(entry) if entry.sha256 == observed => CompareOutcome::Match,
            Some(entry) => CompareOutcome::Mismatch {
                expected: entry.sha256,
            },
        }
    }

    /// Atomically replaces the entry for its `(path, trust_domain)` key.
    /// Either the whole new entry becomes visible or the previous one
    /// remains.
    pub fn update(&self, entry: LedgerEntry) -> Result<()> {
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        map.insert((entry.path.clone(), entry.trust_domain.clone()), entry);
        if let Some(path) = &self.store_path {
            let list: Vec<&LedgerEntry> = map.values().collect();
            hasher::write_atomic(path, &serde_json::to_vec_pretty(&list)?)?;
        }
        Ok(())
    }

    /// Ordered snapshot of every entry, for reports and `verify --all`.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
