//! Append-only audit trail of verification decisions.
//!
//! One JSON line per entry, one entry per lifecycle transition. Entries are
//! never edited or removed; the log is the sole source of historical truth
//! for compliance queries. Appends are fsynced before returning so the
//! audit-before-commit ordering holds: a decision is durable on disk before
//! the corresponding ledger update becomes visible.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};
use time::OffsetDateTime;

/// Verification outcome recorded in an audit entry.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditResult {
    /// Verification succeeded; the artifact is trusted.
    Pass,
    /// Verification failed (digest mismatch or invalid signature).
    Fail,
    /// The artifact instance was placed in quarantine.
    Quarantined,
    /// The attestation TTL elapsed; re-attestation is required.
    Expired,
}

impl std::fmt::Display for AuditResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Quarantined => "QUARANTINED",
            Self::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// One immutable log line. Carries everything needed to reconstruct the
/// decision without consulting the ledger.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEntry {
    /// Path of the artifact the decision was about.
    pub artifact_path: String,
    /// Observed digest at decision time (empty when the bytes were
    /// unreadable).
    pub sha256: String,
    /// VaultTime signature involved in the decision, if any.
    pub vaulttime: String,
    /// Trust domain the decision was made under.
    pub trust_domain: String,
    /// Actor identifier that ran the verification.
    pub verified_by: String,
    /// Decision instant (UTC).
    #[serde(with = "time::serde::rfc3339")]
    pub verified_at: OffsetDateTime,
    /// Decision outcome.
    pub result: AuditResult,
    /// Machine-readable reason code plus detail, for non-PASS outcomes.
    pub reason: Option<String>,
}

/// Query filter for compliance reads. All present fields must match.
#[derive(Clone, Debug, Default)]
pub struct AuditFilter {
    /// Restrict to one artifact path.
    pub path: Option<String>,
    /// Restrict to one trust domain.
    pub trust_domain: Option<String>,
    /// Entries at or after this instant.
    pub since: Option<OffsetDateTime>,
    /// Entries at or before this instant.
    pub until: Option<OffsetDateTime>,
}

impl AuditFilter {
    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(p) = &self.path {
            if entry.artifact_path != *p {
                return false;
            }
        }
        if let Some(d) = &self.trust_domain {
            if entry.trust_domain != *d {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.verified_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.verified_at > until {
                return false;
            }
        }
        true
    }
}

/// Single append-only sink. Concurrent writers serialize on the file mutex;
/// queries open their own read handle and never block appends for long.
pub struct AuditLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl AuditLog {
    /// Opens (or creates) the audit log in append mode. Existing content is
    /// never truncated.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open audit log {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Appends one entry and fsyncs. Returns only once the entry is durable,
    /// so callers may commit dependent state afterwards.
    pub fn append(&self, entry: &AuditEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(&line)
            .with_context(|| format!("append audit log {}", self.path.display()))?;
        file.sync_all()
            .with_context(|| format!("sync audit log {}", self.path.display()))?;
        Ok(())
    }

    /// Read-only, restartable scan in append order. Does not mutate state.
    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let file = File::open(&self.path)
            .with_context(|| format!("open audit log {}", self.path.display()))?;
        let mut out = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.with_context(|| format!("read audit log {}", self.path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: AuditEntry = serde_json::from_str(&line)
                .with_context(|| format!("parse audit entry in {}", self.path.display()))?;
            if filter.matches(&entry) {
                out.push(entry);
            }
        }
        Ok(out)
    }
}
