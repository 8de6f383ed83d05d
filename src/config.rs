//! Pipeline configuration: store layout, trust-domain TTLs, drift policy.
//!
//! Loaded from a JSON file with secure defaults for anything absent. Signing
//! key material never lives here — it comes from the environment only
//! (`VAULTTIME_KEY` / `VAULTTIME_PREVIOUS_KEYS`), so a leaked config file
//! leaks no secrets.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::error::VerifyError;
use crate::signer::MAX_TTL_HOURS;

/// Maximum config file size (1 MB).
const MAX_CONFIG_BYTES: u64 = 1024 * 1024;

fn default_ttl_hours() -> u32 {
    24
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".vaultgate")
}

fn default_incoming_dir() -> PathBuf {
    PathBuf::from("incoming")
}

fn default_quarantine_dir() -> PathBuf {
    PathBuf::from("quarantine")
}

fn default_verified_by() -> String {
    "vaultgate".to_string()
}

/// Per-trust-domain overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Attestation TTL for this domain, in hours.
    pub ttl_hours: u32,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Permitted digest deviation. Zero-trust mode requires `0.0`; any other
    /// value is a configuration error rejected at startup, not a relaxed
    /// check.
    #[serde(default)]
    pub drift_tolerance: f64,

    /// TTL applied to domains without an explicit override.
    #[serde(default = "default_ttl_hours")]
    pub default_ttl_hours: u32,

    /// Per-domain settings, keyed by trust-domain name.
    #[serde(default)]
    pub domains: BTreeMap<String, DomainConfig>,

    /// Directory holding the ledger, attestation store, audit log, and
    /// verification reports.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Namespace where new artifacts arrive (scanned by `verify --all`).
    #[serde(default = "default_incoming_dir")]
    pub incoming_dir: PathBuf,

    /// Namespace quarantined artifact instances are moved into.
    #[serde(default = "default_quarantine_dir")]
    pub quarantine_dir: PathBuf,

    /// Actor identifier recorded in audit entries.
    #[serde(default = "default_verified_by")]
    pub verified_by: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            drift_tolerance: 0.0,
            default_ttl_hours: default_ttl_hours(),
            domains: BTreeMap::new(),
            store_dir: default_store_dir(),
            incoming_dir: default_incoming_dir(),
            quarantine_dir: default_quarantine_dir(),
            verified_by: default_verified_by(),
        }
    }
}

impl VaultConfig {
    /// Loads configuration from `path`, or returns defaults when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Ok(serde_json::from_slice(&crate::hasher::read_validated(
                p,
                MAX_CONFIG_BYTES,
            )?)?),
            None => Ok(Self::default()),
        }
    }

    /// Startup policy check. A nonzero drift tolerance is fatal before any
    /// artifact is touched; TTLs must be positive and bounded.
    pub fn validate(&self) -> Result<(), VerifyError> {
        if self.drift_tolerance != 0.0 {
            return Err(VerifyError::DriftPolicyViolation {
                configured: self.drift_tolerance,
            });
        }
        if self.default_ttl_hours == 0 || self.default_ttl_hours > MAX_TTL_HOURS {
            return Err(VerifyError::Io(format!(
                "default_ttl_hours must be in 1..={MAX_TTL_HOURS}"
            )));
        }
        if let Some((name, _)) = self
            .domains
            .iter()
            .find(|(_, d)| d.ttl_hours == 0 || d.ttl_hours > MAX_TTL_HOURS)
        {
            return Err(VerifyError::Io(format!(
                "ttl_hours must be in 1..={MAX_TTL_HOURS} for trust domain {name}"
            )));
        }
        Ok(())
    }

    /// Attestation TTL for a trust domain.
    pub fn ttl_for(&self, trust_domain: &str) -> u32 {
        self.domains
            .get(trust_domain)
            .map_or(self.default_ttl_hours, |d| d.ttl_hours)
    }

    /// Ledger store file.
    pub fn ledger_path(&self) -> PathBuf {
        self.store_dir.join("ledger.json")
    }

    /// Attestation store file.
    pub fn attestations_path(&self) -> PathBuf {
        self.store_dir.join("attestations.json")
    }

    /// Append-only audit log file.
    pub fn audit_path(&self) -> PathBuf {
        self.store_dir.join("audit.log")
    }

    /// Machine-readable verification report written by `verify`.
    pub fn report_path(&self) -> PathBuf {
        self.store_dir.join("report.json")
    }
}
