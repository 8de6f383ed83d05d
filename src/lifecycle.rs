//! Lifecycle controller: drives each artifact through its trust states.
//!
//! Per-artifact finite state machine: `incoming -> verifying ->
//! trusted | quarantined -> expired -> verifying`. The controller combines
//! the ledger comparison, the regenerated VaultTime signature, and the TTL
//! check into one admit/quarantine/expire decision.
//!
//! ## Ordering invariant
//!
//! Every transition emits its audit entry *before* any ledger or attestation
//! commit. If the audit append fails, the transition is abandoned and the
//! previous state remains — a crash can never produce a ledger update with
//! no audit trail.
//!
//! ## Failure policy
//!
//! Fail closed. Unreadable artifact bytes or an unwritable store end the
//! operation as not-admitted; nothing is ever defaulted to trusted.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::{
    audit::{AuditEntry, AuditLog, AuditResult},
    config::VaultConfig,
    error::VerifyError,
    hasher,
    ledger::{CompareOutcome, LedgerEntry, TrustLedger},
    signer::{AttestationRecord, AttestationStore, KeyRing, MAX_TTL_HOURS},
};

/// States an artifact instance moves through. Quarantine is terminal for the
/// instance; expiry is not — it demands re-attestation, because the content
/// has not been shown wrong, only its proof has gone stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactState {
    /// Bytes observed under the incoming namespace, not yet examined.
    Incoming,
    /// Admission checks in progress.
    Verifying,
    /// Ledger match, valid signature, TTL not elapsed.
    Trusted,
    /// Integrity or signature check failed. Terminal; re-submission starts a
    /// new instance.
    Quarantined,
    /// Attestation TTL elapsed; the proof must be regenerated.
    Expired,
}

impl fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Incoming => "incoming",
            Self::Verifying => "verifying",
            Self::Trusted => "trusted",
            Self::Quarantined => "quarantined",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// The lifecycle controller. Holds explicit handles to its collaborators
/// rather than process-wide singletons, so tests can instantiate isolated
/// pipelines per trust domain.
#[derive(Clone)]
pub struct LifecycleController {
    ledger: Arc<TrustLedger>,
    attestations: Arc<AttestationStore>,
    audit: Arc<AuditLog>,
    keys: Arc<KeyRing>,
    config: Arc<VaultConfig>,
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController").finish_non_exhaustive()
    }
}

impl LifecycleController {
    /// Assembles a controller from already-open collaborators.
    pub fn new(
        ledger: Arc<TrustLedger>,
        attestations: Arc<AttestationStore>,
        audit: Arc<AuditLog>,
        keys: Arc<KeyRing>,
        config: Arc<VaultConfig>,
    ) -> Self {
        Self {
            ledger,
            attestations,
            audit,
            keys,
            config,
        }
    }

    /// Validates the configuration and opens the ledger, attestation store,
    /// and audit log under `config.store_dir`.
    pub fn from_config(config: VaultConfig, keys: KeyRing) -> anyhow::Result<Self> {
        config.validate()?;
        let ledger = TrustLedger::open(&config.ledger_path())?;
        let attestations = AttestationStore::open(&config.attestations_path())?;
        let audit = AuditLog::open(&config.audit_path())?;
        Ok(Self::new(
            Arc::new(ledger),
            Arc::new(attestations),
            Arc::new(audit),
            Arc::new(keys),
            Arc::new(config),
        ))
    }

    /// The trust ledger backing this controller.
    pub fn ledger(&self) -> &TrustLedger {
        &self.ledger
    }

    /// The audit log backing this controller.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// The attestation store backing this controller.
    pub fn attestations(&self) -> &AttestationStore {
        &self.attestations
    }

    /// The key ring used for issuing and verifying attestations.
    pub fn keys(&self) -> &KeyRing {
        &self.keys
    }

    /// Verifies an already-enrolled artifact: hash, ledger compare, signature
    /// check, TTL check. Never enrolls and never refreshes `verified_at` —
    /// a mere read must not look like an attestation.
    pub fn admit(
        &self,
        artifact: &Path,
        trust_domain: &str,
        now: OffsetDateTime,
    ) -> Result<AttestationRecord, VerifyError> {
        let path_str = artifact.to_string_lossy().to_string();
        let observed = self.hash_artifact(artifact, &path_str, trust_domain, now)?;

        match self.ledger.compare(&path_str, trust_domain, &observed) {
            CompareOutcome::NotFound => {
                let err = VerifyError::LedgerEntryMissing {
                    path: path_str.clone(),
                    trust_domain: trust_domain.to_string(),
                };
                self.record(
                    &path_str,
                    &observed,
                    "",
                    trust_domain,
                    AuditResult::Fail,
                    Some(coded_reason(&err)),
                    now,
                )?;
                Err(err)
            }
            CompareOutcome::Mismatch { expected } => {
                let err = VerifyError::DigestMismatch {
                    path: path_str.clone(),
                    expected,
                    observed: observed.clone(),
                };
                Err(self.quarantine(artifact, &path_str, trust_domain, &observed, err, now))
            }
            CompareOutcome::Match => self.check_attestation(artifact, &path_str, trust_domain, &observed, now),
        }
    }

    /// Explicit first-time enrollment (or operator-forced re-enrollment).
    /// This is the only path that creates a ledger entry.
    pub fn enroll(
        &self,
        artifact: &Path,
        trust_domain: &str,
        ttl_hours: Option<u32>,
        force: bool,
        now: OffsetDateTime,
    ) -> Result<AttestationRecord, VerifyError> {
        let path_str = artifact.to_string_lossy().to_string();
        let ttl = ttl_hours.unwrap_or_else(|| self.config.ttl_for(trust_domain));
        if ttl == 0 || ttl > MAX_TTL_HOURS {
            return Err(VerifyError::Io(format!(
                "ttl_hours {ttl} out of range (1..={MAX_TTL_HOURS})"
            )));
        }
        let observed = self.hash_artifact(artifact, &path_str, trust_domain, now)?;

        match self.ledger.compare(&path_str, trust_domain, &observed) {
            CompareOutcome::NotFound => self.attest_and_commit(
                &path_str,
                trust_domain,
                &observed,
                ttl,
                "first-time enrollment",
                now,
            ),
            CompareOutcome::Match => self.attest_and_commit(
                &path_str,
                trust_domain,
                &observed,
                ttl,
                "re-enrollment of unchanged content",
                now,
            ),
            CompareOutcome::Mismatch { expected } => {
                if force {
                    // Latest submission wins; the superseded digest stays in
                    // the audit history.
                    self.attest_and_commit(
                        &path_str,
                        trust_domain,
                        &observed,
                        ttl,
                        &format!("forced re-enrollment superseding {expected}"),
                        now,
                    )
                } else {
                    let err = VerifyError::DigestMismatch {
                        path: path_str.clone(),
                        expected,
                        observed: observed.clone(),
                    };
                    Err(self.quarantine(artifact, &path_str, trust_domain, &observed, err, now))
                }
            }
        }
    }

    /// Re-attestation after expiry: re-runs verification on current content
    /// and issues a fresh record under the current key.
    pub fn reattest(
        &self,
        artifact: &Path,
        trust_domain: &str,
        now: OffsetDateTime,
    ) -> Result<AttestationRecord, VerifyError> {
        let path_str = artifact.to_string_lossy().to_string();
        let observed = self.hash_artifact(artifact, &path_str, trust_domain, now)?;
        let ttl = self.config.ttl_for(trust_domain);

        match self.ledger.compare(&path_str, trust_domain, &observed) {
            CompareOutcome::Match => self.attest_and_commit(
                &path_str,
                trust_domain,
                &observed,
                ttl,
                "re-attestation after expiry",
                now,
            ),
            CompareOutcome::Mismatch { expected } => {
                let err = VerifyError::DigestMismatch {
                    path: path_str.clone(),
                    expected,
                    observed: observed.clone(),
                };
                Err(self.quarantine(artifact, &path_str, trust_domain, &observed, err, now))
            }
            CompareOutcome::NotFound => {
                let err = VerifyError::LedgerEntryMissing {
                    path: path_str.clone(),
                    trust_domain: trust_domain.to_string(),
                };
                self.record(
                    &path_str,
                    &observed,
                    "",
                    trust_domain,
                    AuditResult::Fail,
                    Some(coded_reason(&err)),
                    now,
                )?;
                Err(err)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn hash_artifact(
        &self,
        artifact: &Path,
        path_str: &str,
        trust_domain: &str,
        now: OffsetDateTime,
    ) -> Result<String, VerifyError> {
        match hasher::digest_file(artifact) {
            Ok((digest, _len)) => Ok(digest),
            Err(e) => {
                let err = VerifyError::Io(e.to_string());
                // Best effort: the rejection itself should be on record, but
                // an unwritable audit store must not mask the original
                // failure.
                let _ = self.record(
                    path_str,
                    "",
                    "",
                    trust_domain,
                    AuditResult::Fail,
                    Some(coded_reason(&err)),
                    now,
                );
                Err(err)
            }
        }
    }

    fn check_attestation(
        &self,
        artifact: &Path,
        path_str: &str,
        trust_domain: &str,
        observed: &str,
        now: OffsetDateTime,
    ) -> Result<AttestationRecord, VerifyError> {
        let Some(record) = self.attestations.lookup(observed, trust_domain) else {
            // Ledger entry without a reproducible proof: treat exactly like a
            // signature that cannot be regenerated.
            let err = VerifyError::SignatureInvalid {
                path: path_str.to_string(),
            };
            return Err(self.quarantine(artifact, path_str, trust_domain, observed, err, now));
        };

        if !self.keys.verify(&record) {
            let err = VerifyError::SignatureInvalid {
                path: path_str.to_string(),
            };
            return Err(self.quarantine(artifact, path_str, trust_domain, observed, err, now));
        }

        if record.is_expired(now) {
            let expired_at = record
                .expires_at()
                .map(|e| e.format(&Rfc3339).unwrap_or_else(|_| e.to_string()))
                .unwrap_or_else(|| "out-of-range expiry".to_string());
            let err = VerifyError::TrustExpired {
                path: path_str.to_string(),
                expired_at,
            };
            self.record(
                path_str,
                observed,
                &record.vaulttime,
                trust_domain,
                AuditResult::Expired,
                Some(transition_reason(
                    ArtifactState::Trusted,
                    ArtifactState::Expired,
                    &err,
                )),
                now,
            )?;
            return Err(err);
        }

        self.record(
            path_str,
            observed,
            &record.vaulttime,
            trust_domain,
            AuditResult::Pass,
            None,
            now,
        )?;
        Ok(record)
    }

    /// Issues a fresh attestation and commits the ledger entry, in the
    /// audit-before-commit order.
    fn attest_and_commit(
        &self,
        path_str: &str,
        trust_domain: &str,
        observed: &str,
        ttl_hours: u32,
        note: &str,
        now: OffsetDateTime,
    ) -> Result<AttestationRecord, VerifyError> {
        let record = self.keys.issue(observed, trust_domain, ttl_hours, now);

        // Audit first: no ledger update may exist without its audit entry.
        self.record(
            path_str,
            observed,
            &record.vaulttime,
            trust_domain,
            AuditResult::Pass,
            Some(format!(
                "{} -> {}: {note}",
                ArtifactState::Verifying,
                ArtifactState::Trusted
            )),
            now,
        )?;

        self.attestations
            .put(record.clone())
            .map_err(|e| VerifyError::Io(e.to_string()))?;
        self.ledger
            .update(LedgerEntry {
                path: path_str.to_string(),
                sha256: observed.to_string(),
                trust_domain: trust_domain.to_string(),
                drift_tolerance: 0.0,
                verified_at: now,
            })
            .map_err(|e| VerifyError::Io(e.to_string()))?;
        Ok(record)
    }

    /// Quarantines the artifact instance: records the failing decision,
    /// moves the file into the quarantine namespace, and records the
    /// placement. Returns the original rejection reason.
    fn quarantine(
        &self,
        artifact: &Path,
        path_str: &str,
        trust_domain: &str,
        observed: &str,
        reason: VerifyError,
        now: OffsetDateTime,
    ) -> VerifyError {
        if let Err(e) = self.record(
            path_str,
            observed,
            "",
            trust_domain,
            AuditResult::Fail,
            Some(transition_reason(
                ArtifactState::Verifying,
                ArtifactState::Quarantined,
                &reason,
            )),
            now,
        ) {
            return e;
        }

        let dest = match self.move_to_quarantine(artifact, observed) {
            Ok(dest) => dest,
            Err(e) => return e,
        };

        if let Err(e) = self.record(
            path_str,
            observed,
            "",
            trust_domain,
            AuditResult::Quarantined,
            Some(format!("quarantined at {}", dest.display())),
            now,
        ) {
            return e;
        }

        reason
    }

    fn move_to_quarantine(&self, artifact: &Path, observed: &str) -> Result<PathBuf, VerifyError> {
        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "artifact".to_string());
        let prefix: String = observed.chars().take(12).collect();
        let dest = self
            .config
            .quarantine_dir
            .join(format!("{prefix}-{file_name}"));

        std::fs::create_dir_all(&self.config.quarantine_dir)
            .map_err(|e| VerifyError::Io(format!("create quarantine dir: {e}")))?;

        if std::fs::rename(artifact, &dest).is_err() {
            // Cross-device fallback.
            std::fs::copy(artifact, &dest)
                .and_then(|_| std::fs::remove_file(artifact))
                .map_err(|e| {
                    VerifyError::Io(format!(
                        "quarantine {} -> {}: {e}",
                        artifact.display(),
                        dest.display()
                    ))
                })?;
        }
        Ok(dest)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn record(
        &self,
        path_str: &str,
        sha256: &str,
        vaulttime: &str,
        trust_domain: &str,
        result: AuditResult,
        reason: Option<String>,
        now: OffsetDateTime,
    ) -> Result<(), VerifyError> {
        self.audit
            .append(&AuditEntry {
                artifact_path: path_str.to_string(),
                sha256: sha256.to_string(),
                vaulttime: vaulttime.to_string(),
                trust_domain: trust_domain.to_string(),
                verified_by: self.config.verified_by.clone(),
                verified_at: now,
                result,
                reason,
            })
            .map_err(|e| VerifyError::Io(format!("audit append: {e}")))
    }
}

fn transition_reason(from: ArtifactState, to: ArtifactState, err: &VerifyError) -> String {
    format!("{from} -> {to}: [{}] {err}", err.code())
}

pub(crate) fn coded_reason(err: &VerifyError) -> String {
    format!("[{}] {err}", err.code())
}
