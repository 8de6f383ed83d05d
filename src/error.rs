//! Verification error taxonomy for the attestation pipeline.
//!
//! Every rejection the pipeline can produce is represented by [`VerifyError`],
//! which carries enough context for an operator to act on without leaking
//! sensitive internal state (no key material in error messages).

use std::fmt;

/// Errors produced by the attestation pipeline.
///
/// Each variant maps to exactly one rejection reason surfaced by the
/// lifecycle controller and the verification gate. Variants are decisions,
/// not bugs: a `DigestMismatch` on tampered content is the pipeline working
/// as intended.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyError {
    /// Observed content does not match the ledger's recorded digest.
    /// Triggers quarantine; never retried silently.
    DigestMismatch {
        /// Artifact path as recorded in the ledger.
        path: String,
        /// Digest the ledger expects.
        expected: String,
        /// Digest computed from the presented bytes.
        observed: String,
    },

    /// The VaultTime signature cannot be reproduced with any currently
    /// accepted key. Triggers quarantine.
    SignatureInvalid {
        /// Artifact path whose attestation failed.
        path: String,
    },

    /// Content and signature are valid but the attestation TTL has elapsed.
    /// Demands re-attestation, not quarantine.
    TrustExpired {
        /// Artifact path whose proof went stale.
        path: String,
        /// RFC 3339 instant at which the attestation expired.
        expired_at: String,
    },

    /// No ledger entry exists for an artifact presented to the gate.
    /// Enrollment is a separate, explicit operation; at the gate this is a
    /// deny.
    LedgerEntryMissing {
        /// Artifact path that was presented.
        path: String,
        /// Trust domain that was searched.
        trust_domain: String,
    },

    /// Configured drift tolerance is nonzero under zero-trust policy.
    /// Fatal at startup, before any artifact is touched.
    DriftPolicyViolation {
        /// The offending configured value.
        configured: f64,
    },

    /// Unreadable artifact or unwritable ledger/audit store. Fatal for the
    /// current operation; the artifact is treated as not admitted.
    Io(String),
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DigestMismatch {
                path,
                expected,
                observed,
            } => {
                write!(
                    f,
                    "digest mismatch for {path}: ledger has {expected}, observed {observed}"
                )
            }
            Self::SignatureInvalid { path } => {
                write!(f, "vaulttime signature invalid for {path}")
            }
            Self::TrustExpired { path, expired_at } => {
                write!(f, "trust expired for {path} at {expired_at}")
            }
            Self::LedgerEntryMissing { path, trust_domain } => {
                write!(f, "no ledger entry for {path} in trust domain {trust_domain}")
            }
            Self::DriftPolicyViolation { configured } => {
                write!(
                    f,
                    "drift tolerance must be 0.0 under zero-trust policy (configured: {configured})"
                )
            }
            Self::Io(msg) => write!(f, "i/o failure: {msg}"),
        }
    }
}

impl std::error::Error for VerifyError {}

impl VerifyError {
    /// Stable machine-readable reason code, used in audit entries and
    /// verification reports.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DigestMismatch { .. } => "digest_mismatch",
            Self::SignatureInvalid { .. } => "signature_invalid",
            Self::TrustExpired { .. } => "trust_expired",
            Self::LedgerEntryMissing { .. } => "ledger_entry_missing",
            Self::DriftPolicyViolation { .. } => "drift_policy_violation",
            Self::Io(_) => "io_failure",
        }
    }
}
