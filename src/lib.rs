//! # Vaultgate -- Zero-Trust Artifact Attestation Gate
//!
//! Vaultgate governs what happens to external artifacts (archives, binaries,
//! model files) once their bytes arrive: it admits them into a controlled
//! store, cryptographically proves their integrity and provenance, and
//! continuously re-verifies that proof before any privileged operation uses
//! them. Trust decays: every attestation carries a TTL, and a stale proof
//! must be regenerated before the artifact is usable again.
//!
//! ## Security Properties
//!
//! - **`#![forbid(unsafe_code)]`**: No `unsafe` blocks anywhere.
//! - **Fail closed**: unreadable bytes, unwritable stores, and timed-out
//!   checks all end as *not admitted*. There is no mode in which an
//!   unverifiable artifact is used anyway.
//! - **Zero drift**: digest comparison is exact-match only. A nonzero
//!   configured tolerance is a startup error, not a relaxed check.
//! - **Audit before commit**: every lifecycle transition is durably logged
//!   before the corresponding ledger update becomes visible.
//! - **Defensive input handling**: all file I/O is symlink-checked and
//!   size-bounded via [`hasher`].
//! - **Delegated crypto primitives**: SHA-256 and HMAC-SHA256 come from the
//!   `sha2`/`hmac` crates (`RustCrypto`, pure Rust, no FFI); signature
//!   comparison is constant-time.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`hasher`] | SHA-256 digests and symlink-safe, size-bounded file I/O |
//! | [`signer`] | Deterministic VaultTime (HMAC-SHA256) signing, key rotation, TTL |
//! | [`ledger`] | Codex-Lock trust ledger: path -> expected digest, per-key atomic replace |
//! | [`lifecycle`] | Per-artifact state machine: incoming, verifying, trusted, quarantined, expired |
//! | [`audit`] | Append-only, fsynced record of every verification decision |
//! | [`gate`] | Mandatory re-check invoked before any privileged use |
//! | [`config`] | Store layout, per-domain TTLs, zero-trust drift policy |
//! | [`error`] | Rejection taxonomy shared by controller and gate |

#![forbid(unsafe_code)]

/// Append-only audit trail of verification decisions.
pub mod audit;

/// Configuration surface: store layout, trust-domain TTLs, drift policy.
pub mod config;

/// Rejection taxonomy: every reason the pipeline can refuse an artifact.
pub mod error;

/// Verification gate guarding privileged use of admitted artifacts.
pub mod gate;

/// Content digests and guarded file I/O. Single source of truth for all
/// untrusted file reads.
pub mod hasher;

/// Codex-Lock trust ledger: authoritative digest expectations per
/// `(path, trust_domain)`.
pub mod ledger;

/// Lifecycle controller driving artifacts through their trust states.
pub mod lifecycle;

/// VaultTime attestation signing: deterministic keyed HMAC with rotation
/// grace and an explicit unsigned fallback mode.
pub mod signer;

pub use audit::{AuditEntry, AuditFilter, AuditLog, AuditResult};
pub use config::VaultConfig;
pub use error::VerifyError;
pub use gate::{Decision, VerificationGate};
pub use ledger::{CompareOutcome, LedgerEntry, TrustLedger};
pub use lifecycle::{ArtifactState, LifecycleController};
pub use signer::{AttestationRecord, AttestationStore, KeyRing};
