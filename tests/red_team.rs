//! Red team tests for the attestation pipeline.
//!
//! Adversarial scenarios exercised through the library API: forged and
//! replayed signatures, hand-edited stores, stale proofs, and policy
//! downgrade attempts. The pipeline must reject every one of them with a
//! reasoned decision — never a panic, never a silent allow.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

use vaultgate::{
    audit::AuditFilter,
    config::VaultConfig,
    gate::{Decision, VerificationGate},
    lifecycle::LifecycleController,
    signer::KeyRing,
    VerifyError,
};

const DOMAIN: &str = "runtime-core";

fn config_in(dir: &Path) -> VaultConfig {
    VaultConfig {
        store_dir: dir.join("store"),
        incoming_dir: dir.join("incoming"),
        quarantine_dir: dir.join("quarantine"),
        ..VaultConfig::default()
    }
}

fn controller_with(dir: &Path, keys: KeyRing) -> LifecycleController {
    LifecycleController::from_config(config_in(dir), keys).unwrap()
}

fn write_artifact(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let incoming = dir.join("incoming");
    fs::create_dir_all(&incoming).unwrap();
    let p = incoming.join(name);
    fs::write(&p, content).unwrap();
    p
}

// -------------------------------------------------------------------------
// (a) Forged signature: right shape, wrong key
// -------------------------------------------------------------------------

#[test]
fn forged_vaulttime_from_attacker_key_is_quarantined() {
    let dir = TempDir::new().unwrap();
    let ctl = controller_with(dir.path(), KeyRing::new(b"real-key".to_vec(), Vec::new()));
    let artifact = write_artifact(dir.path(), "core.bin", b"payload");
    let now = OffsetDateTime::now_utc();

    let record = ctl.enroll(&artifact, DOMAIN, None, false, now).unwrap();

    // Attacker rewrites the attestation with a signature under their own key.
    let attacker = KeyRing::new(b"attacker-key".to_vec(), Vec::new());
    let forged = attacker.issue(&record.sha256, DOMAIN, 24, now);
    ctl.attestations().put(forged).unwrap();

    let err = ctl.admit(&artifact, DOMAIN, now).unwrap_err();
    assert!(
        matches!(err, VerifyError::SignatureInvalid { .. }),
        "forged signature must quarantine, got: {err}"
    );
    assert!(!artifact.exists(), "the instance must be moved to quarantine");
}

// -------------------------------------------------------------------------
// (b) Rotated-out key: signature valid once, no longer accepted
// -------------------------------------------------------------------------

#[test]
fn signature_from_rotated_out_key_is_denied() {
    let dir = TempDir::new().unwrap();
    let artifact = write_artifact(dir.path(), "core.bin", b"payload");
    let now = OffsetDateTime::now_utc();

    // Enroll under the retiring key.
    let old = controller_with(dir.path(), KeyRing::new(b"key-2024".to_vec(), Vec::new()));
    old.enroll(&artifact, DOMAIN, None, false, now).unwrap();

    // Rotation keeps key-2025 in the grace list but drops key-2024.
    let rotated = controller_with(
        dir.path(),
        KeyRing::new(b"key-2026".to_vec(), vec![b"key-2025".to_vec()]),
    );
    let gate = VerificationGate::new(rotated);

    let decision = gate.admit_for_use(&artifact, DOMAIN, now);
    let Decision::Deny { reason } = decision else {
        panic!("a rotated-out key must not verify");
    };
    assert!(matches!(reason, VerifyError::SignatureInvalid { .. }));
}

#[test]
fn signature_from_previous_key_within_grace_window_is_allowed() {
    let dir = TempDir::new().unwrap();
    let artifact = write_artifact(dir.path(), "core.bin", b"payload");
    let now = OffsetDateTime::now_utc();

    let old = controller_with(dir.path(), KeyRing::new(b"key-2025".to_vec(), Vec::new()));
    old.enroll(&artifact, DOMAIN, None, false, now).unwrap();

    let rotated = controller_with(
        dir.path(),
        KeyRing::new(b"key-2026".to_vec(), vec![b"key-2025".to_vec()]),
    );
    let gate = VerificationGate::new(rotated);
    assert!(gate.admit_for_use(&artifact, DOMAIN, now).is_allow());
}

// -------------------------------------------------------------------------
// (c) Store tampering: hand-edited ledger expectation
// -------------------------------------------------------------------------

#[test]
fn hand_edited_ledger_digest_quarantines_the_artifact() {
    let dir = TempDir::new().unwrap();
    let ctl = controller_with(dir.path(), KeyRing::new(b"k".to_vec(), Vec::new()));
    let artifact = write_artifact(dir.path(), "core.bin", b"payload");
    let now = OffsetDateTime::now_utc();

    ctl.enroll(&artifact, DOMAIN, None, false, now).unwrap();

    // Attacker swaps the expected digest in the on-disk ledger, hoping to
    // smuggle different content through later.
    let ledger_path = dir.path().join("store").join("ledger.json");
    let text = fs::read_to_string(&ledger_path).unwrap();
    let real = vaultgate::hasher::digest_bytes(b"payload");
    let swapped = text.replace(&real, &"0".repeat(64));
    fs::write(&ledger_path, swapped).unwrap();

    // Reopened pipeline: the genuine artifact no longer matches the forged
    // expectation, so it is refused rather than silently re-trusted.
    let reopened = controller_with(dir.path(), KeyRing::new(b"k".to_vec(), Vec::new()));
    let err = reopened.admit(&artifact, DOMAIN, now).unwrap_err();
    assert!(matches!(err, VerifyError::DigestMismatch { .. }));
}

// -------------------------------------------------------------------------
// (d) Stale proof replay
// -------------------------------------------------------------------------

#[test]
fn expired_attestation_is_not_usable_at_the_boundary() {
    let dir = TempDir::new().unwrap();
    let ctl = controller_with(dir.path(), KeyRing::new(b"k".to_vec(), Vec::new()));
    let artifact = write_artifact(dir.path(), "core.bin", b"payload");
    let issued = datetime!(2026-08-01 00:00:00 UTC);

    ctl.enroll(&artifact, DOMAIN, Some(24), false, issued).unwrap();

    // Exactly timestamp + ttl_hours: inclusive boundary, already expired.
    let boundary = issued + Duration::hours(24);
    let err = ctl.admit(&artifact, DOMAIN, boundary).unwrap_err();
    assert!(matches!(err, VerifyError::TrustExpired { .. }));

    // One second before, still valid.
    let just_before = boundary - Duration::seconds(1);
    assert!(ctl.admit(&artifact, DOMAIN, just_before).is_ok());
}

// -------------------------------------------------------------------------
// (e) Unsigned-record laundering
// -------------------------------------------------------------------------

#[test]
fn unsigned_record_does_not_verify_under_a_real_key_ring() {
    let dir = TempDir::new().unwrap();
    let artifact = write_artifact(dir.path(), "core.bin", b"payload");
    let now = OffsetDateTime::now_utc();

    // Records created in unsigned fallback mode...
    let unsigned = controller_with(dir.path(), KeyRing::unsigned_fallback());
    let record = unsigned.enroll(&artifact, DOMAIN, None, false, now).unwrap();
    assert!(record.unsigned, "fallback records must be flagged unsigned");

    // ...cannot be laundered into a keyed deployment: the placeholder key is
    // not on the ring, so the signature fails to reproduce.
    let keyed = controller_with(dir.path(), KeyRing::new(b"real-key".to_vec(), Vec::new()));
    let err = keyed.admit(&artifact, DOMAIN, now).unwrap_err();
    assert!(matches!(err, VerifyError::SignatureInvalid { .. }));
}

// -------------------------------------------------------------------------
// (f) Policy downgrade
// -------------------------------------------------------------------------

#[test]
fn nonzero_drift_tolerance_cannot_boot_a_pipeline() {
    let dir = TempDir::new().unwrap();
    let config = VaultConfig {
        drift_tolerance: 0.01,
        ..config_in(dir.path())
    };
    let result = LifecycleController::from_config(config, KeyRing::unsigned_fallback());
    let err = result.unwrap_err().to_string();
    assert!(
        err.contains("drift tolerance"),
        "startup must reject drift downgrade: {err}"
    );
}

// -------------------------------------------------------------------------
// (g) Audit trail integrity
// -------------------------------------------------------------------------

#[test]
fn audit_history_survives_quarantine_and_resubmission() {
    let dir = TempDir::new().unwrap();
    let ctl = controller_with(dir.path(), KeyRing::new(b"k".to_vec(), Vec::new()));
    let artifact = write_artifact(dir.path(), "core.bin", b"v1");
    let now = OffsetDateTime::now_utc();

    ctl.enroll(&artifact, DOMAIN, None, false, now).unwrap();
    let after_enroll = ctl.audit().query(&AuditFilter::default()).unwrap().len();

    fs::write(&artifact, b"v2").unwrap();
    ctl.admit(&artifact, DOMAIN, now).unwrap_err();
    let after_quarantine = ctl.audit().query(&AuditFilter::default()).unwrap().len();
    assert!(
        after_quarantine > after_enroll,
        "failures must append, never rewrite"
    );

    // Operator resubmits; the quarantine history is retained.
    write_artifact(dir.path(), "core.bin", b"v2");
    ctl.enroll(&artifact, DOMAIN, None, true, now).unwrap();

    let entries = ctl.audit().query(&AuditFilter::default()).unwrap();
    assert!(entries.len() > after_quarantine);
    assert!(entries
        .iter()
        .any(|e| e.result == vaultgate::AuditResult::Quarantined));
    // Entries only ever grow; the earliest entry is still the enrollment.
    assert_eq!(entries[0].result, vaultgate::AuditResult::Pass);
}
