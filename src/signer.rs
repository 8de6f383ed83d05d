//! VaultTime attestation signing and verification.
//!
//! A VaultTime signature is `HMAC-SHA256(key, sha256_hex)` rendered as
//! lowercase hex. It is deterministic by design — no nonce, no salt — so the
//! same digest under the same key always yields a byte-identical signature.
//!
//! ## Key handling
//!
//! - New signatures always use the *current* key.
//! - Verification accepts the current key or, for rotation grace, an ordered
//!   list of previous keys, so rotating keys does not flag-day every
//!   outstanding record.
//! - Comparison is constant-time ([`hmac::Mac::verify_slice`]); the raw MAC
//!   is never compared with `==`.
//! - When no key is configured, signing falls back to a fixed well-known
//!   placeholder key. Records produced this way carry an explicit `unsigned`
//!   flag and must never be reported as cryptographically trusted — callers
//!   do not get to infer trust level from key presence.

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
};
use time::{Duration, OffsetDateTime};

use crate::hasher;

type HmacSha256 = Hmac<Sha256>;

/// Environment variable holding the current signing key.
pub const VAULTTIME_KEY_ENV: &str = "VAULTTIME_KEY";

/// Environment variable holding previous keys (comma-separated, most recent
/// first) still accepted for verification during a rotation grace window.
pub const VAULTTIME_PREVIOUS_KEYS_ENV: &str = "VAULTTIME_PREVIOUS_KEYS";

/// Fixed placeholder key for deterministic unsigned mode. Well-known on
/// purpose: unsigned records must be reproducible, and the `unsigned` flag —
/// not key secrecy — is what marks them untrusted.
const UNSIGNED_PLACEHOLDER_KEY: &[u8] = b"vaultgate-unsigned-placeholder-key-v1";

/// Upper bound on `ttl_hours` (100 years). Anything larger is an operator
/// mistake, and unbounded values would push the expiry instant out of the
/// representable time range.
pub const MAX_TTL_HOURS: u32 = 876_000;

/// Signing key material. Zeroized on drop; `Debug` never prints bytes.
#[derive(Clone, zeroize::Zeroize, zeroize::ZeroizeOnDrop)]
pub struct SigningKey(Vec<u8>);

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningKey([REDACTED])")
    }
}

/// One cryptographic proof bound to a single content digest.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttestationRecord {
    /// Hex SHA-256 digest the signature is bound to.
    pub sha256: String,
    /// Hex HMAC-SHA256 output.
    pub vaulttime: String,
    /// When the attestation was issued (UTC).
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Trust domain that issued the attestation.
    pub trust_domain: String,
    /// Hours until the proof goes stale. Always > 0.
    pub ttl_hours: u32,
    /// True when the record was produced in deterministic unsigned mode.
    pub unsigned: bool,
}

impl AttestationRecord {
    /// Instant at which this attestation stops being valid, or `None` when
    /// the TTL pushes past the representable time range.
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.timestamp
            .checked_add(Duration::hours(i64::from(self.ttl_hours)))
    }

    /// TTL check. The boundary is inclusive: at exactly
    /// `timestamp + ttl_hours` the record is already expired. An
    /// unrepresentable expiry also counts as expired (fail closed).
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at().map_or(true, |expiry| now >= expiry)
    }
}

/// Current key plus the ordered set of previous keys still accepted for
/// verification.
#[derive(Clone)]
pub struct KeyRing {
    current: SigningKey,
    previous: Vec<SigningKey>,
    unsigned: bool,
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "KeyRing {{ previous: {}, unsigned: {} }}",
            self.previous.len(),
            self.unsigned
        )
    }
}

impl KeyRing {
    /// Builds a ring from explicit key material.
    pub fn new(current: Vec<u8>, previous: Vec<Vec<u8>>) -> Self {
        Self {
            current: SigningKey(current),
            previous: previous.into_iter().map(SigningKey).collect(),
            unsigned: false,
        }
    }

    /// Deterministic unsigned mode: a fixed placeholder key, flagged as such
    /// in every record it produces.
    pub fn unsigned_fallback() -> Self {
        Self {
            current: SigningKey(UNSIGNED_PLACEHOLDER_KEY.to_vec()),
            previous: Vec::new(),
            unsigned: true,
        }
    }

    /// Reads `VAULTTIME_KEY` / `VAULTTIME_PREVIOUS_KEYS` from the
    /// environment. A missing or empty current key selects unsigned mode.
    pub fn from_env() -> Self {
        match std::env::var(VAULTTIME_KEY_ENV) {
            Ok(key) if !key.is_empty() => {
                let previous = std::env::var(VAULTTIME_PREVIOUS_KEYS_ENV)
                    .unwrap_or_default()
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(|s| s.as_bytes().to_vec())
                    .collect();
                Self::new(key.into_bytes(), previous)
            }
            _ => Self::unsigned_fallback(),
        }
    }

    /// True when this ring is running on the placeholder key.
    pub fn is_unsigned(&self) -> bool {
        self.unsigned
    }

    /// Signs a hex digest with the current key, returning lowercase hex.
    /// Deterministic for a fixed `(digest, key)` pair.
    pub fn sign(&self, sha256_hex: &str) -> String {
        hex::encode(mac_over(&self.current, sha256_hex))
    }

    /// Issues a fresh attestation for `sha256_hex`, always under the current
    /// key.
    pub fn issue(
        &self,
        sha256_hex: &str,
        trust_domain: &str,
        ttl_hours: u32,
        now: OffsetDateTime,
    ) -> AttestationRecord {
        AttestationRecord {
            sha256: sha256_hex.to_string(),
            vaulttime: self.sign(sha256_hex),
            timestamp: now,
            trust_domain: trust_domain.to_string(),
            ttl_hours,
            unsigned: self.unsigned,
        }
    }

    /// Recomputes the VaultTime for `record.sha256` against the current key
    /// and then each previous key, comparing in constant time. Returns `true`
    /// on the first key that reproduces the signature.
    pub fn verify(&self, record: &AttestationRecord) -> bool {
        let Ok(expected) = hex::decode(&record.vaulttime) else {
            return false;
        };
        std::iter::once(&self.current)
            .chain(self.previous.iter())
            .any(|key| {
                let mut mac = new_mac(key);
                mac.update(record.sha256.as_bytes());
                mac.verify_slice(&expected).is_ok()
            })
    }
}

#[allow(clippy::expect_used)]
fn new_mac(key: &SigningKey) -> HmacSha256 {
    // HMAC-SHA256 accepts keys of any length.
    HmacSha256::new_from_slice(&key.0).expect("HMAC can take key of any size")
}

fn mac_over(key: &SigningKey, message: &str) -> Vec<u8> {
    let mut mac = new_mac(key);
    mac.update(message.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Attestation records keyed by `(digest, trust_domain)` — each domain holds
/// its own proof for a digest, so per-domain TTLs cannot leak across domain
/// boundaries. Persisted as an ordered JSON list for reproducible diffs.
pub struct AttestationStore {
    records: RwLock<BTreeMap<(String, String), AttestationRecord>>,
    store_path: Option<PathBuf>,
}

impl AttestationStore {
    /// Store with no persistence. Used by tests and one-shot operations.
    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            store_path: None,
        }
    }

    /// Opens (or initializes) a store file.
    pub fn open(path: &Path) -> Result<Self> {
        let mut records = BTreeMap::new();
        if path.exists() {
            let bytes = hasher::read_validated(path, crate::ledger::MAX_STORE_BYTES)?;
            let list: Vec<AttestationRecord> = serde_json::from_slice(&bytes)
                .with_context(|| format!("parse attestation store {}", path.display()))?;
            for r in list {
                records.insert((r.sha256.clone(), r.trust_domain.clone()), r);
            }
        }
        Ok(Self {
            records: RwLock::new(records),
            store_path: Some(path.to_path_buf()),
        })
    }

    /// Looks up the attestation a trust domain holds for a digest.
    pub fn lookup(&self, sha256_hex: &str, trust_domain: &str) -> Option<AttestationRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(sha256_hex.to_string(), trust_domain.to_string()))
            .cloned()
    }

    /// Inserts or replaces the record for its `(digest, trust_domain)` key,
    /// persisting atomically.
    pub fn put(&self, record: AttestationRecord) -> Result<()> {
        let mut map = self.records.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(
            (record.sha256.clone(), record.trust_domain.clone()),
            record,
        );
        if let Some(path) = &self.store_path {
            let list: Vec<&AttestationRecord> = map.values().collect();
            hasher::write_atomic(path, &serde_json::to_vec_pretty(&list)?)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn ring() -> KeyRing {
        KeyRing::new(b"test-key".to_vec(), Vec::new())
    }

    const DIGEST: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn sign_is_deterministic() {
        let r = ring();
        assert_eq!(r.sign(DIGEST), r.sign(DIGEST));
        assert_eq!(r.sign(DIGEST).len(), 64);
    }

    #[test]
    fn sign_differs_across_keys() {
        let a = KeyRing::new(b"key-a".to_vec(), Vec::new());
        let b = KeyRing::new(b"key-b".to_vec(), Vec::new());
        assert_ne!(a.sign(DIGEST), b.sign(DIGEST));
    }

    #[test]
    fn verify_round_trip() {
        let r = ring();
        let record = r.issue(DIGEST, "runtime-core", 24, OffsetDateTime::now_utc());
        assert!(r.verify(&record));
        assert!(!record.unsigned);
    }

    #[test]
    fn verify_rejects_tampered_signature() {
        let r = ring();
        let mut record = r.issue(DIGEST, "runtime-core", 24, OffsetDateTime::now_utc());
        let flipped = if record.vaulttime.ends_with('0') { "1" } else { "0" };
        record.vaulttime.truncate(63);
        record.vaulttime.push_str(flipped);
        assert!(!r.verify(&record));
    }

    #[test]
    fn verify_rejects_non_hex_signature() {
        let r = ring();
        let mut record = r.issue(DIGEST, "runtime-core", 24, OffsetDateTime::now_utc());
        record.vaulttime = "not-hex".into();
        assert!(!r.verify(&record));
    }

    #[test]
    fn rotated_key_accepted_within_grace_window() {
        let old = KeyRing::new(b"old-key".to_vec(), Vec::new());
        let record = old.issue(DIGEST, "runtime-core", 24, OffsetDateTime::now_utc());

        let rotated = KeyRing::new(b"new-key".to_vec(), vec![b"old-key".to_vec()]);
        assert!(rotated.verify(&record));

        // New signatures come from the current key only.
        let fresh = rotated.issue(DIGEST, "runtime-core", 24, OffsetDateTime::now_utc());
        let new_only = KeyRing::new(b"new-key".to_vec(), Vec::new());
        assert!(new_only.verify(&fresh));
    }

    #[test]
    fn rotated_out_key_rejected() {
        let old = KeyRing::new(b"retired-key".to_vec(), Vec::new());
        let record = old.issue(DIGEST, "runtime-core", 24, OffsetDateTime::now_utc());

        let rotated = KeyRing::new(b"new-key".to_vec(), vec![b"other-old-key".to_vec()]);
        assert!(!rotated.verify(&record));
    }

    #[test]
    fn unsigned_fallback_is_deterministic_and_flagged() {
        let a = KeyRing::unsigned_fallback();
        let b = KeyRing::unsigned_fallback();
        assert_eq!(a.sign(DIGEST), b.sign(DIGEST));

        let record = a.issue(DIGEST, "runtime-core", 24, OffsetDateTime::now_utc());
        assert!(record.unsigned, "unsigned mode must be flagged on the record");
        assert!(a.verify(&record));
    }

    #[test]
    fn ttl_boundary_is_inclusive() {
        let issued = datetime!(2026-08-01 00:00:00 UTC);
        let record = ring().issue(DIGEST, "runtime-core", 24, issued);

        assert!(!record.is_expired(issued + Duration::hours(23)));
        // Exactly timestamp + ttl_hours counts as expired.
        assert!(record.is_expired(issued + Duration::hours(24)));
        assert!(record.is_expired(issued + Duration::hours(24) + Duration::seconds(1)));
    }

    #[test]
    fn signing_key_debug_redacts() {
        let key = SigningKey(b"secret".to_vec());
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn attestation_store_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attestations.json");

        let store = AttestationStore::open(&path).unwrap();
        let record = ring().issue(DIGEST, "runtime-core", 24, OffsetDateTime::now_utc());
        store.put(record.clone()).unwrap();

        let reopened = AttestationStore::open(&path).unwrap();
        assert_eq!(reopened.lookup(DIGEST, "runtime-core"), Some(record));
        assert_eq!(reopened.lookup("0".repeat(64).as_str(), "runtime-core"), None);
    }

    #[test]
    fn store_keeps_one_record_per_domain_for_the_same_digest() {
        let store = AttestationStore::in_memory();
        let now = OffsetDateTime::now_utc();
        store.put(ring().issue(DIGEST, "short-lived", 1, now)).unwrap();
        store.put(ring().issue(DIGEST, "long-lived", 1000, now)).unwrap();

        // The second domain's record must not displace the first's.
        assert_eq!(store.lookup(DIGEST, "short-lived").unwrap().ttl_hours, 1);
        assert_eq!(store.lookup(DIGEST, "long-lived").unwrap().ttl_hours, 1000);
        assert_eq!(store.lookup(DIGEST, "unknown"), None);
    }

    #[test]
    fn unrepresentable_expiry_counts_as_expired() {
        let now = OffsetDateTime::now_utc();
        let record = ring().issue(DIGEST, "runtime-core", u32::MAX, now);

        // The expiry instant overflows; the record must read as expired
        // rather than panic or stay valid forever.
        assert_eq!(record.expires_at(), None);
        assert!(record.is_expired(now));
    }
}
