//! Verification gate: the mandatory entry point before any privileged use.
//!
//! Every consumer (build step, deployment, load into memory) calls
//! [`VerificationGate::admit_for_use`] before touching an artifact. The gate
//! re-runs the full pipeline — hash, ledger compare, signature check, TTL —
//! on every call; it never trusts a cached trusted state. `TrustExpired` is
//! the one reason the gate heals transparently: it re-attests once before
//! reporting a deny, because stale proof is not evidence of wrong content.

use std::{
    path::{Path, PathBuf},
    sync::mpsc,
    time::Duration,
};
use time::OffsetDateTime;

use crate::{
    audit::AuditResult,
    error::VerifyError,
    lifecycle::{coded_reason, LifecycleController},
    signer::AttestationRecord,
};

/// Gate decision. Anything that is not `Allow` is `Deny`, with a reason from
/// the pipeline's error taxonomy. There is no mode in which an unverifiable
/// artifact is used anyway.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    /// Ledger match, valid signature, TTL not elapsed.
    Allow {
        /// The attestation the decision rests on.
        record: AttestationRecord,
    },
    /// Verification failed or could not complete.
    Deny {
        /// Why the artifact was refused.
        reason: VerifyError,
    },
}

impl Decision {
    /// True for `Allow`.
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// The gate. Cheap to clone; clones share the underlying stores.
#[derive(Clone)]
pub struct VerificationGate {
    controller: LifecycleController,
}

impl VerificationGate {
    /// Wraps a lifecycle controller.
    pub fn new(controller: LifecycleController) -> Self {
        Self { controller }
    }

    /// Full re-verification of one artifact at `now`. Writes at least one
    /// audit entry regardless of outcome.
    pub fn admit_for_use(
        &self,
        artifact: &Path,
        trust_domain: &str,
        now: OffsetDateTime,
    ) -> Decision {
        match self.controller.admit(artifact, trust_domain, now) {
            Ok(record) => Decision::Allow { record },
            Err(VerifyError::TrustExpired { .. }) => {
                // Heal once: re-attest with current content and current key,
                // then report whatever that attempt produced.
                match self.controller.reattest(artifact, trust_domain, now) {
                    Ok(record) => Decision::Allow { record },
                    Err(reason) => Decision::Deny { reason },
                }
            }
            Err(reason) => Decision::Deny { reason },
        }
    }

    /// Like [`admit_for_use`](Self::admit_for_use), but bounded: if the check
    /// does not complete within `timeout`, the artifact is denied (fail
    /// closed), never allowed.
    pub fn admit_for_use_with_timeout(
        &self,
        artifact: &Path,
        trust_domain: &str,
        timeout: Duration,
    ) -> Decision {
        let (tx, rx) = mpsc::channel();
        let gate = self.clone();
        let path_str = artifact.to_string_lossy().to_string();
        let worker_path: PathBuf = artifact.to_path_buf();
        let domain = trust_domain.to_string();

        std::thread::spawn(move || {
            let decision = gate.admit_for_use(&worker_path, &domain, OffsetDateTime::now_utc());
            // Receiver may have timed out and gone away; nothing to do then.
            let _ = tx.send(decision);
        });

        match rx.recv_timeout(timeout) {
            Ok(decision) => decision,
            Err(_) => {
                let reason = VerifyError::Io(format!(
                    "verification timed out after {}ms",
                    timeout.as_millis()
                ));
                // The abandoned worker writes nothing on our behalf; the
                // timeout deny itself goes on the audit record. Best effort:
                // an unwritable audit store must not mask the deny.
                let _ = self.controller.record(
                    &path_str,
                    "",
                    "",
                    trust_domain,
                    AuditResult::Fail,
                    Some(coded_reason(&reason)),
                    OffsetDateTime::now_utc(),
                );
                Decision::Deny { reason }
            }
        }
    }
}
