use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use walkdir::WalkDir;

use vaultgate::{
    audit::AuditFilter,
    config::VaultConfig,
    gate::{Decision, VerificationGate},
    lifecycle::LifecycleController,
    signer::KeyRing,
};

#[derive(Parser)]
#[command(name = "vaultgate", about = "Zero-trust artifact attestation gate", version)]
struct Cli {
    /// Pipeline config JSON (defaults to ./vaultgate.json if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Explicitly enroll an artifact into the trust ledger
    Enroll {
        /// Artifact to enroll
        path: PathBuf,

        /// Trust domain the artifact belongs to
        #[arg(long)]
        domain: String,

        /// Attestation TTL override for this enrollment
        #[arg(long)]
        ttl_hours: Option<u32>,

        /// Supersede an existing entry whose digest no longer matches
        #[arg(long)]
        force: bool,
    },

    /// Re-verify one artifact, or every ledger entry with --all
    Verify {
        /// Single artifact to verify (omit with --all)
        path: Option<PathBuf>,

        /// Verify every ledger entry and flag unenrolled incoming files
        #[arg(long)]
        all: bool,

        /// Trust domain (required for a single path; filters --all)
        #[arg(long)]
        domain: Option<String>,

        /// Fail closed if any single check exceeds this budget
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Query the append-only audit trail
    Audit {
        /// Restrict to one artifact path
        #[arg(long)]
        path: Option<String>,

        /// Restrict to one trust domain
        #[arg(long)]
        domain: Option<String>,

        /// Entries at or after this RFC 3339 instant
        #[arg(long)]
        since: Option<String>,

        /// Entries at or before this RFC 3339 instant
        #[arg(long)]
        until: Option<String>,
    },

    /// Inspect the ledger entry and attestation for one artifact
    Show {
        /// Artifact path as recorded in the ledger
        path: PathBuf,

        /// Trust domain to look in
        #[arg(long)]
        domain: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_file = cli.config.or_else(|| {
        let p = PathBuf::from("vaultgate.json");
        p.exists().then_some(p)
    });
    let config = VaultConfig::load(config_file.as_deref())?;
    // Zero-trust policy check comes before any artifact is touched.
    config.validate()?;

    let keys = KeyRing::from_env();
    if keys.is_unsigned() {
        eprintln!(
            "⚠ VAULTTIME_KEY not set; running in deterministic unsigned mode \
             (records are flagged unsigned and are not cryptographically trusted)"
        );
    }

    let controller = LifecycleController::from_config(config.clone(), keys)?;

    match cli.cmd {
        Cmd::Enroll {
            path,
            domain,
            ttl_hours,
            force,
        } => enroll(&controller, &path, &domain, ttl_hours, force),
        Cmd::Verify {
            path,
            all,
            domain,
            timeout_secs,
        } => verify(&controller, &config, path, all, domain, timeout_secs),
        Cmd::Audit {
            path,
            domain,
            since,
            until,
        } => query_audit(&controller, path, domain, since, until),
        Cmd::Show { path, domain } => show(&controller, &path, &domain),
    }
}

fn enroll(
    controller: &LifecycleController,
    path: &Path,
    domain: &str,
    ttl_hours: Option<u32>,
    force: bool,
) -> Result<()> {
    let record = controller
        .enroll(path, domain, ttl_hours, force, OffsetDateTime::now_utc())
        .map_err(|e| anyhow!("enrollment refused: {e}"))?;

    println!("✓ Enrolled {} in {domain}", path.display());
    println!("  sha256:    {}", record.sha256);
    println!("  vaulttime: {}", record.vaulttime);
    println!("  ttl_hours: {}", record.ttl_hours);
    if record.unsigned {
        eprintln!("⚠ Record is unsigned (deterministic fallback mode)");
    }
    Ok(())
}

fn verify(
    controller: &LifecycleController,
    config: &VaultConfig,
    path: Option<PathBuf>,
    all: bool,
    domain: Option<String>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let gate = VerificationGate::new(controller.clone());

    // (path, trust_domain) targets for this run.
    let targets: Vec<(PathBuf, String)> = if all {
        let mut t: Vec<(PathBuf, String)> = controller
            .ledger()
            .entries()
            .into_iter()
            .filter(|e| domain.as_deref().map_or(true, |d| e.trust_domain == d))
            .map(|e| (PathBuf::from(e.path), e.trust_domain))
            .collect();
        // Anything sitting in the incoming namespace without a ledger entry
        // is a finding, not something to skip silently. Stray detection
        // considers every ledger entry, not just the filtered view, and
        // strays always report under the "unassigned" namespace so the
        // verdict does not depend on the --domain filter.
        if config.incoming_dir.is_dir() {
            let known: Vec<PathBuf> = controller
                .ledger()
                .entries()
                .into_iter()
                .map(|e| PathBuf::from(e.path))
                .collect();
            for entry in WalkDir::new(&config.incoming_dir)
                .follow_links(false)
                .into_iter()
                .filter_map(std::result::Result::ok)
                .filter(|e| e.file_type().is_file())
            {
                let p = entry.path().to_path_buf();
                if !known.contains(&p) && !t.iter().any(|(tp, _)| *tp == p) {
                    t.push((p, "unassigned".to_string()));
                }
            }
        }
        t
    } else {
        let p = path.ok_or_else(|| anyhow!("pass an artifact path or --all"))?;
        let d = domain.ok_or_else(|| anyhow!("--domain is required for a single path"))?;
        vec![(p, d)]
    };

    let mut artifacts: Vec<Value> = Vec::new();
    let mut failed = 0usize;

    for (artifact, trust_domain) in &targets {
        let decision = match timeout_secs {
            Some(secs) => gate.admit_for_use_with_timeout(
                artifact,
                trust_domain,
                Duration::from_secs(secs),
            ),
            None => gate.admit_for_use(artifact, trust_domain, OffsetDateTime::now_utc()),
        };

        match decision {
            Decision::Allow { record } => {
                println!("✓ {} [{trust_domain}]", artifact.display());
                artifacts.push(json!({
                    "path": artifact.display().to_string(),
                    "trust_domain": trust_domain,
                    "decision": "allow",
                    "sha256": record.sha256,
                    "vaulttime": record.vaulttime,
                    "unsigned": record.unsigned,
                }));
            }
            Decision::Deny { reason } => {
                failed += 1;
                eprintln!("✗ {} [{trust_domain}]: {reason}", artifact.display());
                artifacts.push(json!({
                    "path": artifact.display().to_string(),
                    "trust_domain": trust_domain,
                    "decision": "deny",
                    "reason_code": reason.code(),
                    "reason": reason.to_string(),
                }));
            }
        }
    }

    let now = OffsetDateTime::now_utc().format(&Rfc3339)?;
    let result = if failed == 0 { "PASS" } else { "FAIL" };
    let report = json!({
        "report_schema": "vaultgate/report/v1",
        "vaultgate_version": env!("CARGO_PKG_VERSION"),
        "verified_at": now,
        "unsigned_mode": controller.keys().is_unsigned(),
        "result": result,
        "checked": targets.len(),
        "passed": targets.len() - failed,
        "failed": failed,
        "artifacts": artifacts,
    });

    let report_path = config.report_path();
    if let Some(parent) = report_path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&report_path, serde_json::to_vec_pretty(&report)?)
        .with_context(|| format!("write {}", report_path.display()))?;

    println!("→ Report: {}", report_path.display());
    if failed > 0 {
        return Err(anyhow!(
            "verification failed for {failed} of {} artifact(s)",
            targets.len()
        ));
    }
    println!("✓ All {} artifact(s) verified", targets.len());
    Ok(())
}

fn query_audit(
    controller: &LifecycleController,
    path: Option<String>,
    domain: Option<String>,
    since: Option<String>,
    until: Option<String>,
) -> Result<()> {
    let parse = |label: &str, s: Option<String>| -> Result<Option<OffsetDateTime>> {
        s.map(|v| {
            OffsetDateTime::parse(&v, &Rfc3339)
                .with_context(|| format!("--{label} must be RFC 3339: {v}"))
        })
        .transpose()
    };

    let filter = AuditFilter {
        path,
        trust_domain: domain,
        since: parse("since", since)?,
        until: parse("until", until)?,
    };

    for entry in controller.audit().query(&filter)? {
        println!("{}", serde_json::to_string(&entry)?);
    }
    Ok(())
}

fn show(controller: &LifecycleController, path: &Path, domain: &str) -> Result<()> {
    let path_str = path.to_string_lossy().to_string();
    let Some(entry) = controller.ledger().lookup(&path_str, domain) else {
        return Err(anyhow!("no ledger entry for {path_str} in {domain}"));
    };

    println!("Ledger entry:");
    println!("{}", serde_json::to_string_pretty(&entry)?);

    match controller.attestations().lookup(&entry.sha256, domain) {
        Some(record) => {
            println!("Attestation:");
            println!("{}", serde_json::to_string_pretty(&record)?);
            let now = OffsetDateTime::now_utc();
            println!(
                "Status: {}",
                if record.is_expired(now) {
                    "✗ expired (re-attestation required)"
                } else if record.unsigned {
                    "⚠ valid shape, unsigned mode (not cryptographically trusted)"
                } else {
                    "✓ current"
                }
            );
        }
        None => eprintln!("✗ No attestation record for digest {}", entry.sha256),
    }
    Ok(())
}
