//! Static security checks over the inventory.

use crate::config::{Config, RSA_HARD_FLOOR_BITS};
use crate::inventory::Inventory;
use crate::io;
use crate::types::{Expiry, KeyAlgorithm, KeyRecord, KeyStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCode {
    KeyExpired,
    KeyExpiring,
    NoExpiry,
    KeyTooOld,
    WeakAlgorithm,
    WeakKeySize,
    MissingKeyFile,
    InsecurePermissions,
    RevokedKeyDeployed,
    RotatedKeyDeployed,
    RevokedIdentity,
    UnusedKey,
    HostUnreachable,
    HostWithoutIdentity,
    InventoryInconsistent,
}

impl FindingCode {
    pub fn as_str(self) -> &'static str {
        match self {
            FindingCode::KeyExpired => "key_expired",
            FindingCode::KeyExpiring => "key_expiring",
            FindingCode::NoExpiry => "no_expiry",
            FindingCode::KeyTooOld => "key_too_old",
            FindingCode::WeakAlgorithm => "weak_algorithm",
            FindingCode::WeakKeySize => "weak_key_size",
            FindingCode::MissingKeyFile => "missing_key_file",
            FindingCode::InsecurePermissions => "insecure_permissions",
            FindingCode::RevokedKeyDeployed => "revoked_key_deployed",
            FindingCode::RotatedKeyDeployed => "rotated_key_deployed",
            FindingCode::RevokedIdentity => "revoked_identity",
            FindingCode::UnusedKey => "unused_key",
            FindingCode::HostUnreachable => "host_unreachable",
            FindingCode::HostWithoutIdentity => "host_without_identity",
            FindingCode::InventoryInconsistent => "inventory_inconsistent",
        }
    }
}

impl fmt::Display for FindingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub code: FindingCode,
    /// Key name, host alias, or `inventory`.
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct AuditSummary {
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub generated_at: DateTime<Utc>,
    pub findings: Vec<Finding>,
    pub summary: AuditSummary,
}

impl AuditReport {
    pub fn has_critical(&self) -> bool {
        self.summary.critical > 0
    }

    pub fn by_code(&self, code: FindingCode) -> Vec<&Finding> {
        self.findings.iter().filter(|f| f.code == code).collect()
    }
}

/// Thresholds the rules compare against.
#[derive(Debug, Clone, Copy)]
pub struct AuditPolicy {
    pub expiry_warning_days: u32,
    pub max_key_age_days: u32,
    pub min_rsa_bits: u32,
    /// Stat key files; off for inventories describing another machine.
    pub fs_checks: bool,
}

impl AuditPolicy {
    pub fn from_config(config: &Config, fs_checks: bool) -> Self {
        Self {
            expiry_warning_days: config.expiry_warning_days,
            max_key_age_days: config.max_key_age_days,
            min_rsa_bits: config.min_rsa_bits,
            fs_checks,
        }
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

struct Collector {
    findings: Vec<Finding>,
}

impl Collector {
    fn push(&mut self, severity: Severity, code: FindingCode, subject: &str, message: String) {
        self.findings.push(Finding {
            severity,
            code,
            subject: subject.to_string(),
            message,
        });
    }
}

pub fn audit(inv: &Inventory, policy: &AuditPolicy, now: DateTime<Utc>) -> AuditReport {
    let mut c = Collector {
        findings: Vec::new(),
    };

    for problem in inv.check() {
        c.push(
            Severity::Critical,
            FindingCode::InventoryInconsistent,
            "inventory",
            problem,
        );
    }

    for key in &inv.keys {
        check_key(&mut c, inv, key, policy, now);
    }

    for host in &inv.hosts {
        if host.last_check_ok == Some(false) {
            let detail = host
                .last_check_error
                .as_deref()
                .map(|e| format!(": {e}"))
                .unwrap_or_default();
            c.push(
                Severity::Warning,
                FindingCode::HostUnreachable,
                &host.alias,
                format!("last connection test failed{detail}"),
            );
        }
        match host.identity.as_deref().and_then(|k| inv.find_key(k)) {
            Some(key) if !key.is_active() => c.push(
                Severity::Warning,
                FindingCode::RevokedIdentity,
                &host.alias,
                format!("identity key '{}' is {}", key.name, key.status),
            ),
            Some(_) => {}
            None if host.identity.is_none() => c.push(
                Severity::Info,
                FindingCode::HostWithoutIdentity,
                &host.alias,
                "no identity key; ssh falls back to its defaults".to_string(),
            ),
            // Dangling identity is already reported by the consistency check.
            None => {}
        }
    }

    let mut findings = c.findings;
    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.subject.cmp(&b.subject))
            .then_with(|| a.code.as_str().cmp(b.code.as_str()))
    });

    let mut summary = AuditSummary::default();
    for f in &findings {
        match f.severity {
            Severity::Critical => summary.critical += 1,
            Severity::Warning => summary.warning += 1,
            Severity::Info => summary.info += 1,
        }
    }

    AuditReport {
        generated_at: now,
        findings,
        summary,
    }
}

fn check_key(
    c: &mut Collector,
    inv: &Inventory,
    key: &KeyRecord,
    policy: &AuditPolicy,
    now: DateTime<Utc>,
) {
    let name = key.name.as_str();
    let deployed_on: Vec<&str> = inv
        .deployments
        .iter()
        .filter(|d| d.key == key.name)
        .map(|d| d.host.as_str())
        .collect();

    match key.status {
        KeyStatus::Revoked if !deployed_on.is_empty() => c.push(
            Severity::Critical,
            FindingCode::RevokedKeyDeployed,
            name,
            format!("revoked key still deployed to {}", deployed_on.join(", ")),
        ),
        KeyStatus::Rotated if !deployed_on.is_empty() => c.push(
            Severity::Warning,
            FindingCode::RotatedKeyDeployed,
            name,
            format!(
                "rotated to '{}' but still deployed to {}",
                key.rotated_to.as_deref().unwrap_or("?"),
                deployed_on.join(", ")
            ),
        ),
        _ => {}
    }

    if !key.is_active() {
        return;
    }

    match key.expiry(now, policy.expiry_warning_days) {
        Expiry::Expired { days_ago } => c.push(
            Severity::Critical,
            FindingCode::KeyExpired,
            name,
            format!("expired {days_ago} day(s) ago"),
        ),
        Expiry::Expiring { days_left } => c.push(
            Severity::Warning,
            FindingCode::KeyExpiring,
            name,
            format!("expires in {days_left} day(s)"),
        ),
        Expiry::Never => c.push(
            Severity::Info,
            FindingCode::NoExpiry,
            name,
            "no expiry set".to_string(),
        ),
        Expiry::Valid { .. } => {}
    }

    let age = key.age_days(now);
    if age > i64::from(policy.max_key_age_days) {
        c.push(
            Severity::Warning,
            FindingCode::KeyTooOld,
            name,
            format!(
                "created {age} days ago (limit {} days); rotate it",
                policy.max_key_age_days
            ),
        );
    }

    match (key.algorithm, key.bits) {
        (KeyAlgorithm::Dsa, _) => c.push(
            Severity::Critical,
            FindingCode::WeakAlgorithm,
            name,
            "dsa keys are disabled by modern OpenSSH".to_string(),
        ),
        (KeyAlgorithm::Rsa, Some(bits)) if bits < RSA_HARD_FLOOR_BITS => c.push(
            Severity::Critical,
            FindingCode::WeakAlgorithm,
            name,
            format!("rsa-{bits} is below the {RSA_HARD_FLOOR_BITS}-bit floor"),
        ),
        (KeyAlgorithm::Rsa, Some(bits)) if bits < policy.min_rsa_bits => c.push(
            Severity::Warning,
            FindingCode::WeakKeySize,
            name,
            format!("rsa-{bits} is below the configured {} bits", policy.min_rsa_bits),
        ),
        _ => {}
    }

    if deployed_on.is_empty() && inv.hosts_using_identity(name).is_empty() {
        c.push(
            Severity::Info,
            FindingCode::UnusedKey,
            name,
            "not deployed anywhere and not used as a host identity".to_string(),
        );
    }

    if policy.fs_checks {
        check_key_files(c, key);
    }
}

fn check_key_files(c: &mut Collector, key: &KeyRecord) {
    let name = key.name.as_str();
    for (label, path) in [
        ("private", &key.private_key_path),
        ("public", &key.public_key_path),
    ] {
        if !path.exists() {
            c.push(
                Severity::Critical,
                FindingCode::MissingKeyFile,
                name,
                format!("{label} key file missing: {}", path.display()),
            );
        }
    }

    if let Ok(Some(mode)) = io::file_mode(&key.private_key_path) {
        if mode & 0o077 != 0 {
            c.push(
                Severity::Critical,
                FindingCode::InsecurePermissions,
                name,
                format!(
                    "private key {} has mode {mode:o}; expected 600",
                    key.private_key_path.display()
                ),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
