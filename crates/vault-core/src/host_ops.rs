//! Hosts and deployments: bookkeeping plus the `ssh` / `ssh-copy-id` calls
//! that put keys on (and take them off) remote machines.

use crate::error::{Result, VaultError};
use crate::inventory::Inventory;
use crate::paths;
use crate::runner::{args, CommandRunner};
use crate::types::{DeployMethod, HostRecord, KeyRecord, DEFAULT_SSH_PORT};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Host bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct HostSpec {
    pub alias: String,
    pub hostname: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HostUpdate {
    pub hostname: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity: Option<String>,
    pub clear_identity: bool,
    pub tags: Option<Vec<String>>,
}

fn default_user() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| "root".to_string())
}

pub fn add_host(inv: &mut Inventory, spec: HostSpec, now: DateTime<Utc>) -> Result<HostRecord> {
    paths::validate_name(&spec.alias)?;
    if spec.hostname.trim().is_empty() {
        return Err(VaultError::InvalidName(spec.hostname));
    }
    let record = HostRecord {
        alias: spec.alias,
        hostname: spec.hostname.trim().to_string(),
        user: spec.user.unwrap_or_else(default_user),
        port: spec.port.unwrap_or(DEFAULT_SSH_PORT),
        identity: spec.identity,
        tags: spec.tags,
        added_at: now,
        last_checked: None,
        last_check_ok: None,
        last_check_error: None,
    };
    inv.insert_host(record.clone())?;
    info!(host = %record.alias, target = %record.ssh_target(), "added host");
    Ok(record)
}

pub fn update_host(inv: &mut Inventory, alias: &str, update: HostUpdate) -> Result<HostRecord> {
    if let Some(identity) = &update.identity {
        inv.key(identity)?;
    }
    let host = inv.host_mut(alias)?;
    if let Some(hostname) = update.hostname {
        host.hostname = hostname;
    }
    if let Some(user) = update.user {
        host.user = user;
    }
    if let Some(port) = update.port {
        host.port = port;
    }
    if update.clear_identity {
        host.identity = None;
    } else if let Some(identity) = update.identity {
        host.identity = Some(identity);
    }
    if let Some(tags) = update.tags {
        host.tags = tags;
    }
    Ok(host.clone())
}

pub fn remove_host(inv: &mut Inventory, alias: &str) -> Result<HostRecord> {
    let host = inv.remove_host(alias)?;
    info!(host = alias, "removed host");
    Ok(host)
}

// ---------------------------------------------------------------------------
// ssh invocation
// ---------------------------------------------------------------------------

/// `ssh` options shared by every remote call: never prompt, fail fast,
/// pin the port and (when known) the host's identity key.
fn ssh_base_args(inv: &Inventory, host: &HostRecord, timeout_secs: u32) -> Vec<String> {
    let mut argv = args([
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={timeout_secs}"),
        "-o".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
        "-p".to_string(),
        host.port.to_string(),
    ]);
    if let Some(identity) = host.identity.as_deref().and_then(|k| inv.find_key(k)) {
        argv.extend(args([
            "-i".to_string(),
            identity.private_key_path.display().to_string(),
            "-o".to_string(),
            "IdentitiesOnly=yes".to_string(),
        ]));
    }
    argv
}

/// Look up `name`, failing unless the key is active.
pub fn active_key<'a>(inv: &'a Inventory, name: &str) -> Result<&'a KeyRecord> {
    let key = inv.key(name)?;
    if !key.is_active() {
        return Err(VaultError::KeyNotActive {
            key: key.name.clone(),
            status: key.status.to_string(),
        });
    }
    Ok(key)
}

/// Single-quote `s` for a POSIX shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

// ---------------------------------------------------------------------------
// Connection test
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionOutcome {
    pub host: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Try a no-op command on the host and record the result on its record.
/// An unreachable host is an outcome, not an error.
pub fn test_connection(
    inv: &mut Inventory,
    runner: &dyn CommandRunner,
    alias: &str,
    timeout_secs: u32,
    now: DateTime<Utc>,
) -> Result<ConnectionOutcome> {
    let host = inv.host(alias)?.clone();
    let mut argv = ssh_base_args(inv, &host, timeout_secs);
    argv.extend(args([host.ssh_target(), "true".to_string()]));

    let out = runner.run("ssh", &argv, None)?;
    let error = (!out.success()).then(|| out.error_message());

    let rec = inv.host_mut(alias)?;
    rec.last_checked = Some(now);
    rec.last_check_ok = Some(error.is_none());
    rec.last_check_error = error.clone();
    if let Some(e) = &error {
        warn!(host = alias, error = %e, "connection test failed");
    }

    Ok(ConnectionOutcome {
        host: alias.to_string(),
        ok: error.is_none(),
        error,
    })
}

// ---------------------------------------------------------------------------
// Deploy / verify / revoke
// ---------------------------------------------------------------------------

/// Install `key` on `alias` with `ssh-copy-id`. The inventory only changes
/// when the remote side succeeded.
///
/// `auth` names the key to log in with; without it the host's identity is
/// used. Neither is passed when it is the key being installed, so
/// `ssh-copy-id` may fall back to a password prompt for a first key.
pub fn deploy(
    inv: &mut Inventory,
    runner: &dyn CommandRunner,
    key: &str,
    alias: &str,
    auth: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let rec = active_key(inv, key)?;
    let host = inv.host(alias)?;
    let auth_key = match auth {
        Some(name) => Some(inv.key(name)?),
        None => host.identity.as_deref().and_then(|id| inv.find_key(id)),
    };

    let mut argv = args([
        "-i".to_string(),
        rec.public_key_path.display().to_string(),
        "-p".to_string(),
        host.port.to_string(),
    ]);
    if let Some(identity) = auth_key.filter(|k| k.name != key) {
        argv.extend(args([
            "-o".to_string(),
            format!("IdentityFile={}", identity.private_key_path.display()),
        ]));
    }
    argv.push(host.ssh_target());

    let out = runner.run("ssh-copy-id", &argv, None)?;
    if !out.success() {
        return Err(VaultError::DeployFailed(format!(
            "{key} → {alias}: {}",
            out.error_message()
        )));
    }
    inv.record_deployment(key, alias, DeployMethod::SshCopyId, now)?;
    info!(key, host = alias, "deployed key");
    Ok(())
}

/// Record a deployment done outside the vault (e.g. pasted into a web console).
pub fn mark_deployed(inv: &mut Inventory, key: &str, alias: &str, now: DateTime<Utc>) -> Result<()> {
    active_key(inv, key)?;
    inv.record_deployment(key, alias, DeployMethod::Manual, now)?;
    info!(key, host = alias, "recorded manual deployment");
    Ok(())
}

/// Check the key is still present in the remote `authorized_keys`.
/// `Ok(false)` means the record has drifted from the host.
pub fn verify(
    inv: &mut Inventory,
    runner: &dyn CommandRunner,
    key: &str,
    alias: &str,
    timeout_secs: u32,
    now: DateTime<Utc>,
) -> Result<bool> {
    let rec = inv.key(key)?;
    let host = inv.host(alias)?;
    if inv.deployment(key, alias).is_none() {
        return Err(VaultError::DeploymentNotFound(
            key.to_string(),
            alias.to_string(),
        ));
    }

    let mut argv = ssh_base_args(inv, host, timeout_secs);
    argv.push(host.ssh_target());
    argv.push(format!(
        "grep -qF {} ~/.ssh/authorized_keys",
        shell_quote(rec.public_key_blob())
    ));

    let out = runner.run("ssh", &argv, None)?;
    match out.status {
        Some(0) => {
            inv.mark_verified(key, alias, now)?;
            Ok(true)
        }
        Some(1) => {
            warn!(key, host = alias, "key not found in remote authorized_keys");
            Ok(false)
        }
        _ => Err(VaultError::ToolFailed {
            tool: "ssh".to_string(),
            reason: out.error_message(),
        }),
    }
}

/// Remove every `authorized_keys` line carrying the key's blob, then drop
/// the deployment record. Other lines are preserved in order.
pub fn revoke(
    inv: &mut Inventory,
    runner: &dyn CommandRunner,
    key: &str,
    alias: &str,
    timeout_secs: u32,
) -> Result<()> {
    let rec = inv.key(key)?;
    let host = inv.host(alias)?;
    if inv.deployment(key, alias).is_none() {
        return Err(VaultError::DeploymentNotFound(
            key.to_string(),
            alias.to_string(),
        ));
    }

    let script = revoke_script(rec.public_key_blob());
    let mut argv = ssh_base_args(inv, host, timeout_secs);
    argv.push(host.ssh_target());
    argv.push(script);

    let out = runner.run("ssh", &argv, None)?;
    if !out.success() {
        return Err(VaultError::RevokeFailed(format!(
            "{key} ← {alias}: {}",
            out.error_message()
        )));
    }
    inv.remove_deployment(key, alias)?;
    info!(key, host = alias, "revoked key from host");
    Ok(())
}

/// Remote script dropping every `authorized_keys` line containing `blob`.
/// A grep error (status > 1) aborts before the file is replaced.
///
/// Revoking the key we log in with still works: sshd has already
/// authenticated the session before the file is rewritten.
fn revoke_script(blob: &str) -> String {
    format!(
        "f=~/.ssh/authorized_keys; [ -f \"$f\" ] || exit 0; \
         t=$(mktemp \"$f.XXXXXX\") || exit 1; \
         grep -vF {blob} \"$f\" > \"$t\"; rc=$?; \
         [ $rc -le 1 ] || {{ rm -f \"$t\"; exit $rc; }}; \
         chmod 600 \"$t\" && mv \"$t\" \"$f\"",
        blob = shell_quote(blob)
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
