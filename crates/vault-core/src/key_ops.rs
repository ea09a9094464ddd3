//! Key lifecycle: generate, import, rotate, revoke, expire, remove.
//!
//! Key material is produced by `ssh-keygen`; everything recorded about it
//! (fingerprint, size, algorithm) is read back from the public half.

use crate::config::RSA_HARD_FLOOR_BITS;
use crate::error::{Result, VaultError};
use crate::inventory::Inventory;
use crate::io;
use crate::paths;
use crate::pubkey::PublicKey;
use crate::runner::{args, CommandRunner};
use crate::types::{KeyAlgorithm, KeyRecord, KeyStatus};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Requests / outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub name: String,
    pub algorithm: KeyAlgorithm,
    pub bits: Option<u32>,
    pub comment: Option<String>,
    pub ttl_days: Option<u32>,
    pub passphrase: Option<String>,
    pub tags: Vec<String>,
}

impl GenerateRequest {
    pub fn new(name: impl Into<String>, algorithm: KeyAlgorithm) -> Self {
        Self {
            name: name.into(),
            algorithm,
            bits: None,
            comment: None,
            ttl_days: None,
            passphrase: None,
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub name: String,
    pub private_key: PathBuf,
    /// Public key line; read from `<private>.pub` or derived when absent.
    pub public_key: Option<String>,
    pub ttl_days: Option<u32>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RotateRequest {
    pub name: String,
    pub new_name: Option<String>,
    pub algorithm: Option<KeyAlgorithm>,
    pub bits: Option<u32>,
    pub ttl_days: Option<u32>,
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RotationOutcome {
    pub old: String,
    pub new: KeyRecord,
    /// Hosts where the old key is deployed and the new one is not yet.
    pub hosts_to_redeploy: Vec<String>,
    /// Hosts whose identity moved from the old key to the new one.
    pub identities_switched: Vec<String>,
}

// ---------------------------------------------------------------------------
// Generate
// ---------------------------------------------------------------------------

/// Resolve and validate the size passed to `ssh-keygen -b`.
pub fn resolve_bits(algorithm: KeyAlgorithm, bits: Option<u32>) -> Result<Option<u32>> {
    match algorithm {
        KeyAlgorithm::Dsa => Err(VaultError::WeakAlgorithm(
            "dsa keys are disabled by modern OpenSSH".to_string(),
        )),
        KeyAlgorithm::Rsa => {
            let bits = bits.or(algorithm.default_bits()).unwrap_or(4096);
            if bits < RSA_HARD_FLOOR_BITS {
                return Err(VaultError::WeakAlgorithm(format!(
                    "rsa-{bits} is below the {RSA_HARD_FLOOR_BITS}-bit minimum"
                )));
            }
            Ok(Some(bits))
        }
        KeyAlgorithm::Ecdsa => match bits.or(algorithm.default_bits()) {
            Some(b @ (256 | 384 | 521)) => Ok(Some(b)),
            Some(b) => Err(VaultError::InvalidKeySize(format!(
                "ecdsa supports 256, 384 or 521 bits, got {b}"
            ))),
            None => Ok(Some(256)),
        },
        KeyAlgorithm::Ed25519 => {
            if let Some(b) = bits {
                warn!(bits = b, "ed25519 keys have a fixed size; ignoring --bits");
            }
            Ok(None)
        }
    }
}

pub fn generate(
    inv: &mut Inventory,
    runner: &dyn CommandRunner,
    vault: &Path,
    req: &GenerateRequest,
    now: DateTime<Utc>,
) -> Result<KeyRecord> {
    paths::validate_name(&req.name)?;
    if inv.find_key(&req.name).is_some() {
        return Err(VaultError::KeyExists(req.name.clone()));
    }
    let bits = resolve_bits(req.algorithm, req.bits)?;

    let private_path = paths::private_key_path(vault, &req.name);
    let public_path = paths::public_key_path(vault, &req.name);
    for p in [&private_path, &public_path] {
        if p.exists() {
            return Err(VaultError::KeyFileExists(p.display().to_string()));
        }
    }
    let keys_dir = paths::keys_dir(vault);
    io::ensure_dir(&keys_dir)?;
    io::set_mode(&keys_dir, 0o700)?;

    let comment = req
        .comment
        .clone()
        .unwrap_or_else(|| format!("{}@ssh-vault", req.name));
    let mut argv = args(["-q", "-t", req.algorithm.as_str()]);
    if let Some(b) = bits {
        argv.extend(args(["-b".to_string(), b.to_string()]));
    }
    argv.extend(args([
        "-N".to_string(),
        req.passphrase.clone().unwrap_or_default(),
        "-C".to_string(),
        comment.clone(),
        "-f".to_string(),
        private_path.display().to_string(),
    ]));

    let out = runner.run("ssh-keygen", &argv, None)?;
    if !out.success() {
        return Err(VaultError::ToolFailed {
            tool: "ssh-keygen".to_string(),
            reason: out.error_message(),
        });
    }
    io::set_mode(&private_path, 0o600)?;

    let public_line = std::fs::read_to_string(&public_path)
        .map_err(|_| VaultError::KeyFileMissing(public_path.display().to_string()))?;
    let public = PublicKey::parse(&public_line)?;

    let record = KeyRecord {
        name: req.name.clone(),
        algorithm: public.algorithm,
        bits: public.bits().ok(),
        comment,
        fingerprint: public.fingerprint(),
        private_key_path: private_path,
        public_key_path: public_path,
        public_key: public.to_line(),
        created_at: now,
        expires_at: expiry_from(now, req.ttl_days),
        status: KeyStatus::Active,
        rotated_from: None,
        rotated_to: None,
        managed: true,
        tags: req.tags.clone(),
    };
    inv.insert_key(record.clone())?;
    info!(key = %record.name, fingerprint = %record.fingerprint, "generated key");
    Ok(record)
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

pub fn import(
    inv: &mut Inventory,
    runner: &dyn CommandRunner,
    vault: &Path,
    req: &ImportRequest,
    now: DateTime<Utc>,
) -> Result<KeyRecord> {
    paths::validate_name(&req.name)?;
    if inv.find_key(&req.name).is_some() {
        return Err(VaultError::KeyExists(req.name.clone()));
    }
    if !req.private_key.is_file() {
        return Err(VaultError::KeyFileMissing(
            req.private_key.display().to_string(),
        ));
    }

    let sibling = sibling_public_path(&req.private_key);
    let (public_line, public_path) = match (&req.public_key, sibling.is_file()) {
        (Some(text), _) => (text.clone(), None),
        (None, true) => (std::fs::read_to_string(&sibling)?, Some(sibling)),
        (None, false) => (derive_public_key(runner, &req.private_key)?, None),
    };
    let public = PublicKey::parse(&public_line)?;
    let fingerprint = public.fingerprint();
    if let Some(existing) = inv.key_by_fingerprint(&fingerprint) {
        return Err(VaultError::DuplicateKeyMaterial(existing.name.clone()));
    }

    // Keep a copy of the public half in the vault when none sits next to
    // the private key, so deploys always have a file to hand to ssh-copy-id.
    let public_path = match public_path {
        Some(p) => p,
        None => {
            let p = paths::public_key_path(vault, &req.name);
            io::ensure_dir(&paths::keys_dir(vault))?;
            io::atomic_write(&p, format!("{}\n", public.to_line()).as_bytes())?;
            p
        }
    };

    // The private key's mtime is the best available creation time.
    let created_at = req
        .private_key
        .metadata()
        .ok()
        .and_then(|m| m.modified().ok())
        .map(DateTime::<Utc>::from)
        .filter(|t| *t <= now)
        .unwrap_or(now);

    let record = KeyRecord {
        name: req.name.clone(),
        algorithm: public.algorithm,
        bits: public.bits().ok(),
        comment: public.comment.clone(),
        fingerprint,
        private_key_path: absolute(&req.private_key),
        public_key_path: absolute(&public_path),
        public_key: public.to_line(),
        created_at,
        expires_at: expiry_from(created_at, req.ttl_days),
        status: KeyStatus::Active,
        rotated_from: None,
        rotated_to: None,
        managed: false,
        tags: req.tags.clone(),
    };
    inv.insert_key(record.clone())?;
    info!(key = %record.name, fingerprint = %record.fingerprint, "imported key");
    Ok(record)
}

fn sibling_public_path(private: &Path) -> PathBuf {
    let mut s = private.as_os_str().to_os_string();
    s.push(".pub");
    PathBuf::from(s)
}

fn absolute(p: &Path) -> PathBuf {
    std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf())
}

fn derive_public_key(runner: &dyn CommandRunner, private: &Path) -> Result<String> {
    let out = runner.run(
        "ssh-keygen",
        &args(["-y".to_string(), "-f".to_string(), private.display().to_string()]),
        None,
    )?;
    if !out.success() {
        return Err(VaultError::ToolFailed {
            tool: "ssh-keygen".to_string(),
            reason: out.error_message(),
        });
    }
    Ok(out.stdout)
}

// ---------------------------------------------------------------------------
// Rotate
// ---------------------------------------------------------------------------

/// `work` → `work-20260301`, then `work-20260301-2`, ... until unused.
pub fn rotation_name(inv: &Inventory, vault: &Path, name: &str, now: DateTime<Utc>) -> String {
    let base = format!("{name}-{}", now.format("%Y%m%d"));
    let taken = |candidate: &str| {
        inv.find_key(candidate).is_some() || paths::private_key_path(vault, candidate).exists()
    };
    if !taken(&base) {
        return base;
    }
    (2..)
        .map(|n| format!("{base}-{n}"))
        .find(|c| !taken(c))
        .unwrap_or(base)
}

/// Replace an active key with a fresh one. The old key is marked rotated
/// (not removed): it stays deployed until the caller redeploys and revokes.
pub fn rotate(
    inv: &mut Inventory,
    runner: &dyn CommandRunner,
    vault: &Path,
    req: &RotateRequest,
    now: DateTime<Utc>,
) -> Result<RotationOutcome> {
    let old = inv.key(&req.name)?.clone();
    if !old.is_active() {
        return Err(VaultError::KeyNotActive {
            key: old.name,
            status: old.status.to_string(),
        });
    }

    let new_name = match &req.new_name {
        Some(n) => n.clone(),
        None => rotation_name(inv, vault, &old.name, now),
    };
    let algorithm = req.algorithm.unwrap_or(old.algorithm);
    let bits = req
        .bits
        .or(if algorithm == old.algorithm { old.bits } else { None });
    let ttl_days = req
        .ttl_days
        .or_else(|| old.ttl_days().and_then(|d| u32::try_from(d).ok()));
    let comment = if old.comment.is_empty() {
        None
    } else {
        Some(old.comment.clone())
    };

    let request = GenerateRequest {
        name: new_name.clone(),
        algorithm,
        bits: if algorithm == KeyAlgorithm::Ed25519 { None } else { bits },
        comment,
        ttl_days,
        passphrase: req.passphrase.clone(),
        tags: old.tags.clone(),
    };
    generate(inv, runner, vault, &request, now)?;

    {
        let old_rec = inv.key_mut(&old.name)?;
        old_rec.status = KeyStatus::Rotated;
        old_rec.rotated_to = Some(new_name.clone());
    }
    let new_rec = {
        let rec = inv.key_mut(&new_name)?;
        rec.rotated_from = Some(old.name.clone());
        rec.clone()
    };

    let mut identities_switched = Vec::new();
    for host in inv.hosts.iter_mut() {
        if host.identity.as_deref() == Some(old.name.as_str()) {
            host.identity = Some(new_name.clone());
            identities_switched.push(host.alias.clone());
        }
    }
    let hosts_to_redeploy = inv
        .deployments_for_key(&old.name)
        .iter()
        .map(|d| d.host.clone())
        .collect();

    info!(old = %old.name, new = %new_name, "rotated key");
    Ok(RotationOutcome {
        old: old.name,
        new: new_rec,
        hosts_to_redeploy,
        identities_switched,
    })
}

// ---------------------------------------------------------------------------
// Revoke / expire / remove
// ---------------------------------------------------------------------------

/// Mark a key revoked. Returns the hosts it is still deployed on; those
/// deployments are left for `revoke <key> <host>` to remove remotely.
pub fn revoke_key(inv: &mut Inventory, name: &str) -> Result<Vec<String>> {
    let rec = inv.key_mut(name)?;
    if rec.status != KeyStatus::Revoked {
        rec.status = KeyStatus::Revoked;
        info!(key = name, "revoked key");
    }
    Ok(inv
        .deployments_for_key(name)
        .iter()
        .map(|d| d.host.clone())
        .collect())
}

/// Set (or clear, with `None`) the expiry to `ttl_days` from `now`.
pub fn set_expiry(
    inv: &mut Inventory,
    name: &str,
    ttl_days: Option<u32>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    let rec = inv.key_mut(name)?;
    rec.expires_at = expiry_from(now, ttl_days);
    Ok(rec.expires_at)
}

/// Drop a key from the inventory. With `delete_files`, vault-generated key
/// files are deleted too; for imported keys only a public copy kept under
/// the vault's `keys/` directory is deleted.
pub fn remove(
    inv: &mut Inventory,
    vault: &Path,
    name: &str,
    force: bool,
    delete_files: bool,
) -> Result<KeyRecord> {
    let rec = inv.remove_key(name, force)?;
    if delete_files {
        let keys_dir = absolute(&paths::keys_dir(vault));
        let mut doomed = vec![&rec.public_key_path];
        if rec.managed {
            doomed.push(&rec.private_key_path);
        }
        for p in doomed {
            let owned = rec.managed || p.starts_with(&keys_dir);
            if owned && p.exists() {
                std::fs::remove_file(p)?;
            }
        }
    }
    info!(key = name, delete_files, "removed key");
    Ok(rec)
}

fn expiry_from(from: DateTime<Utc>, ttl_days: Option<u32>) -> Option<DateTime<Utc>> {
    ttl_days.map(|d| from + Duration::days(i64::from(d)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
