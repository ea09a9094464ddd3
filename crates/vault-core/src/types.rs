use crate::error::VaultError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// KeyAlgorithm
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    Ed25519,
    Ecdsa,
    Rsa,
    Dsa,
}

impl KeyAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyAlgorithm::Ed25519 => "ed25519",
            KeyAlgorithm::Ecdsa => "ecdsa",
            KeyAlgorithm::Rsa => "rsa",
            KeyAlgorithm::Dsa => "dsa",
        }
    }

    /// Map an OpenSSH public key type (`ssh-ed25519`, `ecdsa-sha2-nistp256`, ...).
    pub fn from_openssh_type(key_type: &str) -> Option<Self> {
        match key_type {
            "ssh-ed25519" => Some(KeyAlgorithm::Ed25519),
            "ssh-rsa" => Some(KeyAlgorithm::Rsa),
            "ssh-dss" => Some(KeyAlgorithm::Dsa),
            t if t.starts_with("ecdsa-sha2-") => Some(KeyAlgorithm::Ecdsa),
            _ => None,
        }
    }

    /// Bits passed to `ssh-keygen -b` when the caller does not choose.
    pub fn default_bits(self) -> Option<u32> {
        match self {
            KeyAlgorithm::Rsa => Some(4096),
            KeyAlgorithm::Ecdsa => Some(256),
            KeyAlgorithm::Ed25519 | KeyAlgorithm::Dsa => None,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KeyAlgorithm {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ed25519" => Ok(KeyAlgorithm::Ed25519),
            "ecdsa" => Ok(KeyAlgorithm::Ecdsa),
            "rsa" => Ok(KeyAlgorithm::Rsa),
            "dsa" => Ok(KeyAlgorithm::Dsa),
            other => KeyAlgorithm::from_openssh_type(other)
                .ok_or_else(|| VaultError::UnknownAlgorithm(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// KeyStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    #[default]
    Active,
    Rotated,
    Revoked,
}

impl KeyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Rotated => "rotated",
            KeyStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// KeyRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyRecord {
    pub name: String,
    pub algorithm: KeyAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bits: Option<u32>,
    #[serde(default)]
    pub comment: String,
    pub fingerprint: String,
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
    pub public_key: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: KeyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotated_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotated_to: Option<String>,
    /// Files were generated by the vault under `keys/` and may be deleted by it.
    #[serde(default)]
    pub managed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl KeyRecord {
    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }

    pub fn expiry(&self, now: DateTime<Utc>, warn_days: u32) -> Expiry {
        Expiry::evaluate(self.expires_at, now, warn_days)
    }

    /// Original lifetime in days, if the key has an expiry.
    pub fn ttl_days(&self) -> Option<i64> {
        self.expires_at
            .map(|exp| (exp - self.created_at).num_days())
            .filter(|d| *d > 0)
    }

    /// The base64 blob field of the public key line.
    pub fn public_key_blob(&self) -> &str {
        self.public_key
            .split_whitespace()
            .nth(1)
            .unwrap_or(self.public_key.as_str())
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }
}

// ---------------------------------------------------------------------------
// HostRecord
// ---------------------------------------------------------------------------

pub const DEFAULT_SSH_PORT: u16 = 22;

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostRecord {
    pub alias: String,
    pub hostname: String,
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Key name used as `IdentityFile` for this host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub added_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check_ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check_error: Option<String>,
}

impl HostRecord {
    pub fn ssh_target(&self) -> String {
        format!("{}@{}", self.user, self.hostname)
    }
}

// ---------------------------------------------------------------------------
// Deployment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployMethod {
    SshCopyId,
    Manual,
}

impl fmt::Display for DeployMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployMethod::SshCopyId => f.write_str("ssh-copy-id"),
            DeployMethod::Manual => f.write_str("manual"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub key: String,
    pub host: String,
    pub deployed_at: DateTime<Utc>,
    pub method: DeployMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Expiry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Expiry {
    Never,
    Valid { days_left: i64 },
    Expiring { days_left: i64 },
    Expired { days_ago: i64 },
}

impl Expiry {
    pub fn evaluate(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>, warn_days: u32) -> Self {
        let Some(exp) = expires_at else {
            return Expiry::Never;
        };
        if exp <= now {
            return Expiry::Expired {
                days_ago: (now - exp).num_days(),
            };
        }
        let left = exp - now;
        if left < Duration::days(i64::from(warn_days)) {
            Expiry::Expiring {
                days_left: left.num_days(),
            }
        } else {
            Expiry::Valid {
                days_left: left.num_days(),
            }
        }
    }

    pub fn is_expired(self) -> bool {
        matches!(self, Expiry::Expired { .. })
    }
}

impl fmt::Display for Expiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expiry::Never => f.write_str("never"),
            Expiry::Valid { days_left } => write!(f, "{days_left}d"),
            Expiry::Expiring { days_left } => write!(f, "{days_left}d (soon)"),
            Expiry::Expired { days_ago } => write!(f, "expired {days_ago}d ago"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
