//! The inventory document: managed keys, known hosts, and which key is
//! deployed where.
//!
//! Stored as a single YAML (or JSON, by extension) file. There is no locking;
//! the last writer wins.

use crate::error::{Result, VaultError};
use crate::io;
use crate::types::{DeployMethod, Deployment, Expiry, HostRecord, KeyRecord, KeyStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const INVENTORY_VERSION: u32 = 1;

fn default_version() -> u32 {
    INVENTORY_VERSION
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Inventory {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub keys: Vec<KeyRecord>,
    #[serde(default)]
    pub hosts: Vec<HostRecord>,
    #[serde(default)]
    pub deployments: Vec<Deployment>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self {
            version: INVENTORY_VERSION,
            keys: Vec::new(),
            hosts: Vec::new(),
            deployments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct InventorySummary {
    pub keys_active: usize,
    pub keys_rotated: usize,
    pub keys_revoked: usize,
    pub keys_expiring: usize,
    pub keys_expired: usize,
    pub hosts: usize,
    pub hosts_unreachable: usize,
    pub deployments: usize,
}

impl Inventory {
    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn find_key(&self, name: &str) -> Option<&KeyRecord> {
        self.keys.iter().find(|k| k.name == name)
    }

    pub fn key(&self, name: &str) -> Result<&KeyRecord> {
        self.find_key(name)
            .ok_or_else(|| VaultError::KeyNotFound(name.to_string()))
    }

    pub fn key_mut(&mut self, name: &str) -> Result<&mut KeyRecord> {
        self.keys
            .iter_mut()
            .find(|k| k.name == name)
            .ok_or_else(|| VaultError::KeyNotFound(name.to_string()))
    }

    pub fn find_host(&self, alias: &str) -> Option<&HostRecord> {
        self.hosts.iter().find(|h| h.alias == alias)
    }

    pub fn host(&self, alias: &str) -> Result<&HostRecord> {
        self.find_host(alias)
            .ok_or_else(|| VaultError::HostNotFound(alias.to_string()))
    }

    pub fn host_mut(&mut self, alias: &str) -> Result<&mut HostRecord> {
        self.hosts
            .iter_mut()
            .find(|h| h.alias == alias)
            .ok_or_else(|| VaultError::HostNotFound(alias.to_string()))
    }

    pub fn key_by_fingerprint(&self, fingerprint: &str) -> Option<&KeyRecord> {
        self.keys.iter().find(|k| k.fingerprint == fingerprint)
    }

    pub fn deployment(&self, key: &str, host: &str) -> Option<&Deployment> {
        self.deployments
            .iter()
            .find(|d| d.key == key && d.host == host)
    }

    pub fn deployments_for_key(&self, key: &str) -> Vec<&Deployment> {
        self.deployments.iter().filter(|d| d.key == key).collect()
    }

    pub fn deployments_for_host(&self, host: &str) -> Vec<&Deployment> {
        self.deployments.iter().filter(|d| d.host == host).collect()
    }

    pub fn hosts_using_identity(&self, key: &str) -> Vec<&HostRecord> {
        self.hosts
            .iter()
            .filter(|h| h.identity.as_deref() == Some(key))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    pub fn insert_key(&mut self, record: KeyRecord) -> Result<()> {
        if self.find_key(&record.name).is_some() {
            return Err(VaultError::KeyExists(record.name));
        }
        self.keys.push(record);
        Ok(())
    }

    pub fn insert_host(&mut self, record: HostRecord) -> Result<()> {
        if self.find_host(&record.alias).is_some() {
            return Err(VaultError::HostExists(record.alias));
        }
        if let Some(identity) = &record.identity {
            self.key(identity)?;
        }
        self.hosts.push(record);
        Ok(())
    }

    /// Remove a key. Without `force`, refuses while any deployment or host
    /// identity still points at it; with `force`, those references are dropped.
    pub fn remove_key(&mut self, name: &str, force: bool) -> Result<KeyRecord> {
        let idx = self
            .keys
            .iter()
            .position(|k| k.name == name)
            .ok_or_else(|| VaultError::KeyNotFound(name.to_string()))?;

        if !force {
            let deployed: Vec<&str> = self
                .deployments
                .iter()
                .filter(|d| d.key == name)
                .map(|d| d.host.as_str())
                .collect();
            if !deployed.is_empty() {
                return Err(VaultError::KeyInUse {
                    key: name.to_string(),
                    reason: format!("deployed to {}", deployed.join(", ")),
                });
            }
            let identities: Vec<&str> = self
                .hosts
                .iter()
                .filter(|h| h.identity.as_deref() == Some(name))
                .map(|h| h.alias.as_str())
                .collect();
            if !identities.is_empty() {
                return Err(VaultError::KeyInUse {
                    key: name.to_string(),
                    reason: format!("identity for {}", identities.join(", ")),
                });
            }
        }

        self.deployments.retain(|d| d.key != name);
        for host in self.hosts.iter_mut() {
            if host.identity.as_deref() == Some(name) {
                host.identity = None;
            }
        }
        for key in self.keys.iter_mut() {
            if key.rotated_from.as_deref() == Some(name) {
                key.rotated_from = None;
            }
            if key.rotated_to.as_deref() == Some(name) {
                key.rotated_to = None;
            }
        }
        Ok(self.keys.remove(idx))
    }

    /// Remove a host along with every deployment recorded against it.
    pub fn remove_host(&mut self, alias: &str) -> Result<HostRecord> {
        let idx = self
            .hosts
            .iter()
            .position(|h| h.alias == alias)
            .ok_or_else(|| VaultError::HostNotFound(alias.to_string()))?;
        self.deployments.retain(|d| d.host != alias);
        Ok(self.hosts.remove(idx))
    }

    /// Record `key` as deployed on `host`. Re-deploying refreshes the
    /// timestamp and method and clears any earlier verification.
    pub fn record_deployment(
        &mut self,
        key: &str,
        host: &str,
        method: DeployMethod,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.key(key)?;
        self.host(host)?;
        if let Some(existing) = self
            .deployments
            .iter_mut()
            .find(|d| d.key == key && d.host == host)
        {
            existing.deployed_at = now;
            existing.method = method;
            existing.verified_at = None;
            return Ok(());
        }
        self.deployments.push(Deployment {
            key: key.to_string(),
            host: host.to_string(),
            deployed_at: now,
            method,
            verified_at: None,
        });
        Ok(())
    }

    pub fn remove_deployment(&mut self, key: &str, host: &str) -> Result<Deployment> {
        let idx = self
            .deployments
            .iter()
            .position(|d| d.key == key && d.host == host)
            .ok_or_else(|| VaultError::DeploymentNotFound(key.to_string(), host.to_string()))?;
        Ok(self.deployments.remove(idx))
    }

    pub fn mark_verified(&mut self, key: &str, host: &str, now: DateTime<Utc>) -> Result<()> {
        let dep = self
            .deployments
            .iter_mut()
            .find(|d| d.key == key && d.host == host)
            .ok_or_else(|| VaultError::DeploymentNotFound(key.to_string(), host.to_string()))?;
        dep.verified_at = Some(now);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Consistency
    // -----------------------------------------------------------------------

    /// Report relationship violations, typically from a hand-edited file.
    /// Mutations through this type never introduce them.
    pub fn check(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for (i, key) in self.keys.iter().enumerate() {
            if self.keys[..i].iter().any(|k| k.name == key.name) {
                problems.push(format!("duplicate key name '{}'", key.name));
            }
            for (field, target) in [("rotated_from", &key.rotated_from), ("rotated_to", &key.rotated_to)] {
                if let Some(target) = target {
                    if self.find_key(target).is_none() {
                        problems.push(format!(
                            "key '{}' has {field} '{target}' which is not in the inventory",
                            key.name
                        ));
                    }
                }
            }
        }

        for (i, host) in self.hosts.iter().enumerate() {
            if self.hosts[..i].iter().any(|h| h.alias == host.alias) {
                problems.push(format!("duplicate host alias '{}'", host.alias));
            }
            if let Some(identity) = &host.identity {
                if self.find_key(identity).is_none() {
                    problems.push(format!(
                        "host '{}' uses identity '{identity}' which is not in the inventory",
                        host.alias
                    ));
                }
            }
        }

        for (i, dep) in self.deployments.iter().enumerate() {
            if self.find_key(&dep.key).is_none() {
                problems.push(format!(
                    "deployment of unknown key '{}' to '{}'",
                    dep.key, dep.host
                ));
            }
            if self.find_host(&dep.host).is_none() {
                problems.push(format!(
                    "deployment of '{}' to unknown host '{}'",
                    dep.key, dep.host
                ));
            }
            if self.deployments[..i]
                .iter()
                .any(|d| d.key == dep.key && d.host == dep.host)
            {
                problems.push(format!(
                    "duplicate deployment of '{}' to '{}'",
                    dep.key, dep.host
                ));
            }
        }

        problems
    }

    pub fn summary(&self, now: DateTime<Utc>, warn_days: u32) -> InventorySummary {
        let mut s = InventorySummary {
            hosts: self.hosts.len(),
            deployments: self.deployments.len(),
            ..Default::default()
        };
        for key in &self.keys {
            match key.status {
                KeyStatus::Active => {
                    s.keys_active += 1;
                    match key.expiry(now, warn_days) {
                        Expiry::Expiring { .. } => s.keys_expiring += 1,
                        Expiry::Expired { .. } => s.keys_expired += 1,
                        Expiry::Never | Expiry::Valid { .. } => {}
                    }
                }
                KeyStatus::Rotated => s.keys_rotated += 1,
                KeyStatus::Revoked => s.keys_revoked += 1,
            }
        }
        s.hosts_unreachable = self
            .hosts
            .iter()
            .filter(|h| h.last_check_ok == Some(false))
            .count();
        s
    }
}

// ---------------------------------------------------------------------------
// InventoryManager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryFormat {
    Yaml,
    Json,
}

impl InventoryFormat {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => InventoryFormat::Json,
            _ => InventoryFormat::Yaml,
        }
    }
}

/// Binds an [`Inventory`] to the file it was loaded from.
#[derive(Debug)]
pub struct InventoryManager {
    path: PathBuf,
    format: InventoryFormat,
    inventory: Inventory,
}

impl InventoryManager {
    /// Load the document at `path`. A missing file is an empty inventory.
    pub fn load(path: &Path) -> Result<Self> {
        let format = InventoryFormat::for_path(path);
        let inventory = match io::read_optional(path)? {
            None => Inventory::default(),
            Some(data) if data.trim().is_empty() => Inventory::default(),
            Some(data) => match format {
                InventoryFormat::Yaml => serde_yaml::from_str(&data)?,
                InventoryFormat::Json => serde_json::from_str(&data)?,
            },
        };
        Ok(Self {
            path: path.to_path_buf(),
            format,
            inventory,
        })
    }

    pub fn save(&self) -> Result<()> {
        let data = match self.format {
            InventoryFormat::Yaml => serde_yaml::to_string(&self.inventory)?,
            InventoryFormat::Json => {
                let mut s = serde_json::to_string_pretty(&self.inventory)?;
                s.push('\n');
                s
            }
        };
        io::atomic_write_private(&self.path, data.as_bytes(), 0o600)?;
        info!(
            path = %self.path.display(),
            keys = self.inventory.keys.len(),
            hosts = self.inventory.hosts.len(),
            "inventory saved"
        );
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> InventoryFormat {
        self.format
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn inventory_mut(&mut self) -> &mut Inventory {
        &mut self.inventory
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
