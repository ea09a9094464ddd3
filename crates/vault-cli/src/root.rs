use anyhow::Context;
use std::path::{Path, PathBuf};
use vault_core::config::Config;
use vault_core::{paths, InventoryManager};

/// Where this invocation reads and writes.
pub struct Vault {
    pub dir: PathBuf,
    inventory: Option<PathBuf>,
    ssh_config: Option<PathBuf>,
}

/// Resolve the vault directory.
///
/// Priority:
/// 1. `--vault-dir` flag / `SSH_VAULT_DIR` env var (passed in as `explicit`)
/// 2. `~/.ssh-vault`
pub fn resolve_vault_dir(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    match explicit {
        Some(p) => Ok(p.to_path_buf()),
        None => paths::default_vault_dir().context("cannot locate the vault directory"),
    }
}

impl Vault {
    pub fn resolve(
        vault_dir: Option<&Path>,
        inventory: Option<&Path>,
        ssh_config: Option<&Path>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            dir: resolve_vault_dir(vault_dir)?,
            inventory: inventory.map(Path::to_path_buf),
            ssh_config: ssh_config.map(Path::to_path_buf),
        })
    }

    pub fn inventory_path(&self) -> PathBuf {
        self.inventory
            .clone()
            .unwrap_or_else(|| paths::inventory_path(&self.dir))
    }

    pub fn load_inventory(&self) -> anyhow::Result<InventoryManager> {
        let path = self.inventory_path();
        InventoryManager::load(&path)
            .with_context(|| format!("failed to load inventory {}", path.display()))
    }

    pub fn load_config(&self) -> anyhow::Result<Config> {
        Config::load(&self.dir).context("failed to load config")
    }

    /// `--ssh-config` wins over the `ssh_config` config field.
    pub fn ssh_config_path(&self, config: &Config) -> anyhow::Result<PathBuf> {
        match &self.ssh_config {
            Some(p) => Ok(p.clone()),
            None => Ok(config.ssh_config_path()?),
        }
    }
}
