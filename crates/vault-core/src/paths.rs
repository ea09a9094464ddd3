use crate::error::{Result, VaultError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const VAULT_DIR: &str = ".ssh-vault";
pub const KEYS_DIR: &str = "keys";

pub const CONFIG_FILE: &str = "config.yaml";
pub const INVENTORY_FILE: &str = "inventory.yaml";
pub const INVENTORY_JSON_FILE: &str = "inventory.json";

pub const BACKUP_SUFFIX: &str = "vault-bak";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn default_vault_dir() -> Result<PathBuf> {
    let home = home::home_dir().ok_or(VaultError::HomeNotFound)?;
    Ok(home.join(VAULT_DIR))
}

pub fn default_ssh_config() -> Result<PathBuf> {
    let home = home::home_dir().ok_or(VaultError::HomeNotFound)?;
    Ok(home.join(".ssh").join("config"))
}

pub fn config_path(vault: &Path) -> PathBuf {
    vault.join(CONFIG_FILE)
}

/// The inventory document. YAML unless only a JSON inventory exists.
pub fn inventory_path(vault: &Path) -> PathBuf {
    let yaml = vault.join(INVENTORY_FILE);
    let json = vault.join(INVENTORY_JSON_FILE);
    if !yaml.exists() && json.exists() {
        json
    } else {
        yaml
    }
}

pub fn keys_dir(vault: &Path) -> PathBuf {
    vault.join(KEYS_DIR)
}

pub fn private_key_path(vault: &Path, name: &str) -> PathBuf {
    keys_dir(vault).join(name)
}

pub fn public_key_path(vault: &Path, name: &str) -> PathBuf {
    keys_dir(vault).join(format!("{name}.pub"))
}

/// `~/.ssh/config` → `~/.ssh/config.vault-bak`
pub fn backup_path(ssh_config: &Path) -> PathBuf {
    let mut name = ssh_config
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(BACKUP_SUFFIX);
    ssh_config.with_file_name(name)
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9\-_.]*[a-z0-9]$|^[a-z0-9]$").expect("static regex")
    })
}

/// Key names and host aliases share one rule so both are safe as file names
/// and as `Host` patterns in ssh_config.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 || !name_re().is_match(name) {
        return Err(VaultError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
