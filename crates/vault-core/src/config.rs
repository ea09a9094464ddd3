use crate::error::{Result, VaultError};
use crate::io;
use crate::paths;
use crate::types::KeyAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_algorithm() -> KeyAlgorithm {
    KeyAlgorithm::Ed25519
}

fn default_expiry_warning_days() -> u32 {
    14
}

fn default_max_key_age_days() -> u32 {
    365
}

fn default_min_rsa_bits() -> u32 {
    3072
}

fn default_connect_timeout() -> u32 {
    10
}

/// Below this no key is generated, and audit flags existing ones as critical.
pub const RSA_HARD_FLOOR_BITS: u32 = 2048;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_algorithm")]
    pub default_algorithm: KeyAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ttl_days: Option<u32>,
    #[serde(default = "default_expiry_warning_days")]
    pub expiry_warning_days: u32,
    #[serde(default = "default_max_key_age_days")]
    pub max_key_age_days: u32,
    #[serde(default = "default_min_rsa_bits")]
    pub min_rsa_bits: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u32,
    /// Overrides `~/.ssh/config` as the sync target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_config: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_algorithm: default_algorithm(),
            default_ttl_days: None,
            expiry_warning_days: default_expiry_warning_days(),
            max_key_age_days: default_max_key_age_days(),
            min_rsa_bits: default_min_rsa_bits(),
            connect_timeout_secs: default_connect_timeout(),
            ssh_config: None,
        }
    }
}

impl Config {
    /// Settable field names, in display order.
    pub const FIELDS: &'static [&'static str] = &[
        "default_algorithm",
        "default_ttl_days",
        "expiry_warning_days",
        "max_key_age_days",
        "min_rsa_bits",
        "connect_timeout_secs",
        "ssh_config",
    ];

    /// Load `<vault>/config.yaml`; a missing file yields defaults.
    pub fn load(vault: &Path) -> Result<Self> {
        let path = paths::config_path(vault);
        match io::read_optional(&path)? {
            Some(data) if !data.trim().is_empty() => Ok(serde_yaml::from_str(&data)?),
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, vault: &Path) -> Result<()> {
        let path = paths::config_path(vault);
        let data = serde_yaml::to_string(self)?;
        io::atomic_write(&path, data.as_bytes())
    }

    pub fn ssh_config_path(&self) -> Result<PathBuf> {
        match &self.ssh_config {
            Some(p) => Ok(p.clone()),
            None => paths::default_ssh_config(),
        }
    }

    /// Set one field from its string form. `none` clears optional fields.
    pub fn set(&mut self, field: &str, value: &str) -> Result<()> {
        let bad = |reason: &str| VaultError::InvalidConfigValue {
            field: field.to_string(),
            reason: reason.to_string(),
        };
        let number = |v: &str| v.parse::<u32>().map_err(|_| bad("expected a whole number"));
        let clear = value.eq_ignore_ascii_case("none");

        match field {
            "default_algorithm" => self.default_algorithm = value.parse()?,
            "default_ttl_days" => {
                self.default_ttl_days = if clear { None } else { Some(number(value)?) }
            }
            "expiry_warning_days" => self.expiry_warning_days = number(value)?,
            "max_key_age_days" => self.max_key_age_days = number(value)?,
            "min_rsa_bits" => self.min_rsa_bits = number(value)?,
            "connect_timeout_secs" => self.connect_timeout_secs = number(value)?,
            "ssh_config" => {
                self.ssh_config = if clear {
                    None
                } else {
                    Some(PathBuf::from(value))
                }
            }
            _ => {
                return Err(bad(&format!(
                    "unknown field (expected one of: {})",
                    Self::FIELDS.join(", ")
                )))
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut push = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message })
        };

        if self.min_rsa_bits < RSA_HARD_FLOOR_BITS {
            push(
                WarnLevel::Error,
                format!(
                    "min_rsa_bits={} is below the {RSA_HARD_FLOOR_BITS}-bit floor",
                    self.min_rsa_bits
                ),
            );
        }

        if self.connect_timeout_secs == 0 {
            push(
                WarnLevel::Error,
                "connect_timeout_secs must be greater than zero".to_string(),
            );
        }

        if self.default_algorithm == KeyAlgorithm::Dsa {
            push(
                WarnLevel::Error,
                "default_algorithm 'dsa' is refused by key generation".to_string(),
            );
        }

        if let Some(ttl) = self.default_ttl_days {
            if ttl == 0 {
                push(
                    WarnLevel::Error,
                    "default_ttl_days=0 would create keys that are already expired".to_string(),
                );
            } else if ttl <= self.expiry_warning_days {
                push(
                    WarnLevel::Warning,
                    format!(
                        "default_ttl_days={ttl} is inside the {}-day expiry warning window; \
                         new keys will be flagged immediately",
                        self.expiry_warning_days
                    ),
                );
            }
        }

        if self.expiry_warning_days >= self.max_key_age_days {
            push(
                WarnLevel::Warning,
                format!(
                    "expiry_warning_days={} is not shorter than max_key_age_days={}",
                    self.expiry_warning_days, self.max_key_age_days
                ),
            );
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.expiry_warning_days, 14);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.yaml"), "default_ttl_days: 90\n").unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.default_ttl_days, Some(90));
        assert_eq!(cfg.min_rsa_bits, 3072);
    }

    #[test]
    fn save_and_reload() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.set("default_algorithm", "rsa").unwrap();
        cfg.set("ssh_config", "/tmp/ssh_config").unwrap();
        cfg.save(dir.path()).unwrap();
        assert_eq!(Config::load(dir.path()).unwrap(), cfg);
    }

    #[test]
    fn set_rejects_unknown_field_and_bad_numbers() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.set("colour", "blue"),
            Err(VaultError::InvalidConfigValue { .. })
        ));
        assert!(cfg.set("max_key_age_days", "a year").is_err());
        assert!(cfg.set("default_algorithm", "rot13").is_err());
    }

    #[test]
    fn set_none_clears_optional() {
        let mut cfg = Config::default();
        cfg.set("default_ttl_days", "30").unwrap();
        cfg.set("default_ttl_days", "none").unwrap();
        assert_eq!(cfg.default_ttl_days, None);
    }

    #[test]
    fn default_config_is_clean() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn validate_flags_errors_and_warnings() {
        let cfg = Config {
            min_rsa_bits: 1024,
            connect_timeout_secs: 0,
            default_ttl_days: Some(7),
            ..Default::default()
        };
        let warnings = cfg.validate();
        let errors = warnings
            .iter()
            .filter(|w| w.level == WarnLevel::Error)
            .count();
        assert_eq!(errors, 2);
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("default_ttl_days=7")));
    }
}
