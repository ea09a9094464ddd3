use crate::output::print_json;
use crate::root::Vault;
use anyhow::Context;
use clap::Subcommand;
use vault_core::config::WarnLevel;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration
    Show,

    /// Validate the config for common mistakes
    Validate,

    /// Set one config field (`none` clears optional fields)
    Set {
        /// Field name, e.g. default_ttl_days
        field: String,
        /// New value
        value: String,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(vault: &Vault, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(vault, json),
        ConfigSubcommand::Validate => validate(vault, json),
        ConfigSubcommand::Set { field, value } => set(vault, &field, &value, json),
    }
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(vault: &Vault, json: bool) -> anyhow::Result<()> {
    let config = vault.load_config()?;
    let ssh_config = vault.ssh_config_path(&config)?;

    if json {
        let value = serde_json::json!({
            "config": config,
            "effective_ssh_config": ssh_config,
        });
        print_json(&value)?;
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
        println!("# ssh_config in effect: {}", ssh_config.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(vault: &Vault, json: bool) -> anyhow::Result<()> {
    let config = vault.load_config()?;
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    let has_errors = warnings.iter().any(|w| w.level == WarnLevel::Error);
    if has_errors {
        anyhow::bail!("config validation found errors");
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// set
// ---------------------------------------------------------------------------

fn set(vault: &Vault, field: &str, value: &str, json: bool) -> anyhow::Result<()> {
    let mut config = vault.load_config()?;
    config.set(field, value)?;
    config
        .save(&vault.dir)
        .context("failed to write config.yaml")?;

    if json {
        print_json(&config)?;
    } else {
        println!("Set {field} = {value}");
        for w in config.validate() {
            if w.level == WarnLevel::Error {
                eprintln!("[error] {}", w.message);
            }
        }
    }
    Ok(())
}
