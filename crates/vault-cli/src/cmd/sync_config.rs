use crate::output::print_json;
use crate::root::Vault;
use anyhow::Context;
use vault_core::config_sync;

pub fn run(vault: &Vault, dry_run: bool, remove: bool, json: bool) -> anyhow::Result<()> {
    let config = vault.load_config()?;
    let path = vault.ssh_config_path(&config)?;

    let outcome = if remove {
        config_sync::remove_section(&path, dry_run)
    } else {
        let manager = vault.load_inventory()?;
        config_sync::sync(&path, manager.inventory(), dry_run)
    }
    .with_context(|| format!("failed to update {}", path.display()))?;

    if json {
        return print_json(&outcome);
    }

    if dry_run {
        print!("{}", outcome.content);
        eprintln!(
            "\n(dry run: {} would {}change)",
            outcome.path.display(),
            if outcome.changed { "" } else { "not " }
        );
    } else if outcome.changed {
        println!("Updated: {}", outcome.path.display());
        if let Some(b) = &outcome.backup {
            println!("  backup: {}", b.display());
        }
    } else {
        println!("Up to date: {}", outcome.path.display());
    }

    if !outcome.conflicts.is_empty() {
        eprintln!(
            "warning: also declared outside the managed section (first match wins in ssh): {}",
            outcome.conflicts.join(", ")
        );
    }
    Ok(())
}
