use crate::output::print_json;
use crate::root::Vault;
use anyhow::Context;
use vault_core::{config::Config, io, paths};

pub fn run(vault: &Vault, json: bool) -> anyhow::Result<()> {
    let mut created = Vec::new();

    // 1. Vault and keys directories, owner-only
    for dir in [vault.dir.clone(), paths::keys_dir(&vault.dir)] {
        if !dir.is_dir() {
            created.push(dir.display().to_string());
        }
        io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
        io::set_mode(&dir, 0o700)?;
    }

    // 2. config.yaml if missing
    let config_path = paths::config_path(&vault.dir);
    if !config_path.exists() {
        Config::default()
            .save(&vault.dir)
            .context("failed to write config.yaml")?;
        created.push(config_path.display().to_string());
    }

    // 3. Empty inventory if missing
    let manager = vault.load_inventory()?;
    if !manager.exists() {
        manager.save().context("failed to write inventory")?;
        created.push(manager.path().display().to_string());
    }

    if json {
        print_json(&serde_json::json!({
            "vault_dir": vault.dir,
            "inventory": manager.path(),
            "created": created,
        }))?;
        return Ok(());
    }

    println!("Vault: {}", vault.dir.display());
    if created.is_empty() {
        println!("  already initialized");
    }
    for path in &created {
        println!("  created: {path}");
    }
    Ok(())
}
