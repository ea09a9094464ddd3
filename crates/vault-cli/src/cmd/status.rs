use crate::output::print_json;
use crate::root::Vault;
use chrono::Utc;
use vault_core::types::Expiry;

pub fn run(vault: &Vault, json: bool) -> anyhow::Result<()> {
    let config = vault.load_config()?;
    let manager = vault.load_inventory()?;
    let inv = manager.inventory();
    let now = Utc::now();

    let summary = inv.summary(now, config.expiry_warning_days);
    let problems = inv.check();
    let attention: Vec<(String, Expiry)> = inv
        .keys
        .iter()
        .filter(|k| k.is_active())
        .map(|k| (k.name.clone(), k.expiry(now, config.expiry_warning_days)))
        .filter(|(_, e)| matches!(e, Expiry::Expiring { .. } | Expiry::Expired { .. }))
        .collect();

    if json {
        #[derive(serde::Serialize)]
        struct KeyExpiry<'a> {
            key: &'a str,
            expiry: Expiry,
        }

        print_json(&serde_json::json!({
            "vault_dir": vault.dir,
            "inventory": manager.path(),
            "initialized": manager.exists(),
            "summary": summary,
            "expiry": attention
                .iter()
                .map(|(key, expiry)| KeyExpiry { key, expiry: *expiry })
                .collect::<Vec<_>>(),
            "problems": problems,
        }))?;
        return Ok(());
    }

    println!("Vault:     {}", vault.dir.display());
    println!("Inventory: {}", manager.path().display());
    if !manager.exists() {
        println!("\nNot initialized. Run: ssh-vault init");
        return Ok(());
    }

    println!();
    println!(
        "Keys:        {} active, {} rotated, {} revoked",
        summary.keys_active, summary.keys_rotated, summary.keys_revoked
    );
    println!(
        "Expiry:      {} expiring, {} expired",
        summary.keys_expiring, summary.keys_expired
    );
    println!(
        "Hosts:       {} ({} unreachable at last check)",
        summary.hosts, summary.hosts_unreachable
    );
    println!("Deployments: {}", summary.deployments);

    if !attention.is_empty() {
        println!("\nNeeds attention:");
        for (key, expiry) in &attention {
            match expiry {
                Expiry::Expiring { days_left } => {
                    println!("  {key}: expires in {days_left} day(s)")
                }
                Expiry::Expired { days_ago } => println!("  {key}: expired {days_ago} day(s) ago"),
                _ => {}
            }
        }
    }

    if !problems.is_empty() {
        println!("\nInventory problems:");
        for p in &problems {
            println!("  {p}");
        }
    }
    Ok(())
}
