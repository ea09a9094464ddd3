use crate::output::print_json;
use crate::root::Vault;
use anyhow::Context;
use chrono::Utc;
use vault_core::host_ops;
use vault_core::runner::SystemRunner;

#[derive(serde::Serialize)]
struct DeployResult<'a> {
    host: &'a str,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

// ---------------------------------------------------------------------------
// deploy
// ---------------------------------------------------------------------------

pub fn deploy(
    vault: &Vault,
    key: &str,
    hosts: &[String],
    manual: bool,
    json: bool,
) -> anyhow::Result<()> {
    let mut manager = vault.load_inventory()?;
    // Fail before touching any host when the key itself is unusable.
    host_ops::active_key(manager.inventory(), key)?;

    let mut results = Vec::new();
    for host in hosts {
        let inv = manager.inventory_mut();
        let outcome = if manual {
            host_ops::mark_deployed(inv, key, host, Utc::now())
        } else {
            host_ops::deploy(inv, &SystemRunner, key, host, None, Utc::now())
        };
        // Persist after every host so a later failure keeps earlier records.
        manager.save().context("failed to save inventory")?;

        let error = outcome.err().map(|e| e.to_string());
        if !json {
            match &error {
                None if manual => println!("{host}: recorded (manual)"),
                None => println!("{host}: deployed"),
                Some(e) => println!("{host}: FAILED: {e}"),
            }
        }
        results.push(DeployResult {
            host,
            ok: error.is_none(),
            error,
        });
    }

    if json {
        print_json(&serde_json::json!({ "key": key, "results": results }))?;
    }

    let failed = results.iter().filter(|r| !r.ok).count();
    if failed > 0 {
        anyhow::bail!("deploy failed on {failed} of {} host(s)", results.len());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// verify
// ---------------------------------------------------------------------------

pub fn verify(vault: &Vault, key: &str, host: &str, json: bool) -> anyhow::Result<()> {
    let config = vault.load_config()?;
    let mut manager = vault.load_inventory()?;
    let present = host_ops::verify(
        manager.inventory_mut(),
        &SystemRunner,
        key,
        host,
        config.connect_timeout_secs,
        Utc::now(),
    )?;
    if present {
        manager.save().context("failed to save inventory")?;
    }

    if json {
        print_json(&serde_json::json!({ "key": key, "host": host, "present": present }))?;
    } else if present {
        println!("{key} is authorized on {host}");
    }

    if !present {
        anyhow::bail!(
            "{key} is recorded as deployed on {host} but missing from its authorized_keys\n\
             Redeploy with: ssh-vault deploy {key} {host}"
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// revoke
// ---------------------------------------------------------------------------

pub fn revoke(vault: &Vault, key: &str, host: &str, json: bool) -> anyhow::Result<()> {
    let config = vault.load_config()?;
    let mut manager = vault.load_inventory()?;
    host_ops::revoke(
        manager.inventory_mut(),
        &SystemRunner,
        key,
        host,
        config.connect_timeout_secs,
    )?;
    manager.save().context("failed to save inventory")?;

    if json {
        print_json(&serde_json::json!({ "key": key, "host": host, "revoked": true }))?;
    } else {
        println!("Removed {key} from {host}");
    }
    Ok(())
}
