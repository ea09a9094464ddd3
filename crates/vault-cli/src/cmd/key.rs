use crate::output::{date, or_dash, print_json, print_table};
use crate::root::Vault;
use anyhow::Context;
use chrono::Utc;
use clap::Subcommand;
use std::path::PathBuf;
use tracing::warn;
use vault_core::config::Config;
use vault_core::key_ops::{self, GenerateRequest, ImportRequest, RotateRequest};
use vault_core::runner::SystemRunner;
use vault_core::types::{KeyAlgorithm, KeyRecord};
use vault_core::{host_ops, InventoryManager};

// ---------------------------------------------------------------------------
// Subcommand tree
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum KeySubcommand {
    /// Generate a new key pair with ssh-keygen
    Generate {
        /// Key name (lowercase letters, digits, '-', '_', '.')
        name: String,
        /// Algorithm: ed25519, ecdsa, or rsa (default: config default_algorithm)
        #[arg(long = "type", value_name = "TYPE")]
        key_type: Option<String>,
        /// Key size in bits (rsa: >= 2048; ecdsa: 256, 384, or 521)
        #[arg(long)]
        bits: Option<u32>,
        /// Key comment (default: <name>@ssh-vault)
        #[arg(long)]
        comment: Option<String>,
        /// Days until the key expires (default: config default_ttl_days)
        #[arg(long)]
        ttl_days: Option<u32>,
        /// Passphrase for the private key (default: none)
        #[arg(long, env = "SSH_VAULT_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,
        /// Free-form tag; repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Bring an existing key pair under management
    Import {
        /// Key name to record it under
        name: String,
        /// Path to the private key
        #[arg(long = "private", value_name = "PATH")]
        private_key: PathBuf,
        /// Public key line (default: <private>.pub, else derived with ssh-keygen -y)
        #[arg(long)]
        public_key: Option<String>,
        /// Days until the key expires
        #[arg(long)]
        ttl_days: Option<u32>,
        /// Free-form tag; repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// List keys
    List,
    /// Show one key and where it is deployed
    Show { name: String },
    /// Replace an active key with a fresh one
    ///
    /// The old key is marked rotated and stays deployed until revoked.
    Rotate {
        name: String,
        /// Name for the replacement (default: <name>-YYYYMMDD)
        #[arg(long)]
        new_name: Option<String>,
        /// Algorithm for the replacement (default: same as the old key)
        #[arg(long = "type", value_name = "TYPE")]
        key_type: Option<String>,
        #[arg(long)]
        bits: Option<u32>,
        #[arg(long)]
        ttl_days: Option<u32>,
        #[arg(long, env = "SSH_VAULT_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,
        /// Deploy the replacement to every host carrying the old key
        #[arg(long)]
        deploy: bool,
        /// After each successful deploy, remove the old key from that host
        #[arg(long, requires = "deploy")]
        revoke_old: bool,
    },
    /// Mark a key revoked (deployments stay until `ssh-vault revoke`)
    Revoke { name: String },
    /// Set or clear a key's expiry
    Expire {
        name: String,
        /// Expire this many days from now
        #[arg(long, conflicts_with = "never", required_unless_present = "never")]
        ttl_days: Option<u32>,
        /// Remove the expiry
        #[arg(long)]
        never: bool,
    },
    /// Remove a key from the inventory
    Remove {
        name: String,
        /// Remove even if deployed or used as a host identity
        #[arg(long)]
        force: bool,
        /// Also delete key files the vault owns
        #[arg(long)]
        delete_files: bool,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(vault: &Vault, subcommand: KeySubcommand, json: bool) -> anyhow::Result<()> {
    match subcommand {
        KeySubcommand::Generate {
            name,
            key_type,
            bits,
            comment,
            ttl_days,
            passphrase,
            tags,
        } => {
            let config = vault.load_config()?;
            let algorithm = parse_algorithm(key_type.as_deref(), config.default_algorithm)?;
            let request = GenerateRequest {
                bits,
                comment,
                ttl_days: ttl_days.or(config.default_ttl_days),
                passphrase,
                tags,
                ..GenerateRequest::new(name, algorithm)
            };
            warn_below_policy(&config, algorithm, bits);

            let mut manager = vault.load_inventory()?;
            let rec = key_ops::generate(
                manager.inventory_mut(),
                &SystemRunner,
                &vault.dir,
                &request,
                Utc::now(),
            )?;
            manager.save().context("failed to save inventory")?;
            report_key(&rec, "Generated", json)
        }
        KeySubcommand::Import {
            name,
            private_key,
            public_key,
            ttl_days,
            tags,
        } => {
            let mut manager = vault.load_inventory()?;
            let request = ImportRequest {
                name,
                private_key,
                public_key,
                ttl_days,
                tags,
            };
            let rec = key_ops::import(
                manager.inventory_mut(),
                &SystemRunner,
                &vault.dir,
                &request,
                Utc::now(),
            )?;
            manager.save().context("failed to save inventory")?;
            report_key(&rec, "Imported", json)
        }
        KeySubcommand::List => list(vault, json),
        KeySubcommand::Show { name } => show(vault, &name, json),
        KeySubcommand::Rotate {
            name,
            new_name,
            key_type,
            bits,
            ttl_days,
            passphrase,
            deploy,
            revoke_old,
        } => {
            let algorithm = key_type
                .as_deref()
                .map(str::parse::<KeyAlgorithm>)
                .transpose()?;
            let request = RotateRequest {
                name,
                new_name,
                algorithm,
                bits,
                ttl_days,
                passphrase,
            };
            rotate(vault, &request, deploy, revoke_old, json)
        }
        KeySubcommand::Revoke { name } => {
            let mut manager = vault.load_inventory()?;
            let hosts = key_ops::revoke_key(manager.inventory_mut(), &name)?;
            manager.save().context("failed to save inventory")?;

            if json {
                print_json(&serde_json::json!({ "key": name, "still_deployed_on": hosts }))?;
            } else {
                println!("Revoked: {name}");
                if !hosts.is_empty() {
                    println!("\nStill deployed on:");
                    for h in &hosts {
                        println!("  {h}    (ssh-vault revoke {name} {h})");
                    }
                }
            }
            Ok(())
        }
        KeySubcommand::Expire {
            name,
            ttl_days,
            never,
        } => {
            let ttl = if never { None } else { ttl_days };
            let mut manager = vault.load_inventory()?;
            let expires_at = key_ops::set_expiry(manager.inventory_mut(), &name, ttl, Utc::now())?;
            manager.save().context("failed to save inventory")?;

            if json {
                print_json(&serde_json::json!({ "key": name, "expires_at": expires_at }))?;
            } else {
                match expires_at {
                    Some(at) => println!("{name} expires {}", at.format("%Y-%m-%d %H:%M UTC")),
                    None => println!("{name} no longer expires"),
                }
            }
            Ok(())
        }
        KeySubcommand::Remove {
            name,
            force,
            delete_files,
        } => {
            let mut manager = vault.load_inventory()?;
            let rec = key_ops::remove(
                manager.inventory_mut(),
                &vault.dir,
                &name,
                force,
                delete_files,
            )?;
            manager.save().context("failed to save inventory")?;

            if json {
                print_json(&rec)?;
            } else {
                println!("Removed: {}", rec.name);
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_algorithm(explicit: Option<&str>, default: KeyAlgorithm) -> anyhow::Result<KeyAlgorithm> {
    match explicit {
        Some(s) => Ok(s.parse()?),
        None => Ok(default),
    }
}

fn warn_below_policy(config: &Config, algorithm: KeyAlgorithm, bits: Option<u32>) {
    if algorithm != KeyAlgorithm::Rsa {
        return;
    }
    let effective = bits.or(algorithm.default_bits()).unwrap_or(0);
    if effective < config.min_rsa_bits {
        warn!(
            bits = effective,
            min_rsa_bits = config.min_rsa_bits,
            "rsa key is below the audit policy and will be flagged"
        );
    }
}

fn report_key(rec: &KeyRecord, verb: &str, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(rec);
    }
    println!("{verb}: {}", rec.name);
    println!("  fingerprint: {}", rec.fingerprint);
    println!("  private:     {}", rec.private_key_path.display());
    println!("  public:      {}", rec.public_key_path.display());
    if let Some(exp) = rec.expires_at {
        println!("  expires:     {}", exp.format("%Y-%m-%d"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// list / show
// ---------------------------------------------------------------------------

fn list(vault: &Vault, json: bool) -> anyhow::Result<()> {
    let config = vault.load_config()?;
    let manager = vault.load_inventory()?;
    let inv = manager.inventory();

    if json {
        return print_json(&inv.keys);
    }
    if inv.keys.is_empty() {
        println!("no keys");
        println!("\nGenerate one:  ssh-vault key generate <name>");
        return Ok(());
    }

    let now = Utc::now();
    let rows = inv
        .keys
        .iter()
        .map(|k| {
            vec![
                k.name.clone(),
                k.algorithm.to_string(),
                k.bits.map(|b| b.to_string()).unwrap_or_else(|| "-".into()),
                k.status.to_string(),
                k.expiry(now, config.expiry_warning_days).to_string(),
                inv.deployments_for_key(&k.name).len().to_string(),
                k.fingerprint.clone(),
            ]
        })
        .collect();
    print_table(
        &["NAME", "TYPE", "BITS", "STATUS", "EXPIRES", "HOSTS", "FINGERPRINT"],
        rows,
    );
    Ok(())
}

fn show(vault: &Vault, name: &str, json: bool) -> anyhow::Result<()> {
    let config = vault.load_config()?;
    let manager = vault.load_inventory()?;
    let inv = manager.inventory();
    let rec = inv.key(name)?;
    let deployments = inv.deployments_for_key(name);

    if json {
        return print_json(&serde_json::json!({
            "key": rec,
            "expiry": rec.expiry(Utc::now(), config.expiry_warning_days),
            "deployments": deployments,
            "identity_for": inv
                .hosts_using_identity(name)
                .iter()
                .map(|h| h.alias.as_str())
                .collect::<Vec<_>>(),
        }));
    }

    println!("Key:         {}", rec.name);
    println!("Status:      {}", rec.status);
    println!(
        "Algorithm:   {}{}",
        rec.algorithm,
        rec.bits.map(|b| format!(" ({b} bits)")).unwrap_or_default()
    );
    println!("Fingerprint: {}", rec.fingerprint);
    println!("Comment:     {}", rec.comment);
    println!("Private:     {}", rec.private_key_path.display());
    println!("Public:      {}", rec.public_key_path.display());
    println!("Created:     {}", date(Some(rec.created_at)));
    println!(
        "Expiry:      {}",
        rec.expiry(Utc::now(), config.expiry_warning_days)
    );
    println!("Managed:     {}", if rec.managed { "yes" } else { "no" });
    if rec.rotated_from.is_some() || rec.rotated_to.is_some() {
        println!(
            "Rotation:    {} -> {} -> {}",
            or_dash(rec.rotated_from.as_deref()),
            rec.name,
            or_dash(rec.rotated_to.as_deref())
        );
    }
    if !rec.tags.is_empty() {
        println!("Tags:        {}", rec.tags.join(", "));
    }

    if !deployments.is_empty() {
        println!();
        let rows = deployments
            .iter()
            .map(|d| {
                vec![
                    d.host.clone(),
                    d.method.to_string(),
                    date(Some(d.deployed_at)),
                    date(d.verified_at),
                ]
            })
            .collect();
        print_table(&["HOST", "METHOD", "DEPLOYED", "VERIFIED"], rows);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// rotate
// ---------------------------------------------------------------------------

#[derive(serde::Serialize)]
struct RedeployResult {
    host: String,
    deployed: bool,
    old_revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn rotate(
    vault: &Vault,
    request: &RotateRequest,
    deploy: bool,
    revoke_old: bool,
    json: bool,
) -> anyhow::Result<()> {
    let config = vault.load_config()?;
    let mut manager = vault.load_inventory()?;
    let outcome = key_ops::rotate(
        manager.inventory_mut(),
        &SystemRunner,
        &vault.dir,
        request,
        Utc::now(),
    )?;
    manager.save().context("failed to save inventory")?;

    let mut results = Vec::new();
    if deploy {
        for host in &outcome.hosts_to_redeploy {
            let result = redeploy(
                &mut manager,
                &outcome.old,
                &outcome.new.name,
                host,
                revoke_old,
                config.connect_timeout_secs,
            );
            manager.save().context("failed to save inventory")?;
            results.push(result);
        }
    }
    let failed = results.iter().filter(|r| r.error.is_some()).count();

    if json {
        print_json(&serde_json::json!({
            "rotation": outcome,
            "redeploy": results,
        }))?;
    } else {
        println!("Rotated: {} -> {}", outcome.old, outcome.new.name);
        println!("  fingerprint: {}", outcome.new.fingerprint);
        if !outcome.identities_switched.is_empty() {
            println!(
                "  identity switched on: {}",
                outcome.identities_switched.join(", ")
            );
            println!("  run `ssh-vault sync-config` to update ssh_config");
        }
        if !deploy && !outcome.hosts_to_redeploy.is_empty() {
            println!("\nOld key still deployed on:");
            for h in &outcome.hosts_to_redeploy {
                println!("  {h}    (ssh-vault deploy {} {h})", outcome.new.name);
            }
        }
        for r in &results {
            match &r.error {
                None if r.old_revoked => println!("  {}: deployed, old key removed", r.host),
                None => println!("  {}: deployed", r.host),
                Some(e) => println!("  {}: FAILED: {e}", r.host),
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} host(s) failed to redeploy");
    }
    Ok(())
}

fn redeploy(
    manager: &mut InventoryManager,
    old: &str,
    new: &str,
    host: &str,
    revoke_old: bool,
    timeout_secs: u32,
) -> RedeployResult {
    let mut result = RedeployResult {
        host: host.to_string(),
        deployed: false,
        old_revoked: false,
        error: None,
    };
    let inv = manager.inventory_mut();

    // The host only trusts the old key until the new one is installed.
    if let Err(e) = host_ops::deploy(inv, &SystemRunner, new, host, Some(old), Utc::now()) {
        result.error = Some(e.to_string());
        return result;
    }
    result.deployed = true;

    if revoke_old {
        match host_ops::revoke(inv, &SystemRunner, old, host, timeout_secs) {
            Ok(()) => result.old_revoked = true,
            Err(e) => result.error = Some(format!("old key not removed: {e}")),
        }
    }
    result
}
