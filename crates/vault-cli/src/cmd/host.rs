use crate::output::{date, or_dash, print_json, print_table};
use crate::root::Vault;
use anyhow::Context;
use chrono::Utc;
use clap::Subcommand;
use vault_core::host_ops::{self, HostSpec, HostUpdate};
use vault_core::runner::SystemRunner;

// ---------------------------------------------------------------------------
// Subcommand tree
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum HostSubcommand {
    /// Register a host
    Add {
        /// Alias used in ssh_config (`ssh <alias>`)
        alias: String,
        /// DNS name or IP address
        #[arg(long)]
        hostname: String,
        /// Remote user (default: $USER)
        #[arg(long)]
        user: Option<String>,
        /// SSH port (default: 22)
        #[arg(long)]
        port: Option<u16>,
        /// Key to use as IdentityFile for this host
        #[arg(long)]
        identity: Option<String>,
        /// Free-form tag; repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// List hosts
    List,
    /// Show one host and the keys deployed to it
    Show { alias: String },
    /// Change a host's connection details
    Update {
        alias: String,
        #[arg(long)]
        hostname: Option<String>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, conflicts_with = "clear_identity")]
        identity: Option<String>,
        /// Stop pinning an IdentityFile for this host
        #[arg(long)]
        clear_identity: bool,
        /// Replace the host's tags; repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Remove a host and its deployment records
    Remove { alias: String },
    /// Check that a host accepts a non-interactive login
    Test {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        alias: Option<String>,
        /// Test every host
        #[arg(long)]
        all: bool,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(vault: &Vault, subcommand: HostSubcommand, json: bool) -> anyhow::Result<()> {
    match subcommand {
        HostSubcommand::Add {
            alias,
            hostname,
            user,
            port,
            identity,
            tags,
        } => {
            let mut manager = vault.load_inventory()?;
            let spec = HostSpec {
                alias,
                hostname,
                user,
                port,
                identity,
                tags,
            };
            let host = host_ops::add_host(manager.inventory_mut(), spec, Utc::now())?;
            manager.save().context("failed to save inventory")?;

            if json {
                print_json(&host)?;
            } else {
                println!("Added host: {} ({}:{})", host.alias, host.ssh_target(), host.port);
            }
            Ok(())
        }
        HostSubcommand::List => list(vault, json),
        HostSubcommand::Show { alias } => show(vault, &alias, json),
        HostSubcommand::Update {
            alias,
            hostname,
            user,
            port,
            identity,
            clear_identity,
            tags,
        } => {
            let mut manager = vault.load_inventory()?;
            let update = HostUpdate {
                hostname,
                user,
                port,
                identity,
                clear_identity,
                tags: (!tags.is_empty()).then_some(tags),
            };
            let host = host_ops::update_host(manager.inventory_mut(), &alias, update)?;
            manager.save().context("failed to save inventory")?;

            if json {
                print_json(&host)?;
            } else {
                println!("Updated host: {}", host.alias);
            }
            Ok(())
        }
        HostSubcommand::Remove { alias } => {
            let mut manager = vault.load_inventory()?;
            let host = host_ops::remove_host(manager.inventory_mut(), &alias)?;
            manager.save().context("failed to save inventory")?;

            if json {
                print_json(&host)?;
            } else {
                println!("Removed host: {}", host.alias);
            }
            Ok(())
        }
        HostSubcommand::Test { alias, all } => test(vault, alias, all, json),
    }
}

// ---------------------------------------------------------------------------
// list / show
// ---------------------------------------------------------------------------

fn check_state(ok: Option<bool>) -> &'static str {
    match ok {
        Some(true) => "ok",
        Some(false) => "unreachable",
        None => "-",
    }
}

fn list(vault: &Vault, json: bool) -> anyhow::Result<()> {
    let manager = vault.load_inventory()?;
    let inv = manager.inventory();

    if json {
        return print_json(&inv.hosts);
    }
    if inv.hosts.is_empty() {
        println!("no hosts");
        println!("\nAdd one:  ssh-vault host add <alias> --hostname <host>");
        return Ok(());
    }

    let rows = inv
        .hosts
        .iter()
        .map(|h| {
            vec![
                h.alias.clone(),
                h.ssh_target(),
                h.port.to_string(),
                or_dash(h.identity.as_deref()),
                inv.deployments_for_host(&h.alias).len().to_string(),
                check_state(h.last_check_ok).to_string(),
            ]
        })
        .collect();
    print_table(
        &["ALIAS", "TARGET", "PORT", "IDENTITY", "KEYS", "LAST CHECK"],
        rows,
    );
    Ok(())
}

fn show(vault: &Vault, alias: &str, json: bool) -> anyhow::Result<()> {
    let manager = vault.load_inventory()?;
    let inv = manager.inventory();
    let host = inv.host(alias)?;
    let deployments = inv.deployments_for_host(alias);

    if json {
        return print_json(&serde_json::json!({
            "host": host,
            "deployments": deployments,
        }));
    }

    println!("Host:       {}", host.alias);
    println!("Target:     {}", host.ssh_target());
    println!("Port:       {}", host.port);
    println!("Identity:   {}", or_dash(host.identity.as_deref()));
    println!("Added:      {}", date(Some(host.added_at)));
    println!(
        "Last check: {} ({})",
        check_state(host.last_check_ok),
        date(host.last_checked)
    );
    if let Some(e) = &host.last_check_error {
        println!("  error:    {e}");
    }
    if !host.tags.is_empty() {
        println!("Tags:       {}", host.tags.join(", "));
    }

    if !deployments.is_empty() {
        println!();
        let rows = deployments
            .iter()
            .map(|d| {
                vec![
                    d.key.clone(),
                    d.method.to_string(),
                    date(Some(d.deployed_at)),
                    date(d.verified_at),
                ]
            })
            .collect();
        print_table(&["KEY", "METHOD", "DEPLOYED", "VERIFIED"], rows);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// test
// ---------------------------------------------------------------------------

fn test(vault: &Vault, alias: Option<String>, all: bool, json: bool) -> anyhow::Result<()> {
    let config = vault.load_config()?;
    let mut manager = vault.load_inventory()?;

    let aliases: Vec<String> = match alias {
        Some(a) if !all => vec![a],
        _ => manager
            .inventory()
            .hosts
            .iter()
            .map(|h| h.alias.clone())
            .collect(),
    };

    let mut outcomes = Vec::new();
    for alias in &aliases {
        let outcome = host_ops::test_connection(
            manager.inventory_mut(),
            &SystemRunner,
            alias,
            config.connect_timeout_secs,
            Utc::now(),
        )?;
        if !json {
            match &outcome.error {
                None => println!("{alias}: ok"),
                Some(e) => println!("{alias}: unreachable: {e}"),
            }
        }
        outcomes.push(outcome);
    }
    manager.save().context("failed to save inventory")?;

    if json {
        print_json(&outcomes)?;
    }

    let failed = outcomes.iter().filter(|o| !o.ok).count();
    if failed > 0 {
        anyhow::bail!("{failed} host(s) unreachable");
    }
    Ok(())
}
