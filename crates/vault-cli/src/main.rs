mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, host::HostSubcommand, key::KeySubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ssh-vault",
    about = "SSH key lifecycle and inventory: keys, the hosts they unlock, and the ssh_config that ties them together",
    version,
    propagate_version = true
)]
struct Cli {
    /// Vault directory holding keys, config, and inventory (default: ~/.ssh-vault)
    #[arg(long, global = true, env = "SSH_VAULT_DIR")]
    vault_dir: Option<PathBuf>,

    /// Inventory file (default: <vault-dir>/inventory.yaml; a .json path selects JSON)
    #[arg(long, global = true, env = "SSH_VAULT_INVENTORY")]
    inventory: Option<PathBuf>,

    /// ssh_config file to sync (default: the config's ssh_config, else ~/.ssh/config)
    #[arg(long, global = true, env = "SSH_VAULT_SSH_CONFIG")]
    ssh_config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the vault directory, default config, and an empty inventory
    Init,

    /// Show inventory counts and anything that needs attention
    Status,

    /// Manage keys
    Key {
        #[command(subcommand)]
        subcommand: KeySubcommand,
    },

    /// Manage hosts
    Host {
        #[command(subcommand)]
        subcommand: HostSubcommand,
    },

    /// Install a key's public half on one or more hosts
    Deploy {
        /// Key name
        key: String,
        /// Host aliases
        #[arg(required = true)]
        hosts: Vec<String>,
        /// Record the deployment without contacting the host (key was installed by hand)
        #[arg(long)]
        manual: bool,
    },

    /// Check a deployed key is still present in the host's authorized_keys
    Verify {
        /// Key name
        key: String,
        /// Host alias
        host: String,
    },

    /// Remove a key from a host's authorized_keys and drop the deployment
    Revoke {
        /// Key name
        key: String,
        /// Host alias
        host: String,
    },

    /// Audit the inventory against the key policy
    Audit {
        /// Exit non-zero when a critical finding exists
        #[arg(long)]
        strict: bool,
        /// Skip checks that stat key files on this machine
        #[arg(long)]
        no_fs: bool,
    },

    /// Inspect and modify vault configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Write the managed Host section into ssh_config
    SyncConfig {
        /// Show what would be written without touching the file
        #[arg(long)]
        dry_run: bool,
        /// Remove the managed section instead of writing it
        #[arg(long)]
        remove: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = root::Vault::resolve(
        cli.vault_dir.as_deref(),
        cli.inventory.as_deref(),
        cli.ssh_config.as_deref(),
    )
    .and_then(|vault| match cli.command {
        Commands::Init => cmd::init::run(&vault, cli.json),
        Commands::Status => cmd::status::run(&vault, cli.json),
        Commands::Key { subcommand } => cmd::key::run(&vault, subcommand, cli.json),
        Commands::Host { subcommand } => cmd::host::run(&vault, subcommand, cli.json),
        Commands::Deploy { key, hosts, manual } => {
            cmd::deploy::deploy(&vault, &key, &hosts, manual, cli.json)
        }
        Commands::Verify { key, host } => cmd::deploy::verify(&vault, &key, &host, cli.json),
        Commands::Revoke { key, host } => cmd::deploy::revoke(&vault, &key, &host, cli.json),
        Commands::Audit { strict, no_fs } => cmd::audit::run(&vault, strict, no_fs, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&vault, subcommand, cli.json),
        Commands::SyncConfig { dry_run, remove } => {
            cmd::sync_config::run(&vault, dry_run, remove, cli.json)
        }
    });

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
