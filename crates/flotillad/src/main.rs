//! flotillad — the Flotilla control-plane daemon and operator CLI.
//!
//! Every subcommand opens the record store under the data directory,
//! builds the driver registry and CM backend from `flotilla.toml`, runs
//! one control-plane operation and prints the result as JSON.
//!
//! # Usage
//!
//! ```text
//! flotillad seed alice
//! flotillad formation create f1 --owner alice
//! flotillad layer create f1 l1 --owner alice --flavor mock-small --runtime
//! flotillad formation scale f1 l1=3
//! flotillad app create shop --owner alice --formation f1
//! flotillad app scale shop web=2
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod config;

use config::FlotillaConfig;

#[derive(Parser)]
#[command(name = "flotillad", about = "Flotilla control plane", version, propagate_version = true)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "/etc/flotilla/flotilla.toml")]
    config: PathBuf,

    /// Data directory for persistent state (overrides the config file).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register the enabled providers and their default flavors for a user.
    Seed { owner: String },
    /// Formation lifecycle.
    Formation {
        #[command(subcommand)]
        action: FormationAction,
    },
    /// Layer lifecycle.
    Layer {
        #[command(subcommand)]
        action: LayerAction,
    },
    /// Node lifecycle.
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
    /// App lifecycle.
    App {
        #[command(subcommand)]
        action: AppAction,
    },
    /// Backing services attached to apps.
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
    /// Users' SSH keys.
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
}

#[derive(Subcommand)]
enum FormationAction {
    Create {
        id: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        domain: Option<String>,
    },
    /// Publish and converge every node.
    Converge {
        id: String,
        /// Also converge the controller.
        #[arg(long)]
        controller: bool,
    },
    Balance {
        id: String,
    },
    /// Set node counts per layer, e.g. `l1=3 proxy=1`.
    Scale {
        id: String,
        #[arg(required = true)]
        layers: Vec<String>,
    },
    /// Print the computed databag.
    Databag {
        id: String,
    },
    Destroy {
        id: String,
    },
}

#[derive(Subcommand)]
enum LayerAction {
    Create {
        formation: String,
        id: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        flavor: String,
        #[arg(long)]
        runtime: bool,
        #[arg(long)]
        proxy: bool,
        #[arg(long)]
        ssh_username: Option<String>,
        #[arg(long)]
        ssh_port: Option<u16>,
    },
    Build {
        formation: String,
        id: String,
    },
    Destroy {
        formation: String,
        id: String,
    },
}

#[derive(Subcommand)]
enum NodeAction {
    Create {
        formation: String,
        layer: String,
        /// FQDN of a pre-existing host (static provider).
        #[arg(long)]
        fqdn: Option<String>,
    },
    Build {
        formation: String,
        id: String,
    },
    Destroy {
        formation: String,
        id: String,
    },
    Converge {
        formation: String,
        id: String,
    },
    Run {
        formation: String,
        id: String,
        command: String,
    },
}

#[derive(Subcommand)]
enum AppAction {
    Create {
        id: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        formation: String,
    },
    /// Set container counts per type, e.g. `web=2 worker=1`.
    Scale {
        id: String,
        #[arg(required = true)]
        types: Vec<String>,
    },
    /// Record a build and release it.
    Push {
        id: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        sha: String,
        #[arg(long, default_value = "")]
        image: String,
        #[arg(long)]
        url: Option<String>,
    },
    /// Set config values (`KEY=value`) or unset them (`KEY=`).
    Config {
        id: String,
        #[arg(long)]
        user: String,
        #[arg(required = true)]
        values: Vec<String>,
    },
    Releases {
        id: String,
    },
    Run {
        id: String,
        command: String,
    },
    /// Print the tail of the app's aggregated log.
    Logs {
        id: String,
        /// Number of lines (defaults to `[logs] lines`).
        #[arg(long, short = 'n')]
        lines: Option<usize>,
    },
    Converge {
        id: String,
    },
    Databag {
        id: String,
    },
    Destroy {
        id: String,
    },
}

#[derive(Subcommand)]
enum ServiceAction {
    Attach {
        app: String,
        kind: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        plan: Option<String>,
    },
    Update {
        app: String,
        name: String,
        #[arg(long)]
        plan: String,
    },
    Detach {
        app: String,
        name: String,
    },
    List {
        app: String,
    },
}

#[derive(Subcommand)]
enum KeyAction {
    Add {
        user: String,
        name: String,
        public_key: String,
    },
    Remove {
        user: String,
        name: String,
    },
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,flotilla=debug"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    let mut config = FlotillaConfig::load(&cli.config)?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    let controller = commands::build_controller(&config)?;
    commands::dispatch(&controller, cli.command).await
}
