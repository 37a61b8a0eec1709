//! Gatewall - NAT gateway firewall builder
//!
//! Manages block and port-forward records for a container host and keeps
//! the `iptables-restore` document in sync.
//!
//! # Usage
//!
//! ```bash
//! gatewall run                                   # periodic build loop
//! gatewall build                                 # one-shot compile + apply
//! gatewall add-block --ip 123.123.123.123 --range 32
//! gatewall add-forward --ip 10.0.3.15 --port 2210 --preset ssh
//! gatewall ports ssh                             # free ports in a class
//! gatewall export                                # print the compiled document
//! gatewall status
//! ```

use clap::{Parser, Subcommand};
use gatewall::builder::{Builder, CycleOutcome};
use gatewall::config::{self, AppConfig};
use gatewall::core::apply::RULES_FILE;
use gatewall::core::compiler;
use gatewall::core::ports::PortClass;
use gatewall::core::store::RuleStore;
use gatewall::manager::{BlockInput, ForwardInput, Manager, OpResult, Selector};
use gatewall::utils;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "gatewall")]
#[command(about = "NAT gateway firewall builder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the periodic build loop (setup trigger first, then every N seconds)
    Run {
        /// Override the build interval in seconds
        #[arg(short, long, value_name = "SECONDS")]
        interval: Option<u64>,
    },
    /// Compile, write and apply the ruleset once, regardless of dirty flags
    Build,
    /// Print the compiled ruleset without writing or applying it
    Export,
    /// Print the current on-disk ruleset document
    Raw,
    /// Show rule counts and port availability
    Status,
    /// List rules, optionally restricted to one kind
    List {
        /// Restrict to one kind (block | forward)
        #[arg(short, long)]
        kind: Option<String>,
    },
    /// Add an IP block rule
    AddBlock {
        #[arg(long)]
        ip: String,
        /// CIDR prefix length (8, 16, 24 or 32)
        #[arg(long, default_value_t = 32)]
        range: u8,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        note: Option<String>,
        /// Ban duration in seconds (0 = permanent)
        #[arg(long)]
        bantime: Option<u64>,
        /// Create the rule disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Add a port forward rule
    AddForward {
        /// Destination address (may be set later)
        #[arg(long)]
        ip: Option<String>,
        /// External host port (must fall in a managed range)
        #[arg(long)]
        port: String,
        /// Service preset (none | ssh | http | mysql | custom)
        #[arg(long)]
        preset: Option<String>,
        /// Destination port when no preset implies one
        #[arg(long)]
        service_port: Option<String>,
        #[arg(long)]
        label: Option<String>,
        /// Create the rule disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Remove a rule by name
    Remove { name: Uuid },
    /// Mark a rule (or everything when no name is given) for rebuild
    Rebuild { name: Option<Uuid> },
    /// Show free ports for a class (ssh | http | mysql | shell-console | all)
    Ports {
        #[arg(default_value = "all")]
        class: String,
    },
    /// Delete all rules; --purge also removes the store document itself
    Reset {
        #[arg(long)]
        purge: bool,
    },
}

fn main() -> ExitCode {
    let _ = utils::ensure_dirs();
    let cli = Cli::parse();

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    match runtime.block_on(handle_cli(cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Effective working directory or a readable error
fn resolve_work_dir(config: &AppConfig) -> Result<PathBuf, Box<dyn std::error::Error>> {
    config
        .work_dir()
        .ok_or_else(|| "no working directory available (set work_dir in config.json)".into())
}

async fn handle_cli(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_config().await;
    let work_dir = resolve_work_dir(&config)?;
    let manager = Manager::new(RuleStore::in_dir(&work_dir));

    match command {
        Commands::Run { interval } => {
            init_logging();
            warn_if_unprivileged(&config);

            let mut builder = Builder::new(RuleStore::in_dir(&work_dir), work_dir, &config);
            if let Some(secs) = interval {
                builder = builder.with_interval(Duration::from_secs(secs.max(1)));
            }

            tokio::select! {
                () = builder.run() => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted, shutting down");
                }
            }
        }
        Commands::Build => {
            init_logging();
            warn_if_unprivileged(&config);

            let builder = Builder::new(RuleStore::in_dir(&work_dir), work_dir, &config);
            match builder.cycle(true).await? {
                CycleOutcome::Built {
                    emitted,
                    skipped,
                    applied,
                } => {
                    println!("✓ Ruleset built ({emitted} rules emitted, {skipped} skipped).");
                    if !applied {
                        eprintln!("✗ Apply step failed; see the log for details.");
                    }
                }
                outcome => println!("{outcome:?}"),
            }
        }
        Commands::Export => {
            let rules = manager.store().load().await?;
            let output = compiler::compile(&rules, &config.network_context(), chrono::Utc::now());
            print!("{}", output.text);
        }
        Commands::Raw => {
            let path = work_dir.join(RULES_FILE);
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => print!("{text}"),
                Err(_) => return Err(format!("no ruleset document at {}", path.display()).into()),
            }
        }
        Commands::Status => {
            let summary = manager.status().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::List { kind } => {
            let selector = match kind.as_deref() {
                None => Selector::All,
                Some("block") => Selector::Blocks,
                Some("forward") => Selector::Forwards,
                Some(other) => return Err(format!("unknown kind '{other}'").into()),
            };
            let rules = manager.fetch(selector).await?;
            println!("{}", serde_json::to_string_pretty(&rules)?);
        }
        Commands::AddBlock {
            ip,
            range,
            label,
            note,
            bantime,
            disabled,
        } => {
            let result = manager
                .add_block(BlockInput {
                    name: None,
                    label,
                    ip: Some(ip),
                    range: Some(range),
                    note,
                    bantime,
                    enabled: Some(!disabled),
                })
                .await;
            report(&result)?;
        }
        Commands::AddForward {
            ip,
            port,
            preset,
            service_port,
            label,
            disabled,
        } => {
            let result = manager
                .add_forward(ForwardInput {
                    name: None,
                    label,
                    ip,
                    port: Some(port),
                    preset,
                    service_port,
                    enabled: Some(!disabled),
                })
                .await;
            report(&result)?;
        }
        Commands::Remove { name } => {
            report(&manager.remove(name).await)?;
        }
        Commands::Rebuild { name } => {
            report(&manager.rebuild(name).await)?;
        }
        Commands::Ports { class } => {
            let class = PortClass::from_str(&class)
                .map_err(|_| format!("unknown port class '{class}'"))?;
            let free = manager.available_ports(class).await?;
            println!("{}", serde_json::to_string(&free)?);
        }
        Commands::Reset { purge } => {
            report(&manager.reset(purge).await)?;
        }
    }
    Ok(())
}

/// Prints the structured result; a failed operation becomes a non-zero exit
fn report(result: &OpResult) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(result)?);
    if result.is_success() {
        Ok(())
    } else {
        Err("operation failed".into())
    }
}

/// Log to a file under the state dir when possible, stderr otherwise
fn init_logging() {
    if let Some(mut log_path) = utils::get_state_dir() {
        log_path.push("gatewall.log");
        if let Ok(file) = std::fs::File::options().create(true).append(true).open(log_path) {
            tracing_subscriber::fmt().with_writer(file).with_ansi(false).init();
            return;
        }
    }
    tracing_subscriber::fmt::init();
}

fn warn_if_unprivileged(config: &AppConfig) {
    if !nix::unistd::getuid().is_root() {
        eprintln!(
            "Note: not running as root; {} will likely fail to load rules.",
            config.restore_command
        );
    }
}
