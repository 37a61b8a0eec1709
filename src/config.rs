//! Configuration persistence
//!
//! Replaces the process-wide constants a firewall script would normally
//! carry (bridge names, subnets, debug flags) with an explicit struct that
//! is loaded once and passed into the builder. Nothing in the compiler
//! reads global state.

use crate::core::compiler::{Bridge, NetworkContext};
use crate::utils::{get_config_dir, get_data_dir};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Working directory for the rule store and generated ruleset.
    /// Defaults to the XDG data dir when unset.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Seconds between build-cycle triggers
    #[serde(default = "default_build_interval")]
    pub build_interval_secs: u64,

    /// Bridge hosting the managed containers
    #[serde(default = "default_primary_bridge")]
    pub primary_bridge: String,

    #[serde(default = "default_primary_subnet")]
    pub primary_subnet: Ipv4Network,

    /// Optional second bridge (gets its own NAT chain and isolation wiring)
    #[serde(default)]
    pub secondary_bridge: Option<String>,

    #[serde(default)]
    pub secondary_subnet: Option<Ipv4Network>,

    /// Command handed the generated document on every apply
    #[serde(default = "default_restore_command")]
    pub restore_command: String,

    /// Run `--test` against the document before loading it
    #[serde(default = "default_true")]
    pub check_before_apply: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            build_interval_secs: default_build_interval(),
            primary_bridge: default_primary_bridge(),
            primary_subnet: default_primary_subnet(),
            secondary_bridge: None,
            secondary_subnet: None,
            restore_command: default_restore_command(),
            check_before_apply: true,
        }
    }
}

impl AppConfig {
    /// Effective working directory (configured override or XDG data dir)
    pub fn work_dir(&self) -> Option<PathBuf> {
        self.work_dir.clone().or_else(get_data_dir)
    }

    /// Builds the compiler's network context from the configured bridges.
    ///
    /// The secondary network is only included when both its bridge and
    /// subnet are set; a half-configured pair is ignored with a warning.
    pub fn network_context(&self) -> NetworkContext {
        let mut net = NetworkContext::new(Bridge::new(
            self.primary_bridge.clone(),
            self.primary_subnet,
        ));

        match (&self.secondary_bridge, self.secondary_subnet) {
            (Some(bridge), Some(subnet)) => {
                net = net.with_secondary(Bridge::new(bridge.clone(), subnet));
            }
            (Some(_), None) | (None, Some(_)) => {
                tracing::warn!(
                    "secondary network needs both bridge and subnet, ignoring partial config"
                );
            }
            (None, None) => {}
        }

        net
    }
}

fn default_build_interval() -> u64 {
    5
}

fn default_primary_bridge() -> String {
    "lxcbr0".to_string()
}

fn default_primary_subnet() -> Ipv4Network {
    // 24-bit prefix on a dotted quad cannot fail
    Ipv4Network::new(Ipv4Addr::new(10, 0, 3, 0), 24).expect("valid default subnet")
}

fn default_restore_command() -> String {
    "/sbin/iptables-restore".to_string()
}

fn default_true() -> bool {
    true
}

/// Saves the config to disk using an atomic write pattern.
/// 1. Writes to a temporary file.
/// 2. Sets restrictive permissions (0o600).
/// 3. Atomically renames to the target path.
pub async fn save_config(config: &AppConfig) -> std::io::Result<()> {
    if let Some(mut path) = get_config_dir() {
        let json = serde_json::to_string_pretty(config)?;

        let mut temp_path = path.clone();
        temp_path.push("config.json.tmp");

        path.push("config.json");

        #[cfg(unix)]
        {
            use tokio::fs::OpenOptions;
            use tokio::io::AsyncWriteExt;

            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .mode(0o600)
                .open(&temp_path)
                .await?;

            file.write_all(json.as_bytes()).await?;
            file.sync_all().await?;
        }

        #[cfg(not(unix))]
        {
            use tokio::io::AsyncWriteExt;

            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(json.as_bytes()).await?;
            file.sync_all().await?;
        }

        tokio::fs::rename(temp_path, path).await?;
    }
    Ok(())
}

/// Loads the config from disk, or returns defaults if not found
pub async fn load_config() -> AppConfig {
    if let Some(mut path) = get_config_dir() {
        path.push("config.json");
        if let Ok(json) = tokio::fs::read_to_string(&path).await
            && let Ok(config) = serde_json::from_str::<AppConfig>(&json)
        {
            return config;
        }
    }
    AppConfig::default()
}
