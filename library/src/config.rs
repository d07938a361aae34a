//! Runtime configuration for the manager and the client executor.
//!
//! Every section is optional in the TOML file; missing keys fall back to the
//! defaults below.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::LibraryError;
use crate::model::connection::PortType;

/// Wire protocol version spoken by this build.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub manager: ManagerConfig,
    pub executor: ExecutorConfig,
}

impl AppConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, LibraryError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, LibraryError> {
        let text = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Loads `config.toml` from the platform config directory, or defaults.
    pub fn load_or_default() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from_path(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring unreadable config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "patchflow").map(|dirs| dirs.config_dir().join("config.toml"))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ManagerConfig {
    /// Quiet period after a graph edit before a reconcile pass runs.
    pub reconcile_debounce_ms: u64,
    /// Periodic replan while deployments are active.
    pub poll_interval_ms: u64,
    /// TTL of the immediate override sent on every edit.
    pub override_ttl_ms: u64,
    /// Delay before the durable (no TTL) override commit.
    pub commit_debounce_ms: u64,
    pub bridge_min_interval_ms: u64,
    /// Decimal places kept when comparing numeric bridge values.
    pub bridge_precision: u32,
    pub default_tick_interval_ms: u64,
    /// Clients without a selector route deploy here when a single root is unwired.
    pub default_client: Option<String>,
    /// Session id of the manager's own display, if any.
    pub local_display: Option<String>,
    pub bypass: BypassPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            reconcile_debounce_ms: 300,
            poll_interval_ms: 200,
            override_ttl_ms: 1500,
            commit_debounce_ms: 420,
            bridge_min_interval_ms: 30,
            bridge_precision: 3,
            default_tick_interval_ms: 33,
            default_client: None,
            local_display: None,
            bypass: BypassPolicy::default(),
        }
    }
}

/// Which disabled nodes may be switched off in place instead of redeployed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BypassPolicy {
    pub enabled: bool,
    pub excluded_types: Vec<PortType>,
}

impl Default for BypassPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            excluded_types: vec![PortType::Command, PortType::Client],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    pub default_tick_interval_ms: u64,
    pub min_tick_interval_ms: u64,
    pub max_tick_interval_ms: u64,
    pub max_nodes: usize,
    /// A tick longer than this counts as slow.
    pub tick_budget_ms: u64,
    pub watchdog_threshold: u32,
    pub watchdog_window: usize,
    /// Upper bound on the delta handed to nodes after a stall.
    pub max_delta_ms: u64,
    pub protocol_version: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_tick_interval_ms: 33,
            min_tick_interval_ms: 5,
            max_tick_interval_ms: 1000,
            max_nodes: 512,
            tick_budget_ms: 50,
            watchdog_threshold: 3,
            watchdog_window: 8,
            max_delta_ms: 250,
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

impl ExecutorConfig {
    pub fn clamp_tick_interval(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_tick_interval_ms)
            .clamp(self.min_tick_interval_ms, self.max_tick_interval_ms)
    }
}
