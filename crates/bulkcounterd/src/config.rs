//! Configuration file support for bulkcounterd
//!
//! Loads and validates bulkcounterd configuration from TOML files.
//! Default location: /etc/sonic/bulkcounterd.toml
//!
//! ```toml
//! [engine]
//! max_buffers = 16
//!
//! [daemon]
//! log_level = "debug"
//! poll_interval_ms = 1000
//!
//! [[lag]]
//! lag = "lag:1"
//! members = ["1", "2"]
//!
//! [[session]]
//! name = "uplinks"
//! kind = "port"
//! ports = ["1", "2", "lag:1"]
//! groups = ["rfc2863", "priority"]
//! priorities = [3, 4]
//! ```

use crate::error::{BulkCounterdError, Result};
use serde::{Deserialize, Serialize};
use sonic_bulk_counter::{
    BulkOperation, Cookie, CounterSelectionKey, ElephantFlowKey, EngineConfig, FlowCounterId,
    FlowCounterKey, FlowCounterKind, LogPort, PortCounterGroup, PortCounterKey,
};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/bulkcounterd.toml";

/// Daemon loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonSettings {
    /// Log filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Interval between bulk read rounds in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Interval between accumulated counter refreshes in milliseconds (0 disables)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_ms: u64,

    /// Interval at which hardware completions are collected in milliseconds
    #[serde(default = "default_completion_tick")]
    pub completion_tick_ms: u64,

    /// Inject synthetic traffic into the simulated hardware every round
    #[serde(default = "default_simulate_traffic")]
    pub simulate_traffic: bool,

    /// Seed of the synthetic traffic generator
    #[serde(default = "default_traffic_seed")]
    pub traffic_seed: u64,
}

/// Kind of counters a session collects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Port,
    Flow,
    Elephant,
}

/// One bulk read session: a buffer read every poll round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub name: String,

    pub kind: SessionKind,

    /// Cookie carried by completion events (defaults to the session position)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<Cookie>,

    #[serde(default = "default_session_op")]
    pub op: BulkOperation,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<LogPort>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<PortCounterGroup>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub priorities: Vec<u8>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traffic_classes: Vec<u8>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub priority_groups: Vec<u8>,

    #[serde(default)]
    pub flow_base: FlowCounterId,

    #[serde(default)]
    pub flow_count: u32,

    #[serde(default)]
    pub flow_kind: FlowCounterKind,
}

/// LAG membership installed in the simulated hardware
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LagConfig {
    pub lag: LogPort,
    pub members: Vec<LogPort>,
}

/// Complete bulkcounterd configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkCounterdConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub daemon: DaemonSettings,

    #[serde(default, rename = "lag", skip_serializing_if = "Vec::is_empty")]
    pub lags: Vec<LagConfig>,

    #[serde(default, rename = "session", skip_serializing_if = "Vec::is_empty")]
    pub sessions: Vec<SessionConfig>,
}

// Default functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_refresh_interval() -> u64 {
    5000
}

fn default_completion_tick() -> u64 {
    10
}

fn default_simulate_traffic() -> bool {
    true
}

fn default_traffic_seed() -> u64 {
    0x5eed
}

fn default_session_op() -> BulkOperation {
    BulkOperation::Read
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            poll_interval_ms: default_poll_interval(),
            refresh_interval_ms: default_refresh_interval(),
            completion_tick_ms: default_completion_tick(),
            simulate_traffic: default_simulate_traffic(),
            traffic_seed: default_traffic_seed(),
        }
    }
}

impl SessionConfig {
    /// Builds the selection key the session's buffer is bound to.
    pub fn selection_key(&self) -> CounterSelectionKey {
        match self.kind {
            SessionKind::Port => CounterSelectionKey::Port(PortCounterKey {
                ports: self.ports.clone(),
                groups: self.groups.clone(),
                priorities: self.priorities.clone(),
                traffic_classes: self.traffic_classes.clone(),
                priority_groups: self.priority_groups.clone(),
            }),
            SessionKind::Flow => CounterSelectionKey::Flow(FlowCounterKey {
                base: self.flow_base,
                count: self.flow_count,
                kind: self.flow_kind,
            }),
            SessionKind::Elephant => CounterSelectionKey::ElephantFlow(ElephantFlowKey {
                ports: self.ports.clone(),
            }),
        }
    }
}

impl BulkCounterdConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config = toml::from_str(&content).map_err(|e| {
                    BulkCounterdError::Configuration(format!(
                        "Failed to parse config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(BulkCounterdError::Io(e)),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            BulkCounterdError::Configuration(format!("Failed to serialize config: {}", e))
        })?;
        fs::write(path.as_ref(), content)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.daemon.poll_interval_ms)
    }

    /// Refresh interval, `None` when refreshes are disabled
    pub fn refresh_interval(&self) -> Option<Duration> {
        match self.daemon.refresh_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn completion_tick(&self) -> Duration {
        Duration::from_millis(self.daemon.completion_tick_ms)
    }

    /// Cookie of the session at `index`
    pub fn session_cookie(&self, index: usize) -> Cookie {
        self.sessions[index].cookie.unwrap_or(index as Cookie + 1)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.engine
            .validate()
            .map_err(|e| BulkCounterdError::Configuration(format!("[engine]: {}", e)))?;

        if self.daemon.poll_interval_ms == 0 {
            return Err(BulkCounterdError::Configuration(
                "poll_interval_ms must be > 0".to_string(),
            ));
        }

        if self.daemon.completion_tick_ms == 0 {
            return Err(BulkCounterdError::Configuration(
                "completion_tick_ms must be > 0".to_string(),
            ));
        }

        EnvFilter::try_new(&self.daemon.log_level).map_err(|e| {
            BulkCounterdError::Configuration(format!(
                "invalid log_level '{}': {}",
                self.daemon.log_level, e
            ))
        })?;

        let mut lags = HashSet::new();
        for lag in &self.lags {
            if !lag.lag.is_lag() {
                return Err(BulkCounterdError::Configuration(format!(
                    "{} is not a LAG port",
                    lag.lag
                )));
            }
            if !lags.insert(lag.lag) {
                return Err(BulkCounterdError::Configuration(format!(
                    "LAG {} configured twice",
                    lag.lag
                )));
            }
            if let Some(member) = lag.members.iter().find(|m| !m.is_network() || m.is_null()) {
                return Err(BulkCounterdError::Configuration(format!(
                    "LAG {} member {} is not a network port",
                    lag.lag, member
                )));
            }
        }

        let mut names = HashSet::new();
        let mut cookies = HashSet::new();
        for (index, session) in self.sessions.iter().enumerate() {
            if session.name.is_empty() {
                return Err(BulkCounterdError::Configuration(format!(
                    "session {} has no name",
                    index
                )));
            }
            if !names.insert(session.name.as_str()) {
                return Err(BulkCounterdError::session(&session.name, "duplicate name"));
            }
            if !cookies.insert(self.session_cookie(index)) {
                return Err(BulkCounterdError::session(&session.name, "duplicate cookie"));
            }
            if session.op == BulkOperation::Disable {
                return Err(BulkCounterdError::session(
                    &session.name,
                    "disable is not a read operation",
                ));
            }

            let key = session.selection_key();
            key.validate(&self.engine)
                .map_err(|e| BulkCounterdError::session(&session.name, e.to_string()))?;
            if session.op.is_flush() && !key.supports_flush() {
                return Err(BulkCounterdError::session(
                    &session.name,
                    format!("{} requires a flow session", session.op),
                ));
            }
            if let Some(lag) = key.lag_ports().into_iter().find(|p| !lags.contains(p)) {
                return Err(BulkCounterdError::session(
                    &session.name,
                    format!("LAG {} has no [[lag]] entry", lag),
                ));
            }
        }

        Ok(())
    }
}
