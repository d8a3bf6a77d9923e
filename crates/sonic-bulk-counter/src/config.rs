//! Engine configuration.
//!
//! Limits that bound buffer allocation and key validation. Every field has
//! a serde default so a partial `[engine]` table in a TOML file is enough.

use crate::error::{BulkCounterError, BulkCounterResult};
use serde::{Deserialize, Serialize};

/// Bulk counter engine limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of live buffers
    #[serde(default = "default_max_buffers")]
    pub max_buffers: usize,

    /// Total counter entries available to all live buffers
    #[serde(default = "default_buffer_pool_entries")]
    pub buffer_pool_entries: usize,

    /// Maximum ports in a port or elephant-flow key
    #[serde(default = "default_max_ports_per_key")]
    pub max_ports_per_key: usize,

    /// Flow counter ids must stay below this value
    #[serde(default = "default_flow_counter_id_limit")]
    pub flow_counter_id_limit: u32,

    /// Elephant flow entries reported per port
    #[serde(default = "default_elephant_flows_per_port")]
    pub elephant_flows_per_port: u16,
}

fn default_max_buffers() -> usize {
    64
}

fn default_buffer_pool_entries() -> usize {
    1 << 20
}

fn default_max_ports_per_key() -> usize {
    256
}

fn default_flow_counter_id_limit() -> u32 {
    1 << 20
}

fn default_elephant_flows_per_port() -> u16 {
    32
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_buffers: default_max_buffers(),
            buffer_pool_entries: default_buffer_pool_entries(),
            max_ports_per_key: default_max_ports_per_key(),
            flow_counter_id_limit: default_flow_counter_id_limit(),
            elephant_flows_per_port: default_elephant_flows_per_port(),
        }
    }
}

impl EngineConfig {
    /// Validate configuration
    pub fn validate(&self) -> BulkCounterResult<()> {
        if self.max_buffers == 0 {
            return Err(BulkCounterError::param_error("max_buffers must be > 0"));
        }

        if self.buffer_pool_entries == 0 {
            return Err(BulkCounterError::param_error(
                "buffer_pool_entries must be > 0",
            ));
        }

        if self.max_ports_per_key == 0 {
            return Err(BulkCounterError::param_error(
                "max_ports_per_key must be > 0",
            ));
        }

        if self.flow_counter_id_limit == 0 {
            return Err(BulkCounterError::param_error(
                "flow_counter_id_limit must be > 0",
            ));
        }

        if self.elephant_flows_per_port == 0 {
            return Err(BulkCounterError::param_error(
                "elephant_flows_per_port must be > 0",
            ));
        }

        Ok(())
    }
}
