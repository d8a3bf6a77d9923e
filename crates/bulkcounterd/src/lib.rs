//! Bulk Counter Daemon
//!
//! Periodically bulk-reads port, flow and elephant flow counters through the
//! [`sonic_bulk_counter`] engine and logs per-session samples. Sessions,
//! LAG membership and engine limits come from a TOML file; the hardware is
//! the engine's simulated driver.

pub mod config;
pub mod daemon;
pub mod error;
pub mod session;
pub mod traffic;

pub use config::{
    BulkCounterdConfig, DaemonSettings, LagConfig, SessionConfig, SessionKind, DEFAULT_CONFIG_PATH,
};
pub use daemon::{BulkCounterDaemon, DaemonReport};
pub use error::{BulkCounterdError, Result};
pub use session::{Session, SessionSample, SessionStats};
pub use traffic::TrafficGenerator;
