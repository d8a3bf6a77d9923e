//! Identifier and value types shared by the bulk counter engine.
//!
//! Handles are plain `Copy` values so they can cross the event channel and
//! be stored by clients. None of them are pointers: a [`BufferHandle`] is an
//! arena index paired with a generation, so a handle kept after its buffer
//! is destroyed is detected as stale rather than aliasing a new buffer.

use crate::error::BulkCounterError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque client value echoed back in completion events.
pub type Cookie = u64;

/// Raw logical port value (matches the SDK's 32-bit log port encoding).
pub type RawLogPort = u32;

const PORT_TYPE_SHIFT: u32 = 28;
const PORT_TYPE_MASK: u32 = 0xf;
const PORT_TYPE_NETWORK: u32 = 0x0;
const PORT_TYPE_LAG: u32 = 0x1;
const PORT_ID_MASK: u32 = (1 << PORT_TYPE_SHIFT) - 1;

/// A logical port.
///
/// The top nibble carries the port type: `0x0` for a network (front panel)
/// port and `0x1` for a LAG. The remaining 28 bits are the id within that
/// type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogPort(RawLogPort);

impl LogPort {
    /// Creates a logical port from its raw value.
    pub const fn from_raw(raw: RawLogPort) -> Self {
        LogPort(raw)
    }

    /// Creates a network port with the given id.
    pub const fn network(id: u32) -> Self {
        LogPort((PORT_TYPE_NETWORK << PORT_TYPE_SHIFT) | (id & PORT_ID_MASK))
    }

    /// Creates a LAG port with the given LAG id.
    pub const fn lag(id: u32) -> Self {
        LogPort((PORT_TYPE_LAG << PORT_TYPE_SHIFT) | (id & PORT_ID_MASK))
    }

    /// Returns the raw value.
    pub const fn as_raw(&self) -> RawLogPort {
        self.0
    }

    /// Returns true if this port is a LAG.
    pub const fn is_lag(&self) -> bool {
        (self.0 >> PORT_TYPE_SHIFT) & PORT_TYPE_MASK == PORT_TYPE_LAG
    }

    /// Returns true if this port is a network port.
    pub const fn is_network(&self) -> bool {
        (self.0 >> PORT_TYPE_SHIFT) & PORT_TYPE_MASK == PORT_TYPE_NETWORK
    }

    /// Returns the id within the port type.
    pub const fn id(&self) -> u32 {
        self.0 & PORT_ID_MASK
    }

    /// Returns true if the raw value is zero, which never names a port.
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for LogPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl FromStr for LogPort {
    type Err = BulkCounterError;

    /// Accepts `0x`-prefixed hex, plain decimal, or `lag:<id>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parsed = if let Some(id) = s.strip_prefix("lag:") {
            id.parse::<u32>().ok().map(LogPort::lag)
        } else if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u32::from_str_radix(hex, 16).ok().map(LogPort)
        } else {
            s.parse::<u32>().ok().map(LogPort)
        };

        parsed.ok_or_else(|| BulkCounterError::param_error(format!("invalid log port '{}'", s)))
    }
}

impl TryFrom<String> for LogPort {
    type Error = BulkCounterError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<LogPort> for String {
    fn from(port: LogPort) -> String {
        port.to_string()
    }
}

/// Flow counter identifier.
pub type FlowCounterId = u32;

/// Handle to a bulk counter buffer.
///
/// Generation `0` is reserved for [`BufferHandle::NULL`]; every live buffer
/// has a non-zero generation that changes when its arena slot is reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BufferHandle {
    index: u32,
    generation: u32,
}

impl BufferHandle {
    /// The null (uninitialized) handle.
    pub const NULL: Self = Self {
        index: 0,
        generation: 0,
    };

    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns the arena index.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Returns the generation.
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Returns true if this is the null handle.
    pub const fn is_null(&self) -> bool {
        self.generation == 0
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferHandle({}:{})", self.index, self.generation)
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.generation)
    }
}

/// Identifier of one admitted hardware operation (a read or a refresh).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    pub const fn from_raw(raw: u64) -> Self {
        TransactionId(raw)
    }

    pub const fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// Value of a single counter from a completed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CounterValue {
    /// Packet count
    pub packets: u64,
    /// Byte count
    pub bytes: u64,
    /// False if the hardware could not sample this counter
    pub valid: bool,
}

impl CounterValue {
    /// Creates a valid counter value.
    pub const fn new(packets: u64, bytes: u64) -> Self {
        Self {
            packets,
            bytes,
            valid: true,
        }
    }

    /// A value the hardware marked as not sampled.
    pub const INVALID: Self = Self {
        packets: 0,
        bytes: 0,
        valid: false,
    };
}
