//! Hardware seam of the engine.
//!
//! The engine never touches registers. It hands admitted operations to a
//! [`BulkCounterDriver`] and learns about their end through
//! [`HwCompletion`]s that the hardware event layer feeds back into
//! [`BulkCounterEngine::handle_completion`](crate::BulkCounterEngine::handle_completion).

use crate::error::{BulkCounterResult, BulkCounterStatus};
use crate::key::CounterSelectionKey;
use crate::types::{CounterValue, LogPort, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Bulk transaction operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperation {
    Read,
    ReadClear,
    /// Read after folding pending accumulated deltas (flow keys only)
    ReadFlush,
    ReadClearFlush,
    /// Cancel the running transaction of the buffer
    Disable,
}

impl BulkOperation {
    pub fn is_flush(&self) -> bool {
        matches!(self, Self::ReadFlush | Self::ReadClearFlush)
    }

    pub fn is_clear(&self) -> bool {
        matches!(self, Self::ReadClear | Self::ReadClearFlush)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::ReadClear => "read_clear",
            Self::ReadFlush => "read_flush",
            Self::ReadClearFlush => "read_clear_flush",
            Self::Disable => "disable",
        }
    }
}

impl fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// LAG membership captured when a transaction starts.
pub type LagSnapshot = BTreeMap<LogPort, Vec<LogPort>>;

/// Everything the hardware needs to run one bulk read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwReadRequest {
    pub txn: TransactionId,
    pub op: BulkOperation,
    pub key: CounterSelectionKey,
    /// Number of values the completion must carry
    pub entries: usize,
    /// Membership of every LAG in the key at start time
    pub lag_members: LagSnapshot,
}

/// Completion reported by the hardware event layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwCompletion {
    /// A bulk read ended. Values are in layout order.
    Read {
        txn: TransactionId,
        result: Result<Vec<CounterValue>, BulkCounterStatus>,
    },
    /// The accumulated counter refresh ended.
    Refresh {
        txn: TransactionId,
        result: Result<(), BulkCounterStatus>,
    },
}

impl HwCompletion {
    pub fn txn(&self) -> TransactionId {
        match self {
            HwCompletion::Read { txn, .. } | HwCompletion::Refresh { txn, .. } => *txn,
        }
    }
}

/// Hardware operations required by the engine.
///
/// Every method must return without waiting for the hardware. Calls are
/// made while the engine holds its state lock, so implementations must not
/// call back into the engine.
pub trait BulkCounterDriver: Send + Sync {
    /// Starts a bulk read. An error means nothing was started.
    fn start_read(&self, request: &HwReadRequest) -> BulkCounterResult<()>;

    /// Requests cancellation of a started read or refresh. The hardware
    /// still reports a completion for it.
    fn cancel(&self, txn: TransactionId) -> BulkCounterResult<()>;

    /// Starts the global accumulated counter refresh.
    fn start_refresh(&self, txn: TransactionId) -> BulkCounterResult<()>;

    /// Current members of a LAG.
    fn lag_members(&self, lag: LogPort) -> BulkCounterResult<Vec<LogPort>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_flags() {
        assert!(BulkOperation::ReadFlush.is_flush());
        assert!(BulkOperation::ReadClearFlush.is_flush());
        assert!(!BulkOperation::Read.is_flush());
        assert!(BulkOperation::ReadClear.is_clear());
        assert!(!BulkOperation::Disable.is_clear());
    }

    #[test]
    fn test_completion_txn() {
        let txn = TransactionId::from_raw(7);
        let completion = HwCompletion::Refresh {
            txn,
            result: Ok(()),
        };
        assert_eq!(completion.txn(), txn);
    }
}
