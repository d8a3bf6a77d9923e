//! Completion events raised by the engine.

use crate::error::BulkCounterStatus;
use crate::types::{BufferHandle, Cookie};
use std::fmt;
use tokio::sync::mpsc;

/// How a transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Values are readable
    Completed,
    /// The transaction was disabled before it finished
    Canceled,
    /// The hardware reported an error
    Failed(BulkCounterStatus),
}

impl TransactionStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, TransactionStatus::Completed)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Completed => write!(f, "completed"),
            TransactionStatus::Canceled => write!(f, "canceled"),
            TransactionStatus::Failed(status) => write!(f, "failed ({})", status),
        }
    }
}

/// Event delivered to the engine's client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkCounterEvent {
    /// A bulk read transaction ended. Emitted exactly once per admitted read.
    ReadDone {
        handle: BufferHandle,
        cookie: Cookie,
        status: TransactionStatus,
    },
    /// The accumulated counter refresh ended.
    RefreshDone {
        cookie: Cookie,
        status: TransactionStatus,
    },
}

impl BulkCounterEvent {
    pub fn cookie(&self) -> Cookie {
        match self {
            BulkCounterEvent::ReadDone { cookie, .. } | BulkCounterEvent::RefreshDone { cookie, .. } => {
                *cookie
            }
        }
    }

    pub fn status(&self) -> TransactionStatus {
        match self {
            BulkCounterEvent::ReadDone { status, .. }
            | BulkCounterEvent::RefreshDone { status, .. } => *status,
        }
    }
}

/// Receiving end of the engine's event queue.
pub type EventReceiver = mpsc::UnboundedReceiver<BulkCounterEvent>;

pub(crate) type EventSender = mpsc::UnboundedSender<BulkCounterEvent>;
