//! Transaction admission: the two-slot budget and its pairing rule.
//!
//! At most [`MAX_CONCURRENT_TRANSACTIONS`] operations (bulk reads plus the
//! accumulated counter refresh) may be in flight. Two may run together when
//! their classes differ or when both are port reads. That makes the
//! admissible pairs:
//!
//! | running   | admitted with it                      |
//! |-----------|---------------------------------------|
//! | Port      | Port, Flow, ElephantFlow, Refresh     |
//! | Flow      | Port, ElephantFlow, Refresh           |
//! | Elephant  | Port, Flow, Refresh                   |
//! | Refresh   | Port, Flow, ElephantFlow              |
//!
//! The check and the occupation of a slot are always done under the same
//! write guard of the engine state.

use crate::driver::LagSnapshot;
use crate::error::{BulkCounterError, BulkCounterResult};
use crate::key::CounterKeyType;
use crate::types::{BufferHandle, Cookie, TransactionId};
use serde::Serialize;
use std::fmt;

/// Number of transactions the hardware runs concurrently.
pub const MAX_CONCURRENT_TRANSACTIONS: usize = 2;

/// Class of an in-flight transaction, as seen by the pairing rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionClass {
    Port,
    Flow,
    ElephantFlow,
    Refresh,
}

impl From<CounterKeyType> for TransactionClass {
    fn from(key_type: CounterKeyType) -> Self {
        match key_type {
            CounterKeyType::Port => TransactionClass::Port,
            CounterKeyType::Flow => TransactionClass::Flow,
            CounterKeyType::ElephantFlow => TransactionClass::ElephantFlow,
        }
    }
}

impl fmt::Display for TransactionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionClass::Port => "port",
            TransactionClass::Flow => "flow",
            TransactionClass::ElephantFlow => "elephant_flow",
            TransactionClass::Refresh => "refresh",
        };
        write!(f, "{}", s)
    }
}

/// Returns true if transactions of classes `a` and `b` may run together.
pub fn pairing_allowed(a: TransactionClass, b: TransactionClass) -> bool {
    a != b || a == TransactionClass::Port
}

/// What holds a slot.
#[derive(Debug, Clone)]
pub(crate) enum SlotOccupant {
    Read {
        buffer: BufferHandle,
        lag_members: LagSnapshot,
    },
    Refresh,
}

#[derive(Debug, Clone)]
pub(crate) struct TransactionSlot {
    pub txn: TransactionId,
    pub class: TransactionClass,
    pub occupant: SlotOccupant,
}

/// The single outstanding accumulated counter refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RefreshToken {
    pub txn: TransactionId,
    pub cookie: Cookie,
}

/// Slot pool and refresh token.
#[derive(Debug)]
pub(crate) struct AdmissionState {
    slots: [Option<TransactionSlot>; MAX_CONCURRENT_TRANSACTIONS],
    pub refresh: Option<RefreshToken>,
    next_txn: u64,
}

impl AdmissionState {
    pub fn new() -> Self {
        Self {
            slots: Default::default(),
            refresh: None,
            next_txn: 1,
        }
    }

    /// Allocates a transaction id. Ids are never reused.
    pub fn next_txn_id(&mut self) -> TransactionId {
        let txn = TransactionId::from_raw(self.next_txn);
        self.next_txn += 1;
        txn
    }

    /// Returns the index of a slot `class` may occupy, or `ResourceInUse`.
    pub fn admit(&self, class: TransactionClass) -> BulkCounterResult<usize> {
        let mut free = None;
        for (index, slot) in self.slots.iter().enumerate() {
            match slot {
                Some(running) if !pairing_allowed(running.class, class) => {
                    return Err(BulkCounterError::resource_in_use(format!(
                        "{} transaction cannot run alongside {} {}",
                        class, running.class, running.txn
                    )));
                }
                Some(_) => {}
                None => {
                    free.get_or_insert(index);
                }
            }
        }
        free.ok_or_else(|| {
            BulkCounterError::resource_in_use(format!(
                "all {} transaction slots are busy",
                MAX_CONCURRENT_TRANSACTIONS
            ))
        })
    }

    pub fn occupy(&mut self, index: usize, slot: TransactionSlot) {
        debug_assert!(self.slots[index].is_none());
        self.slots[index] = Some(slot);
    }

    pub fn find(&self, txn: TransactionId) -> Option<&TransactionSlot> {
        self.slots.iter().flatten().find(|slot| slot.txn == txn)
    }

    /// Frees the slot held by `txn`.
    pub fn release(&mut self, txn: TransactionId) -> Option<TransactionSlot> {
        self.slots
            .iter_mut()
            .find(|slot| matches!(slot, Some(s) if s.txn == txn))
            .and_then(Option::take)
    }

    pub fn in_use(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_class_running(&self, class: TransactionClass) -> bool {
        self.slots.iter().flatten().any(|slot| slot.class == class)
    }

    /// Frees every slot and the refresh token.
    pub fn clear(&mut self) -> Vec<TransactionSlot> {
        self.refresh = None;
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}
