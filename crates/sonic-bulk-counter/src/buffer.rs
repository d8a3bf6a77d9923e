//! Counter buffer manager.
//!
//! Buffers live in an arena addressed by [`BufferHandle`]s. A handle
//! carries the generation of its arena slot; destroying a buffer bumps the
//! generation so the old handle can never reach whatever is allocated in
//! the slot next. Lookups never create entries.

use crate::driver::BulkOperation;
use crate::error::{BulkCounterError, BulkCounterResult};
use crate::key::{CounterLayout, CounterSelectionKey};
use crate::types::{BufferHandle, Cookie, CounterValue, TransactionId};
use serde::Serialize;
use std::fmt;

/// Lifecycle state of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BufferState {
    /// No transaction and no readable values
    Idle,
    /// A transaction was admitted and has not completed
    Running { txn: TransactionId, op: BulkOperation },
    /// The running transaction was disabled; waiting for its completion
    Disabling { txn: TransactionId },
    /// The last transaction completed; values are readable
    Completed,
}

impl BufferState {
    /// Returns true while a transaction references the buffer.
    pub fn is_busy(&self) -> bool {
        matches!(self, BufferState::Running { .. } | BufferState::Disabling { .. })
    }

    /// Transaction currently referencing the buffer.
    pub fn txn(&self) -> Option<TransactionId> {
        match self {
            BufferState::Running { txn, .. } | BufferState::Disabling { txn } => Some(*txn),
            _ => None,
        }
    }
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferState::Idle => write!(f, "idle"),
            BufferState::Running { txn, op } => write!(f, "running {} ({})", txn, op),
            BufferState::Disabling { txn } => write!(f, "disabling {}", txn),
            BufferState::Completed => write!(f, "completed"),
        }
    }
}

/// A bulk counter buffer bound to one selection key.
#[derive(Debug)]
pub(crate) struct CounterBuffer {
    pub key: CounterSelectionKey,
    pub layout: CounterLayout,
    pub cookie: Cookie,
    pub state: BufferState,
    /// Reserved for `layout.entries()` values at creation
    storage: Vec<CounterValue>,
}

impl CounterBuffer {
    /// Values of the last completed transaction.
    pub fn values(&self) -> Option<&[CounterValue]> {
        match self.state {
            BufferState::Completed => Some(&self.storage),
            _ => None,
        }
    }

    /// Drops values of a previous transaction.
    pub fn discard_values(&mut self) {
        self.storage.clear();
    }

    /// Stores the values of a completed transaction.
    pub fn store_values(&mut self, values: &[CounterValue]) -> BulkCounterResult<()> {
        if values.len() != self.layout.entries() {
            return Err(BulkCounterError::general(format!(
                "hardware returned {} values, buffer holds {}",
                values.len(),
                self.layout.entries()
            )));
        }
        self.storage.clear();
        self.storage.extend_from_slice(values);
        Ok(())
    }
}

#[derive(Debug)]
struct ArenaSlot {
    generation: u32,
    buffer: Option<CounterBuffer>,
}

fn next_generation(generation: u32) -> u32 {
    match generation.wrapping_add(1) {
        0 => 1,
        g => g,
    }
}

/// Arena of live buffers with allocation limits.
#[derive(Debug)]
pub(crate) struct BufferArena {
    slots: Vec<ArenaSlot>,
    free: Vec<u32>,
    live: usize,
    entries_in_use: usize,
    max_buffers: usize,
    pool_entries: usize,
}

impl BufferArena {
    pub fn new(max_buffers: usize, pool_entries: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            entries_in_use: 0,
            max_buffers,
            pool_entries,
        }
    }

    pub fn live(&self) -> usize {
        self.live
    }

    pub fn entries_in_use(&self) -> usize {
        self.entries_in_use
    }

    /// Allocates a buffer for an already validated key.
    pub fn allocate(
        &mut self,
        key: CounterSelectionKey,
        layout: CounterLayout,
        cookie: Cookie,
    ) -> BulkCounterResult<BufferHandle> {
        if self.live >= self.max_buffers {
            return Err(BulkCounterError::no_memory(format!(
                "buffer limit of {} reached",
                self.max_buffers
            )));
        }

        let entries = layout.entries();
        let available = self.pool_entries - self.entries_in_use;
        if entries > available {
            return Err(BulkCounterError::no_memory(format!(
                "buffer needs {} entries, {} available",
                entries, available
            )));
        }

        let mut storage = Vec::new();
        storage
            .try_reserve_exact(entries)
            .map_err(|e| BulkCounterError::no_memory(format!("value storage: {}", e)))?;

        let buffer = CounterBuffer {
            key,
            layout,
            cookie,
            state: BufferState::Idle,
            storage,
        };

        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.buffer = Some(buffer);
                BufferHandle::new(index, slot.generation)
            }
            None => {
                let index = u32::try_from(self.slots.len())
                    .map_err(|_| BulkCounterError::no_memory("buffer arena exhausted"))?;
                self.slots.push(ArenaSlot {
                    generation: 1,
                    buffer: Some(buffer),
                });
                BufferHandle::new(index, 1)
            }
        };

        self.live += 1;
        self.entries_in_use += entries;
        Ok(handle)
    }

    fn slot_index(&self, handle: BufferHandle) -> BulkCounterResult<usize> {
        if handle.is_null() {
            return Err(BulkCounterError::invalid_handle("null buffer handle"));
        }
        match self.slots.get(handle.index() as usize) {
            Some(slot) if slot.generation == handle.generation() && slot.buffer.is_some() => {
                Ok(handle.index() as usize)
            }
            _ => Err(BulkCounterError::invalid_handle(format!(
                "stale or unknown buffer handle {}",
                handle
            ))),
        }
    }

    pub fn get(&self, handle: BufferHandle) -> BulkCounterResult<&CounterBuffer> {
        let index = self.slot_index(handle)?;
        self.slots[index]
            .buffer
            .as_ref()
            .ok_or_else(|| BulkCounterError::invalid_handle(format!("buffer {} is free", handle)))
    }

    pub fn get_mut(&mut self, handle: BufferHandle) -> BulkCounterResult<&mut CounterBuffer> {
        let index = self.slot_index(handle)?;
        self.slots[index]
            .buffer
            .as_mut()
            .ok_or_else(|| BulkCounterError::invalid_handle(format!("buffer {} is free", handle)))
    }

    /// Frees an idle or completed buffer.
    pub fn release(&mut self, handle: BufferHandle) -> BulkCounterResult<CounterBuffer> {
        let index = self.slot_index(handle)?;
        let slot = &mut self.slots[index];

        if let Some(buffer) = &slot.buffer {
            if buffer.state.is_busy() {
                return Err(BulkCounterError::resource_in_use(format!(
                    "buffer {} is {}",
                    handle, buffer.state
                )));
            }
        }

        let buffer = slot
            .buffer
            .take()
            .ok_or_else(|| BulkCounterError::invalid_handle(format!("buffer {} is free", handle)))?;
        slot.generation = next_generation(slot.generation);
        self.free.push(handle.index());
        self.live -= 1;
        self.entries_in_use -= buffer.layout.entries();
        Ok(buffer)
    }

    /// Frees every buffer regardless of state. All outstanding handles
    /// become stale. Returns the number of buffers freed.
    pub fn invalidate_all(&mut self) -> usize {
        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.buffer.take().is_some() {
                slot.generation = next_generation(slot.generation);
                self.free.push(index as u32);
                freed += 1;
            }
        }
        self.live = 0;
        self.entries_in_use = 0;
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::key::FlowCounterKey;

    fn flow(base: u32, count: u32) -> (CounterSelectionKey, CounterLayout) {
        let key = CounterSelectionKey::Flow(FlowCounterKey::new(base, count));
        let layout = CounterLayout::new(&key, &EngineConfig::default()).unwrap();
        (key, layout)
    }

    #[test]
    fn test_allocate_and_get() {
        let mut arena = BufferArena::new(4, 1024);
        let (key, layout) = flow(0, 16);
        let handle = arena.allocate(key.clone(), layout, 42).unwrap();

        assert!(!handle.is_null());
        let buffer = arena.get(handle).unwrap();
        assert_eq!(buffer.key, key);
        assert_eq!(buffer.cookie, 42);
        assert_eq!(buffer.state, BufferState::Idle);
        assert!(buffer.values().is_none());
        assert_eq!(arena.live(), 1);
        assert_eq!(arena.entries_in_use(), 16);
    }

    #[test]
    fn test_null_handle_rejected() {
        let arena = BufferArena::new(4, 1024);
        let err = arena.get(BufferHandle::NULL).unwrap_err();
        assert!(matches!(err, BulkCounterError::InvalidHandle { .. }));
    }

    #[test]
    fn test_stale_handle_after_release() {
        let mut arena = BufferArena::new(4, 1024);
        let (key, layout) = flow(0, 16);
        let old = arena.allocate(key.clone(), layout.clone(), 0).unwrap();
        arena.release(old).unwrap();

        // The slot is reused with a new generation
        let new = arena.allocate(key, layout, 0).unwrap();
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());
        assert!(matches!(
            arena.get(old).unwrap_err(),
            BulkCounterError::InvalidHandle { .. }
        ));
        assert!(arena.get(new).is_ok());
    }

    #[test]
    fn test_release_busy_buffer() {
        let mut arena = BufferArena::new(4, 1024);
        let (key, layout) = flow(0, 16);
        let handle = arena.allocate(key, layout, 0).unwrap();
        arena.get_mut(handle).unwrap().state = BufferState::Running {
            txn: TransactionId::from_raw(1),
            op: BulkOperation::Read,
        };

        let err = arena.release(handle).unwrap_err();
        assert!(matches!(err, BulkCounterError::ResourceInUse { .. }));
        assert_eq!(arena.live(), 1);
    }

    #[test]
    fn test_buffer_limit() {
        let mut arena = BufferArena::new(1, 1024);
        let (key, layout) = flow(0, 16);
        arena.allocate(key.clone(), layout.clone(), 0).unwrap();
        let err = arena.allocate(key, layout, 0).unwrap_err();
        assert!(matches!(err, BulkCounterError::NoMemory { .. }));
    }

    #[test]
    fn test_pool_entries_limit() {
        let mut arena = BufferArena::new(8, 20);
        let (key, layout) = flow(0, 16);
        let handle = arena.allocate(key.clone(), layout.clone(), 0).unwrap();
        assert!(matches!(
            arena.allocate(key.clone(), layout.clone(), 0).unwrap_err(),
            BulkCounterError::NoMemory { .. }
        ));

        // Entries return to the pool on release
        arena.release(handle).unwrap();
        assert!(arena.allocate(key, layout, 0).is_ok());
    }

    #[test]
    fn test_store_values_length_mismatch() {
        let mut arena = BufferArena::new(4, 1024);
        let (key, layout) = flow(0, 4);
        let handle = arena.allocate(key, layout, 0).unwrap();
        let buffer = arena.get_mut(handle).unwrap();

        assert!(buffer.store_values(&[CounterValue::new(1, 1)]).is_err());
        assert!(buffer.store_values(&[CounterValue::new(1, 1); 4]).is_ok());
        buffer.state = BufferState::Completed;
        assert_eq!(buffer.values().unwrap().len(), 4);
    }

    #[test]
    fn test_invalidate_all() {
        let mut arena = BufferArena::new(4, 1024);
        let (key, layout) = flow(0, 4);
        let a = arena.allocate(key.clone(), layout.clone(), 0).unwrap();
        let b = arena.allocate(key, layout, 0).unwrap();

        assert_eq!(arena.invalidate_all(), 2);
        assert_eq!(arena.live(), 0);
        assert_eq!(arena.entries_in_use(), 0);
        assert!(arena.get(a).is_err());
        assert!(arena.get(b).is_err());
    }
}
