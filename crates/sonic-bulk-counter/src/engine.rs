//! Bulk counter engine: shared state and buffer lifecycle.
//!
//! All mutable state sits in one [`EngineState`] behind a
//! `parking_lot::RwLock`. Mutating entry points take the write guard for
//! their whole decision (validate, check budget, call the driver, occupy),
//! so a completion releasing a slot can never interleave with an admission.
//! Single-counter reads only take the read guard.
//!
//! The transaction, reader and refresh entry points are implemented in
//! their own modules as further `impl BulkCounterEngine` blocks.

use crate::admission::AdmissionState;
use crate::buffer::{BufferArena, BufferState};
use crate::config::EngineConfig;
use crate::driver::BulkCounterDriver;
use crate::error::BulkCounterResult;
use crate::event::{BulkCounterEvent, EventReceiver, EventSender};
use crate::key::{CounterLayout, CounterSelectionKey};
use crate::stats::EngineStats;
use crate::types::{BufferHandle, Cookie};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub(crate) struct EngineState {
    pub config: EngineConfig,
    pub buffers: BufferArena,
    pub admission: AdmissionState,
    pub stats: EngineStats,
}

/// Asynchronous bulk counter transaction engine.
///
/// Cheap to share behind an `Arc`; every entry point takes `&self`.
pub struct BulkCounterEngine {
    pub(crate) state: RwLock<EngineState>,
    pub(crate) driver: Arc<dyn BulkCounterDriver>,
    events: EventSender,
}

impl BulkCounterEngine {
    /// Creates an engine over `driver`.
    ///
    /// Returns the engine and the receiver of its completion events.
    pub fn new(
        driver: Arc<dyn BulkCounterDriver>,
        config: EngineConfig,
    ) -> BulkCounterResult<(Self, EventReceiver)> {
        config.validate()?;
        let (events, receiver) = mpsc::unbounded_channel();

        info!(
            max_buffers = config.max_buffers,
            pool_entries = config.buffer_pool_entries,
            "bulk counter engine initialized"
        );

        let engine = Self {
            state: RwLock::new(EngineState {
                buffers: BufferArena::new(config.max_buffers, config.buffer_pool_entries),
                admission: AdmissionState::new(),
                stats: EngineStats::default(),
                config,
            }),
            driver,
            events,
        };
        Ok((engine, receiver))
    }

    /// Returns the engine limits.
    pub fn config(&self) -> EngineConfig {
        self.state.read().config.clone()
    }

    /// Allocates a buffer bound to `key` for its whole life.
    ///
    /// # Errors
    ///
    /// * `ParamError` if the key is malformed
    /// * `NoMemory` if the buffer or entry limits are reached
    pub fn buffer_create(
        &self,
        key: CounterSelectionKey,
        cookie: Cookie,
    ) -> BulkCounterResult<BufferHandle> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        key.validate(&state.config)?;
        let layout = CounterLayout::new(&key, &state.config)?;
        let entries = layout.entries();
        let key_type = key.key_type();

        let handle = state.buffers.allocate(key, layout, cookie)?;
        state.stats.buffers_created += 1;

        info!(
            buffer = %handle,
            key_type = %key_type,
            entries,
            cookie,
            "bulk counter buffer created"
        );
        Ok(handle)
    }

    /// Frees a buffer.
    ///
    /// # Errors
    ///
    /// * `InvalidHandle` for a null or stale handle
    /// * `ResourceInUse` while a transaction (running or disabling)
    ///   references the buffer
    pub fn buffer_destroy(&self, handle: BufferHandle) -> BulkCounterResult<()> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let buffer = state.buffers.release(handle).map_err(|e| {
            debug!(buffer = %handle, error = %e, "buffer destroy rejected");
            e
        })?;
        state.stats.buffers_destroyed += 1;

        info!(
            buffer = %handle,
            key_type = %buffer.key.key_type(),
            "bulk counter buffer destroyed"
        );
        Ok(())
    }

    /// Current lifecycle state of a buffer.
    pub fn buffer_state(&self, handle: BufferHandle) -> BulkCounterResult<BufferState> {
        Ok(self.state.read().buffers.get(handle)?.state)
    }

    /// The selection key a buffer was created with.
    pub fn buffer_key(&self, handle: BufferHandle) -> BulkCounterResult<CounterSelectionKey> {
        Ok(self.state.read().buffers.get(handle)?.key.clone())
    }

    pub fn live_buffers(&self) -> usize {
        self.state.read().buffers.live()
    }

    /// Occupied transaction slots, the refresh included.
    pub fn slots_in_use(&self) -> usize {
        self.state.read().admission.in_use()
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.state.read();
        EngineStats {
            buffers_live: state.buffers.live(),
            pool_entries_in_use: state.buffers.entries_in_use(),
            slots_in_use: state.admission.in_use(),
            ..state.stats.clone()
        }
    }

    /// Tears the engine down.
    ///
    /// In-flight transactions and the refresh are canceled at the driver,
    /// every buffer is freed and all handles become stale. No events are
    /// raised for the torn-down transactions; their late completions are
    /// ignored. Returns the number of buffers invalidated.
    pub fn deinit(&self) -> usize {
        let mut guard = self.state.write();
        let state = &mut *guard;

        for slot in state.admission.clear() {
            if let Err(e) = self.driver.cancel(slot.txn) {
                warn!(txn = %slot.txn, class = %slot.class, error = %e, "cancel on deinit failed");
            }
        }
        let invalidated = state.buffers.invalidate_all();

        info!(buffers = invalidated, "bulk counter engine deinitialized");
        invalidated
    }

    pub(crate) fn emit(&self, event: BulkCounterEvent) {
        if let Err(e) = self.events.send(event) {
            warn!(event = ?e.0, "event receiver closed, dropping completion event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BulkCounterError;
    use crate::key::{FlowCounterKey, PortCounterGroup, PortCounterKey};
    use crate::sim::SimDriver;
    use crate::types::LogPort;

    fn engine_with(config: EngineConfig) -> (BulkCounterEngine, EventReceiver) {
        let driver = Arc::new(SimDriver::new(&config));
        BulkCounterEngine::new(driver, config).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_config() {
        let config = EngineConfig {
            max_buffers: 0,
            ..Default::default()
        };
        let driver = Arc::new(SimDriver::new(&EngineConfig::default()));
        assert!(BulkCounterEngine::new(driver, config).is_err());
    }

    #[test]
    fn test_create_and_destroy() {
        let (engine, _events) = engine_with(EngineConfig::default());
        let key = CounterSelectionKey::Flow(FlowCounterKey::new(0, 8));
        let handle = engine.buffer_create(key.clone(), 5).unwrap();

        assert_eq!(engine.buffer_key(handle).unwrap(), key);
        assert_eq!(engine.buffer_state(handle).unwrap(), BufferState::Idle);
        assert_eq!(engine.live_buffers(), 1);

        engine.buffer_destroy(handle).unwrap();
        assert_eq!(engine.live_buffers(), 0);
        assert!(matches!(
            engine.buffer_destroy(handle).unwrap_err(),
            BulkCounterError::InvalidHandle { .. }
        ));
    }

    #[test]
    fn test_create_malformed_key() {
        let (engine, _events) = engine_with(EngineConfig::default());
        let key = CounterSelectionKey::Port(PortCounterKey {
            ports: vec![],
            groups: vec![PortCounterGroup::Ieee8023],
            ..Default::default()
        });
        assert!(matches!(
            engine.buffer_create(key, 0).unwrap_err(),
            BulkCounterError::ParamError { .. }
        ));
    }

    #[test]
    fn test_create_no_memory() {
        let (engine, _events) = engine_with(EngineConfig {
            buffer_pool_entries: 10,
            ..Default::default()
        });
        let key = CounterSelectionKey::Flow(FlowCounterKey::new(0, 11));
        assert!(matches!(
            engine.buffer_create(key, 0).unwrap_err(),
            BulkCounterError::NoMemory { .. }
        ));
    }

    #[test]
    fn test_destroy_null_handle() {
        let (engine, _events) = engine_with(EngineConfig::default());
        assert!(matches!(
            engine.buffer_destroy(BufferHandle::NULL).unwrap_err(),
            BulkCounterError::InvalidHandle { .. }
        ));
    }

    #[test]
    fn test_stats_gauges() {
        let (engine, _events) = engine_with(EngineConfig::default());
        let key = CounterSelectionKey::Port(PortCounterKey {
            ports: vec![LogPort::network(1)],
            groups: vec![PortCounterGroup::Rfc2863],
            ..Default::default()
        });
        engine.buffer_create(key, 0).unwrap();

        let stats = engine.stats();
        assert_eq!(stats.buffers_created, 1);
        assert_eq!(stats.buffers_live, 1);
        assert_eq!(stats.pool_entries_in_use, 1);
        assert_eq!(stats.slots_in_use, 0);
    }
}
