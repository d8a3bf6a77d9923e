//! Transaction executor.
//!
//! Starts, disables and completes bulk read transactions. A start is
//! decided entirely under the engine write guard: buffer checks, the slot
//! budget, the LAG snapshot and the driver call all happen before the slot
//! is occupied, so a failed start leaves no trace besides the rejection
//! counter.

use crate::admission::{SlotOccupant, TransactionClass, TransactionSlot};
use crate::buffer::BufferState;
use crate::driver::{BulkCounterDriver, BulkOperation, HwCompletion, HwReadRequest, LagSnapshot};
use crate::engine::BulkCounterEngine;
use crate::error::{BulkCounterError, BulkCounterResult, BulkCounterStatus};
use crate::event::{BulkCounterEvent, TransactionStatus};
use crate::key::CounterSelectionKey;
use crate::types::{BufferHandle, CounterValue, TransactionId};
use tracing::{debug, info, warn};

/// Captures the current membership of every LAG in `key`.
fn snapshot_lags(
    driver: &dyn BulkCounterDriver,
    key: &CounterSelectionKey,
) -> BulkCounterResult<LagSnapshot> {
    key.lag_ports()
        .into_iter()
        .map(|lag| driver.lag_members(lag).map(|members| (lag, members)))
        .collect()
}

impl BulkCounterEngine {
    /// Starts a bulk operation on a buffer.
    ///
    /// Read operations are admitted against the transaction slot budget
    /// and end with exactly one [`BulkCounterEvent::ReadDone`].
    /// [`BulkOperation::Disable`] cancels the running transaction of the
    /// buffer instead; its slot is held until the hardware reports the
    /// cancellation.
    ///
    /// # Errors
    ///
    /// * `InvalidHandle` for a null or stale handle
    /// * `CmdUnsupported` for a flush operation on a non-flow buffer
    /// * `ResourceInUse` if the buffer is busy or no slot may be taken
    /// * `ParamError` when disabling a buffer with no running transaction
    pub fn transaction_start(&self, handle: BufferHandle, op: BulkOperation) -> BulkCounterResult<()> {
        if op == BulkOperation::Disable {
            return self.transaction_disable(handle);
        }

        let mut guard = self.state.write();
        let state = &mut *guard;

        let buffer = state.buffers.get(handle)?;
        if op.is_flush() && !buffer.key.supports_flush() {
            return Err(BulkCounterError::cmd_unsupported(format!(
                "{} is not supported on {} buffers",
                op,
                buffer.key.key_type()
            )));
        }
        if buffer.state.is_busy() {
            state.stats.transactions_rejected += 1;
            return Err(BulkCounterError::resource_in_use(format!(
                "buffer {} is {}",
                handle, buffer.state
            )));
        }

        let class = TransactionClass::from(buffer.key.key_type());
        let index = match state.admission.admit(class) {
            Ok(index) => index,
            Err(e) => {
                state.stats.transactions_rejected += 1;
                debug!(buffer = %handle, op = %op, error = %e, "transaction rejected");
                return Err(e);
            }
        };

        let lag_members = snapshot_lags(&*self.driver, &buffer.key)?;
        let txn = state.admission.next_txn_id();
        let request = HwReadRequest {
            txn,
            op,
            key: buffer.key.clone(),
            entries: buffer.layout.entries(),
            lag_members: lag_members.clone(),
        };
        self.driver.start_read(&request)?;

        state.admission.occupy(
            index,
            TransactionSlot {
                txn,
                class,
                occupant: SlotOccupant::Read {
                    buffer: handle,
                    lag_members,
                },
            },
        );
        let buffer = state.buffers.get_mut(handle)?;
        buffer.discard_values();
        buffer.state = BufferState::Running { txn, op };
        state.stats.transactions_admitted += 1;

        debug!(buffer = %handle, txn = %txn, op = %op, class = %class, "transaction started");
        Ok(())
    }

    fn transaction_disable(&self, handle: BufferHandle) -> BulkCounterResult<()> {
        let mut guard = self.state.write();
        let buffer = guard.buffers.get_mut(handle)?;

        match buffer.state {
            BufferState::Running { txn, .. } => {
                self.driver.cancel(txn)?;
                buffer.state = BufferState::Disabling { txn };
                info!(buffer = %handle, txn = %txn, "transaction disabling");
                Ok(())
            }
            BufferState::Disabling { txn } => Err(BulkCounterError::resource_in_use(format!(
                "{} on buffer {} is already disabling",
                txn, handle
            ))),
            BufferState::Idle | BufferState::Completed => Err(BulkCounterError::param_error(
                format!("buffer {} has no running transaction", handle),
            )),
        }
    }

    /// Feeds a hardware completion into the engine.
    ///
    /// Returns false if the completion names no outstanding transaction;
    /// such completions are logged and dropped.
    pub fn handle_completion(&self, completion: HwCompletion) -> bool {
        match completion {
            HwCompletion::Read { txn, result } => self.complete_read(txn, result),
            HwCompletion::Refresh { txn, result } => self.complete_refresh(txn, result),
        }
    }

    fn complete_read(
        &self,
        txn: TransactionId,
        result: Result<Vec<CounterValue>, BulkCounterStatus>,
    ) -> bool {
        let mut guard = self.state.write();
        let state = &mut *guard;

        if !matches!(
            state.admission.find(txn).map(|slot| &slot.occupant),
            Some(SlotOccupant::Read { .. })
        ) {
            warn!(txn = %txn, "read completion for unknown transaction ignored");
            return false;
        }
        let (handle, lag_members) = match state.admission.release(txn).map(|slot| slot.occupant) {
            Some(SlotOccupant::Read {
                buffer,
                lag_members,
            }) => (buffer, lag_members),
            _ => return false,
        };

        let buffer = match state.buffers.get_mut(handle) {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!(txn = %txn, buffer = %handle, error = %e, "read completion for missing buffer");
                return true;
            }
        };

        let status = match (buffer.state, result) {
            (BufferState::Disabling { .. }, _) => TransactionStatus::Canceled,
            (_, Ok(values)) => match buffer.store_values(&values) {
                Ok(()) => TransactionStatus::Completed,
                Err(e) => {
                    warn!(txn = %txn, buffer = %handle, error = %e, "read completion rejected");
                    TransactionStatus::Failed(e.status())
                }
            },
            (_, Err(status)) => TransactionStatus::Failed(status),
        };

        if status.is_completed() {
            buffer.state = BufferState::Completed;
            state.stats.transactions_completed += 1;
        } else {
            buffer.discard_values();
            buffer.state = BufferState::Idle;
            match status {
                TransactionStatus::Canceled => state.stats.transactions_canceled += 1,
                _ => state.stats.transactions_failed += 1,
            }
        }

        debug!(
            buffer = %handle,
            txn = %txn,
            status = %status,
            lags = ?lag_members.keys().collect::<Vec<_>>(),
            "transaction done"
        );
        self.emit(BulkCounterEvent::ReadDone {
            handle,
            cookie: buffer.cookie,
            status,
        });
        true
    }

    /// Returns true while a port read transaction is in flight.
    pub fn is_port_transaction_running(&self) -> bool {
        self.state
            .read()
            .admission
            .is_class_running(TransactionClass::Port)
    }

    /// Fails with `ResourceInUse` while a port read transaction is in
    /// flight. Callers about to reconfigure port counters check this first.
    pub fn ensure_port_counters_available(&self) -> BulkCounterResult<()> {
        if self.is_port_transaction_running() {
            return Err(BulkCounterError::resource_in_use(
                "port counter transaction in progress",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::event::EventReceiver;
    use crate::key::{ElephantFlowKey, FlowCounterKey, PortCounterGroup, PortCounterKey};
    use crate::sim::SimDriver;
    use crate::types::LogPort;
    use std::sync::Arc;

    fn setup() -> (BulkCounterEngine, Arc<SimDriver>, EventReceiver) {
        let config = EngineConfig::default();
        let driver = Arc::new(SimDriver::new(&config));
        let (engine, events) = BulkCounterEngine::new(driver.clone(), config).unwrap();
        (engine, driver, events)
    }

    fn flow_buffer(engine: &BulkCounterEngine, cookie: u64) -> BufferHandle {
        engine
            .buffer_create(CounterSelectionKey::Flow(FlowCounterKey::new(0, 4)), cookie)
            .unwrap()
    }

    fn port_buffer(engine: &BulkCounterEngine, ports: Vec<LogPort>) -> BufferHandle {
        engine
            .buffer_create(
                CounterSelectionKey::Port(PortCounterKey {
                    ports,
                    groups: vec![PortCounterGroup::Rfc2863],
                    ..Default::default()
                }),
                0,
            )
            .unwrap()
    }

    #[test]
    fn test_start_marks_buffer_running() {
        let (engine, driver, _events) = setup();
        let handle = flow_buffer(&engine, 1);

        engine.transaction_start(handle, BulkOperation::Read).unwrap();
        assert!(matches!(
            engine.buffer_state(handle).unwrap(),
            BufferState::Running {
                op: BulkOperation::Read,
                ..
            }
        ));
        assert_eq!(engine.slots_in_use(), 1);
        assert_eq!(driver.pending(), 1);
    }

    #[test]
    fn test_flush_on_port_buffer_unsupported() {
        let (engine, _driver, _events) = setup();
        let handle = port_buffer(&engine, vec![LogPort::network(1)]);

        let err = engine
            .transaction_start(handle, BulkOperation::ReadFlush)
            .unwrap_err();
        assert!(matches!(err, BulkCounterError::CmdUnsupported { .. }));
        assert_eq!(engine.slots_in_use(), 0);
    }

    #[test]
    fn test_busy_buffer_rejected() {
        let (engine, _driver, _events) = setup();
        let handle = flow_buffer(&engine, 1);
        engine.transaction_start(handle, BulkOperation::Read).unwrap();

        let err = engine.transaction_start(handle, BulkOperation::Read).unwrap_err();
        assert!(matches!(err, BulkCounterError::ResourceInUse { .. }));
        assert_eq!(engine.stats().transactions_rejected, 1);
    }

    #[test]
    fn test_driver_failure_occupies_nothing() {
        let (engine, driver, _events) = setup();
        let handle = flow_buffer(&engine, 1);
        driver.fail_next_start(BulkCounterStatus::NoMemory);

        let err = engine.transaction_start(handle, BulkOperation::Read).unwrap_err();
        assert!(matches!(err, BulkCounterError::NoMemory { .. }));
        assert_eq!(engine.slots_in_use(), 0);
        assert_eq!(engine.buffer_state(handle).unwrap(), BufferState::Idle);
    }

    #[test]
    fn test_unknown_lag_fails_start() {
        let (engine, _driver, _events) = setup();
        let handle = port_buffer(&engine, vec![LogPort::lag(9)]);

        assert!(engine.transaction_start(handle, BulkOperation::Read).is_err());
        assert_eq!(engine.slots_in_use(), 0);
    }

    #[test]
    fn test_lag_snapshot_passed_to_driver() {
        let (engine, driver, _events) = setup();
        let members = vec![LogPort::network(3), LogPort::network(4)];
        driver.set_lag_members(LogPort::lag(1), members.clone());
        let handle = port_buffer(&engine, vec![LogPort::network(1), LogPort::lag(1)]);

        engine.transaction_start(handle, BulkOperation::Read).unwrap();
        let requests = driver.started_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].lag_members.get(&LogPort::lag(1)), Some(&members));
        assert_eq!(requests[0].entries, 2);
    }

    #[test]
    fn test_disable_idle_buffer() {
        let (engine, _driver, _events) = setup();
        let handle = flow_buffer(&engine, 1);
        let err = engine
            .transaction_start(handle, BulkOperation::Disable)
            .unwrap_err();
        assert!(matches!(err, BulkCounterError::ParamError { .. }));
    }

    #[test]
    fn test_disable_twice() {
        let (engine, _driver, _events) = setup();
        let handle = flow_buffer(&engine, 1);
        engine.transaction_start(handle, BulkOperation::Read).unwrap();
        engine.transaction_start(handle, BulkOperation::Disable).unwrap();

        let err = engine
            .transaction_start(handle, BulkOperation::Disable)
            .unwrap_err();
        assert!(matches!(err, BulkCounterError::ResourceInUse { .. }));
        // Slot still held until the cancellation completes
        assert_eq!(engine.slots_in_use(), 1);
    }

    #[test]
    fn test_completion_emits_event() {
        let (engine, driver, mut events) = setup();
        let handle = flow_buffer(&engine, 77);
        engine.transaction_start(handle, BulkOperation::Read).unwrap();

        for completion in driver.complete_pending() {
            assert!(engine.handle_completion(completion));
        }
        assert_eq!(
            events.try_recv().unwrap(),
            BulkCounterEvent::ReadDone {
                handle,
                cookie: 77,
                status: TransactionStatus::Completed,
            }
        );
        assert_eq!(engine.buffer_state(handle).unwrap(), BufferState::Completed);
        assert_eq!(engine.slots_in_use(), 0);
    }

    #[test]
    fn test_failed_completion() {
        let (engine, driver, mut events) = setup();
        let handle = flow_buffer(&engine, 1);
        driver.fail_next_read(BulkCounterStatus::GeneralError);
        engine.transaction_start(handle, BulkOperation::Read).unwrap();

        for completion in driver.complete_pending() {
            engine.handle_completion(completion);
        }
        assert_eq!(
            events.try_recv().unwrap().status(),
            TransactionStatus::Failed(BulkCounterStatus::GeneralError)
        );
        assert_eq!(engine.buffer_state(handle).unwrap(), BufferState::Idle);
        assert_eq!(engine.stats().transactions_failed, 1);
    }

    #[test]
    fn test_short_value_list_fails_transaction() {
        let (engine, _driver, mut events) = setup();
        let handle = flow_buffer(&engine, 1);
        engine.transaction_start(handle, BulkOperation::Read).unwrap();
        let txn = engine.buffer_state(handle).unwrap().txn().unwrap();

        engine.handle_completion(HwCompletion::Read {
            txn,
            result: Ok(vec![CounterValue::new(1, 64)]),
        });
        assert_eq!(
            events.try_recv().unwrap().status(),
            TransactionStatus::Failed(BulkCounterStatus::GeneralError)
        );
    }

    #[test]
    fn test_unknown_completion_ignored() {
        let (engine, _driver, mut events) = setup();
        let handled = engine.handle_completion(HwCompletion::Read {
            txn: TransactionId::from_raw(999),
            result: Ok(vec![]),
        });
        assert!(!handled);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_port_transaction_guard() {
        let (engine, driver, _events) = setup();
        let handle = port_buffer(&engine, vec![LogPort::network(1)]);
        assert!(engine.ensure_port_counters_available().is_ok());

        engine.transaction_start(handle, BulkOperation::Read).unwrap();
        assert!(engine.is_port_transaction_running());
        assert!(matches!(
            engine.ensure_port_counters_available().unwrap_err(),
            BulkCounterError::ResourceInUse { .. }
        ));

        for completion in driver.complete_pending() {
            engine.handle_completion(completion);
        }
        assert!(!engine.is_port_transaction_running());
    }

    #[test]
    fn test_elephant_pairing() {
        let (engine, _driver, _events) = setup();
        let key = CounterSelectionKey::ElephantFlow(ElephantFlowKey {
            ports: vec![LogPort::network(1)],
        });
        let a = engine.buffer_create(key.clone(), 1).unwrap();
        let b = engine.buffer_create(key, 2).unwrap();
        let flow = flow_buffer(&engine, 3);

        engine.transaction_start(a, BulkOperation::Read).unwrap();
        assert!(matches!(
            engine.transaction_start(b, BulkOperation::Read).unwrap_err(),
            BulkCounterError::ResourceInUse { .. }
        ));
        engine.transaction_start(flow, BulkOperation::Read).unwrap();
        assert_eq!(engine.slots_in_use(), 2);
    }
}
