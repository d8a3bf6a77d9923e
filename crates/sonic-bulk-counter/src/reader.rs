//! Single-counter reads from completed buffers.

use crate::buffer::{BufferState, CounterBuffer};
use crate::engine::BulkCounterEngine;
use crate::error::{BulkCounterError, BulkCounterResult};
use crate::key::CounterReadKey;
use crate::types::{BufferHandle, CounterValue};

fn readable_values(handle: BufferHandle, buffer: &CounterBuffer) -> BulkCounterResult<&[CounterValue]> {
    match buffer.state {
        BufferState::Running { txn, .. } | BufferState::Disabling { txn } => Err(
            BulkCounterError::partially_complete(format!("buffer {} waits for {}", handle, txn)),
        ),
        BufferState::Idle => Err(BulkCounterError::param_error(format!(
            "buffer {} holds no completed values",
            handle
        ))),
        BufferState::Completed => buffer.values().ok_or_else(|| {
            BulkCounterError::general(format!("buffer {} lost its values", handle))
        }),
    }
}

impl BulkCounterEngine {
    /// Reads one counter from the last completed transaction of a buffer.
    ///
    /// Values stay readable until the next transaction starts on the
    /// buffer or the buffer is destroyed.
    ///
    /// # Errors
    ///
    /// * `InvalidHandle` for a null or stale handle
    /// * `PartiallyComplete` while a transaction is in flight
    /// * `ParamError` if no transaction completed or the key is not covered
    /// * `ParamNull` if an indexed group is read without an index
    pub fn counter_read(
        &self,
        handle: BufferHandle,
        read_key: CounterReadKey,
    ) -> BulkCounterResult<CounterValue> {
        let state = self.state.read();
        let buffer = state.buffers.get(handle)?;
        let values = readable_values(handle, buffer)?;
        let slot = buffer.layout.slot(&read_key)?;

        values.get(slot).copied().ok_or_else(|| {
            BulkCounterError::general(format!("{} resolved past the end of buffer {}", read_key, handle))
        })
    }

    /// Every counter of a completed buffer, in layout order.
    pub fn counter_read_all(
        &self,
        handle: BufferHandle,
    ) -> BulkCounterResult<Vec<(CounterReadKey, CounterValue)>> {
        let state = self.state.read();
        let buffer = state.buffers.get(handle)?;
        let values = readable_values(handle, buffer)?;

        Ok(buffer
            .layout
            .read_keys()
            .into_iter()
            .zip(values.iter().copied())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::driver::BulkOperation;
    use crate::event::EventReceiver;
    use crate::key::{CounterSelectionKey, FlowCounterKey, PortCounterGroup, PortCounterKey};
    use crate::sim::SimDriver;
    use crate::types::LogPort;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn setup() -> (BulkCounterEngine, Arc<SimDriver>, EventReceiver) {
        let config = EngineConfig::default();
        let driver = Arc::new(SimDriver::new(&config));
        let (engine, events) = BulkCounterEngine::new(driver.clone(), config).unwrap();
        (engine, driver, events)
    }

    fn run(engine: &BulkCounterEngine, driver: &SimDriver, handle: BufferHandle) {
        engine.transaction_start(handle, BulkOperation::Read).unwrap();
        for completion in driver.complete_pending() {
            engine.handle_completion(completion);
        }
    }

    #[test]
    fn test_read_before_any_transaction() {
        let (engine, _driver, _events) = setup();
        let handle = engine
            .buffer_create(CounterSelectionKey::Flow(FlowCounterKey::new(0, 2)), 0)
            .unwrap();
        assert!(matches!(
            engine.counter_read(handle, CounterReadKey::flow(0)).unwrap_err(),
            BulkCounterError::ParamError { .. }
        ));
    }

    #[test]
    fn test_read_while_running() {
        let (engine, _driver, _events) = setup();
        let handle = engine
            .buffer_create(CounterSelectionKey::Flow(FlowCounterKey::new(0, 2)), 0)
            .unwrap();
        engine.transaction_start(handle, BulkOperation::Read).unwrap();
        assert!(matches!(
            engine.counter_read(handle, CounterReadKey::flow(0)).unwrap_err(),
            BulkCounterError::PartiallyComplete { .. }
        ));
    }

    #[test]
    fn test_read_flow_values() {
        let (engine, driver, _events) = setup();
        driver.add_flow_traffic(11, 5, 500);
        let handle = engine
            .buffer_create(CounterSelectionKey::Flow(FlowCounterKey::new(10, 4)), 0)
            .unwrap();
        run(&engine, &driver, handle);

        assert_eq!(
            engine.counter_read(handle, CounterReadKey::flow(11)).unwrap(),
            CounterValue::new(5, 500)
        );
        assert_eq!(
            engine.counter_read(handle, CounterReadKey::flow(10)).unwrap(),
            CounterValue::new(0, 0)
        );
        assert!(engine.counter_read(handle, CounterReadKey::flow(14)).is_err());
    }

    #[test]
    fn test_indexed_group_without_index() {
        let (engine, driver, _events) = setup();
        let port = LogPort::network(1);
        let handle = engine
            .buffer_create(
                CounterSelectionKey::Port(PortCounterKey {
                    ports: vec![port],
                    groups: vec![PortCounterGroup::Priority],
                    priorities: vec![2, 5],
                    ..Default::default()
                }),
                0,
            )
            .unwrap();
        run(&engine, &driver, handle);

        assert!(matches!(
            engine
                .counter_read(handle, CounterReadKey::port(port, PortCounterGroup::Priority))
                .unwrap_err(),
            BulkCounterError::ParamNull { .. }
        ));
        assert!(engine
            .counter_read(
                handle,
                CounterReadKey::port_indexed(port, PortCounterGroup::Priority, 5)
            )
            .is_ok());
        assert!(engine
            .counter_read(
                handle,
                CounterReadKey::port_indexed(port, PortCounterGroup::Priority, 3)
            )
            .is_err());
    }

    #[test]
    fn test_read_all_in_layout_order() {
        let (engine, driver, _events) = setup();
        driver.add_flow_traffic(1, 1, 100);
        let handle = engine
            .buffer_create(CounterSelectionKey::Flow(FlowCounterKey::new(0, 3)), 0)
            .unwrap();
        run(&engine, &driver, handle);

        let all = engine.counter_read_all(handle).unwrap();
        assert_eq!(
            all,
            vec![
                (CounterReadKey::flow(0), CounterValue::new(0, 0)),
                (CounterReadKey::flow(1), CounterValue::new(1, 100)),
                (CounterReadKey::flow(2), CounterValue::new(0, 0)),
            ]
        );
    }
}
