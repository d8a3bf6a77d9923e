//! Asynchronous bulk counter transaction engine.
//!
//! Clients allocate buffers bound to a counter selection key, start bulk
//! read transactions that the hardware runs in the background, learn about
//! completion through events and then read individual counters out of the
//! completed buffers.
//!
//! # Architecture
//!
//! - [`types`]: log ports, buffer handles, transaction ids and counter values
//! - [`error`]: status codes and the error type
//! - [`key`]: selection keys, read keys and buffer layouts
//! - [`driver`]: the hardware seam ([`BulkCounterDriver`]) and completions
//! - [`admission`]: the transaction slot budget and pairing rule
//! - [`engine`]: shared state, buffer lifecycle and teardown
//! - [`sim`]: a software model of the hardware
//!
//! Transaction start, single-counter reads and the accumulated counter
//! refresh are methods on [`BulkCounterEngine`].
//!
//! # Example
//!
//! ```
//! use sonic_bulk_counter::{
//!     BulkCounterEngine, BulkCounterEvent, BulkCounterResult, BulkOperation, CounterReadKey,
//!     CounterSelectionKey, CounterValue, EngineConfig, FlowCounterKey, SimDriver,
//!     TransactionStatus,
//! };
//! use std::sync::Arc;
//!
//! fn main() -> BulkCounterResult<()> {
//!     let config = EngineConfig::default();
//!     let driver = Arc::new(SimDriver::new(&config));
//!     let (engine, mut events) = BulkCounterEngine::new(driver.clone(), config)?;
//!
//!     driver.add_flow_traffic(3, 10, 640);
//!     let key = CounterSelectionKey::Flow(FlowCounterKey::new(0, 16));
//!     let handle = engine.buffer_create(key, 1)?;
//!     engine.transaction_start(handle, BulkOperation::Read)?;
//!     for completion in driver.complete_pending() {
//!         engine.handle_completion(completion);
//!     }
//!
//!     assert_eq!(
//!         events.try_recv().ok(),
//!         Some(BulkCounterEvent::ReadDone {
//!             handle,
//!             cookie: 1,
//!             status: TransactionStatus::Completed,
//!         })
//!     );
//!     let value = engine.counter_read(handle, CounterReadKey::flow(3))?;
//!     assert_eq!(value, CounterValue::new(10, 640));
//!     Ok(())
//! }
//! ```

pub mod admission;
mod buffer;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod event;
mod executor;
pub mod key;
mod reader;
mod refresh;
pub mod sim;
pub mod stats;
pub mod types;

pub use admission::{pairing_allowed, TransactionClass, MAX_CONCURRENT_TRANSACTIONS};
pub use buffer::BufferState;
pub use config::EngineConfig;
pub use driver::{BulkCounterDriver, BulkOperation, HwCompletion, HwReadRequest, LagSnapshot};
pub use engine::BulkCounterEngine;
pub use error::{BulkCounterError, BulkCounterResult, BulkCounterStatus};
pub use event::{BulkCounterEvent, EventReceiver, TransactionStatus};
pub use key::{
    CounterKeyType, CounterLayout, CounterReadKey, CounterSelectionKey, ElephantFlowKey,
    FlowCounterKey, FlowCounterKind, PortCounterGroup, PortCounterKey,
};
pub use sim::SimDriver;
pub use stats::EngineStats;
pub use types::{BufferHandle, Cookie, CounterValue, FlowCounterId, LogPort, TransactionId};
