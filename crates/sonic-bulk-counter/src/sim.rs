//! Software model of the bulk counter hardware.
//!
//! [`SimDriver`] keeps per-counter packet and byte totals, a LAG table and
//! a queue of started operations. Nothing completes on its own: callers
//! drain the queue with [`SimDriver::complete_next`] or
//! [`SimDriver::complete_pending`] and feed the completions to the engine,
//! which makes every interleaving reproducible in tests.
//!
//! Accumulated flow counters follow the hardware model: traffic lands in a
//! pending delta that only becomes readable on a refresh or a flush read.
//! Regular flow counters are always current.

use crate::config::EngineConfig;
use crate::driver::{BulkCounterDriver, HwCompletion, HwReadRequest};
use crate::error::{BulkCounterError, BulkCounterResult, BulkCounterStatus};
use crate::key::{CounterLayout, CounterReadKey, CounterSelectionKey, FlowCounterKind, PortCounterGroup};
use crate::types::{CounterValue, FlowCounterId, LogPort, TransactionId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, trace};

type PortCounterId = (LogPort, PortCounterGroup, Option<u8>);

#[derive(Debug, Clone, Copy)]
struct FlowCounterState {
    visible: CounterValue,
    pending: CounterValue,
}

impl Default for FlowCounterState {
    fn default() -> Self {
        Self {
            visible: CounterValue::new(0, 0),
            pending: CounterValue::new(0, 0),
        }
    }
}

impl FlowCounterState {
    fn fold(&mut self) {
        self.visible = add(self.visible, self.pending);
        self.pending = CounterValue::new(0, 0);
    }
}

#[derive(Debug)]
enum PendingOp {
    Read(HwReadRequest),
    Refresh(TransactionId),
}

impl PendingOp {
    fn txn(&self) -> TransactionId {
        match self {
            PendingOp::Read(request) => request.txn,
            PendingOp::Refresh(txn) => *txn,
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    port_counters: HashMap<PortCounterId, CounterValue>,
    flow_counters: HashMap<FlowCounterId, FlowCounterState>,
    elephant_flows: HashMap<(LogPort, u16), CounterValue>,
    lags: HashMap<LogPort, Vec<LogPort>>,
    pending: VecDeque<PendingOp>,
    canceled: HashSet<TransactionId>,
    started: Vec<HwReadRequest>,
    fail_next_start: Option<BulkCounterStatus>,
    fail_next_read: Option<BulkCounterStatus>,
}

fn add(a: CounterValue, b: CounterValue) -> CounterValue {
    CounterValue::new(a.packets.wrapping_add(b.packets), a.bytes.wrapping_add(b.bytes))
}

/// Simulated bulk counter hardware.
#[derive(Debug)]
pub struct SimDriver {
    config: EngineConfig,
    state: Mutex<SimState>,
}

impl SimDriver {
    /// Creates a model whose layouts match an engine built with `config`.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.clone(),
            state: Mutex::new(SimState::default()),
        }
    }

    /// Replaces the members of a LAG.
    pub fn set_lag_members(&self, lag: LogPort, members: Vec<LogPort>) {
        self.state.lock().lags.insert(lag, members);
    }

    /// Adds traffic to a network port counter.
    pub fn add_port_traffic(
        &self,
        port: LogPort,
        group: PortCounterGroup,
        index: Option<u8>,
        packets: u64,
        bytes: u64,
    ) {
        let mut state = self.state.lock();
        let counter = state
            .port_counters
            .entry((port, group, index))
            .or_insert(CounterValue::new(0, 0));
        *counter = add(*counter, CounterValue::new(packets, bytes));
    }

    /// Adds traffic to a flow counter. Accumulated reads only see it after
    /// a refresh or a flush.
    pub fn add_flow_traffic(&self, id: FlowCounterId, packets: u64, bytes: u64) {
        let mut state = self.state.lock();
        let counter = state.flow_counters.entry(id).or_default();
        counter.pending = add(counter.pending, CounterValue::new(packets, bytes));
    }

    /// Records a detected elephant flow on a port.
    pub fn set_elephant_flow(&self, port: LogPort, flow: u16, packets: u64, bytes: u64) {
        self.state
            .lock()
            .elephant_flows
            .insert((port, flow), CounterValue::new(packets, bytes));
    }

    /// The next start (read or refresh) fails with `status`.
    pub fn fail_next_start(&self, status: BulkCounterStatus) {
        self.state.lock().fail_next_start = Some(status);
    }

    /// The next completed read reports `status`.
    pub fn fail_next_read(&self, status: BulkCounterStatus) {
        self.state.lock().fail_next_read = Some(status);
    }

    /// Every read request accepted so far.
    pub fn started_requests(&self) -> Vec<HwReadRequest> {
        self.state.lock().started.clone()
    }

    /// Operations started and not yet completed.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Completes the oldest outstanding operation.
    pub fn complete_next(&self) -> Option<HwCompletion> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let op = state.pending.pop_front()?;
        let canceled = state.canceled.remove(&op.txn());

        let completion = match op {
            PendingOp::Refresh(txn) => {
                if !canceled {
                    for counter in state.flow_counters.values_mut() {
                        counter.fold();
                    }
                }
                HwCompletion::Refresh { txn, result: Ok(()) }
            }
            PendingOp::Read(request) if canceled => HwCompletion::Read {
                txn: request.txn,
                result: Err(BulkCounterStatus::GeneralError),
            },
            PendingOp::Read(request) => {
                let result = match state.fail_next_read.take() {
                    Some(status) => Err(status),
                    None => self.collect(state, &request),
                };
                HwCompletion::Read {
                    txn: request.txn,
                    result,
                }
            }
        };
        trace!(txn = %completion.txn(), canceled, "simulated completion");
        Some(completion)
    }

    /// Completes every outstanding operation in start order.
    pub fn complete_pending(&self) -> Vec<HwCompletion> {
        std::iter::from_fn(|| self.complete_next()).collect()
    }

    fn collect(
        &self,
        state: &mut SimState,
        request: &HwReadRequest,
    ) -> Result<Vec<CounterValue>, BulkCounterStatus> {
        let layout = CounterLayout::new(&request.key, &self.config).map_err(|e| e.status())?;
        let (flow_kind, flush) = match &request.key {
            CounterSelectionKey::Flow(key) => (key.kind, request.op.is_flush()),
            _ => (FlowCounterKind::Regular, false),
        };
        let clear = request.op.is_clear();

        let values = layout
            .read_keys()
            .into_iter()
            .map(|read_key| match read_key {
                CounterReadKey::Port { port, group, index } => {
                    let members = match request.lag_members.get(&port) {
                        Some(members) => members.clone(),
                        None => vec![port],
                    };
                    members.iter().fold(CounterValue::new(0, 0), |sum, member| {
                        let id = (*member, group, index);
                        let value = if clear {
                            state.port_counters.remove(&id)
                        } else {
                            state.port_counters.get(&id).copied()
                        };
                        add(sum, value.unwrap_or(CounterValue::new(0, 0)))
                    })
                }
                CounterReadKey::Flow { id } => {
                    let counter = state.flow_counters.entry(id).or_default();
                    if flow_kind == FlowCounterKind::Regular || flush {
                        counter.fold();
                    }
                    let value = counter.visible;
                    if clear {
                        counter.visible = CounterValue::new(0, 0);
                    }
                    value
                }
                CounterReadKey::ElephantFlow { port, flow } => {
                    let value = if clear {
                        state.elephant_flows.remove(&(port, flow))
                    } else {
                        state.elephant_flows.get(&(port, flow)).copied()
                    };
                    value.unwrap_or(CounterValue::INVALID)
                }
            })
            .collect();
        Ok(values)
    }

    fn take_start_failure(state: &mut SimState) -> BulkCounterResult<()> {
        match state.fail_next_start.take() {
            Some(status) => Err(BulkCounterError::from_status(status)),
            None => Ok(()),
        }
    }
}

impl BulkCounterDriver for SimDriver {
    fn start_read(&self, request: &HwReadRequest) -> BulkCounterResult<()> {
        let mut state = self.state.lock();
        Self::take_start_failure(&mut state)?;
        debug!(txn = %request.txn, op = %request.op, entries = request.entries, "simulated read started");
        state.started.push(request.clone());
        state.pending.push_back(PendingOp::Read(request.clone()));
        Ok(())
    }

    fn cancel(&self, txn: TransactionId) -> BulkCounterResult<()> {
        let mut state = self.state.lock();
        if !state.pending.iter().any(|op| op.txn() == txn) {
            return Err(BulkCounterError::param_error(format!("{} is not pending", txn)));
        }
        state.canceled.insert(txn);
        Ok(())
    }

    fn start_refresh(&self, txn: TransactionId) -> BulkCounterResult<()> {
        let mut state = self.state.lock();
        Self::take_start_failure(&mut state)?;
        debug!(txn = %txn, "simulated refresh started");
        state.pending.push_back(PendingOp::Refresh(txn));
        Ok(())
    }

    fn lag_members(&self, lag: LogPort) -> BulkCounterResult<Vec<LogPort>> {
        self.state
            .lock()
            .lags
            .get(&lag)
            .cloned()
            .ok_or_else(|| BulkCounterError::param_error(format!("unknown LAG {}", lag)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{BulkOperation, LagSnapshot};
    use crate::key::{ElephantFlowKey, FlowCounterKey, PortCounterKey};
    use pretty_assertions::assert_eq;

    fn request(txn: u64, op: BulkOperation, key: CounterSelectionKey) -> HwReadRequest {
        let entries = CounterLayout::new(&key, &EngineConfig::default())
            .unwrap()
            .entries();
        HwReadRequest {
            txn: TransactionId::from_raw(txn),
            op,
            key,
            entries,
            lag_members: LagSnapshot::new(),
        }
    }

    fn values(completion: HwCompletion) -> Vec<CounterValue> {
        match completion {
            HwCompletion::Read { result, .. } => result.unwrap(),
            other => panic!("unexpected completion {:?}", other),
        }
    }

    #[test]
    fn test_nothing_completes_on_its_own() {
        let sim = SimDriver::new(&EngineConfig::default());
        assert!(sim.complete_next().is_none());
        sim.start_refresh(TransactionId::from_raw(1)).unwrap();
        assert_eq!(sim.pending(), 1);
        assert_eq!(sim.complete_pending().len(), 1);
        assert_eq!(sim.pending(), 0);
    }

    #[test]
    fn test_read_clear_zeroes_port_counters() {
        let sim = SimDriver::new(&EngineConfig::default());
        let port = LogPort::network(2);
        sim.add_port_traffic(port, PortCounterGroup::Rfc2863, None, 3, 300);
        let key = CounterSelectionKey::Port(PortCounterKey {
            ports: vec![port],
            groups: vec![PortCounterGroup::Rfc2863],
            ..Default::default()
        });

        sim.start_read(&request(1, BulkOperation::ReadClear, key.clone()))
            .unwrap();
        assert_eq!(
            values(sim.complete_next().unwrap()),
            vec![CounterValue::new(3, 300)]
        );

        sim.start_read(&request(2, BulkOperation::Read, key)).unwrap();
        assert_eq!(
            values(sim.complete_next().unwrap()),
            vec![CounterValue::new(0, 0)]
        );
    }

    #[test]
    fn test_accumulated_flow_needs_refresh() {
        let sim = SimDriver::new(&EngineConfig::default());
        sim.add_flow_traffic(4, 10, 1000);
        let key = CounterSelectionKey::Flow(FlowCounterKey::accumulated(4, 1));

        sim.start_read(&request(1, BulkOperation::Read, key.clone()))
            .unwrap();
        assert_eq!(
            values(sim.complete_next().unwrap()),
            vec![CounterValue::new(0, 0)]
        );

        sim.start_refresh(TransactionId::from_raw(2)).unwrap();
        sim.complete_next().unwrap();
        sim.start_read(&request(3, BulkOperation::Read, key)).unwrap();
        assert_eq!(
            values(sim.complete_next().unwrap()),
            vec![CounterValue::new(10, 1000)]
        );
    }

    #[test]
    fn test_flush_folds_accumulated_flow() {
        let sim = SimDriver::new(&EngineConfig::default());
        sim.add_flow_traffic(0, 1, 64);
        let key = CounterSelectionKey::Flow(FlowCounterKey::accumulated(0, 1));

        sim.start_read(&request(1, BulkOperation::ReadFlush, key))
            .unwrap();
        assert_eq!(
            values(sim.complete_next().unwrap()),
            vec![CounterValue::new(1, 64)]
        );
    }

    #[test]
    fn test_lag_sums_snapshot_members() {
        let sim = SimDriver::new(&EngineConfig::default());
        let (a, b) = (LogPort::network(1), LogPort::network(2));
        sim.add_port_traffic(a, PortCounterGroup::Discard, None, 1, 10);
        sim.add_port_traffic(b, PortCounterGroup::Discard, None, 2, 20);
        let lag = LogPort::lag(1);

        let mut req = request(
            1,
            BulkOperation::Read,
            CounterSelectionKey::Port(PortCounterKey {
                ports: vec![lag],
                groups: vec![PortCounterGroup::Discard],
                ..Default::default()
            }),
        );
        req.lag_members.insert(lag, vec![a, b]);
        // Later membership changes do not affect the started read
        sim.set_lag_members(lag, vec![a]);

        sim.start_read(&req).unwrap();
        assert_eq!(
            values(sim.complete_next().unwrap()),
            vec![CounterValue::new(3, 30)]
        );
    }

    #[test]
    fn test_undetected_elephant_flow_invalid() {
        let config = EngineConfig {
            elephant_flows_per_port: 2,
            ..Default::default()
        };
        let sim = SimDriver::new(&config);
        let port = LogPort::network(1);
        sim.set_elephant_flow(port, 1, 100, 9000);
        let key = CounterSelectionKey::ElephantFlow(ElephantFlowKey { ports: vec![port] });
        let entries = CounterLayout::new(&key, &config).unwrap().entries();

        sim.start_read(&HwReadRequest {
            txn: TransactionId::from_raw(1),
            op: BulkOperation::Read,
            key,
            entries,
            lag_members: LagSnapshot::new(),
        })
        .unwrap();
        assert_eq!(
            values(sim.complete_next().unwrap()),
            vec![CounterValue::INVALID, CounterValue::new(100, 9000)]
        );
    }

    #[test]
    fn test_cancel_unknown_txn() {
        let sim = SimDriver::new(&EngineConfig::default());
        assert!(sim.cancel(TransactionId::from_raw(5)).is_err());
    }

    #[test]
    fn test_unknown_lag() {
        let sim = SimDriver::new(&EngineConfig::default());
        assert!(sim.lag_members(LogPort::lag(3)).is_err());
        sim.set_lag_members(LogPort::lag(3), vec![LogPort::network(1)]);
        assert_eq!(sim.lag_members(LogPort::lag(3)).unwrap(), vec![LogPort::network(1)]);
    }

    #[test]
    fn test_fail_next_start() {
        let sim = SimDriver::new(&EngineConfig::default());
        sim.fail_next_start(BulkCounterStatus::NoMemory);
        let err = sim.start_refresh(TransactionId::from_raw(1)).unwrap_err();
        assert_eq!(err.status(), BulkCounterStatus::NoMemory);
        assert!(sim.start_refresh(TransactionId::from_raw(2)).is_ok());
    }
}
