//! Counter selection keys, single-counter read keys and buffer layouts.
//!
//! A [`CounterSelectionKey`] describes everything one bulk buffer collects.
//! It is validated once, when the buffer is created, and a
//! [`CounterLayout`] is derived from it that maps every addressable counter
//! ([`CounterReadKey`]) to a dense slot in the buffer's value storage.

use crate::config::EngineConfig;
use crate::error::{BulkCounterError, BulkCounterResult};
use crate::types::{FlowCounterId, LogPort};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

/// Highest IEEE 802.1p priority.
pub const PRIORITY_MAX: u8 = 7;
/// Highest traffic class.
pub const TRAFFIC_CLASS_MAX: u8 = 15;
/// Highest ingress priority group.
pub const PRIORITY_GROUP_MAX: u8 = 7;

/// Port counter groups that can be selected in a port key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortCounterGroup {
    Ieee8023,
    Rfc2863,
    Rfc2819,
    Rfc3635,
    Discard,
    /// Per-priority counters, indexed by priority
    Priority,
    /// Per-traffic-class counters, indexed by TC
    TrafficClass,
    /// Per-priority-group counters, indexed by PG
    PriorityGroup,
}

impl PortCounterGroup {
    /// Returns true if counters in this group are addressed by an index.
    pub fn is_indexed(&self) -> bool {
        matches!(
            self,
            Self::Priority | Self::TrafficClass | Self::PriorityGroup
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ieee8023 => "ieee8023",
            Self::Rfc2863 => "rfc2863",
            Self::Rfc2819 => "rfc2819",
            Self::Rfc3635 => "rfc3635",
            Self::Discard => "discard",
            Self::Priority => "priority",
            Self::TrafficClass => "traffic_class",
            Self::PriorityGroup => "priority_group",
        }
    }

    pub fn all() -> &'static [PortCounterGroup] {
        &[
            Self::Ieee8023,
            Self::Rfc2863,
            Self::Rfc2819,
            Self::Rfc3635,
            Self::Discard,
            Self::Priority,
            Self::TrafficClass,
            Self::PriorityGroup,
        ]
    }
}

impl fmt::Display for PortCounterGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for PortCounterGroup {
    type Err = BulkCounterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|g| g.name() == s.trim().to_lowercase())
            .ok_or_else(|| BulkCounterError::param_error(format!("unknown port counter group '{}'", s)))
    }
}

/// Port bulk read selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortCounterKey {
    pub ports: Vec<LogPort>,
    pub groups: Vec<PortCounterGroup>,
    #[serde(default)]
    pub priorities: Vec<u8>,
    #[serde(default)]
    pub traffic_classes: Vec<u8>,
    #[serde(default)]
    pub priority_groups: Vec<u8>,
}

impl PortCounterKey {
    /// Returns the index list that addresses counters of `group`, if any.
    pub fn indices(&self, group: PortCounterGroup) -> &[u8] {
        match group {
            PortCounterGroup::Priority => &self.priorities,
            PortCounterGroup::TrafficClass => &self.traffic_classes,
            PortCounterGroup::PriorityGroup => &self.priority_groups,
            _ => &[],
        }
    }
}

/// Flow counter flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowCounterKind {
    #[default]
    Regular,
    /// Values may lag the hardware until a refresh or flush
    Accumulated,
}

/// Flow bulk read selection: the id range `[base, base + count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowCounterKey {
    pub base: FlowCounterId,
    pub count: u32,
    #[serde(default)]
    pub kind: FlowCounterKind,
}

impl FlowCounterKey {
    pub fn new(base: FlowCounterId, count: u32) -> Self {
        Self {
            base,
            count,
            kind: FlowCounterKind::Regular,
        }
    }

    pub fn accumulated(base: FlowCounterId, count: u32) -> Self {
        Self {
            base,
            count,
            kind: FlowCounterKind::Accumulated,
        }
    }
}

/// Elephant flow bulk read selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElephantFlowKey {
    pub ports: Vec<LogPort>,
}

/// Discriminant of a selection key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKeyType {
    Port,
    Flow,
    ElephantFlow,
}

impl fmt::Display for CounterKeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CounterKeyType::Port => "port",
            CounterKeyType::Flow => "flow",
            CounterKeyType::ElephantFlow => "elephant_flow",
        };
        write!(f, "{}", s)
    }
}

/// What a bulk counter buffer collects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CounterSelectionKey {
    Port(PortCounterKey),
    Flow(FlowCounterKey),
    ElephantFlow(ElephantFlowKey),
}

impl CounterSelectionKey {
    pub fn key_type(&self) -> CounterKeyType {
        match self {
            CounterSelectionKey::Port(_) => CounterKeyType::Port,
            CounterSelectionKey::Flow(_) => CounterKeyType::Flow,
            CounterSelectionKey::ElephantFlow(_) => CounterKeyType::ElephantFlow,
        }
    }

    /// Flush variants of a read are only meaningful for flow counters.
    pub fn supports_flush(&self) -> bool {
        matches!(self, CounterSelectionKey::Flow(_))
    }

    /// Returns the LAG ports named by the key.
    pub fn lag_ports(&self) -> Vec<LogPort> {
        match self {
            CounterSelectionKey::Port(key) => {
                key.ports.iter().copied().filter(LogPort::is_lag).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Checks the key against the engine limits.
    pub fn validate(&self, config: &EngineConfig) -> BulkCounterResult<()> {
        match self {
            CounterSelectionKey::Port(key) => validate_port_key(key, config),
            CounterSelectionKey::Flow(key) => validate_flow_key(key, config),
            CounterSelectionKey::ElephantFlow(key) => validate_elephant_key(key, config),
        }
    }
}

fn ensure_unique<T: Eq + Hash + fmt::Debug>(items: &[T], what: &str) -> BulkCounterResult<()> {
    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        if !seen.insert(item) {
            return Err(BulkCounterError::param_error(format!(
                "duplicate {} {:?}",
                what, item
            )));
        }
    }
    Ok(())
}

fn validate_ports(ports: &[LogPort], config: &EngineConfig) -> BulkCounterResult<()> {
    if ports.is_empty() {
        return Err(BulkCounterError::param_error("port list is empty"));
    }
    if ports.len() > config.max_ports_per_key {
        return Err(BulkCounterError::param_error(format!(
            "{} ports exceeds limit of {}",
            ports.len(),
            config.max_ports_per_key
        )));
    }
    if let Some(port) = ports
        .iter()
        .find(|p| p.is_null() || !(p.is_network() || p.is_lag()))
    {
        return Err(BulkCounterError::param_error(format!("invalid log port {}", port)));
    }
    ensure_unique(ports, "port")
}

fn validate_port_key(key: &PortCounterKey, config: &EngineConfig) -> BulkCounterResult<()> {
    validate_ports(&key.ports, config)?;

    if key.groups.is_empty() {
        return Err(BulkCounterError::param_error("counter group list is empty"));
    }
    ensure_unique(&key.groups, "counter group")?;

    for (group, max) in [
        (PortCounterGroup::Priority, PRIORITY_MAX),
        (PortCounterGroup::TrafficClass, TRAFFIC_CLASS_MAX),
        (PortCounterGroup::PriorityGroup, PRIORITY_GROUP_MAX),
    ] {
        let indices = key.indices(group);
        if key.groups.contains(&group) && indices.is_empty() {
            return Err(BulkCounterError::param_error(format!(
                "group {} selected without indices",
                group
            )));
        }
        if let Some(index) = indices.iter().find(|&&i| i > max) {
            return Err(BulkCounterError::param_error(format!(
                "{} index {} out of range 0-{}",
                group, index, max
            )));
        }
        ensure_unique(indices, group.name())?;
    }

    Ok(())
}

fn validate_flow_key(key: &FlowCounterKey, config: &EngineConfig) -> BulkCounterResult<()> {
    if key.count == 0 {
        return Err(BulkCounterError::param_error("flow counter range is empty"));
    }
    let end = key.base.checked_add(key.count).ok_or_else(|| {
        BulkCounterError::param_error(format!(
            "flow counter range {}+{} overflows",
            key.base, key.count
        ))
    })?;
    if end > config.flow_counter_id_limit {
        return Err(BulkCounterError::param_error(format!(
            "flow counter range [{}, {}) exceeds id limit {}",
            key.base, end, config.flow_counter_id_limit
        )));
    }
    Ok(())
}

fn validate_elephant_key(key: &ElephantFlowKey, config: &EngineConfig) -> BulkCounterResult<()> {
    validate_ports(&key.ports, config)?;
    if let Some(port) = key.ports.iter().find(|p| !p.is_network()) {
        return Err(BulkCounterError::param_error(format!(
            "elephant flow detection needs a network port, got {}",
            port
        )));
    }
    Ok(())
}

/// Address of one counter inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CounterReadKey {
    Port {
        port: LogPort,
        group: PortCounterGroup,
        index: Option<u8>,
    },
    Flow {
        id: FlowCounterId,
    },
    ElephantFlow {
        port: LogPort,
        flow: u16,
    },
}

impl CounterReadKey {
    pub fn port(port: LogPort, group: PortCounterGroup) -> Self {
        CounterReadKey::Port {
            port,
            group,
            index: None,
        }
    }

    pub fn port_indexed(port: LogPort, group: PortCounterGroup, index: u8) -> Self {
        CounterReadKey::Port {
            port,
            group,
            index: Some(index),
        }
    }

    pub fn flow(id: FlowCounterId) -> Self {
        CounterReadKey::Flow { id }
    }

    pub fn elephant(port: LogPort, flow: u16) -> Self {
        CounterReadKey::ElephantFlow { port, flow }
    }

    pub fn key_type(&self) -> CounterKeyType {
        match self {
            CounterReadKey::Port { .. } => CounterKeyType::Port,
            CounterReadKey::Flow { .. } => CounterKeyType::Flow,
            CounterReadKey::ElephantFlow { .. } => CounterKeyType::ElephantFlow,
        }
    }
}

impl fmt::Display for CounterReadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterReadKey::Port {
                port,
                group,
                index: Some(index),
            } => write!(f, "port {} {}[{}]", port, group, index),
            CounterReadKey::Port { port, group, .. } => write!(f, "port {} {}", port, group),
            CounterReadKey::Flow { id } => write!(f, "flow {}", id),
            CounterReadKey::ElephantFlow { port, flow } => {
                write!(f, "elephant {} flow {}", port, flow)
            }
        }
    }
}

#[derive(Debug, Clone)]
struct GroupSpan {
    group: PortCounterGroup,
    offset: usize,
    indices: Vec<u8>,
}

impl GroupSpan {
    fn width(&self) -> usize {
        self.indices.len().max(1)
    }
}

#[derive(Debug, Clone)]
enum LayoutKind {
    Port {
        ports: Vec<LogPort>,
        positions: HashMap<LogPort, usize>,
        groups: Vec<GroupSpan>,
        per_port: usize,
    },
    Flow {
        base: FlowCounterId,
        count: u32,
    },
    ElephantFlow {
        ports: Vec<LogPort>,
        positions: HashMap<LogPort, usize>,
        flows_per_port: u16,
    },
}

/// Dense slot layout of a buffer.
///
/// Port layouts are ordered port, then group (in key order), then index (in
/// key list order). Flow layouts follow id order. Elephant flow layouts are
/// ordered port, then flow.
#[derive(Debug, Clone)]
pub struct CounterLayout {
    kind: LayoutKind,
    entries: usize,
}

fn positions(ports: &[LogPort]) -> HashMap<LogPort, usize> {
    ports.iter().enumerate().map(|(pos, port)| (*port, pos)).collect()
}

impl CounterLayout {
    /// Builds the layout of an already validated key.
    pub fn new(key: &CounterSelectionKey, config: &EngineConfig) -> BulkCounterResult<Self> {
        let overflow = || BulkCounterError::no_memory("counter layout size overflows");

        match key {
            CounterSelectionKey::Port(key) => {
                let mut offset = 0;
                let groups: Vec<GroupSpan> = key
                    .groups
                    .iter()
                    .map(|&group| {
                        let span = GroupSpan {
                            group,
                            offset,
                            indices: if group.is_indexed() {
                                key.indices(group).to_vec()
                            } else {
                                Vec::new()
                            },
                        };
                        offset += span.width();
                        span
                    })
                    .collect();
                let entries = key.ports.len().checked_mul(offset).ok_or_else(overflow)?;
                Ok(Self {
                    kind: LayoutKind::Port {
                        ports: key.ports.clone(),
                        positions: positions(&key.ports),
                        groups,
                        per_port: offset,
                    },
                    entries,
                })
            }
            CounterSelectionKey::Flow(key) => Ok(Self {
                kind: LayoutKind::Flow {
                    base: key.base,
                    count: key.count,
                },
                entries: key.count as usize,
            }),
            CounterSelectionKey::ElephantFlow(key) => {
                let flows_per_port = config.elephant_flows_per_port;
                let entries = key
                    .ports
                    .len()
                    .checked_mul(flows_per_port as usize)
                    .ok_or_else(overflow)?;
                Ok(Self {
                    kind: LayoutKind::ElephantFlow {
                        ports: key.ports.clone(),
                        positions: positions(&key.ports),
                        flows_per_port,
                    },
                    entries,
                })
            }
        }
    }

    /// Number of counter entries in the buffer.
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Resolves a read key to its slot.
    ///
    /// Fails with `ParamNull` when an indexed group is read without an index
    /// and `ParamError` when the read key is not covered by the buffer.
    pub fn slot(&self, read_key: &CounterReadKey) -> BulkCounterResult<usize> {
        match (&self.kind, read_key) {
            (
                LayoutKind::Port {
                    positions,
                    groups,
                    per_port,
                    ..
                },
                CounterReadKey::Port { port, group, index },
            ) => {
                let pos = positions.get(port).ok_or_else(|| {
                    BulkCounterError::param_error(format!("port {} is not in the buffer key", port))
                })?;
                let span = groups.iter().find(|s| s.group == *group).ok_or_else(|| {
                    BulkCounterError::param_error(format!("group {} is not in the buffer key", group))
                })?;
                let within = match (group.is_indexed(), index) {
                    (true, None) => {
                        return Err(BulkCounterError::param_null(format!(
                            "group {} requires an index",
                            group
                        )))
                    }
                    (true, Some(index)) => {
                        span.indices.iter().position(|i| i == index).ok_or_else(|| {
                            BulkCounterError::param_error(format!(
                                "{} index {} is not in the buffer key",
                                group, index
                            ))
                        })?
                    }
                    (false, Some(_)) => {
                        return Err(BulkCounterError::param_error(format!(
                            "group {} is not indexed",
                            group
                        )))
                    }
                    (false, None) => 0,
                };
                Ok(pos * per_port + span.offset + within)
            }
            (LayoutKind::Flow { base, count }, CounterReadKey::Flow { id }) => {
                if *id >= *base && id - base < *count {
                    Ok((id - base) as usize)
                } else {
                    Err(BulkCounterError::param_error(format!(
                        "flow counter {} is outside [{}, {})",
                        id,
                        base,
                        *base as u64 + *count as u64
                    )))
                }
            }
            (
                LayoutKind::ElephantFlow {
                    positions,
                    flows_per_port,
                    ..
                },
                CounterReadKey::ElephantFlow { port, flow },
            ) => {
                let pos = positions.get(port).ok_or_else(|| {
                    BulkCounterError::param_error(format!("port {} is not in the buffer key", port))
                })?;
                if flow >= flows_per_port {
                    return Err(BulkCounterError::param_error(format!(
                        "elephant flow {} out of range 0-{}",
                        flow,
                        flows_per_port - 1
                    )));
                }
                Ok(pos * *flows_per_port as usize + *flow as usize)
            }
            (_, read_key) => Err(BulkCounterError::param_error(format!(
                "{} read key does not match the buffer key type",
                read_key.key_type()
            ))),
        }
    }

    /// Every read key of the buffer, in slot order.
    pub fn read_keys(&self) -> Vec<CounterReadKey> {
        let mut keys = Vec::with_capacity(self.entries);
        match &self.kind {
            LayoutKind::Port { ports, groups, .. } => {
                for &port in ports {
                    for span in groups {
                        if span.indices.is_empty() {
                            keys.push(CounterReadKey::port(port, span.group));
                        } else {
                            keys.extend(
                                span.indices
                                    .iter()
                                    .map(|&i| CounterReadKey::port_indexed(port, span.group, i)),
                            );
                        }
                    }
                }
            }
            LayoutKind::Flow { base, count } => {
                keys.extend((0..*count).map(|i| CounterReadKey::flow(base + i)));
            }
            LayoutKind::ElephantFlow {
                ports,
                flows_per_port,
                ..
            } => {
                for &port in ports {
                    keys.extend((0..*flows_per_port).map(|f| CounterReadKey::elephant(port, f)));
                }
            }
        }
        keys
    }
}
