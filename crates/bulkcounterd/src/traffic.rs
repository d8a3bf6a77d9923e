//! Synthetic traffic for the simulated hardware.

use crate::config::BulkCounterdConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sonic_bulk_counter::{CounterLayout, CounterReadKey, SimDriver};
use std::collections::{HashMap, HashSet};

/// Chance per round that an elephant flow slot carries a detected flow.
const ELEPHANT_DETECT_PROBABILITY: f64 = 0.1;

/// Feeds random traffic to every counter some session reads.
#[derive(Debug)]
pub struct TrafficGenerator {
    rng: StdRng,
    targets: Vec<CounterReadKey>,
}

impl TrafficGenerator {
    pub fn new(config: &BulkCounterdConfig) -> Self {
        let lags: HashMap<_, _> = config
            .lags
            .iter()
            .map(|lag| (lag.lag, lag.members.clone()))
            .collect();

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for session in &config.sessions {
            let Ok(layout) = CounterLayout::new(&session.selection_key(), &config.engine) else {
                continue;
            };
            for read_key in layout.read_keys() {
                // LAG counters are the sum of their members
                let expanded = match read_key {
                    CounterReadKey::Port { port, group, index } if port.is_lag() => lags
                        .get(&port)
                        .map(|members| {
                            members
                                .iter()
                                .map(|&member| CounterReadKey::Port {
                                    port: member,
                                    group,
                                    index,
                                })
                                .collect()
                        })
                        .unwrap_or_default(),
                    _ => vec![read_key],
                };
                for key in expanded {
                    if seen.insert(key) {
                        targets.push(key);
                    }
                }
            }
        }

        Self {
            rng: StdRng::seed_from_u64(config.daemon.traffic_seed),
            targets,
        }
    }

    /// Number of counters receiving traffic.
    pub fn targets(&self) -> usize {
        self.targets.len()
    }

    /// Adds one round of traffic.
    pub fn inject(&mut self, sim: &SimDriver) {
        for key in &self.targets {
            match *key {
                CounterReadKey::Port { port, group, index } => {
                    let packets = self.rng.gen_range(0..1000);
                    let bytes = packets * self.rng.gen_range(64..1500);
                    sim.add_port_traffic(port, group, index, packets, bytes);
                }
                CounterReadKey::Flow { id } => {
                    let packets = self.rng.gen_range(0..100);
                    let bytes = packets * self.rng.gen_range(64..1500);
                    sim.add_flow_traffic(id, packets, bytes);
                }
                CounterReadKey::ElephantFlow { port, flow } => {
                    if self.rng.gen_bool(ELEPHANT_DETECT_PROBABILITY) {
                        let packets = self.rng.gen_range(10_000..100_000);
                        sim.set_elephant_flow(port, flow, packets, packets * 1500);
                    }
                }
            }
        }
    }
}
