//! Bulk read sessions.
//!
//! A session owns one engine buffer and turns every completed read of it
//! into a [`SessionSample`]: totals over the valid counters plus the delta
//! against the previous sample.

use crate::config::SessionConfig;
use crate::error::{BulkCounterdError, Result};
use serde::Serialize;
use sonic_bulk_counter::{
    BufferHandle, BulkCounterEngine, BulkOperation, Cookie, CounterReadKey, CounterValue,
};

/// Aggregate of one completed bulk read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionSample {
    pub packets: u64,
    pub bytes: u64,
    /// Counters the hardware could not sample
    pub invalid: usize,
    pub delta_packets: u64,
    pub delta_bytes: u64,
}

impl SessionSample {
    /// Aggregates `values`, computing deltas against `previous`.
    pub fn from_values(
        values: &[(CounterReadKey, CounterValue)],
        previous: Option<&SessionSample>,
    ) -> Self {
        let mut sample = values
            .iter()
            .fold(SessionSample::default(), |mut sample, (_, value)| {
                if value.valid {
                    sample.packets = sample.packets.wrapping_add(value.packets);
                    sample.bytes = sample.bytes.wrapping_add(value.bytes);
                } else {
                    sample.invalid += 1;
                }
                sample
            });

        // Counters cleared by the read, or reset underneath us, count from zero
        let (base_packets, base_bytes) = match previous {
            Some(prev) if prev.packets <= sample.packets && prev.bytes <= sample.bytes => {
                (prev.packets, prev.bytes)
            }
            _ => (0, 0),
        };
        sample.delta_packets = sample.packets - base_packets;
        sample.delta_bytes = sample.bytes - base_bytes;
        sample
    }
}

/// Per-session read statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub reads_started: u64,
    pub reads_completed: u64,
    pub reads_failed: u64,
    pub reads_canceled: u64,
    /// Starts postponed because the engine was busy
    pub deferred: u64,
}

#[derive(Debug)]
pub struct Session {
    pub name: String,
    pub cookie: Cookie,
    pub op: BulkOperation,
    pub handle: BufferHandle,
    pub last: Option<SessionSample>,
    pub stats: SessionStats,
}

impl Session {
    /// Creates the session's buffer in `engine`.
    pub fn create(engine: &BulkCounterEngine, config: &SessionConfig, cookie: Cookie) -> Result<Self> {
        let handle = engine
            .buffer_create(config.selection_key(), cookie)
            .map_err(|e| BulkCounterdError::session(&config.name, e.to_string()))?;
        Ok(Self {
            name: config.name.clone(),
            cookie,
            op: config.op,
            handle,
            last: None,
            stats: SessionStats::default(),
        })
    }

    /// Records a completed read and returns the new sample.
    pub fn record(&mut self, values: &[(CounterReadKey, CounterValue)]) -> SessionSample {
        let sample = SessionSample::from_values(values, self.last.as_ref());
        self.last = Some(sample);
        self.stats.reads_completed += 1;
        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn values(raw: &[(u32, u64, u64, bool)]) -> Vec<(CounterReadKey, CounterValue)> {
        raw.iter()
            .map(|&(id, packets, bytes, valid)| {
                let value = if valid {
                    CounterValue::new(packets, bytes)
                } else {
                    CounterValue::INVALID
                };
                (CounterReadKey::flow(id), value)
            })
            .collect()
    }

    #[test]
    fn test_sample_totals() {
        let sample = SessionSample::from_values(
            &values(&[(0, 1, 100, true), (1, 2, 200, true), (2, 0, 0, false)]),
            None,
        );
        assert_eq!(
            sample,
            SessionSample {
                packets: 3,
                bytes: 300,
                invalid: 1,
                delta_packets: 3,
                delta_bytes: 300,
            }
        );
    }

    #[test]
    fn test_sample_delta() {
        let first = SessionSample::from_values(&values(&[(0, 10, 1000, true)]), None);
        let second = SessionSample::from_values(&values(&[(0, 15, 1600, true)]), Some(&first));
        assert_eq!(second.delta_packets, 5);
        assert_eq!(second.delta_bytes, 600);
    }

    #[test]
    fn test_sample_after_clear() {
        let first = SessionSample::from_values(&values(&[(0, 10, 1000, true)]), None);
        let second = SessionSample::from_values(&values(&[(0, 4, 400, true)]), Some(&first));
        assert_eq!(second.delta_packets, 4);
        assert_eq!(second.delta_bytes, 400);
    }
}
