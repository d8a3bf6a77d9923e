//! Engine statistics.

use serde::Serialize;

/// Snapshot of engine activity since construction (or the last deinit for
/// the gauges).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub buffers_created: u64,
    pub buffers_destroyed: u64,
    /// Gauge: buffers currently allocated
    pub buffers_live: usize,
    /// Gauge: counter entries reserved by live buffers
    pub pool_entries_in_use: usize,
    pub transactions_admitted: u64,
    /// Starts rejected with `ResourceInUse`
    pub transactions_rejected: u64,
    pub transactions_completed: u64,
    pub transactions_canceled: u64,
    pub transactions_failed: u64,
    pub refreshes_started: u64,
    pub refreshes_completed: u64,
    /// Gauge: occupied transaction slots
    pub slots_in_use: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_serialize() {
        let stats = EngineStats {
            transactions_admitted: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["transactions_admitted"], 3);
        assert_eq!(json["slots_in_use"], 0);
    }
}
