//! Bulk counter daemon loop.
//!
//! Every poll round the daemon starts a bulk read on each idle session's
//! buffer. Busy starts are deferred to the next round. Hardware
//! completions are collected on a faster tick and fed into the engine; the
//! resulting events are turned into per-session samples. The accumulated
//! counter refresh runs on its own interval.

use crate::config::BulkCounterdConfig;
use crate::error::Result;
use crate::session::{Session, SessionStats};
use crate::traffic::TrafficGenerator;
use serde::Serialize;
use sonic_bulk_counter::{
    BulkCounterEngine, BulkCounterEvent, Cookie, EngineStats, EventReceiver, SimDriver,
    TransactionStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Summary printed when the daemon stops.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonReport {
    pub rounds: u64,
    pub refreshes_completed: u64,
    pub refreshes_failed: u64,
    pub sessions: HashMap<String, SessionStats>,
    pub engine: EngineStats,
}

pub struct BulkCounterDaemon {
    config: BulkCounterdConfig,
    engine: Arc<BulkCounterEngine>,
    driver: Arc<SimDriver>,
    events: EventReceiver,
    sessions: Vec<Session>,
    by_cookie: HashMap<Cookie, usize>,
    traffic: Option<TrafficGenerator>,
    rounds: u64,
    next_refresh_cookie: Cookie,
    refreshes_completed: u64,
    refreshes_failed: u64,
}

impl BulkCounterDaemon {
    /// Builds the engine over simulated hardware and creates every
    /// session's buffer. The configuration must already be validated.
    pub fn new(config: BulkCounterdConfig) -> Result<Self> {
        let driver = Arc::new(SimDriver::new(&config.engine));
        for lag in &config.lags {
            driver.set_lag_members(lag.lag, lag.members.clone());
        }

        let (engine, events) = BulkCounterEngine::new(driver.clone(), config.engine.clone())?;

        let mut sessions = Vec::with_capacity(config.sessions.len());
        let mut by_cookie = HashMap::new();
        for (index, session_config) in config.sessions.iter().enumerate() {
            let cookie = config.session_cookie(index);
            let session = Session::create(&engine, session_config, cookie)?;
            info!(
                session = %session.name,
                buffer = %session.handle,
                cookie,
                op = %session.op,
                "session created"
            );
            by_cookie.insert(cookie, index);
            sessions.push(session);
        }

        let traffic = config
            .daemon
            .simulate_traffic
            .then(|| TrafficGenerator::new(&config));

        Ok(Self {
            config,
            engine: Arc::new(engine),
            driver,
            events,
            sessions,
            by_cookie,
            traffic,
            rounds: 0,
            next_refresh_cookie: 1,
            refreshes_completed: 0,
            refreshes_failed: 0,
        })
    }

    pub fn engine(&self) -> &Arc<BulkCounterEngine> {
        &self.engine
    }

    pub fn driver(&self) -> &Arc<SimDriver> {
        &self.driver
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// One poll round: inject traffic, then start every idle session.
    pub fn poll_round(&mut self) {
        self.rounds += 1;
        if let Some(traffic) = self.traffic.as_mut() {
            traffic.inject(&self.driver);
        }

        for session in &mut self.sessions {
            match self.engine.transaction_start(session.handle, session.op) {
                Ok(()) => session.stats.reads_started += 1,
                Err(e) if e.is_retryable() => {
                    session.stats.deferred += 1;
                    debug!(session = %session.name, error = %e, "read deferred");
                }
                Err(e) => {
                    session.stats.reads_failed += 1;
                    warn!(session = %session.name, error = %e, "read start failed");
                }
            }
        }
        debug!(round = self.rounds, slots = self.engine.slots_in_use(), "poll round done");
    }

    /// Starts the accumulated counter refresh unless one is outstanding.
    pub fn start_refresh(&mut self) {
        if self.engine.is_refresh_in_progress() {
            return;
        }
        let cookie = self.next_refresh_cookie;
        match self.engine.refresh_start(cookie) {
            Ok(()) => self.next_refresh_cookie += 1,
            Err(e) => debug!(cookie, error = %e, "refresh deferred"),
        }
    }

    /// Feeds completed hardware operations into the engine.
    pub fn pump_completions(&self) -> usize {
        let completions = self.driver.complete_pending();
        let count = completions.len();
        for completion in completions {
            self.engine.handle_completion(completion);
        }
        count
    }

    /// Handles every queued engine event.
    pub fn drain_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Completes everything in flight.
    pub fn settle(&mut self) {
        while self.pump_completions() > 0 {
            self.drain_events();
        }
        self.drain_events();
    }

    fn handle_event(&mut self, event: BulkCounterEvent) {
        match event {
            BulkCounterEvent::ReadDone {
                handle,
                cookie,
                status,
            } => {
                let Some(session) = self.by_cookie.get(&cookie).map(|&i| &mut self.sessions[i])
                else {
                    warn!(cookie, buffer = %handle, "read done for unknown session");
                    return;
                };

                match status {
                    TransactionStatus::Completed => match self.engine.counter_read_all(handle) {
                        Ok(values) => {
                            let sample = session.record(&values);
                            info!(
                                session = %session.name,
                                counters = values.len(),
                                packets = sample.packets,
                                bytes = sample.bytes,
                                delta_packets = sample.delta_packets,
                                delta_bytes = sample.delta_bytes,
                                invalid = sample.invalid,
                                "bulk read"
                            );
                        }
                        Err(e) => {
                            session.stats.reads_failed += 1;
                            error!(session = %session.name, error = %e, "reading completed buffer failed");
                        }
                    },
                    TransactionStatus::Canceled => {
                        session.stats.reads_canceled += 1;
                        info!(session = %session.name, "bulk read canceled");
                    }
                    TransactionStatus::Failed(status) => {
                        session.stats.reads_failed += 1;
                        warn!(session = %session.name, status = %status, "bulk read failed");
                    }
                }
            }
            BulkCounterEvent::RefreshDone { cookie, status } => {
                if status.is_completed() {
                    self.refreshes_completed += 1;
                    debug!(cookie, "refresh done");
                } else {
                    self.refreshes_failed += 1;
                    warn!(cookie, status = %status, "refresh failed");
                }
            }
        }
    }

    pub fn report(&self) -> DaemonReport {
        DaemonReport {
            rounds: self.rounds,
            refreshes_completed: self.refreshes_completed,
            refreshes_failed: self.refreshes_failed,
            sessions: self
                .sessions
                .iter()
                .map(|s| (s.name.clone(), s.stats.clone()))
                .collect(),
            engine: self.engine.stats(),
        }
    }

    /// Runs until `shutdown` is set or `iterations` poll rounds have
    /// been started (0 runs forever). In-flight reads are completed before
    /// the engine is torn down.
    pub async fn run(mut self, iterations: u64, shutdown: Arc<AtomicBool>) -> Result<DaemonReport> {
        let mut poll = interval(self.config.poll_interval());
        let mut completions = interval(self.config.completion_tick());
        completions.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let refresh_period = self.config.refresh_interval();
        let mut refresh = interval(refresh_period.unwrap_or(self.config.poll_interval()));

        info!(
            sessions = self.sessions.len(),
            poll_ms = self.config.daemon.poll_interval_ms,
            refresh_ms = self.config.daemon.refresh_interval_ms,
            "bulkcounterd loop started"
        );

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("bulkcounterd: Received shutdown signal");
                break;
            }
            if iterations > 0 && self.rounds >= iterations {
                break;
            }

            tokio::select! {
                _ = poll.tick() => {
                    self.pump_completions();
                    self.drain_events();
                    self.poll_round();
                }
                _ = completions.tick() => {
                    self.pump_completions();
                    self.drain_events();
                }
                _ = refresh.tick(), if refresh_period.is_some() => {
                    self.start_refresh();
                }
            }
        }

        self.settle();
        let report = self.report();
        let invalidated = self.engine.deinit();
        info!(rounds = report.rounds, buffers = invalidated, "bulkcounterd loop stopped");
        Ok(report)
    }
}
