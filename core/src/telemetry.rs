//! # Telemetry: Throughput Reporting
//!
//! [`ThroughputLogger`] is a processor that counts the exchanges passing
//! through it and logs the rate of every completed group.

use crate::exchange::Exchange;
use crate::processor::Processor;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Throughput {
    received: u64,
    started: Instant,
    group_started: Instant,
}

/// Logs throughput every `group_size` exchanges.
#[derive(Debug)]
pub struct ThroughputLogger {
    name: String,
    group_size: u64,
    state: Mutex<Throughput>,
}

impl ThroughputLogger {
    /// `group_size` of zero is treated as one.
    pub fn new(name: &str, group_size: u64) -> Self {
        let now = Instant::now();
        Self {
            name: name.to_string(),
            group_size: group_size.max(1),
            state: Mutex::new(Throughput {
                received: 0,
                started: now,
                group_started: now,
            }),
        }
    }

    pub fn received(&self) -> u64 {
        self.state.lock().received
    }

    pub fn reset(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.received = 0;
        state.started = now;
        state.group_started = now;
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 { count as f64 } else { count as f64 / secs }
}

impl Processor for ThroughputLogger {
    fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.received += 1;
        if state.received % self.group_size != 0 {
            return Ok(());
        }

        let group_elapsed = state.group_started.elapsed();
        let total_elapsed = state.started.elapsed();
        tracing::info!(
            logger = %self.name,
            received = state.received,
            exchange = %exchange,
            group_millis = group_elapsed.as_millis() as u64,
            "Received: {} messages so far. Last group took: {} millis which is: {:.2} messages per second. Average: {:.2} messages per second",
            state.received,
            group_elapsed.as_millis(),
            per_second(self.group_size, group_elapsed),
            per_second(state.received, total_elapsed),
        );
        state.group_started = Instant::now();
        Ok(())
    }
}
