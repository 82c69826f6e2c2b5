//! Tick timing checks.

use std::time::{Duration, Instant};

use tracing::warn;

use crate::config::TickConfig;

/// Watches how regularly the host drives the bridge and how long each tick
/// takes.
#[derive(Debug)]
pub struct TickMonitor {
    config: TickConfig,
    last_tick: Option<Instant>,
}

impl TickMonitor {
    /// Creates a monitor.
    pub fn new(config: TickConfig) -> Self {
        Self {
            config,
            last_tick: None,
        }
    }

    /// Records the start of a tick.
    ///
    /// Returns the gap since the previous tick when it exceeds the lag
    /// threshold.
    pub fn begin(&mut self, now: Instant) -> Option<Duration> {
        let gap = self
            .last_tick
            .replace(now)
            .map(|last| now.saturating_duration_since(last))?;
        if gap <= self.config.lag_threshold {
            return None;
        }
        warn!(
            gap_ms = gap.as_millis() as u64,
            threshold_ms = self.config.lag_threshold.as_millis() as u64,
            "Host tick lagging"
        );
        Some(gap)
    }

    /// Records the end of a tick that started at `started`.
    ///
    /// Returns the tick's duration when it exceeds the processing budget.
    pub fn finish(&self, started: Instant, now: Instant, processed: usize) -> Option<Duration> {
        let took = now.saturating_duration_since(started);
        if took <= self.config.processing_budget {
            return None;
        }
        warn!(
            took_ms = took.as_millis() as u64,
            budget_ms = self.config.processing_budget.as_millis() as u64,
            processed,
            "Tick processing over budget"
        );
        Some(took)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_never_lags() {
        let mut monitor = TickMonitor::new(TickConfig::default());
        assert_eq!(monitor.begin(Instant::now()), None);
    }

    #[test]
    fn lag_is_reported_above_threshold() {
        let mut monitor = TickMonitor::new(TickConfig::default());
        let start = Instant::now();

        monitor.begin(start);
        assert_eq!(monitor.begin(start + Duration::from_millis(150)), None);
        assert_eq!(
            monitor.begin(start + Duration::from_millis(500)),
            Some(Duration::from_millis(350))
        );
    }

    #[test]
    fn budget_is_checked_per_tick() {
        let monitor = TickMonitor::new(TickConfig::default());
        let start = Instant::now();

        assert_eq!(monitor.finish(start, start + Duration::from_millis(20), 3), None);
        assert_eq!(
            monitor.finish(start, start + Duration::from_millis(120), 40),
            Some(Duration::from_millis(120))
        );
    }
}
