//! Tick sources for the sampling runner.
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

/// The periodic scheduler itself broke; fatal to the owning session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("timer failure: {0}")]
pub struct TimerFailure(pub String);

#[async_trait]
pub trait Ticker: Send {
    /// Wait for the next tick.
    async fn tick(&mut self) -> Result<(), TimerFailure>;
}

/// Fixed-period ticker. The first tick fires one full period after creation
/// and late ticks push the schedule back instead of bursting.
#[derive(Debug)]
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> Result<(), TimerFailure> {
        self.interval.tick().await;
        Ok(())
    }
}

/// Builds the ticker for each new session.
pub type TickerFactory = std::sync::Arc<dyn Fn(Duration) -> Box<dyn Ticker> + Send + Sync>;

#[must_use]
pub fn interval_factory() -> TickerFactory {
    std::sync::Arc::new(|period| Box::new(IntervalTicker::new(period)) as Box<dyn Ticker>)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interval_ticker_waits_one_period_before_first_tick() {
        let period = Duration::from_millis(20);
        let mut ticker = IntervalTicker::new(period);
        let started = std::time::Instant::now();
        ticker.tick().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn immediate_ticker_can_fail_on_demand() {
        let mut ticker = testing::ImmediateTicker {
            fail_after: Some(1),
            ..Default::default()
        };
        assert!(tokio_test::block_on(ticker.tick()).is_ok());
        assert!(tokio_test::block_on(ticker.tick()).is_err());
        assert_eq!(ticker.fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
