//! Sampling loop state machine.
//!
//! The loop itself owns no timer. Callers decide when a tick fires and the
//! machine decides when the run is over, so the same type drives both the
//! timer-backed live sessions and offline batch runs.
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::Exporter;
use crate::tally::{Tally, TallyView};
use crate::wheel::{Classification, Outcome, classify};

/// Rejected start parameters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SamplingError {
    #[error("{field} must be a positive integer (got {value})")]
    InvalidParameter { field: &'static str, value: i64 },
}

/// Lifecycle of one sampling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Idle,
    Running,
    Completed,
}

/// Everything one tick produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickRecord {
    /// 1-based position of this tick within the run.
    pub tick: u32,
    pub outcome: Outcome,
    pub classification: Classification,
    pub snapshot: TallyView,
    /// Loop state after this tick.
    pub state: LoopState,
}

impl TickRecord {
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.state == LoopState::Completed
    }
}

/// Result of a synchronous tick followed by an export.
#[derive(Debug)]
pub struct StepReport<E> {
    pub record: TickRecord,
    pub export: Result<(), E>,
}

/// A bounded run of `tick_limit` ticks spaced `interval` apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingLoop {
    state: LoopState,
    tick_limit: u32,
    interval: Duration,
    ticks_completed: u32,
}

fn positive(field: &'static str, value: i64) -> Result<u64, SamplingError> {
    u64::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or(SamplingError::InvalidParameter { field, value })
}

impl SamplingLoop {
    /// Validate the parameters and enter `Running`.
    pub fn start(tick_limit: i64, tick_interval_ms: i64) -> Result<Self, SamplingError> {
        let limit = positive("tick limit", tick_limit)?;
        let tick_limit = u32::try_from(limit).map_err(|_| SamplingError::InvalidParameter {
            field: "tick limit",
            value: tick_limit,
        })?;
        let interval_ms = positive("tick interval", tick_interval_ms)?;
        log::debug!("sampling loop started: {tick_limit} ticks every {interval_ms}ms");
        Ok(Self {
            state: LoopState::Running,
            tick_limit,
            interval: Duration::from_millis(interval_ms),
            ticks_completed: 0,
        })
    }

    #[must_use]
    pub const fn state(&self) -> LoopState {
        self.state
    }

    #[must_use]
    pub const fn tick_limit(&self) -> u32 {
        self.tick_limit
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub const fn ticks_completed(&self) -> u32 {
        self.ticks_completed
    }

    #[must_use]
    pub const fn ticks_remaining(&self) -> u32 {
        self.tick_limit.saturating_sub(self.ticks_completed)
    }

    /// Draw, classify and record one outcome.
    ///
    /// Returns `None` once the loop has left `Running`; no outcome is drawn
    /// and the tally is untouched in that case.
    pub fn tick<R: Rng + ?Sized>(&mut self, rng: &mut R, tally: &mut Tally) -> Option<TickRecord> {
        if self.state != LoopState::Running {
            return None;
        }
        let outcome = Outcome::draw(rng);
        let classification = classify(outcome);
        tally.record(outcome, &classification);
        self.ticks_completed += 1;
        if self.ticks_completed >= self.tick_limit {
            self.state = LoopState::Completed;
        }
        Some(TickRecord {
            tick: self.ticks_completed,
            outcome,
            classification,
            snapshot: tally.snapshot(),
            state: self.state,
        })
    }

    /// Tick and export in one call.
    ///
    /// An export failure is handed back in the report; the tally update and
    /// the loop's progress stand regardless.
    pub fn step<R, X>(
        &mut self,
        rng: &mut R,
        tally: &mut Tally,
        exporter: &X,
    ) -> Option<StepReport<X::Error>>
    where
        R: Rng + ?Sized,
        X: Exporter + ?Sized,
    {
        let record = self.tick(rng, tally)?;
        let export = exporter.export(&record.snapshot);
        if let Err(err) = &export {
            log::warn!("export after tick {} failed: {err}", record.tick);
        }
        Some(StepReport { record, export })
    }

    /// Abort a running loop. Completed loops stay completed.
    pub fn cancel(&mut self) -> bool {
        if self.state == LoopState::Running {
            self.state = LoopState::Idle;
            log::debug!(
                "sampling loop cancelled after {} of {} ticks",
                self.ticks_completed,
                self.tick_limit
            );
            true
        } else {
            false
        }
    }
}
