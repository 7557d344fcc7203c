//! wheeltally engine
//!
//! Platform-agnostic sampling and aggregation for single-zero roulette
//! statistics. This crate classifies outcomes, keeps the running tallies and
//! drives the bounded sampling loop without any I/O or runtime dependencies.

pub mod layout;
pub mod numbers;
pub mod rng;
pub mod sampler;
pub mod tally;
pub mod wheel;

// Re-export commonly used types
pub use layout::{CellRef, CellRefError, Counter, Placement, SheetLayout};
pub use rng::WheelRng;
pub use sampler::{LoopState, SamplingError, SamplingLoop, StepReport, TickRecord};
pub use tally::{Axis, CELL_COUNT, Cell, HistoryEntry, Tally, TallyInvariantError, TallyView};
pub use wheel::{Classification, Color, Column, Outcome, Parity, Range, Third, classify};

/// Trait for persisting tally snapshots.
/// Platform-specific implementations should provide this
pub trait Exporter {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Persist one snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    fn export(&self, snapshot: &TallyView) -> Result<(), Self::Error>;
}

impl<T: Exporter + ?Sized> Exporter for std::sync::Arc<T> {
    type Error = T::Error;

    fn export(&self, snapshot: &TallyView) -> Result<(), Self::Error> {
        (**self).export(snapshot)
    }
}

/// Exporter that discards every snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullExporter;

impl Exporter for NullExporter {
    type Error = std::convert::Infallible;

    fn export(&self, _snapshot: &TallyView) -> Result<(), Self::Error> {
        Ok(())
    }
}
