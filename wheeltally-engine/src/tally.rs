//! Running counters for every axis value plus the raw outcome history.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wheel::{Classification, Color, Column, Outcome, POCKETS, Parity, Range, Third};

/// One independent classification dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Parity,
    Color,
    Range,
    Third,
    Column,
}

impl Axis {
    pub const ALL: [Self; 5] = [
        Self::Parity,
        Self::Color,
        Self::Range,
        Self::Third,
        Self::Column,
    ];

    /// Whether zero falls outside every value of this axis.
    #[must_use]
    pub const fn skips_zero(self) -> bool {
        !matches!(self, Self::Color)
    }
}

/// Key of one axis-value counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "axis", content = "value", rename_all = "lowercase")]
pub enum Cell {
    Parity(Parity),
    Color(Color),
    Range(Range),
    Third(Third),
    Column(Column),
}

/// Total number of axis-value counters.
pub const CELL_COUNT: usize = 22;

const PARITY_BASE: usize = 0;
const COLOR_BASE: usize = PARITY_BASE + Parity::ALL.len();
const RANGE_BASE: usize = COLOR_BASE + Color::ALL.len();
const THIRD_BASE: usize = RANGE_BASE + Range::ALL.len();
const COLUMN_BASE: usize = THIRD_BASE + Third::ALL.len();

impl Cell {
    /// Every counter key in storage order.
    pub const ALL: [Self; CELL_COUNT] = [
        Self::Parity(Parity::Even),
        Self::Parity(Parity::Odd),
        Self::Color(Color::Green),
        Self::Color(Color::Red),
        Self::Color(Color::Black),
        Self::Range(Range::Low),
        Self::Range(Range::High),
        Self::Third(Third::First),
        Self::Third(Third::Second),
        Self::Third(Third::Third),
        Self::Column(Column::A),
        Self::Column(Column::B),
        Self::Column(Column::C),
        Self::Column(Column::D),
        Self::Column(Column::E),
        Self::Column(Column::F),
        Self::Column(Column::G),
        Self::Column(Column::H),
        Self::Column(Column::I),
        Self::Column(Column::J),
        Self::Column(Column::K),
        Self::Column(Column::L),
    ];

    #[must_use]
    pub const fn axis(self) -> Axis {
        match self {
            Self::Parity(_) => Axis::Parity,
            Self::Color(_) => Axis::Color,
            Self::Range(_) => Axis::Range,
            Self::Third(_) => Axis::Third,
            Self::Column(_) => Axis::Column,
        }
    }

    /// Position of this counter in `Cell::ALL`.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Parity(Parity::Even) => PARITY_BASE,
            Self::Parity(Parity::Odd) => PARITY_BASE + 1,
            Self::Color(Color::Green) => COLOR_BASE,
            Self::Color(Color::Red) => COLOR_BASE + 1,
            Self::Color(Color::Black) => COLOR_BASE + 2,
            Self::Range(Range::Low) => RANGE_BASE,
            Self::Range(Range::High) => RANGE_BASE + 1,
            Self::Third(third) => THIRD_BASE + third.ordinal(),
            Self::Column(column) => COLUMN_BASE + column.ordinal(),
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Parity(v) => v.label(),
            Self::Color(v) => v.label(),
            Self::Range(v) => v.label(),
            Self::Third(v) => v.label(),
            Self::Column(v) => v.label(),
        }
    }
}

/// One history row: the drawn number and its colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub outcome: Outcome,
    pub color: Color,
}

/// A broken counting invariant.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TallyInvariantError {
    #[error("{axis:?} counters sum to {sum} plus {zeros} zeros, expected total {total}")]
    AxisSum {
        axis: Axis,
        sum: u64,
        zeros: u64,
        total: u64,
    },
    #[error("per-number counters sum to {sum}, expected total {total}")]
    StraightSum { sum: u64, total: u64 },
    #[error("history holds {len} rows, expected total {total}")]
    HistoryLength { len: usize, total: u64 },
}

/// Mutable aggregate state fed by the sampling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    total: u64,
    cells: [u64; CELL_COUNT],
    straight: [u64; POCKETS],
    history: Vec<HistoryEntry>,
}

impl Default for Tally {
    fn default() -> Self {
        Self::new()
    }
}

impl Tally {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            total: 0,
            cells: [0; CELL_COUNT],
            straight: [0; POCKETS],
            history: Vec::new(),
        }
    }

    /// Count one outcome under every axis value it belongs to.
    pub fn record(&mut self, outcome: Outcome, classification: &Classification) {
        self.total = self.total.saturating_add(1);
        for cell in classification.cells() {
            let slot = &mut self.cells[cell.index()];
            *slot = slot.saturating_add(1);
        }
        let hits = &mut self.straight[outcome.index()];
        *hits = hits.saturating_add(1);
        self.history.push(HistoryEntry {
            outcome,
            color: classification.color,
        });
    }

    /// Owned point-in-time copy for export.
    #[must_use]
    pub fn snapshot(&self) -> TallyView {
        TallyView {
            total: self.total,
            cells: self.cells,
            straight: self.straight.to_vec(),
            history: self.history.clone(),
        }
    }

    #[must_use]
    pub const fn total(&self) -> u64 {
        self.total
    }

    #[must_use]
    pub const fn count(&self, cell: Cell) -> u64 {
        self.cells[cell.index()]
    }

    /// Occurrences of zero.
    #[must_use]
    pub const fn zeros(&self) -> u64 {
        self.straight[0]
    }

    #[must_use]
    pub const fn straight(&self, outcome: Outcome) -> u64 {
        self.straight[outcome.index()]
    }

    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Sum of every counter on one axis.
    #[must_use]
    pub fn axis_total(&self, axis: Axis) -> u64 {
        axis_sum(&self.cells, axis)
    }

    /// Verify every per-axis, per-number and history invariant.
    pub fn check_invariants(&self) -> Result<(), TallyInvariantError> {
        check(&self.cells, &self.straight, self.history.len(), self.total)
    }
}

fn axis_sum(cells: &[u64; CELL_COUNT], axis: Axis) -> u64 {
    Cell::ALL
        .iter()
        .filter(|cell| cell.axis() == axis)
        .map(|cell| cells[cell.index()])
        .sum()
}

fn check(
    cells: &[u64; CELL_COUNT],
    straight: &[u64],
    history_len: usize,
    total: u64,
) -> Result<(), TallyInvariantError> {
    let zeros = straight.first().copied().unwrap_or(0);
    for axis in Axis::ALL {
        let sum = axis_sum(cells, axis);
        let counted_zeros = if axis.skips_zero() { zeros } else { 0 };
        if sum + counted_zeros != total {
            return Err(TallyInvariantError::AxisSum {
                axis,
                sum,
                zeros: counted_zeros,
                total,
            });
        }
    }
    let sum: u64 = straight.iter().sum();
    if sum != total {
        return Err(TallyInvariantError::StraightSum { sum, total });
    }
    if u64::try_from(history_len).ok() != Some(total) {
        return Err(TallyInvariantError::HistoryLength {
            len: history_len,
            total,
        });
    }
    Ok(())
}

/// Read-only snapshot of a [`Tally`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TallyView {
    total: u64,
    cells: [u64; CELL_COUNT],
    straight: Vec<u64>,
    history: Vec<HistoryEntry>,
}

impl TallyView {
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.total
    }

    #[must_use]
    pub const fn count(&self, cell: Cell) -> u64 {
        self.cells[cell.index()]
    }

    #[must_use]
    pub fn zeros(&self) -> u64 {
        self.straight.first().copied().unwrap_or(0)
    }

    #[must_use]
    pub fn straight(&self, outcome: Outcome) -> u64 {
        self.straight.get(outcome.index()).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    #[must_use]
    pub fn axis_total(&self, axis: Axis) -> u64 {
        axis_sum(&self.cells, axis)
    }

    /// Most recent row, if any outcome has been recorded.
    #[must_use]
    pub fn last(&self) -> Option<HistoryEntry> {
        self.history.last().copied()
    }

    pub fn check_invariants(&self) -> Result<(), TallyInvariantError> {
        check(&self.cells, &self.straight, self.history.len(), self.total)
    }
}
