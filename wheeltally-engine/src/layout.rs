//! Fixed cell coordinates of the statistics sheet.
//!
//! Downstream spreadsheets read these positions directly, so the mapping is a
//! wire format: moving a counter is a breaking change.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::tally::{Cell, TallyView};
use crate::wheel::{Color, Column, Outcome, Parity, Range, Third};

/// First 1-based row of the outcome history.
pub const HISTORY_FIRST_ROW: u32 = 4;
/// Column holding drawn numbers.
pub const HISTORY_NUMBER_COLUMN: u16 = 1;
/// Column holding colour labels.
pub const HISTORY_COLOR_COLUMN: u16 = 2;

/// A1-style reference with 1-based column and row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    column: u16,
    row: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CellRefError {
    #[error("cell reference is empty")]
    Empty,
    #[error("cell reference `{0}` is not letters followed by a row number")]
    Malformed(String),
    #[error("cell reference `{0}` is out of range")]
    OutOfRange(String),
}

impl CellRef {
    /// Build from 1-based coordinates; zero in either position is rejected.
    #[must_use]
    pub const fn new(column: u16, row: u32) -> Option<Self> {
        if column == 0 || row == 0 {
            None
        } else {
            Some(Self { column, row })
        }
    }

    const fn at(column: u16, row: u32) -> Self {
        Self { column, row }
    }

    #[must_use]
    pub const fn column(self) -> u16 {
        self.column
    }

    #[must_use]
    pub const fn row(self) -> u32 {
        self.row
    }

    /// Zero-based `(row, column)` pair as spreadsheet writers expect.
    #[must_use]
    pub const fn zero_based(self) -> (u32, u16) {
        (self.row - 1, self.column - 1)
    }

    /// Column letters for this reference, e.g. `AA`.
    #[must_use]
    pub fn column_letters(self) -> String {
        let mut letters = Vec::new();
        let mut n = u32::from(self.column);
        while n > 0 {
            let rem = (n - 1) % 26;
            letters.push(char::from(b'A' + rem as u8));
            n = (n - 1) / 26;
        }
        letters.iter().rev().collect()
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.column_letters(), self.row)
    }
}

impl FromStr for CellRef {
    type Err = CellRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CellRefError::Empty);
        }
        let split = s
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| CellRefError::Malformed(s.to_string()))?;
        let (letters, digits) = s.split_at(split);
        if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CellRefError::Malformed(s.to_string()));
        }
        let mut column: u32 = 0;
        for c in letters.chars() {
            let digit = u32::from(c.to_ascii_uppercase()) - u32::from('A') + 1;
            column = column
                .checked_mul(26)
                .and_then(|v| v.checked_add(digit))
                .ok_or_else(|| CellRefError::OutOfRange(s.to_string()))?;
        }
        let row: u32 = digits
            .parse()
            .map_err(|_| CellRefError::Malformed(s.to_string()))?;
        let column = u16::try_from(column).map_err(|_| CellRefError::OutOfRange(s.to_string()))?;
        Self::new(column, row).ok_or_else(|| CellRefError::OutOfRange(s.to_string()))
    }
}

impl Serialize for CellRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CellRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Value source for one fixed sheet cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Counter {
    Total,
    Cell(Cell),
    /// Hits on one non-zero number.
    Straight(Outcome),
}

impl Counter {
    #[must_use]
    pub fn read(self, view: &TallyView) -> u64 {
        match self {
            Self::Total => view.total(),
            Self::Cell(cell) => view.count(cell),
            Self::Straight(outcome) => view.straight(outcome),
        }
    }
}

/// One positioned counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub at: CellRef,
    pub counter: Counter,
}

const COL_C: u16 = 3;
const COL_D: u16 = 4;
const COL_E: u16 = 5;
const COL_G: u16 = 7;
const COL_J: u16 = 10;
const COL_M: u16 = 13;
const COL_N: u16 = 14;
const COL_P: u16 = 16;

const STRAIGHT_COLUMNS: [u16; 3] = [COL_G, COL_J, COL_M];

const SUMMARY_CELLS: [(u16, u32, Counter); 11] = [
    (COL_N, 2, Counter::Total),
    (COL_C, 4, Counter::Cell(Cell::Range(Range::Low))),
    (COL_C, 16, Counter::Cell(Cell::Range(Range::High))),
    (COL_C, 7, Counter::Cell(Cell::Parity(Parity::Even))),
    (COL_C, 13, Counter::Cell(Cell::Parity(Parity::Odd))),
    (COL_D, 2, Counter::Cell(Cell::Color(Color::Green))),
    (COL_D, 8, Counter::Cell(Cell::Color(Color::Red))),
    (COL_D, 12, Counter::Cell(Cell::Color(Color::Black))),
    (COL_E, 6, Counter::Cell(Cell::Third(Third::First))),
    (COL_E, 10, Counter::Cell(Cell::Third(Third::Second))),
    (COL_E, 14, Counter::Cell(Cell::Third(Third::Third))),
];

/// Where number `n` (1..=36) is counted in the `G4:M15` grid.
#[must_use]
pub fn straight_cell(outcome: Outcome) -> Option<CellRef> {
    let n = outcome.number();
    if n == 0 {
        return None;
    }
    let offset = u32::from(n - 1);
    let column = STRAIGHT_COLUMNS[((n - 1) % 3) as usize];
    Some(CellRef::at(column, HISTORY_FIRST_ROW + offset / 3))
}

/// Where a column-group counter lives in `P4:P15`.
#[must_use]
pub fn column_group_cell(column: Column) -> CellRef {
    let ordinal = u32::try_from(column.ordinal()).unwrap_or(0);
    CellRef::at(COL_P, HISTORY_FIRST_ROW + ordinal)
}

/// The complete sheet contract: history origin plus every single-cell counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetLayout {
    placements: Vec<Placement>,
}

impl Default for SheetLayout {
    fn default() -> Self {
        Self::standard()
    }
}

impl SheetLayout {
    /// The layout downstream workbooks expect.
    #[must_use]
    pub fn standard() -> Self {
        let mut placements: Vec<Placement> = SUMMARY_CELLS
            .iter()
            .map(|&(column, row, counter)| Placement {
                at: CellRef::at(column, row),
                counter,
            })
            .collect();
        for outcome in Outcome::all().filter(|o| !o.is_zero()) {
            if let Some(at) = straight_cell(outcome) {
                placements.push(Placement {
                    at,
                    counter: Counter::Straight(outcome),
                });
            }
        }
        for column in Column::ALL {
            placements.push(Placement {
                at: column_group_cell(column),
                counter: Counter::Cell(Cell::Column(column)),
            });
        }
        Self { placements }
    }

    #[must_use]
    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    /// Coordinate assigned to a counter, if the layout places it.
    #[must_use]
    pub fn position_of(&self, counter: Counter) -> Option<CellRef> {
        self.placements
            .iter()
            .find(|p| p.counter == counter)
            .map(|p| p.at)
    }

    /// Resolve every placement against a snapshot.
    pub fn values<'a>(&'a self, view: &'a TallyView) -> impl Iterator<Item = (CellRef, u64)> + 'a {
        self.placements
            .iter()
            .map(move |p| (p.at, p.counter.read(view)))
    }

    /// History cells for row `index` (0-based history position).
    #[must_use]
    pub fn history_cells(index: usize) -> Option<(CellRef, CellRef)> {
        let offset = u32::try_from(index).ok()?;
        let row = HISTORY_FIRST_ROW.checked_add(offset)?;
        Some((
            CellRef::at(HISTORY_NUMBER_COLUMN, row),
            CellRef::at(HISTORY_COLOR_COLUMN, row),
        ))
    }

    /// Count of numbered pockets with a straight placement.
    #[must_use]
    pub fn straight_count(&self) -> usize {
        self.placements
            .iter()
            .filter(|p| matches!(p.counter, Counter::Straight(_)))
            .count()
    }
}
