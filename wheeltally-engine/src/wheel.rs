//! Single-zero wheel outcomes and their fixed classification tables.
use rand::Rng;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Highest number on a single-zero wheel.
pub const MAX_NUMBER: u8 = 36;

/// Count of pockets on the wheel including zero.
pub const POCKETS: usize = MAX_NUMBER as usize + 1;

/// Numbers coloured red on the layout.
pub const RED_NUMBERS: [u8; 18] = [
    1, 3, 5, 7, 9, 12, 14, 16, 18, 19, 21, 23, 25, 27, 30, 32, 34, 36,
];

/// Numbers coloured black on the layout.
pub const BLACK_NUMBERS: [u8; 18] = [
    2, 4, 6, 8, 10, 11, 13, 15, 17, 20, 22, 24, 26, 28, 29, 31, 33, 35,
];

/// One drawn pocket, always within `0..=36`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Outcome(u8);

impl Outcome {
    pub const ZERO: Self = Self(0);

    /// Wrap a raw number, rejecting anything off the wheel.
    #[must_use]
    pub const fn new(number: u8) -> Option<Self> {
        if number <= MAX_NUMBER {
            Some(Self(number))
        } else {
            None
        }
    }

    /// Draw one pocket uniformly.
    pub fn draw<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.gen_range(0..=MAX_NUMBER))
    }

    #[must_use]
    pub const fn number(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Every pocket in wheel-number order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..=MAX_NUMBER).map(Self)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u8> for Outcome {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("{value} is not a pocket on the wheel"))
    }
}

impl From<Outcome> for u8 {
    fn from(outcome: Outcome) -> Self {
        outcome.0
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pocket colour. Zero is the only green pocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Green,
    Red,
    Black,
}

impl Color {
    pub const ALL: [Self; 3] = [Self::Green, Self::Red, Self::Black];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Red => "red",
            Self::Black => "black",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    Even,
    Odd,
}

impl Parity {
    pub const ALL: [Self; 2] = [Self::Even, Self::Odd];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Even => "even",
            Self::Odd => "odd",
        }
    }
}

/// Low (1-18) or high (19-36) half of the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Range {
    Low,
    High,
}

impl Range {
    pub const ALL: [Self; 2] = [Self::Low, Self::High];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::High => "high",
        }
    }
}

/// Dozen block: 1-12, 13-24 or 25-36.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Third {
    #[serde(rename = "1st")]
    First,
    #[serde(rename = "2nd")]
    Second,
    #[serde(rename = "3rd")]
    Third,
}

impl Third {
    pub const ALL: [Self; 3] = [Self::First, Self::Second, Self::Third];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::First => "1st",
            Self::Second => "2nd",
            Self::Third => "3rd",
        }
    }

    #[must_use]
    pub const fn ordinal(self) -> usize {
        match self {
            Self::First => 0,
            Self::Second => 1,
            Self::Third => 2,
        }
    }
}

/// Group of three consecutive numbers, one row of the betting layout.
/// `A` holds 1-3 and `L` holds 34-36.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Column {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
}

impl Column {
    pub const ALL: [Self; 12] = [
        Self::A,
        Self::B,
        Self::C,
        Self::D,
        Self::E,
        Self::F,
        Self::G,
        Self::H,
        Self::I,
        Self::J,
        Self::K,
        Self::L,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
            Self::F => "F",
            Self::G => "G",
            Self::H => "H",
            Self::I => "I",
            Self::J => "J",
            Self::K => "K",
            Self::L => "L",
        }
    }

    #[must_use]
    pub const fn ordinal(self) -> usize {
        self as usize
    }

    /// The three numbers covered by this group, ascending.
    #[must_use]
    pub const fn numbers(self) -> [u8; 3] {
        let first = (self as u8) * 3 + 1;
        [first, first + 1, first + 2]
    }
}

macro_rules! impl_label_display {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        })*
    };
}

impl_label_display!(Color, Parity, Range, Third, Column);

const fn build_color_table() -> [Color; POCKETS] {
    let mut table = [Color::Black; POCKETS];
    table[0] = Color::Green;
    let mut i = 0;
    while i < RED_NUMBERS.len() {
        table[RED_NUMBERS[i] as usize] = Color::Red;
        i += 1;
    }
    table
}

const fn build_column_table() -> [Option<Column>; POCKETS] {
    let mut table = [None; POCKETS];
    let mut n = 1;
    while n < POCKETS {
        table[n] = Some(Column::ALL[(n - 1) / 3]);
        n += 1;
    }
    table
}

const COLOR_BY_NUMBER: [Color; POCKETS] = build_color_table();
const COLUMN_BY_NUMBER: [Option<Column>; POCKETS] = build_column_table();
const THIRD_BY_BLOCK: [Third; 3] = Third::ALL;

/// Every axis value an outcome falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Classification {
    pub color: Color,
    pub parity: Option<Parity>,
    pub range: Option<Range>,
    pub third: Option<Third>,
    pub column: Option<Column>,
}

impl Classification {
    /// Counter cells this classification contributes to, one per applicable axis.
    #[must_use]
    pub fn cells(&self) -> SmallVec<[crate::tally::Cell; 5]> {
        use crate::tally::Cell;

        let mut cells = SmallVec::new();
        cells.push(Cell::Color(self.color));
        if let Some(parity) = self.parity {
            cells.push(Cell::Parity(parity));
        }
        if let Some(range) = self.range {
            cells.push(Cell::Range(range));
        }
        if let Some(third) = self.third {
            cells.push(Cell::Third(third));
        }
        if let Some(column) = self.column {
            cells.push(Cell::Column(column));
        }
        cells
    }
}

/// Classify one outcome along all five axes.
#[must_use]
pub const fn classify(outcome: Outcome) -> Classification {
    let n = outcome.0;
    let color = COLOR_BY_NUMBER[n as usize];
    let column = COLUMN_BY_NUMBER[n as usize];
    if n == 0 {
        return Classification {
            color,
            parity: None,
            range: None,
            third: None,
            column,
        };
    }
    let parity = if n % 2 == 0 { Parity::Even } else { Parity::Odd };
    let range = if n <= 18 { Range::Low } else { Range::High };
    let third = THIRD_BY_BLOCK[((n - 1) / 12) as usize];
    Classification {
        color,
        parity: Some(parity),
        range: Some(range),
        third: Some(third),
        column,
    }
}
