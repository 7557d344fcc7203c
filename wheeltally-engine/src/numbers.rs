//! Numeric conversion helpers centralizing safe numeric casts.

use num_traits::cast::cast;

/// Convert a counter to f64 while allowing precision loss in a single location.
#[must_use]
pub fn count_to_f64(value: u64) -> f64 {
    cast::<u64, f64>(value).unwrap_or(0.0)
}

/// Share of `part` in `total` as a percentage, 0.0 when nothing was counted.
#[must_use]
pub fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    count_to_f64(part) / count_to_f64(total) * 100.0
}

/// Expected share of a value covering `pockets` of the 37 on the wheel.
#[must_use]
pub fn expected_percent(pockets: usize) -> f64 {
    let pockets = cast::<usize, f64>(pockets).unwrap_or(0.0);
    let wheel = cast::<usize, f64>(crate::wheel::POCKETS).unwrap_or(37.0);
    pockets / wheel * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_handles_empty_total() {
        assert!(percent(3, 0).abs() < f64::EPSILON);
        assert!((percent(1, 4) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn expected_share_uses_full_wheel() {
        assert!((expected_percent(18) - 48.648_648).abs() < 1e-3);
        assert!((expected_percent(37) - 100.0).abs() < 1e-9);
    }
}
