use std::fmt;

/// Reading progress through a book, in whole percent.
///
/// Every constructor clamps into `0..=100`, so a value of this type is
/// always in range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReadingProgress(u8);

impl ReadingProgress {
    pub const MIN: Self = Self(0);
    pub const MAX: Self = Self(100);

    /// Clamps an integer percentage into range.
    #[must_use]
    pub fn clamped(percent: i64) -> Self {
        // Bounded by the clamp, so the narrowing cast is lossless.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Self(percent.clamp(0, 100) as u8)
    }

    /// Rounds a fractional percentage to the nearest whole percent, then clamps.
    ///
    /// Non-finite input maps to zero.
    #[must_use]
    pub fn from_percent(percent: f64) -> Self {
        if !percent.is_finite() {
            return Self::MIN;
        }
        #[allow(clippy::cast_possible_truncation)]
        Self::clamped(percent.round().clamp(-1.0, 101.0) as i64)
    }

    /// Progress for a scroll position: `offset / max_offset` as a percentage.
    ///
    /// Returns `None` when nothing is scrollable (`max_offset <= 0`).
    #[must_use]
    pub fn from_scroll(offset: f64, max_offset: f64) -> Option<Self> {
        if !max_offset.is_finite() || max_offset <= 0.0 {
            return None;
        }
        Some(Self::from_percent(offset / max_offset * 100.0))
    }

    #[must_use]
    pub fn percent(self) -> u8 {
        self.0
    }

    /// Absolute distance in percentage points.
    #[must_use]
    pub fn distance(self, other: Self) -> u8 {
        self.0.abs_diff(other.0)
    }

    #[must_use]
    pub fn is_finished(self) -> bool {
        self == Self::MAX
    }
}

impl fmt::Display for ReadingProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_above_and_below() {
        assert_eq!(ReadingProgress::clamped(150).percent(), 100);
        assert_eq!(ReadingProgress::clamped(-10).percent(), 0);
        assert_eq!(ReadingProgress::clamped(42).percent(), 42);
    }

    #[test]
    fn rounds_fractions_before_clamping() {
        assert_eq!(ReadingProgress::from_percent(49.5).percent(), 50);
        assert_eq!(ReadingProgress::from_percent(49.4).percent(), 49);
        assert_eq!(ReadingProgress::from_percent(1e12).percent(), 100);
        assert_eq!(ReadingProgress::from_percent(f64::NAN).percent(), 0);
    }

    #[test]
    fn scroll_ratio_maps_to_percent() {
        let p = ReadingProgress::from_scroll(250.0, 1000.0).unwrap();
        assert_eq!(p.percent(), 25);

        // Overscroll past the end still reads as finished.
        let p = ReadingProgress::from_scroll(1100.0, 1000.0).unwrap();
        assert!(p.is_finished());
    }

    #[test]
    fn unscrollable_surface_has_no_reading() {
        assert_eq!(ReadingProgress::from_scroll(0.0, 0.0), None);
        assert_eq!(ReadingProgress::from_scroll(10.0, -5.0), None);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = ReadingProgress::clamped(10);
        let b = ReadingProgress::clamped(13);
        assert_eq!(a.distance(b), 3);
        assert_eq!(b.distance(a), 3);
    }
}
