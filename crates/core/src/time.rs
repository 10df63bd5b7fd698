use chrono::{DateTime, Duration, Utc};

/// Source of "now" for id generation.
///
/// Book and user ids are derived from the current epoch millisecond, so tests
/// pin the clock to get predictable ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Clock {
    #[default]
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    #[must_use]
    pub fn default_clock() -> Self {
        Self::System
    }

    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    /// Clock pinned at `millis` after the Unix epoch.
    #[must_use]
    pub fn at_millis(millis: u64) -> Self {
        let millis = i64::try_from(millis).unwrap_or(i64::MAX);
        Self::Fixed(DateTime::UNIX_EPOCH + Duration::milliseconds(millis))
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(t) => *t,
        }
    }

    /// Milliseconds since the Unix epoch; instants before it read as zero.
    #[must_use]
    pub fn now_millis(&self) -> u64 {
        u64::try_from(self.now().timestamp_millis()).unwrap_or(0)
    }
}

/// Epoch millisecond the test clock is pinned at (2023-11-14T22:13:20Z).
pub const FIXED_TEST_MILLIS: u64 = 1_700_000_000_000;

#[must_use]
pub fn fixed_clock() -> Clock {
    Clock::at_millis(FIXED_TEST_MILLIS)
}

#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    fixed_clock().now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_reports_millis() {
        assert_eq!(fixed_clock().now_millis(), FIXED_TEST_MILLIS);
        assert_eq!(fixed_now().timestamp(), 1_700_000_000);
    }

    #[test]
    fn pre_epoch_reads_as_zero() {
        let before = Clock::fixed(DateTime::UNIX_EPOCH - Duration::seconds(1));
        assert_eq!(before.now_millis(), 0);
    }

    #[test]
    fn system_clock_moves() {
        assert!(Clock::default_clock().now_millis() >= FIXED_TEST_MILLIS);
    }
}
