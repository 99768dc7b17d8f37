//! Extraction windows and watermark advancement

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Mutex;
use zbxsync_common::time::floor_to_second;

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Half-open extraction window `(start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// Window of `size` starting right after `start`; `None` if the end is
    /// not representable
    pub fn new(start: DateTime<Utc>, size: TimeDelta) -> Option<Self> {
        let end = start.checked_add_signed(size)?;
        Some(Self { start, end })
    }

    pub fn start_epoch(&self) -> i64 {
        self.start.timestamp()
    }

    pub fn end_epoch(&self) -> i64 {
        self.end.timestamp()
    }

    pub fn size(&self) -> TimeDelta {
        self.end - self.start
    }
}

/// Next watermark after a fully extracted window.
///
/// A window that ends after `now` may still receive rows, so the watermark
/// only moves up to the latest observed row. A window entirely in the past
/// (end at or before `now`) is closed and the watermark jumps to its end.
pub fn advance(
    window_start: DateTime<Utc>,
    window_size: TimeDelta,
    observed_max: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let candidate_end = window_start
        .checked_add_signed(window_size)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    if candidate_end > now {
        observed_max
            .unwrap_or(window_start)
            .clamp(window_start, candidate_end)
    } else {
        candidate_end
    }
}

/// Where a stream resumes after its input row limit cut a window short
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resume {
    pub watermark: DateTime<Utc>,
    /// Every row of the window fell into one second; rows beyond the limit in
    /// that second are skipped
    pub limit_too_small: bool,
}

/// Resume one second before the last observed whole second, so rows sharing
/// the boundary second are read again rather than lost.
pub fn resume_after_truncation(window_start: DateTime<Utc>, observed_max: DateTime<Utc>) -> Resume {
    let last_second = floor_to_second(observed_max);
    let rewound = last_second - TimeDelta::seconds(1);

    if rewound > window_start {
        Resume {
            watermark: rewound,
            limit_too_small: false,
        }
    } else {
        Resume {
            watermark: last_second.max(window_start),
            limit_too_small: true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_past_window_advances_to_end() {
        let start = t(0, 0, 0);
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        assert_eq!(
            advance(start, TimeDelta::hours(1), Some(t(0, 47, 0)), now),
            t(1, 0, 0)
        );
        assert_eq!(advance(start, TimeDelta::hours(1), None, now), t(1, 0, 0));
    }

    #[test]
    fn test_open_window_advances_to_observed_max() {
        let start = t(0, 0, 0);
        let now = t(0, 30, 0);

        assert_eq!(
            advance(start, TimeDelta::hours(1), Some(t(0, 12, 5)), now),
            t(0, 12, 5)
        );
        assert_eq!(advance(start, TimeDelta::hours(1), None, now), start);
    }

    #[test]
    fn test_boundary_now_equal_to_end_closes_window() {
        let start = t(0, 0, 0);
        let size = TimeDelta::hours(2);
        let observed = Some(t(1, 0, 0));

        assert_eq!(advance(start, size, observed, t(2, 0, 0)), t(2, 0, 0));
        assert_eq!(advance(start, size, observed, t(1, 59, 59)), t(1, 0, 0));
    }

    #[test]
    fn test_observed_max_is_clamped_into_window() {
        let start = t(1, 0, 0);
        let now = t(1, 30, 0);

        // Clock skew on the source must not move the watermark backwards
        assert_eq!(
            advance(start, TimeDelta::hours(1), Some(t(0, 59, 0)), now),
            start
        );
        assert_eq!(
            advance(start, TimeDelta::hours(1), Some(t(3, 0, 0)), now),
            t(2, 0, 0)
        );
    }

    #[test]
    fn test_window_epoch_bounds() {
        let window = Window::new(t(0, 0, 0), TimeDelta::hours(1)).unwrap();
        assert_eq!(window.start_epoch(), 1_704_067_200);
        assert_eq!(window.end_epoch(), 1_704_070_800);
        assert_eq!(window.size(), TimeDelta::hours(1));
    }

    #[test]
    fn test_truncation_rewinds_one_second() {
        let max = t(0, 10, 30) + TimeDelta::milliseconds(250);
        let resume = resume_after_truncation(t(0, 0, 0), max);

        assert_eq!(resume.watermark, t(0, 10, 29));
        assert!(!resume.limit_too_small);
    }

    #[test]
    fn test_window_end_out_of_range() {
        assert!(Window::new(t(0, 0, 0), TimeDelta::hours(i64::from(u32::MAX))).is_none());
        assert_eq!(
            advance(t(0, 0, 0), TimeDelta::MAX, None, t(1, 0, 0)),
            t(0, 0, 0)
        );
    }

    #[test]
    fn test_truncation_rereads_rows_at_end_of_last_second() {
        // Last row at 00:10:30 with 999 ms, clock reported as truncated millis
        let observed = zbxsync_common::time::from_epoch_millis(1_704_067_830_999).unwrap();
        let resume = resume_after_truncation(t(0, 0, 0), observed);

        assert_eq!(resume.watermark, t(0, 10, 29));
        // Next window predicate is `clock > 1704067829`, so second 1704067830 is read again
        assert_eq!(resume.watermark.timestamp(), 1_704_067_830 - 1);
    }

    #[test]
    fn test_truncation_within_first_second_still_progresses() {
        let resume = resume_after_truncation(t(0, 0, 0), t(0, 0, 1));

        assert_eq!(resume.watermark, t(0, 0, 1));
        assert!(resume.limit_too_small);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(t(0, 0, 0));
        assert_eq!(clock.now(), t(0, 0, 0));
        clock.set(t(5, 0, 0));
        assert_eq!(clock.now(), t(5, 0, 0));
    }
}
