use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Errors raised when constructing a periodic schedule.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("schedule period must be > 0")]
    ZeroPeriod,

    #[error("schedule period {period:?} does not fit in i64 milliseconds")]
    PeriodOverflow { period: Duration },
}

/// Monotonic millisecond clock anchored at pipeline start.
///
/// Backed by `tokio::time::Instant`, so a paused tokio test runtime drives it
/// deterministically. Outside a runtime it behaves like `std::time::Instant`.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    /// Anchor a new clock at the current instant.
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the clock was anchored.
    pub fn now_ms(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX)
    }

    /// The instant corresponding to a millisecond timestamp on this clock.
    ///
    /// Negative timestamps clamp to the origin.
    pub fn instant_at(&self, ms: i64) -> Instant {
        let offset = u64::try_from(ms).unwrap_or(0);
        self.origin + Duration::from_millis(offset)
    }
}

/// Whole seconds between `start_ms` and `now_ms`, saturating at zero.
pub fn uptime_secs(start_ms: i64, now_ms: i64) -> u32 {
    let secs = now_ms.saturating_sub(start_ms).max(0) / 1000;
    u32::try_from(secs).unwrap_or(u32::MAX)
}

/// Convert a duration to whole milliseconds as used by the pipeline clock.
pub fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Absolute deadline counter for drift-free periodic wakeups.
///
/// Deadlines are always `anchor + n * period`. A late wake never shifts the
/// grid; if whole periods were overrun the counter jumps forward to the first
/// deadline that is not already in the past.
#[derive(Debug, Clone)]
pub struct PeriodicSchedule {
    anchor_ms: i64,
    period_ms: i64,
    /// Number of deadlines consumed so far.
    index: i64,
}

impl PeriodicSchedule {
    /// Create a schedule whose first deadline is one period after `anchor_ms`.
    pub fn new(anchor_ms: i64, period: Duration) -> Result<Self, ScheduleError> {
        if period.is_zero() {
            return Err(ScheduleError::ZeroPeriod);
        }

        let period_ms =
            i64::try_from(period.as_millis()).map_err(|_| ScheduleError::PeriodOverflow { period })?;
        if period_ms == 0 {
            return Err(ScheduleError::ZeroPeriod);
        }

        Ok(Self {
            anchor_ms,
            period_ms,
            index: 0,
        })
    }

    /// Schedule period in milliseconds.
    pub fn period_ms(&self) -> i64 {
        self.period_ms
    }

    /// The deadline the caller should wait for next.
    pub fn next_deadline(&self) -> i64 {
        self.anchor_ms
            .saturating_add(self.period_ms.saturating_mul(self.index + 1))
    }

    /// Consume the current deadline after waking at `now_ms`.
    ///
    /// Returns the number of whole periods that were skipped because the wake
    /// happened at or after their deadline. The next deadline is always
    /// strictly after `now_ms`.
    pub fn advance(&mut self, now_ms: i64) -> u64 {
        self.index += 1;

        let mut skipped = 0u64;
        while self.next_deadline() <= now_ms {
            self.index += 1;
            skipped += 1;
        }

        skipped
    }
}
