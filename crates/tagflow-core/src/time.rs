//! Time system for tagged logical time
//!
//! Provides the ordered time algebra the scheduler runs on:
//! - `TimeValue` - A point in time with nanosecond resolution
//! - `Tag` - A `(time, microstep)` pair, totally ordered lexicographically
//! - `PhysicalClock` - Source of wall-clock readings
//! - `SystemClock` / `ManualClock` - Real and externally driven clocks

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A point in time, in nanoseconds since the Unix epoch
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct TimeValue(u64);

impl TimeValue {
    /// The zero point
    pub const ZERO: TimeValue = TimeValue(0);

    /// Create from nanoseconds
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Create from milliseconds
    pub fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Create from seconds
    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// Get the raw nanosecond count
    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Check if this is the zero point
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Check if this time is strictly earlier than `other`
    pub fn is_earlier_than(&self, other: TimeValue) -> bool {
        self.0 < other.0
    }

    /// Absolute distance between two points in time
    pub fn difference(&self, other: TimeValue) -> Duration {
        Duration::from_nanos(self.0.abs_diff(other.0))
    }

    /// Add a duration, saturating at the end of representable time
    pub fn add(&self, delay: Duration) -> TimeValue {
        self.offset_by(delay)
    }

    fn offset_by(&self, delay: Duration) -> TimeValue {
        let nanos = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        TimeValue(self.0.saturating_add(nanos))
    }
}

impl Add<Duration> for TimeValue {
    type Output = TimeValue;

    fn add(self, rhs: Duration) -> TimeValue {
        self.offset_by(rhs)
    }
}

impl Sub for TimeValue {
    type Output = Duration;

    /// Saturates to zero when `rhs` is later than `self`
    fn sub(self, rhs: TimeValue) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}s", self.0 / 1_000_000_000, self.0 % 1_000_000_000)
    }
}

/// A logical time tag: `(time, microstep)`
///
/// Tags are ordered first by time, then by microstep. Two tags are
/// simultaneous only when both components are equal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Tag {
    /// Logical time
    pub time: TimeValue,
    /// Tie-breaking index among events at the same time
    pub microstep: u64,
}

impl Tag {
    /// Create a new tag
    pub fn new(time: TimeValue, microstep: u64) -> Self {
        Self { time, microstep }
    }

    /// The tag `delay` after this one
    ///
    /// A zero delay yields this very tag; any other delay yields the first
    /// microstep at the later time.
    pub fn later_tag(&self, delay: Duration) -> Tag {
        if delay.is_zero() {
            *self
        } else {
            Tag::new(self.time + delay, 0)
        }
    }

    /// The tag one microstep after this one
    pub fn microstep_later(&self) -> Tag {
        Tag::new(self.time, self.microstep.saturating_add(1))
    }

    /// Check if both time and microstep are equal
    pub fn is_simultaneous_with(&self, other: &Tag) -> bool {
        self == other
    }

    /// Check if this tag orders strictly before `other`
    pub fn is_smaller_than(&self, other: &Tag) -> bool {
        self < other
    }

    /// Distance in time between two tags (microsteps are ignored)
    pub fn difference(&self, other: &Tag) -> Duration {
        self.time.difference(other.time)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.time, self.microstep)
    }
}

/// Source of physical time readings
pub trait PhysicalClock {
    /// The current physical time
    fn now(&self) -> TimeValue;
}

/// Wall clock backed by `SystemTime`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl PhysicalClock for SystemClock {
    fn now(&self) -> TimeValue {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        TimeValue::from_nanos(u64::try_from(since_epoch.as_nanos()).unwrap_or(u64::MAX))
    }
}

/// A clock that only moves when told to
///
/// Clones share the same reading, so a test can hand one clone to the
/// runtime and keep another to advance time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock showing `start`
    pub fn new(start: TimeValue) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(start.as_nanos())),
        }
    }

    /// Move the clock forward to `at`; earlier readings are ignored
    pub fn advance_to(&self, at: TimeValue) {
        self.nanos.fetch_max(at.as_nanos(), Ordering::SeqCst);
    }

    /// Move the clock forward by `delay`
    pub fn advance(&self, delay: Duration) {
        let next = self.now() + delay;
        self.advance_to(next);
    }
}

impl PhysicalClock for ManualClock {
    fn now(&self) -> TimeValue {
        TimeValue::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_ordering() {
        let t = TimeValue::from_secs(1);
        assert!(Tag::new(t, 0) < Tag::new(t, 1));
        assert!(Tag::new(t, 7) < Tag::new(t + Duration::from_nanos(1), 0));
        assert!(Tag::new(t, 3).is_simultaneous_with(&Tag::new(t, 3)));
        assert!(Tag::new(t, 2).is_smaller_than(&Tag::new(t, 3)));
    }

    #[test]
    fn test_later_tag() {
        let tag = Tag::new(TimeValue::from_secs(5), 4);
        assert_eq!(tag.later_tag(Duration::ZERO), tag);
        assert_eq!(
            tag.later_tag(Duration::from_millis(10)),
            Tag::new(TimeValue::from_millis(5010), 0)
        );
        assert_eq!(tag.microstep_later(), Tag::new(TimeValue::from_secs(5), 5));
    }

    #[test]
    fn test_time_value_arithmetic() {
        let a = TimeValue::from_millis(1500);
        let b = TimeValue::from_secs(1);
        assert_eq!(a - b, Duration::from_millis(500));
        assert_eq!(b - a, Duration::ZERO);
        assert_eq!(a.difference(b), Duration::from_millis(500));
        assert_eq!(b.difference(a), Duration::from_millis(500));
        assert!(b.is_earlier_than(a));
        assert_eq!(a.to_string(), "1.500000000s");
    }

    #[test]
    fn test_manual_clock_is_shared() {
        let clock = ManualClock::new(TimeValue::from_secs(10));
        let view = clock.clone();
        clock.advance(Duration::from_secs(2));
        assert_eq!(view.now(), TimeValue::from_secs(12));

        // Never runs backwards
        clock.advance_to(TimeValue::from_secs(1));
        assert_eq!(view.now(), TimeValue::from_secs(12));
    }

    #[test]
    fn test_system_clock_is_after_epoch() {
        assert!(SystemClock.now() > TimeValue::ZERO);
    }
}
