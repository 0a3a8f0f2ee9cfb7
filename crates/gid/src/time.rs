use chrono::{DateTime, Local, Utc};
use core::time::Duration;

/// Snowflake epoch: Wednesday, December 12, 2012 04:12:12.520 UTC
pub const SNOWFLAKE_EPOCH: Duration = Duration::from_millis(1_355_285_532_520);

/// Number of decimal digits in a [`DecimalClock`] tick (`yyMMddHHmmss`).
pub const DECIMAL_TICK_DIGITS: u32 = 12;

/// A trait for time sources that return the current tick.
///
/// This abstraction allows you to plug in the system clock, a decimal
/// calendar clock, or a mocked time source in tests.
///
/// The unit of a tick is defined by the implementation: milliseconds since
/// the Unix epoch for [`WallClock`], whole seconds rendered as `yyMMddHHmmss`
/// for [`DecimalClock`]. Engines only rely on ticks being comparable and on
/// consecutive ticks being strictly increasing while the clock moves forward.
///
/// # Example
///
/// ```
/// use gid::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_tick(&self) -> u64 {
///         1234
///     }
/// }
///
/// let time = FixedTime;
/// assert_eq!(time.current_tick(), 1234);
/// ```
pub trait TimeSource: Send + Sync {
    /// Returns the current tick.
    fn current_tick(&self) -> u64;
}

impl<T: TimeSource + ?Sized> TimeSource for std::sync::Arc<T> {
    fn current_tick(&self) -> u64 {
        (**self).current_tick()
    }
}

/// Wall-clock milliseconds since the Unix epoch.
///
/// Unlike a monotonic ticker this follows system time adjustments, which is
/// what lets the engine observe and refuse a clock that moved backwards.
#[derive(Clone, Copy, Debug, Default)]
pub struct WallClock;

impl TimeSource for WallClock {
    fn current_tick(&self) -> u64 {
        // Times before 1970 saturate to zero rather than wrapping.
        u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Local calendar time rendered as the twelve decimal digits `yyMMddHHmmss`.
///
/// `2017-04-24 19:12:30` becomes `170424191230`. One tick is one second.
#[derive(Clone, Copy, Debug, Default)]
pub struct DecimalClock;

impl DecimalClock {
    /// Renders any timestamp as a decimal tick.
    pub fn tick_of<Tz: chrono::TimeZone>(at: &DateTime<Tz>) -> u64
    where
        Tz::Offset: core::fmt::Display,
    {
        at.format("%y%m%d%H%M%S")
            .to_string()
            .parse()
            .unwrap_or_default()
    }
}

impl TimeSource for DecimalClock {
    fn current_tick(&self) -> u64 {
        Self::tick_of(&Local::now())
    }
}
