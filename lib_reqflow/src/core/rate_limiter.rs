//! # Fixed-Delay Rate Limiter
//!
//! Translates a `(count, unit)` pair such as "30 per minute" into a minimum
//! inter-emission interval and lets a loop suspend for exactly that interval
//! between two iterations.
//!
//! The throttle is *fixed-delay*: the wait starts after an iteration's work is
//! done, so downstream processing time adds to the spacing between emissions.
//! Callers that need fixed-rate pacing have to compensate on their own side.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::error::{ConfigError, PipelineError};

/// # Time Unit
///
/// The unit a rate limit is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// 1 ns.
    Nanoseconds,
    /// 10^3 ns.
    Microseconds,
    /// 10^6 ns.
    Milliseconds,
    /// 10^9 ns.
    Seconds,
    /// 60 seconds.
    Minutes,
    /// 60 minutes.
    Hours,
    /// 24 hours.
    Days,
}

impl TimeUnit {
    /// Every supported unit, smallest first.
    pub const ALL: [TimeUnit; 7] = [
        TimeUnit::Nanoseconds,
        TimeUnit::Microseconds,
        TimeUnit::Milliseconds,
        TimeUnit::Seconds,
        TimeUnit::Minutes,
        TimeUnit::Hours,
        TimeUnit::Days,
    ];

    /// The length of one unit in nanoseconds. The largest value (one day) is
    /// far below `u64::MAX`, so no multiplication can overflow here.
    pub const fn as_nanos(self) -> u64 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Minutes => 60 * 1_000_000_000,
            TimeUnit::Hours => 3_600 * 1_000_000_000,
            TimeUnit::Days => 86_400 * 1_000_000_000,
        }
    }

    fn name(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "nanoseconds",
            TimeUnit::Microseconds => "microseconds",
            TimeUnit::Milliseconds => "milliseconds",
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TimeUnit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unit = match s.trim().to_ascii_lowercase().as_str() {
            "ns" | "nanosecond" | "nanoseconds" => TimeUnit::Nanoseconds,
            "us" | "µs" | "microsecond" | "microseconds" => TimeUnit::Microseconds,
            "ms" | "millisecond" | "milliseconds" => TimeUnit::Milliseconds,
            "s" | "sec" | "second" | "seconds" => TimeUnit::Seconds,
            "m" | "min" | "minute" | "minutes" => TimeUnit::Minutes,
            "h" | "hour" | "hours" => TimeUnit::Hours,
            "d" | "day" | "days" => TimeUnit::Days,
            other => {
                return Err(ConfigError::single(format!("unit: unrecognized time unit '{other}'")));
            }
        };
        Ok(unit)
    }
}

/// # Rate Specification
///
/// An immutable `(count, unit)` pair together with the interval it was
/// translated into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSpec {
    count: u64,
    unit: TimeUnit,
    interval_nanos: u64,
}

impl RateSpec {
    /// Builds a rate of `count` operations per `unit`.
    ///
    /// Fails when `count` is zero or when the resulting interval would be
    /// shorter than one nanosecond (more operations than the unit has
    /// nanoseconds).
    pub fn new(count: u64, unit: TimeUnit) -> Result<Self, ConfigError> {
        if count == 0 {
            return Err(ConfigError::single("limit: must be greater than zero"));
        }
        let interval_nanos = unit.as_nanos() / count;
        if interval_nanos == 0 {
            return Err(ConfigError::single(format!(
                "limit: {count} per {unit} exceeds the nanosecond resolution of the unit"
            )));
        }
        Ok(Self {
            count,
            unit,
            interval_nanos,
        })
    }

    /// Builds a rate from untyped configuration values.
    ///
    /// Negative counts and unknown unit names are rejected; every problem is
    /// reported under the given `field` prefix.
    pub fn parse(field: &str, count: i64, unit: &str) -> Result<Self, ConfigError> {
        let mut problems = Vec::new();
        if count <= 0 {
            problems.push(format!("{field}.limit: must be greater than zero (got {count})"));
        }
        let parsed_unit = match unit.parse::<TimeUnit>() {
            Ok(u) => Some(u),
            Err(e) => {
                problems.extend(e.problems.into_iter().map(|p| format!("{field}.{p}")));
                None
            }
        };

        match (u64::try_from(count), parsed_unit) {
            (Ok(count), Some(unit)) if problems.is_empty() => {
                RateSpec::new(count, unit).map_err(|e| ConfigError {
                    problems: e.problems.into_iter().map(|p| format!("{field}.{p}")).collect(),
                })
            }
            _ => Err(ConfigError { problems }),
        }
    }

    /// Number of operations allowed per unit.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// The unit the rate is expressed in.
    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Minimum spacing between two emissions, in nanoseconds.
    pub fn interval_nanos(&self) -> u64 {
        self.interval_nanos
    }

    /// Minimum spacing between two emissions.
    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval_nanos)
    }
}

impl fmt::Display for RateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} per {} ({:?} apart)", self.count, self.unit, self.interval())
    }
}

/// # Rate Limiter
///
/// Suspends the calling loop for the spec's interval. One limiter belongs to
/// exactly one loop.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    spec: RateSpec,
}

impl RateLimiter {
    /// Creates a limiter for `spec`.
    pub fn new(spec: RateSpec) -> Self {
        Self { spec }
    }

    /// The rate this limiter enforces.
    pub fn spec(&self) -> RateSpec {
        self.spec
    }

    /// Waits for one full interval, or returns `Cancelled` as soon as `cancel`
    /// fires.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            _ = tokio::time::sleep(self.spec.interval()) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_interval_for_common_rates() {
        let per_minute = RateSpec::new(30, TimeUnit::Minutes).unwrap();
        assert_eq!(per_minute.interval(), Duration::from_secs(2));

        let per_second = RateSpec::new(2, TimeUnit::Seconds).unwrap();
        assert_eq!(per_second.interval(), Duration::from_millis(500));

        let per_hour = RateSpec::new(7, TimeUnit::Hours).unwrap();
        assert_eq!(per_hour.interval_nanos(), 3_600_000_000_000 / 7);
    }

    #[test]
    fn test_one_per_nanosecond_is_the_floor() {
        let spec = RateSpec::new(1, TimeUnit::Nanoseconds).unwrap();
        assert_eq!(spec.interval_nanos(), 1);

        let err = RateSpec::new(2, TimeUnit::Nanoseconds).unwrap_err();
        assert!(err.mentions("nanosecond resolution"));
    }

    #[test]
    fn test_zero_count_is_rejected() {
        let err = RateSpec::new(0, TimeUnit::Seconds).unwrap_err();
        assert!(err.mentions("limit"));
    }

    #[test]
    fn test_parse_reports_every_problem() {
        let err = RateSpec::parse("dispatcher", -3, "fortnights").unwrap_err();
        assert_eq!(err.problems.len(), 2);
        assert!(err.mentions("dispatcher.limit"));
        assert!(err.mentions("dispatcher.unit"));
    }

    #[test]
    fn test_parse_accepts_unit_aliases() {
        let spec = RateSpec::parse("generator", 10, "SECONDS").unwrap();
        assert_eq!(spec.unit(), TimeUnit::Seconds);
        assert_eq!(RateSpec::parse("generator", 10, "ms").unwrap().unit(), TimeUnit::Milliseconds);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_sleeps_exactly_one_interval() {
        let limiter = RateLimiter::new(RateSpec::new(5, TimeUnit::Seconds).unwrap());
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();

        limiter.wait(&cancel).await.unwrap();

        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_wait_observes_cancellation() {
        let limiter = RateLimiter::new(RateSpec::new(1, TimeUnit::Hours).unwrap());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let res = tokio::time::timeout(Duration::from_secs(5), limiter.wait(&cancel)).await;

        assert!(matches!(res, Ok(Err(PipelineError::Cancelled))));
    }

    proptest! {
        #[test]
        fn prop_interval_is_integer_division(unit_idx in 0usize..7, raw in 1u64..u64::MAX) {
            let unit = TimeUnit::ALL[unit_idx];
            let count = raw % unit.as_nanos() + 1;
            let spec = RateSpec::new(count, unit).unwrap();
            prop_assert_eq!(spec.interval_nanos(), unit.as_nanos() / count);
            prop_assert!(spec.interval_nanos() >= 1);
        }

        #[test]
        fn prop_count_above_resolution_is_rejected(unit_idx in 0usize..7, extra in 1u64..1_000_000) {
            let unit = TimeUnit::ALL[unit_idx];
            prop_assert!(RateSpec::new(unit.as_nanos() + extra, unit).is_err());
        }
    }
}
