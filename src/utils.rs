use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use crate::error::DurationError;

/// Tracks detector counts, with both an *all-time* total and a
/// *sliding window* rate.
#[derive(Debug, Clone)]
pub struct CountRate {
    /// All-time number of counts
    pub total: i64,
    /// Number of spectra or list-mode buffers read
    pub n_reads: usize,
    /// Time when this counter was created or last reset
    pub t_begin: Instant,

    window: Duration,
    reads: VecDeque<(Instant, i64)>,
    counts_in_window: i64,
}

impl Default for CountRate {
    fn default() -> Self {
        Self::with_window(Duration::from_secs(5))
    }
}

impl CountRate {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_window(window: Duration) -> Self {
        CountRate {
            total: 0,
            n_reads: 0,
            t_begin: Instant::now(),
            window,
            reads: VecDeque::new(),
            counts_in_window: 0,
        }
    }

    /// Counts per second since t_begin.
    pub fn average_rate(&self) -> f64 {
        let secs = self.t_begin.elapsed().as_secs_f64().max(1e-6);
        self.total as f64 / secs
    }

    /// Counts per second over the sliding window.
    pub fn rate(&self) -> f64 {
        let secs = self.window.as_secs_f64().max(1e-6);
        self.counts_in_window as f64 / secs
    }

    /// Record `counts` new counts from one read.
    pub fn increment(&mut self, counts: i64) {
        self.increment_at(Instant::now(), counts);
    }

    fn increment_at(&mut self, now: Instant, counts: i64) {
        self.total += counts;
        self.n_reads += 1;

        self.reads.push_back((now, counts));
        self.counts_in_window += counts;

        while let Some(&(ts, n)) = self.reads.front() {
            if now.duration_since(ts) > self.window {
                self.reads.pop_front();
                self.counts_in_window -= n;
            } else {
                break;
            }
        }
    }

    pub fn reset(&mut self) {
        self.total = 0;
        self.n_reads = 0;
        self.t_begin = Instant::now();

        self.reads.clear();
        self.counts_in_window = 0;
    }
}

/// Parses times like `250ms`, `1.5`, `10m` or `2d`. A bare number is seconds,
/// a year is 365 days.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(DurationError::Empty);
    }
    let (number, unit) = match input.find(|c: char| c.is_ascii_alphabetic()) {
        Some(i) => input.split_at(i),
        None => (input, "s"),
    };
    let seconds_per_unit = match unit {
        "ms" => 1e-3,
        "s" => 1.0,
        "m" => 60.0,
        "h" => 3600.0,
        "d" => 86_400.0,
        "y" => 365.0 * 86_400.0,
        other => return Err(DurationError::Unit(other.to_string())),
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| DurationError::Number(number.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(DurationError::Number(number.to_string()));
    }
    Duration::try_from_secs_f64(value * seconds_per_unit)
        .map_err(|_| DurationError::Number(number.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("250ms", Duration::from_millis(250))]
    #[case("2", Duration::from_secs(2))]
    #[case("1.5s", Duration::from_millis(1500))]
    #[case("10m", Duration::from_secs(600))]
    #[case("1h", Duration::from_secs(3600))]
    #[case("2d", Duration::from_secs(172_800))]
    #[case("1y", Duration::from_secs(31_536_000))]
    #[case(" 3 ", Duration::from_secs(3))]
    fn durations(#[case] input: &str, #[case] expect: Duration) {
        assert_eq!(expect, parse_duration(input).unwrap());
    }

    #[rstest]
    #[case("")]
    #[case("fast")]
    #[case("-1s")]
    #[case("3w")]
    #[case("1.2.3")]
    fn bad_durations(#[case] input: &str) {
        assert!(parse_duration(input).is_err());
    }

    #[test]
    fn window_forgets_old_reads() {
        let mut c = CountRate::with_window(Duration::from_secs(1));
        let t0 = Instant::now();
        c.increment_at(t0, 100);
        c.increment_at(t0 + Duration::from_millis(500), 50);
        assert_eq!(150.0, c.rate());
        c.increment_at(t0 + Duration::from_millis(1200), 10);
        assert_eq!(60.0, c.rate());
        assert_eq!(160, c.total);
        assert_eq!(3, c.n_reads);

        assert!(c.average_rate() > 0.0);

        c.reset();
        assert_eq!(0.0, c.rate());
        assert_eq!(0.0, CountRate::new().average_rate());
    }
}
