//! Time-series extraction
//!
//! Turns the runner's textual progress lines into structured samples,
//! derives throughput between consecutive samples and downsamples long
//! series for storage. Everything here is stateless.

use regex::Regex;
use std::sync::LazyLock;

use crate::domain::timeseries::{RawSample, TimeSeriesSample};

/// Default number of points kept when a series is stored
pub const DEFAULT_MAX_POINTS: usize = 100;

static PROGRESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"running \(([^)]+)\), (\d+)/(\d+) (?:workers|VUs), (\d+) complete").unwrap()
});

static DURATION_COMPONENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)(ms|h|m|s)").unwrap());

/// Parses one output line into a raw sample
///
/// Returns `None` for anything that is not a progress line, e.g.
/// `running (1m23.4s), 05/10 workers, 50 complete and 0 interrupted`.
pub fn parse_progress_line(line: &str) -> Option<RawSample> {
    let caps = PROGRESS_LINE.captures(line)?;

    let elapsed_seconds = parse_duration(&caps[1])?;
    let active_workers = caps[2].parse().ok()?;
    let completed = caps[4].parse().ok()?;

    Some(RawSample {
        elapsed_seconds,
        active_workers,
        completed,
    })
}

/// Parses a compound duration such as `1h02m03.5s` or `250ms` into seconds
///
/// The whole input must be made of duration components.
pub fn parse_duration(text: &str) -> Option<f64> {
    let text = text.trim();
    let mut total = 0.0;
    let mut consumed = 0;

    for caps in DURATION_COMPONENT.captures_iter(text) {
        let whole = caps.get(0)?;
        if whole.start() != consumed {
            return None;
        }
        consumed = whole.end();

        let value: f64 = caps[1].parse().ok()?;
        total += match &caps[2] {
            "h" => value * 3600.0,
            "m" => value * 60.0,
            "s" => value,
            "ms" => value / 1000.0,
            _ => return None,
        };
    }

    if consumed == 0 || consumed != text.len() {
        return None;
    }

    Some(total)
}

/// Derives per-sample throughput from consecutive raw samples
///
/// The first sample's rate is measured from the start of the run; later
/// ones from their predecessor. A non-positive time delta yields 0.
pub fn compute_throughput(raw: &[RawSample]) -> Vec<TimeSeriesSample> {
    let mut previous: Option<&RawSample> = None;

    raw.iter()
        .map(|sample| {
            let throughput = match previous {
                None if sample.elapsed_seconds > 0.0 => {
                    sample.completed as f64 / sample.elapsed_seconds
                }
                None => 0.0,
                Some(prev) => {
                    let dt = sample.elapsed_seconds - prev.elapsed_seconds;
                    if dt > 0.0 {
                        (sample.completed as f64 - prev.completed as f64) / dt
                    } else {
                        0.0
                    }
                }
            };
            previous = Some(sample);

            TimeSeriesSample {
                elapsed_seconds: sample.elapsed_seconds,
                active_workers: sample.active_workers,
                throughput,
            }
        })
        .collect()
}

/// Reduces a series to at most `max_points` evenly spaced samples
///
/// A trailing sample with zero throughput is an artifact of the run
/// finishing and is dropped before counting. First and last samples are
/// always kept.
pub fn downsample(mut samples: Vec<TimeSeriesSample>, max_points: usize) -> Vec<TimeSeriesSample> {
    if samples.last().is_some_and(|s| s.throughput == 0.0) {
        samples.pop();
    }

    let n = samples.len();
    if n <= max_points {
        return samples;
    }
    match max_points {
        0 => return Vec::new(),
        1 => return samples.split_off(n - 1),
        _ => {}
    }

    let span = max_points - 1;
    (0..max_points)
        .map(|i| {
            // Rounded position of point i on the original index range
            let idx = (2 * i * (n - 1) + span) / (2 * span);
            samples[idx]
        })
        .collect()
}

/// Full storage pipeline: throughput, then downsampling
pub fn snapshot(raw: &[RawSample], max_points: usize) -> Vec<TimeSeriesSample> {
    downsample(compute_throughput(raw), max_points)
}
