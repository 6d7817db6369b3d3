use std::{ops::Range, str::FromStr};

use chrono::{DateTime, Duration, Utc};

use super::{MediaPlaylist, Segment};
use crate::error::{CatError, CatResult};

/// A `start`, `start+duration` or `start-end` time selection.
///
/// Times are Unix seconds. An absent start is the Unix epoch, an absent end
/// is unbounded. Parentheses are ignored, so `(100)+(30)` equals `100+30`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectExpr {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FromStr for SelectExpr {
    type Err = CatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let expr: String = s.chars().filter(|c| !matches!(c, '(' | ')')).collect();
        let invalid = || CatError::InvalidSelectExpression(s.to_string());

        let Some(op) = expr.find(['+', '-']) else {
            return Ok(Self {
                start: parse_unix(&expr).ok_or_else(invalid)?,
                end: DateTime::<Utc>::MAX_UTC,
            });
        };

        let (start, rest) = (expr[..op].trim(), expr[op + 1..].trim());
        let start = if start.is_empty() {
            DateTime::<Utc>::default()
        } else {
            parse_unix(start).ok_or_else(invalid)?
        };
        if rest.is_empty() {
            return Ok(Self {
                start,
                end: DateTime::<Utc>::MAX_UTC,
            });
        }

        let end = if expr.as_bytes()[op] == b'+' {
            let duration = parse_duration(rest).map_err(|_| invalid())?;
            start
                .checked_add_signed(duration)
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        } else {
            parse_unix(rest).ok_or_else(invalid)?
        };

        Ok(Self { start, end })
    }
}

fn parse_unix(s: &str) -> Option<DateTime<Utc>> {
    let secs = s.trim().parse::<i64>().ok()?;
    DateTime::from_timestamp(secs, 0)
}

/// Parses a duration.
///
/// A bare number is seconds. Otherwise the value is a sequence of decimal
/// numbers with a unit suffix each (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`),
/// such as `1h30m` or `1.5s`.
pub fn parse_duration(s: &str) -> CatResult<Duration> {
    let s = s.trim();
    let invalid = || CatError::InvalidSelectExpression(s.to_string());

    if let Ok(secs) = s.parse::<f64>() {
        return seconds(secs).ok_or_else(invalid);
    }

    let mut rest = s;
    let mut total = Duration::zero();
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        let value: f64 = rest[..number_end].parse().map_err(|_| invalid())?;
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_end..];

        total = total
            .checked_add(&Duration::nanoseconds((value * nanos_per_unit) as i64))
            .ok_or_else(invalid)?;
    }
    Ok(total)
}

fn seconds(secs: f64) -> Option<Duration> {
    let micros = secs * 1e6;
    micros
        .is_finite()
        .then(|| Duration::microseconds(micros as i64))
}

/// `time` moved forward by `secs`, saturating at the end of representable
/// time.
fn after(time: DateTime<Utc>, secs: f64) -> DateTime<Utc> {
    seconds(secs)
        .and_then(|duration| time.checked_add_signed(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Start time of every segment.
///
/// A segment starts at its explicit timestamp if it has one, otherwise where
/// the previous segment ends. The first segment without a timestamp starts
/// at the Unix epoch.
pub fn timeline(segments: &[Segment]) -> Vec<DateTime<Utc>> {
    let mut now = DateTime::<Utc>::default();
    let mut previous: Option<&Segment> = None;

    segments
        .iter()
        .map(|segment| {
            now = match (segment.time, previous) {
                (Some(time), _) => time,
                (None, Some(previous)) => after(now, previous.duration_or(0.0)),
                (None, None) => now,
            };
            previous = Some(segment);
            now
        })
        .collect()
}

/// Index range of the segments between `start` and `end`.
///
/// A segment is reached by a time once its midpoint is not before that time.
/// The range begins at the first segment reached by `start` and ends before
/// the first segment whose midpoint lies past `end`.
pub fn select_range(start: DateTime<Utc>, end: DateTime<Utc>, segments: &[Segment]) -> Range<usize> {
    let starts = timeline(segments);
    let midpoint = |i: usize| after(starts[i], segments[i].duration_or(0.0) / 2.0);

    let first = (0..segments.len())
        .find(|&i| midpoint(i) >= start)
        .unwrap_or(segments.len());
    let last = (first..segments.len())
        .find(|&i| midpoint(i) > end)
        .unwrap_or(segments.len());
    first..last
}

impl MediaPlaylist {
    /// Keeps only the segments selected by `expr`.
    pub fn select_time(&mut self, expr: &SelectExpr) {
        let range = select_range(expr.start, expr.end, &self.segments);
        tracing::info!(
            "selected segments {}..{} of {}",
            range.start,
            range.end,
            self.segments.len()
        );
        self.segments = self.segments.drain(range).collect();
    }
}
