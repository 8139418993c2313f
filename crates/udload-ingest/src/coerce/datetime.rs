//! Datetime columns in mixed layouts
//!
//! The dominant layout is chosen from a sample of the column, applied to
//! every value, and whatever it misses gets one more chance against every
//! known layout plus RFC 3339.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};

/// Non-empty values inspected when choosing the dominant layout
pub const SAMPLE_LIMIT: usize = 100;

/// Canonical rendering of a parsed value
pub const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy)]
struct Layout {
    pattern: &'static str,
    with_time: bool,
}

const fn date(pattern: &'static str) -> Layout {
    Layout {
        pattern,
        with_time: false,
    }
}

const fn date_time(pattern: &'static str) -> Layout {
    Layout {
        pattern,
        with_time: true,
    }
}

/// Known layouts, highest priority first
const LAYOUTS: &[Layout] = &[
    // ISO 8601
    date_time("%Y-%m-%d %H:%M:%S"),
    date_time("%Y-%m-%d %H:%M"),
    date("%Y-%m-%d"),
    // Regional numeric
    date_time("%Y/%m/%d %H:%M:%S"),
    date_time("%Y/%m/%d %H:%M"),
    date("%Y/%m/%d"),
    date_time("%Y%m%d%H%M%S"),
    date("%Y%m%d"),
    date("%Y.%m.%d"),
    date_time("%m/%d/%Y %H:%M:%S"),
    date_time("%m/%d/%Y %H:%M"),
    date("%m/%d/%Y"),
    date_time("%d/%m/%Y %H:%M:%S"),
    date("%d/%m/%Y"),
    // Localized textual
    date_time("%Y年%m月%d日 %H:%M:%S"),
    date_time("%Y年%m月%d日 %H时%M分%S秒"),
    date("%Y年%m月%d日"),
    date("%d-%b-%Y"),
    date("%d %b %Y"),
    date("%b %d, %Y"),
    date("%d %B %Y"),
    date("%B %d, %Y"),
];

/// Layouts tried only in the permissive pass
const PERMISSIVE_EXTRA: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
];

fn parse_with(layout: &Layout, value: &str) -> Option<NaiveDateTime> {
    if layout.with_time {
        NaiveDateTime::parse_from_str(value, layout.pattern).ok()
    } else {
        NaiveDate::parse_from_str(value, layout.pattern)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    }
}

fn parse_permissive(value: &str) -> Option<NaiveDateTime> {
    LAYOUTS
        .iter()
        .find_map(|layout| parse_with(layout, value))
        .or_else(|| {
            PERMISSIVE_EXTRA
                .iter()
                .find_map(|pattern| NaiveDateTime::parse_from_str(value, pattern).ok())
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.naive_local())
        })
}

/// Layouts matching the most sampled values; empty if none matched any
fn dominant_layouts<'a, I>(values: I) -> Vec<Layout>
where
    I: Iterator<Item = &'a str>,
{
    let mut counts = vec![0usize; LAYOUTS.len()];
    for value in values.take(SAMPLE_LIMIT) {
        for (index, layout) in LAYOUTS.iter().enumerate() {
            if parse_with(layout, value).is_some() {
                counts[index] += 1;
            }
        }
    }

    let best = counts.iter().copied().max().unwrap_or(0);
    if best == 0 {
        return Vec::new();
    }

    LAYOUTS
        .iter()
        .zip(&counts)
        .filter(|(_, count)| **count == best)
        .map(|(layout, _)| *layout)
        .collect()
}

/// Parse a column; blank and unparseable cells become `None`
pub fn coerce_datetimes(values: &[Option<String>]) -> Vec<Option<NaiveDateTime>> {
    let trimmed: Vec<Option<&str>> = values
        .iter()
        .map(|v| v.as_deref().map(str::trim).filter(|s| !s.is_empty()))
        .collect();

    let dominant = dominant_layouts(trimmed.iter().flatten().copied());

    trimmed
        .iter()
        .map(|value| {
            let value = (*value)?;
            dominant
                .iter()
                .find_map(|layout| parse_with(layout, value))
                .or_else(|| parse_permissive(value))
                .and_then(|dt| dt.with_nanosecond(0))
        })
        .collect()
}
