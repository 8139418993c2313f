//! Column coercion by declared type
//!
//! | Declared   | Result                                        |
//! |------------|-----------------------------------------------|
//! | `datetime` | `Timestamp`, dominant-layout detection        |
//! | `int`      | `Int`, percent scaled then rounded            |
//! | `float`    | `Float`, percent scaled                       |
//! | `text`     | `Text`, at most 65 535 characters             |
//! | `string`   | `Text`, `%` removed, at most 255 characters   |
//!
//! Blank and unparseable cells become `Null` for every type.

pub mod datetime;
pub mod numeric;

use chrono::NaiveDateTime;
use std::panic::{catch_unwind, AssertUnwindSafe};
use udload_common::types::DeclaredType;

pub const STRING_MAX_CHARS: usize = 255;
pub const TEXT_MAX_CHARS: usize = 65_535;

/// A coerced cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Timestamp(NaiveDateTime),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Text form used by the bulk-load file; `None` for null
    pub fn render(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Text(s) => Some(s.clone()),
            CellValue::Int(v) => Some(v.to_string()),
            CellValue::Float(v) => Some(v.to_string()),
            CellValue::Timestamp(dt) => Some(dt.format(datetime::CANONICAL_FORMAT).to_string()),
        }
    }
}

/// Outcome of coercing one column
#[derive(Debug, Clone, PartialEq)]
pub struct CoercedColumn {
    pub values: Vec<CellValue>,
    /// Conversion failed; see [`degrade`]
    pub degraded: bool,
}

/// Coerce a raw column to `declared`
///
/// If conversion panics the column comes back through [`degrade`] with
/// `degraded` set, so one bad column never takes down the file.
pub fn coerce_column(values: &[Option<String>], declared: DeclaredType) -> CoercedColumn {
    match catch_unwind(AssertUnwindSafe(|| convert(values, declared))) {
        Ok(values) => CoercedColumn {
            values,
            degraded: false,
        },
        Err(_) => CoercedColumn {
            values: degrade(values, declared),
            degraded: true,
        },
    }
}

/// Fallback cells for a column whose conversion failed
///
/// Text columns keep the raw text. A typed column cannot hold it, so its
/// cells are nulled rather than failing the whole file at load time.
pub fn degrade(values: &[Option<String>], declared: DeclaredType) -> Vec<CellValue> {
    if !declared.is_textual() {
        return vec![CellValue::Null; values.len()];
    }
    values
        .iter()
        .map(|v| v.clone().map_or(CellValue::Null, CellValue::Text))
        .collect()
}

fn convert(values: &[Option<String>], declared: DeclaredType) -> Vec<CellValue> {
    match declared {
        DeclaredType::Datetime => datetime::coerce_datetimes(values)
            .into_iter()
            .map(|v| v.map_or(CellValue::Null, CellValue::Timestamp))
            .collect(),
        DeclaredType::Int => map_present(values, |s| {
            numeric::parse_int(s).map_or(CellValue::Null, CellValue::Int)
        }),
        DeclaredType::Float => map_present(values, |s| {
            numeric::parse_number(s).map_or(CellValue::Null, CellValue::Float)
        }),
        DeclaredType::Text => map_present(values, |s| {
            CellValue::Text(truncate_chars(s, TEXT_MAX_CHARS))
        }),
        DeclaredType::String => map_present(values, |s| {
            let stripped = s.replace('%', "");
            if stripped.trim().is_empty() {
                CellValue::Null
            } else {
                CellValue::Text(truncate_chars(&stripped, STRING_MAX_CHARS))
            }
        }),
    }
}

fn map_present<F>(values: &[Option<String>], f: F) -> Vec<CellValue>
where
    F: Fn(&str) -> CellValue,
{
    values
        .iter()
        .map(|v| match v.as_deref() {
            Some(s) if !s.trim().is_empty() => f(s),
            _ => CellValue::Null,
        })
        .collect()
}

fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((cut, _)) => value[..cut].to_string(),
        None => value.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn raw(values: &[&str]) -> Vec<Option<String>> {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    #[test]
    fn test_percent_float_and_int() {
        let column = raw(&["95%"]);
        assert_eq!(
            coerce_column(&column, DeclaredType::Float).values,
            vec![CellValue::Float(0.95)]
        );
        assert_eq!(
            coerce_column(&column, DeclaredType::Int).values,
            vec![CellValue::Int(1)]
        );
    }

    #[test]
    fn test_empty_is_null_for_every_type() {
        let column = vec![Some(String::new()), None];
        for declared in [
            DeclaredType::String,
            DeclaredType::Text,
            DeclaredType::Int,
            DeclaredType::Float,
            DeclaredType::Datetime,
        ] {
            let coerced = coerce_column(&column, declared);
            assert!(!coerced.degraded);
            assert!(
                coerced.values.iter().all(CellValue::is_null),
                "{declared} produced a value for an empty cell"
            );
        }
    }

    #[test]
    fn test_genuine_zero_is_kept() {
        let column = raw(&["0", "", "0.0"]);
        assert_eq!(
            coerce_column(&column, DeclaredType::Int).values,
            vec![CellValue::Int(0), CellValue::Null, CellValue::Int(0)]
        );
        assert_eq!(
            coerce_column(&column, DeclaredType::Float).values,
            vec![CellValue::Float(0.0), CellValue::Null, CellValue::Float(0.0)]
        );
    }

    #[test]
    fn test_string_strips_percent_and_truncates() {
        let long = "区".repeat(300);
        let coerced = coerce_column(&raw(&["12%", &long, "%"]), DeclaredType::String);

        assert_eq!(coerced.values[0], CellValue::Text("12".to_string()));
        match &coerced.values[1] {
            CellValue::Text(s) => assert_eq!(s.chars().count(), STRING_MAX_CHARS),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(coerced.values[2], CellValue::Null);
    }

    #[test]
    fn test_text_truncates_at_limit() {
        let long = "a".repeat(TEXT_MAX_CHARS + 10);
        let coerced = coerce_column(&raw(&[&long, "50%"]), DeclaredType::Text);
        assert_eq!(coerced.values[0].render().unwrap().len(), TEXT_MAX_CHARS);
        assert_eq!(coerced.values[1], CellValue::Text("50%".to_string()));
    }

    #[test]
    fn test_degraded_typed_column_is_nulled() {
        let column = vec![Some("12,5".to_string()), None, Some("n/a".to_string())];

        assert_eq!(
            degrade(&column, DeclaredType::Float),
            vec![CellValue::Null, CellValue::Null, CellValue::Null]
        );
        assert_eq!(degrade(&column, DeclaredType::Datetime).len(), 3);
        assert_eq!(
            degrade(&column, DeclaredType::Text),
            vec![
                CellValue::Text("12,5".to_string()),
                CellValue::Null,
                CellValue::Text("n/a".to_string()),
            ]
        );
    }

    #[test]
    fn test_render() {
        let dt = NaiveDateTime::parse_from_str("2026-01-06 07:08:09", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(CellValue::Timestamp(dt).render().as_deref(), Some("2026-01-06 07:08:09"));
        assert_eq!(CellValue::Float(0.95).render().as_deref(), Some("0.95"));
        assert_eq!(CellValue::Int(-4).render().as_deref(), Some("-4"));
        assert_eq!(CellValue::Null.render(), None);
    }
}
