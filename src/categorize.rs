//! Difference categorization
//!
//! Assigns each difference exactly one semantic category using a
//! first-match-wins ladder: walk hints, then one-sided collection elements,
//! then value typing (numeric, date-time, boolean), then path shape, then
//! textual heuristics.
//!
//! The value parsers here are also used by the structural differ so that
//! "compares equal" and "categorizes as" always agree on what a value is.

use crate::types::{Category, Difference, DifferenceKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Strings at or under this length are eligible for the trailing-text check
const SHORT_STRING_LIMIT: usize = 32;

/// Parse a scalar rendering as a number
pub(crate) fn parse_numeric(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

/// Parse a scalar rendering as a boolean
pub(crate) fn parse_boolean(value: &str) -> Option<bool> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        Some(true)
    } else if trimmed.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Parse a scalar rendering as an absolute UTC instant
///
/// Accepts RFC 3339, `%Y-%m-%dT%H:%M:%S`, `%Y-%m-%d %H:%M:%S` (both with
/// optional fractional seconds), and bare dates. Naive timestamps are taken
/// as UTC.
pub(crate) fn parse_date_time(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

fn path_has_index(path: &str) -> bool {
    path.contains('[')
}

fn path_ends_with_index(path: &str) -> bool {
    let last = path.rsplit('.').next().unwrap_or(path);
    last.ends_with(']')
}

/// Short strings that differ only by appended/removed trailing text
fn is_trailing_text_change(expected: &str, actual: &str) -> bool {
    if expected == actual {
        return false;
    }
    if expected.len() > SHORT_STRING_LIMIT || actual.len() > SHORT_STRING_LIMIT {
        return false;
    }
    expected.starts_with(actual) || actual.starts_with(expected)
}

/// Assign the semantic category for one difference (first match wins)
pub fn categorize(diff: &Difference) -> Category {
    if let Some(hint) = diff.kind_hint {
        return match hint {
            DifferenceKind::NullDiff => Category::NullValueChange,
            DifferenceKind::ItemAdded => Category::ItemAdded,
            DifferenceKind::ItemRemoved => Category::ItemRemoved,
            DifferenceKind::IdentityMismatch => Category::CollectionItemChanged,
        };
    }

    let one_sided = diff.expected_value.is_some() != diff.actual_value.is_some();
    if one_sided && path_ends_with_index(&diff.property_path) {
        return if diff.expected_value.is_none() {
            Category::ItemAdded
        } else {
            Category::ItemRemoved
        };
    }

    match (&diff.expected_value, &diff.actual_value) {
        (Some(expected), Some(actual)) => {
            if parse_numeric(expected).is_some() && parse_numeric(actual).is_some() {
                return Category::NumericValueChanged;
            }
            if parse_date_time(expected).is_some() && parse_date_time(actual).is_some() {
                return Category::DatetimeChanged;
            }
            if parse_boolean(expected).is_some() && parse_boolean(actual).is_some() {
                return Category::BooleanValueChanged;
            }
            if path_has_index(&diff.property_path) {
                return Category::CollectionItemChanged;
            }
            if is_trailing_text_change(expected, actual) {
                return Category::TextContentChanged;
            }
            Category::ValueChanged
        }
        // One-sided without a walk hint: treated as missing data
        (Some(_), None) | (None, Some(_)) => Category::NullValueChange,
        (None, None) => Category::Uncategorized,
    }
}
