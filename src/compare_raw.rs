//! Raw-text fallback comparison
//!
//! Used for pairs that are not eligible for structural comparison: non-success
//! HTTP outcomes and documents no registered model can parse. Output is
//! bounded on both axes - at most 5 KiB read per side and at most 100 diff
//! entries per pair - so a badly broken endpoint cannot flood a report.
//!
//! The differ is a bounded-lookahead local LCS: at each position where lines
//! differ it looks ahead up to five lines on both sides, advances to the
//! nearest resynchronization point (emitting one-sided entries for skipped
//! lines), and falls back to a modified-pair entry when no nearby match
//! exists.

use crate::types::{RawDiffKind, RawTextComparison, RawTextDiff};
use anyhow::{Context, Result};
use log::warn;
use regex::Regex;
use similar::{Algorithm, TextDiff};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Maximum diff entries per pair
pub const MAX_RAW_DIFF_ENTRIES: usize = 100;

/// Maximum bytes read per side
pub const MAX_RAW_BYTES_PER_SIDE: usize = 5 * 1024;

/// Resynchronization lookahead in lines
const LOOKAHEAD: usize = 5;

/// Compare two raw bodies line by line
///
/// `status` carries the HTTP status pair when the caller has one; a status
/// mismatch becomes the first diff entry. `mask` optionally replaces matches
/// with `<IGNORED>` before comparison (timestamps, request ids and similar
/// noise).
pub fn compare_raw_text(
    body_a: &[u8],
    body_b: &[u8],
    status: Option<(u16, u16)>,
    mask: Option<&Regex>,
) -> RawTextComparison {
    let (text_a, truncated_a) = truncate_body(body_a);
    let (text_b, truncated_b) = truncate_body(body_b);

    let mut lines_a = split_lines(&text_a);
    let mut lines_b = split_lines(&text_b);
    if let Some(regex) = mask {
        lines_a = apply_mask(&lines_a, regex);
        lines_b = apply_mask(&lines_b, regex);
    }

    let mut entries: Vec<RawTextDiff> = Vec::new();
    let mut entries_truncated = false;

    if let Some((status_a, status_b)) = status {
        if status_a != status_b {
            entries.push(RawTextDiff {
                kind: RawDiffKind::Modified,
                line_number: 0,
                content_a: Some(format!("HTTP status {}", status_a)),
                content_b: Some(format!("HTTP status {}", status_b)),
            });
        }
    }

    let mut push = |entries: &mut Vec<RawTextDiff>, entry: RawTextDiff| -> bool {
        if entries.len() >= MAX_RAW_DIFF_ENTRIES {
            return false;
        }
        entries.push(entry);
        true
    };

    let mut i = 0usize;
    let mut j = 0usize;
    'outer: while i < lines_a.len() && j < lines_b.len() {
        if lines_a[i] == lines_b[j] {
            i += 1;
            j += 1;
            continue;
        }

        // Look for the nearest resynchronization point within the window
        let skip_a = (1..=LOOKAHEAD)
            .find(|k| i + k < lines_a.len() && lines_a[i + k] == lines_b[j]);
        let skip_b = (1..=LOOKAHEAD)
            .find(|l| j + l < lines_b.len() && lines_a[i] == lines_b[j + l]);

        match (skip_a, skip_b) {
            (Some(k), l) if l.map_or(true, |l| k <= l) => {
                for offset in 0..k {
                    let entry = RawTextDiff {
                        kind: RawDiffKind::OnlyInA,
                        line_number: i + offset + 1,
                        content_a: Some(lines_a[i + offset].clone()),
                        content_b: None,
                    };
                    if !push(&mut entries, entry) {
                        entries_truncated = true;
                        break 'outer;
                    }
                }
                i += k;
            }
            (_, Some(l)) => {
                for offset in 0..l {
                    let entry = RawTextDiff {
                        kind: RawDiffKind::OnlyInB,
                        line_number: j + offset + 1,
                        content_a: None,
                        content_b: Some(lines_b[j + offset].clone()),
                    };
                    if !push(&mut entries, entry) {
                        entries_truncated = true;
                        break 'outer;
                    }
                }
                j += l;
            }
            (None, None) => {
                let entry = RawTextDiff {
                    kind: RawDiffKind::Modified,
                    line_number: i + 1,
                    content_a: Some(lines_a[i].clone()),
                    content_b: Some(lines_b[j].clone()),
                };
                if !push(&mut entries, entry) {
                    entries_truncated = true;
                    break 'outer;
                }
                i += 1;
                j += 1;
            }
            (Some(_), None) => unreachable!(),
        }
    }

    if !entries_truncated {
        while i < lines_a.len() {
            let entry = RawTextDiff {
                kind: RawDiffKind::OnlyInA,
                line_number: i + 1,
                content_a: Some(lines_a[i].clone()),
                content_b: None,
            };
            if !push(&mut entries, entry) {
                entries_truncated = true;
                break;
            }
            i += 1;
        }
    }
    if !entries_truncated {
        while j < lines_b.len() {
            let entry = RawTextDiff {
                kind: RawDiffKind::OnlyInB,
                line_number: j + 1,
                content_a: None,
                content_b: Some(lines_b[j].clone()),
            };
            if !push(&mut entries, entry) {
                entries_truncated = true;
                break;
            }
            j += 1;
        }
    }

    // Myers ratio over the (possibly truncated) line sets
    let lines_a_refs: Vec<&str> = lines_a.iter().map(|s| s.as_str()).collect();
    let lines_b_refs: Vec<&str> = lines_b.iter().map(|s| s.as_str()).collect();
    let similarity_ratio = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_slices(&lines_a_refs, &lines_b_refs)
        .ratio() as f64;

    RawTextComparison {
        entries,
        entries_truncated,
        bodies_truncated: truncated_a || truncated_b,
        similarity_ratio,
    }
}

/// Compare two persisted response files, reading at most the per-side budget
pub fn compare_raw_files(
    path_a: &Path,
    path_b: &Path,
    status: Option<(u16, u16)>,
    mask: Option<&Regex>,
) -> Result<RawTextComparison> {
    let body_a = read_capped(path_a)?;
    let body_b = read_capped(path_b)?;
    Ok(compare_raw_text(&body_a, &body_b, status, mask))
}

fn read_capped(path: &Path) -> Result<Vec<u8>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut buffer = Vec::with_capacity(MAX_RAW_BYTES_PER_SIDE + 1);
    // One byte past the cap so truncation is detectable downstream
    file.take(MAX_RAW_BYTES_PER_SIDE as u64 + 1)
        .read_to_end(&mut buffer)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(buffer)
}

fn truncate_body(body: &[u8]) -> (String, bool) {
    if body.len() > MAX_RAW_BYTES_PER_SIDE {
        (
            String::from_utf8_lossy(&body[..MAX_RAW_BYTES_PER_SIDE]).into_owned(),
            true,
        )
    } else {
        (String::from_utf8_lossy(body).into_owned(), false)
    }
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines().map(|l| l.to_string()).collect()
}

fn apply_mask(lines: &[String], regex: &Regex) -> Vec<String> {
    lines
        .iter()
        .map(|line| regex.replace_all(line, "<IGNORED>").into_owned())
        .collect()
}

/// Compile a masking regex, logging a warning and masking nothing if invalid
///
/// Size limits bound compilation so a hostile pattern cannot explode.
pub fn compile_mask_regex(pattern: &str) -> Option<Regex> {
    use regex::RegexBuilder;

    match RegexBuilder::new(pattern)
        .size_limit(1_000_000)
        .dfa_size_limit(1_000_000)
        .build()
    {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("Invalid mask pattern '{}': {}", pattern, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_bodies() {
        let body = b"line1\nline2\nline3\n";
        let result = compare_raw_text(body, body, None, None);
        assert!(result.entries.is_empty());
        assert!(!result.entries_truncated);
        assert!(!result.bodies_truncated);
        assert!((result.similarity_ratio - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_modified_line() {
        let result = compare_raw_text(b"a\nb\nc\n", b"a\nX\nc\n", None, None);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].kind, RawDiffKind::Modified);
        assert_eq!(result.entries[0].line_number, 2);
        assert_eq!(result.entries[0].content_a.as_deref(), Some("b"));
        assert_eq!(result.entries[0].content_b.as_deref(), Some("X"));
    }

    #[test]
    fn test_inserted_lines_detected_by_lookahead() {
        let result = compare_raw_text(b"a\nb\nc\n", b"a\nX\nY\nb\nc\n", None, None);
        let only_b: Vec<_> = result
            .entries
            .iter()
            .filter(|e| e.kind == RawDiffKind::OnlyInB)
            .collect();
        assert_eq!(only_b.len(), 2);
        assert_eq!(only_b[0].content_b.as_deref(), Some("X"));
        assert_eq!(only_b[1].content_b.as_deref(), Some("Y"));
    }

    #[test]
    fn test_deleted_lines_detected_by_lookahead() {
        let result = compare_raw_text(b"a\nX\nb\nc\n", b"a\nb\nc\n", None, None);
        let only_a: Vec<_> = result
            .entries
            .iter()
            .filter(|e| e.kind == RawDiffKind::OnlyInA)
            .collect();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].content_a.as_deref(), Some("X"));
    }

    #[test]
    fn test_trailing_remainder() {
        let result = compare_raw_text(b"a\n", b"a\nb\nc\n", None, None);
        assert_eq!(result.entries.len(), 2);
        assert!(result
            .entries
            .iter()
            .all(|e| e.kind == RawDiffKind::OnlyInB));
    }

    #[test]
    fn test_entry_cap() {
        // Every line differs with no resynchronization point
        let body_a: String = (0..300).map(|i| format!("a{}\n", i)).collect();
        let body_b: String = (0..300).map(|i| format!("b{}\n", i)).collect();
        let result = compare_raw_text(body_a.as_bytes(), body_b.as_bytes(), None, None);
        assert_eq!(result.entries.len(), MAX_RAW_DIFF_ENTRIES);
        assert!(result.entries_truncated);
    }

    #[test]
    fn test_body_size_cap() {
        let big = vec![b'x'; MAX_RAW_BYTES_PER_SIDE + 100];
        let result = compare_raw_text(&big, b"x", None, None);
        assert!(result.bodies_truncated);
    }

    #[test]
    fn test_status_mismatch_is_first_entry() {
        let result = compare_raw_text(b"same\n", b"same\n", Some((200, 500)), None);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].kind, RawDiffKind::Modified);
        assert_eq!(result.entries[0].line_number, 0);
        assert_eq!(
            result.entries[0].content_a.as_deref(),
            Some("HTTP status 200")
        );
        assert_eq!(
            result.entries[0].content_b.as_deref(),
            Some("HTTP status 500")
        );
    }

    #[test]
    fn test_matching_status_adds_no_entry() {
        let result = compare_raw_text(b"same\n", b"same\n", Some((200, 200)), None);
        assert!(result.entries.is_empty());
    }

    #[test]
    fn test_mask_hides_noise() {
        let mask = compile_mask_regex(r"\d{4}-\d{2}-\d{2}T[\d:.]+Z").unwrap();
        let result = compare_raw_text(
            b"ts=2024-01-01T10:00:00Z ok\n",
            b"ts=2024-06-30T23:59:59Z ok\n",
            None,
            Some(&mask),
        );
        assert!(result.entries.is_empty());
    }

    #[test]
    fn test_invalid_mask_is_rejected() {
        assert!(compile_mask_regex("(unclosed").is_none());
    }
}
