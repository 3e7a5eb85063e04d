//! Cross-file pattern aggregation
//!
//! Folds per-pair differences into ranked structural patterns. A pattern is
//! an equivalence class of differences sharing one normalized property path
//! (every concrete index collapsed to `[*]`). Patterns carry consistency
//! (the percentage of differing files they appear in), criticality, and a
//! majority-vote category.

use crate::categorize::categorize;
use crate::classify::classify_files;
use crate::error::CompareError;
use crate::rules::normalize_pattern_key;
use crate::types::{
    Category, ComparisonSettings, CoverageGroup, Difference, FilePairResult, PatternAnalysis,
    StructuralPattern,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Maximum example differences kept per pattern
const MAX_PATTERN_EXAMPLES: usize = 3;

/// Consistency threshold (percent) above which a pattern is critical
const CRITICAL_CONSISTENCY: f64 = 80.0;

/// Per-pattern accumulator
#[derive(Default)]
struct PatternAccumulator {
    affected_files: BTreeSet<String>,
    occurrences: usize,
    examples: Vec<Difference>,
    category_counts: BTreeMap<Category, usize>,
}

/// Aggregate all pair results into ranked structural patterns
///
/// `required_collections` holds the field names of collections declared
/// required by the model schema; missing elements of those collections mark
/// their pattern critical.
pub fn analyze_patterns(
    results: &[FilePairResult],
    settings: &ComparisonSettings,
    required_collections: &HashSet<String>,
) -> Result<PatternAnalysis, CompareError> {
    let total_files = results.len();
    let files_with_differences = results
        .iter()
        .filter(|r| !r.is_error() && !r.differences.is_empty())
        .count();
    let total_differences: usize = results
        .iter()
        .filter(|r| !r.is_error())
        .map(|r| r.differences.len())
        .sum();

    let mut accumulators: BTreeMap<String, PatternAccumulator> = BTreeMap::new();
    for result in results {
        if result.is_error() {
            continue;
        }
        for diff in &result.differences {
            let key = normalize_pattern_key(&diff.property_path);
            let acc = accumulators.entry(key).or_default();
            acc.affected_files.insert(result.file_a_name.clone());
            acc.occurrences += 1;
            if acc.examples.len() < MAX_PATTERN_EXAMPLES {
                acc.examples.push(diff.clone());
            }
            *acc.category_counts.entry(categorize(diff)).or_default() += 1;
        }
    }

    let mut all_patterns: Vec<StructuralPattern> = accumulators
        .into_iter()
        .map(|(pattern, acc)| {
            build_pattern(pattern, acc, files_with_differences, settings, required_collections)
        })
        .collect();

    // Rank: critical first, then occurrence count, then file count, then path
    all_patterns.sort_by(|a, b| {
        b.is_critical
            .cmp(&a.is_critical)
            .then_with(|| b.occurrence_count.cmp(&a.occurrence_count))
            .then_with(|| b.file_count.cmp(&a.file_count))
            .then_with(|| a.full_pattern.cmp(&b.full_pattern))
    });

    let critical_count = all_patterns.iter().filter(|p| p.is_critical).count();
    let file_classification = classify_files(results)?;

    Ok(PatternAnalysis {
        total_files,
        files_with_differences,
        total_differences,
        critical_count,
        all_patterns,
        file_classification,
    })
}

fn build_pattern(
    full_pattern: String,
    acc: PatternAccumulator,
    files_with_differences: usize,
    settings: &ComparisonSettings,
    required_collections: &HashSet<String>,
) -> StructuralPattern {
    let segments: Vec<&str> = full_pattern.split('.').collect();
    let parent_path = if segments.len() > 1 {
        segments[..segments.len() - 1].join(".")
    } else {
        String::new()
    };
    let terminal = {
        let last = segments.last().copied().unwrap_or("");
        match last.find('[') {
            Some(pos) => &last[..pos],
            None => last,
        }
    };

    let is_collection_element = full_pattern.contains('[');
    let collection_name = segments
        .iter()
        .rev()
        .find(|seg| seg.contains('['))
        .map(|seg| seg[..seg.find('[').unwrap()].to_string());

    let category = vote_category(&acc.category_counts);

    let file_count = acc.affected_files.len();
    let consistency = if files_with_differences > 0 {
        (file_count as f64 / files_with_differences as f64 * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    let missing_element = matches!(category, Category::ItemRemoved | Category::NullValueChange)
        && collection_name
            .as_deref()
            .map(|name| required_collections.contains(name))
            .unwrap_or(false);

    let is_critical = consistency >= CRITICAL_CONSISTENCY
        || settings.is_critical_property(terminal)
        || missing_element;

    let missing_property = match category {
        Category::NullValueChange | Category::ItemRemoved => Some(terminal.to_string()),
        _ => None,
    };

    let human_readable_description =
        describe_pattern(&full_pattern, terminal, category, file_count, acc.occurrences);
    let recommended_action = recommend_action(category, is_critical);

    StructuralPattern {
        full_pattern,
        parent_path,
        missing_property,
        category,
        is_collection_element,
        collection_name,
        file_count,
        occurrence_count: acc.occurrences,
        consistency,
        is_critical,
        affected_files: acc.affected_files.into_iter().collect(),
        examples: acc.examples,
        human_readable_description,
        recommended_action,
    }
}

/// Majority vote over the pattern's difference categories
///
/// Ties across several value-flavored categories collapse into
/// `GeneralValueChanged`; other ties break toward MISSING, then VALUE, then
/// ORDER.
fn vote_category(counts: &BTreeMap<Category, usize>) -> Category {
    let max = match counts.values().max() {
        Some(max) => *max,
        None => return Category::Uncategorized,
    };
    let mut tied: Vec<Category> = counts
        .iter()
        .filter(|(_, count)| **count == max)
        .map(|(category, _)| *category)
        .collect();
    if tied.len() == 1 {
        return tied[0];
    }
    if tied
        .iter()
        .all(|c| c.coverage_group() == CoverageGroup::Value)
    {
        return Category::GeneralValueChanged;
    }
    let group_rank = |c: &Category| match c.coverage_group() {
        CoverageGroup::Missing => 0u8,
        CoverageGroup::Value => 1,
        CoverageGroup::Order => 2,
        CoverageGroup::Uncategorized => 3,
    };
    tied.sort_by(|a, b| group_rank(a).cmp(&group_rank(b)).then(a.cmp(b)));
    tied[0]
}

fn describe_pattern(
    pattern: &str,
    terminal: &str,
    category: Category,
    file_count: usize,
    occurrences: usize,
) -> String {
    let what = match category {
        Category::NullValueChange => format!("Property '{}' is missing on one side", terminal),
        Category::ItemRemoved => format!("Elements disappear from '{}'", pattern),
        Category::ItemAdded => format!("Extra elements appear in '{}'", pattern),
        Category::NumericValueChanged => format!("Numeric value of '{}' drifts", pattern),
        Category::DatetimeChanged => format!("Timestamp '{}' differs", pattern),
        Category::BooleanValueChanged => format!("Flag '{}' flips", pattern),
        Category::CollectionItemChanged => {
            format!("Collection elements under '{}' change", pattern)
        }
        Category::GeneralValueChanged => format!("Value of '{}' drifts across files", pattern),
        Category::TextContentChanged | Category::ValueChanged => {
            format!("Value of '{}' changes", pattern)
        }
        Category::Uncategorized => format!("Unclassified change at '{}'", pattern),
    };
    format!(
        "{} ({} occurrences across {} files)",
        what, occurrences, file_count
    )
}

fn recommend_action(category: Category, is_critical: bool) -> String {
    let action = match category {
        Category::NullValueChange | Category::ItemRemoved => {
            "Verify the field is still populated upstream"
        }
        Category::ItemAdded => "Confirm the new elements are intentional",
        Category::NumericValueChanged => "Check calculation or rounding changes",
        Category::DatetimeChanged => {
            "Check time zone handling or clock-dependent generation"
        }
        Category::BooleanValueChanged => "Check flag defaults and feature toggles",
        Category::CollectionItemChanged => "Check collection ordering and pairing",
        Category::GeneralValueChanged
        | Category::TextContentChanged
        | Category::ValueChanged => "Inspect example differences for a common cause",
        Category::Uncategorized => "Inspect example differences manually",
    };
    if is_critical {
        format!("{} (critical - gate the release until explained)", action)
    } else {
        action.to_string()
    }
}

/// Sibling group of patterns sharing a path prefix
#[derive(Debug, Clone, PartialEq)]
pub struct PatternGroup {
    /// Shared prefix (a full pattern for singletons)
    pub prefix: String,
    /// Full patterns of the members, in rank order
    pub members: Vec<String>,
}

/// Group patterns for display: patterns sharing a common path prefix of at
/// least two segments become siblings under the longest such prefix.
///
/// Pure function of the pattern set; singletons form their own group.
pub fn group_display_patterns(patterns: &[StructuralPattern]) -> Vec<PatternGroup> {
    let prefixes_of = |pattern: &str| -> Vec<String> {
        let segments: Vec<&str> = pattern.split('.').collect();
        (2..=segments.len())
            .map(|k| segments[..k].join("."))
            .collect()
    };

    let mut prefix_counts: BTreeMap<String, usize> = BTreeMap::new();
    for p in patterns {
        for prefix in prefixes_of(&p.full_pattern) {
            *prefix_counts.entry(prefix).or_default() += 1;
        }
    }

    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for p in patterns {
        let shared = prefixes_of(&p.full_pattern)
            .into_iter()
            .rev()
            .find(|prefix| prefix_counts.get(prefix).copied().unwrap_or(0) >= 2);
        let key = shared.unwrap_or_else(|| p.full_pattern.clone());
        groups.entry(key).or_default().push(p.full_pattern.clone());
    }

    groups
        .into_iter()
        .map(|(prefix, members)| PatternGroup { prefix, members })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::summarize;
    use crate::types::{Difference, DifferenceKind};

    fn pair_with_diffs(name: &str, diffs: Vec<Difference>) -> FilePairResult {
        let summary = summarize(&diffs);
        FilePairResult {
            file_a_name: name.to_string(),
            file_b_name: name.to_string(),
            are_equal: diffs.is_empty(),
            differences: diffs,
            error: None,
            error_kind: None,
            http_status_a: None,
            http_status_b: None,
            pair_outcome: None,
            raw_text_diffs: None,
            summary,
        }
    }

    fn numeric_diff(path: &str) -> Difference {
        Difference {
            property_path: path.to_string(),
            expected_value: Some("1".to_string()),
            actual_value: Some("2".to_string()),
            parent_type: "Order".to_string(),
            kind_hint: None,
        }
    }

    fn analyze(results: &[FilePairResult]) -> PatternAnalysis {
        analyze_patterns(results, &ComparisonSettings::default(), &HashSet::new()).unwrap()
    }

    #[test]
    fn test_consistency_over_differing_files() {
        // 100 pairs, 80 of which differ at the same path
        let mut results = Vec::new();
        for i in 0..80 {
            results.push(pair_with_diffs(
                &format!("file{:03}", i),
                vec![numeric_diff("OrderData.Status")],
            ));
        }
        for i in 80..100 {
            results.push(pair_with_diffs(&format!("file{:03}", i), vec![]));
        }

        let analysis = analyze(&results);
        assert_eq!(analysis.total_files, 100);
        assert_eq!(analysis.files_with_differences, 80);

        let pattern = &analysis.all_patterns[0];
        assert_eq!(pattern.full_pattern, "OrderData.Status");
        assert_eq!(pattern.file_count, 80);
        // Denominator is differing files, not total files
        assert!((pattern.consistency - 100.0).abs() < f64::EPSILON);
        assert!(pattern.is_critical);
    }

    #[test]
    fn test_pattern_key_merges_indices() {
        let results = vec![
            pair_with_diffs("a", vec![numeric_diff("Results[0].Score")]),
            pair_with_diffs("b", vec![numeric_diff("Results[7].Score")]),
        ];
        let analysis = analyze(&results);
        assert_eq!(analysis.all_patterns.len(), 1);
        let pattern = &analysis.all_patterns[0];
        assert_eq!(pattern.full_pattern, "Results[*].Score");
        assert_eq!(pattern.file_count, 2);
        assert_eq!(pattern.occurrence_count, 2);
        assert!(pattern.is_collection_element);
        assert_eq!(pattern.collection_name.as_deref(), Some("Results"));
        assert_eq!(pattern.parent_path, "Results[*]");
    }

    #[test]
    fn test_file_count_never_exceeds_differing_files() {
        let results = vec![
            pair_with_diffs(
                "a",
                vec![numeric_diff("X.Y"), numeric_diff("X.Y"), numeric_diff("X.Y")],
            ),
            pair_with_diffs("b", vec![numeric_diff("X.Y")]),
        ];
        let analysis = analyze(&results);
        let pattern = &analysis.all_patterns[0];
        assert_eq!(pattern.occurrence_count, 4);
        assert_eq!(pattern.file_count, 2);
        assert!(pattern.file_count <= analysis.files_with_differences);
        assert!(pattern.consistency <= 100.0);
    }

    #[test]
    fn test_critical_property_name() {
        let results = vec![pair_with_diffs("a", vec![numeric_diff("Order.Amount")])];
        let analysis = analyze(&results);
        // Consistency is 100 here anyway, so probe the name rule directly
        // with a second non-critical path at the same consistency
        let results2 = vec![
            pair_with_diffs("a", vec![numeric_diff("Order.Comment")]),
            pair_with_diffs("b", vec![numeric_diff("Other.Path")]),
        ];
        let analysis2 = analyze(&results2);
        let comment = analysis2
            .all_patterns
            .iter()
            .find(|p| p.full_pattern == "Order.Comment")
            .unwrap();
        assert!(!comment.is_critical); // 50% consistency, non-critical name

        let amount = &analysis.all_patterns[0];
        assert!(amount.is_critical);
    }

    #[test]
    fn test_required_collection_missing_element_is_critical() {
        let removed = Difference {
            property_path: "Lines[2]".to_string(),
            expected_value: Some("Line".to_string()),
            actual_value: None,
            parent_type: "Order".to_string(),
            kind_hint: Some(DifferenceKind::ItemRemoved),
        };
        let results = vec![
            pair_with_diffs("a", vec![removed]),
            pair_with_diffs("b", vec![numeric_diff("Other.Path")]),
            pair_with_diffs("c", vec![numeric_diff("Other.Path")]),
        ];

        let required: HashSet<String> = ["Lines".to_string()].into_iter().collect();
        let analysis =
            analyze_patterns(&results, &ComparisonSettings::default(), &required).unwrap();
        let pattern = analysis
            .all_patterns
            .iter()
            .find(|p| p.full_pattern == "Lines[*]")
            .unwrap();
        // 33% consistency and a non-critical name, but the collection is required
        assert!(pattern.is_critical);
        assert_eq!(pattern.missing_property.as_deref(), Some("Lines"));
    }

    #[test]
    fn test_ranking_order() {
        let mut results = Vec::new();
        // High-occurrence pattern in a minority of files (not critical)
        for i in 0..5 {
            results.push(pair_with_diffs(
                &format!("x{}", i),
                vec![
                    numeric_diff("Bulk.Field"),
                    numeric_diff("Bulk.Field"),
                    numeric_diff("Bulk.Field"),
                ],
            ));
        }
        // Enough other differing files to keep Bulk.Field under the
        // consistency threshold
        for i in 0..10 {
            results.push(pair_with_diffs(&format!("n{}", i), vec![numeric_diff("Noise.N")]));
        }
        // Low-occurrence critical pattern (critical name)
        results.push(pair_with_diffs("y", vec![numeric_diff("Order.Id")]));

        let analysis = analyze(&results);
        assert!(analysis.all_patterns[0].is_critical);
        assert_eq!(analysis.all_patterns[0].full_pattern, "Order.Id");

        let bulk = analysis
            .all_patterns
            .iter()
            .find(|p| p.full_pattern == "Bulk.Field")
            .unwrap();
        assert!(!bulk.is_critical);
        // Among the non-critical patterns, occurrences rank first
        let bulk_pos = analysis
            .all_patterns
            .iter()
            .position(|p| p.full_pattern == "Bulk.Field")
            .unwrap();
        let noise_pos = analysis
            .all_patterns
            .iter()
            .position(|p| p.full_pattern == "Noise.N")
            .unwrap();
        assert!(bulk_pos < noise_pos);
    }

    #[test]
    fn test_tied_value_categories_become_general_drift() {
        let text = Difference {
            property_path: "Field".to_string(),
            expected_value: Some("red".to_string()),
            actual_value: Some("blue".to_string()),
            parent_type: "T".to_string(),
            kind_hint: None,
        };
        let results = vec![
            pair_with_diffs("a", vec![numeric_diff("Field")]),
            pair_with_diffs("b", vec![text]),
        ];
        let analysis = analyze(&results);
        assert_eq!(
            analysis.all_patterns[0].category,
            Category::GeneralValueChanged
        );
    }

    #[test]
    fn test_errored_pairs_do_not_contribute() {
        let error_pair = FilePairResult::from_error(
            "bad".to_string(),
            "bad".to_string(),
            &CompareError::Parse("broken".to_string()),
        );
        let results = vec![
            pair_with_diffs("a", vec![numeric_diff("X.Y")]),
            error_pair,
        ];
        let analysis = analyze(&results);
        assert_eq!(analysis.total_files, 2);
        assert_eq!(analysis.files_with_differences, 1);
        assert_eq!(analysis.all_patterns[0].file_count, 1);
    }

    #[test]
    fn test_display_grouping() {
        let results = vec![
            pair_with_diffs("a", vec![numeric_diff("Order.Customer.Name")]),
            pair_with_diffs("b", vec![numeric_diff("Order.Customer.City")]),
            pair_with_diffs("c", vec![numeric_diff("Standalone")]),
        ];
        let analysis = analyze(&results);
        let groups = group_display_patterns(&analysis.all_patterns);

        let customer_group = groups
            .iter()
            .find(|g| g.prefix == "Order.Customer")
            .expect("sibling group missing");
        assert_eq!(customer_group.members.len(), 2);

        let singleton = groups.iter().find(|g| g.prefix == "Standalone").unwrap();
        assert_eq!(singleton.members, vec!["Standalone".to_string()]);
    }
}
