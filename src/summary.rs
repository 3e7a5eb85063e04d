//! Per-pair difference summarization
//!
//! Builds a [`DifferenceSummary`] from one pair's flat difference list:
//! grouping by category and by root object, and merging repeated
//! same-path differences into pattern exemplars.

use crate::categorize::categorize;
use crate::rules::normalize_pattern_key;
use crate::types::{Difference, DifferenceSummary, PatternExemplar};
use std::collections::BTreeMap;

/// Maximum example differences kept per exemplar
const MAX_EXEMPLAR_EXAMPLES: usize = 3;

/// Extract the root object for a difference path
///
/// The root object is the longest property-path prefix ending at a named
/// object (never a collection index): the path minus its terminal segment,
/// with any index suffix stripped. A top-level difference roots at its own
/// property name.
pub fn root_object(path: &str) -> String {
    let segments: Vec<&str> = path.split('.').collect();
    let strip_index = |seg: &str| match seg.find('[') {
        Some(pos) => seg[..pos].to_string(),
        None => seg.to_string(),
    };

    if segments.len() < 2 {
        return strip_index(segments.first().unwrap_or(&""));
    }
    let parent = &segments[..segments.len() - 1];
    let mut out = String::new();
    for (i, seg) in parent.iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        if i == parent.len() - 1 {
            out.push_str(&strip_index(seg));
        } else {
            out.push_str(seg);
        }
    }
    out
}

/// Build the per-pair summary from a flat difference list
pub fn summarize(differences: &[Difference]) -> DifferenceSummary {
    let mut by_category: BTreeMap<_, Vec<Difference>> = BTreeMap::new();
    let mut by_root_object: BTreeMap<String, Vec<Difference>> = BTreeMap::new();
    let mut by_pattern: BTreeMap<String, Vec<&Difference>> = BTreeMap::new();

    for diff in differences {
        by_category
            .entry(categorize(diff))
            .or_default()
            .push(diff.clone());
        by_root_object
            .entry(root_object(&diff.property_path))
            .or_default()
            .push(diff.clone());
        by_pattern
            .entry(normalize_pattern_key(&diff.property_path))
            .or_default()
            .push(diff);
    }

    // Two or more differences sharing a normalized path merge into one
    // exemplar; singletons are not patterns
    let mut common_patterns: Vec<PatternExemplar> = by_pattern
        .into_iter()
        .filter(|(_, group)| group.len() >= 2)
        .map(|(pattern, group)| PatternExemplar {
            pattern,
            count: group.len(),
            examples: group
                .iter()
                .take(MAX_EXEMPLAR_EXAMPLES)
                .map(|d| (*d).clone())
                .collect(),
        })
        .collect();
    common_patterns.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.pattern.cmp(&b.pattern)));

    DifferenceSummary {
        are_equal: differences.is_empty(),
        total_count: differences.len(),
        by_category,
        by_root_object,
        common_patterns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;

    fn diff(path: &str, expected: &str, actual: &str) -> Difference {
        Difference {
            property_path: path.to_string(),
            expected_value: Some(expected.to_string()),
            actual_value: Some(actual.to_string()),
            parent_type: "Test".to_string(),
            kind_hint: None,
        }
    }

    #[test]
    fn test_root_object() {
        assert_eq!(root_object("Metadata.Region"), "Metadata");
        assert_eq!(root_object("Order.Customer.Address.City"), "Order.Customer.Address");
        assert_eq!(root_object("Results[2].Score"), "Results");
        assert_eq!(root_object("Status"), "Status");
        assert_eq!(root_object("Results[2]"), "Results");
    }

    #[test]
    fn test_empty_summary_is_equal() {
        let summary = summarize(&[]);
        assert!(summary.are_equal);
        assert_eq!(summary.total_count, 0);
        assert!(summary.by_category.is_empty());
        assert!(summary.common_patterns.is_empty());
    }

    #[test]
    fn test_grouping_by_category_and_root() {
        let diffs = vec![
            diff("Metadata.Region", "EU", "US"),
            diff("Results[0].Score", "1.0", "2.0"),
            diff("Results[1].Score", "3.0", "4.0"),
        ];
        let summary = summarize(&diffs);

        assert_eq!(summary.total_count, 3);
        assert!(!summary.are_equal);
        assert_eq!(summary.by_category[&Category::ValueChanged].len(), 1);
        assert_eq!(summary.by_category[&Category::NumericValueChanged].len(), 2);
        assert_eq!(summary.by_root_object["Metadata"].len(), 1);
        assert_eq!(summary.by_root_object["Results"].len(), 2);
    }

    #[test]
    fn test_total_count_matches_difference_sum() {
        let diffs = vec![
            diff("A", "1", "2"),
            diff("B", "x", "y"),
            diff("C[0].D", "p", "q"),
        ];
        let summary = summarize(&diffs);
        let category_total: usize = summary.by_category.values().map(|v| v.len()).sum();
        assert_eq!(summary.total_count, category_total);
    }

    #[test]
    fn test_same_path_patterns_merge() {
        let diffs = vec![
            diff("Results[0].Score", "1", "2"),
            diff("Results[1].Score", "3", "4"),
            diff("Results[5].Score", "5", "6"),
            diff("Metadata.Region", "EU", "US"),
        ];
        let summary = summarize(&diffs);

        assert_eq!(summary.common_patterns.len(), 1);
        let exemplar = &summary.common_patterns[0];
        assert_eq!(exemplar.pattern, "Results[*].Score");
        assert_eq!(exemplar.count, 3);
        assert_eq!(exemplar.examples.len(), 3);
    }

    #[test]
    fn test_examples_capped_at_three() {
        let diffs: Vec<Difference> = (0..10)
            .map(|i| diff(&format!("Results[{}].Score", i), "1", "2"))
            .collect();
        let summary = summarize(&diffs);
        assert_eq!(summary.common_patterns[0].count, 10);
        assert_eq!(summary.common_patterns[0].examples.len(), 3);
    }
}
