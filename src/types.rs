//! Core data types for StructCompare
//!
//! This module defines all the shared types used across the comparison
//! pipeline: per-difference records, per-pair results, cross-file pattern
//! types, the rules document DTO, and the per-run settings value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Semantic category assigned to every individual difference
///
/// Assignment is a first-match-wins ladder implemented in
/// [`crate::categorize::categorize`]. `GeneralValueChanged` is never produced
/// by the per-difference ladder; it is reserved for aggregated cross-file
/// value drift.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Category {
    /// String value changed (default for non-typed scalar drift)
    ValueChanged,
    /// Both sides parse as numbers and differ
    NumericValueChanged,
    /// Both sides parse as date-times and differ
    DatetimeChanged,
    /// Both sides are booleans and differ
    BooleanValueChanged,
    /// Short strings differing only in trailing text
    TextContentChanged,
    /// One side present, other side null/missing
    NullValueChange,
    /// Collection element present only in the actual document
    ItemAdded,
    /// Collection element present only in the expected document
    ItemRemoved,
    /// Change inside a collection element (positional pairing drift)
    CollectionItemChanged,
    /// Aggregated cross-file value drift (assigned by the pattern aggregator)
    GeneralValueChanged,
    /// Nothing else matched
    Uncategorized,
}

/// Coverage group a category contributes to during file classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoverageGroup {
    Value,
    Missing,
    Order,
    Uncategorized,
}

impl Category {
    /// Map a category onto its coverage group for file classification
    pub fn coverage_group(&self) -> CoverageGroup {
        match self {
            Category::NumericValueChanged
            | Category::DatetimeChanged
            | Category::BooleanValueChanged
            | Category::TextContentChanged
            | Category::ValueChanged
            | Category::GeneralValueChanged => CoverageGroup::Value,
            Category::NullValueChange | Category::ItemRemoved => CoverageGroup::Missing,
            Category::CollectionItemChanged | Category::ItemAdded => CoverageGroup::Order,
            Category::Uncategorized => CoverageGroup::Uncategorized,
        }
    }
}

/// Five-way partition of differing files used for coverage reports
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Category5 {
    /// All differences are value-level changes
    Value,
    /// All differences are missing data (nulls, removed items)
    Missing,
    /// All differences are ordering/collection membership changes
    Order,
    /// Differences span more than one of the above groups
    Mixed,
    /// Only uncategorized differences, or an unclassifiable mix
    Uncategorized,
}

impl Category5 {
    /// All buckets, in display order
    pub fn all() -> [Category5; 5] {
        [
            Category5::Value,
            Category5::Missing,
            Category5::Order,
            Category5::Mixed,
            Category5::Uncategorized,
        ]
    }
}

/// Hint attached by the tree walk before categorization
///
/// The walk knows things the categorizer cannot recover from the rendered
/// values alone: one-sided nulls, unmatched collection elements, identity
/// drift under positional pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DifferenceKind {
    /// One side is null/missing
    NullDiff,
    /// Element exists only in the actual document
    ItemAdded,
    /// Element exists only in the expected document
    ItemRemoved,
    /// Identity field (Id/Key/Name) differs between positionally paired items
    IdentityMismatch,
}

/// One leaf-level mismatch between the two documents of a pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Difference {
    /// Dotted runtime path, e.g. `Order.Results[2].Score`
    pub property_path: String,

    /// Rendered value from the expected (A) document, None if absent
    pub expected_value: Option<String>,

    /// Rendered value from the actual (B) document, None if absent
    pub actual_value: Option<String>,

    /// Declared type name of the enclosing object
    pub parent_type: String,

    /// Optional hint from the tree walk (see [`DifferenceKind`])
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind_hint: Option<DifferenceKind>,
}

impl Difference {
    /// Terminal property name of the path (without any index suffix)
    pub fn terminal_property(&self) -> &str {
        let last = self
            .property_path
            .rsplit('.')
            .next()
            .unwrap_or(&self.property_path);
        match last.find('[') {
            Some(pos) => &last[..pos],
            None => last,
        }
    }
}

/// Same-pair pattern: two or more differences sharing one normalized path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternExemplar {
    /// Property path with every concrete index collapsed to `[*]`
    pub pattern: String,
    /// Number of differences merged into this exemplar
    pub count: usize,
    /// Up to three representative differences
    pub examples: Vec<Difference>,
}

/// Per-pair summary built from the flat difference list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DifferenceSummary {
    /// True if the pair produced no differences
    pub are_equal: bool,
    /// Total number of differences
    pub total_count: usize,
    /// Differences grouped by semantic category
    pub by_category: BTreeMap<Category, Vec<Difference>>,
    /// Differences grouped by their root object path
    pub by_root_object: BTreeMap<String, Vec<Difference>>,
    /// Repeated same-path patterns within this pair
    pub common_patterns: Vec<PatternExemplar>,
}

/// HTTP-layer verdict for a request pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairOutcome {
    /// Both statuses in [200, 300)
    BothSuccess,
    /// Exactly one status in [200, 300)
    StatusCodeMismatch,
    /// Both statuses outside [200, 300)
    BothNonSuccess,
    /// A transport failure on either side (no statuses to compare)
    OneOrBothFailed,
}

impl PairOutcome {
    /// Classify a status pair; any missing status means a transport failure
    pub fn classify(status_a: Option<u16>, status_b: Option<u16>) -> PairOutcome {
        match (status_a, status_b) {
            (Some(a), Some(b)) => {
                let ok_a = (200..300).contains(&a);
                let ok_b = (200..300).contains(&b);
                match (ok_a, ok_b) {
                    (true, true) => PairOutcome::BothSuccess,
                    (false, false) => PairOutcome::BothNonSuccess,
                    _ => PairOutcome::StatusCodeMismatch,
                }
            }
            _ => PairOutcome::OneOrBothFailed,
        }
    }

    /// True if the pair is eligible for structural comparison
    pub fn is_success(&self) -> bool {
        matches!(self, PairOutcome::BothSuccess)
    }
}

/// Kind of a raw-text diff entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawDiffKind {
    /// Line present only in document A
    OnlyInA,
    /// Line present only in document B
    OnlyInB,
    /// Lines at the same position differ
    Modified,
}

/// One line-level entry from the raw-text fallback differ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTextDiff {
    pub kind: RawDiffKind,
    /// 1-based line number in the side(s) the entry refers to
    pub line_number: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_a: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_b: Option<String>,
}

/// Raw-text fallback comparison result (bounded on both axes)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTextComparison {
    /// Diff entries, capped at the configured maximum
    pub entries: Vec<RawTextDiff>,
    /// True if the entry list hit the cap
    pub entries_truncated: bool,
    /// True if either body exceeded the per-side read budget
    pub bodies_truncated: bool,
    /// Myers diff ratio over the (possibly truncated) line sets
    pub similarity_ratio: f64,
}

/// Result of comparing one pair of documents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePairResult {
    /// Name of the expected-side document (relative path)
    pub file_a_name: String,
    /// Name of the actual-side document (relative path)
    pub file_b_name: String,

    /// True iff the pair produced no differences and no error
    pub are_equal: bool,

    /// Flat list of leaf differences (empty on error)
    pub differences: Vec<Difference>,

    /// Per-pair error message, if comparison could not run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable error-kind label for aggregation (`parse`, `transport`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    /// HTTP status from endpoint A (request-replay runs only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status_a: Option<u16>,
    /// HTTP status from endpoint B (request-replay runs only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status_b: Option<u16>,

    /// HTTP-layer outcome; always set for non-error pairs in replay runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pair_outcome: Option<PairOutcome>,

    /// Raw-text diff for pairs not eligible for structural comparison
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text_diffs: Option<RawTextComparison>,

    /// Per-pair difference summary
    pub summary: DifferenceSummary,
}

impl FilePairResult {
    /// An equal pair with no differences
    pub fn equal(file_a: String, file_b: String) -> FilePairResult {
        FilePairResult {
            file_a_name: file_a,
            file_b_name: file_b,
            are_equal: true,
            differences: Vec::new(),
            error: None,
            error_kind: None,
            http_status_a: None,
            http_status_b: None,
            pair_outcome: None,
            raw_text_diffs: None,
            summary: DifferenceSummary {
                are_equal: true,
                ..DifferenceSummary::default()
            },
        }
    }

    /// A pair that failed before producing differences
    pub fn from_error(
        file_a: String,
        file_b: String,
        error: &crate::error::CompareError,
    ) -> FilePairResult {
        FilePairResult {
            file_a_name: file_a,
            file_b_name: file_b,
            are_equal: false,
            differences: Vec::new(),
            error: Some(error.to_string()),
            error_kind: Some(error.kind().to_string()),
            http_status_a: None,
            http_status_b: None,
            pair_outcome: None,
            raw_text_diffs: None,
            summary: DifferenceSummary::default(),
        }
    }

    /// True if this pair failed and contributes to error counts only
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// One cross-file structural pattern (an equivalence class of differences
/// sharing the same normalized property path)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuralPattern {
    /// Normalized path, every concrete index collapsed to `[*]`
    pub full_pattern: String,
    /// Pattern minus its terminal segment
    pub parent_path: String,
    /// Terminal property name, for missing-data patterns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_property: Option<String>,
    /// Majority-vote category across the pattern's differences
    pub category: Category,
    /// True if the pattern sits inside a collection element
    pub is_collection_element: bool,
    /// Name of the innermost collection, when inside one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
    /// Number of distinct files the pattern appears in
    pub file_count: usize,
    /// Total occurrences across all files
    pub occurrence_count: usize,
    /// `file_count / files_with_differences * 100`, clamped to [0, 100]
    pub consistency: f64,
    /// High-consistency, critical-name, or required-collection pattern
    pub is_critical: bool,
    /// Files (pair names) the pattern appears in, sorted
    pub affected_files: Vec<String>,
    /// Up to three representative differences
    pub examples: Vec<Difference>,
    /// One-line human-readable description
    pub human_readable_description: String,
    /// Suggested triage action
    pub recommended_action: String,
}

/// Partition of differing files into the five coverage buckets
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileClassification {
    /// Bucket -> sorted file names
    pub files_by_category: BTreeMap<Category5, Vec<String>>,
    /// Bucket -> file count
    pub counts: BTreeMap<Category5, usize>,
    /// True if every differing file landed in exactly one bucket
    pub is_complete: bool,
}

/// Cross-file aggregation output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternAnalysis {
    /// Total pairs examined (including equal and errored pairs)
    pub total_files: usize,
    /// Pairs that produced at least one difference
    pub files_with_differences: usize,
    /// Sum of difference counts across all pairs
    pub total_differences: usize,
    /// Number of critical patterns
    pub critical_count: usize,
    /// Ranked pattern list
    pub all_patterns: Vec<StructuralPattern>,
    /// Five-way file partition
    pub file_classification: FileClassification,
}

/// Top-level result of a folder or replay comparison run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiFolderComparisonResult {
    /// Number of pairs compared
    pub total_pairs: usize,
    /// True iff every non-error pair was equal and no pair errored
    pub all_equal: bool,
    /// Per-pair results, sorted byte-ordinal by `file_a_name`
    pub file_pair_results: Vec<FilePairResult>,
    /// Run metadata; always contains `job_id` and `execution_outcome_summary`
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// One request payload plus its per-request header overrides
#[derive(Debug, Clone)]
pub struct RequestPair {
    /// Path relative to the batch root (also the response file name)
    pub relative_path: String,
    /// Raw request body
    pub body_bytes: Vec<u8>,
    /// Content type sent with the request
    pub content_type: String,
    /// Headers from the `<request>.headers.json` sidecar (override globals)
    pub per_request_headers: BTreeMap<String, String>,
}

/// Outcome of executing one request against both endpoints
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub request: RequestPair,
    /// True if both sends completed (regardless of status code)
    pub ok: bool,
    pub status_a: Option<u16>,
    pub status_b: Option<u16>,
    /// On-disk path of the persisted endpoint-A response
    pub resp_path_a: Option<PathBuf>,
    /// On-disk path of the persisted endpoint-B response
    pub resp_path_b: Option<PathBuf>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl ExecutionResult {
    /// HTTP-layer outcome for this execution
    pub fn outcome(&self) -> PairOutcome {
        if !self.ok {
            return PairOutcome::OneOrBothFailed;
        }
        PairOutcome::classify(self.status_a, self.status_b)
    }
}

/// Kind of a smart ignore rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmartRuleKind {
    /// Ignore every property with this exact name
    PropertyName,
    /// Ignore every property whose name matches this glob
    NamePattern,
    /// Ignore every field of this declared type
    PropertyType,
    /// Compare this collection order-insensitively
    CollectionOrdering,
    /// Treat a missing collection and an empty collection as equal
    NullEmptyCollectionEquivalence,
}

/// One smart ignore rule from the rules document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartIgnoreRule {
    #[serde(rename = "type")]
    pub kind: SmartRuleKind,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// One path-based ignore rule from the rules document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDto {
    /// Dotted property path, segments optionally indexed
    pub path: String,
    /// Skip the whole subtree at this path
    #[serde(default)]
    pub ignore_completely: bool,
    /// Compare the collection at this path order-insensitively
    #[serde(default)]
    pub ignore_order: bool,
}

/// The rules document supplied per comparison run (JSON)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesDocument {
    #[serde(default)]
    pub ignore_collection_order: bool,
    #[serde(default)]
    pub ignore_string_case: bool,
    #[serde(default)]
    pub ignore_xml_namespaces: bool,
    #[serde(default)]
    pub rules: Vec<RuleDto>,
    #[serde(default)]
    pub smart_rules: Vec<SmartIgnoreRule>,
}

/// Default critical property names (terminal names that signal business
/// impact regardless of pattern consistency)
pub const DEFAULT_CRITICAL_PROPERTIES: &[&str] = &[
    "Id", "Status", "Code", "Amount", "Total", "Price", "Currency", "Key",
];

/// Per-run immutable settings compiled alongside the rules
///
/// There is no ambient or thread-local configuration: this value is passed
/// explicitly to every component that needs it.
#[derive(Debug, Clone)]
pub struct ComparisonSettings {
    /// Compare every collection order-insensitively
    pub ignore_collection_order: bool,
    /// Case-insensitive string comparison and path matching
    pub ignore_string_case: bool,
    /// Trim trailing whitespace before scalar string comparison
    pub trim_trailing_whitespace: bool,
    /// Strip namespace prefixes while reading XML
    pub ignore_xml_namespaces: bool,
    /// Depth bound when expanding a one-sided null object subtree
    pub max_null_subtree_depth: usize,
    /// Terminal property names that mark a pattern critical
    pub critical_properties: Vec<String>,
}

impl Default for ComparisonSettings {
    fn default() -> Self {
        Self {
            ignore_collection_order: false,
            ignore_string_case: false,
            trim_trailing_whitespace: true,
            ignore_xml_namespaces: false,
            max_null_subtree_depth: 3,
            critical_properties: DEFAULT_CRITICAL_PROPERTIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ComparisonSettings {
    /// Build settings from a rules document, keeping defaults for everything
    /// the document does not cover
    pub fn from_document(doc: &RulesDocument) -> Self {
        Self {
            ignore_collection_order: doc.ignore_collection_order,
            ignore_string_case: doc.ignore_string_case,
            ignore_xml_namespaces: doc.ignore_xml_namespaces,
            ..Self::default()
        }
    }

    /// True if `name` is one of the configured critical property names
    pub fn is_critical_property(&self, name: &str) -> bool {
        self.critical_properties
            .iter()
            .any(|p| p.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_outcome_classification() {
        assert_eq!(
            PairOutcome::classify(Some(200), Some(201)),
            PairOutcome::BothSuccess
        );
        assert_eq!(
            PairOutcome::classify(Some(200), Some(500)),
            PairOutcome::StatusCodeMismatch
        );
        assert_eq!(
            PairOutcome::classify(Some(404), Some(500)),
            PairOutcome::BothNonSuccess
        );
        assert_eq!(
            PairOutcome::classify(Some(200), None),
            PairOutcome::OneOrBothFailed
        );
        assert_eq!(
            PairOutcome::classify(None, None),
            PairOutcome::OneOrBothFailed
        );
    }

    #[test]
    fn test_status_300_is_not_success() {
        assert_eq!(
            PairOutcome::classify(Some(300), Some(200)),
            PairOutcome::StatusCodeMismatch
        );
    }

    #[test]
    fn test_terminal_property_strips_index() {
        let d = Difference {
            property_path: "Order.Results[3].Score".to_string(),
            expected_value: Some("1".to_string()),
            actual_value: Some("2".to_string()),
            parent_type: "Result".to_string(),
            kind_hint: None,
        };
        assert_eq!(d.terminal_property(), "Score");

        let d2 = Difference {
            property_path: "Results[3]".to_string(),
            expected_value: None,
            actual_value: Some("Result".to_string()),
            parent_type: "Order".to_string(),
            kind_hint: Some(DifferenceKind::ItemAdded),
        };
        assert_eq!(d2.terminal_property(), "Results");
    }

    #[test]
    fn test_coverage_groups() {
        assert_eq!(
            Category::NumericValueChanged.coverage_group(),
            CoverageGroup::Value
        );
        assert_eq!(
            Category::ItemRemoved.coverage_group(),
            CoverageGroup::Missing
        );
        assert_eq!(Category::ItemAdded.coverage_group(), CoverageGroup::Order);
        assert_eq!(
            Category::Uncategorized.coverage_group(),
            CoverageGroup::Uncategorized
        );
    }

    #[test]
    fn test_rules_document_parsing() {
        let json = r#"{
            "ignore_collection_order": true,
            "rules": [
                {"path": "Metadata.Timestamp", "ignore_completely": true}
            ],
            "smart_rules": [
                {"type": "NamePattern", "value": "*Date*"},
                {"type": "CollectionOrdering", "value": "Results", "enabled": false}
            ]
        }"#;
        let doc: RulesDocument = serde_json::from_str(json).unwrap();
        assert!(doc.ignore_collection_order);
        assert!(!doc.ignore_string_case);
        assert_eq!(doc.rules.len(), 1);
        assert!(doc.rules[0].ignore_completely);
        assert!(!doc.rules[0].ignore_order);
        assert_eq!(doc.smart_rules[0].kind, SmartRuleKind::NamePattern);
        assert!(doc.smart_rules[0].enabled);
        assert!(!doc.smart_rules[1].enabled);
    }

    #[test]
    fn test_settings_from_document() {
        let doc = RulesDocument {
            ignore_string_case: true,
            ..RulesDocument::default()
        };
        let settings = ComparisonSettings::from_document(&doc);
        assert!(settings.ignore_string_case);
        assert!(!settings.ignore_collection_order);
        assert!(settings.is_critical_property("Id"));
        assert!(settings.is_critical_property("status"));
        assert!(!settings.is_critical_property("Comment"));
    }
}
