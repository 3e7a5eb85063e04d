//! Rule engine and property-path matching
//!
//! Rules decide, for any property path encountered during a tree walk,
//! whether the subtree must be skipped entirely, whether a collection must be
//! compared order-insensitively, and whether a smart ignore rule applies.
//!
//! Before each run the rule set is compiled into:
//! - a trie keyed by normalized path segment, giving O(depth) lookups
//! - name/pattern/type predicates synthesized from the smart rules
//!
//! Compilation fails fast on malformed rule paths; a compiled rule set is
//! immutable and safe for concurrent reads.

use crate::error::CompareError;
use crate::types::{ComparisonSettings, RulesDocument, SmartRuleKind};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{HashMap, HashSet};

/// Index constraint carried by one rule path segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexMatch {
    /// No index written - matches the property itself and any element
    None,
    /// `[*]` - matches any concrete index
    Any,
    /// `[n]` - matches exactly that index
    At(usize),
    /// `[Order]` - matches any index and flags the collection order-insensitive
    Order,
}

impl IndexMatch {
    /// Does this constraint accept a runtime index?
    fn accepts(&self, runtime: Option<usize>) -> bool {
        match self {
            IndexMatch::None => true,
            IndexMatch::Any | IndexMatch::Order => runtime.is_some(),
            IndexMatch::At(n) => runtime == Some(*n),
        }
    }
}

/// One parsed segment of a rule path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub name: String,
    pub index: IndexMatch,
}

/// A parsed, validated rule path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyPath {
    pub segments: Vec<PathSegment>,
}

impl PropertyPath {
    /// Parse a dotted rule path with strict bracket validation
    ///
    /// Accepted per segment: `Name`, `Name[*]`, `Name[12]`, `Name[Order]`.
    /// Anything else fails compilation.
    pub fn parse(raw: &str) -> Result<PropertyPath, CompareError> {
        let bad = |message: &str| CompareError::RulePath {
            path: raw.to_string(),
            message: message.to_string(),
        };

        if raw.trim().is_empty() {
            return Err(bad("empty path"));
        }

        let mut segments = Vec::new();
        for part in raw.split('.') {
            if part.is_empty() {
                return Err(bad("empty segment"));
            }
            let (name, index) = match part.find('[') {
                None => {
                    if part.contains(']') {
                        return Err(bad("']' without matching '['"));
                    }
                    (part, IndexMatch::None)
                }
                Some(open) => {
                    if open == 0 {
                        return Err(bad("segment has no property name"));
                    }
                    if !part.ends_with(']') {
                        return Err(bad("unclosed '['"));
                    }
                    let name = &part[..open];
                    let inner = &part[open + 1..part.len() - 1];
                    if name.contains(']') || inner.contains('[') {
                        return Err(bad("nested or stray bracket"));
                    }
                    let index = match inner {
                        "*" => IndexMatch::Any,
                        "Order" => IndexMatch::Order,
                        _ => {
                            let n = inner.parse::<usize>().map_err(|_| {
                                bad("index must be '*', 'Order', or a non-negative integer")
                            })?;
                            IndexMatch::At(n)
                        }
                    };
                    (name, index)
                }
            };
            segments.push(PathSegment {
                name: name.to_string(),
                index,
            });
        }

        Ok(PropertyPath { segments })
    }

    /// Normalized form used for matching: concrete indices collapse to `[*]`
    pub fn normalized(&self) -> PropertyPath {
        PropertyPath {
            segments: self
                .segments
                .iter()
                .map(|s| PathSegment {
                    name: s.name.clone(),
                    index: match s.index {
                        IndexMatch::At(_) => IndexMatch::Any,
                        other => other,
                    },
                })
                .collect(),
        }
    }

    /// Render back to the dotted string form
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            out.push_str(&seg.name);
            match seg.index {
                IndexMatch::None => {}
                IndexMatch::Any => out.push_str("[*]"),
                IndexMatch::At(n) => out.push_str(&format!("[{}]", n)),
                IndexMatch::Order => out.push_str("[Order]"),
            }
        }
        out
    }
}

/// One segment of a concrete runtime path built during the tree walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSegment {
    pub name: String,
    pub index: Option<usize>,
}

impl RuntimeSegment {
    pub fn field(name: &str) -> RuntimeSegment {
        RuntimeSegment {
            name: name.to_string(),
            index: None,
        }
    }

    pub fn element(name: &str, index: usize) -> RuntimeSegment {
        RuntimeSegment {
            name: name.to_string(),
            index: Some(index),
        }
    }
}

/// Render a runtime path as the canonical dotted string
pub fn render_path(segments: &[RuntimeSegment]) -> String {
    let mut out = String::new();
    for (i, seg) in segments.iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        out.push_str(&seg.name);
        if let Some(idx) = seg.index {
            out.push_str(&format!("[{}]", idx));
        }
    }
    out
}

/// Collapse every concrete index in a rendered path to `[*]`
///
/// This is the pattern-key normalization used by the per-pair summarizer and
/// the cross-file aggregator.
pub fn normalize_pattern_key(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '[' {
            let mut digits_only = true;
            let mut inner = String::new();
            for c2 in chars.by_ref() {
                if c2 == ']' {
                    break;
                }
                if !c2.is_ascii_digit() {
                    digits_only = false;
                }
                inner.push(c2);
            }
            if digits_only && !inner.is_empty() {
                out.push_str("[*]");
            } else {
                out.push('[');
                out.push_str(&inner);
                out.push(']');
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Verdict for one runtime path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PathDecision {
    /// Skip this subtree entirely
    pub ignore: bool,
    /// Compare this collection order-insensitively
    pub ignore_order: bool,
    /// The smart rule kind that fired, if any
    pub smart_hit: Option<SmartRuleKind>,
}

/// Trie node: children keyed by normalized segment name, one branch per
/// distinct index constraint under that name
#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<String, Vec<(IndexMatch, TrieNode)>>,
    ignore_complete: bool,
    ignore_order: bool,
}

impl TrieNode {
    fn child_mut(&mut self, name: String, index: IndexMatch) -> &mut TrieNode {
        let branches = self.children.entry(name).or_default();
        if let Some(pos) = branches.iter().position(|(im, _)| *im == index) {
            return &mut branches[pos].1;
        }
        branches.push((index, TrieNode::default()));
        let last = branches.len() - 1;
        &mut branches[last].1
    }
}

/// A compiled, immutable rule set
///
/// Safe for concurrent reads; built once per run via [`CompiledRules::compile`].
#[derive(Debug)]
pub struct CompiledRules {
    root: TrieNode,
    case_insensitive: bool,
    global_ignore_order: bool,
    ignored_names: HashSet<String>,
    name_patterns: GlobSet,
    has_name_patterns: bool,
    ignored_types: HashSet<String>,
    order_insensitive_collections: HashSet<String>,
    null_empty_equivalent: bool,
}

impl CompiledRules {
    /// Compile a rules document against the per-run settings
    ///
    /// Fails fast on the first malformed rule path or glob.
    pub fn compile(
        doc: &RulesDocument,
        settings: &ComparisonSettings,
    ) -> Result<CompiledRules, CompareError> {
        let case_insensitive = settings.ignore_string_case;
        let norm = |name: &str| {
            if case_insensitive {
                name.to_lowercase()
            } else {
                name.to_string()
            }
        };

        let mut root = TrieNode::default();
        for rule in &doc.rules {
            let parsed = PropertyPath::parse(&rule.path)?;
            let mut node = &mut root;
            let last = parsed.segments.len() - 1;
            for (i, seg) in parsed.segments.iter().enumerate() {
                // [Order] flags the collection itself, which is queried
                // without an index, so the flag lands on the name branch.
                if seg.index == IndexMatch::Order {
                    node.child_mut(norm(&seg.name), IndexMatch::None)
                        .ignore_order = true;
                }
                node = node.child_mut(norm(&seg.name), seg.index);
                if i == last {
                    if rule.ignore_completely {
                        node.ignore_complete = true;
                    }
                    if rule.ignore_order {
                        node.ignore_order = true;
                    }
                }
            }
        }

        let mut ignored_names = HashSet::new();
        let mut ignored_types = HashSet::new();
        let mut order_insensitive_collections = HashSet::new();
        let mut null_empty_equivalent = false;
        let mut pattern_builder = GlobSetBuilder::new();
        let mut has_name_patterns = false;

        for smart in &doc.smart_rules {
            if !smart.enabled {
                continue;
            }
            match smart.kind {
                SmartRuleKind::PropertyName => {
                    ignored_names.insert(norm(&smart.value));
                }
                SmartRuleKind::NamePattern => {
                    let glob = Glob::new(&norm(&smart.value)).map_err(|e| {
                        CompareError::Input(format!(
                            "invalid name pattern '{}': {}",
                            smart.value, e
                        ))
                    })?;
                    pattern_builder.add(glob);
                    has_name_patterns = true;
                }
                SmartRuleKind::PropertyType => {
                    ignored_types.insert(norm(&smart.value));
                }
                SmartRuleKind::CollectionOrdering => {
                    order_insensitive_collections.insert(norm(&smart.value));
                }
                SmartRuleKind::NullEmptyCollectionEquivalence => {
                    null_empty_equivalent = true;
                }
            }
        }

        let name_patterns = pattern_builder
            .build()
            .map_err(|e| CompareError::Input(format!("invalid name pattern set: {}", e)))?;

        Ok(CompiledRules {
            root,
            case_insensitive,
            global_ignore_order: settings.ignore_collection_order,
            ignored_names,
            name_patterns,
            has_name_patterns,
            ignored_types,
            order_insensitive_collections,
            null_empty_equivalent,
        })
    }

    /// An empty rule set with default settings (useful in tests and for runs
    /// without a rules document)
    pub fn empty(settings: &ComparisonSettings) -> CompiledRules {
        // An empty document cannot fail compilation
        CompiledRules::compile(&RulesDocument::default(), settings)
            .expect("empty rules document always compiles")
    }

    fn norm(&self, name: &str) -> String {
        if self.case_insensitive {
            name.to_lowercase()
        } else {
            name.to_string()
        }
    }

    /// Whether a missing collection and an empty collection compare equal
    pub fn null_empty_equivalent(&self) -> bool {
        self.null_empty_equivalent
    }

    /// Evaluate one runtime path
    ///
    /// `declared_type` is the declared type name of the field at the path
    /// terminal, when the caller knows it (used by PropertyType smart rules).
    /// Prefix rules apply to every descendant: once a path rule with
    /// `ignore_completely` is crossed, the whole subtree is ignored.
    pub fn evaluate(
        &self,
        path: &[RuntimeSegment],
        declared_type: Option<&str>,
    ) -> PathDecision {
        let mut decision = PathDecision {
            ignore_order: self.global_ignore_order,
            ..PathDecision::default()
        };

        // Trie walk; active set is almost always a single node, but
        // distinct index constraints under one name can fork it.
        let mut active: Vec<&TrieNode> = vec![&self.root];
        for seg in path {
            let key = self.norm(&seg.name);
            let mut next: Vec<&TrieNode> = Vec::new();
            for node in &active {
                if let Some(branches) = node.children.get(&key) {
                    for (im, child) in branches {
                        if im.accepts(seg.index) {
                            if child.ignore_complete {
                                decision.ignore = true;
                                return decision;
                            }
                            next.push(child);
                        }
                    }
                }
            }
            if next.is_empty() {
                active.clear();
                break;
            }
            active = next;
        }
        if active.iter().any(|n| n.ignore_order) {
            decision.ignore_order = true;
        }

        // Smart rules fire on the terminal segment
        if let Some(terminal) = path.last() {
            let key = self.norm(&terminal.name);
            if self.ignored_names.contains(&key) {
                decision.ignore = true;
                decision.smart_hit = Some(SmartRuleKind::PropertyName);
                return decision;
            }
            if self.has_name_patterns && self.name_patterns.is_match(key.as_str()) {
                decision.ignore = true;
                decision.smart_hit = Some(SmartRuleKind::NamePattern);
                return decision;
            }
            if let Some(ty) = declared_type {
                if self.ignored_types.contains(&self.norm(ty)) {
                    decision.ignore = true;
                    decision.smart_hit = Some(SmartRuleKind::PropertyType);
                    return decision;
                }
            }
            if self.order_insensitive_collections.contains(&key) {
                decision.ignore_order = true;
                decision.smart_hit = Some(SmartRuleKind::CollectionOrdering);
            }
        }

        decision
    }
}
