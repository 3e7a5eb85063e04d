//! Structural tree comparison
//!
//! Walks two typed trees simultaneously, driven by the declared schema rather
//! than the runtime values, so a field missing on one side is still visited.
//! Produces a flat list of leaf differences respecting the compiled rule set.
//!
//! Collections are compared positionally unless an order-insensitive rule
//! applies, in which case items are matched by a stable signature: identity
//! fields (`Id`/`Key`/`Name`) when present, a structural hash otherwise.
//! Matching is deterministic - signatures are visited in sorted order and
//! ties break by ascending index.

use crate::categorize::{parse_boolean, parse_date_time, parse_numeric};
use crate::model::{Node, ObjectNode, Scalar, Schema};
use crate::rules::{render_path, CompiledRules, RuntimeSegment};
use crate::types::{ComparisonSettings, Difference, DifferenceKind};
use std::collections::BTreeMap;

/// Hard bound on walk depth; deeper branches stop without emitting
///
/// Keeps output finite on pathologically nested documents.
const MAX_WALK_DEPTH: usize = 64;

/// Schema used when walking undeclared shapes
static DYNAMIC_SCHEMA: Schema = Schema::Dynamic;

/// Field names that identify a collection element across reorderings
const IDENTITY_FIELDS: &[&str] = &["Id", "Key", "Name"];

/// Which side of the pair a one-sided subtree exists on
#[derive(Clone, Copy, PartialEq)]
enum Side {
    A,
    B,
}

/// Compare two trees rooted at the same declared schema
pub fn compare_trees(
    a: &Node,
    b: &Node,
    schema: &Schema,
    rules: &CompiledRules,
    settings: &ComparisonSettings,
) -> Vec<Difference> {
    let mut walker = Walker {
        rules,
        settings,
        path: Vec::new(),
        diffs: Vec::new(),
    };
    walker.compare_nodes(a, b, schema, schema.type_name());
    walker.diffs
}

/// Canonical comparison key for a scalar
///
/// Numbers compare after parsing, booleans case-insensitively, date-times as
/// absolute UTC instants, and strings after the configured normalization.
/// Two scalars are equal iff their keys are equal, so collection multiset
/// matching and plain field comparison always agree.
fn scalar_key(scalar: &Scalar, settings: &ComparisonSettings) -> String {
    let raw = scalar.render();
    if let Some(n) = parse_numeric(&raw) {
        return format!("n:{}", n);
    }
    if let Some(b) = parse_boolean(&raw) {
        return format!("b:{}", b);
    }
    if let Some(dt) = parse_date_time(&raw) {
        return format!("d:{}", dt.timestamp_millis());
    }
    let mut s = raw;
    if settings.trim_trailing_whitespace {
        s = s.trim_end().to_string();
    }
    if settings.ignore_string_case {
        s = s.to_lowercase();
    }
    format!("s:{}", s)
}

fn scalars_equal(a: &Scalar, b: &Scalar, settings: &ComparisonSettings) -> bool {
    scalar_key(a, settings) == scalar_key(b, settings)
}

/// Stable signature for order-insensitive collection matching
fn item_signature(item: &Node, settings: &ComparisonSettings) -> String {
    match item {
        Node::Object(obj) => {
            let identity: Vec<String> = IDENTITY_FIELDS
                .iter()
                .filter_map(|name| {
                    obj.fields.get(*name).map(|node| match node {
                        Node::Scalar(s) => format!("{}={}", name, scalar_key(s, settings)),
                        other => format!("{}={}", name, other.render_brief()),
                    })
                })
                .collect();
            if !identity.is_empty() {
                return format!("id:{}|{}", obj.type_name, identity.join(","));
            }
            let mut canonical = Vec::new();
            item.write_canonical(&mut canonical);
            format!("h:{}", blake3::hash(&canonical).to_hex())
        }
        Node::Scalar(s) => format!("v:{}", scalar_key(s, settings)),
        Node::Null => "null".to_string(),
        Node::Collection(_) => {
            let mut canonical = Vec::new();
            item.write_canonical(&mut canonical);
            format!("h:{}", blake3::hash(&canonical).to_hex())
        }
    }
}

/// Identity fields present on both items whose values differ
fn identity_mismatch_fields(
    a: &ObjectNode,
    b: &ObjectNode,
    settings: &ComparisonSettings,
) -> Vec<String> {
    IDENTITY_FIELDS
        .iter()
        .filter(|name| {
            match (a.fields.get(**name), b.fields.get(**name)) {
                (Some(Node::Scalar(x)), Some(Node::Scalar(y))) => {
                    !scalars_equal(x, y, settings)
                }
                _ => false,
            }
        })
        .map(|name| name.to_string())
        .collect()
}

struct Walker<'a> {
    rules: &'a CompiledRules,
    settings: &'a ComparisonSettings,
    path: Vec<RuntimeSegment>,
    diffs: Vec<Difference>,
}

impl<'a> Walker<'a> {
    fn emit(
        &mut self,
        expected: Option<String>,
        actual: Option<String>,
        parent_type: &str,
        kind_hint: Option<DifferenceKind>,
    ) {
        self.diffs.push(Difference {
            property_path: render_path(&self.path),
            expected_value: expected,
            actual_value: actual,
            parent_type: parent_type.to_string(),
            kind_hint,
        });
    }

    fn compare_nodes(&mut self, a: &Node, b: &Node, schema: &Schema, parent_type: &str) {
        if self.path.len() > MAX_WALK_DEPTH {
            return;
        }
        match (a, b) {
            (Node::Null, Node::Null) => {}

            // Missing element and empty collection compare equal only when
            // the equivalence smart rule is enabled
            (Node::Null, Node::Collection(items)) if items.is_empty() => {
                if !self.rules.null_empty_equivalent() {
                    self.emit(None, Some("[0 items]".to_string()), parent_type, Some(DifferenceKind::NullDiff));
                }
            }
            (Node::Collection(items), Node::Null) if items.is_empty() => {
                if !self.rules.null_empty_equivalent() {
                    self.emit(Some("[0 items]".to_string()), None, parent_type, Some(DifferenceKind::NullDiff));
                }
            }

            (Node::Null, present) => {
                self.expand_one_sided(present, Side::B, parent_type, self.settings.max_null_subtree_depth)
            }
            (present, Node::Null) => {
                self.expand_one_sided(present, Side::A, parent_type, self.settings.max_null_subtree_depth)
            }

            (Node::Scalar(x), Node::Scalar(y)) => {
                if !scalars_equal(x, y, self.settings) {
                    self.emit(Some(x.render()), Some(y.render()), parent_type, None);
                }
            }

            (Node::Object(x), Node::Object(y)) => {
                self.compare_objects(x, y, schema, parent_type, &[])
            }

            (Node::Collection(x), Node::Collection(y)) => {
                self.compare_collections(x, y, schema, parent_type)
            }

            // Shape mismatch (scalar vs object etc., possible under dynamic
            // schemas): report one difference, do not descend
            (x, y) => self.emit(
                Some(x.render_brief()),
                Some(y.render_brief()),
                parent_type,
                None,
            ),
        }
    }

    /// Compare two object nodes field by field, driven by the schema
    fn compare_objects(
        &mut self,
        a: &ObjectNode,
        b: &ObjectNode,
        schema: &Schema,
        parent_type: &str,
        exclude: &[String],
    ) {
        // Polymorphic tag mismatch: one difference at the discriminator,
        // never a descent into mismatched shapes
        if a.type_name != b.type_name {
            let discriminator = match schema {
                Schema::Variant(v) => v.discriminator.clone(),
                _ => "$type".to_string(),
            };
            self.path.push(RuntimeSegment::field(&discriminator));
            let decision = self.rules.evaluate(&self.path, None);
            if !decision.ignore {
                self.emit(
                    Some(a.type_name.clone()),
                    Some(b.type_name.clone()),
                    parent_type,
                    None,
                );
            }
            self.path.pop();
            return;
        }

        // Declared fields drive the walk; dynamic objects walk the key union
        let fields: Vec<(&str, &Schema)> = match schema {
            Schema::Object(os) => os
                .fields
                .iter()
                .map(|f| (f.name.as_str(), &f.schema))
                .collect(),
            Schema::Variant(vs) => match vs.variants.get(&a.type_name) {
                Some(variant) => variant
                    .fields
                    .iter()
                    .map(|f| (f.name.as_str(), &f.schema))
                    .collect(),
                None => Vec::new(),
            },
            _ => {
                let mut names: Vec<&str> = a.fields.keys().map(|k| k.as_str()).collect();
                for name in b.fields.keys() {
                    if !a.fields.contains_key(name) {
                        names.push(name);
                    }
                }
                names.sort_unstable();
                names.into_iter().map(|n| (n, &DYNAMIC_SCHEMA)).collect()
            }
        };

        for (name, field_schema) in fields {
            if exclude.iter().any(|e| e == name) {
                continue;
            }
            self.path.push(RuntimeSegment::field(name));
            let decision = self
                .rules
                .evaluate(&self.path, Some(field_schema.type_name()));
            if !decision.ignore {
                match (a.fields.get(name), b.fields.get(name)) {
                    (None, None) => {}
                    (Some(x), Some(y)) => {
                        self.compare_nodes(x, y, field_schema, &a.type_name)
                    }
                    (Some(x), None) => {
                        self.compare_nodes(x, &Node::Null, field_schema, &a.type_name)
                    }
                    (None, Some(y)) => {
                        self.compare_nodes(&Node::Null, y, field_schema, &a.type_name)
                    }
                }
            }
            self.path.pop();
        }
    }

    fn compare_collections(
        &mut self,
        a: &[Node],
        b: &[Node],
        schema: &Schema,
        parent_type: &str,
    ) {
        let element_schema: &Schema = match schema {
            Schema::Collection { element, .. } => element,
            _ => &DYNAMIC_SCHEMA,
        };
        let decision = self.rules.evaluate(&self.path, Some("Collection"));
        if decision.ignore_order {
            self.compare_collections_unordered(a, b, element_schema, parent_type);
        } else {
            self.compare_collections_positional(a, b, element_schema, parent_type);
        }
    }

    /// Set the index on the terminal (collection) segment for item-level work
    fn with_item_index<F>(&mut self, index: usize, f: F)
    where
        F: FnOnce(&mut Self),
    {
        if let Some(last) = self.path.last_mut() {
            last.index = Some(index);
        }
        f(self);
        if let Some(last) = self.path.last_mut() {
            last.index = None;
        }
    }

    fn emit_item_added(&mut self, index: usize, item: &Node, parent_type: &str) {
        self.with_item_index(index, |w| {
            if !w.rules.evaluate(&w.path, None).ignore {
                w.emit(
                    None,
                    Some(item.render_brief()),
                    parent_type,
                    Some(DifferenceKind::ItemAdded),
                );
            }
        });
    }

    fn emit_item_removed(&mut self, index: usize, item: &Node, parent_type: &str) {
        self.with_item_index(index, |w| {
            if !w.rules.evaluate(&w.path, None).ignore {
                w.emit(
                    Some(item.render_brief()),
                    None,
                    parent_type,
                    Some(DifferenceKind::ItemRemoved),
                );
            }
        });
    }

    fn compare_collections_positional(
        &mut self,
        a: &[Node],
        b: &[Node],
        element_schema: &Schema,
        parent_type: &str,
    ) {
        let common = a.len().min(b.len());
        for i in 0..common {
            self.with_item_index(i, |w| {
                if w.rules.evaluate(&w.path, None).ignore {
                    return;
                }
                match (&a[i], &b[i]) {
                    (Node::Object(x), Node::Object(y)) if x.type_name == y.type_name => {
                        // Identity drift under positional pairing is an
                        // ordering signal, not value drift
                        let identity = identity_mismatch_fields(x, y, w.settings);
                        for name in &identity {
                            w.path.push(RuntimeSegment::field(name));
                            if !w.rules.evaluate(&w.path, None).ignore {
                                let expected = x.fields.get(name).map(|n| n.render_brief());
                                let actual = y.fields.get(name).map(|n| n.render_brief());
                                w.emit(
                                    expected,
                                    actual,
                                    &x.type_name,
                                    Some(DifferenceKind::IdentityMismatch),
                                );
                            }
                            w.path.pop();
                        }
                        w.compare_objects(x, y, element_schema, parent_type, &identity);
                    }
                    (x, y) => w.compare_nodes(x, y, element_schema, parent_type),
                }
            });
        }
        for (i, item) in a.iter().enumerate().skip(common) {
            self.emit_item_removed(i, item, parent_type);
        }
        for (i, item) in b.iter().enumerate().skip(common) {
            self.emit_item_added(i, item, parent_type);
        }
    }

    fn compare_collections_unordered(
        &mut self,
        a: &[Node],
        b: &[Node],
        element_schema: &Schema,
        parent_type: &str,
    ) {
        // Group indices by signature; BTreeMap gives deterministic
        // signature order, index vectors keep ascending order
        let mut by_sig_a: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, item) in a.iter().enumerate() {
            by_sig_a
                .entry(item_signature(item, self.settings))
                .or_default()
                .push(i);
        }
        let mut by_sig_b: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, item) in b.iter().enumerate() {
            by_sig_b
                .entry(item_signature(item, self.settings))
                .or_default()
                .push(i);
        }

        let mut signatures: Vec<&String> = by_sig_a.keys().collect();
        for sig in by_sig_b.keys() {
            if !by_sig_a.contains_key(sig) {
                signatures.push(sig);
            }
        }
        signatures.sort();

        for sig in signatures {
            let empty = Vec::new();
            let idx_a = by_sig_a.get(sig).unwrap_or(&empty);
            let idx_b = by_sig_b.get(sig).unwrap_or(&empty);
            let matched = idx_a.len().min(idx_b.len());

            for k in 0..matched {
                let (ia, ib) = (idx_a[k], idx_b[k]);
                self.with_item_index(ia, |w| {
                    if !w.rules.evaluate(&w.path, None).ignore {
                        w.compare_nodes(&a[ia], &b[ib], element_schema, parent_type);
                    }
                });
            }
            for &ia in idx_a.iter().skip(matched) {
                self.emit_item_removed(ia, &a[ia], parent_type);
            }
            for &ib in idx_b.iter().skip(matched) {
                self.emit_item_added(ib, &b[ib], parent_type);
            }
        }
    }

    /// One side of this subtree is null: emit one difference per reachable
    /// descendant on the present side, bounded by the configured depth
    fn expand_one_sided(&mut self, node: &Node, side: Side, parent_type: &str, depth: usize) {
        let emit_null = |w: &mut Self, rendered: String, parent: &str| {
            let (expected, actual) = match side {
                Side::A => (Some(rendered), None),
                Side::B => (None, Some(rendered)),
            };
            w.emit(expected, actual, parent, Some(DifferenceKind::NullDiff));
        };

        match node {
            Node::Null => {}
            Node::Scalar(s) => emit_null(self, s.render(), parent_type),
            // A one-sided collection is a single missing-data difference
            Node::Collection(_) => emit_null(self, node.render_brief(), parent_type),
            Node::Object(obj) => {
                if depth == 0 || obj.fields.is_empty() {
                    emit_null(self, node.render_brief(), parent_type);
                    return;
                }
                for (name, child) in &obj.fields {
                    self.path.push(RuntimeSegment::field(name));
                    if !self.rules.evaluate(&self.path, None).ignore {
                        self.expand_one_sided(child, side, &obj.type_name, depth - 1);
                    }
                    self.path.pop();
                }
            }
        }
    }
}
