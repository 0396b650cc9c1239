//! C5: deduplicates data types parsed from many translation units into one
//! canonical set and rewrites every reference to point at it (spec §4.4
//! "Deduplication").
//!
//! Grounded in `original_source/ccc/symbol_table.h`'s `SymbolList`/`Symbol`
//! model (one flat, handle-addressed table per symbol kind) combined with
//! `ast.cpp`'s recursive type walk: types are bucketed by name first (cheap,
//! matches how the same tag shows up verbatim in every TU that includes its
//! header), then within a bucket compared structurally so that two
//! genuinely different types that happen to share a name are kept apart
//! rather than silently merged.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use crate::ast::{Field, Node, NodeKind};

/// One data type surviving deduplication, with every file it was seen in.
#[derive(Clone, Debug)]
pub struct CanonicalType {
    pub name: String,
    pub node: Node,
    pub files: Vec<usize>,
    /// Set when this name had more than one structurally distinct body
    /// across the files it was seen in (spec §4.4 step 2, §7's
    /// `Inconsistent` class). `node` is still exactly one of those bodies
    /// (the tie-break winner); the others are not kept as separate
    /// deduplicated types, only folded into `files`, so every `TypeName`
    /// naming this tag resolves unambiguously. Downstream printers may use
    /// this to emit a warning.
    pub conflicting_types: bool,
}

/// Deduplicates a flat list of top-level type nodes (one per file they were
/// declared in) into the smallest set of structurally distinct definitions.
/// Named types (`node.name.is_some()`, e.g. a struct tag or typedef) are
/// bucketed by that name, cheaply matching how the same tag shows up
/// verbatim in every TU that includes its header. Anonymous types (an
/// inline `struct { ... }` with no tag, e.g. an anonymous union typedef
/// member) have no name to bucket by, so they're bucketed by
/// [`structural_hash`] instead (spec §4.4 step 1) -- the same
/// `group_structurally_equal`/tie-break treatment then applies to either
/// kind of bucket uniformly.
///
/// Ties within a bucket (two structurally identical definitions of the same
/// type) are broken by preferring the definition with a body over a bare
/// forward declaration, and otherwise by keeping the one parsed from the
/// earliest file index -- matching the bias toward a type's primary header
/// rather than an arbitrary later redeclaration.
pub fn deduplicate(named_types: Vec<(usize, Node)>) -> Vec<CanonicalType> {
    let mut name_buckets: HashMap<String, Vec<(usize, Node)>> = HashMap::new();
    let mut hash_buckets: HashMap<u64, Vec<(usize, Node)>> = HashMap::new();
    for (file_index, node) in named_types {
        match node.name.clone() {
            Some(name) => name_buckets.entry(name).or_default().push((file_index, node)),
            None => {
                let hash = structural_hash(&node, &mut HashSet::new());
                hash_buckets.entry(hash).or_default().push((file_index, node));
            }
        }
    }

    let mut canonical = Vec::new();
    for (name, candidates) in name_buckets {
        canonical.push(canonicalize_bucket(name, candidates));
    }
    for (_hash, candidates) in hash_buckets {
        // Anonymous types have no tag name to carry forward; `Node::name`
        // is `None` for them both before and after dedup, same as the
        // source nodes, so the canonical entry's `name` is just empty.
        canonical.push(canonicalize_bucket(String::new(), candidates));
    }
    canonical
}

/// Folds one name- or hash-keyed bucket of candidate definitions into a
/// single [`CanonicalType`] (spec §4.4 steps 2-3): splits the bucket into
/// structurally-equal groups, marks more-than-one-group as
/// `conflicting_types`, and keeps every group's files while picking the
/// has-body/earliest-file tie-break winner as the canonical body.
fn canonicalize_bucket(name: String, candidates: Vec<(usize, Node)>) -> CanonicalType {
    let mut groups = group_structurally_equal(candidates);
    let conflicting_types = groups.len() > 1;
    // Every group's files belong to this one canonical entry -- a
    // conflicting redefinition still names the same tag, it just
    // disagrees on the body, so its files are recorded too rather than
    // silently dropped (spec §4.4 step 2: "mark on all others", not
    // "discard all others").
    let mut files: Vec<usize> = groups
        .iter()
        .flat_map(|group| group.iter().map(|(file, _)| *file))
        .collect();
    files.sort_unstable();

    // Tie-break across all groups, not just within one: has-body wins,
    // then earliest file index (spec §4.4 "Tie-breaks").
    groups.sort_by_key(|group| {
        let (file_index, node) = &group[0];
        (!has_body(node), *file_index)
    });
    let winner_group = groups.remove(0);
    let winner = pick_canonical(winner_group);

    CanonicalType {
        name,
        node: winner,
        files,
        conflicting_types,
    }
}

/// Computes spec §4.4 step 1's structural hash for an anonymous type: kind
/// tag, size, member count, then each member's `(relative_offset_bytes,
/// size_bits, name, recursive hash)`, in that canonical order. `stack`
/// tracks the `stabs_type_number`s currently being hashed higher up the
/// call chain -- a node whose number is already on the stack (a
/// self-referential member, e.g. a linked-list node's `next` field) hashes
/// as a fixed "self" sentinel instead of recursing forever, mirroring the
/// `is_currently_processing` cycle guard used elsewhere in this module for
/// structural equality.
fn structural_hash(node: &Node, stack: &mut HashSet<i32>) -> u64 {
    if let Some(number) = node.stabs_type_number {
        if stack.contains(&number) {
            let mut hasher = DefaultHasher::new();
            "self".hash(&mut hasher);
            return hasher.finish();
        }
    }
    let pushed = match node.stabs_type_number {
        Some(number) => stack.insert(number),
        None => false,
    };

    let mut hasher = DefaultHasher::new();
    std::mem::discriminant(&node.kind).hash(&mut hasher);
    node.size_bits.hash(&mut hasher);

    match &node.kind {
        NodeKind::Builtin { c_name } => c_name.hash(&mut hasher),
        NodeKind::Array {
            element,
            element_count,
        } => {
            element_count.hash(&mut hasher);
            structural_hash(element, stack).hash(&mut hasher);
        }
        NodeKind::Bitfield {
            underlying,
            offset_bits,
            size_bits,
        } => {
            offset_bits.hash(&mut hasher);
            size_bits.hash(&mut hasher);
            structural_hash(underlying, stack).hash(&mut hasher);
        }
        NodeKind::Enum { constants } => constants.hash(&mut hasher),
        NodeKind::StructOrUnion {
            is_struct,
            base_classes,
            fields,
            ..
        } => {
            is_struct.hash(&mut hasher);
            fields.len().hash(&mut hasher);
            for field in fields {
                field.relative_offset_bytes.hash(&mut hasher);
                field.size_bits.hash(&mut hasher);
                field.name.hash(&mut hasher);
                structural_hash(&field.node, stack).hash(&mut hasher);
            }
            base_classes.len().hash(&mut hasher);
            for base in base_classes {
                base.offset_bytes.hash(&mut hasher);
                structural_hash(&base.node, stack).hash(&mut hasher);
            }
        }
        NodeKind::Pointer { target } | NodeKind::Reference { target } => {
            structural_hash(target, stack).hash(&mut hasher);
        }
        NodeKind::PointerToDataMember {
            class_type,
            member_type,
        } => {
            structural_hash(class_type, stack).hash(&mut hasher);
            structural_hash(member_type, stack).hash(&mut hasher);
        }
        NodeKind::FunctionType {
            return_type,
            parameters,
        } => {
            structural_hash(return_type, stack).hash(&mut hasher);
            parameters.len().hash(&mut hasher);
            for param in parameters {
                structural_hash(param, stack).hash(&mut hasher);
            }
        }
        NodeKind::TypeName { name, .. } => name.hash(&mut hasher),
        NodeKind::FunctionDefinition { .. } | NodeKind::Variable { .. } | NodeKind::SourceFile { .. } => {}
    }

    if pushed {
        if let Some(number) = node.stabs_type_number {
            stack.remove(&number);
        }
    }
    hasher.finish()
}

/// Splits a name-bucket into groups of structurally identical nodes. More
/// than one group means the same tag legitimately has distinct bodies in
/// different files (spec §4.4 edge case: conflicting redefinitions are kept
/// apart, not merged into one incoherent type).
fn group_structurally_equal(candidates: Vec<(usize, Node)>) -> Vec<Vec<(usize, Node)>> {
    let mut groups: Vec<Vec<(usize, Node)>> = Vec::new();
    for candidate in candidates {
        let mut placed = false;
        for group in groups.iter_mut() {
            if structurally_equal(&group[0].1, &candidate.1) {
                group.push(candidate.clone());
                placed = true;
                break;
            }
        }
        if !placed {
            groups.push(vec![candidate]);
        }
    }
    groups
}

fn pick_canonical(mut group: Vec<(usize, Node)>) -> Node {
    group.sort_by_key(|(file_index, node)| (!has_body(node), *file_index));
    group.into_iter().next().expect("group is never empty").1
}

fn has_body(node: &Node) -> bool {
    !matches!(node.kind, NodeKind::TypeName { .. })
}

/// Structural equality between two AST nodes, ignoring per-occurrence
/// bookkeeping (`files`, `is_currently_processing`) and names on nested
/// fields that don't affect layout. Cycles are handled by the cycle guard
/// on each node: a node already being compared higher up the call stack is
/// treated as equal to anything, so a pair of mutually self-referential
/// structs compares by their finite, non-recursive structure rather than
/// looping forever.
pub fn structurally_equal(a: &Node, b: &Node) -> bool {
    if a.is_currently_processing || b.is_currently_processing {
        return true;
    }
    if a.size_bits != b.size_bits || a.is_const != b.is_const || a.is_volatile != b.is_volatile {
        return false;
    }
    structurally_equal_kind(&a.kind, &b.kind)
}

fn structurally_equal_kind(a: &NodeKind, b: &NodeKind) -> bool {
    match (a, b) {
        (NodeKind::Builtin { c_name: x }, NodeKind::Builtin { c_name: y }) => x == y,
        (
            NodeKind::Array {
                element: ea,
                element_count: ca,
            },
            NodeKind::Array {
                element: eb,
                element_count: cb,
            },
        ) => ca == cb && structurally_equal(ea, eb),
        (
            NodeKind::Bitfield {
                underlying: ua,
                offset_bits: oa,
                size_bits: sa,
            },
            NodeKind::Bitfield {
                underlying: ub,
                offset_bits: ob,
                size_bits: sb,
            },
        ) => oa == ob && sa == sb && structurally_equal(ua, ub),
        (NodeKind::Enum { constants: ca }, NodeKind::Enum { constants: cb }) => ca == cb,
        (
            NodeKind::StructOrUnion {
                is_struct: sa,
                fields: fa,
                base_classes: ba,
                ..
            },
            NodeKind::StructOrUnion {
                is_struct: sb,
                fields: fb,
                base_classes: bb,
                ..
            },
        ) => {
            sa == sb
                && ba.len() == bb.len()
                && ba.iter().zip(bb.iter()).all(|(x, y)| {
                    x.offset_bytes == y.offset_bytes
                        && x.is_virtual == y.is_virtual
                        && structurally_equal(&x.node, &y.node)
                })
                && fields_equal(fa, fb)
        }
        (NodeKind::Pointer { target: ta }, NodeKind::Pointer { target: tb }) => {
            structurally_equal(ta, tb)
        }
        (NodeKind::Reference { target: ta }, NodeKind::Reference { target: tb }) => {
            structurally_equal(ta, tb)
        }
        (
            NodeKind::PointerToDataMember {
                class_type: ca,
                member_type: ma,
            },
            NodeKind::PointerToDataMember {
                class_type: cb,
                member_type: mb,
            },
        ) => structurally_equal(ca, cb) && structurally_equal(ma, mb),
        (
            NodeKind::FunctionType {
                return_type: ra,
                parameters: pa,
            },
            NodeKind::FunctionType {
                return_type: rb,
                parameters: pb,
            },
        ) => {
            structurally_equal(ra, rb)
                && pa.len() == pb.len()
                && pa.iter().zip(pb.iter()).all(|(x, y)| structurally_equal(x, y))
        }
        (NodeKind::TypeName { name: na, .. }, NodeKind::TypeName { name: nb, .. }) => na == nb,
        _ => false,
    }
}

fn fields_equal(a: &[Field], b: &[Field]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b.iter()).all(|(x, y)| {
            x.name == y.name
                && x.relative_offset_bytes == y.relative_offset_bytes
                && x.size_bits == y.size_bits
                && structurally_equal(&x.node, &y.node)
        })
}

/// Rewrites every `TypeName` leaf in `node` whose name matches a canonical
/// type to carry that type's index into `canonical`, so downstream passes
/// (refinement, printing) can follow the reference without a second name
/// lookup.
pub fn rewrite_references(node: &mut Node, canonical: &[CanonicalType]) {
    if let NodeKind::TypeName {
        name,
        canonical_index,
        ..
    } = &mut node.kind
    {
        if let Some(index) = canonical.iter().position(|c| &c.name == name) {
            *canonical_index = Some(index);
        }
        return;
    }
    for child in children_mut(&mut node.kind) {
        rewrite_references(child, canonical);
    }
}

/// Immutable counterpart of [`children_mut`], used by passes (like file
/// attribution) that only need to walk the tree read-only.
pub fn children(kind: &NodeKind) -> Vec<&Node> {
    match kind {
        NodeKind::Array { element, .. } => vec![element.as_ref()],
        NodeKind::Bitfield { underlying, .. } => vec![underlying.as_ref()],
        NodeKind::StructOrUnion {
            base_classes,
            fields,
            member_functions,
            ..
        } => {
            let mut out: Vec<&Node> = base_classes.iter().map(|b| b.node.as_ref()).collect();
            out.extend(fields.iter().map(|f| f.node.as_ref()));
            out.extend(member_functions.iter().map(|m| m.node.as_ref()));
            out
        }
        NodeKind::Pointer { target } | NodeKind::Reference { target } => vec![target.as_ref()],
        NodeKind::PointerToDataMember {
            class_type,
            member_type,
        } => vec![class_type.as_ref(), member_type.as_ref()],
        NodeKind::FunctionType {
            return_type,
            parameters,
        } => {
            let mut out = vec![return_type.as_ref()];
            out.extend(parameters.iter());
            out
        }
        NodeKind::FunctionDefinition {
            return_type,
            parameters,
            locals,
            ..
        } => {
            let mut out = vec![return_type.as_ref()];
            out.extend(parameters.iter());
            out.extend(locals.iter());
            out
        }
        NodeKind::Variable { ty, .. } => vec![ty.as_ref()],
        NodeKind::Builtin { .. } | NodeKind::Enum { .. } | NodeKind::TypeName { .. } => vec![],
        NodeKind::SourceFile {
            data_types,
            functions,
            global_variables,
            ..
        } => {
            let mut out: Vec<&Node> = data_types.iter().collect();
            out.extend(functions.iter());
            out.extend(global_variables.iter());
            out
        }
    }
}

fn children_mut(kind: &mut NodeKind) -> Vec<&mut Node> {
    match kind {
        NodeKind::Array { element, .. } => vec![element.as_mut()],
        NodeKind::Bitfield { underlying, .. } => vec![underlying.as_mut()],
        NodeKind::StructOrUnion {
            base_classes,
            fields,
            member_functions,
            ..
        } => {
            let mut out: Vec<&mut Node> = base_classes.iter_mut().map(|b| b.node.as_mut()).collect();
            out.extend(fields.iter_mut().map(|f| f.node.as_mut()));
            out.extend(member_functions.iter_mut().map(|m| m.node.as_mut()));
            out
        }
        NodeKind::Pointer { target } | NodeKind::Reference { target } => vec![target.as_mut()],
        NodeKind::PointerToDataMember {
            class_type,
            member_type,
        } => vec![class_type.as_mut(), member_type.as_mut()],
        NodeKind::FunctionType {
            return_type,
            parameters,
        } => {
            let mut out = vec![return_type.as_mut()];
            out.extend(parameters.iter_mut());
            out
        }
        NodeKind::FunctionDefinition {
            return_type,
            parameters,
            locals,
            ..
        } => {
            let mut out = vec![return_type.as_mut()];
            out.extend(parameters.iter_mut());
            out.extend(locals.iter_mut());
            out
        }
        NodeKind::Variable { ty, .. } => vec![ty.as_mut()],
        NodeKind::Builtin { .. } | NodeKind::Enum { .. } | NodeKind::TypeName { .. } => vec![],
        NodeKind::SourceFile {
            data_types,
            functions,
            global_variables,
            ..
        } => {
            let mut out: Vec<&mut Node> = data_types.iter_mut().collect();
            out.extend(functions.iter_mut());
            out.extend(global_variables.iter_mut());
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AccessSpecifier;

    fn float_field(name: &str, offset: i64) -> Field {
        Field {
            name: name.to_string(),
            node: Box::new(Node::new(NodeKind::Builtin {
                c_name: "float".to_string(),
            })),
            relative_offset_bytes: Some(offset),
            size_bits: Some(32),
            access_specifier: AccessSpecifier::Public,
            is_static: false,
        }
    }

    fn vec3_struct() -> Node {
        let mut node = Node::named(
            "Vec3",
            NodeKind::StructOrUnion {
                is_struct: true,
                base_classes: vec![],
                fields: vec![float_field("x", 0), float_field("y", 4), float_field("z", 8)],
                member_functions: vec![],
            },
        );
        node.size_bits = Some(96);
        node
    }

    #[test]
    fn identical_structs_from_two_files_collapse_to_one() {
        let types = vec![(0, vec3_struct()), (1, vec3_struct())];
        let canonical = deduplicate(types);
        assert_eq!(canonical.len(), 1);
        assert_eq!(canonical[0].files, vec![0, 1]);
        assert!(!canonical[0].conflicting_types);
    }

    #[test]
    fn same_name_different_body_collapses_to_one_marked_conflicting() {
        let mut other = vec3_struct();
        if let NodeKind::StructOrUnion { ref mut fields, .. } = other.kind {
            fields.push(float_field("w", 12));
        }
        other.size_bits = Some(128);

        // Neither candidate has a body-tiebreak advantage over the other
        // (both are full definitions), so the earliest file index wins:
        // file 0's three-field Vec3 becomes canonical, file 1's four-field
        // one is folded in as a conflict rather than kept as a second
        // "Vec3" entry -- a `TypeName { name: "Vec3" }` must resolve to
        // exactly one index (spec §4.4 step 2).
        let canonical = deduplicate(vec![(0, vec3_struct()), (1, other)]);
        assert_eq!(canonical.len(), 1);
        assert!(canonical[0].conflicting_types);
        assert_eq!(canonical[0].files, vec![0, 1]);
        match &canonical[0].node.kind {
            NodeKind::StructOrUnion { fields, .. } => assert_eq!(fields.len(), 3),
            _ => panic!("expected struct"),
        }
    }

    #[test]
    fn reference_rewrite_finds_canonical_index() {
        let canonical = deduplicate(vec![(0, vec3_struct())]);
        let mut reference = Node::new(NodeKind::TypeName {
            name: "Vec3".to_string(),
            cross_reference_kind: None,
            canonical_index: None,
        });
        rewrite_references(&mut reference, &canonical);
        match reference.kind {
            NodeKind::TypeName { canonical_index, .. } => assert_eq!(canonical_index, Some(0)),
            _ => panic!("expected type name"),
        }
    }

    /// An anonymous (untagged) struct, like `vec3_struct` but with no name
    /// -- the structural-hash bucketing path, not the name-bucketing path.
    fn anonymous_vec3_struct() -> Node {
        let mut node = Node::new(NodeKind::StructOrUnion {
            is_struct: true,
            base_classes: vec![],
            fields: vec![float_field("x", 0), float_field("y", 4), float_field("z", 8)],
            member_functions: vec![],
        });
        node.size_bits = Some(96);
        node
    }

    #[test]
    fn identical_anonymous_structs_collapse_by_structural_hash() {
        let types = vec![(0, anonymous_vec3_struct()), (1, anonymous_vec3_struct())];
        let canonical = deduplicate(types);
        assert_eq!(canonical.len(), 1);
        assert_eq!(canonical[0].files, vec![0, 1]);
        assert!(!canonical[0].conflicting_types);
        assert_eq!(canonical[0].name, "");
    }

    #[test]
    fn structurally_different_anonymous_structs_stay_separate() {
        let mut other = anonymous_vec3_struct();
        if let NodeKind::StructOrUnion { ref mut fields, .. } = other.kind {
            fields.push(float_field("w", 12));
        }
        other.size_bits = Some(128);

        let canonical = deduplicate(vec![(0, anonymous_vec3_struct()), (1, other)]);
        assert_eq!(canonical.len(), 2);
        assert!(canonical.iter().all(|c| !c.conflicting_types));
    }

    #[test]
    fn named_and_anonymous_types_are_deduplicated_independently() {
        let types = vec![
            (0, vec3_struct()),
            (1, vec3_struct()),
            (0, anonymous_vec3_struct()),
            (1, anonymous_vec3_struct()),
        ];
        let canonical = deduplicate(types);
        assert_eq!(canonical.len(), 2);
        let named = canonical.iter().find(|c| c.name == "Vec3").unwrap();
        assert_eq!(named.files, vec![0, 1]);
        let anonymous = canonical.iter().find(|c| c.name.is_empty()).unwrap();
        assert_eq!(anonymous.files, vec![0, 1]);
    }
}
