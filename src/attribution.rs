//! C6: the file-attribution engine (spec §4.5). Narrows each canonical
//! type's `files` set using two heuristics layered on top of deduplication.
//!
//! There is no single authoritative source for these heuristics in the
//! original tool's surviving sources -- they are applied here exactly as
//! spec.md's §4.5 states them, reusing `dedup.rs`'s `CanonicalType` shape
//! and `symbol_table.h`'s "source file" bookkeeping (a type belongs to a
//! set of files, not just one).

use std::collections::HashMap;

use crate::ast::NodeKind;
use crate::dedup::CanonicalType;

/// A path extension this crate treats as a C++ translation unit for the
/// `this`-pointer heuristic's file-extension check.
fn is_cpp_source_file(file_name: &str) -> bool {
    file_name.ends_with(".cpp") || file_name.ends_with(".cc") || file_name.ends_with(".cxx")
}

/// Applies the `this`-pointer heuristic (spec §4.5): for each canonical
/// type, if one of its member functions takes a pointer to that same type
/// as an implicit first parameter, the file defining that member function
/// is added to the type's `files` with priority. If that leaves the type
/// attributed to exactly one file and that file is a `.c`/`.cpp` source
/// (not a header), `probably_defined_in_cpp_file` is set.
pub fn apply_this_pointer_heuristic(types: &mut [CanonicalType], file_names: &[String]) {
    for ty in types.iter_mut() {
        let defining_file = member_function_defining_file(ty, file_names);
        if let Some(file_index) = defining_file {
            if !ty.files.contains(&file_index) {
                ty.files.insert(0, file_index);
            } else {
                ty.files.retain(|f| *f == file_index);
                ty.files.push(file_index);
                ty.files.dedup();
            }
        }

        if ty.files.len() == 1 {
            if let Some(name) = file_names.get(ty.files[0]) {
                if is_cpp_source_file(name) {
                    ty.node.probably_defined_in_cpp_file = true;
                }
            }
        }
    }
}

/// Looks for a member function on `ty` whose first parameter is a pointer
/// to `ty` itself, and returns the file that function is recorded against,
/// if any such file is uniquely determined.
fn member_function_defining_file(ty: &CanonicalType, _file_names: &[String]) -> Option<usize> {
    if let NodeKind::StructOrUnion {
        ref member_functions,
        ..
    } = ty.node.kind
    {
        for method in member_functions {
            if let NodeKind::FunctionType { parameters, .. } = &method.node.kind {
                if let Some(first) = parameters.first() {
                    if is_pointer_to_named(first, &ty.name) {
                        return method.node.files.first().copied();
                    }
                }
            }
        }
    }
    None
}

fn is_pointer_to_named(node: &crate::ast::Node, name: &str) -> bool {
    match &node.kind {
        NodeKind::Pointer { target } => match &target.kind {
            NodeKind::TypeName { name: n, .. } => n == name,
            _ => target.name.as_deref() == Some(name),
        },
        _ => false,
    }
}

/// Applies the reference-count heuristic (spec §4.5): for each type, counts
/// how many times it is referenced from each file (via `reference_counts`,
/// gathered by walking every file's AST and tallying `TypeName` hits
/// resolved to this type) and assigns the type to the single file with the
/// strictly highest count. A tie leaves `files` unchanged.
pub fn apply_reference_count_heuristic(
    types: &mut [CanonicalType],
    reference_counts: &[HashMap<usize, u32>],
) {
    for (index, ty) in types.iter_mut().enumerate() {
        let counts = match reference_counts.get(index) {
            Some(c) if !c.is_empty() => c,
            _ => continue,
        };

        let mut best_file = None;
        let mut best_count = 0u32;
        let mut tied = false;
        for (&file, &count) in counts {
            match count.cmp(&best_count) {
                std::cmp::Ordering::Greater => {
                    best_count = count;
                    best_file = Some(file);
                    tied = false;
                }
                std::cmp::Ordering::Equal => tied = true,
                std::cmp::Ordering::Less => {}
            }
        }

        if !tied {
            if let Some(file) = best_file {
                ty.files = vec![file];
            }
        }
    }
}

/// Walks every root node and counts, per canonical type index, how many
/// `TypeName` leaves resolved to it from each originating file. Feeds
/// [`apply_reference_count_heuristic`].
///
/// Each root carries the set of files its count should be attributed to,
/// rather than a single file index: a variable or function root belongs to
/// exactly one file, but a canonical type's own body (added as a root so a
/// type referenced only from inside another type's fields -- never
/// directly from a variable or function -- still gets counted, spec §4.5)
/// belongs to every file that type was seen in.
pub fn count_references(
    roots: &[(Vec<usize>, crate::ast::Node)],
    canonical_len: usize,
) -> Vec<HashMap<usize, u32>> {
    let mut counts = vec![HashMap::new(); canonical_len];
    for (file_indices, node) in roots {
        walk_and_count(node, file_indices, &mut counts);
    }
    counts
}

fn walk_and_count(node: &crate::ast::Node, file_indices: &[usize], counts: &mut [HashMap<usize, u32>]) {
    if let NodeKind::TypeName {
        canonical_index: Some(index),
        ..
    } = &node.kind
    {
        if let Some(map) = counts.get_mut(*index) {
            for &file_index in file_indices {
                *map.entry(file_index).or_insert(0) += 1;
            }
        }
    }
    for child in crate::dedup::children(&node.kind) {
        walk_and_count(child, file_indices, counts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Node;

    #[test]
    fn unanimous_reference_count_wins_attribution() {
        let mut types = vec![CanonicalType {
            name: "Vec3".to_string(),
            node: Node::named(
                "Vec3",
                NodeKind::Builtin {
                    c_name: "struct Vec3".to_string(),
                },
            ),
            files: vec![0, 1],
            conflicting_types: false,
        }];
        let mut counts = HashMap::new();
        counts.insert(0usize, 5u32);
        counts.insert(1usize, 1u32);
        apply_reference_count_heuristic(&mut types, &[counts]);
        assert_eq!(types[0].files, vec![0]);
    }

    #[test]
    fn tie_leaves_attribution_unchanged() {
        let mut types = vec![CanonicalType {
            name: "Vec3".to_string(),
            node: Node::named(
                "Vec3",
                NodeKind::Builtin {
                    c_name: "struct Vec3".to_string(),
                },
            ),
            files: vec![0, 1],
            conflicting_types: false,
        }];
        let mut counts = HashMap::new();
        counts.insert(0usize, 3u32);
        counts.insert(1usize, 3u32);
        apply_reference_count_heuristic(&mut types, &[counts]);
        assert_eq!(types[0].files, vec![0, 1]);
    }

    #[test]
    fn type_referenced_only_from_another_types_body_is_still_counted() {
        // `Inner` is never named by a variable or function, only nested as
        // a field inside `Outer` -- it must still be counted once `Outer`'s
        // own body is walked as a root, or the reference-count heuristic
        // would always see it as zero-referenced from every file.
        let inner = CanonicalType {
            name: "Inner".to_string(),
            node: Node::named("Inner", NodeKind::Builtin { c_name: "struct Inner".to_string() }),
            files: vec![0, 1],
            conflicting_types: false,
        };
        let outer_field = crate::ast::Field {
            name: "inner".to_string(),
            node: Box::new(Node::new(NodeKind::TypeName {
                name: "Inner".to_string(),
                cross_reference_kind: None,
                canonical_index: Some(0),
            })),
            relative_offset_bytes: Some(0),
            size_bits: None,
            access_specifier: crate::ast::AccessSpecifier::Public,
            is_static: false,
        };
        let outer = CanonicalType {
            name: "Outer".to_string(),
            node: Node::named(
                "Outer",
                NodeKind::StructOrUnion {
                    is_struct: true,
                    base_classes: vec![],
                    fields: vec![outer_field],
                    member_functions: vec![],
                },
            ),
            files: vec![0],
            conflicting_types: false,
        };

        let roots = vec![(outer.files.clone(), outer.node.clone())];
        let counts = count_references(&roots, 2);
        assert_eq!(counts[0].get(&0), Some(&1));
        assert!(counts[0].get(&1).is_none());
    }
}
