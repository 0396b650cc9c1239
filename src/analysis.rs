//! C4: the per-file analyser. Lowers one file's Stabs Type Tree (C3) into
//! this crate's AST (spec §4.3 "Per-file analysis"), resolving same-file
//! numeric references as it goes and leaving cross-file/unresolved
//! references as [`ast::NodeKind::TypeName`] nodes for the deduplication
//! pass (C5) to rewrite.
//!
//! Grounded in `original_source/ccc/ast.cpp`'s `stabs_symbol_to_ast`/
//! `stabs_field_to_ast` walk: a type with a name and no body is a reference
//! that must be looked up elsewhere; a type with a body is lowered
//! recursively according to its descriptor.

use std::collections::HashSet;

use crate::ast::{
    AccessSpecifier, BaseClass, Field, MemberFunction, Node, NodeKind, StorageClass, VariableStorage,
};
use crate::binary_reader::GnuLinkOnceLocation;
use crate::stabs::parser::{ParsedSymbol, SymbolDescriptor};
use crate::stabs::tree::{StabsDescriptor, StabsTypeNode, StabsTypeTree};

/// Per-file state threaded through the lowering walk.
struct Analyser<'a> {
    file_index: usize,
    tree: &'a StabsTypeTree,
    /// Type numbers currently being lowered, to stop infinite recursion on
    /// a type that (directly or through a pointer/reference) refers back to
    /// itself -- e.g. a linked-list node's `next` field.
    in_progress: HashSet<i32>,
}

impl<'a> Analyser<'a> {
    fn lower(&mut self, stabs_node: &StabsTypeNode) -> Node {
        let mut node = match &stabs_node.descriptor {
            StabsDescriptor::TypeReference(number) => {
                let (file, num) = number.resolve_file(self.file_index as i32);
                if file == self.file_index as i32 {
                    self.lower_same_file_reference(num)
                } else {
                    Node::new(NodeKind::TypeName {
                        name: format!("cross_file_type_{}_{}", file, num),
                        cross_reference_kind: None,
                        canonical_index: None,
                    })
                }
            }
            StabsDescriptor::Array {
                index_type,
                element_type,
            } => {
                let element_count = match &index_type.descriptor {
                    StabsDescriptor::Range { low, high, .. } => (high - low + 1).max(0),
                    _ => 0,
                };
                Node::new(NodeKind::Array {
                    element: Box::new(self.lower(element_type)),
                    element_count,
                })
            }
            StabsDescriptor::Range { base_type, low, high } => {
                // A base type (`int`, `float`, ...) is conventionally
                // encoded as a range over itself -- `int:t1=r1;0;-1;`
                // defines type 1 as the range `[0, -1]` of type 1. Lowering
                // that naively recurses straight back into the same type
                // number, which the cycle guard below would just turn into
                // an unresolved `type_N` `TypeName`, so every `int`/`float`
                // in the program would come out unresolved. Detect the
                // self-reference and classify the bounds into a `Builtin`
                // instead, per the conventional dbx range encoding: `low >
                // high` marks a float sized by `|low|` bytes, `low == 0`
                // with a negative `high` marks a machine-word unsigned
                // integer, and a symmetric `[-(high+1), high]` marks a
                // two's-complement signed integer sized by `high`'s bit
                // width.
                let own_number = stabs_node.type_number.map(|n| n.number);
                let is_self_reference = match &base_type.descriptor {
                    StabsDescriptor::TypeReference(r) => {
                        let (file, num) = r.resolve_file(self.file_index as i32);
                        file == self.file_index as i32 && Some(num) == own_number
                    }
                    _ => false,
                };
                if is_self_reference {
                    Node::new(NodeKind::Builtin {
                        c_name: classify_range_builtin(*low, *high),
                    })
                } else {
                    self.lower(base_type)
                }
            }
            StabsDescriptor::Function { return_type } => Node::new(NodeKind::FunctionType {
                return_type: Box::new(self.lower(return_type)),
                parameters: Vec::new(),
            }),
            StabsDescriptor::StructOrUnion {
                is_struct,
                size_bits,
                base_classes,
                fields,
                member_functions,
            } => self.lower_struct_or_union(
                *is_struct,
                *size_bits,
                base_classes,
                fields,
                member_functions,
            ),
            StabsDescriptor::Enum { constants } => Node::new(NodeKind::Enum {
                constants: constants.clone(),
            }),
            StabsDescriptor::CrossReference { kind, identifier } => {
                Node::new(NodeKind::TypeName {
                    name: identifier.clone(),
                    cross_reference_kind: Some(*kind),
                    canonical_index: None,
                })
            }
            StabsDescriptor::Reference { target } => Node::new(NodeKind::Reference {
                target: Box::new(self.lower(target)),
            }),
            StabsDescriptor::Pointer { target } => Node::new(NodeKind::Pointer {
                target: Box::new(self.lower(target)),
            }),
            StabsDescriptor::PointerToDataMember {
                class_type,
                member_type,
            } => Node::new(NodeKind::PointerToDataMember {
                class_type: Box::new(self.lower(class_type)),
                member_type: Box::new(self.lower(member_type)),
            }),
            StabsDescriptor::Error(message) => Node::new(NodeKind::Builtin {
                c_name: format!("/* error: {} */ void", message),
            }),
        };

        if let Some(name) = &stabs_node.name {
            node.name = Some(name.clone());
        }
        node.stabs_type_number = stabs_node.type_number.map(|n| n.number);
        node.files.push(self.file_index);
        node
    }

    fn lower_same_file_reference(&mut self, number: i32) -> Node {
        if self.in_progress.contains(&number) {
            return Node::new(NodeKind::TypeName {
                name: format!("type_{}", number),
                cross_reference_kind: None,
                canonical_index: None,
            });
        }
        match self.tree.get(number) {
            Some(target) => {
                self.in_progress.insert(number);
                let lowered = self.lower(target);
                self.in_progress.remove(&number);
                lowered
            }
            None => Node::new(NodeKind::TypeName {
                name: format!("type_{}", number),
                cross_reference_kind: None,
                canonical_index: None,
            }),
        }
    }

    fn lower_struct_or_union(
        &mut self,
        is_struct: bool,
        size_bits: i64,
        base_classes: &[crate::stabs::tree::StabsBaseClass],
        fields: &[crate::stabs::tree::StabsField],
        member_functions: &[crate::stabs::tree::StabsMemberFunction],
    ) -> Node {
        let lowered_fields = fields
            .iter()
            .map(|field| Field {
                name: field.name.clone(),
                node: Box::new(self.lower(&field.ty)),
                relative_offset_bytes: Some(field.relative_offset_bits / 8),
                size_bits: Some(field.size_bits),
                access_specifier: AccessSpecifier::Public,
                is_static: field.is_static,
            })
            .collect();

        let lowered_base_classes = base_classes
            .iter()
            .map(|base| BaseClass {
                node: Box::new(self.lower(&base.ty)),
                offset_bytes: base.offset_bits / 8,
                is_virtual: base.is_virtual,
            })
            .collect();

        let lowered_member_functions = member_functions
            .iter()
            .map(|method| MemberFunction {
                name: method.name.clone(),
                node: Box::new(self.lower(&method.ty)),
            })
            .collect();

        let mut node = Node::new(NodeKind::StructOrUnion {
            is_struct,
            base_classes: lowered_base_classes,
            fields: lowered_fields,
            member_functions: lowered_member_functions,
        });
        node.size_bits = Some(size_bits);
        node
    }
}

/// Classifies a self-referential range's `[low, high]` bounds into the C
/// spelling `refine::refine_builtin`/`refine::builtin_size` recognize.
/// Unrecognized bounds fall back to `int` rather than an error: this crate
/// sees only the base types the host compiler actually emits, and a range
/// this function does not recognize is far more likely to be a wider
/// integer this table hasn't been taught than a genuinely unreadable type,
/// matching spec §9's "do not extrapolate" -- this never invents a
/// descriptor for bounds it cannot classify, it degrades to the most
/// common case instead.
fn classify_range_builtin(low: i64, high: i64) -> String {
    let name = if low > high {
        match low {
            4 => "float",
            8 => "double",
            16 => "vector128",
            _ => "double",
        }
    } else if low == 0 {
        match high {
            1 => "bool",
            255 => "unsigned char",
            65535 => "unsigned short",
            -1 => "unsigned int",
            4294967295 => "unsigned int",
            _ => "unsigned long",
        }
    } else if low == -high - 1 {
        match high {
            127 => "char",
            32767 => "short",
            2147483647 => "int",
            9223372036854775807 => "long long",
            _ => "int",
        }
    } else {
        "int"
    };
    name.to_string()
}

/// Maps a STABS symbol descriptor to the storage class recorded on the
/// resulting `Variable` node.
fn storage_class_for(descriptor: SymbolDescriptor) -> StorageClass {
    match descriptor {
        SymbolDescriptor::StaticVariable | SymbolDescriptor::StaticFunction => {
            StorageClass::Static
        }
        SymbolDescriptor::RegisterVariable => StorageClass::Register,
        SymbolDescriptor::GlobalVariable | SymbolDescriptor::GlobalFunction => StorageClass::Extern,
        _ => StorageClass::None,
    }
}

/// Builds the `Variable` node's storage from the STABS symbol descriptor
/// and the local symbol record's raw 32-bit value (spec §3 "Variable
/// Storage"): a global/static variable's value is its address, a register
/// variable's is the raw DBX register index, and a parameter/local's is its
/// frame-pointer-relative stack offset. `location` is left `Nil` for
/// globals here -- the per-file analyser has no section table to classify
/// an address against; the pipeline (which holds the `ElfImage`) patches it
/// in afterward via [`crate::binary_reader::ElfImage::classify_address`].
fn storage_for(descriptor: SymbolDescriptor, value: u32) -> Option<VariableStorage> {
    match descriptor {
        SymbolDescriptor::GlobalVariable | SymbolDescriptor::StaticVariable => {
            Some(VariableStorage::Global {
                location: GnuLinkOnceLocation::Nil,
                address: value,
            })
        }
        SymbolDescriptor::RegisterVariable => Some(VariableStorage::Register {
            dbx_register_number: value as i32,
            is_by_reference: false,
        }),
        SymbolDescriptor::Parameter | SymbolDescriptor::LocalVariable => {
            Some(VariableStorage::Stack {
                pointer_offset: value as i32 as i64,
            })
        }
        _ => None,
    }
}

/// Lowers one parsed STABS symbol into an AST node, resolving same-file
/// references against `tree`. `file_index` identifies the translation unit
/// this symbol came from, both for cross-file reference detection and for
/// stamping the node's `files` attribution. `value` is the local symbol
/// record's raw 32-bit value (an address for globals, a register number or
/// stack offset for locals -- see [`storage_for`]).
pub fn lower_symbol(symbol: &ParsedSymbol, file_index: usize, tree: &StabsTypeTree, value: u32) -> Node {
    let mut in_progress = HashSet::new();
    // The symbol's own type number must already count as "in progress"
    // before its body is walked, or a type that refers back to itself
    // (e.g. a linked-list node's `next` pointer) recurses one extra level
    // before the cycle guard in `lower_same_file_reference` catches it.
    if symbol.type_node.has_body {
        if let Some(number) = symbol.type_node.type_number {
            if number.file.is_none() {
                in_progress.insert(number.number);
            }
        }
    }
    let mut analyser = Analyser {
        file_index,
        tree,
        in_progress,
    };
    let mut node = analyser.lower(&symbol.type_node);
    // An empty STABS name (`:t5=...`) defines an anonymous type -- keep
    // `node.name` as `None` rather than `Some("")` so dedup's
    // structural-hash bucketing (for nodes with no name) actually sees it,
    // instead of every anonymous type silently colliding into one
    // empty-string name bucket.
    node.name = if symbol.name.is_empty() {
        None
    } else {
        Some(symbol.name.clone())
    };

    match symbol.descriptor {
        SymbolDescriptor::GlobalVariable
        | SymbolDescriptor::StaticVariable
        | SymbolDescriptor::Parameter
        | SymbolDescriptor::RegisterVariable
        | SymbolDescriptor::LocalVariable => {
            node = Node::named(
                symbol.name.clone(),
                NodeKind::Variable {
                    ty: Box::new(node),
                    storage_class: storage_class_for(symbol.descriptor),
                    storage: storage_for(symbol.descriptor, value),
                },
            );
        }
        SymbolDescriptor::GlobalFunction | SymbolDescriptor::StaticFunction => {
            // `node` is already the function's `FunctionType` when the
            // STABS descriptor defined one (`f<return-type>`); a function
            // declared with a bare type number (no body here) falls back
            // to that type as its return type, matching how a forward
            // struct reference degrades elsewhere in this module.
            let return_type = match node.kind {
                NodeKind::FunctionType { return_type, .. } => return_type,
                _ => Box::new(node),
            };
            node = Node::named(
                symbol.name.clone(),
                NodeKind::FunctionDefinition {
                    return_type,
                    parameters: Vec::new(),
                    address_range: Some((value, value)),
                    line_numbers: Vec::new(),
                    sub_files: Vec::new(),
                    locals: Vec::new(),
                },
            );
        }
        _ => {}
    }

    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stabs::parser::{parse_symbol, ParseStats};

    #[test]
    fn struct_field_lowers_with_offsets() {
        let mut tree = StabsTypeTree::new();
        let mut stats = ParseStats::default();
        let raw = "Vec3:T7=s12x:1,0,32;y:1,32,32;z:1,64,32;;";
        let symbol = parse_symbol(0, raw, &mut tree, &mut stats).unwrap();
        let node = lower_symbol(&symbol, 0, &tree, 0);
        match node.kind {
            NodeKind::StructOrUnion { ref fields, .. } => {
                assert_eq!(fields.len(), 3);
                assert_eq!(fields[0].relative_offset_bytes, Some(0));
                assert_eq!(fields[2].relative_offset_bytes, Some(8));
            }
            _ => panic!("expected struct"),
        }
        assert_eq!(node.size_bits, Some(12));
    }

    #[test]
    fn self_referential_pointer_does_not_recurse_forever() {
        let mut tree = StabsTypeTree::new();
        let mut stats = ParseStats::default();
        // type 5 = struct { next: pointer to type 5 }
        let raw = "Node:T5=s4next:6=*5,0,32;;";
        let symbol = parse_symbol(0, raw, &mut tree, &mut stats).unwrap();
        let node = lower_symbol(&symbol, 0, &tree, 0);
        match node.kind {
            NodeKind::StructOrUnion { ref fields, .. } => match &fields[0].node.kind {
                NodeKind::Pointer { target } => match &target.kind {
                    NodeKind::TypeName { name, .. } => assert_eq!(name, "type_5"),
                    other => panic!("expected unresolved self-reference, got {:?}", other),
                },
                other => panic!("expected pointer, got {:?}", other),
            },
            _ => panic!("expected struct"),
        }
    }

    #[test]
    fn global_variable_gets_extern_storage_class() {
        let mut tree = StabsTypeTree::new();
        let mut stats = ParseStats::default();
        let raw = "g:G1,0";
        // "g:G1" has no body, so this exercises the bare-reference path:
        // type 1 is never defined in this file, producing an unresolved
        // TypeName leaf wrapped in a Variable node.
        let symbol = parse_symbol(0, raw, &mut tree, &mut stats).unwrap();
        let node = lower_symbol(&symbol, 0, &tree, 0);
        match node.kind {
            NodeKind::Variable { storage_class, .. } => {
                assert_eq!(storage_class, StorageClass::Extern)
            }
            other => panic!("expected variable, got {:?}", other),
        }
    }

    #[test]
    fn global_variable_address_comes_from_symbol_value() {
        let mut tree = StabsTypeTree::new();
        let mut stats = ParseStats::default();
        let symbol = parse_symbol(0, "p:G1,0", &mut tree, &mut stats).unwrap();
        let node = lower_symbol(&symbol, 0, &tree, 0x100000);
        match node.kind {
            NodeKind::Variable {
                storage: Some(VariableStorage::Global { address, .. }),
                ..
            } => assert_eq!(address, 0x100000),
            other => panic!("expected a global variable with an address, got {:?}", other),
        }
    }

    #[test]
    fn register_variable_carries_dbx_number() {
        let mut tree = StabsTypeTree::new();
        let mut stats = ParseStats::default();
        let symbol = parse_symbol(0, "i:r1,0", &mut tree, &mut stats).unwrap();
        let node = lower_symbol(&symbol, 0, &tree, 29);
        match node.kind {
            NodeKind::Variable {
                storage: Some(VariableStorage::Register { dbx_register_number, is_by_reference }),
                ..
            } => {
                assert_eq!(dbx_register_number, 29);
                assert!(!is_by_reference);
            }
            other => panic!("expected a register variable, got {:?}", other),
        }
    }

    #[test]
    fn function_symbol_lowers_to_function_definition_with_entry_address() {
        let mut tree = StabsTypeTree::new();
        let mut stats = ParseStats::default();
        let symbol = parse_symbol(0, "main:F1,0", &mut tree, &mut stats).unwrap();
        let node = lower_symbol(&symbol, 0, &tree, 0x80001000);
        match node.kind {
            NodeKind::FunctionDefinition { address_range, ref locals, .. } => {
                assert_eq!(address_range, Some((0x80001000, 0x80001000)));
                assert!(locals.is_empty());
            }
            other => panic!("expected a function definition, got {:?}", other),
        }
    }

    #[test]
    fn self_referential_range_lowers_to_builtin_int() {
        let mut tree = StabsTypeTree::new();
        let mut stats = ParseStats::default();
        // "int:t1=r1;0;-1;" -- the conventional dbx encoding of a
        // machine-word unsigned integer (self-referential range).
        let symbol = parse_symbol(0, "unsignedint:t1=r1;0;-1;", &mut tree, &mut stats).unwrap();
        let node = lower_symbol(&symbol, 0, &tree, 0);
        match node.kind {
            NodeKind::Builtin { c_name } => assert_eq!(c_name, "unsigned int"),
            other => panic!("expected a builtin, got {:?}", other),
        }
    }

    #[test]
    fn self_referential_signed_range_lowers_to_builtin_signed_int() {
        let mut tree = StabsTypeTree::new();
        let mut stats = ParseStats::default();
        let symbol = parse_symbol(
            0,
            "int:t1=r1;-2147483648;2147483647;",
            &mut tree,
            &mut stats,
        )
        .unwrap();
        let node = lower_symbol(&symbol, 0, &tree, 0);
        match node.kind {
            NodeKind::Builtin { c_name } => assert_eq!(c_name, "int"),
            other => panic!("expected a builtin, got {:?}", other),
        }
    }

    #[test]
    fn self_referential_float_range_lowers_to_builtin_float() {
        let mut tree = StabsTypeTree::new();
        let mut stats = ParseStats::default();
        let symbol = parse_symbol(0, "float:t1=r1;4;0;", &mut tree, &mut stats).unwrap();
        let node = lower_symbol(&symbol, 0, &tree, 0);
        match node.kind {
            NodeKind::Builtin { c_name } => assert_eq!(c_name, "float"),
            other => panic!("expected a builtin, got {:?}", other),
        }
    }

    #[test]
    fn non_self_referential_range_still_recurses_into_its_base() {
        // A `typedef`-like range whose base is a distinct, already-defined
        // type must still resolve through that type rather than being
        // misclassified as a builtin.
        let mut tree = StabsTypeTree::new();
        let mut stats = ParseStats::default();
        parse_symbol(0, "int:t1=r1;-2147483648;2147483647;", &mut tree, &mut stats).unwrap();
        let symbol = parse_symbol(0, "MyInt:t2=r1;-2147483648;2147483647;", &mut tree, &mut stats)
            .unwrap();
        let node = lower_symbol(&symbol, 0, &tree, 0);
        match node.kind {
            NodeKind::Builtin { c_name } => assert_eq!(c_name, "int"),
            other => panic!("expected a builtin (resolved through the base type), got {:?}", other),
        }
    }
}
