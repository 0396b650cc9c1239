//! C3: the per-file, unresolved Stabs Type Tree (spec §3 "Stabs Type Tree").
//!
//! Mirrors `original_source/ccc/ast.cpp`'s `StabsType`/`StabsTypeDescriptor`
//! switch: every distinct numeric identity is stored once per file keyed by
//! `(file_index, type_number)`, and uses elsewhere are numeric references,
//! never structural ones -- cycles in the logical type graph never become
//! cycles in the owned tree.

use std::collections::HashMap;

/// Either `N` or `(file,N)` (spec §4.2).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeNumber {
    /// `None` means "this file" -- the plain `N` form.
    pub file: Option<i32>,
    pub number: i32,
}

impl TypeNumber {
    pub fn same_file(number: i32) -> TypeNumber {
        TypeNumber { file: None, number }
    }

    pub fn resolve_file(self, current_file: i32) -> (i32, i32) {
        (self.file.unwrap_or(current_file), self.number)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CrossReferenceKind {
    Struct,
    Union,
    Enum,
}

#[derive(Clone, Debug)]
pub struct StabsField {
    pub name: String,
    pub relative_offset_bits: i64,
    pub size_bits: i64,
    pub ty: Box<StabsTypeNode>,
    pub is_static: bool,
}

#[derive(Clone, Debug)]
pub struct StabsBaseClass {
    pub is_virtual: bool,
    pub offset_bits: i64,
    pub ty: Box<StabsTypeNode>,
}

#[derive(Clone, Debug)]
pub struct StabsMemberFunction {
    pub name: String,
    pub ty: Box<StabsTypeNode>,
}

/// One parsed descriptor body. The character column in spec §4.2's table.
#[derive(Clone, Debug)]
pub enum StabsDescriptor {
    /// (digit) Reference to another type number, possibly in another file.
    TypeReference(TypeNumber),
    /// `a`
    Array {
        index_type: Box<StabsTypeNode>,
        element_type: Box<StabsTypeNode>,
    },
    /// `r`
    Range {
        base_type: Box<StabsTypeNode>,
        low: i64,
        high: i64,
    },
    /// `f`
    Function { return_type: Box<StabsTypeNode> },
    /// `s` / `u`
    StructOrUnion {
        is_struct: bool,
        size_bits: i64,
        base_classes: Vec<StabsBaseClass>,
        fields: Vec<StabsField>,
        member_functions: Vec<StabsMemberFunction>,
    },
    /// `e`
    Enum { constants: Vec<(String, i64)> },
    /// `x`
    CrossReference {
        kind: CrossReferenceKind,
        identifier: String,
    },
    /// `&`
    Reference { target: Box<StabsTypeNode> },
    /// `*`
    Pointer { target: Box<StabsTypeNode> },
    /// `@`
    PointerToDataMember {
        class_type: Box<StabsTypeNode>,
        member_type: Box<StabsTypeNode>,
    },
    /// A type descriptor this parser recognized syntactically but whose
    /// payload it could not make sense of; localized per spec §4.2's
    /// "Failure modes" rather than aborting the file.
    Error(String),
}

#[derive(Clone, Debug)]
pub struct StabsTypeNode {
    pub name: Option<String>,
    pub type_number: Option<TypeNumber>,
    pub has_body: bool,
    pub descriptor: StabsDescriptor,
}

impl StabsTypeNode {
    pub fn reference(number: TypeNumber) -> StabsTypeNode {
        StabsTypeNode {
            name: None,
            type_number: Some(number),
            has_body: false,
            descriptor: StabsDescriptor::TypeReference(number),
        }
    }

    pub fn error(message: impl Into<String>) -> StabsTypeNode {
        StabsTypeNode {
            name: None,
            type_number: None,
            has_body: false,
            descriptor: StabsDescriptor::Error(message.into()),
        }
    }
}

/// The per-file unresolved type tree: every type with a body, keyed by its
/// type number within the file (invariant 1 of spec §3: unique per file
/// while parsing).
#[derive(Default, Debug)]
pub struct StabsTypeTree {
    pub types: HashMap<i32, StabsTypeNode>,
}

impl StabsTypeTree {
    pub fn new() -> StabsTypeTree {
        StabsTypeTree::default()
    }

    pub fn insert(&mut self, number: i32, node: StabsTypeNode) {
        self.types.insert(number, node);
    }

    pub fn get(&self, number: i32) -> Option<&StabsTypeNode> {
        self.types.get(&number)
    }
}
