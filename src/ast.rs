//! C4/C5's output shape: a resolved, deduplicated C/C++ type AST (spec §3
//! "AST").
//!
//! A closed tagged-variant tree rather than the STABS tree's per-descriptor
//! recursion -- grounded in `original_source/ccc/ast.cpp`'s
//! `AstNodeDescriptor` switch (`LEAF`/`ENUM`/`STRUCT`/`UNION`/`TYPEDEF`),
//! widened with the richer node kinds `original_source/ccc/symbol_table.h`'s
//! `DataType`/`Function`/`GlobalVariable` model implies once pointers,
//! references, bitfields and function signatures need first-class
//! representation rather than collapsing to a rendered type-name string.

use crate::binary_reader::GnuLinkOnceLocation;
use crate::stabs::tree::CrossReferenceKind;

/// Per-member C storage class, set on `Variable` nodes (spec §4.4).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StorageClass {
    None,
    Static,
    Register,
    Extern,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessSpecifier {
    Public,
    Protected,
    Private,
}

/// A struct/union field, carrying both its type and its placement.
#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub node: Box<Node>,
    pub relative_offset_bytes: Option<i64>,
    pub size_bits: Option<i64>,
    pub access_specifier: AccessSpecifier,
    /// Set for a STABS static data member (`name:type:physname;`, no
    /// in-object offset/size). Data refinement (C7) skips these -- they
    /// have no storage inside the struct's own bytes (spec §4.6 "Static
    /// members are skipped").
    pub is_static: bool,
}

#[derive(Clone, Debug)]
pub struct BaseClass {
    pub node: Box<Node>,
    pub offset_bytes: i64,
    pub is_virtual: bool,
}

#[derive(Clone, Debug)]
pub struct MemberFunction {
    pub name: String,
    pub node: Box<Node>,
}

/// A variable's storage (spec §3 "Variable Storage"): where the debugger
/// has to look to find its value. Distinct from [`StorageClass`], which
/// records the C linkage keyword (`static`/`extern`/...) rather than where
/// the bytes live.
#[derive(Clone, Debug, PartialEq)]
pub enum VariableStorage {
    /// A fixed address in the image, classified by the section that owns
    /// it. `location` is `Bss`/`Sbss` for zero-initialized storage, which
    /// data refinement (C7) skips rather than reading.
    Global { location: GnuLinkOnceLocation, address: u32 },
    /// Lives in a register for its whole lifetime (or, if
    /// `is_by_reference`, the register holds a pointer to it). `
    /// dbx_register_number` is the raw STABS register index, mapped via
    /// [`crate::registers::map_dbx_register_index`].
    Register {
        dbx_register_number: i32,
        is_by_reference: bool,
    },
    /// A signed offset from the function's frame/stack pointer.
    Stack { pointer_offset: i64 },
}

/// The C/C++ meaning of one node in the AST (spec §3's closed node-kind
/// list). `StructOrUnion` folds `STRUCT`/`UNION` into one variant with a
/// `is_struct` flag, mirroring `ast.cpp`'s `struct_or_union_node` helper.
#[derive(Clone, Debug)]
pub enum NodeKind {
    /// A scalar builtin (`int`, `float`, `char`, ...), named as its C
    /// spelling -- the "LEAF" case in `ast.cpp` once it isn't a reference to
    /// something else.
    Builtin { c_name: String },
    Array {
        element: Box<Node>,
        element_count: i64,
    },
    /// A field occupying fewer bits than its declared type, annotated with
    /// the bit range it actually occupies.
    Bitfield {
        underlying: Box<Node>,
        offset_bits: i64,
        size_bits: i64,
    },
    Enum {
        constants: Vec<(String, i64)>,
    },
    StructOrUnion {
        is_struct: bool,
        base_classes: Vec<BaseClass>,
        fields: Vec<Field>,
        member_functions: Vec<MemberFunction>,
    },
    Pointer {
        target: Box<Node>,
    },
    Reference {
        target: Box<Node>,
    },
    PointerToDataMember {
        class_type: Box<Node>,
        member_type: Box<Node>,
    },
    FunctionType {
        return_type: Box<Node>,
        parameters: Vec<Node>,
    },
    /// A function's defining symbol (spec §3's `FunctionDefinition`). The
    /// entry address is tracked; the high end of `address_range` is not,
    /// since this crate doesn't materialize `.mdebug` procedure descriptors
    /// (see `mdebug`'s module doc) -- `address_range` is always `(addr,
    /// addr)` when known. `line_numbers`, `sub_files`, and `locals` are
    /// always empty for the same reason: populating them needs the
    /// procedure-descriptor/line-number tables and a scope-stack walk over
    /// `Block`/`End` symbol-type boundaries that this crate's per-file
    /// analyser does not perform yet.
    FunctionDefinition {
        return_type: Box<Node>,
        parameters: Vec<Node>,
        address_range: Option<(u32, u32)>,
        line_numbers: Vec<u32>,
        sub_files: Vec<String>,
        locals: Vec<Node>,
    },
    /// A global/local/parameter variable declaration.
    Variable {
        ty: Box<Node>,
        storage_class: StorageClass,
        storage: Option<VariableStorage>,
    },
    /// An unresolved reference to a type by name, either a same-file
    /// forward reference not yet deduplicated or a cross-reference whose
    /// target lives in another translation unit (spec §5's "TypeName"
    /// output of the per-file analyser, before C5 rewrites it to point at
    /// the canonical node).
    TypeName {
        name: String,
        cross_reference_kind: Option<CrossReferenceKind>,
        /// Filled in by C5 once the name has been resolved to a single
        /// canonical definition; `None` means resolution failed or has not
        /// run yet.
        canonical_index: Option<usize>,
    },
    SourceFile {
        path: String,
        data_types: Vec<Node>,
        functions: Vec<Node>,
        global_variables: Vec<Node>,
    },
}

/// One AST node plus the attributes every kind of node can carry (spec §3).
/// Not every field is meaningful for every `kind` -- e.g. `size_bits` is
/// normally absent on a `Variable` node, since its size comes from its `ty`.
#[derive(Clone, Debug)]
pub struct Node {
    pub name: Option<String>,
    pub kind: NodeKind,
    pub size_bits: Option<i64>,
    pub is_const: bool,
    pub is_volatile: bool,
    /// The STABS type number this node was parsed from, kept for
    /// diagnostics and for the dedup pass's reference-rewriting step.
    pub stabs_type_number: Option<i32>,
    /// Every source file this exact node was encountered while parsing,
    /// before deduplication collapses identical trees across files (spec
    /// §5's "multiple files" invariant).
    pub files: Vec<usize>,
    /// Set by the file-attribution engine (C6) when heuristics conclude a
    /// struct/union/enum is probably only ever defined in a `.cpp`, not
    /// shared through a header.
    pub probably_defined_in_cpp_file: bool,
    /// Cycle-detection guard used while walking the tree for structural
    /// hashing/equality (C5) and data refinement (C7): set on entry to a
    /// node's traversal, cleared on exit, and checked so that a
    /// self-referential struct (e.g. a linked-list node) does not recurse
    /// forever.
    pub is_currently_processing: bool,
}

impl Node {
    pub fn new(kind: NodeKind) -> Node {
        Node {
            name: None,
            kind,
            size_bits: None,
            is_const: false,
            is_volatile: false,
            stabs_type_number: None,
            files: Vec::new(),
            probably_defined_in_cpp_file: false,
            is_currently_processing: false,
        }
    }

    pub fn named(name: impl Into<String>, kind: NodeKind) -> Node {
        Node {
            name: Some(name.into()),
            ..Node::new(kind)
        }
    }
}
