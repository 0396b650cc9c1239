//! C3: produces a per-file, unresolved Stabs Type Tree from STABS value
//! strings (spec §4.2/§4.3).
//!
//! Grammar followed for struct/union field lists and base-class lists
//! matches the conventional GNU/AIX stabs encoding (`name:type,offset,size;`
//! fields terminated by a bare `;`, optional leading `!count,` base-class
//! list) -- spec.md leaves the exact wire grammar unspecified beyond the
//! descriptor-character table, so this crate is internally consistent with
//! itself and is exercised entirely by the unit tests in this module rather
//! than against real compiler output (none is present in this pack).

use super::lexer::{parse_signed, parse_type_number, split_name};
use super::tree::{
    CrossReferenceKind, StabsBaseClass, StabsDescriptor, StabsField, StabsMemberFunction,
    StabsTypeNode, StabsTypeTree, TypeNumber,
};

/// STABS "symbol descriptor" -- the leading character of a symbol's value
/// string, distinct from the type descriptor characters in spec §4.2's
/// table. Classifies what kind of thing this stab defines.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SymbolDescriptor {
    /// `t` -- defines a typedef name for the following type.
    TypeName,
    /// `T` -- defines/mentions a struct, union, or enum tag.
    Tag,
    /// `G` -- a global variable.
    GlobalVariable,
    /// `S` -- a file-static variable.
    StaticVariable,
    /// `F` -- a globally visible function definition.
    GlobalFunction,
    /// `f` -- a file-static function definition.
    StaticFunction,
    /// `p` -- a function parameter.
    Parameter,
    /// `r` -- a register-resident local variable.
    RegisterVariable,
    /// a local (stack) variable.
    LocalVariable,
    /// Any other descriptor character this crate does not give special
    /// handling to; carried through rather than treated as corrupt.
    Other(char),
}

impl SymbolDescriptor {
    fn from_char(c: char) -> SymbolDescriptor {
        match c {
            't' => SymbolDescriptor::TypeName,
            'T' => SymbolDescriptor::Tag,
            'G' => SymbolDescriptor::GlobalVariable,
            'S' | 'V' => SymbolDescriptor::StaticVariable,
            'F' => SymbolDescriptor::GlobalFunction,
            'f' => SymbolDescriptor::StaticFunction,
            'p' => SymbolDescriptor::Parameter,
            'r' => SymbolDescriptor::RegisterVariable,
            'l' => SymbolDescriptor::LocalVariable,
            other => SymbolDescriptor::Other(other),
        }
    }
}

/// Counts localized parse failures (spec §7's "error counter"). Never
/// aborts parsing; every corrupt stab just increments this and is dropped.
#[derive(Default, Debug, Clone, Copy)]
pub struct ParseStats {
    pub errors: u32,
}

impl ParseStats {
    fn note_error(&mut self) {
        self.errors += 1;
        log::warn!("dropped a corrupt STABS symbol (error count = {})", self.errors);
    }
}

pub struct ParsedSymbol {
    pub name: String,
    pub descriptor: SymbolDescriptor,
    pub type_node: StabsTypeNode,
}

/// Parses one STABS value string (`"name:descriptor<type-expr>"`). Returns
/// `None` and increments `stats.errors` if the string is malformed -- the
/// caller (C4, the per-file analyser) simply skips this symbol and moves to
/// the next one, per spec §4.2's localized failure policy.
pub fn parse_symbol(
    file_index: i32,
    raw: &str,
    tree: &mut StabsTypeTree,
    stats: &mut ParseStats,
) -> Option<ParsedSymbol> {
    let (name, rest) = match split_name(raw) {
        Some(v) => v,
        None => {
            stats.note_error();
            return None;
        }
    };
    let mut chars = rest.char_indices();
    let (_, descriptor_char) = chars.next()?;
    let type_expr = &rest[descriptor_char.len_utf8()..];

    let type_node = match parse_type_expression(file_index, type_expr, tree, stats) {
        Some((node, _remaining)) => node,
        None => {
            stats.note_error();
            return None;
        }
    };

    Some(ParsedSymbol {
        name: name.to_string(),
        descriptor: SymbolDescriptor::from_char(descriptor_char),
        type_node,
    })
}

/// Parses one type expression: a type number, optionally followed by
/// `=<descriptor><payload>` defining its body. Returns the parsed node and
/// the unconsumed remainder of `s`. If the expression defines a body (the
/// `N=...` form) and the type number belongs to this file, the node is also
/// recorded in `tree`.
fn parse_type_expression<'a>(
    file_index: i32,
    s: &'a str,
    tree: &mut StabsTypeTree,
    stats: &mut ParseStats,
) -> Option<(StabsTypeNode, &'a str)> {
    let (number, rest) = parse_type_number(s)?;

    let rest = match rest.strip_prefix('=') {
        Some(body) => body,
        None => {
            // Bare reference: "N" with no body defined here.
            return Some((StabsTypeNode::reference(number), rest));
        }
    };

    let mut descriptor_chars = rest.char_indices();
    let (_, descriptor_char) = descriptor_chars.next()?;
    let payload = &rest[descriptor_char.len_utf8()..];

    let (descriptor, remaining) = match descriptor_char {
        'a' => parse_array(file_index, payload, tree, stats)?,
        'r' => parse_range(file_index, payload, tree, stats)?,
        'f' => parse_function(file_index, payload, tree, stats)?,
        's' | 'u' => parse_struct_or_union(file_index, descriptor_char == 's', payload, tree, stats)?,
        'e' => parse_enum(payload)?,
        'x' => parse_cross_reference(payload)?,
        '&' => parse_reference(file_index, payload, tree, stats)?,
        '*' => parse_pointer(file_index, payload, tree, stats)?,
        '@' => parse_pointer_to_member(file_index, payload, tree, stats)?,
        d if d.is_ascii_digit() || d == '-' || d == '(' => {
            // "N=M" aliasing form (plain typedefs without their own
            // descriptor character): recurse into the aliased expression.
            let (inner, remaining) = parse_type_expression(file_index, rest, tree, stats)?;
            let node = StabsTypeNode {
                name: inner.name.clone(),
                type_number: Some(number),
                has_body: inner.has_body,
                descriptor: inner.descriptor.clone(),
            };
            if number.file.is_none() || number.file == Some(file_index) {
                tree.insert(number.number, node.clone());
            }
            return Some((node, remaining));
        }
        _ => {
            stats.note_error();
            (StabsDescriptor::Error(format!("unknown type descriptor '{}'", descriptor_char)), payload)
        }
    };

    let node = StabsTypeNode {
        name: None,
        type_number: Some(number),
        has_body: true,
        descriptor,
    };
    if number.file.is_none() || number.file == Some(file_index) {
        tree.insert(number.number, node.clone());
    }
    Some((node, remaining))
}

fn parse_array<'a>(
    file_index: i32,
    s: &'a str,
    tree: &mut StabsTypeTree,
    stats: &mut ParseStats,
) -> Option<(StabsDescriptor, &'a str)> {
    let (index_type, rest) = parse_type_expression(file_index, s, tree, stats)?;
    let rest = rest.strip_prefix(';')?;
    let (element_type, rest) = parse_type_expression(file_index, rest, tree, stats)?;
    Some((
        StabsDescriptor::Array {
            index_type: Box::new(index_type),
            element_type: Box::new(element_type),
        },
        rest,
    ))
}

fn parse_range<'a>(
    file_index: i32,
    s: &'a str,
    tree: &mut StabsTypeTree,
    stats: &mut ParseStats,
) -> Option<(StabsDescriptor, &'a str)> {
    let (base_type, rest) = parse_type_expression(file_index, s, tree, stats)?;
    let rest = rest.strip_prefix(';')?;
    let (low, rest) = parse_signed(rest)?;
    let rest = rest.strip_prefix(';')?;
    let (high, rest) = parse_signed(rest)?;
    let rest = rest.strip_prefix(';').unwrap_or(rest);
    Some((
        StabsDescriptor::Range {
            base_type: Box::new(base_type),
            low,
            high,
        },
        rest,
    ))
}

fn parse_function<'a>(
    file_index: i32,
    s: &'a str,
    tree: &mut StabsTypeTree,
    stats: &mut ParseStats,
) -> Option<(StabsDescriptor, &'a str)> {
    let (return_type, rest) = parse_type_expression(file_index, s, tree, stats)?;
    Some((
        StabsDescriptor::Function {
            return_type: Box::new(return_type),
        },
        rest,
    ))
}

fn parse_struct_or_union<'a>(
    file_index: i32,
    is_struct: bool,
    s: &'a str,
    tree: &mut StabsTypeTree,
    stats: &mut ParseStats,
) -> Option<(StabsDescriptor, &'a str)> {
    let (size_bits, mut rest) = parse_signed(s)?;

    let mut base_classes = Vec::new();
    if let Some(after_bang) = rest.strip_prefix('!') {
        let (count, after_count) = parse_signed(after_bang)?;
        let mut cursor = after_count.strip_prefix(',').unwrap_or(after_count);
        for _ in 0..count {
            let (offset_bits, after_offset) = parse_signed(cursor)?;
            let after_comma = after_offset.strip_prefix(',')?;
            let (ty, after_ty) = parse_type_expression(file_index, after_comma, tree, stats)?;
            cursor = after_ty.strip_prefix(';').unwrap_or(after_ty);
            base_classes.push(StabsBaseClass {
                is_virtual: false,
                offset_bits,
                ty: Box::new(ty),
            });
        }
        rest = cursor.strip_prefix(',').unwrap_or(cursor);
    }

    let mut fields = Vec::new();
    loop {
        if let Some(after_semi) = rest.strip_prefix(';') {
            rest = after_semi;
            break;
        }
        let (field_name, after_name) = split_name(rest)?;
        let (ty, after_ty) = parse_type_expression(file_index, after_name, tree, stats)?;
        if let Some(after_colon) = after_ty.strip_prefix(':') {
            // Static data member: `name:type:physname;` -- no in-object
            // offset/size terms at all (spec.md line 123 / SPEC_FULL.md
            // §4.6's "Static members are skipped" during refinement).
            let semi = after_colon.find(';')?;
            rest = &after_colon[semi + 1..];
            fields.push(StabsField {
                name: field_name.to_string(),
                relative_offset_bits: 0,
                size_bits: 0,
                ty: Box::new(ty),
                is_static: true,
            });
            continue;
        }
        let after_comma1 = after_ty.strip_prefix(',')?;
        let (offset, after_offset) = parse_signed(after_comma1)?;
        let after_comma2 = after_offset.strip_prefix(',')?;
        let (size, after_size) = parse_signed(after_comma2)?;
        rest = after_size.strip_prefix(';')?;
        fields.push(StabsField {
            name: field_name.to_string(),
            relative_offset_bits: offset,
            size_bits: size,
            ty: Box::new(ty),
            is_static: false,
        });
    }

    let member_functions = Vec::new();

    Some((
        StabsDescriptor::StructOrUnion {
            is_struct,
            size_bits,
            base_classes,
            fields,
            member_functions: member_functions as Vec<StabsMemberFunction>,
        },
        rest,
    ))
}

fn parse_enum(s: &str) -> Option<(StabsDescriptor, &str)> {
    let mut rest = s;
    let mut constants = Vec::new();
    loop {
        if let Some(after_semi) = rest.strip_prefix(';') {
            rest = after_semi;
            break;
        }
        let (name, after_name) = split_name(rest)?;
        let (value, after_value) = parse_signed(after_name)?;
        rest = after_value.strip_prefix(',')?;
        constants.push((name.to_string(), value));
    }
    Some((StabsDescriptor::Enum { constants }, rest))
}

fn parse_cross_reference(s: &str) -> Option<(StabsDescriptor, &str)> {
    let mut chars = s.char_indices();
    let (_, kind_char) = chars.next()?;
    let kind = match kind_char {
        's' => CrossReferenceKind::Struct,
        'u' => CrossReferenceKind::Union,
        'e' => CrossReferenceKind::Enum,
        _ => return None,
    };
    let rest = &s[kind_char.len_utf8()..];
    let end = rest.find(':').unwrap_or(rest.len());
    let identifier = rest[..end].to_string();
    let remaining = if end < rest.len() { &rest[end + 1..] } else { "" };
    Some((
        StabsDescriptor::CrossReference { kind, identifier },
        remaining,
    ))
}

fn parse_reference<'a>(
    file_index: i32,
    s: &'a str,
    tree: &mut StabsTypeTree,
    stats: &mut ParseStats,
) -> Option<(StabsDescriptor, &'a str)> {
    let (target, rest) = parse_type_expression(file_index, s, tree, stats)?;
    Some((
        StabsDescriptor::Reference {
            target: Box::new(target),
        },
        rest,
    ))
}

fn parse_pointer<'a>(
    file_index: i32,
    s: &'a str,
    tree: &mut StabsTypeTree,
    stats: &mut ParseStats,
) -> Option<(StabsDescriptor, &'a str)> {
    let (target, rest) = parse_type_expression(file_index, s, tree, stats)?;
    Some((
        StabsDescriptor::Pointer {
            target: Box::new(target),
        },
        rest,
    ))
}

fn parse_pointer_to_member<'a>(
    file_index: i32,
    s: &'a str,
    tree: &mut StabsTypeTree,
    stats: &mut ParseStats,
) -> Option<(StabsDescriptor, &'a str)> {
    let (class_type, rest) = parse_type_expression(file_index, s, tree, stats)?;
    let rest = rest.strip_prefix(',')?;
    let (member_type, rest) = parse_type_expression(file_index, rest, tree, stats)?;
    Some((
        StabsDescriptor::PointerToDataMember {
            class_type: Box::new(class_type),
            member_type: Box::new(member_type),
        },
        rest,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_struct_with_two_fields() {
        let mut tree = StabsTypeTree::new();
        let mut stats = ParseStats::default();
        let raw = "Vec3:T7=s12x:1,0,32;y:1,32,32;z:1,64,32;;";
        let symbol = parse_symbol(0, raw, &mut tree, &mut stats).expect("parse ok");
        assert_eq!(symbol.name, "Vec3");
        assert_eq!(symbol.descriptor, SymbolDescriptor::Tag);
        match symbol.type_node.descriptor {
            StabsDescriptor::StructOrUnion { is_struct, size_bits, ref fields, .. } => {
                assert!(is_struct);
                assert_eq!(size_bits, 12);
                assert_eq!(fields.len(), 3);
                assert_eq!(fields[0].name, "x");
                assert_eq!(fields[2].relative_offset_bits, 64);
            }
            _ => panic!("expected struct"),
        }
        assert_eq!(stats.errors, 0);
        assert!(tree.get(7).is_some());
    }

    #[test]
    fn parses_array_of_range() {
        let mut tree = StabsTypeTree::new();
        let mut stats = ParseStats::default();
        // type 10 = array[4] of type 1, indexed by an anonymous range
        // (type 6) over 0..=3.
        let raw = "arr:G10=a6=r1;0;3;;1";
        let symbol = parse_symbol(0, raw, &mut tree, &mut stats).expect("parse ok");
        match symbol.type_node.descriptor {
            StabsDescriptor::Array { ref index_type, .. } => match &index_type.descriptor {
                StabsDescriptor::Range { low, high, .. } => {
                    assert_eq!(*low, 0);
                    assert_eq!(*high, 3);
                }
                _ => panic!("expected range index"),
            },
            _ => panic!("expected array"),
        }
    }

    #[test]
    fn truncated_type_becomes_error_not_panic() {
        let mut tree = StabsTypeTree::new();
        let mut stats = ParseStats::default();
        let raw = "ThisStabWillGetTruncated<";
        let symbol = parse_symbol(0, raw, &mut tree, &mut stats);
        assert!(symbol.is_none());
        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn cross_reference_is_captured() {
        let mut tree = StabsTypeTree::new();
        let mut stats = ParseStats::default();
        let raw = "p:G5=xsFoo:";
        let symbol = parse_symbol(0, raw, &mut tree, &mut stats).expect("parse ok");
        match symbol.type_node.descriptor {
            StabsDescriptor::CrossReference { kind, ref identifier } => {
                assert_eq!(kind, CrossReferenceKind::Struct);
                assert_eq!(identifier, "Foo");
            }
            _ => panic!("expected cross-reference"),
        }
    }

    #[test]
    fn static_member_has_no_offset_or_size() {
        let mut tree = StabsTypeTree::new();
        let mut stats = ParseStats::default();
        // `total` is a static data member: `name:type:physname;`, no
        // offset/size terms, unlike the ordinary field `count`.
        let raw = "Counter:T8=s32count:1,0,32;total:1:_ZN7Counter5totalE;;";
        let symbol = parse_symbol(0, raw, &mut tree, &mut stats).expect("parse ok");
        match symbol.type_node.descriptor {
            StabsDescriptor::StructOrUnion { ref fields, .. } => {
                assert_eq!(fields.len(), 2);
                assert!(!fields[0].is_static);
                assert_eq!(fields[0].name, "count");
                assert!(fields[1].is_static);
                assert_eq!(fields[1].name, "total");
            }
            _ => panic!("expected struct"),
        }
        assert_eq!(stats.errors, 0);
    }
}
