//! Orchestrates C1 through C8 (spec §5 "core... pipeline"): load an ELF
//! image, locate `.mdebug`, parse every compilation unit's STABS symbols,
//! lower each to an AST, deduplicate and attribute types across files, and
//! publish the result into a [`crate::symbol_db::SymbolTable`] under its
//! Guardian. Optionally, refine global variables against the same image(s).

use crate::analysis::lower_symbol;
use crate::ast::{Node, NodeKind, VariableStorage};
use crate::attribution::{apply_reference_count_heuristic, apply_this_pointer_heuristic, count_references};
use crate::binary_reader::{ElfImage, GnuLinkOnceLocation};
use crate::dedup::{deduplicate, rewrite_references, CanonicalType};
use crate::error::Result;
use crate::mdebug::parse_mdebug;
use crate::refine::{refine_node, AddressIndex};
use crate::stabs::parser::{parse_symbol, ParseStats, SymbolDescriptor};
use crate::stabs::tree::StabsTypeTree;
use crate::symbol_db::{DataType, Function, Guardian, GlobalVariable, SymbolTable};

/// Everything produced by running the pipeline over one executable, before
/// it is published: the canonical type set, the per-file top-level nodes
/// they came from, and how many STABS symbols failed to parse.
pub struct PipelineOutput {
    pub canonical_types: Vec<CanonicalType>,
    pub file_names: Vec<String>,
    pub variables: Vec<(usize, Node)>,
    pub functions: Vec<(usize, Node)>,
    pub parse_errors: u32,
}

/// Patches a freshly lowered `Variable` node's `Global` storage location
/// (left `Nil` by the per-file analyser, which has no section table) by
/// classifying its address against `image`. A no-op for any other storage
/// kind.
fn classify_variable_location(node: &mut Node, image: &ElfImage) {
    if let NodeKind::Variable {
        storage: Some(VariableStorage::Global { location, address }),
        ..
    } = &mut node.kind
    {
        *location = image.classify_address(*address);
    }
}

/// Runs C1-C6 over `image`: locates `.mdebug`, parses every file's STABS
/// symbols, lowers them to AST nodes, deduplicates named types across
/// files, and applies the file-attribution heuristics.
pub fn run(image: &ElfImage) -> Result<PipelineOutput> {
    let mdebug = parse_mdebug(image)?;

    let mut stats = ParseStats::default();
    let mut file_names = Vec::with_capacity(mdebug.files.len());
    let mut named_types: Vec<(usize, Node)> = Vec::new();
    let mut variables: Vec<(usize, Node)> = Vec::new();
    let mut functions: Vec<(usize, Node)> = Vec::new();

    for (file_index, file) in mdebug.files.iter().enumerate() {
        file_names.push(file.name.clone());
        let mut tree = StabsTypeTree::new();

        for symbol in &file.symbols {
            let parsed = match parse_symbol(file_index as i32, &symbol.string, &mut tree, &mut stats) {
                Some(parsed) => parsed,
                None => continue,
            };
            let mut node = lower_symbol(&parsed, file_index, &tree, symbol.value);
            match parsed.descriptor {
                SymbolDescriptor::Tag | SymbolDescriptor::TypeName => {
                    // `deduplicate` buckets by name when present and by
                    // structural hash otherwise (spec §4.4 step 1), so an
                    // anonymous type (`node.name.is_none()`, e.g. an
                    // untagged `struct { ... }`) is pushed through too
                    // rather than dropped here.
                    named_types.push((file_index, node));
                }
                SymbolDescriptor::GlobalVariable | SymbolDescriptor::StaticVariable => {
                    classify_variable_location(&mut node, image);
                    variables.push((file_index, node));
                }
                SymbolDescriptor::GlobalFunction | SymbolDescriptor::StaticFunction => {
                    functions.push((file_index, node));
                }
                _ => {}
            }
        }
    }

    let mut canonical_types = deduplicate(named_types);

    for (_, variable) in variables.iter_mut() {
        rewrite_references(variable, &canonical_types);
    }
    for (_, function) in functions.iter_mut() {
        rewrite_references(function, &canonical_types);
    }
    for ty in canonical_types.iter_mut() {
        let mut node = ty.node.clone();
        rewrite_references(&mut node, &canonical_types);
        ty.node = node;
    }

    apply_this_pointer_heuristic(&mut canonical_types, &file_names);

    // Roots for the reference-count heuristic: each variable/function
    // belongs to the one file it was declared in, but a canonical type
    // referenced only from inside another type's own fields (never
    // directly from a variable or function) would otherwise never be
    // counted at all, so every canonical type's own body is walked too,
    // attributed to every file that type was seen in (spec §4.5).
    let mut roots: Vec<(Vec<usize>, Node)> = variables
        .iter()
        .map(|(file_index, node)| (vec![*file_index], node.clone()))
        .collect();
    roots.extend(
        functions
            .iter()
            .map(|(file_index, node)| (vec![*file_index], node.clone())),
    );
    roots.extend(
        canonical_types
            .iter()
            .map(|ty| (ty.files.clone(), ty.node.clone())),
    );
    let reference_counts = count_references(&roots, canonical_types.len());
    apply_reference_count_heuristic(&mut canonical_types, &reference_counts);

    Ok(PipelineOutput {
        canonical_types,
        file_names,
        variables,
        functions,
        parse_errors: stats.errors,
    })
}

/// Runs C7 over every global variable in `output`, producing a rendered
/// initializer string per variable keyed by its name. Variables without a
/// statically known address (not yet wired up by C4) are skipped, matching
/// the original's `valid_address` guard in `refine_variable`.
pub fn refine_globals(
    output: &PipelineOutput,
    images: &[&ElfImage],
    addresses: &AddressIndex,
) -> Vec<(String, String)> {
    let mut rendered = Vec::new();
    for (_, node) in &output.variables {
        if let NodeKind::Variable {
            ty,
            storage: Some(VariableStorage::Global { location, address }),
            ..
        } = &node.kind
        {
            if matches!(location, GnuLinkOnceLocation::Bss | GnuLinkOnceLocation::Sbss) {
                continue;
            }
            let name = node.name.clone().unwrap_or_default();
            let value = refine_node(*address, ty, images, &output.canonical_types, addresses);
            rendered.push((name, value));
        }
    }
    rendered
}

/// Publishes a fresh [`SymbolTable`] built from `output` into `guardian`,
/// following the single-writer discipline of spec §4.7: the next
/// generation is read, a table stamped with it is built, and the guardian
/// atomically swaps it in.
pub fn publish(output: &PipelineOutput, guardian: &Guardian<SymbolTable>) -> u64 {
    let next_generation = guardian.current_generation() + 1;
    let mut table = SymbolTable::new(next_generation);

    for ty in &output.canonical_types {
        table.data_types.add(
            ty.name.clone(),
            None,
            DataType {
                name: ty.name.clone(),
                address: None,
            },
        );
    }

    for (_file_index, node) in &output.variables {
        let name = node.name.clone().unwrap_or_default();
        if let NodeKind::Variable { storage, .. } = &node.kind {
            let address = match storage {
                Some(VariableStorage::Global { address, .. }) => Some(*address),
                _ => None,
            };
            table.global_variables.add(
                name.clone(),
                address,
                GlobalVariable {
                    name,
                    address,
                    source_file: None,
                },
            );
        }
    }

    for (_file_index, node) in &output.functions {
        let name = node.name.clone().unwrap_or_default();
        if let NodeKind::FunctionDefinition { address_range, .. } = &node.kind {
            let address = address_range.map(|(low, _high)| low);
            table.functions.add(
                name.clone(),
                address,
                Function {
                    name,
                    address,
                    source_file: None,
                },
            );
        }
    }

    guardian.overwrite(table)
}
