//! Reconstructs a deduplicated C/C++ type, function, and global variable
//! database from STABS debug information embedded in 32-bit MIPS ELF
//! executables.
//!
//! The pipeline runs in stages, each its own module: [`binary_reader`]
//! loads the ELF container, [`mdebug`] walks its `.mdebug` symbol table,
//! [`stabs`] parses the raw STABS strings into a per-file type tree,
//! [`analysis`] lowers that tree into this crate's [`ast`], [`dedup`] and
//! [`attribution`] merge and attribute types across every translation
//! unit, [`refine`] walks resolved globals over a memory image to
//! materialize their values, and [`symbol_db`] publishes the result behind
//! a versioned guard. [`pipeline`] wires these stages together.

pub mod analysis;
pub mod ast;
pub mod attribution;
pub mod binary_reader;
pub mod dedup;
pub mod error;
pub mod mdebug;
pub mod pipeline;
pub mod refine;
pub mod registers;
pub mod stabs;
pub mod symbol_db;

pub use binary_reader::ElfImage;
pub use error::{Error, Result};
pub use pipeline::{refine_globals, run, PipelineOutput};
pub use symbol_db::{Guardian, SymbolTable};

/// Loads an ELF file from `path` and runs the full reconstruction pipeline
/// (C1 through C6) over it, returning the deduplicated, attributed type
/// set alongside every global/static variable declaration found. Callers
/// who also want initial values read through [`refine_globals`] with the
/// same image and an [`refine::AddressIndex`] built from the published
/// symbol table.
pub fn reconstruct(path: impl AsRef<std::path::Path>) -> Result<(ElfImage, PipelineOutput)> {
    let bytes = std::fs::read(path)?;
    let image = ElfImage::parse(bytes)?;
    let output = pipeline::run(&image)?;
    Ok((image, output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_modules_are_wired_together() {
        // A smoke test that every stage module is reachable from the crate
        // root with the names callers depend on, rather than re-testing
        // stage behavior already covered by each module's own tests.
        let guardian: Guardian<SymbolTable> = Guardian::new(SymbolTable::new(0));
        assert_eq!(guardian.current_generation(), 0);
    }

    #[test]
    fn corrupt_stab_logs_a_warning_instead_of_panicking() {
        let _ = env_logger::try_init();
        let mut tree = stabs::tree::StabsTypeTree::new();
        let mut stats = stabs::parser::ParseStats::default();
        let result = stabs::parser::parse_symbol(0, "NoTerminatorHere<", &mut tree, &mut stats);
        assert!(result.is_none());
        assert_eq!(stats.errors, 1);
    }
}
