use std::fmt;
use std::io;

/// The crate-wide error taxonomy (spec §7). Only the fatal classes --
/// `BadInput`, `UnsupportedTarget`, `OutOfBoundsMemory` -- ever propagate out
/// of the pipeline as an `Err`. `CorruptStab`, `UnresolvedReference` and
/// `Inconsistent` are recovered from in place (a dropped symbol, a
/// `TypeName::error`, a `conflicting_types` mark) and never constructed here.
#[derive(Debug)]
pub enum Error {
    /// The input could not be read, was truncated, or failed a magic check.
    BadInput(String),
    /// The file is a well-formed ELF image but not one this crate handles
    /// (not MIPS, not 32-bit).
    UnsupportedTarget(String),
    /// A `read_virtual` request touched bytes outside every mapped segment.
    OutOfBoundsMemory { address: u32, len: u32 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadInput(msg) => write!(f, "bad input: {}", msg),
            Error::UnsupportedTarget(msg) => write!(f, "unsupported target: {}", msg),
            Error::OutOfBoundsMemory { address, len } => write!(
                f,
                "tried to read {} byte(s) at virtual address {:#x} outside any mapped segment",
                len, address
            ),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::BadInput(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
