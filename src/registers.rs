//! DBX register numbers to MIPS register classes (spec §4.6's `r`/register
//! variable handling), grounded in `original_source/src/ccc/registers.cpp`'s
//! `map_dbx_register_index` and string tables.

/// Which bank a mapped register belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegisterClass {
    Invalid,
    Gpr,
    Fpr,
}

pub const GPR_NAMES: [&str; 32] = [
    "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3", "t0", "t1", "t2", "t3", "t4", "t5", "t6",
    "t7", "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "t8", "t9", "k0", "k1", "gp", "sp", "fp",
    "ra",
];

pub const FPR_NAMES: [&str; 32] = [
    "f0", "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10", "f11", "f12", "f13", "f14",
    "f15", "f16", "f17", "f18", "f19", "f20", "f21", "f22", "f23", "f24", "f25", "f26", "f27",
    "f28", "f29", "f30", "f31",
];

/// Maps a raw DBX register index (as embedded in a STABS register-variable
/// descriptor) to a `(class, index within that class)` pair. GPRs occupy
/// 0..=31 unchanged; FPRs occupy 38..=69 and are shifted back down to 0..=31;
/// everything else is not a register this crate understands.
pub fn map_dbx_register_index(index: i32) -> (RegisterClass, i32) {
    if (0..=31).contains(&index) {
        (RegisterClass::Gpr, index)
    } else if (38..=69).contains(&index) {
        (RegisterClass::Fpr, index - 38)
    } else {
        (RegisterClass::Invalid, 0)
    }
}

/// Renders a mapped register as the name a disassembly listing would use,
/// e.g. `sp` or `f12`, or `BADREGISTER` if the mapping failed.
pub fn register_name(class: RegisterClass, relative_index: i32) -> &'static str {
    let index = usize::try_from(relative_index).unwrap_or(usize::MAX);
    match class {
        RegisterClass::Gpr => GPR_NAMES.get(index).copied().unwrap_or("BADREGISTER"),
        RegisterClass::Fpr => FPR_NAMES.get(index).copied().unwrap_or("BADREGISTER"),
        RegisterClass::Invalid => "BADREGISTER",
    }
}
