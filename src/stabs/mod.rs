//! STABS parsing (C2/C3): turns one compilation unit's raw local symbols
//! into an unresolved, per-file Stabs Type Tree.

pub mod lexer;
pub mod parser;
pub mod tree;
