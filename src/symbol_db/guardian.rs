//! The concurrency surface of the Symbol Database (spec §4.7 "Guardian").
//!
//! Grounded in the reader/writer discipline spec.md §4.7 describes
//! directly: one mutex, one monotonically increasing generation counter, a
//! single writer at a time via [`Guardian::overwrite`], and arbitrarily many
//! readers via [`Guardian::read`] whose callback only runs if the reader's
//! handle generation still matches the live table.

use std::sync::Mutex;

struct State<T> {
    generation: u64,
    table: T,
}

/// Wraps a `T` (the published [`super::SymbolTable`]) with versioned,
/// mutex-guarded access. Parsing, deduplication, and refinement all run
/// single-threaded before a table is ever published; this is the only part
/// of the pipeline multiple threads touch concurrently.
pub struct Guardian<T> {
    state: Mutex<State<T>>,
}

impl<T> Guardian<T> {
    pub fn new(table: T) -> Guardian<T> {
        Guardian {
            state: Mutex::new(State {
                generation: 0,
                table,
            }),
        }
    }

    /// The generation a reader must present to [`Guardian::read`] for its
    /// callback to run -- callers typically capture this once at startup
    /// and refresh it whenever `overwrite` tells them the table changed.
    pub fn current_generation(&self) -> u64 {
        self.state.lock().expect("guardian mutex poisoned").generation
    }

    /// Runs `callback` against the live table if `generation` still matches
    /// what's published; otherwise the callback is skipped. Returns `None`
    /// exactly when the callback did not run, i.e. the reader's handles are
    /// stale.
    pub fn read<R>(&self, generation: u64, callback: impl FnOnce(&T) -> R) -> Option<R> {
        let state = self.state.lock().expect("guardian mutex poisoned");
        if state.generation != generation {
            return None;
        }
        Some(callback(&state.table))
    }

    /// Atomically replaces the published table and bumps the generation,
    /// invalidating every handle minted against the old one. Returns the
    /// new generation.
    pub fn overwrite(&self, table: T) -> u64 {
        let mut state = self.state.lock().expect("guardian mutex poisoned");
        state.table = table;
        state.generation += 1;
        state.generation
    }
}
