//! C8: the Symbol Database (spec §3 "Symbol Database (publication
//! container)"). Five per-kind lists -- data types, functions, global
//! variables, labels, source files -- published as one immutable snapshot
//! behind a [`guardian::Guardian`].

pub mod guardian;
pub mod handle;
pub mod list;

use handle::Handle;
use list::SymbolList;

pub struct DataType {
    pub name: String,
    pub address: Option<u32>,
}

pub struct Function {
    pub name: String,
    pub address: Option<u32>,
    pub source_file: Option<Handle<SourceFile>>,
}

pub struct GlobalVariable {
    pub name: String,
    pub address: Option<u32>,
    pub source_file: Option<Handle<SourceFile>>,
}

pub struct Label {
    pub name: String,
    pub address: Option<u32>,
}

pub struct SourceFile {
    pub name: String,
    pub path: String,
    pub first_function: Option<Handle<Function>>,
    pub last_function: Option<Handle<Function>>,
}

/// One complete, logically-immutable publication of every symbol kind
/// (spec §3's "Lifecycle": created once per load, destroyed only by being
/// replaced under the Guardian).
pub struct SymbolTable {
    pub data_types: SymbolList<DataType>,
    pub functions: SymbolList<Function>,
    pub global_variables: SymbolList<GlobalVariable>,
    pub labels: SymbolList<Label>,
    pub source_files: SymbolList<SourceFile>,
}

impl SymbolTable {
    pub fn new(generation: u64) -> SymbolTable {
        SymbolTable {
            data_types: SymbolList::new(generation, false),
            functions: SymbolList::new(generation, true),
            global_variables: SymbolList::new(generation, true),
            labels: SymbolList::new(generation, true),
            source_files: SymbolList::new(generation, false),
        }
    }
}

pub use guardian::Guardian;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishing_a_table_makes_its_handles_readable() {
        let guardian: Guardian<SymbolTable> = Guardian::new(SymbolTable::new(0));
        let mut table = SymbolTable::new(1);
        let handle = table.functions.add(
            "main".to_string(),
            Some(0x1000),
            Function {
                name: "main".to_string(),
                address: Some(0x1000),
                source_file: None,
            },
        );
        let generation = guardian.overwrite(table);

        let found = guardian.read(generation, |t| t.functions.get(handle).map(|f| f.name.clone()));
        assert_eq!(found, Some(Some("main".to_string())));
    }
}
