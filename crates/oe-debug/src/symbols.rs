//! Symbol and module tables used by the debugger and disassembler

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Data,
    /// Kernel call trampoline
    Trampoline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub address: u32,
    /// Size in bytes, 0 when unknown
    pub size: u32,
    pub kind: SymbolKind,
}

impl Symbol {
    pub fn contains(&self, address: u32) -> bool {
        if self.size == 0 {
            address == self.address
        } else {
            address.wrapping_sub(self.address) < self.size
        }
    }
}

/// A loaded code image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: String,
    pub base: u32,
    pub size: u32,
    pub entry: u32,
}

impl fmt::Display for ModuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} 0x{:08X}..0x{:08X} entry 0x{:08X}",
            self.name,
            self.base,
            self.base.wrapping_add(self.size),
            self.entry
        )
    }
}

/// Symbols ordered by address
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    symbols: BTreeMap<u32, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a symbol, replacing any symbol at the same address
    pub fn insert(&mut self, name: impl Into<String>, address: u32, size: u32, kind: SymbolKind) {
        let name = name.into();
        tracing::trace!(target: "debugger", "Symbol {} at 0x{:08X} ({} bytes)", name, address, size);
        self.symbols.insert(
            address,
            Symbol {
                name,
                address,
                size,
                kind,
            },
        );
    }

    pub fn remove(&mut self, address: u32) -> Option<Symbol> {
        self.symbols.remove(&address)
    }

    /// Symbol covering `address` and the offset into it
    pub fn lookup(&self, address: u32) -> Option<(&Symbol, u32)> {
        let (_, symbol) = self.symbols.range(..=address).next_back()?;
        symbol
            .contains(address)
            .then(|| (symbol, address - symbol.address))
    }

    pub fn by_name(&self, name: &str) -> Option<&Symbol> {
        self.symbols.values().find(|symbol| symbol.name == name)
    }

    /// `name` or `name+0xOFF` for `address`
    pub fn describe(&self, address: u32) -> Option<String> {
        self.lookup(address).map(|(symbol, offset)| match offset {
            0 => symbol.name.clone(),
            offset => format!("{}+0x{:X}", symbol.name, offset),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_inside_function() {
        let mut table = SymbolTable::new();
        table.insert("main", 0x1000, 0x40, SymbolKind::Function);
        table.insert("helper", 0x1040, 0x20, SymbolKind::Function);

        let (symbol, offset) = table.lookup(0x1008).unwrap();
        assert_eq!(symbol.name, "main");
        assert_eq!(offset, 8);
        assert_eq!(table.describe(0x1040).as_deref(), Some("helper"));
        assert_eq!(table.describe(0x1044).as_deref(), Some("helper+0x4"));
        assert!(table.lookup(0x1060).is_none());
        assert!(table.lookup(0x0FFC).is_none());
    }

    #[test]
    fn test_unsized_symbol_matches_exactly() {
        let mut table = SymbolTable::new();
        table.insert("OSReport", 0xFF00_0000, 0, SymbolKind::Trampoline);
        assert!(table.lookup(0xFF00_0000).is_some());
        assert!(table.lookup(0xFF00_0004).is_none());
        assert_eq!(table.by_name("OSReport").map(|s| s.address), Some(0xFF00_0000));
    }

    #[test]
    fn test_replace_and_remove() {
        let mut table = SymbolTable::new();
        table.insert("a", 0x10, 4, SymbolKind::Data);
        table.insert("b", 0x10, 4, SymbolKind::Data);
        assert_eq!(table.len(), 1);
        assert_eq!(table.remove(0x10).map(|s| s.name), Some("b".to_string()));
        assert!(table.is_empty());
    }
}
