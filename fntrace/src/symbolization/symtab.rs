//! Function-address → symbol index
//!
//! Built once from [`ElfImage::function_symbols`](super::elf::ElfImage::function_symbols)
//! and read-only afterwards. Aliases (several symbols at one address) keep
//! the first entry in symbol-table order.

use std::collections::BTreeMap;

use super::elf::FunctionSymbol;

#[derive(Debug, Default)]
pub struct SymbolTable {
    by_address: BTreeMap<u64, FunctionSymbol>,
}

impl SymbolTable {
    #[must_use]
    pub fn new(symbols: impl IntoIterator<Item = FunctionSymbol>) -> Self {
        let mut by_address = BTreeMap::new();
        for symbol in symbols {
            by_address.entry(symbol.address).or_insert(symbol);
        }
        Self { by_address }
    }

    /// Is there a function starting exactly at `address`?
    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        self.by_address.contains_key(&address)
    }

    /// Function starting exactly at `address`
    #[must_use]
    pub fn get(&self, address: u64) -> Option<&FunctionSymbol> {
        self.by_address.get(&address)
    }

    /// Function whose `[address, address + size)` range covers `address`
    #[must_use]
    pub fn find_containing(&self, address: u64) -> Option<&FunctionSymbol> {
        let (_, symbol) = self.by_address.range(..=address).next_back()?;
        let end = symbol.address.saturating_add(symbol.size.max(1));
        (address < end).then_some(symbol)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionSymbol> {
        self.by_address.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str, address: u64, size: u64) -> FunctionSymbol {
        FunctionSymbol { name: name.into(), address, size }
    }

    #[test]
    fn test_first_alias_wins() {
        let table = SymbolTable::new([sym("main", 0x1000, 16), sym("alias", 0x1000, 16)]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0x1000).unwrap().name, "main");
    }

    #[test]
    fn test_find_containing() {
        let table = SymbolTable::new([sym("a", 0x1000, 0x10), sym("b", 0x2000, 0x20)]);
        assert_eq!(table.find_containing(0x100f).unwrap().name, "a");
        assert!(table.find_containing(0x1010).is_none());
        assert_eq!(table.find_containing(0x2000).unwrap().name, "b");
        assert!(table.find_containing(0x0fff).is_none());
    }

    #[test]
    fn test_zero_size_covers_its_address() {
        let table = SymbolTable::new([sym("stub", 0x3000, 0)]);
        assert!(table.find_containing(0x3000).is_some());
        assert!(table.find_containing(0x3001).is_none());
    }
}
