use std::collections::HashMap;

/// An interned identifier. `SymId::EMPTY` is the absent name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct SymId(u32);

impl SymId {
    pub const EMPTY: SymId = SymId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for SymId {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// String interner shared by the scanner, the symbol table and the
/// diagnostics. Index 0 is reserved for the empty name.
pub struct Interner {
    map: HashMap<String, SymId>,
    vec: Vec<String>,
}

impl Interner {
    pub fn new() -> Self {
        let mut interner = Interner {
            map: HashMap::new(),
            vec: Vec::new(),
        };
        interner.vec.push(String::new());
        interner
    }

    pub fn intern(&mut self, s: &str) -> SymId {
        if let Some(&sym) = self.map.get(s) {
            return sym;
        }
        let sym = SymId(self.vec.len() as u32);
        self.vec.push(s.to_string());
        self.map.insert(s.to_string(), sym);
        sym
    }

    pub fn resolve(&self, sym: SymId) -> &str {
        &self.vec[sym.index()]
    }

    /// Look up an existing interned string without creating a new entry.
    pub fn lookup(&self, s: &str) -> Option<SymId> {
        self.map.get(s).copied()
    }

    pub fn len(&self) -> usize {
        self.vec.len()
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut interner = Interner::new();
        let a = interner.intern("Hashmap");
        let b = interner.intern("Hashmap");
        assert_eq!(a, b);
        assert_eq!(interner.resolve(a), "Hashmap");
    }

    #[test]
    fn empty_name_is_reserved() {
        let interner = Interner::new();
        assert_eq!(interner.resolve(SymId::EMPTY), "");
        assert!(SymId::EMPTY.is_empty());
    }
}
