use std::collections::HashMap;

use crate::compiler::diagnostics::Loc;
use crate::compiler::intern::SymId;
use crate::compiler::types::TypeId;

/// Reserved words of the schema language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Type,
    Empty,
}

/// What a name stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymValue {
    /// A (possibly forward-declared) type.
    Typename(TypeId),
    /// A field of the constructor currently being parsed.
    Param { idx: usize },
    Keyword(Keyword),
}

#[derive(Debug, Clone)]
pub struct SymbolDef {
    pub level: usize,
    pub loc: Loc,
    pub value: SymValue,
}

/// Name resolution with stacked scopes.
///
/// Level 0 holds type names and keywords; each constructor opens a scope for
/// its fields, and anonymous inline records open one more. Lookup walks from
/// the innermost definition outward; closing a scope rolls its definitions
/// back.
pub struct SymbolTable {
    defs: HashMap<SymId, Vec<SymbolDef>>,
    scopes: Vec<Vec<SymId>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            defs: HashMap::new(),
            scopes: Vec::new(),
        }
    }

    pub fn scope_level(&self) -> usize {
        self.scopes.len()
    }

    pub fn open_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    pub fn close_scope(&mut self) {
        let names = self.scopes.pop().expect("close_scope without open_scope");
        for name in names {
            if let Some(stack) = self.defs.get_mut(&name) {
                stack.pop();
                if stack.is_empty() {
                    self.defs.remove(&name);
                }
            }
        }
    }

    /// Defines `name` in the innermost scope. Fails if the scope already
    /// holds a definition of the same name.
    pub fn define(&mut self, name: SymId, loc: Loc, value: SymValue) -> Result<(), &SymbolDef> {
        let level = self.scope_level();
        let stack = self.defs.entry(name).or_default();
        if stack.last().is_some_and(|d| d.level == level) {
            return Err(stack.last().unwrap());
        }
        stack.push(SymbolDef { level, loc, value });
        if level > 0 {
            self.scopes[level - 1].push(name);
        }
        Ok(())
    }

    /// Defines `name` at the global level, independent of any open scopes.
    pub fn define_global(&mut self, name: SymId, loc: Loc, value: SymValue) -> Result<(), &SymbolDef> {
        let stack = self.defs.entry(name).or_default();
        if stack.first().is_some_and(|d| d.level == 0) {
            return Err(stack.first().unwrap());
        }
        stack.insert(0, SymbolDef { level: 0, loc, value });
        Ok(())
    }

    /// Innermost definition of `name`, if any.
    pub fn lookup(&self, name: SymId) -> Option<&SymbolDef> {
        self.defs.get(&name).and_then(|stack| stack.last())
    }

    /// Definition of `name` in the innermost scope only.
    pub fn lookup_local(&self, name: SymId) -> Option<&SymbolDef> {
        let level = self.scope_level();
        self.lookup(name).filter(|d| d.level == level)
    }

    /// Global (level 0) definition of `name`.
    pub fn lookup_global(&self, name: SymId) -> Option<&SymbolDef> {
        self.defs
            .get(&name)
            .and_then(|stack| stack.first())
            .filter(|d| d.level == 0)
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::intern::Interner;

    #[test]
    fn scope_rollback_restores_outer_definitions() {
        let mut interner = Interner::new();
        let mut table = SymbolTable::new();
        let x = interner.intern("x");
        table
            .define_global(x, Loc::builtin(), SymValue::Keyword(Keyword::Empty))
            .unwrap();
        table.open_scope();
        table
            .define(x, Loc::new(1, 1), SymValue::Param { idx: 0 })
            .unwrap();
        assert!(matches!(
            table.lookup(x).unwrap().value,
            SymValue::Param { idx: 0 }
        ));
        table.close_scope();
        assert!(matches!(
            table.lookup(x).unwrap().value,
            SymValue::Keyword(Keyword::Empty)
        ));
    }

    #[test]
    fn redefinition_in_same_scope_fails() {
        let mut interner = Interner::new();
        let mut table = SymbolTable::new();
        let x = interner.intern("x");
        table.open_scope();
        assert!(table.define(x, Loc::new(1, 1), SymValue::Param { idx: 0 }).is_ok());
        assert!(table.define(x, Loc::new(1, 9), SymValue::Param { idx: 1 }).is_err());
        table.close_scope();
    }

    #[test]
    fn nested_scope_sees_outer_level() {
        let mut interner = Interner::new();
        let mut table = SymbolTable::new();
        let n = interner.intern("n");
        table.open_scope();
        table.define(n, Loc::new(1, 1), SymValue::Param { idx: 0 }).unwrap();
        table.open_scope();
        let def = table.lookup(n).unwrap();
        assert_eq!(def.level, 1);
        assert_ne!(def.level, table.scope_level());
        table.close_scope();
        table.close_scope();
    }
}
