pub mod admissible;
pub mod analysis;
pub mod bitpfx;
pub mod diagnostics;
pub mod dispatch;
pub mod expr;
pub mod intern;
pub mod natlattice;
pub mod parser;
pub mod scanner;
pub mod schema;
pub mod size;
pub mod symtab;
pub mod trie;
pub mod types;

use crate::compiler::diagnostics::Loc;
use crate::compiler::expr::ConstExprPool;
use crate::compiler::intern::{Interner, SymId};
use crate::compiler::size::MinMaxSize;
use crate::compiler::symtab::{Keyword, SymValue, SymbolTable};
use crate::compiler::types::{Type, TypeArgs, TypeId};

/// Compilation options taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Warn when an explicit tag differs from the derived one, and when a
    /// missing tag is auto-assigned.
    pub show_tag_warnings: bool,
    /// ANSI color in diagnostics.
    pub pretty: bool,
}

/// Well-known builtin types referenced by the analysis passes.
#[derive(Debug, Clone, Copy)]
pub struct Builtins {
    /// `#`: an unsigned 32-bit natural.
    pub nat: TypeId,
    /// `## n`: a natural of `n` bits.
    pub nat_width: TypeId,
    /// `#< n`: a natural smaller than `n`.
    pub nat_less: TypeId,
    /// `#<= n`: a natural up to `n`.
    pub nat_leq: TypeId,
    pub any: TypeId,
    pub cell: TypeId,
    pub int: TypeId,
    pub uint: TypeId,
    pub bits: TypeId,
    /// `=`: the equality pseudo-type; accepts one negated argument.
    pub eq: TypeId,
    pub less: TypeId,
    pub leq: TypeId,
}

enum BuiltinSize {
    Any,
    Fixed(u32),
    Range(u32, u32),
}

/// All state of one compilation: interned names, the symbol table, the flat
/// type arena and the constant-expression pool. Threaded through every
/// pass; no global state exists.
pub struct Compiler {
    pub interner: Interner,
    pub symbols: SymbolTable,
    pub types: Vec<Type>,
    /// Number of builtin types at the front of `types`.
    pub builtin_types: usize,
    pub pool: ConstExprPool,
    pub builtins: Builtins,
    pub options: Options,
    /// Name of the source being compiled, for diagnostics.
    pub file_name: String,
    last_declared_counter: u32,
}

impl Compiler {
    pub fn new(options: Options) -> Self {
        let mut comp = Compiler {
            interner: Interner::new(),
            symbols: SymbolTable::new(),
            types: Vec::new(),
            builtin_types: 0,
            pool: ConstExprPool::new(),
            builtins: Builtins {
                nat: TypeId(0),
                nat_width: TypeId(0),
                nat_less: TypeId(0),
                nat_leq: TypeId(0),
                any: TypeId(0),
                cell: TypeId(0),
                int: TypeId(0),
                uint: TypeId(0),
                bits: TypeId(0),
                eq: TypeId(0),
                less: TypeId(0),
                leq: TypeId(0),
            },
            options,
            file_name: String::new(),
            last_declared_counter: 0,
        };
        comp.define_builtins();
        comp
    }

    fn define_keywords(&mut self) {
        for (name, kw) in [("Type", Keyword::Type), ("EMPTY", Keyword::Empty)] {
            let sym = self.interner.intern(name);
            let defined = self
                .symbols
                .define_global(sym, Loc::builtin(), SymValue::Keyword(kw));
            debug_assert!(defined.is_ok());
        }
    }

    fn define_builtin_type(
        &mut self,
        name: &str,
        args: &str,
        produces_nat: bool,
        size: BuiltinSize,
        any_bits: bool,
    ) -> TypeId {
        let sym = self.interner.intern(name);
        let id = TypeId(self.types.len() as u32);
        let mut ty = Type::new(id, sym, produces_nat, Some(args.len()), true, true);
        let base = if name != "#" {
            TypeArgs::IS_POS
        } else {
            TypeArgs::empty()
        };
        ty.args = args
            .chars()
            .map(|c| {
                base | if c == '#' {
                    TypeArgs::IS_NAT
                } else {
                    TypeArgs::IS_TYPE
                }
            })
            .collect();
        match size {
            BuiltinSize::Any => ty.size = MinMaxSize::ANY,
            BuiltinSize::Fixed(bits) => {
                ty.size = MinMaxSize::fixed_size(bits);
                ty.has_fixed_size = true;
            }
            BuiltinSize::Range(min, max) => ty.size = MinMaxSize::size_range(min, max),
        }
        ty.any_bits = any_bits;
        self.types.push(ty);
        let defined = self
            .symbols
            .define_global(sym, Loc::builtin(), SymValue::Typename(id));
        debug_assert!(defined.is_ok());
        id
    }

    fn define_builtins(&mut self) {
        use BuiltinSize::{Any, Fixed, Range};
        self.define_keywords();
        self.builtins.nat = self.define_builtin_type("#", "", true, Fixed(32), true);
        self.builtins.nat_width = self.define_builtin_type("##", "#", true, Range(0, 32), true);
        self.builtins.nat_less = self.define_builtin_type("#<", "#", true, Range(0, 32), false);
        self.builtins.nat_leq = self.define_builtin_type("#<=", "#", true, Range(0, 32), false);
        self.builtins.any = self.define_builtin_type("Any", "", false, Any, false);
        self.builtins.cell = self.define_builtin_type("Cell", "", false, Any, false);
        self.builtins.int = self.define_builtin_type("int", "#", false, Range(0, 257), true);
        self.builtins.uint = self.define_builtin_type("uint", "#", false, Range(0, 256), true);
        self.builtins.bits = self.define_builtin_type("bits", "#", false, Range(0, 1023), true);
        for i in 1..=257u32 {
            self.define_builtin_type(&format!("int{}", i), "", false, Fixed(i), true);
            if i < 257 {
                self.define_builtin_type(&format!("uint{}", i), "", false, Fixed(i), true);
            }
        }
        for i in 1..=1023u32 {
            self.define_builtin_type(&format!("bits{}", i), "", false, Fixed(i), true);
        }
        self.builtins.eq = self.define_builtin_type("=", "##", false, Fixed(0), true);
        self.builtins.less = self.define_builtin_type("<", "##", false, Fixed(0), true);
        self.builtins.leq = self.define_builtin_type("<=", "##", false, Fixed(0), true);
        self.builtin_types = self.types.len();
    }

    /// Declares a new user type for an identifier seen for the first time.
    pub fn register_new_type(&mut self, loc: Loc, name: SymId) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        let mut ty = Type::new(id, name, false, None, false, false);
        ty.loc = loc;
        self.types.push(ty);
        let defined = self
            .symbols
            .define_global(name, loc, SymValue::Typename(id));
        debug_assert!(defined.is_ok());
        id
    }

    /// Bumps the declaration stamp of a type; drives facade ordering.
    pub fn renew_last_declared(&mut self, type_id: TypeId) {
        self.last_declared_counter += 1;
        self.types[type_id.index()].last_declared = self.last_declared_counter;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_defined_once() {
        let comp = Compiler::new(Options::default());
        // #, ##, #<, #<=, Any, Cell, int, uint, bits, 257 intN, 256 uintN,
        // 1023 bitsN, =, <, <=
        assert_eq!(comp.builtin_types, 9 + 257 + 256 + 1023 + 3);
        assert_eq!(comp.types.len(), comp.builtin_types);
        let nat = &comp.types[comp.builtins.nat.index()];
        assert!(nat.produces_nat);
        assert!(nat.is_builtin);
        assert_eq!(nat.size, MinMaxSize::fixed_size(32));
    }

    #[test]
    fn builtin_names_resolve() {
        let comp = Compiler::new(Options::default());
        for name in ["#", "##", "#<", "#<=", "Any", "Cell", "uint64", "bits1023"] {
            let sym = comp.interner.lookup(name).expect("builtin name interned");
            assert!(matches!(
                comp.symbols.lookup(sym).map(|d| d.value),
                Some(SymValue::Typename(_))
            ));
        }
        let kw = comp.interner.lookup("Type").unwrap();
        assert!(matches!(
            comp.symbols.lookup(kw).map(|d| d.value),
            Some(SymValue::Keyword(Keyword::Type))
        ));
    }
}
