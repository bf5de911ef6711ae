use bitflags::bitflags;
use log::debug;

use crate::compiler::Compiler;
use crate::compiler::admissible::AdmissibilityInfo;
use crate::compiler::bitpfx::BitPfxCollection;
use crate::compiler::diagnostics::{
    Loc, Result, arity_error, binding_error, kind_error, overflow_error, polarity_error,
    print_warning,
};
use crate::compiler::dispatch::DispatchPlan;
use crate::compiler::expr::{TypeExpr, bind_value, write_constructor, write_tag};
use crate::compiler::intern::{Interner, SymId};
use crate::compiler::size::MinMaxSize;
use crate::compiler::trie::BinTrie;

/// Index into the compiler's flat type arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

bitflags! {
    /// Accumulated kind, polarity and constness of one type argument,
    /// merged across every constructor of the type.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TypeArgs: u32 {
        const IS_TYPE = 1;
        const IS_NAT = 2;
        const IS_POS = 4;
        const IS_NEG = 8;
        const NON_CONST = 16;
    }
}

/// One positional or implicit member of a constructor.
#[derive(Debug, Clone)]
pub struct Field {
    pub idx: usize,
    pub name: SymId,
    pub loc: Loc,
    pub ty: TypeExpr,
    /// Appeared in `{...}`.
    pub implicit: bool,
    /// A predicate, not a value.
    pub constraint: bool,
    /// Value computable during decode at the point it is used.
    pub known: bool,
    /// Referenced by a later expression.
    pub used: bool,
    /// A reference to an anonymous inline record.
    pub subrec: bool,
}

impl Field {
    pub fn new(loc: Loc, implicit: bool, idx: usize, name: SymId, ty: TypeExpr) -> Self {
        Field {
            idx,
            name,
            loc,
            ty,
            implicit,
            constraint: false,
            known: false,
            used: false,
            subrec: false,
        }
    }

    pub fn display_name(&self, names: &Interner) -> String {
        if self.name.is_empty() {
            format!("_{}", self.idx + 1)
        } else {
            names.resolve(self.name).to_string()
        }
    }

    pub fn isomorphic_to(&self, other: &Field, allow_other_names: bool) -> bool {
        if other.idx != self.idx
            || other.implicit != self.implicit
            || other.constraint != self.constraint
            || (!allow_other_names && other.name != self.name)
        {
            return false;
        }
        other.ty.equal(&self.ty)
    }
}

/// A single variant of a type.
#[derive(Debug, Clone)]
pub struct Constructor {
    pub name: SymId,
    pub type_name: SymId,
    pub type_defined: Option<TypeId>,
    pub loc: Loc,
    /// Binary tag: prefix bits with a length marker right below them.
    pub tag: u64,
    /// Number of prefix bits, -1 while no tag is assigned.
    pub tag_bits: i32,
    pub type_arity: usize,
    /// A tagless, parameterless forwarder of a single explicit field.
    pub is_fwd: bool,
    pub is_enum: bool,
    pub is_simple_enum: bool,
    pub is_special: bool,
    pub has_fixed_size: bool,
    pub any_bits: bool,
    pub size: MinMaxSize,
    pub begins_with: BitPfxCollection,
    pub fields: Vec<Field>,
    pub params: Vec<TypeExpr>,
    pub param_negated: Vec<bool>,
    /// Integer value of each constant parameter, `None` otherwise.
    pub param_const_val: Vec<Option<u32>>,
    pub admissible: AdmissibilityInfo,
}

impl Constructor {
    pub fn new(loc: Loc, name: SymId, type_name: SymId, tag: u64) -> Self {
        let mut cs = Constructor {
            name,
            type_name,
            type_defined: None,
            loc,
            tag: 0,
            tag_bits: -1,
            type_arity: 0,
            is_fwd: false,
            is_enum: false,
            is_simple_enum: false,
            is_special: false,
            has_fixed_size: false,
            any_bits: false,
            size: MinMaxSize::IMPOSSIBLE,
            begins_with: BitPfxCollection::new(),
            fields: Vec::new(),
            params: Vec::new(),
            param_negated: Vec::new(),
            param_const_val: Vec::new(),
            admissible: AdmissibilityInfo::new(),
        };
        cs.set_tag(tag);
        cs
    }

    pub fn set_tag(&mut self, tag: u64) {
        self.tag = tag;
        self.tag_bits = if tag != 0 {
            63 - tag.trailing_zeros() as i32
        } else {
            -1
        };
    }

    pub fn get_name<'a>(&self, names: &'a Interner) -> &'a str {
        names.resolve(self.name)
    }

    pub fn qualified_name(&self, comp: &Compiler) -> String {
        let type_name = match self.type_defined {
            Some(tid) => comp.types[tid.index()].display_name(&comp.interner),
            None => comp.interner.resolve(self.type_name).to_string(),
        };
        format!("{}::{}", type_name, self.get_name(&comp.interner))
    }

    pub fn get_const_param(&self, idx: usize) -> Option<u32> {
        self.param_const_val.get(idx).copied().flatten()
    }

    pub fn isomorphic_to(&self, other: &Constructor, allow_other_names: bool) -> bool {
        if self.name != other.name
            || self.tag != other.tag
            || self.fields.len() != other.fields.len()
            || self.type_arity != other.type_arity
            || self.params.len() != other.params.len()
        {
            return false;
        }
        self.fields
            .iter()
            .zip(&other.fields)
            .all(|(a, b)| a.isomorphic_to(b, allow_other_names))
            && self.params.iter().zip(&other.params).all(|(a, b)| a.equal(b))
    }

    /// Canonical text of the declaration, as hashed for tag derivation.
    pub fn canonical_form(&self, comp: &Compiler) -> String {
        let mut out = String::new();
        write_constructor(&mut out, self, comp, 10);
        out
    }

    /// Derives the tag from the CRC32 of the canonical declaration text.
    pub fn compute_tag(&self, comp: &Compiler) -> u64 {
        let text = self.canonical_form(comp);
        let crc = crc32fast::hash(text.as_bytes());
        debug!("crc32('{}') = {:#x}", text, crc);
        ((crc as u64) << 32) | 0x8000_0000
    }

    /// Assigns the derived tag when none was given, and warns when an
    /// explicit tag differs from the derived one.
    pub fn check_assign_tag(&mut self, comp: &Compiler) {
        if !self.name.is_empty() && (self.tag == 0 || self.tag >> 63 != 0) {
            let computed = self.compute_tag(comp);
            if self.tag == 0 {
                self.set_tag(computed);
                if comp.options.show_tag_warnings {
                    let mut msg = format!(
                        "constructor `{}::{}` had no tag, assigned ",
                        comp.interner.resolve(self.type_name),
                        comp.interner.resolve(self.name)
                    );
                    write_tag(&mut msg, computed);
                    print_warning(&comp.file_name, self.loc, &msg);
                }
            } else if self.tag != computed && comp.options.show_tag_warnings {
                let mut msg = format!(
                    "constructor `{}::{}` has explicit tag ",
                    comp.interner.resolve(self.type_name),
                    comp.interner.resolve(self.name)
                );
                write_tag(&mut msg, self.tag);
                msg.push_str(" different from its computed tag ");
                write_tag(&mut msg, computed);
                print_warning(&comp.file_name, self.loc, &msg);
            }
        } else if self.name.is_empty() && self.tag == 0 {
            self.set_tag(1u64 << 63);
        }
    }

    pub fn compute_is_fwd(&mut self) {
        self.is_fwd = self.name.is_empty()
            && self.tag_bits == 0
            && self.type_arity == 0
            && self.fields.len() == 1
            && !self.fields[0].implicit
            && !self.fields[0].constraint;
    }
}

/// How an anonymous record type relates to the named type whose
/// constructor produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnonParent {
    #[default]
    Unset,
    Of(TypeId),
    Shared,
}

/// A named (or anonymous) algebraic family of constructors.
#[derive(Debug)]
pub struct Type {
    pub name: SymId,
    pub idx: TypeId,
    pub anon_parent: AnonParent,
    /// Fixed after the first use or constructor definition.
    pub arity: Option<usize>,
    /// Times this type was referenced from expressions.
    pub used: u32,
    /// Monotone declaration stamp driving facade order.
    pub last_declared: u32,
    /// Where the type was first declared or used.
    pub loc: Loc,
    pub produces_nat: bool,
    pub is_final: bool,
    pub is_builtin: bool,
    pub is_enum: bool,
    pub is_simple_enum: bool,
    pub is_special: bool,
    pub is_pfx_determ: bool,
    pub is_param_determ: bool,
    pub is_const_param_determ: bool,
    pub is_const_param_pfx_determ: bool,
    pub is_param_pfx_determ: bool,
    pub is_determ: bool,
    pub has_fixed_size: bool,
    pub any_bits: bool,
    pub is_auto: bool,
    pub is_anon: bool,
    pub is_unit: bool,
    pub is_bool: bool,
    pub useful_depth: u32,
    pub const_param_idx: Option<usize>,
    /// Witnesses of an unresolved dispatch conflict.
    pub conflict: Option<(usize, usize)>,
    pub size: MinMaxSize,
    pub constructors: Vec<Constructor>,
    pub args: Vec<TypeArgs>,
    pub begins_with: BitPfxCollection,
    pub admissible: AdmissibilityInfo,
    pub trie: Option<Box<BinTrie>>,
    pub dispatch: Option<DispatchPlan>,
}

impl Type {
    pub fn new(
        idx: TypeId,
        name: SymId,
        produces_nat: bool,
        arity: Option<usize>,
        is_final: bool,
        nonempty: bool,
    ) -> Self {
        Type {
            name,
            idx,
            anon_parent: AnonParent::Unset,
            arity,
            used: 0,
            last_declared: 0,
            loc: Loc::builtin(),
            produces_nat,
            is_final,
            is_builtin: is_final,
            is_enum: !is_final,
            is_simple_enum: !is_final,
            is_special: false,
            is_pfx_determ: false,
            is_param_determ: false,
            is_const_param_determ: false,
            is_const_param_pfx_determ: false,
            is_param_pfx_determ: false,
            is_determ: false,
            has_fixed_size: false,
            any_bits: false,
            is_auto: false,
            is_anon: false,
            is_unit: false,
            is_bool: false,
            useful_depth: 0,
            const_param_idx: None,
            conflict: None,
            size: MinMaxSize::IMPOSSIBLE,
            constructors: Vec::new(),
            args: vec![TypeArgs::empty(); arity.unwrap_or(0)],
            begins_with: if nonempty {
                BitPfxCollection::all()
            } else {
                BitPfxCollection::new()
            },
            admissible: AdmissibilityInfo::new(),
            trie: None,
            dispatch: None,
        }
    }

    pub fn display_name(&self, names: &Interner) -> String {
        if self.name.is_empty() {
            format!("TYPE_{}", self.idx.0)
        } else {
            names.resolve(self.name).to_string()
        }
    }

    pub fn unique_constructor_equals(&self, cs: &Constructor, allow_other_names: bool) -> bool {
        self.constructors.len() == 1 && self.constructors[0].isomorphic_to(cs, allow_other_names)
    }

    /// An argument usable for constant-parameter dispatch: a positive nat
    /// that every constructor instantiates with a literal constant.
    pub fn is_const_arg(&self, p: usize) -> bool {
        self.args[p]
            == TypeArgs::IS_NAT | TypeArgs::IS_POS
    }

    pub fn detect_const_params(&mut self) -> Option<usize> {
        self.const_param_idx = (0..self.args.len()).find(|&p| self.is_const_arg(p));
        self.const_param_idx
    }

    /// Distinct values of parameter `p` over all constructors.
    pub fn get_all_param_values(&self, p: usize) -> Vec<Option<u32>> {
        let mut res: Vec<Option<u32>> = self
            .constructors
            .iter()
            .map(|cs| cs.get_const_param(p))
            .collect();
        res.sort();
        res.dedup();
        res
    }

    /// Constructor indices whose parameter `p` equals `pv`.
    pub fn get_constr_by_param_value(&self, p: usize, pv: Option<u32>) -> Vec<usize> {
        self.constructors
            .iter()
            .enumerate()
            .filter(|(_, cs)| cs.get_const_param(p) == pv)
            .map(|(i, _)| i)
            .collect()
    }

    /// A parameterless fixed-size full type is a plain unit or boolean.
    pub fn detect_basic_types(&mut self) {
        if self.args.is_empty()
            && !self.constructors.is_empty()
            && self.size.is_fixed()
            && self.any_bits
        {
            let min = self.size.unpack();
            self.is_unit = min.min_bits == 0 && min.min_refs == 0;
            self.is_bool = min.min_bits == 1 && min.min_refs == 0;
        }
    }
}

/// Binds a fully parsed constructor to its type: fixes arity, merges
/// argument kinds and polarities, type-checks the fields, resolves
/// negated parameters, assigns the tag, and attaches the constructor.
pub fn bind_constructor(
    comp: &mut Compiler,
    type_id: TypeId,
    mut cs: Constructor,
    loc: Loc,
) -> Result<()> {
    let eq_type = comp.builtins.eq;
    {
        let names = &comp.interner;
        let ty = &comp.types[type_id.index()];
        if ty.is_final {
            return Err(binding_error(
                loc,
                format!(
                    "cannot add new constructor `{}` to a finalized type `{}`",
                    names.resolve(cs.name),
                    ty.display_name(names)
                ),
            ));
        }
    }
    match comp.types[type_id.index()].arity {
        None => {
            let ty = &mut comp.types[type_id.index()];
            ty.arity = Some(cs.type_arity);
            ty.args = vec![TypeArgs::empty(); cs.type_arity];
        }
        Some(arity) if arity != cs.type_arity => {
            return Err(arity_error(
                loc,
                format!(
                    "parametrized type `{}` redefined with different arity",
                    comp.interner.resolve(cs.type_name)
                ),
            ));
        }
        Some(_) => {}
    }
    debug_assert_eq!(cs.type_arity, cs.params.len());
    debug_assert_eq!(cs.params.len(), cs.param_negated.len());
    let mut true_params = 0;
    for i in 0..cs.type_arity {
        let expr = &cs.params[i];
        let negated = cs.param_negated[i];
        let ty = &mut comp.types[type_id.index()];
        let x = &mut ty.args[i];
        *x |= if expr.is_nat {
            TypeArgs::IS_NAT
        } else {
            TypeArgs::IS_TYPE
        };
        if x.contains(TypeArgs::IS_NAT | TypeArgs::IS_TYPE) {
            return Err(kind_error(
                expr.loc,
                format!(
                    "formal parameter to type `{}` has incorrect type",
                    comp.interner.resolve(cs.type_name)
                ),
            ));
        }
        *x |= if negated {
            TypeArgs::IS_NEG
        } else {
            TypeArgs::IS_POS
        };
        if x.contains(TypeArgs::IS_POS | TypeArgs::IS_NEG) {
            return Err(polarity_error(
                expr.loc,
                format!(
                    "formal parameter to type `{}` has incorrect polarity",
                    comp.interner.resolve(cs.type_name)
                ),
            ));
        }
        if cs.param_const_val[i].is_none() {
            *x |= TypeArgs::NON_CONST;
        }
        if !negated {
            true_params += 1;
        }
    }
    // Type-check constraint and explicit field expressions; this also
    // marks parameters they determine as known.
    let mut explicit_fields = 0;
    for i in 0..cs.fields.len() {
        let field = &cs.fields[i];
        if field.constraint || !field.implicit {
            if !field.constraint {
                explicit_fields += 1;
            }
            let ty = cs.fields[i].ty.clone();
            bind_value(&ty, false, &mut cs.fields, &comp.interner, eq_type, true)?;
            cs.fields[i].known = true;
        }
    }
    cs.is_enum = explicit_fields == 0;
    cs.is_simple_enum = cs.is_enum && true_params == 0;
    for i in 0..cs.type_arity {
        if cs.param_negated[i] {
            let param = cs.params[i].clone();
            bind_value(&param, true, &mut cs.fields, &comp.interner, eq_type, false)?;
        }
    }
    for field in &cs.fields {
        if !field.known {
            return Err(binding_error(
                field.loc,
                format!("field `{}` is left unbound", field.display_name(&comp.interner)),
            ));
        }
    }
    if !cs.name.is_empty() {
        let ty = &comp.types[type_id.index()];
        if let Some(prev) = ty.constructors.iter().find(|c| c.name == cs.name) {
            let cname = format!(
                "{}::{}",
                comp.interner.resolve(ty.name),
                comp.interner.resolve(cs.name)
            );
            return Err(binding_error(
                cs.loc,
                format!("constructor `{}` redefined", cname),
            )
            .with_note(prev.loc, format!("constructor `{}` first defined here", cname)));
        }
    }
    if cs.type_defined.is_none() && cs.type_name == comp.types[type_id.index()].name {
        cs.type_defined = Some(type_id);
    }
    cs.check_assign_tag(comp);
    cs.compute_is_fwd();
    let names = &comp.interner;
    let ty = &mut comp.types[type_id.index()];
    if ty.constructors.len() >= 64 {
        return Err(overflow_error(
            cs.loc,
            format!(
                "cannot work with more than 64 constructors for type `{}`",
                ty.display_name(names)
            ),
        ));
    }
    ty.is_enum &= cs.is_enum;
    ty.is_simple_enum &= cs.is_simple_enum;
    if !ty.constructors.is_empty() && ty.is_special != cs.is_special {
        return Err(binding_error(
            cs.loc,
            format!(
                "type `{}` has mixed special and non-special constructors",
                ty.display_name(names)
            ),
        ));
    }
    ty.is_special = cs.is_special;
    ty.constructors.push(cs);
    Ok(())
}
