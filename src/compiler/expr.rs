use std::collections::HashMap;
use std::fmt::Write;

use crate::compiler::Compiler;
use crate::compiler::diagnostics::{
    Loc, Result, arity_error, binding_error, kind_error, overflow_error, polarity_error,
};
use crate::compiler::intern::{Interner, SymId};
use crate::compiler::natlattice::{abstract_add, abstract_getbit, abstract_mul, abstract_nat_const};
use crate::compiler::size::MinMaxSize;
use crate::compiler::types::{Constructor, Field, Type, TypeArgs, TypeId};

/// Upper bound on distinct hash-consed constant expressions.
pub const MAX_CONST_EXPRS: usize = 100_000;

/// A typed expression tree: type applications plus the arithmetic of
/// natural-valued parameters.
#[derive(Debug, Clone)]
pub enum TypeExprKind {
    /// The kind "Type" itself (type of implicit `{X:Type}` parameters).
    Type,
    /// Reference to field `idx` of the enclosing constructor.
    Param { idx: usize },
    /// Application of a named type to argument expressions.
    Apply {
        type_ref: TypeId,
        name: SymId,
        args: Vec<TypeExpr>,
    },
    Add(Box<TypeExpr>, Box<TypeExpr>),
    GetBit(Box<TypeExpr>, Box<TypeExpr>),
    MulConst { factor: u32, arg: Box<TypeExpr> },
    IntConst { value: u32 },
    /// `count * element` repetition.
    Tuple(Box<TypeExpr>, Box<TypeExpr>),
    /// `cond ? element` conditional presence.
    CondType(Box<TypeExpr>, Box<TypeExpr>),
    /// `^T`, a reference to a sub-cell.
    Ref(Box<TypeExpr>),
}

#[derive(Debug, Clone)]
pub struct TypeExpr {
    pub kind: TypeExprKind,
    pub loc: Loc,
    /// Produces a natural number rather than a type.
    pub is_nat: bool,
    /// Restricted nat domain (`#` or an application of a nat-producing type).
    pub is_nat_subtype: bool,
    /// The value is computed from context, not supplied.
    pub negated: bool,
    /// Usable only where a type is syntactically expected.
    pub tchk_only: bool,
    /// Non-zero: 1-based index into the shared constant-expression pool.
    pub is_constexpr: usize,
}

bitflags::bitflags! {
    /// Parse-context mask threaded through the expression grammar.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Mode: u32 {
        /// Type expressions are acceptable here.
        const TYPE = 1;
        /// Integer expressions are acceptable here.
        const NAT = 2;
        /// Unknown fields referenced here become negated (RHS parameters).
        const AUTO_NEG = 4;
        /// Type-checking context: comparison pseudo-types are allowed.
        const TCHK = 8;
    }
}

impl TypeExpr {
    pub fn new(loc: Loc, kind: TypeExprKind) -> Self {
        let is_nat = matches!(
            kind,
            TypeExprKind::Add(..)
                | TypeExprKind::GetBit(..)
                | TypeExprKind::MulConst { .. }
                | TypeExprKind::IntConst { .. }
        );
        TypeExpr {
            kind,
            loc,
            is_nat,
            is_nat_subtype: false,
            negated: false,
            tchk_only: false,
            is_constexpr: 0,
        }
    }

    pub fn mk_intconst(loc: Loc, value: u32) -> Self {
        TypeExpr::new(loc, TypeExprKind::IntConst { value })
    }

    pub fn mk_cellref(loc: Loc, inner: TypeExpr) -> Self {
        TypeExpr::new(loc, TypeExprKind::Ref(Box::new(inner)))
    }

    /// An application of `ty` with no arguments yet.
    pub fn mk_apply_empty(loc: Loc, type_ref: TypeId, ty: &Type) -> Self {
        let mut expr = TypeExpr::new(
            loc,
            TypeExprKind::Apply {
                type_ref,
                name: ty.name,
                args: Vec::new(),
            },
        );
        expr.is_nat_subtype = ty.produces_nat && ty.arity == Some(0);
        expr
    }

    /// Multiplication: at least one side must be an integer constant.
    pub fn mk_mulint(loc: Loc, expr1: TypeExpr, expr2: TypeExpr) -> Result<TypeExpr> {
        let second_const = matches!(expr2.kind, TypeExprKind::IntConst { .. });
        let first_const = matches!(expr1.kind, TypeExprKind::IntConst { .. });
        let (factor_expr, arg) = if second_const {
            (expr2, expr1)
        } else if first_const {
            (expr1, expr2)
        } else {
            return Err(kind_error(
                loc,
                "multiplication allowed only by constant values",
            ));
        };
        if !arg.is_nat {
            return Err(kind_error(
                arg.loc,
                "argument to integer multiplication should be a number",
            ));
        }
        let TypeExprKind::IntConst { value: factor } = factor_expr.kind else {
            unreachable!()
        };
        if let TypeExprKind::IntConst { value } = arg.kind {
            let product = factor as u64 * value as u64;
            if product >= 1 << 31 {
                return Err(overflow_error(loc, "product does not fit in 31 bits"));
            }
            return Ok(TypeExpr::mk_intconst(loc, product as u32));
        }
        if factor == 0 {
            return Ok(factor_expr);
        }
        let negated = arg.negated;
        let mut expr = TypeExpr::new(
            loc,
            TypeExprKind::MulConst {
                factor,
                arg: Box::new(arg),
            },
        );
        expr.negated = negated;
        Ok(expr)
    }

    /// Appends one more argument to an application.
    pub fn mk_apply_gen(loc: Loc, mut expr1: TypeExpr, expr2: TypeExpr) -> Result<TypeExpr> {
        match &mut expr1.kind {
            TypeExprKind::Apply { args, .. } => {
                args.push(expr2);
                Ok(expr1)
            }
            _ => Err(kind_error(loc, "cannot apply one expression to the other")),
        }
    }

    /// Child expressions, in argument order.
    pub fn children(&self) -> Vec<&TypeExpr> {
        match &self.kind {
            TypeExprKind::Type | TypeExprKind::Param { .. } | TypeExprKind::IntConst { .. } => {
                Vec::new()
            }
            TypeExprKind::Apply { args, .. } => args.iter().collect(),
            TypeExprKind::Add(a, b)
            | TypeExprKind::GetBit(a, b)
            | TypeExprKind::Tuple(a, b)
            | TypeExprKind::CondType(a, b) => vec![&**a, &**b],
            TypeExprKind::MulConst { arg, .. } => vec![&**arg],
            TypeExprKind::Ref(a) => vec![&**a],
        }
    }

    fn children_mut(&mut self) -> Vec<&mut TypeExpr> {
        match &mut self.kind {
            TypeExprKind::Type | TypeExprKind::Param { .. } | TypeExprKind::IntConst { .. } => {
                Vec::new()
            }
            TypeExprKind::Apply { args, .. } => args.iter_mut().collect(),
            TypeExprKind::Add(a, b)
            | TypeExprKind::GetBit(a, b)
            | TypeExprKind::Tuple(a, b)
            | TypeExprKind::CondType(a, b) => vec![&mut **a, &mut **b],
            TypeExprKind::MulConst { arg, .. } => vec![&mut **arg],
            TypeExprKind::Ref(a) => vec![&mut **a],
        }
    }

    /// Discriminant and payload used for structural identity.
    fn shape(&self) -> (u8, u64, Option<TypeId>) {
        match &self.kind {
            TypeExprKind::Type => (1, 0, None),
            TypeExprKind::Param { idx } => (2, *idx as u64, None),
            TypeExprKind::Apply { type_ref, name, .. } => {
                (3, name.index() as u64, Some(*type_ref))
            }
            TypeExprKind::Add(..) => (4, 0, None),
            TypeExprKind::GetBit(..) => (5, 0, None),
            TypeExprKind::MulConst { factor, .. } => (6, *factor as u64, None),
            TypeExprKind::IntConst { value } => (7, *value as u64, None),
            TypeExprKind::Tuple(..) => (8, 0, None),
            TypeExprKind::Ref(..) => (9, 0, None),
            TypeExprKind::CondType(..) => (10, 0, None),
        }
    }

    /// Structural equality, ignoring locations and analysis flags.
    pub fn equal(&self, other: &TypeExpr) -> bool {
        if self.shape() != other.shape() {
            return false;
        }
        let a = self.children();
        let b = other.children();
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equal(y))
    }

    /// An application of an anonymous record type.
    pub fn is_anon(&self, types: &[Type]) -> bool {
        matches!(&self.kind, TypeExprKind::Apply { type_ref, args, .. }
            if args.is_empty() && types[type_ref.index()].is_anon)
    }

    /// A cell reference to an anonymous record type.
    pub fn is_ref_to_anon(&self, types: &[Type]) -> bool {
        matches!(&self.kind, TypeExprKind::Ref(inner) if inner.is_anon(types))
    }

    /// Rejects comparison pseudo-types outside type-checking positions.
    pub fn no_tchk(&self) -> Result<()> {
        if self.tchk_only {
            return Err(kind_error(
                self.loc,
                "type expression can be used only in a type-checking context",
            ));
        }
        Ok(())
    }

    /// Verifies that this expression is acceptable in context `mode`.
    pub fn check_mode(&self, loc: Loc, mode: Mode) -> Result<()> {
        if self.is_nat {
            if !mode.contains(Mode::NAT) {
                return Err(kind_error(loc, "type expression required"));
            }
        } else if !mode.contains(Mode::TYPE) {
            return Err(kind_error(loc, "integer expression required"));
        }
        if self.tchk_only && !mode.contains(Mode::TCHK) {
            return Err(kind_error(
                self.loc,
                "type expression can be used only in a type-checking context",
            ));
        }
        Ok(())
    }

    /// Abstract value of a natural expression in the
    /// `{0, 1, even>=2, odd>=3}` lattice (`0xF` = unconstrained).
    pub fn abstract_interpret_nat(&self) -> u8 {
        if !self.is_nat || self.tchk_only {
            return 0;
        }
        match &self.kind {
            // Natural parameters can take arbitrary values.
            TypeExprKind::Param { .. } => 0xF,
            TypeExprKind::Add(a, b) => {
                abstract_add(a.abstract_interpret_nat(), b.abstract_interpret_nat())
            }
            TypeExprKind::GetBit(a, b) => {
                abstract_getbit(a.abstract_interpret_nat(), b.abstract_interpret_nat())
            }
            TypeExprKind::IntConst { value } => abstract_nat_const(*value),
            TypeExprKind::MulConst { factor, arg } => {
                abstract_mul(arg.abstract_interpret_nat(), abstract_nat_const(*factor))
            }
            _ => 0xF,
        }
    }
}

/// Closes an application node once its argument count is known: fixes the
/// applied type's arity on first use, merges argument kind and polarity
/// flags, and derives the node's own polarity.
pub fn close_expr(
    expr: &mut TypeExpr,
    loc: Loc,
    types: &mut [Type],
    eq_type: TypeId,
    names: &Interner,
) -> Result<()> {
    let TypeExprKind::Apply {
        type_ref, args, ..
    } = &mut expr.kind
    else {
        return Ok(());
    };
    let ty = &mut types[type_ref.index()];
    match ty.arity {
        None => {
            ty.arity = Some(args.len());
            ty.args = vec![TypeArgs::empty(); args.len()];
        }
        Some(arity) if arity != args.len() => {
            return Err(arity_error(
                expr.loc,
                format!(
                    "operator `{}` applied with incorrect number of arguments, \
                     partial type applications not supported",
                    ty.display_name(names)
                ),
            ));
        }
        Some(_) => {}
    }
    expr.is_nat_subtype = ty.produces_nat;
    let is_eq = *type_ref == eq_type;
    let mut neg_cnt = 0;
    for (i, arg) in args.iter().enumerate() {
        let x = &mut ty.args[i];
        if arg.negated {
            neg_cnt += 1;
            if !is_eq {
                if x.contains(TypeArgs::IS_POS) {
                    return Err(polarity_error(
                        arg.loc,
                        format!(
                            "passed an argument of incorrect polarity to `{}`",
                            ty.display_name(names)
                        ),
                    ));
                }
                *x |= TypeArgs::IS_NEG;
            } else if neg_cnt == 2 {
                return Err(polarity_error(
                    loc,
                    "cannot equate two expressions of negative polarity",
                ));
            }
        }
        arg.no_tchk()?;
        if arg.is_nat {
            *x |= TypeArgs::IS_NAT;
        } else {
            *x |= TypeArgs::IS_TYPE;
            if arg.negated {
                return Err(polarity_error(
                    arg.loc,
                    "cannot use negative types as arguments to other types",
                ));
            }
        }
    }
    expr.negated = neg_cnt != 0;
    expr.tchk_only = neg_cnt != 0;
    Ok(())
}

/// Binds an expression to a value of the given polarity, marking fields
/// known or used along the way. See the constructor binder for the calling
/// discipline.
pub fn bind_value(
    expr: &TypeExpr,
    value_negated: bool,
    fields: &mut [Field],
    names: &Interner,
    eq_type: TypeId,
    checking_type: bool,
) -> Result<()> {
    if !checking_type {
        expr.no_tchk()?;
    } else {
        if expr.is_nat {
            return Err(kind_error(
                expr.loc,
                "cannot check a type against an integer expression",
            ));
        }
        if value_negated {
            return Err(polarity_error(
                expr.loc,
                "cannot compute a value knowing only its type",
            ));
        }
    }
    if expr.negated && value_negated {
        return Err(polarity_error(expr.loc, "expression has wrong polarity"));
    }
    if !expr.is_nat && !checking_type {
        if !expr.negated && !value_negated {
            if matches!(&expr.kind, TypeExprKind::Apply { args, .. } if args.is_empty()) {
                return Err(binding_error(
                    expr.loc,
                    "use of a global type or an undeclared variable",
                ));
            }
            return Err(binding_error(
                expr.loc,
                "cannot check type expressions for equality",
            ));
        }
        if expr.negated && !matches!(expr.kind, TypeExprKind::Param { .. }) {
            return Err(binding_error(
                expr.loc,
                "types can be assigned only to free type variables",
            ));
        }
    }
    match &expr.kind {
        TypeExprKind::Add(a, b) => {
            debug_assert!(!(a.negated && b.negated));
            // The computed side carries the sum's polarity; the negated
            // side receives the assigned value.
            let (pos, neg) = if a.negated { (b, a) } else { (a, b) };
            bind_value(pos, expr.negated, fields, names, eq_type, false)?;
            bind_value(neg, false, fields, names, eq_type, false)
        }
        TypeExprKind::IntConst { .. } | TypeExprKind::Type => Ok(()),
        TypeExprKind::MulConst { arg, .. } => {
            bind_value(arg, value_negated, fields, names, eq_type, false)
        }
        TypeExprKind::GetBit(a, b) => {
            bind_value(a, false, fields, names, eq_type, false)?;
            bind_value(b, false, fields, names, eq_type, false)
        }
        TypeExprKind::Param { idx } => {
            let field = &mut fields[*idx];
            if !expr.negated || checking_type {
                if !field.known {
                    return Err(binding_error(
                        expr.loc,
                        format!(
                            "variable `{}` used before being assigned to",
                            field.display_name(names)
                        ),
                    ));
                }
                field.used = true;
            } else if !field.known {
                field.known = true;
            }
            Ok(())
        }
        TypeExprKind::Apply { type_ref, args, .. } => {
            if *type_ref == eq_type {
                debug_assert!(args.len() == 2 && !(args[0].negated && args[1].negated));
                let (pos, neg) = if args[0].negated {
                    (&args[1], &args[0])
                } else {
                    (&args[0], &args[1])
                };
                bind_value(pos, expr.negated, fields, names, eq_type, false)?;
                bind_value(neg, false, fields, names, eq_type, false)
            } else {
                for arg in args.iter().filter(|a| !a.negated) {
                    bind_value(arg, true, fields, names, eq_type, false)?;
                }
                for arg in args.iter().filter(|a| a.negated) {
                    bind_value(arg, false, fields, names, eq_type, false)?;
                }
                Ok(())
            }
        }
        TypeExprKind::CondType(a, b) | TypeExprKind::Tuple(a, b) => {
            debug_assert!(!expr.negated && !a.negated && !b.negated);
            bind_value(a, true, fields, names, eq_type, false)?;
            bind_value(b, true, fields, names, eq_type, false)
        }
        TypeExprKind::Ref(a) => {
            bind_value(a, value_negated, fields, names, eq_type, checking_type)
        }
    }
}

/// Hash-consing pool of closed constant type expressions.
///
/// Entries are kept in insertion order; ids are 1-based so that zero can
/// mean "not a constant expression".
#[derive(Default)]
pub struct ConstExprPool {
    map: HashMap<ConstKey, usize>,
    entries: Vec<TypeExpr>,
}

#[derive(Hash, PartialEq, Eq)]
struct ConstKey {
    shape: (u8, u64, Option<TypeId>),
    args: Vec<(bool, usize)>,
}

impl ConstExprPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for the 1-based id.
    pub fn get(&self, id: usize) -> &TypeExpr {
        &self.entries[id - 1]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &TypeExpr)> {
        self.entries.iter().enumerate().map(|(i, e)| (i + 1, e))
    }
}

/// Recursively assigns constant-expression ids to every closed, non-negated
/// subexpression, sharing structurally equal ones.
pub fn detect_constexpr(expr: &mut TypeExpr, pool: &mut ConstExprPool) -> Result<bool> {
    if expr.is_constexpr != 0 {
        return Ok(true);
    }
    let mut constant = !expr.negated;
    for child in expr.children_mut() {
        if !detect_constexpr(child, pool)? && !child.negated {
            constant = false;
        }
    }
    if !constant || matches!(expr.kind, TypeExprKind::Param { .. }) {
        return Ok(false);
    }
    let key = ConstKey {
        shape: expr.shape(),
        args: expr
            .children()
            .iter()
            .map(|c| (c.negated, c.is_constexpr))
            .collect(),
    };
    if let Some(&id) = pool.map.get(&key) {
        expr.is_constexpr = id;
        return Ok(true);
    }
    if pool.entries.len() >= MAX_CONST_EXPRS {
        return Err(overflow_error(
            expr.loc,
            "too many constant type expressions",
        ));
    }
    pool.entries.push(expr.clone());
    let id = pool.entries.len();
    pool.map.insert(key, id);
    expr.is_constexpr = id;
    // The pooled copy records its own id.
    pool.entries.last_mut().unwrap().is_constexpr = id;
    Ok(true)
}

/// Bit/reference size interval of an expression in a cell.
pub fn compute_size(expr: &TypeExpr, comp: &Compiler) -> MinMaxSize {
    if expr.is_nat {
        return MinMaxSize::ZERO;
    }
    match &expr.kind {
        TypeExprKind::Type => MinMaxSize::ZERO,
        // Any size possible for type parameters.
        TypeExprKind::Param { .. } => MinMaxSize::ANY,
        TypeExprKind::Ref(inner) => {
            if compute_size(inner, comp).is_possible() {
                MinMaxSize::ONE_REF
            } else {
                MinMaxSize::IMPOSSIBLE
            }
        }
        TypeExprKind::CondType(cond, elem) => {
            let z = cond.abstract_interpret_nat();
            if z & !1 == 0 {
                // The condition is always zero.
                MinMaxSize::ZERO
            } else {
                let mut t = compute_size(elem, comp);
                if z & 1 != 0 {
                    t.clear_min();
                }
                t
            }
        }
        TypeExprKind::Tuple(count, elem) => {
            let z = count.abstract_interpret_nat();
            if z & !1 == 0 {
                return MinMaxSize::ZERO;
            }
            let mut t = compute_size(elem, comp);
            if let TypeExprKind::IntConst { value } = count.kind {
                t.repeat(value);
                return t;
            }
            if z & 1 != 0 {
                // Zero repetition count possible.
                t.clear_min();
            }
            if z & 12 != 0 {
                // May be repeated more than once.
                let n = if z & 1 != 0 {
                    0
                } else if z & 2 != 0 {
                    1
                } else {
                    2
                };
                t.repeat_at_least(n);
            }
            t
        }
        TypeExprKind::Apply { type_ref, args, .. } => {
            let b = comp.builtins;
            if args.len() == 1 {
                if let TypeExprKind::IntConst { value: n } = args[0].kind {
                    let t = *type_ref;
                    if t == b.nat_width || t == b.int || t == b.uint || t == b.bits {
                        return MinMaxSize::fixed_size(n.min(2047));
                    } else if t == b.nat_leq {
                        return MinMaxSize::fixed_size(32 - n.leading_zeros());
                    } else if t == b.nat_less {
                        return if n != 0 {
                            MinMaxSize::fixed_size(32 - (n - 1).leading_zeros())
                        } else {
                            MinMaxSize::fixed_size(2047)
                        };
                    }
                }
            }
            comp.types[type_ref.index()].size
        }
        _ => MinMaxSize::IMPOSSIBLE,
    }
}

/// Whether every bit pattern of the expression's size is a valid encoding.
pub fn compute_any_bits(expr: &TypeExpr, comp: &Compiler) -> bool {
    if expr.is_nat {
        return true;
    }
    match &expr.kind {
        TypeExprKind::Type => true,
        TypeExprKind::Param { .. } => false,
        TypeExprKind::Ref(..) => true,
        TypeExprKind::Tuple(cond, elem) | TypeExprKind::CondType(cond, elem) => {
            let z = cond.abstract_interpret_nat();
            if z & !1 == 0 {
                true
            } else {
                compute_any_bits(elem, comp)
            }
        }
        TypeExprKind::Apply { type_ref, args, .. } => {
            let b = comp.builtins;
            if args.len() == 1 {
                if let TypeExprKind::IntConst { value: n } = args[0].kind {
                    if *type_ref == b.nat_leq {
                        return n & (n + 1) == 0;
                    } else if *type_ref == b.nat_less {
                        return n & n.wrapping_sub(1) == 0;
                    }
                }
            }
            comp.types[type_ref.index()].any_bits
        }
        _ => false,
    }
}

/// Writes the canonical rendering of an expression.
///
/// `prio` is the precedence of the enclosing context; parentheses appear
/// when the node binds looser. Mode bit 0 flips the `~` polarity mark on
/// parameters, bit 1 selects the brief (tag-derivation) form, bit 2 renders
/// an anonymous constructor in brackets.
pub fn write_expr(
    out: &mut String,
    expr: &TypeExpr,
    comp: &Compiler,
    cs: Option<&Constructor>,
    prio: i32,
    mode: u8,
) {
    let prio = if mode & 2 != 0 { 0 } else { prio };
    match &expr.kind {
        TypeExprKind::Type => {
            out.push_str("Type");
        }
        TypeExprKind::Param { idx } => {
            let param_name = cs
                .and_then(|cs| cs.fields.get(*idx))
                .map(|f| f.name)
                .unwrap_or(SymId::EMPTY);
            if expr.negated != (mode & 1 != 0) {
                out.push('~');
            }
            if !param_name.is_empty() {
                out.push_str(comp.interner.resolve(param_name));
            } else {
                let _ = write!(out, "_{}", idx + 1);
            }
        }
        TypeExprKind::Apply { type_ref, args, .. } => {
            let ty = &comp.types[type_ref.index()];
            if args.is_empty()
                && ty.name.is_empty()
                && ty.constructors.len() == 1
                && ty.constructors[0].name.is_empty()
                && ty.constructors[0].tag & !(1u64 << 63) == 0
            {
                write_constructor(out, &ty.constructors[0], comp, mode | 4);
            } else {
                let parens = prio > 90 && !args.is_empty();
                if parens {
                    out.push('(');
                }
                out.push_str(&ty.display_name(&comp.interner));
                for arg in args {
                    out.push(' ');
                    write_expr(out, arg, comp, cs, 91, mode);
                }
                if parens {
                    out.push(')');
                }
            }
        }
        TypeExprKind::Add(a, b) => {
            let parens = prio > 20;
            if parens {
                out.push('(');
            }
            write_expr(out, a, comp, cs, 20, mode);
            out.push_str(" + ");
            write_expr(out, b, comp, cs, 21, mode);
            if parens {
                out.push(')');
            }
        }
        TypeExprKind::GetBit(a, b) => {
            let parens = prio > 97;
            if parens {
                out.push('(');
            }
            write_expr(out, a, comp, cs, 98, mode);
            out.push('.');
            write_expr(out, b, comp, cs, 98, mode);
            if parens {
                out.push(')');
            }
        }
        TypeExprKind::IntConst { value } => {
            let _ = write!(out, "{}", value);
        }
        TypeExprKind::MulConst { factor, arg } => {
            let parens = prio > 30;
            if parens {
                out.push('(');
            }
            let _ = write!(out, "{} * ", factor);
            write_expr(out, arg, comp, cs, 31, mode);
            if parens {
                out.push(')');
            }
        }
        TypeExprKind::Tuple(a, b) => {
            let parens = prio > 30;
            if parens {
                out.push('(');
            }
            write_expr(out, a, comp, cs, 30, mode);
            out.push_str(" * ");
            write_expr(out, b, comp, cs, 31, mode);
            if parens {
                out.push(')');
            }
        }
        TypeExprKind::CondType(a, b) => {
            let parens = prio > 95;
            if parens {
                out.push('(');
            }
            write_expr(out, a, comp, cs, 96, mode);
            out.push('?');
            write_expr(out, b, comp, cs, 96, mode);
            if parens {
                out.push(')');
            }
        }
        TypeExprKind::Ref(inner) => {
            out.push('^');
            write_expr(out, inner, comp, cs, 100, mode);
        }
    }
}

/// Writes a constructor in canonical form. Mode bit 1 selects the brief
/// form used for tag derivation (no braces, no tag, no trailing `;`),
/// bit 2 the `[ ... ]` anonymous-record form, bit 3 suppresses the tag.
pub fn write_constructor(out: &mut String, cs: &Constructor, comp: &Compiler, mode: u8) {
    if mode & 4 != 0 {
        out.push('[');
    } else {
        out.push_str(comp.interner.resolve(cs.name));
    }
    if mode & 8 == 0 {
        write_tag(out, cs.tag);
    }
    for field in &cs.fields {
        out.push(' ');
        if field.implicit || field.constraint {
            if mode & 2 == 0 {
                out.push('{');
            }
            if !field.name.is_empty() {
                out.push_str(comp.interner.resolve(field.name));
                out.push(':');
            }
            write_expr(out, &field.ty, comp, Some(cs), 0, mode & !1);
            if mode & 2 == 0 {
                out.push('}');
            }
        } else {
            if !field.name.is_empty() {
                out.push_str(comp.interner.resolve(field.name));
                out.push(':');
            }
            write_expr(out, &field.ty, comp, Some(cs), 95, mode & !1);
        }
    }
    if mode & 4 != 0 {
        out.push_str(" ]");
        return;
    }
    out.push_str(" = ");
    match cs.type_defined {
        Some(tid) => out.push_str(&comp.types[tid.index()].display_name(&comp.interner)),
        None => out.push_str(comp.interner.resolve(cs.type_name)),
    }
    for (param, &negated) in cs.params.iter().zip(&cs.param_negated) {
        out.push(' ');
        if negated {
            out.push('~');
        }
        write_expr(out, param, comp, Some(cs), 100, mode | 1);
    }
    if mode & 2 == 0 {
        out.push(';');
    }
}

/// Writes a tag in literal form (`$101`, `#b5`, `$_`), choosing the binary
/// shape when the prefix is at most 4 bits long.
pub fn write_tag(out: &mut String, tag: u64) {
    if tag == 0 {
        return;
    }
    if tag & ((1u64 << 59) - 1) == 0 {
        out.push('$');
        let mut t = tag;
        let mut c = 0;
        while t & !(1u64 << 63) != 0 {
            out.push(if t >> 63 != 0 { '1' } else { '0' });
            t <<= 1;
            c += 1;
        }
        if c == 0 {
            out.push('_');
        }
    } else {
        out.push('#');
        let mut t = tag;
        while t & !(1u64 << 63) != 0 {
            out.push(char::from_digit((t >> 60) as u32, 16).unwrap());
            t <<= 4;
        }
        if t == 0 {
            out.push('_');
        }
    }
}

/// Derives the canonical name of a hash-consed constant expression.
pub fn const_type_name(out: &mut String, expr: &TypeExpr, comp: &Compiler) {
    if expr.negated {
        return;
    }
    match &expr.kind {
        TypeExprKind::Type => out.push_str("_Type"),
        TypeExprKind::Param { .. } => {}
        TypeExprKind::Add(a, b) => {
            const_type_name(out, a, comp);
            out.push_str("_plus");
            const_type_name(out, b, comp);
        }
        TypeExprKind::GetBit(a, b) => {
            const_type_name(out, a, comp);
            out.push_str("_bit");
            const_type_name(out, b, comp);
        }
        TypeExprKind::IntConst { value } => {
            let _ = write!(out, "_{}", value);
        }
        TypeExprKind::MulConst { factor, arg } => {
            let _ = write!(out, "_mul{}", factor);
            const_type_name(out, arg, comp);
        }
        TypeExprKind::Ref(inner) => {
            out.push_str("_Ref");
            const_type_name(out, inner, comp);
        }
        TypeExprKind::Tuple(a, b) => {
            out.push_str("_tuple");
            const_type_name(out, a, comp);
            const_type_name(out, b, comp);
        }
        TypeExprKind::CondType(a, b) => {
            out.push_str("_if");
            const_type_name(out, a, comp);
            const_type_name(out, b, comp);
        }
        TypeExprKind::Apply { type_ref, args, .. } => {
            out.push('_');
            let b = comp.builtins;
            let ty = &comp.types[type_ref.index()];
            if ty.produces_nat {
                if *type_ref == b.nat {
                    out.push_str("nat");
                } else if *type_ref == b.nat_width {
                    out.push_str("natwidth");
                } else if *type_ref == b.nat_leq {
                    out.push_str("natleq");
                } else if *type_ref == b.nat_less {
                    out.push_str("natless");
                }
            } else {
                out.push_str(&ty.display_name(&comp.interner));
            }
            for arg in args {
                const_type_name(out, arg, comp);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abstract_interpretation_of_constants() {
        let loc = Loc::builtin();
        let two = TypeExpr::mk_intconst(loc, 2);
        assert_eq!(two.abstract_interpret_nat(), 4);
        let sum = TypeExpr::new(
            loc,
            TypeExprKind::Add(
                Box::new(TypeExpr::mk_intconst(loc, 1)),
                Box::new(TypeExpr::mk_intconst(loc, 2)),
            ),
        );
        assert!(sum.is_nat);
        assert_eq!(sum.abstract_interpret_nat(), 8); // 3 is odd >= 3
    }

    #[test]
    fn mulint_folds_constants() {
        let loc = Loc::builtin();
        let product = TypeExpr::mk_mulint(
            loc,
            TypeExpr::mk_intconst(loc, 6),
            TypeExpr::mk_intconst(loc, 7),
        )
        .unwrap();
        assert!(matches!(product.kind, TypeExprKind::IntConst { value: 42 }));
        let overflow = TypeExpr::mk_mulint(
            loc,
            TypeExpr::mk_intconst(loc, 1 << 20),
            TypeExpr::mk_intconst(loc, 1 << 20),
        );
        assert!(overflow.is_err());
    }

    #[test]
    fn structural_equality_ignores_locations() {
        let a = TypeExpr::mk_intconst(Loc::new(1, 1), 5);
        let b = TypeExpr::mk_intconst(Loc::new(9, 9), 5);
        let c = TypeExpr::mk_intconst(Loc::new(1, 1), 6);
        assert!(a.equal(&b));
        assert!(!a.equal(&c));
    }

    #[test]
    fn tag_rendering_picks_shortest_form() {
        let mut out = String::new();
        write_tag(&mut out, 1u64 << 63);
        assert_eq!(out, "$_");
        let mut out = String::new();
        write_tag(&mut out, (1u64 << 63) | (1u64 << 62)); // prefix "1"
        assert_eq!(out, "$1");
        let mut out = String::new();
        write_tag(&mut out, (0xb5u64 << 56) | (1u64 << 55)); // 8-bit prefix
        assert_eq!(out, "#b5");
    }

    #[test]
    fn hash_consing_shares_equal_expressions() {
        let loc = Loc::builtin();
        let mut pool = ConstExprPool::new();
        let mut a = TypeExpr::mk_intconst(loc, 7);
        let mut b = TypeExpr::mk_intconst(loc, 7);
        let mut c = TypeExpr::mk_intconst(loc, 8);
        assert!(detect_constexpr(&mut a, &mut pool).unwrap());
        assert!(detect_constexpr(&mut b, &mut pool).unwrap());
        assert!(detect_constexpr(&mut c, &mut pool).unwrap());
        assert_eq!(a.is_constexpr, b.is_constexpr);
        assert_ne!(a.is_constexpr, c.is_constexpr);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn parameter_references_stay_out_of_the_pool() {
        let loc = Loc::builtin();
        let mut pool = ConstExprPool::new();
        let mut param = TypeExpr::new(loc, TypeExprKind::Param { idx: 0 });
        param.is_nat = true;
        assert!(!detect_constexpr(&mut param, &mut pool).unwrap());
        assert!(pool.is_empty());
    }
}
