use log::debug;

use crate::compiler::Compiler;
use crate::compiler::diagnostics::{
    Loc, Result, binding_error, kind_error, polarity_error, syntax_error,
};
use crate::compiler::expr::{
    Mode, TypeExpr, TypeExprKind, bind_value, close_expr, detect_constexpr,
};
use crate::compiler::intern::SymId;
use crate::compiler::scanner::{IdentClass, Scanner, SyntaxKind, ident_class};
use crate::compiler::symtab::{Keyword, SymValue};
use crate::compiler::types::{AnonParent, Constructor, Field, Type, TypeId, bind_constructor};

/// Parses a whole schema source into the compiler's type arena.
pub fn parse_source(comp: &mut Compiler, text: &str) -> Result<()> {
    let mut parser = Parser {
        lex: Scanner::new(text.to_string()),
        comp,
    };
    parser.lex.scan()?;
    while parser.tok() != SyntaxKind::EndOfFile {
        parser.parse_constructor_def()?;
    }
    Ok(())
}

struct Parser<'a> {
    lex: Scanner,
    comp: &'a mut Compiler,
}

impl Parser<'_> {
    fn tok(&self) -> SyntaxKind {
        self.lex.token()
    }

    fn loc(&self) -> Loc {
        self.lex.token_loc()
    }

    fn next(&mut self) -> Result<SyntaxKind> {
        self.lex.scan()
    }

    fn expect(&mut self, kind: SyntaxKind, what: &str) -> Result<()> {
        if self.tok() != kind {
            return Err(syntax_error(self.loc(), format!("{} expected", what)));
        }
        self.next()?;
        Ok(())
    }

    fn peek(&mut self) -> Result<SyntaxKind> {
        let mark = self.lex.mark();
        let kind = self.lex.scan()?;
        self.lex.rewind(mark);
        Ok(kind)
    }

    fn close(&mut self, expr: &mut TypeExpr, loc: Loc) -> Result<()> {
        close_expr(
            expr,
            loc,
            &mut self.comp.types,
            self.comp.builtins.eq,
            &self.comp.interner,
        )
    }

    /// `( E ) | [ field* ] | id | ~id | num | ^T`
    fn parse_term(&mut self, cs: &mut Constructor, mode: Mode) -> Result<TypeExpr> {
        match self.tok() {
            SyntaxKind::OpenParen => {
                self.next()?;
                let expr = self.parse_expr(cs, mode)?;
                expr.check_mode(self.loc(), mode)?;
                self.expect(SyntaxKind::CloseParen, "`)`")?;
                Ok(expr)
            }
            SyntaxKind::NumericLiteral => {
                let expr = TypeExpr::mk_intconst(self.loc(), self.lex.number_value());
                expr.check_mode(self.loc(), mode)?;
                self.next()?;
                Ok(expr)
            }
            SyntaxKind::OpenBracket => {
                self.next()?;
                let expr = self.parse_anonymous_constructor()?;
                expr.check_mode(self.loc(), mode)?;
                self.expect(SyntaxKind::CloseBracket, "`]`")?;
                Ok(expr)
            }
            SyntaxKind::CaretToken => {
                let loc = self.loc();
                self.next()?;
                let mut expr = self.parse_term(cs, mode & !Mode::NAT)?;
                self.close(&mut expr, self.loc())?;
                if expr.is_nat {
                    return Err(kind_error(
                        loc,
                        "cannot create a cell reference type to a natural number",
                    ));
                }
                Ok(TypeExpr::mk_cellref(loc, expr))
            }
            SyntaxKind::TildeToken => {
                self.next()?;
                if self.tok() != SyntaxKind::Identifier {
                    return Err(syntax_error(self.loc(), "field identifier expected"));
                }
                self.parse_ident_term(cs, mode, true)
            }
            SyntaxKind::Identifier => self.parse_ident_term(cs, mode, false),
            _ => Err(syntax_error(self.loc(), "type identifier expected")),
        }
    }

    fn parse_ident_term(
        &mut self,
        cs: &mut Constructor,
        mode: Mode,
        negate: bool,
    ) -> Result<TypeExpr> {
        let loc = self.loc();
        let text = self.lex.token_value().to_string();
        let name = self.comp.interner.intern(&text);
        let mut found = self
            .comp
            .symbols
            .lookup(name)
            .map(|def| (def.level, def.value));
        if found.is_none() {
            if negate {
                return Err(syntax_error(loc, "field identifier expected"));
            }
            if ident_class(&text) != IdentClass::Uppercase {
                return Err(syntax_error(
                    loc,
                    format!(
                        "implicitly defined type `{}` must begin with an uppercase letter",
                        text
                    ),
                ));
            }
            let tid = self.comp.register_new_type(loc, name);
            debug!("implicitly defined new type `{}`", text);
            found = Some((0, SymValue::Typename(tid)));
        }
        let (level, value) = found.unwrap();
        match value {
            SymValue::Typename(tid) => {
                if negate {
                    return Err(polarity_error(loc, "cannot negate a type"));
                }
                self.comp.types[tid.index()].used += 1;
                let expr =
                    TypeExpr::mk_apply_empty(loc, tid, &self.comp.types[tid.index()]);
                self.next()?;
                Ok(expr)
            }
            SymValue::Keyword(_) => Err(syntax_error(loc, "type identifier expected")),
            SymValue::Param { idx } => {
                if level != self.comp.symbols.scope_level() {
                    return Err(binding_error(
                        loc,
                        format!("cannot access field `{}` from outer scope", text),
                    ));
                }
                let field = &cs.fields[idx];
                let negate = negate
                    || (mode.contains(Mode::AUTO_NEG) && !field.known);
                let is_nat = field.ty.is_nat_subtype;
                if !is_nat && !matches!(field.ty.kind, TypeExprKind::Type) {
                    return Err(kind_error(
                        loc,
                        "cannot use a field in an expression unless it is either an integer or a type",
                    ));
                }
                if negate && !field.implicit {
                    return Err(polarity_error(loc, "cannot negate an explicit field"));
                }
                let mut expr = TypeExpr::new(loc, TypeExprKind::Param { idx });
                expr.is_nat = is_nat;
                expr.negated = negate;
                expr.check_mode(loc, mode)?;
                self.next()?;
                Ok(expr)
            }
        }
    }

    /// `E [. E]`
    fn parse_expr97(&mut self, cs: &mut Constructor, mode: Mode) -> Result<TypeExpr> {
        let mut expr = self.parse_term(cs, mode | Mode::TYPE | Mode::NAT)?;
        if self.tok() == SyntaxKind::DotToken {
            let where_loc = self.loc();
            self.close(&mut expr, where_loc)?;
            if !mode.contains(Mode::NAT) {
                return Err(kind_error(
                    where_loc,
                    "bitfield expression cannot be used instead of a type expression",
                ));
            }
            if !expr.is_nat {
                return Err(kind_error(
                    where_loc,
                    "cannot apply bit selection operator `.` to types",
                ));
            }
            self.next()?;
            let mut expr2 = self.parse_term(cs, mode & !Mode::TYPE)?;
            self.close(&mut expr2, self.loc())?;
            if expr.negated || expr2.negated {
                return Err(polarity_error(
                    where_loc,
                    "cannot apply bit selection operator `.` to values of negative polarity",
                ));
            }
            expr = TypeExpr::new(
                where_loc,
                TypeExprKind::GetBit(Box::new(expr), Box::new(expr2)),
            );
        }
        expr.check_mode(self.loc(), mode)?;
        Ok(expr)
    }

    /// `E [? E]`
    fn parse_expr95(&mut self, cs: &mut Constructor, mode: Mode) -> Result<TypeExpr> {
        let mut expr = self.parse_expr97(cs, mode | Mode::TYPE | Mode::NAT)?;
        if self.tok() != SyntaxKind::QuestionToken {
            expr.check_mode(self.loc(), mode)?;
            return Ok(expr);
        }
        let where_loc = self.loc();
        self.close(&mut expr, where_loc)?;
        if !expr.is_nat {
            return Err(kind_error(
                where_loc,
                "cannot apply `?` with non-integer selectors",
            ));
        }
        self.next()?;
        let mut expr2 = self.parse_term(cs, mode & !(Mode::NAT | Mode::TCHK))?;
        self.close(&mut expr2, self.loc())?;
        expr2.no_tchk()?;
        let expr = TypeExpr::new(
            where_loc,
            TypeExprKind::CondType(Box::new(expr), Box::new(expr2)),
        );
        expr.check_mode(self.loc(), mode)?;
        Ok(expr)
    }

    /// `E E*` (application by juxtaposition)
    fn parse_expr90(&mut self, cs: &mut Constructor, mode: Mode) -> Result<TypeExpr> {
        let mut expr = self.parse_expr95(cs, mode | Mode::TYPE | Mode::NAT)?;
        while matches!(
            self.tok(),
            SyntaxKind::OpenParen
                | SyntaxKind::Identifier
                | SyntaxKind::NumericLiteral
                | SyntaxKind::TildeToken
                | SyntaxKind::CaretToken
                | SyntaxKind::OpenBracket
        ) {
            let mut expr2 = self.parse_expr95(cs, mode | Mode::TYPE | Mode::NAT)?;
            self.close(&mut expr2, self.loc())?;
            expr = TypeExpr::mk_apply_gen(self.loc(), expr, expr2)?;
        }
        expr.check_mode(self.loc(), mode)?;
        Ok(expr)
    }

    /// `E (* E)*` (repetition or multiplication by a constant)
    fn parse_expr30(&mut self, cs: &mut Constructor, mode: Mode) -> Result<TypeExpr> {
        let mut expr = self.parse_expr90(cs, mode)?;
        while self.tok() == SyntaxKind::AsteriskToken {
            let where_loc = self.loc();
            self.close(&mut expr, where_loc)?;
            if !expr.is_nat {
                return Err(kind_error(where_loc, "cannot apply `*` to types"));
            }
            self.next()?;
            let mut expr2 = self.parse_expr90(cs, mode)?;
            self.close(&mut expr2, self.loc())?;
            if expr2.is_nat {
                expr = TypeExpr::mk_mulint(where_loc, expr, expr2)?;
            } else {
                expr2.no_tchk()?;
                expr = TypeExpr::new(
                    where_loc,
                    TypeExprKind::Tuple(Box::new(expr), Box::new(expr2)),
                );
            }
        }
        expr.check_mode(self.loc(), mode)?;
        Ok(expr)
    }

    /// `E (+ E)*`
    fn parse_expr20(&mut self, cs: &mut Constructor, mode: Mode) -> Result<TypeExpr> {
        let mut expr = self.parse_expr30(cs, mode)?;
        while self.tok() == SyntaxKind::PlusToken {
            let where_loc = self.loc();
            self.close(&mut expr, where_loc)?;
            if !mode.contains(Mode::NAT) {
                return Err(kind_error(
                    where_loc,
                    "sum cannot be used instead of a type expression",
                ));
            }
            if !expr.is_nat {
                return Err(kind_error(where_loc, "cannot apply `+` to types"));
            }
            self.next()?;
            let mut expr2 = self.parse_expr30(cs, mode & !Mode::TYPE)?;
            self.close(&mut expr2, self.loc())?;
            if expr.negated && expr2.negated {
                return Err(polarity_error(
                    where_loc,
                    "cannot add two values of negative polarity",
                ));
            }
            let negated = expr.negated || expr2.negated;
            let mut sum = TypeExpr::new(
                where_loc,
                TypeExprKind::Add(Box::new(expr), Box::new(expr2)),
            );
            sum.negated = negated;
            expr = sum;
        }
        expr.check_mode(self.loc(), mode)?;
        Ok(expr)
    }

    /// `E [(= | == | < | <= | > | >=) E]`
    fn parse_expr10(&mut self, cs: &mut Constructor, mode: Mode) -> Result<TypeExpr> {
        let mut expr = self.parse_expr20(cs, mode | Mode::TYPE | Mode::NAT)?;
        let op = self.tok();
        let is_cmp = matches!(
            op,
            SyntaxKind::EqualsToken
                | SyntaxKind::EqualsEqualsToken
                | SyntaxKind::LessThanToken
                | SyntaxKind::GreaterThanToken
                | SyntaxKind::LessThanEqualsToken
                | SyntaxKind::GreaterThanEqualsToken
        );
        if !is_cmp {
            expr.check_mode(self.loc(), mode)?;
            return Ok(expr);
        }
        let where_loc = self.loc();
        self.close(&mut expr, where_loc)?;
        if !mode.contains(Mode::TYPE) {
            return Err(kind_error(where_loc, "comparison result used as an integer"));
        }
        if !expr.is_nat {
            return Err(kind_error(
                where_loc,
                "cannot apply integer comparison to types",
            ));
        }
        self.next()?;
        let mut expr2 = self.parse_expr20(cs, (mode & !Mode::TYPE) | Mode::NAT)?;
        self.close(&mut expr2, self.loc())?;
        if !expr2.is_nat {
            return Err(kind_error(
                self.loc(),
                "cannot apply integer comparison to types",
            ));
        }
        // `>` and `>=` reverse into `<` and `<=`.
        let (lhs, rhs, op) = match op {
            SyntaxKind::GreaterThanToken => (expr2, expr, SyntaxKind::LessThanToken),
            SyntaxKind::GreaterThanEqualsToken => {
                (expr2, expr, SyntaxKind::LessThanEqualsToken)
            }
            _ => (expr, expr2, op),
        };
        let tid = match op {
            SyntaxKind::LessThanToken => self.comp.builtins.less,
            SyntaxKind::LessThanEqualsToken => self.comp.builtins.leq,
            _ => self.comp.builtins.eq,
        };
        let head = TypeExpr::mk_apply_empty(where_loc, tid, &self.comp.types[tid.index()]);
        let expr = TypeExpr::mk_apply_gen(where_loc, head, lhs)?;
        let expr = TypeExpr::mk_apply_gen(self.loc(), expr, rhs)?;
        expr.check_mode(self.loc(), mode)?;
        Ok(expr)
    }

    fn parse_expr(&mut self, cs: &mut Constructor, mode: Mode) -> Result<TypeExpr> {
        self.parse_expr10(cs, mode)
    }

    /// `{ ident : (Type | #) }`
    fn parse_implicit_param(&mut self, cs: &mut Constructor) -> Result<()> {
        if self.tok() != SyntaxKind::Identifier {
            return Err(syntax_error(self.loc(), "field identifier expected"));
        }
        let loc = self.loc();
        let name = self.comp.interner.intern(self.lex.token_value());
        self.next()?;
        self.expect(SyntaxKind::ColonToken, "`:`")?;
        let ty = if self.tok() == SyntaxKind::Identifier {
            let text = self.lex.token_value().to_string();
            let sym = self.comp.interner.intern(&text);
            let is_type_kw = matches!(
                self.comp.symbols.lookup(sym).map(|d| d.value),
                Some(SymValue::Keyword(Keyword::Type))
            );
            if is_type_kw {
                TypeExpr::new(self.loc(), TypeExprKind::Type)
            } else if text == "#" {
                let nat = self.comp.builtins.nat;
                let expr = TypeExpr::mk_apply_empty(
                    self.loc(),
                    nat,
                    &self.comp.types[nat.index()],
                );
                debug_assert!(expr.is_nat_subtype);
                expr
            } else {
                return Err(syntax_error(
                    self.loc(),
                    "either `Type` or `#` implicit parameter type expected",
                ));
            }
        } else {
            return Err(syntax_error(
                self.loc(),
                "either `Type` or `#` implicit parameter type expected",
            ));
        };
        self.next()?;
        let idx = cs.fields.len();
        cs.fields.push(Field::new(loc, true, idx, name, ty));
        self.register_field(cs, idx)
    }

    /// `{ expr }` constraint
    fn parse_constraint(&mut self, cs: &mut Constructor) -> Result<()> {
        let loc = self.loc();
        let mut ty = self.parse_expr(cs, Mode::TYPE | Mode::TCHK)?;
        self.close(&mut ty, self.loc())?;
        detect_constexpr(&mut ty, &mut self.comp.pool)?;
        let idx = cs.fields.len();
        let mut field = Field::new(loc, true, idx, SymId::EMPTY, ty);
        field.constraint = true;
        cs.fields.push(field);
        Ok(())
    }

    /// `[ ( ident | _ ) : ] type-expr`
    fn parse_param(&mut self, cs: &mut Constructor, named: bool) -> Result<()> {
        let loc = self.loc();
        let mut named = named;
        if named && self.tok() == SyntaxKind::UnderscoreToken {
            self.next()?;
            self.expect(SyntaxKind::ColonToken, "`:`")?;
            named = false;
        }
        let mut name = SymId::EMPTY;
        if named {
            if self.tok() != SyntaxKind::Identifier {
                return Err(syntax_error(self.loc(), "field identifier expected"));
            }
            name = self.comp.interner.intern(self.lex.token_value());
            self.next()?;
            self.expect(SyntaxKind::ColonToken, "`:`")?;
        }
        let mut ty = self.parse_expr95(cs, Mode::TYPE | Mode::TCHK)?;
        self.close(&mut ty, self.loc())?;
        detect_constexpr(&mut ty, &mut self.comp.pool)?;
        let subrec = ty.is_ref_to_anon(&self.comp.types);
        debug_assert!(name.is_empty() || !subrec);
        let idx = cs.fields.len();
        let mut field = Field::new(loc, false, idx, name, ty);
        field.subrec = subrec;
        cs.fields.push(field);
        self.register_field(cs, idx)
    }

    /// Registers a named field as a `Param` symbol of the current scope.
    fn register_field(&mut self, cs: &Constructor, idx: usize) -> Result<()> {
        let field = &cs.fields[idx];
        if field.name.is_empty() {
            return Ok(());
        }
        let result = self
            .comp
            .symbols
            .define(field.name, field.loc, SymValue::Param { idx });
        if let Err(prev) = result {
            let prev_loc = prev.loc;
            return Err(binding_error(field.loc, "redefined field or parameter")
                .with_note(prev_loc, "first defined here"));
        }
        Ok(())
    }

    fn parse_field_list(&mut self, cs: &mut Constructor) -> Result<()> {
        while self.tok() != SyntaxKind::EqualsToken && self.tok() != SyntaxKind::CloseBracket {
            if self.tok() == SyntaxKind::OpenBrace {
                self.next()?;
                if self.tok() == SyntaxKind::Identifier && self.peek()? == SyntaxKind::ColonToken
                {
                    self.parse_implicit_param(cs)?;
                } else {
                    self.parse_constraint(cs)?;
                }
                self.expect(SyntaxKind::CloseBrace, "`}`")?;
            } else if matches!(
                self.tok(),
                SyntaxKind::Identifier | SyntaxKind::UnderscoreToken
            ) && self.peek()? == SyntaxKind::ColonToken
            {
                self.parse_param(cs, true)?;
            } else if self.tok() == SyntaxKind::EndOfFile {
                return Err(syntax_error(self.loc(), "`=` expected"));
            } else {
                self.parse_param(cs, false)?;
            }
        }
        Ok(())
    }

    /// `[ field* ]`: an inline record becomes an anonymous auto type,
    /// shared with any previously created isomorphic one.
    fn parse_anonymous_constructor(&mut self) -> Result<TypeExpr> {
        self.comp.symbols.open_scope();
        let loc = self.loc();
        let mut cs2 = Constructor::new(loc, SymId::EMPTY, SymId::EMPTY, 0);
        self.parse_field_list(&mut cs2)?;
        if self.tok() != SyntaxKind::CloseBracket {
            return Err(syntax_error(self.loc(), "`]` expected"));
        }
        cs2.set_tag(1u64 << 63);
        for i in self.comp.builtin_types..self.comp.types.len() {
            let ty = &self.comp.types[i];
            if ty.is_auto && ty.is_final && ty.unique_constructor_equals(&cs2, true) {
                let tid = ty.idx;
                self.comp.symbols.close_scope();
                let ty = &mut self.comp.types[i];
                if let AnonParent::Of(_) = ty.anon_parent {
                    ty.anon_parent = AnonParent::Shared;
                }
                return Ok(TypeExpr::mk_apply_empty(
                    self.loc(),
                    tid,
                    &self.comp.types[i],
                ));
            }
        }
        let tid = TypeId(self.comp.types.len() as u32);
        let mut ty = Type::new(tid, SymId::EMPTY, false, None, false, false);
        ty.loc = loc;
        self.comp.types.push(ty);
        let close_loc = self.loc();
        bind_constructor(self.comp, tid, cs2, close_loc)?;
        let ty = &mut self.comp.types[tid.index()];
        ty.is_final = true;
        ty.is_auto = true;
        ty.is_anon = true;
        self.comp.renew_last_declared(tid);
        self.comp.symbols.close_scope();
        Ok(TypeExpr::mk_apply_empty(
            self.loc(),
            tid,
            &self.comp.types[tid.index()],
        ))
    }

    /// `cons_name tag? field* = TypeName arg* ;`
    fn parse_constructor_def(&mut self) -> Result<()> {
        let where_loc = self.loc();
        let (cname, is_special) = match self.tok() {
            SyntaxKind::UnderscoreToken => (SymId::EMPTY, false),
            SyntaxKind::Identifier => {
                let class = ident_class(self.lex.token_value());
                if class != IdentClass::Lowercase && class != IdentClass::SpecialLowercase {
                    return Err(syntax_error(
                        where_loc,
                        "constructor name lowercase identifier expected",
                    ));
                }
                (
                    self.comp.interner.intern(self.lex.token_value()),
                    class == IdentClass::SpecialLowercase,
                )
            }
            _ => {
                return Err(syntax_error(
                    where_loc,
                    "constructor name lowercase identifier expected",
                ));
            }
        };
        self.comp.symbols.open_scope();
        let orig_types = self.comp.types.len();
        self.next()?;
        let mut tag = 0;
        if self.tok() == SyntaxKind::TagLiteral {
            tag = self.lex.tag_value();
            self.next()?;
        }
        let mut cs = Constructor::new(where_loc, cname, SymId::EMPTY, tag);
        cs.is_special = is_special;
        self.parse_field_list(&mut cs)?;
        self.expect(SyntaxKind::EqualsToken, "`=`")?;
        if self.tok() != SyntaxKind::Identifier
            || ident_class(self.lex.token_value()) != IdentClass::Uppercase
        {
            return Err(syntax_error(
                self.loc(),
                "type name uppercase identifier expected",
            ));
        }
        let type_loc = self.loc();
        let type_name = self.comp.interner.intern(self.lex.token_value());
        let tid = match self.comp.symbols.lookup_global(type_name).map(|d| d.value) {
            Some(SymValue::Typename(tid)) => tid,
            Some(_) => {
                return Err(syntax_error(
                    type_loc,
                    "parametrized type identifier expected",
                ));
            }
            None => {
                let tid = self.comp.register_new_type(type_loc, type_name);
                debug!(
                    "defined new type `{}`",
                    self.comp.interner.resolve(type_name)
                );
                tid
            }
        };
        cs.type_name = type_name;
        cs.type_defined = Some(tid);
        if self.comp.types[tid.index()].is_final {
            return Err(binding_error(
                type_loc,
                format!(
                    "cannot add new constructor to a finalized type `{}`",
                    self.comp.interner.resolve(type_name)
                ),
            ));
        }
        self.next()?;
        let eq_type = self.comp.builtins.eq;
        while self.tok() != SyntaxKind::SemicolonToken {
            if self.tok() == SyntaxKind::EndOfFile {
                return Err(syntax_error(self.loc(), "`;` expected"));
            }
            let negate = self.tok() == SyntaxKind::TildeToken;
            if negate {
                self.next()?;
            }
            let mode = if negate {
                Mode::TYPE | Mode::NAT
            } else {
                Mode::TYPE | Mode::NAT | Mode::AUTO_NEG
            };
            let mut param = self.parse_term(&mut cs, mode)?;
            self.close(&mut param, self.loc())?;
            let const_val = if !negate {
                match param.kind {
                    TypeExprKind::IntConst { value } => Some(value),
                    _ => None,
                }
            } else {
                None
            };
            if !negate {
                bind_value(
                    &param,
                    false,
                    &mut cs.fields,
                    &self.comp.interner,
                    eq_type,
                    false,
                )?;
            } else if !param.is_nat {
                return Err(polarity_error(param.loc, "cannot return type expressions"));
            }
            cs.params.push(param);
            cs.param_negated.push(negate);
            cs.param_const_val.push(const_val);
            cs.type_arity += 1;
        }
        let end_loc = self.loc();
        bind_constructor(self.comp, tid, cs, end_loc)?;
        self.comp.renew_last_declared(tid);
        self.expect(SyntaxKind::SemicolonToken, "`;`")?;
        self.comp.symbols.close_scope();
        for i in orig_types..self.comp.types.len() {
            let ty = &mut self.comp.types[i];
            if ty.is_auto && ty.anon_parent == AnonParent::Unset {
                ty.anon_parent = AnonParent::Of(tid);
            }
        }
        Ok(())
    }
}
