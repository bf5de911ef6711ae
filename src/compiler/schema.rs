use std::fmt::Write as _;

use crate::compiler::Compiler;
use crate::compiler::dispatch::DispatchPlan;
use crate::compiler::expr::{TypeExpr, const_type_name, write_constructor, write_expr};
use crate::compiler::types::{Type, TypeId};

/// Read-only result surface of a fully analyzed schema.
///
/// User types are exposed in deterministic order, sorted by their
/// last-declaration stamp (ties broken by arena index), so the output is
/// byte-identical across runs on identical input.
pub struct Schema<'a> {
    comp: &'a Compiler,
    order: Vec<TypeId>,
}

impl<'a> Schema<'a> {
    pub fn new(comp: &'a Compiler) -> Self {
        let mut order: Vec<TypeId> = (comp.builtin_types..comp.types.len())
            .map(|i| TypeId(i as u32))
            .collect();
        order.sort_by_key(|&id| (comp.types[id.index()].last_declared, id));
        Schema { comp, order }
    }

    pub fn compiler(&self) -> &Compiler {
        self.comp
    }

    /// User-defined types in facade order.
    pub fn types(&self) -> impl Iterator<Item = &Type> {
        self.order.iter().map(|id| &self.comp.types[id.index()])
    }

    /// The hash-consed constant type expressions, in insertion order, each
    /// with its derived canonical name.
    pub fn const_exprs(&self) -> impl Iterator<Item = (usize, String, &TypeExpr)> {
        self.comp.pool.iter().map(|(id, expr)| {
            let mut name = String::new();
            const_type_name(&mut name, expr, self.comp);
            (id, name, expr)
        })
    }

    /// Deterministic textual dump of the analyzed schema, the debugging
    /// counterpart of the facade consumed by code generators.
    pub fn dump(&self) -> String {
        let comp = self.comp;
        let mut out = String::new();
        let user = comp.types.len() - comp.builtin_types;
        let _ = writeln!(
            out,
            "{} types defined, out of them {} built-in, {} user-defined",
            comp.types.len(),
            comp.builtin_types,
            user
        );
        for ty in &comp.types[..comp.builtin_types] {
            if ty.used == 0 {
                continue;
            }
            let _ = writeln!(
                out,
                "built-in type #{}: `{}`, arity {}; prefixes {}; size {}",
                ty.idx.0,
                ty.display_name(&comp.interner),
                ty.arity.unwrap_or(0),
                ty.begins_with,
                ty.size
            );
        }
        for ty in self.types() {
            self.dump_type(&mut out, ty);
        }
        let _ = writeln!(out, "{} constant expressions:", comp.pool.len());
        for (id, name, expr) in self.const_exprs() {
            let mut text = String::new();
            write_expr(&mut text, expr, comp, None, 0, 0);
            let _ = writeln!(out, "expr #{}: {} (name{})", id, text, name);
        }
        out
    }

    fn dump_type(&self, out: &mut String, ty: &Type) {
        let comp = self.comp;
        let _ = writeln!(
            out,
            "type #{}: `{}`, arity {}, {} constructors",
            ty.idx.0,
            ty.display_name(&comp.interner),
            ty.arity.unwrap_or(0),
            ty.constructors.len()
        );
        if ty.const_param_idx.is_some() {
            let _ = write!(out, "  constant parameters:");
            for p in 0..ty.args.len() {
                let _ = write!(out, "{}", if ty.is_const_arg(p) { " const" } else { " *" });
            }
            out.push('\n');
        }
        for cs in &ty.constructors {
            let _ = writeln!(
                out,
                "  constructor `{}`{}",
                cs.get_name(&comp.interner),
                if cs.is_fwd { " (simple forwarder)" } else { "" }
            );
            let mut decl = String::new();
            write_constructor(&mut decl, cs, comp, 0);
            let _ = writeln!(out, "\t{}", decl);
            let _ = writeln!(out, "\tbegins with {}", cs.begins_with);
            if !cs.admissible.is_set_all() {
                let _ = writeln!(out, "\tadmissibility {}", cs.admissible);
            }
            if let Some(p) = ty.const_param_idx {
                let _ = writeln!(
                    out,
                    "\tconstant parameter #{} = {}",
                    p + 1,
                    cs.get_const_param(p)
                        .map_or_else(|| "*".to_string(), |v| v.to_string())
                );
            }
            let _ = writeln!(
                out,
                "\tsize {}{}{}",
                cs.size,
                if cs.has_fixed_size { " (fixed)" } else { "" },
                if cs.any_bits { " (any bits)" } else { "" }
            );
            for field in &cs.fields {
                let mut fty = String::new();
                write_expr(&mut fty, &field.ty, comp, Some(cs), 0, 0);
                let _ = writeln!(
                    out,
                    "\t\tfield `{}`: {} (used={}) (is_nat_subtype={})",
                    field.display_name(&comp.interner),
                    fty,
                    field.used,
                    field.ty.is_nat_subtype
                );
            }
        }
        if ty.is_unit {
            out.push_str("  (UNIT)\n");
        }
        if ty.is_bool {
            out.push_str("  (BOOL)\n");
        }
        if ty.is_enum {
            out.push_str(if ty.is_simple_enum {
                "  (SIMPLE ENUM)\n"
            } else {
                "  (ENUM)\n"
            });
        }
        if ty.constructors.len() > 1 {
            let _ = write!(out, "  constructor detection: ");
            if ty.is_pfx_determ {
                let _ = write!(out, "PFX({}) ", ty.useful_depth);
            }
            if ty.is_param_determ {
                let _ = write!(out, "PARAM ");
            }
            if ty.is_const_param_determ {
                let _ = write!(out, "CONST_PARAM ");
            }
            if ty.is_const_param_pfx_determ && !ty.is_pfx_determ && !ty.is_const_param_determ {
                let _ = write!(out, "PFX({})+CONST_PARAM ", ty.useful_depth);
            }
            if ty.is_param_pfx_determ
                && !ty.is_pfx_determ
                && !ty.is_param_determ
                && !ty.is_const_param_pfx_determ
            {
                let _ = write!(out, "PFX({})+PARAM ", ty.useful_depth);
            }
            if ty.is_determ && !ty.is_const_param_pfx_determ && !ty.is_param_pfx_determ {
                let _ = write!(out, "PFX({})+CONST_PARAM+PARAM ", ty.useful_depth);
            }
            if !ty.is_determ {
                let _ = write!(out, "<CONFLICT>");
            }
            out.push('\n');
        }
        let _ = writeln!(
            out,
            "  type size {}{}{}",
            ty.size,
            if ty.has_fixed_size { " (fixed)" } else { "" },
            if ty.any_bits { " (any bits)" } else { "" }
        );
        let _ = writeln!(out, "  type begins with {}", ty.begins_with);
        if !ty.admissible.is_set_all() {
            let _ = writeln!(out, "  type admissibility {}", ty.admissible);
        }
        if let Some(plan) = &ty.dispatch {
            out.push_str("  dispatch plan:\n");
            write_plan(out, plan, 4);
        }
        out.push('\n');
    }
}

/// Writes a dispatch plan as an indented decision tree.
pub fn write_plan(out: &mut String, plan: &DispatchPlan, indent: usize) {
    let pad = " ".repeat(indent);
    match plan {
        DispatchPlan::Reject => {
            let _ = writeln!(out, "{}reject", pad);
        }
        DispatchPlan::ReturnConstructor(i) => {
            let _ = writeln!(out, "{}constructor #{}", pad, i);
        }
        DispatchPlan::BitTest { depth, zero, one } => {
            let _ = writeln!(out, "{}bit {}:", pad, depth);
            let _ = writeln!(out, "{}0 ->", pad);
            write_plan(out, zero, indent + 2);
            let _ = writeln!(out, "{}1 ->", pad);
            write_plan(out, one, indent + 2);
        }
        DispatchPlan::PrefixTable { depth, entries } => {
            let _ = writeln!(out, "{}prefetch {} bits:", pad, depth);
            for (i, entry) in entries.iter().enumerate() {
                let _ = writeln!(out, "{}{:0w$b} ->", pad, i, w = *depth as usize);
                write_plan(out, entry, indent + 2);
            }
        }
        DispatchPlan::ParamSwitch {
            param,
            cases,
            default,
        } => {
            let _ = writeln!(out, "{}switch on parameter #{}:", pad, param + 1);
            for (value, case) in cases {
                let _ = writeln!(out, "{}case {} ->", pad, value);
                write_plan(out, case, indent + 2);
            }
            let _ = writeln!(out, "{}default ->", pad);
            write_plan(out, default, indent + 2);
        }
        DispatchPlan::ParamMatrix { params, table } => {
            let _ = write!(out, "{}match low bits of parameters", pad);
            for p in params {
                let _ = write!(out, " #{}", p + 1);
            }
            out.push_str(":\n");
            for (i, entry) in table.iter().enumerate() {
                match entry {
                    Some(c) => {
                        let _ = writeln!(out, "{}  [{}] -> constructor #{}", pad, i, c);
                    }
                    None => {
                        let _ = writeln!(out, "{}  [{}] -> reject", pad, i);
                    }
                }
            }
        }
    }
}
