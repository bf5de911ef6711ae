use std::fmt::Write as _;

use log::debug;

use crate::compiler::Compiler;
use crate::compiler::admissible::{ConflictGraph, ConflictSet};
use crate::compiler::bitpfx::BitPfxCollection;
use crate::compiler::diagnostics::{Error, ErrorKind, Result, binding_error};
use crate::compiler::dispatch::build_dispatch_plan;
use crate::compiler::expr::{
    TypeExprKind, compute_any_bits, compute_size, write_constructor, write_tag,
};
use crate::compiler::size::MinMaxSize;
use crate::compiler::trie::BinTrie;
use crate::compiler::types::{Constructor, Type, TypeArgs, TypeId};

/// Runs every analysis pass over the parsed schema, in order: parameter
/// admissibility, the begins-with / size / any-bits fixpoints, basic-type
/// detection, cell-fit checking, dispatch classification and plan building.
pub fn check_scheme(comp: &mut Compiler) -> Result<()> {
    check_declared_types(comp)?;
    compute_admissible_params(comp);
    compute_begins_with(comp);
    compute_minmax_sizes(comp);
    compute_any_bits_fixpoint(comp);
    detect_basic_types(comp);
    check_sizes(comp)?;
    check_conflicts(comp)?;
    build_dispatch_plans(comp)?;
    Ok(())
}

/// Every implicitly declared type must have received a constructor.
fn check_declared_types(comp: &Compiler) -> Result<()> {
    for ty in &comp.types[comp.builtin_types..] {
        if !ty.is_final && ty.constructors.is_empty() {
            return Err(binding_error(
                ty.loc,
                format!(
                    "implicitly defined type `{}` has no constructors",
                    ty.display_name(&comp.interner)
                ),
            ));
        }
    }
    Ok(())
}

/// Abstract-interprets each constructor's positive natural parameters into
/// its admissibility map, and unions them per type.
fn compute_admissible_params(comp: &mut Compiler) {
    for ty in &mut comp.types[comp.builtin_types..] {
        for ci in 0..ty.constructors.len() {
            constructor_admissible_params(&mut ty.constructors[ci]);
            let cs_map = ty.constructors[ci].admissible.clone();
            ty.admissible.or_with(&cs_map);
        }
    }
}

fn constructor_admissible_params(cs: &mut Constructor) -> bool {
    let mut pattern = [0u8; 4];
    let mut dim = 0;
    for i in 0..cs.params.len() {
        if !cs.param_negated[i] && cs.params[i].is_nat {
            let t = cs.params[i].abstract_interpret_nat();
            pattern[dim] = t;
            dim += 1;
            if t == 0 {
                cs.admissible.clear_all();
                return false;
            }
            if dim == 4 {
                break;
            }
        }
    }
    while dim > 0 && pattern[dim - 1] == 15 {
        dim -= 1;
    }
    if dim == 0 {
        cs.admissible.set_all(true);
        return true;
    }
    cs.admissible.set_by_pattern(&pattern[..dim]);
    true
}

/// The prefix set a constructor contributes this round: its tag composed
/// with the begins-with of the head field, references skipped.
fn constructor_begins_with_add(cs: &Constructor, types: &[Type]) -> BitPfxCollection {
    for field in &cs.fields {
        if field.implicit || field.constraint {
            continue;
        }
        match &field.ty.kind {
            TypeExprKind::Ref(..) => continue,
            TypeExprKind::Apply { type_ref, .. } => {
                return types[type_ref.index()].begins_with.prepend(cs.tag);
            }
            _ => break,
        }
    }
    BitPfxCollection::single(cs.tag)
}

fn compute_begins_with(comp: &mut Compiler) {
    let first = comp.builtin_types;
    let mut rounds = 0;
    loop {
        let mut changes = false;
        for i in first..comp.types.len() {
            let adds: Vec<BitPfxCollection> = comp.types[i]
                .constructors
                .iter()
                .map(|cs| constructor_begins_with_add(cs, &comp.types))
                .collect();
            let ty = &mut comp.types[i];
            let mut grown = Vec::new();
            for (cs, add) in ty.constructors.iter_mut().zip(adds) {
                if cs.begins_with.merge_with(&add) {
                    grown.push(cs.begins_with.clone());
                }
            }
            for pfx in grown {
                changes |= ty.begins_with.merge_with(&pfx);
            }
        }
        rounds += 1;
        if !changes {
            break;
        }
    }
    debug!("begins-with fixpoint reached after {} rounds", rounds);
}

fn constructor_size(cs: &Constructor, comp: &Compiler) -> MinMaxSize {
    let mut sz = MinMaxSize::fixed_size(cs.tag_bits.max(0) as u32);
    for field in &cs.fields {
        if !field.implicit && !field.constraint {
            sz += compute_size(&field.ty, comp);
        }
    }
    sz
}

fn compute_minmax_sizes(comp: &mut Compiler) {
    let first = comp.builtin_types;
    let mut rounds = 0;
    loop {
        let mut changes = false;
        for i in first..comp.types.len() {
            let sizes: Vec<MinMaxSize> = comp.types[i]
                .constructors
                .iter()
                .map(|cs| constructor_size(cs, comp))
                .collect();
            let ty = &mut comp.types[i];
            let mut union = MinMaxSize::IMPOSSIBLE;
            for (cs, sz) in ty.constructors.iter_mut().zip(sizes) {
                if cs.size != sz {
                    cs.size = sz;
                    cs.has_fixed_size = sz.is_fixed();
                    changes = true;
                }
                union.union_with(cs.size);
            }
            if union != ty.size {
                ty.size = union;
                ty.has_fixed_size = union.is_fixed();
                changes = true;
            }
        }
        rounds += 1;
        if !changes {
            break;
        }
    }
    debug!("size fixpoint reached after {} rounds", rounds);
}

fn compute_any_bits_fixpoint(comp: &mut Compiler) {
    let first = comp.builtin_types;
    loop {
        let mut changes = false;
        for i in first..comp.types.len() {
            let per_cs: Vec<bool> = comp.types[i]
                .constructors
                .iter()
                .map(|cs| {
                    cs.fields
                        .iter()
                        .filter(|f| !f.implicit && !f.constraint)
                        .all(|f| compute_any_bits(&f.ty, comp))
                })
                .collect();
            let ty = &mut comp.types[i];
            let mut res = ty.begins_with.is_all();
            for (cs, any) in ty.constructors.iter_mut().zip(per_cs) {
                if cs.any_bits != any {
                    cs.any_bits = any;
                    changes = true;
                }
                res &= cs.any_bits;
            }
            if res != ty.any_bits {
                ty.any_bits = res;
                changes = true;
            }
        }
        if !changes {
            break;
        }
    }
}

fn detect_basic_types(comp: &mut Compiler) {
    for ty in &mut comp.types[comp.builtin_types..] {
        ty.detect_basic_types();
    }
}

/// Every type and constructor must be instantiable and fit into one cell.
fn check_sizes(comp: &Compiler) -> Result<()> {
    for ty in &comp.types[comp.builtin_types..] {
        if !ty.size.fits_into_cell() || !ty.size.is_possible() {
            return Err(Error::new(
                ty.loc,
                ErrorKind::Size(format!(
                    "type `{}` {} (size {})",
                    ty.display_name(&comp.interner),
                    if !ty.size.is_possible() {
                        "cannot be instantiated"
                    } else {
                        "never fits into a cell"
                    },
                    ty.size
                )),
            ));
        }
        for cs in &ty.constructors {
            if !cs.size.fits_into_cell() || !cs.size.is_possible() {
                return Err(Error::new(
                    cs.loc,
                    ErrorKind::Size(format!(
                        "constructor `{}` {} (size {})",
                        cs.qualified_name(comp),
                        if !cs.size.is_possible() {
                            "cannot be instantiated"
                        } else {
                            "never fits into a cell"
                        },
                        cs.size
                    )),
                )
                .with_note(cs.loc, "defined here"));
            }
        }
    }
    Ok(())
}

/// Builds the constructor trie of each type, classifies the dispatch
/// strategy, and reports unresolvable constructor conflicts.
fn check_conflicts(comp: &mut Compiler) -> Result<()> {
    for i in comp.builtin_types..comp.types.len() {
        compute_constructor_trie(&mut comp.types[i]);
        classify_type(&mut comp.types[i]);
        if comp.types[i].conflict.is_some() {
            return Err(constructor_conflict_error(comp, TypeId(i as u32)));
        }
    }
    Ok(())
}

fn compute_constructor_trie(ty: &mut Type) {
    if ty.trie.is_some() || ty.constructors.is_empty() {
        return;
    }
    let mut root = None;
    for (ci, cs) in ty.constructors.iter().enumerate() {
        root = BinTrie::insert_paths(root, &cs.begins_with, 1u64 << ci);
    }
    match root {
        Some(mut trie) => {
            ty.useful_depth = trie.compute_useful_depth(0);
            ty.is_pfx_determ = trie.find_conflict_path(0, !0) == 0;
            ty.trie = Some(trie);
        }
        None => {
            ty.useful_depth = 0;
            ty.is_pfx_determ = true;
        }
    }
}

fn classify_type(ty: &mut Type) {
    let cp = ty.detect_const_params();
    ty.is_param_determ = true;
    ty.is_param_pfx_determ = true;
    ty.is_determ = true;
    ty.is_const_param_determ = cp.is_some();
    ty.is_const_param_pfx_determ = cp.is_some();
    if ty.constructors.is_empty() || ty.trie.is_none() {
        return;
    }
    let mut pfx_graph = ConflictGraph::new();
    ty.trie
        .as_ref()
        .expect("trie computed above")
        .set_conflict_graph(&mut pfx_graph, 0);
    let n = ty.constructors.len();
    for i in 0..n {
        for j in 0..i {
            let cp_same = match cp {
                Some(p) => {
                    ty.constructors[i].get_const_param(p) == ty.constructors[j].get_const_param(p)
                }
                None => true,
            };
            if cp_same {
                ty.is_const_param_determ = false;
                if pfx_graph.get(i, j) {
                    ty.is_const_param_pfx_determ = false;
                }
            }
            if ty.constructors[i]
                .admissible
                .conflicts_with(&ty.constructors[j].admissible)
            {
                ty.is_param_determ = false;
                if pfx_graph.get(i, j) {
                    ty.is_param_pfx_determ = false;
                    if cp_same {
                        ty.conflict = Some((j, i));
                        ty.is_determ = false;
                    }
                }
            }
        }
    }
}

/// Renders the witness diagnostic for a pair of indistinguishable
/// constructors: the shared prefix, every constructor that admits it, and a
/// sample parameter instantiation when admissibility is involved.
fn constructor_conflict_error(comp: &Compiler, type_id: TypeId) -> Error {
    let ty = &comp.types[type_id.index()];
    let (i, j) = ty.conflict.expect("conflict witnesses recorded");
    let trie = ty.trie.as_ref().expect("conflicting type has a trie");
    let mask = (1u64 << i) | (1u64 << j);
    let pfx = trie.find_conflict_path(0, mask);
    let mut cs_set = ConflictSet(trie.lookup_tag(pfx));
    let info1 = &ty.constructors[i].admissible;
    let info2 = &ty.constructors[j].admissible;
    let need_params = !(info1.is_set_all() && info2.is_set_all());
    let params = info1
        .conflicts_at(info2)
        .expect("witness constructors have overlapping admissibility");
    for s in 0..ty.constructors.len().min(64) {
        let admits = if need_params {
            ty.constructors[s].admissible.get(params)
        } else {
            ty.constructors[s].admissible.is_set_all()
        };
        if cs_set.contains(s) && !admits {
            cs_set.remove(s);
        }
    }
    let mut msg = format!(
        "found conflict between constructors of type `{}`: prefix ",
        ty.display_name(&comp.interner)
    );
    write_tag(&mut msg, pfx);
    let _ = write!(msg, " can be present in {} constructors", cs_set.len());
    let mut err = Error::new(ty.constructors[j].loc, ErrorKind::Dispatch(msg));
    for s in 0..ty.constructors.len().min(64) {
        if cs_set.contains(s) {
            let mut line = String::new();
            write_constructor(&mut line, &ty.constructors[s], comp, 0);
            err = err.with_note(ty.constructors[s].loc, line);
        }
    }
    if need_params {
        let mut inst = format!(
            "when type parameters are instantiated as {}",
            ty.display_name(&comp.interner)
        );
        let mut nat = b'a';
        let mut tvar = b'A';
        for &x in &ty.args {
            if x.contains(TypeArgs::IS_NEG) {
                inst.push_str(" ~");
                if x.contains(TypeArgs::IS_NAT) {
                    inst.push(nat as char);
                    nat += 1;
                } else {
                    inst.push(tvar as char);
                    tvar += 1;
                }
            } else if x.contains(TypeArgs::IS_TYPE) {
                inst.push(' ');
                inst.push(tvar as char);
                tvar += 1;
            } else {
                let _ = write!(inst, " {}", params & 3);
                if params & 2 != 0 {
                    let _ = write!(inst, "+2*{}", nat as char);
                    nat += 1;
                }
            }
        }
        err = err.with_note(ty.constructors[j].loc, inst);
    }
    err
}

fn build_dispatch_plans(comp: &mut Compiler) -> Result<()> {
    for i in comp.builtin_types..comp.types.len() {
        if comp.types[i].constructors.is_empty() {
            continue;
        }
        let plan = build_dispatch_plan(comp, TypeId(i as u32))?;
        comp.types[i].dispatch = Some(plan);
    }
    Ok(())
}
