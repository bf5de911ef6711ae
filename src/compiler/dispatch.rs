use crate::compiler::Compiler;
use crate::compiler::diagnostics::{Error, ErrorKind, Result, internal_error};
use crate::compiler::trie::BinTrie;
use crate::compiler::types::{Type, TypeArgs, TypeId};

/// How a decoder selects the constructor of a type from an input prefix
/// and the type's natural parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchPlan {
    /// No constructor matches here.
    Reject,
    ReturnConstructor(usize),
    /// Test bit `depth` of the prefix: 0 goes left, 1 goes right.
    BitTest {
        depth: u32,
        zero: Box<DispatchPlan>,
        one: Box<DispatchPlan>,
    },
    /// Prefetch the first `depth` bits and index the table with them.
    PrefixTable {
        depth: u32,
        entries: Vec<DispatchPlan>,
    },
    /// Switch on the literal value of type parameter `param`.
    ParamSwitch {
        param: usize,
        cases: Vec<(u32, DispatchPlan)>,
        default: Box<DispatchPlan>,
    },
    /// Project one, two or three natural parameters through the
    /// admissibility maps; the table has 4, 16 or 64 row-major entries
    /// indexed by the parameters' low two bits.
    ParamMatrix {
        params: Vec<usize>,
        table: Vec<Option<usize>>,
    },
}

/// Builds the get-tag plan for a fully analyzed, conflict-free type.
pub fn build_dispatch_plan(comp: &Compiler, type_id: TypeId) -> Result<DispatchPlan> {
    let ty = &comp.types[type_id.index()];
    if ty.constructors.is_empty() {
        return Ok(DispatchPlan::Reject);
    }
    let d = ty.useful_depth;
    if ty.is_pfx_determ {
        if d == 0 {
            return Ok(DispatchPlan::ReturnConstructor(0));
        }
        if d <= 6 {
            let all: Vec<usize> = (0..ty.constructors.len()).collect();
            return Ok(prefix_table(ty, &all, d));
        }
    }
    if ty.is_const_param_determ || ty.is_const_param_pfx_determ {
        let p = ty
            .const_param_idx
            .expect("const-param dispatch without a constant parameter");
        let mut cases = Vec::new();
        for pv in ty.get_all_param_values(p) {
            let value = pv.expect("non-constant value of a constant parameter");
            let constr_list = ty.get_constr_by_param_value(p, pv);
            let plan = if constr_list.len() == 1 {
                DispatchPlan::ReturnConstructor(constr_list[0])
            } else {
                pfx_distinguisher(comp, ty, &constr_list)?
            };
            cases.push((value, plan));
        }
        return Ok(DispatchPlan::ParamSwitch {
            param: p,
            cases,
            default: Box::new(DispatchPlan::Reject),
        });
    }
    let Some(trie) = ty.trie.as_deref() else {
        return Err(internal_error(
            ty.loc,
            "dispatch plan requested for a type without a prefix trie",
        ));
    };
    subcase(comp, ty, Some(trie), 0)
}

/// Depth-`d` prefetch table over a prefix-deterministic constructor set:
/// every slot resolves to one constructor or rejects.
fn prefix_table(ty: &Type, constr_list: &[usize], d: u32) -> DispatchPlan {
    let n = 1usize << d;
    let mut table: Vec<Option<usize>> = vec![None; n];
    for &i in constr_list {
        for &z in &ty.constructors[i].begins_with.pfx {
            let l = (63 - z.trailing_zeros()).min(d);
            let a = if d > 0 {
                ((z & (z - 1)) >> (64 - d)) as usize
            } else {
                0
            };
            for slot in a..a + (1usize << (d - l)) {
                debug_assert!(table[slot].is_none() || table[slot] == Some(i));
                table[slot] = Some(i);
            }
        }
    }
    let mut entries: Vec<DispatchPlan> = table
        .into_iter()
        .map(|slot| match slot {
            Some(i) => DispatchPlan::ReturnConstructor(i),
            None => DispatchPlan::Reject,
        })
        .collect();
    if d == 1 {
        let one = entries.pop().unwrap();
        let zero = entries.pop().unwrap();
        return DispatchPlan::BitTest {
            depth: 0,
            zero: Box::new(zero),
            one: Box::new(one),
        };
    }
    DispatchPlan::PrefixTable { depth: d, entries }
}

/// Distinguishes the constructors of one constant-parameter case by their
/// prefixes alone.
fn pfx_distinguisher(comp: &Compiler, ty: &Type, constr_list: &[usize]) -> Result<DispatchPlan> {
    let mut root = None;
    for &i in constr_list {
        root = BinTrie::insert_paths(root, &ty.constructors[i].begins_with, 1u64 << i);
    }
    let Some(mut root) = root else {
        return Ok(DispatchPlan::Reject);
    };
    let d = root.compute_useful_depth(0);
    if root.find_conflict_path(0, !0) == 0 && d <= 6 {
        return Ok(prefix_table(ty, constr_list, d));
    }
    subcase(comp, ty, Some(&*root), 0)
}

/// Nested decision tree: test prefix bits while they discriminate, then
/// fall back to admissibility projections.
fn subcase(
    comp: &Compiler,
    ty: &Type,
    node: Option<&BinTrie>,
    depth: u32,
) -> Result<DispatchPlan> {
    let Some(node) = node else {
        return Ok(DispatchPlan::Reject);
    };
    if node.down_tag == 0 {
        return Ok(DispatchPlan::Reject);
    }
    if node.is_unique() {
        return Ok(DispatchPlan::ReturnConstructor(
            node.unique_value().expect("non-empty down tag"),
        ));
    }
    if node.useful_depth == 0 {
        return param_plan(comp, ty, node.down_tag);
    }
    match (node.left.as_deref(), node.right.as_deref()) {
        (Some(left), None) => subcase(comp, ty, Some(left), depth + 1),
        (None, Some(right)) => subcase(comp, ty, Some(right), depth + 1),
        (Some(left), Some(right)) => Ok(DispatchPlan::BitTest {
            depth,
            zero: Box::new(subcase(comp, ty, Some(left), depth + 1)?),
            one: Box::new(subcase(comp, ty, Some(right), depth + 1)?),
        }),
        (None, None) => Ok(DispatchPlan::Reject),
    }
}

/// Positions of positive natural arguments, in admissibility order.
fn nat_param_positions(ty: &Type) -> Vec<usize> {
    ty.args
        .iter()
        .enumerate()
        .filter(|(_, a)| a.contains(TypeArgs::IS_NAT) && !a.contains(TypeArgs::IS_NEG))
        .map(|(i, _)| i)
        .collect()
}

/// Distinguishes the constructor set `tag` by projecting one, two or three
/// natural parameters through the admissibility maps.
fn param_plan(comp: &Compiler, ty: &Type, tag: u64) -> Result<DispatchPlan> {
    if tag == 0 {
        return Ok(DispatchPlan::Reject);
    }
    if tag & tag.wrapping_sub(1) == 0 {
        return Ok(DispatchPlan::ReturnConstructor(tag.trailing_zeros() as usize));
    }
    let members: Vec<usize> = (0..64).filter(|i| (tag >> i) & 1 != 0).collect();
    // The second-largest dimension bounds the searchable parameters: any
    // projection must be meaningful for at least two members.
    let mut mdim = 0;
    let mut mmdim = 0;
    for &c in &members {
        let dim = ty.constructors[c].admissible.dim();
        if dim > mdim {
            mmdim = mdim;
            mdim = dim;
        } else if dim > mmdim {
            mmdim = dim;
        }
    }
    let positions = nat_param_positions(ty);
    for p1 in 0..mmdim {
        let mut a = [0i8; 4];
        if members
            .iter()
            .all(|&c| ty.constructors[c].admissible.extract1(&mut a, c as i8 + 1, p1))
        {
            return Ok(DispatchPlan::ParamMatrix {
                params: vec![positions[p1]],
                table: a.iter().map(|&v| decode_cell(v)).collect(),
            });
        }
    }
    for p2 in 0..mmdim {
        for p1 in 0..p2 {
            let mut a = [[0i8; 4]; 4];
            if members.iter().all(|&c| {
                ty.constructors[c]
                    .admissible
                    .extract2(&mut a, c as i8 + 1, p1, p2)
            }) {
                return Ok(DispatchPlan::ParamMatrix {
                    params: vec![positions[p1], positions[p2]],
                    table: a
                        .iter()
                        .flatten()
                        .map(|&v| decode_cell(v))
                        .collect(),
                });
            }
        }
    }
    for p3 in 0..mmdim {
        for p2 in 0..p3 {
            for p1 in 0..p2 {
                let mut a = [[[0i8; 4]; 4]; 4];
                if members.iter().all(|&c| {
                    ty.constructors[c]
                        .admissible
                        .extract3(&mut a, c as i8 + 1, p1, p2, p3)
                }) {
                    return Ok(DispatchPlan::ParamMatrix {
                        params: vec![positions[p1], positions[p2], positions[p3]],
                        table: a
                            .iter()
                            .flatten()
                            .flatten()
                            .map(|&v| decode_cell(v))
                            .collect(),
                    });
                }
            }
        }
    }
    Err(Error::new(
        ty.loc,
        ErrorKind::Dispatch(format!(
            "cannot distinguish constructors of type `{}` using up to three parameters",
            ty.display_name(&comp.interner)
        )),
    ))
}

fn decode_cell(v: i8) -> Option<usize> {
    if v > 0 { Some(v as usize - 1) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_cell_maps_tags_back_to_indices() {
        assert_eq!(decode_cell(0), None);
        assert_eq!(decode_cell(1), Some(0));
        assert_eq!(decode_cell(5), Some(4));
    }
}
