use crate::compiler::admissible::{ConflictGraph, ConflictSet};
use crate::compiler::bitpfx::BitPfxCollection;

fn lower_bit(x: u64) -> u64 {
    x & x.wrapping_neg()
}

/// Binary trie over the bit-prefixes of a type's constructors.
///
/// Paths are prefix words (`<bits> 1 0...0`); `tag` is the bitmask of
/// constructor indices whose prefix ends at this node, `down_tag` the union
/// over the subtree, and `useful_depth` the least depth at which the
/// remaining subtree still discriminates between constructors.
#[derive(Debug, Default)]
pub struct BinTrie {
    pub left: Option<Box<BinTrie>>,
    pub right: Option<Box<BinTrie>>,
    pub tag: u64,
    pub down_tag: u64,
    pub useful_depth: u32,
}

impl BinTrie {
    pub fn with_tag(tag: u64) -> Self {
        BinTrie {
            tag,
            ..Default::default()
        }
    }

    /// True when at most one constructor occurs below this node.
    pub fn is_unique(&self) -> bool {
        self.down_tag & self.down_tag.wrapping_sub(1) == 0
    }

    /// Index of the single constructor below this node, if any.
    pub fn unique_value(&self) -> Option<usize> {
        if self.down_tag != 0 {
            Some(self.down_tag.trailing_zeros() as usize)
        } else {
            None
        }
    }

    fn ins_path(&mut self, path: u64, new_tag: u64) {
        if path == 0 || new_tag == 0 {
            return;
        }
        if path & !(1u64 << 63) == 0 {
            self.tag |= new_tag;
            return;
        }
        if path >> 63 == 0 {
            self.left = Self::insert_path(self.left.take(), path << 1, new_tag);
        } else {
            self.right = Self::insert_path(self.right.take(), path << 1, new_tag);
        }
        if let (Some(l), Some(r)) = (&self.left, &self.right) {
            self.tag |= l.tag & r.tag;
        }
    }

    pub fn insert_path(root: Option<Box<BinTrie>>, path: u64, tag: u64) -> Option<Box<BinTrie>> {
        if path == 0 || tag == 0 {
            return root;
        }
        if let Some(mut root) = root {
            root.ins_path(path, tag);
            return Some(root);
        }
        if path & !(1u64 << 63) == 0 {
            return Some(Box::new(BinTrie::with_tag(tag)));
        }
        let child = Self::insert_path(None, path << 1, tag);
        let mut node = BinTrie::with_tag(0);
        if path >> 63 == 0 {
            node.left = child;
        } else {
            node.right = child;
        }
        Some(Box::new(node))
    }

    pub fn insert_paths(
        mut root: Option<Box<BinTrie>>,
        paths: &BitPfxCollection,
        tag: u64,
    ) -> Option<Box<BinTrie>> {
        if tag != 0 {
            for &x in &paths.pfx {
                root = Self::insert_path(root, x, tag);
            }
        }
        root
    }

    pub fn lookup_node(&self, path: u64) -> Option<&BinTrie> {
        if path == 0 {
            return None;
        }
        if path & !(1u64 << 63) == 0 {
            return Some(self);
        }
        if path >> 63 == 0 {
            self.left.as_ref()?.lookup_node(path << 1)
        } else {
            self.right.as_ref()?.lookup_node(path << 1)
        }
    }

    pub fn lookup_tag(&self, path: u64) -> u64 {
        self.lookup_node(path).map_or(0, |n| n.tag)
    }

    /// Records every set of constructors that can coexist on some path as a
    /// clique of the conflict graph.
    pub fn set_conflict_graph(&self, graph: &mut ConflictGraph, mut colors: u64) {
        colors |= self.tag;
        if self.left.is_none() || self.right.is_none() {
            graph.set_clique(ConflictSet(colors));
        }
        if let Some(l) = &self.left {
            l.set_conflict_graph(graph, colors);
        }
        if let Some(r) = &self.right {
            r.set_conflict_graph(graph, colors);
        }
    }

    /// Computes `useful_depth` bottom-up and `down_tag` along the way.
    pub fn compute_useful_depth(&mut self, colors: u64) -> u32 {
        let colors = colors | self.tag;
        self.tag = colors;
        self.down_tag = colors;
        let mut res = 0;
        if let Some(l) = &mut self.left {
            res = l.compute_useful_depth(colors);
            self.down_tag |= l.down_tag;
        }
        if let Some(r) = &mut self.right {
            res = res.max(r.compute_useful_depth(colors));
            self.down_tag |= r.down_tag;
        }
        if res > 0 {
            self.useful_depth = res + 1;
            return self.useful_depth;
        }
        if let (Some(l), Some(r)) = (&self.left, &self.right) {
            if l.down_tag & !r.down_tag != 0 && r.down_tag & !l.down_tag != 0 {
                self.useful_depth = 1;
                return 1;
            }
        }
        self.useful_depth = 0;
        0
    }

    /// Finds a path reaching two distinct constructors of `mask`, if any.
    /// The result is a prefix word; zero means no conflict.
    pub fn find_conflict_path(&self, colors: u64, mask: u64) -> u64 {
        let colors = colors | (self.tag & mask);
        match (&self.left, &self.right) {
            (None, None) => {
                if colors & colors.wrapping_sub(1) != 0 {
                    1 << 63
                } else {
                    0
                }
            }
            (None, Some(right)) => {
                if colors & colors.wrapping_sub(1) != 0 {
                    1 << 62 // $0
                } else {
                    let x = right.find_conflict_path(colors, mask);
                    if x != 0 { (x >> 1) | (1 << 63) } else { 0 }
                }
            }
            (Some(left), None) => {
                if colors & colors.wrapping_sub(1) != 0 {
                    3 << 62 // $1
                } else {
                    left.find_conflict_path(colors, mask) >> 1
                }
            }
            (Some(left), Some(right)) => {
                let x = left.find_conflict_path(colors, mask);
                let y = right.find_conflict_path(colors, mask);
                if lower_bit(y) > lower_bit(x) {
                    (y >> 1) | (1 << 63)
                } else {
                    x >> 1
                }
            }
        }
    }

    /// Collects the down-tags visible at `depth` into `a` (length
    /// `1 << depth`); an entry's top bit flags "still useful below".
    /// Returns the change mask used to compress the table.
    pub fn build_submap(&self, depth: u32, a: &mut [u64]) -> u64 {
        if depth == 0 {
            a[0] = self.down_tag
                | (if self.useful_depth != 0 { 1 << 63 } else { 0 });
            return (self.down_tag != 0) as u64;
        }
        let n = 1usize << (depth - 1);
        let r1 = match &self.left {
            Some(l) => l.build_submap(depth - 1, &mut a[..n]),
            None => {
                a[..n].fill(0);
                0
            }
        };
        let mut r2 = match &self.right {
            Some(r) => r.build_submap(depth - 1, &mut a[n..]),
            None => {
                a[n..2 * n].fill(0);
                0
            }
        };
        if a[n] != a[n - 1] || a[n] >> 63 != 0 {
            r2 |= 1;
        } else {
            r2 &= !1;
        }
        r1 | (r2 << n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_path(bits: &str) -> u64 {
        let mut val: u64 = 0;
        let mut len = 0;
        for c in bits.chars() {
            val |= ((c == '1') as u64) << (63 - len);
            len += 1;
        }
        val | (1 << (63 - len))
    }

    #[test]
    fn one_bit_prefixes_split_at_depth_one() {
        let mut root = None;
        root = BinTrie::insert_path(root, leaf_path("0"), 1);
        root = BinTrie::insert_path(root, leaf_path("1"), 2);
        let mut root = root.unwrap();
        assert_eq!(root.compute_useful_depth(0), 1);
        assert_eq!(root.find_conflict_path(0, !0), 0);
        assert_eq!(root.lookup_tag(leaf_path("0")), 1);
        assert_eq!(root.lookup_tag(leaf_path("1")), 2);
    }

    #[test]
    fn shared_prefix_is_a_conflict() {
        let mut root = None;
        root = BinTrie::insert_path(root, leaf_path("01"), 1);
        root = BinTrie::insert_path(root, leaf_path("01"), 2);
        let mut root = root.unwrap();
        root.compute_useful_depth(0);
        let conflict = root.find_conflict_path(0, !0);
        assert_ne!(conflict, 0);
        assert_eq!(root.lookup_tag(conflict), 3);
    }

    #[test]
    fn useful_depth_counts_discriminating_levels() {
        // prefixes 00, 01, 1 need two bits to tell apart
        let mut root = None;
        root = BinTrie::insert_path(root, leaf_path("00"), 1);
        root = BinTrie::insert_path(root, leaf_path("01"), 2);
        root = BinTrie::insert_path(root, leaf_path("1"), 4);
        let mut root = root.unwrap();
        assert_eq!(root.compute_useful_depth(0), 2);
        assert!(root.is_unique() == false);
        assert_eq!(root.down_tag, 7);
    }

    #[test]
    fn submap_exposes_depth_slices() {
        let mut root = None;
        root = BinTrie::insert_path(root, leaf_path("00"), 1);
        root = BinTrie::insert_path(root, leaf_path("01"), 2);
        root = BinTrie::insert_path(root, leaf_path("1"), 4);
        let mut root = root.unwrap();
        root.compute_useful_depth(0);
        let mut a = [0u64; 4];
        root.build_submap(2, &mut a);
        assert_eq!(a[0], 1);
        assert_eq!(a[1], 2);
        assert_eq!(a[2], 4);
        assert_eq!(a[3], 4);
    }

    #[test]
    fn conflict_graph_links_coexisting_constructors() {
        let mut root = None;
        // "0" and "01" coexist on the path 01...
        root = BinTrie::insert_path(root, leaf_path("0"), 1);
        root = BinTrie::insert_path(root, leaf_path("01"), 2);
        let mut root = root.unwrap();
        root.compute_useful_depth(0);
        let mut graph = ConflictGraph::new();
        root.set_conflict_graph(&mut graph, 0);
        assert!(graph.get(0, 1));
        assert!(!graph.get(0, 2));
    }
}
