//! The rooted binary species tree: the central data structure the
//! constraint engine decorates and the gene-tree initializer consults.

use crate::hash::HashIndex;
use crate::lca::lca_of_labels;
use crate::newick::{self, RawNode};
use bpp_error::{BppError, BppResult, Provenance};
use smallvec::SmallVec;

/// Classification of a node with respect to a declared outgroup, §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutgroupFlag {
    #[default]
    None,
    /// Entirely within the outgroup clade.
    Full,
    /// An ancestor of the outgroup/ingroup split edge.
    Partial,
}

/// A node of the species tree. Non-tip nodes always have both `left` and
/// `right` set; `parent` is `None` only for the root. `marks` is scratch
/// space for traversal bookkeeping (not used by the constraint/outgroup
/// algorithms, which take a caller-supplied buffer instead — see
/// [`crate::lca`]).
#[derive(Debug, Clone)]
pub struct SpeciesNode {
    pub label: String,
    pub branch_length: f64,
    /// Effective population size, θ ≥ 0. `None` until sampled/assigned by
    /// the (out-of-scope) driver loop.
    pub theta: Option<f64>,
    /// Divergence time, τ ≥ 0.
    pub tau: f64,
    pub left: Option<usize>,
    pub right: Option<usize>,
    pub parent: Option<usize>,
    pub leaves: usize,
    pub index: usize,
    pub marks: u8,
    pub constraint_id: u32,
    pub constraint_lineno: Option<u64>,
    pub outgroup: OutgroupFlag,
}

impl SpeciesNode {
    pub fn is_tip(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}

/// Owns the flat, order-stable node array `[tips | inner | hybrid]`. Tip
/// indices are `[0, tip_count)`; inner indices are `[tip_count, tip_count +
/// inner_count)` with the root always the last inner node; hybrid indices
/// would follow at `[tip_count + inner_count, tip_count + inner_count +
/// hybrid_count)`. `parse_species_tree` only produces bifurcating trees, so
/// `hybrid_count` is always zero here — hybridization-node species networks
/// (MSci) are a Non-goal (see `SPEC_FULL.md` §3) — but the partition and its
/// accessors exist so the node-array shape matches the data model.
pub struct SpeciesTree {
    nodes: Vec<SpeciesNode>,
    tip_count: usize,
    hybrid_count: usize,
    tip_hash: HashIndex<usize>,
}

impl SpeciesTree {
    pub fn tip_count(&self) -> usize {
        self.tip_count
    }

    pub fn inner_count(&self) -> usize {
        self.nodes.len() - self.tip_count - self.hybrid_count
    }

    /// Always zero: hybridization-node parsing is out of scope, see
    /// `SPEC_FULL.md` §3.
    pub fn hybrid_count(&self) -> usize {
        self.hybrid_count
    }

    /// The hybrid partition of the node array. Always empty; see
    /// [`Self::hybrid_count`].
    pub fn hybrid_nodes(&self) -> &[SpeciesNode] {
        &self.nodes[self.tip_count + self.inner_count()..]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn root_index(&self) -> usize {
        if self.inner_count() == 0 {
            0
        } else {
            self.nodes.len() - 1
        }
    }

    pub fn root(&self) -> &SpeciesNode {
        &self.nodes[self.root_index()]
    }

    pub fn node(&self, index: usize) -> &SpeciesNode {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: usize) -> &mut SpeciesNode {
        &mut self.nodes[index]
    }

    pub fn nodes(&self) -> &[SpeciesNode] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [SpeciesNode] {
        &mut self.nodes
    }

    pub fn find_tip(&self, label: &str) -> Option<usize> {
        self.tip_hash.find_label(label).copied()
    }

    fn children_of(&self, i: usize) -> SmallVec<[usize; 2]> {
        let n = &self.nodes[i];
        let mut v = SmallVec::new();
        if let Some(l) = n.left {
            v.push(l);
        }
        if let Some(r) = n.right {
            v.push(r);
        }
        v
    }

    fn parent_of(&self, i: usize) -> Option<usize> {
        self.nodes[i].parent
    }

    /// Most-recent common ancestor of a set of tip labels. Returns `None` if
    /// any label is not a tip of this tree.
    pub fn lca(&self, labels: &[&str]) -> Option<usize> {
        let mut marks = vec![false; self.nodes.len()];
        lca_of_labels(
            self.root_index(),
            self.nodes.len(),
            |i| self.children_of(i),
            |i| self.parent_of(i),
            |l| self.find_tip(l),
            labels,
            &mut marks,
        )
    }

    /// Pre-order traversal starting at `start`, calling `visit` on every
    /// node for which `predicate` returns `true`. Used by the kernel to
    /// build a deterministic update schedule.
    pub fn traverse_pre_order(
        &self,
        start: usize,
        predicate: impl Fn(&SpeciesNode) -> bool,
        out: &mut Vec<usize>,
    ) {
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i];
            if predicate(node) {
                out.push(i);
            }
            if let Some(r) = node.right {
                stack.push(r);
            }
            if let Some(l) = node.left {
                stack.push(l);
            }
        }
    }

    /// Post-order traversal: children before parent. This is the canonical
    /// update order (§5): a node's CLV slot is only consumed once both
    /// children have been visited.
    pub fn traverse_post_order(
        &self,
        start: usize,
        predicate: impl Fn(&SpeciesNode) -> bool,
        out: &mut Vec<usize>,
    ) {
        fn visit(
            tree: &SpeciesTree,
            i: usize,
            predicate: &impl Fn(&SpeciesNode) -> bool,
            out: &mut Vec<usize>,
        ) {
            let node = &tree.nodes[i];
            if let Some(l) = node.left {
                visit(tree, l, predicate, out);
            }
            if let Some(r) = node.right {
                visit(tree, r, predicate, out);
            }
            if predicate(node) {
                out.push(i);
            }
        }
        visit(self, start, &predicate, out);
    }

    /// Exports the tree as a Newick string, formatting each node with a
    /// caller-supplied serializer (e.g. to append `[&theta=..,tau=..]`
    /// annotations).
    pub fn export_newick(&self, format: impl Fn(&SpeciesNode) -> String) -> String {
        fn build(tree: &SpeciesTree, i: usize) -> RawNode {
            let node = &tree.nodes[i];
            let mut children = Vec::new();
            if let Some(l) = node.left {
                children.push(build(tree, l));
            }
            if let Some(r) = node.right {
                children.push(build(tree, r));
            }
            RawNode {
                label: Some(node.label.clone()),
                branch_length: Some(node.branch_length),
                children,
            }
        }
        let raw_root = build(self, self.root_index());
        newick::write(&raw_root, &|raw| {
            // map back: raw nodes are built in the same order so label text
            // carries the node's own label; `format` wants the real node.
            let idx = self.find_node_by_label(raw.label.as_deref().unwrap_or_default());
            match idx {
                Some(i) => format(&self.nodes[i]),
                None => raw.label.clone().unwrap_or_default(),
            }
        })
    }

    fn find_node_by_label(&self, label: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.label == label)
    }
}

fn count_tips(raw: &RawNode) -> usize {
    if raw.is_leaf() {
        1
    } else {
        raw.children.iter().map(count_tips).sum()
    }
}

fn build_node(
    raw: &RawNode,
    tip_count: usize,
    tips: &mut Vec<SpeciesNode>,
    inner: &mut Vec<SpeciesNode>,
    source: Option<&str>,
) -> BppResult<usize> {
    if raw.is_leaf() {
        let label = raw.label.clone().ok_or_else(|| {
            BppError::syntax(
                source
                    .map(|f| Provenance::at_line(f.to_string(), 1))
                    .unwrap_or_else(Provenance::none),
                "species tree tip without a label",
            )
        })?;
        let idx = tips.len();
        tips.push(SpeciesNode {
            label,
            branch_length: raw.branch_length.unwrap_or(0.0),
            theta: None,
            tau: 0.0,
            left: None,
            right: None,
            parent: None,
            leaves: 1,
            index: idx,
            marks: 0,
            constraint_id: 0,
            constraint_lineno: None,
            outgroup: OutgroupFlag::None,
        });
        Ok(idx)
    } else {
        if raw.children.len() != 2 {
            return Err(BppError::syntax(
                source
                    .map(|f| Provenance::at_line(f.to_string(), 1))
                    .unwrap_or_else(Provenance::none),
                format!(
                    "species tree node has {} children, expected exactly 2",
                    raw.children.len()
                ),
            ));
        }
        let left_idx = build_node(&raw.children[0], tip_count, tips, inner, source)?;
        let right_idx = build_node(&raw.children[1], tip_count, tips, inner, source)?;
        let leaves = node_leaves(left_idx, tip_count, tips, inner) + node_leaves(right_idx, tip_count, tips, inner);
        let idx = tip_count + inner.len();
        inner.push(SpeciesNode {
            label: raw.label.clone().unwrap_or_default(),
            branch_length: raw.branch_length.unwrap_or(0.0),
            theta: None,
            tau: 0.0,
            left: Some(left_idx),
            right: Some(right_idx),
            parent: None,
            leaves,
            index: idx,
            marks: 0,
            constraint_id: 0,
            constraint_lineno: None,
            outgroup: OutgroupFlag::None,
        });
        node_mut_raw(left_idx, tip_count, tips, inner).parent = Some(idx);
        node_mut_raw(right_idx, tip_count, tips, inner).parent = Some(idx);
        Ok(idx)
    }
}

fn node_leaves(idx: usize, tip_count: usize, tips: &[SpeciesNode], inner: &[SpeciesNode]) -> usize {
    if idx < tip_count {
        tips[idx].leaves
    } else {
        inner[idx - tip_count].leaves
    }
}

fn node_mut_raw<'a>(
    idx: usize,
    tip_count: usize,
    tips: &'a mut [SpeciesNode],
    inner: &'a mut [SpeciesNode],
) -> &'a mut SpeciesNode {
    if idx < tip_count {
        &mut tips[idx]
    } else {
        &mut inner[idx - tip_count]
    }
}

/// Parses a Newick string into a [`SpeciesTree`]. Every internal node must
/// have exactly two children (fatal syntax error otherwise); tip labels
/// must be unique (fatal semantic error otherwise).
pub fn parse_species_tree(text: &str, source: Option<&str>) -> BppResult<SpeciesTree> {
    let raw = newick::parse(text, source)?;
    let tip_count = count_tips(&raw);
    let mut tips = Vec::with_capacity(tip_count);
    let mut inner = Vec::with_capacity(tip_count.saturating_sub(1));
    build_node(&raw, tip_count, &mut tips, &mut inner, source)?;

    let mut tip_hash: HashIndex<usize> = HashIndex::create(tip_count.max(1) * 2);
    for t in &tips {
        tip_hash.insert_label(&t.label, t.index).map_err(|_| {
            BppError::semantic(
                source
                    .map(|f| Provenance::at_line(f.to_string(), 1))
                    .unwrap_or_else(Provenance::none),
                format!("duplicate species tip label '{}'", t.label),
            )
        })?;
    }

    let mut nodes = tips;
    nodes.extend(inner);

    Ok(SpeciesTree {
        nodes,
        tip_count,
        hybrid_count: 0,
        tip_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quartet_and_assigns_indices() {
        let t = parse_species_tree("((A,B),(C,D));", None).unwrap();
        assert_eq!(t.tip_count(), 4);
        assert_eq!(t.inner_count(), 2);
        assert_eq!(t.root_index(), 5);
        assert_eq!(t.root().leaves, 4);
        for i in 0..4 {
            assert!(t.node(i).is_tip());
        }
    }

    #[test]
    fn hybrid_partition_is_present_but_empty() {
        let t = parse_species_tree("((A,B),(C,D));", None).unwrap();
        assert_eq!(t.hybrid_count(), 0);
        assert!(t.hybrid_nodes().is_empty());
        assert_eq!(t.node_count(), t.tip_count() + t.inner_count());
    }

    #[test]
    fn parent_pointers_are_consistent() {
        let t = parse_species_tree("((A,B),(C,D));", None).unwrap();
        for node in t.nodes() {
            if let Some(l) = node.left {
                assert_eq!(t.node(l).parent, Some(node.index));
            }
            if let Some(r) = node.right {
                assert_eq!(t.node(r).parent, Some(node.index));
            }
        }
        assert!(t.root().parent.is_none());
    }

    #[test]
    fn rejects_non_bifurcating_node() {
        assert!(parse_species_tree("((A,B,C),D);", None).is_err());
    }

    #[test]
    fn rejects_duplicate_tip_labels() {
        assert!(parse_species_tree("((A,A),D);", None).is_err());
    }

    #[test]
    fn lca_of_single_tip_is_tip() {
        let t = parse_species_tree("(((A,B),C),D);", None).unwrap();
        let lca = t.lca(&["A"]).unwrap();
        assert_eq!(t.node(lca).label, "A");
    }

    #[test]
    fn lca_of_all_tips_is_root() {
        let t = parse_species_tree("(((A,B),C),D);", None).unwrap();
        let lca = t.lca(&["A", "B", "C", "D"]).unwrap();
        assert_eq!(lca, t.root_index());
    }

    #[test]
    fn export_newick_round_trips_topology() {
        let t = parse_species_tree("((A,B),(C,D));", None).unwrap();
        let s = t.export_newick(|n| n.label.clone());
        let reparsed = parse_species_tree(&s, None).unwrap();
        assert_eq!(reparsed.tip_count(), t.tip_count());
        assert_eq!(reparsed.lca(&["A", "B"]), Some(4));
    }
}
