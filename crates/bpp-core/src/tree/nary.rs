//! The n-ary constraint-parse tree: the shape a `define`/`constraint` record
//! parses into before the constraint engine resolves it against the species
//! tree. Unlike [`crate::tree::species`] and [`crate::tree::gene`], a node
//! here may have any number of children (a constraint record's Newick
//! expression is not required to be bifurcating) and the tree is discarded
//! once its constraint has been applied — it never outlives one file-parse
//! pass, so there is no separate "build" vs. "use" API split.

use crate::hash::HashIndex;
use crate::lca::lca_of_labels;
use crate::newick::{self, RawNode};
use bpp_error::BppResult;
use smallvec::SmallVec;

#[derive(Debug, Clone)]
pub struct NaryNode {
    pub label: Option<String>,
    pub children: Vec<usize>,
    pub parent: Option<usize>,
    pub leaves: usize,
    pub index: usize,
    /// Scratch bit for the constraint engine's pre-order marking pass
    /// (`constraint_mark_recursive` in the original); the LCA search itself
    /// uses a caller-supplied buffer instead, see [`crate::lca`].
    pub constrained: bool,
}

impl NaryNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

pub struct NaryTree {
    nodes: Vec<NaryNode>,
    root: usize,
    tip_hash: HashIndex<usize>,
}

impl NaryTree {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn root_index(&self) -> usize {
        self.root
    }

    pub fn root(&self) -> &NaryNode {
        &self.nodes[self.root]
    }

    pub fn node(&self, index: usize) -> &NaryNode {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: usize) -> &mut NaryNode {
        &mut self.nodes[index]
    }

    pub fn nodes(&self) -> &[NaryNode] {
        &self.nodes
    }

    pub fn find_tip(&self, label: &str) -> Option<usize> {
        self.tip_hash.find_label(label).copied()
    }

    pub fn tip_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Indices of every non-leaf node (`ntree->inner` in the original),
    /// in storage order.
    pub fn inner_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len()).filter(move |&i| !self.nodes[i].is_leaf())
    }

    /// Tip labels found transitively under `node` (`ntree_subtree_tiplabels`
    /// in the original), in left-to-right order.
    pub fn subtree_tip_labels(&self, node: usize) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_tip_labels(node, &mut out);
        out
    }

    fn collect_tip_labels<'a>(&'a self, node: usize, out: &mut Vec<&'a str>) {
        let n = &self.nodes[node];
        if n.is_leaf() {
            if let Some(l) = &n.label {
                out.push(l);
            }
        } else {
            for &c in &n.children {
                self.collect_tip_labels(c, out);
            }
        }
    }

    fn children_of(&self, i: usize) -> SmallVec<[usize; 2]> {
        self.nodes[i].children.iter().copied().collect()
    }

    fn parent_of(&self, i: usize) -> Option<usize> {
        self.nodes[i].parent
    }

    pub fn lca(&self, labels: &[&str]) -> Option<usize> {
        let mut marks = vec![false; self.nodes.len()];
        lca_of_labels(
            self.root,
            self.nodes.len(),
            |i| self.children_of(i),
            |i| self.parent_of(i),
            |l| self.find_tip(l),
            labels,
            &mut marks,
        )
    }

    /// Pre-order walk from `start`, used by the constraint engine's
    /// conflict-marking pass.
    pub fn walk_pre_order(&self, start: usize, mut visit: impl FnMut(&NaryNode)) {
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i];
            visit(node);
            for &c in node.children.iter().rev() {
                stack.push(c);
            }
        }
    }
}

fn build_node(raw: &RawNode, nodes: &mut Vec<NaryNode>, parent: Option<usize>) -> usize {
    let idx = nodes.len();
    nodes.push(NaryNode {
        label: raw.label.clone(),
        children: Vec::new(),
        parent,
        leaves: if raw.is_leaf() { 1 } else { 0 },
        index: idx,
        constrained: false,
    });
    let mut leaves = 0;
    let mut child_indices = Vec::with_capacity(raw.children.len());
    for child in &raw.children {
        let c = build_node(child, nodes, Some(idx));
        leaves += nodes[c].leaves;
        child_indices.push(c);
    }
    if !raw.children.is_empty() {
        nodes[idx].leaves = leaves;
    }
    nodes[idx].children = child_indices;
    idx
}

/// Parses a constraint-record Newick expression into an n-ary tree. Any
/// number of children is accepted at internal nodes (`define`/`constraint`
/// trees are not required to be bifurcating, §4.3).
pub fn parse_nary_tree(text: &str, source: Option<&str>) -> BppResult<NaryTree> {
    let raw = newick::parse(text, source)?;
    let mut nodes = Vec::new();
    let root = build_node(&raw, &mut nodes, None);

    let tip_count = nodes.iter().filter(|n| n.is_leaf()).count();
    let mut tip_hash: HashIndex<usize> = HashIndex::create(tip_count.max(1) * 2);
    for n in nodes.iter().filter(|n| n.is_leaf()) {
        if let Some(label) = &n.label {
            // Duplicate tip labels inside one constraint expression are
            // tolerated here; the constraint engine itself rejects them
            // against the species tree's tip set when it applies the record.
            let _ = tip_hash.insert_label(label, n.index);
        }
    }

    Ok(NaryTree {
        nodes,
        root,
        tip_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_polytomy() {
        let t = parse_nary_tree("(A,B,C);", None).unwrap();
        assert_eq!(t.root().children.len(), 3);
        assert_eq!(t.root().leaves, 3);
    }

    #[test]
    fn subtree_tip_labels_are_collected_left_to_right() {
        let t = parse_nary_tree("((A,B),C);", None).unwrap();
        let ab = t.root().children[0];
        assert_eq!(t.subtree_tip_labels(ab), vec!["A", "B"]);
    }

    #[test]
    fn lca_of_two_tips_under_polytomy() {
        let t = parse_nary_tree("(A,B,C);", None).unwrap();
        let lca = t.lca(&["A", "B"]).unwrap();
        assert_eq!(lca, t.root_index());
    }
}
