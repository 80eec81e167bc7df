//! The gene tree: one embedded genealogy per locus, sampled by the MCMC
//! driver and consumed by the substitution kernel. Structurally identical
//! to the species tree (rooted, bifurcating, flat `[tips | inner]` array)
//! but each node additionally carries the indices of its partial-likelihood
//! and transition-probability buffers in the locus partition, since those
//! buffers are allocated once per locus and reused across MCMC iterations.

use crate::hash::HashIndex;
use crate::lca::lca_of_labels;
use crate::newick::{self, RawNode};
use bpp_error::{BppError, BppResult, Provenance};
use smallvec::SmallVec;

/// A node of a gene tree. `time` is the node's age (0 for tips, increasing
/// rootward); `clv_index`/`scaler_index` name slots in the locus partition's
/// conditional-likelihood-vector storage, and `pmatrix_index` names the
/// slot holding this node's transition probability matrix (computed from
/// its branch length by the kernel). All three are assigned once at gene
/// tree construction and stay fixed for the tree's lifetime; only `time`
/// (and derived branch lengths) changes as the chain proposes new
/// genealogies.
#[derive(Debug, Clone)]
pub struct GeneNode {
    pub label: String,
    pub time: f64,
    pub left: Option<usize>,
    pub right: Option<usize>,
    pub parent: Option<usize>,
    pub leaves: usize,
    pub index: usize,
    pub clv_index: usize,
    pub scaler_index: Option<usize>,
    pub pmatrix_index: usize,
    /// Index of the species-tree branch this lineage is embedded in at the
    /// time this node coalesces; populated by the initializer, not by
    /// parsing.
    pub population: Option<usize>,
}

impl GeneNode {
    pub fn is_tip(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    /// Branch length above this node, i.e. the time from this node to its
    /// parent. `None` at the root, which has no branch above it.
    pub fn branch_length(&self, tree: &GeneTree) -> Option<f64> {
        self.parent.map(|p| tree.node(p).time - self.time)
    }
}

pub struct GeneTree {
    nodes: Vec<GeneNode>,
    tip_count: usize,
    tip_hash: HashIndex<usize>,
}

impl GeneTree {
    pub fn tip_count(&self) -> usize {
        self.tip_count
    }

    pub fn inner_count(&self) -> usize {
        self.nodes.len() - self.tip_count
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

    pub fn root(&self) -> &GeneNode {
        &self.nodes[self.root_index()]
    }

    pub fn node(&self, index: usize) -> &GeneNode {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: usize) -> &mut GeneNode {
        &mut self.nodes[index]
    }

    pub fn nodes(&self) -> &[GeneNode] {
        &self.nodes
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

    /// Post-order traversal (children before parent): the order the kernel
    /// must update CLVs in, since a node's CLV depends on both children's.
    pub fn traverse_post_order(&self, out: &mut Vec<usize>) {
        fn visit(tree: &GeneTree, i: usize, out: &mut Vec<usize>) {
            let node = &tree.nodes[i];
            if let Some(l) = node.left {
                visit(tree, l, out);
            }
            if let Some(r) = node.right {
                visit(tree, r, out);
            }
            out.push(i);
        }
        visit(self, self.root_index(), out);
    }

    pub fn export_newick(&self) -> String {
        fn build(tree: &GeneTree, i: usize) -> RawNode {
            let node = &tree.nodes[i];
            let mut children = Vec::new();
            if let Some(l) = node.left {
                children.push(build(tree, l));
            }
            if let Some(r) = node.right {
                children.push(build(tree, r));
            }
            let branch_length = node.branch_length(tree);
            RawNode {
                label: Some(node.label.clone()),
                branch_length,
                children,
            }
        }
        let raw_root = build(self, self.root_index());
        newick::write(&raw_root, &|raw| raw.label.clone().unwrap_or_default())
    }
}

fn count_tips(raw: &RawNode) -> usize {
    if raw.is_leaf() {
        1
    } else {
        raw.children.iter().map(count_tips).sum()
    }
}

#[allow(clippy::too_many_arguments)]
fn build_node(
    raw: &RawNode,
    tip_count: usize,
    tips: &mut Vec<GeneNode>,
    inner: &mut Vec<GeneNode>,
    clv_counter: &mut usize,
    pmat_counter: &mut usize,
    source: Option<&str>,
) -> BppResult<usize> {
    if raw.is_leaf() {
        let label = raw.label.clone().ok_or_else(|| {
            BppError::syntax(
                source
                    .map(|f| Provenance::at_line(f.to_string(), 1))
                    .unwrap_or_else(Provenance::none),
                "gene tree tip without a label",
            )
        })?;
        let idx = tips.len();
        let clv_index = *clv_counter;
        *clv_counter += 1;
        let pmatrix_index = *pmat_counter;
        *pmat_counter += 1;
        tips.push(GeneNode {
            label,
            time: 0.0,
            left: None,
            right: None,
            parent: None,
            leaves: 1,
            index: idx,
            clv_index,
            scaler_index: None,
            pmatrix_index,
            population: None,
        });
        Ok(idx)
    } else {
        if raw.children.len() != 2 {
            return Err(BppError::syntax(
                source
                    .map(|f| Provenance::at_line(f.to_string(), 1))
                    .unwrap_or_else(Provenance::none),
                format!(
                    "gene tree node has {} children, expected exactly 2",
                    raw.children.len()
                ),
            ));
        }
        let left_idx = build_node(
            &raw.children[0],
            tip_count,
            tips,
            inner,
            clv_counter,
            pmat_counter,
            source,
        )?;
        let right_idx = build_node(
            &raw.children[1],
            tip_count,
            tips,
            inner,
            clv_counter,
            pmat_counter,
            source,
        )?;
        let leaves = node_leaves(left_idx, tip_count, tips, inner) + node_leaves(right_idx, tip_count, tips, inner);
        let idx = tip_count + inner.len();
        let clv_index = *clv_counter;
        *clv_counter += 1;
        let pmatrix_index = *pmat_counter;
        *pmat_counter += 1;
        // Gene-tree node age is derived from the cumulative branch length
        // below it; with a Newick branch length on the left child this is
        // left.time + left.branch_length, and both children must agree.
        let time = match (raw.children[0].branch_length, raw.children[1].branch_length) {
            (Some(bl), _) => node_time(left_idx, tip_count, tips, inner) + bl,
            (None, Some(bl)) => node_time(right_idx, tip_count, tips, inner) + bl,
            (None, None) => 0.0,
        };
        inner.push(GeneNode {
            label: raw.label.clone().unwrap_or_default(),
            time,
            left: Some(left_idx),
            right: Some(right_idx),
            parent: None,
            leaves,
            index: idx,
            clv_index,
            scaler_index: None,
            pmatrix_index,
            population: None,
        });
        node_mut_raw(left_idx, tip_count, tips, inner).parent = Some(idx);
        node_mut_raw(right_idx, tip_count, tips, inner).parent = Some(idx);
        Ok(idx)
    }
}

fn node_leaves(idx: usize, tip_count: usize, tips: &[GeneNode], inner: &[GeneNode]) -> usize {
    if idx < tip_count {
        tips[idx].leaves
    } else {
        inner[idx - tip_count].leaves
    }
}

fn node_time(idx: usize, tip_count: usize, tips: &[GeneNode], inner: &[GeneNode]) -> f64 {
    if idx < tip_count {
        tips[idx].time
    } else {
        inner[idx - tip_count].time
    }
}

fn node_mut_raw<'a>(
    idx: usize,
    tip_count: usize,
    tips: &'a mut [GeneNode],
    inner: &'a mut [GeneNode],
) -> &'a mut GeneNode {
    if idx < tip_count {
        &mut tips[idx]
    } else {
        &mut inner[idx - tip_count]
    }
}

/// Parses a Newick gene tree. Branch lengths give node ages by accumulation
/// from the tips (tips are fixed at time 0); `clv_index`/`pmatrix_index` are
/// assigned in construction order (tips first, then inner nodes, matching
/// node index order) so a freshly parsed tree's buffers can be allocated by
/// simply sizing a `Vec` to `node_count()`.
pub fn parse_gene_tree(text: &str, source: Option<&str>) -> BppResult<GeneTree> {
    let raw = newick::parse(text, source)?;
    let tip_count = count_tips(&raw);
    let mut tips = Vec::with_capacity(tip_count);
    let mut inner = Vec::with_capacity(tip_count.saturating_sub(1));
    let mut clv_counter = 0usize;
    let mut pmat_counter = 0usize;
    build_node(
        &raw,
        tip_count,
        &mut tips,
        &mut inner,
        &mut clv_counter,
        &mut pmat_counter,
        source,
    )?;

    let mut tip_hash: HashIndex<usize> = HashIndex::create(tip_count.max(1) * 2);
    for t in &tips {
        tip_hash.insert_label(&t.label, t.index).map_err(|_| {
            BppError::semantic(
                source
                    .map(|f| Provenance::at_line(f.to_string(), 1))
                    .unwrap_or_else(Provenance::none),
                format!("duplicate gene tip label '{}'", t.label),
            )
        })?;
    }

    let mut nodes = tips;
    nodes.extend(inner);

    Ok(GeneTree {
        nodes,
        tip_count,
        tip_hash,
    })
}

/// Incrementally builds a [`GeneTree`] by adding tips and then merging
/// lineages pairwise, newest-first — the shape a coalescent simulator
/// constructs a genealogy in, as opposed to [`parse_gene_tree`]'s top-down
/// Newick walk. All tips must be added before the first [`Self::merge`]
/// call.
pub struct GeneTreeBuilder {
    tips: Vec<GeneNode>,
    inner: Vec<GeneNode>,
    tip_hash: HashIndex<usize>,
    clv_counter: usize,
    pmatrix_counter: usize,
    frozen_tip_count: Option<usize>,
}

impl GeneTreeBuilder {
    pub fn new() -> Self {
        GeneTreeBuilder {
            tips: Vec::new(),
            inner: Vec::new(),
            tip_hash: HashIndex::create(16),
            clv_counter: 0,
            pmatrix_counter: 0,
            frozen_tip_count: None,
        }
    }

    /// Adds a tip lineage, returning its node index. Must not be called
    /// after the first [`Self::merge`].
    pub fn add_tip(&mut self, label: String) -> BppResult<usize> {
        if self.frozen_tip_count.is_some() {
            return Err(BppError::semantic(
                Provenance::none(),
                "cannot add a tip to a gene tree builder after merging has started",
            ));
        }
        let idx = self.tips.len();
        self.tip_hash.insert_label(&label, idx).map_err(|_| {
            BppError::semantic(
                Provenance::none(),
                format!("duplicate gene tip label '{label}'"),
            )
        })?;
        let clv_index = self.clv_counter;
        self.clv_counter += 1;
        let pmatrix_index = self.pmatrix_counter;
        self.pmatrix_counter += 1;
        self.tips.push(GeneNode {
            label,
            time: 0.0,
            left: None,
            right: None,
            parent: None,
            leaves: 1,
            index: idx,
            clv_index,
            scaler_index: None,
            pmatrix_index,
            population: None,
        });
        Ok(idx)
    }

    /// Coalesces the lineages at `left` and `right` into a new ancestor at
    /// `time`, returning the new node's index.
    pub fn merge(&mut self, left: usize, right: usize, time: f64) -> usize {
        let tip_count = *self.frozen_tip_count.get_or_insert_with(|| self.tips.len());
        let leaves = self.leaves_of(left, tip_count) + self.leaves_of(right, tip_count);
        let idx = tip_count + self.inner.len();
        let clv_index = self.clv_counter;
        self.clv_counter += 1;
        let pmatrix_index = self.pmatrix_counter;
        self.pmatrix_counter += 1;
        self.inner.push(GeneNode {
            label: String::new(),
            time,
            left: Some(left),
            right: Some(right),
            parent: None,
            leaves,
            index: idx,
            clv_index,
            scaler_index: None,
            pmatrix_index,
            population: None,
        });
        self.node_mut(left, tip_count).parent = Some(idx);
        self.node_mut(right, tip_count).parent = Some(idx);
        idx
    }

    fn leaves_of(&self, idx: usize, tip_count: usize) -> usize {
        if idx < tip_count {
            self.tips[idx].leaves
        } else {
            self.inner[idx - tip_count].leaves
        }
    }

    fn node_mut(&mut self, idx: usize, tip_count: usize) -> &mut GeneNode {
        if idx < tip_count {
            &mut self.tips[idx]
        } else {
            &mut self.inner[idx - tip_count]
        }
    }

    pub fn finish(self) -> GeneTree {
        let tip_count = self.tips.len();
        let mut nodes = self.tips;
        nodes.extend(self.inner);
        GeneTree {
            nodes,
            tip_count,
            tip_hash: self.tip_hash,
        }
    }
}

impl Default for GeneTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gene_tree_and_accumulates_times() {
        let t = parse_gene_tree("((A:1.0,B:1.0):2.0,C:3.0);", None).unwrap();
        assert_eq!(t.tip_count(), 3);
        let ab = t.node(t.root().left.unwrap());
        assert_eq!(ab.time, 1.0);
        assert_eq!(t.root().time, 3.0);
    }

    #[test]
    fn clv_and_pmatrix_indices_cover_node_range() {
        let t = parse_gene_tree("((A:1.0,B:1.0):2.0,C:3.0);", None).unwrap();
        let mut clv_indices: Vec<usize> = t.nodes().iter().map(|n| n.clv_index).collect();
        clv_indices.sort_unstable();
        assert_eq!(clv_indices, (0..t.node_count()).collect::<Vec<_>>());
    }

    #[test]
    fn builder_assembles_a_valid_tree() {
        let mut b = GeneTreeBuilder::new();
        let a = b.add_tip("A".to_string()).unwrap();
        let bb = b.add_tip("B".to_string()).unwrap();
        let c = b.add_tip("C".to_string()).unwrap();
        let ab = b.merge(a, bb, 1.0);
        let root = b.merge(ab, c, 2.0);
        let tree = b.finish();
        assert_eq!(tree.tip_count(), 3);
        assert_eq!(tree.root_index(), root);
        assert_eq!(tree.node(root).time, 2.0);
        assert_eq!(tree.find_tip("A"), Some(a));
    }

    #[test]
    fn post_order_visits_children_before_parent() {
        let t = parse_gene_tree("((A:1.0,B:1.0):2.0,C:3.0);", None).unwrap();
        let mut order = Vec::new();
        t.traverse_post_order(&mut order);
        let pos = |idx: usize| order.iter().position(|&x| x == idx).unwrap();
        let ab = t.root().left.unwrap();
        assert!(pos(t.find_tip("A").unwrap()) < pos(ab));
        assert!(pos(ab) < pos(t.root_index()));
    }
}
