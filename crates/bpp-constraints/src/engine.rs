//! Applies parsed constraint and outgroup records to a species tree:
//! resolves each record's tip labels against the tree via LCA, detects
//! conflicting constraints, and performs the outgroup split-edge validation.
//! Grounded on `constraint_process_recursive`/`constraint_process` and
//! `outgroup_process` in the original constraint engine.

use crate::aliases::AliasTable;
use crate::records::Record;
use crate::redundancy::{prune_redundant, ParsedConstraint, PrunedConstraint};
use bpp_core::{newick, parse_nary_tree, NaryTree, OutgroupFlag, SpeciesTree};
use bpp_error::{BppError, BppResult, Provenance};

fn provenance(source: Option<&str>, lineno: u64) -> Provenance {
    match source {
        Some(f) => Provenance::at_line(f.to_string(), lineno),
        None => Provenance::at_line(format!("line {lineno}"), lineno),
    }
}

fn post_order_inner(tree: &NaryTree, i: usize, out: &mut Vec<usize>) {
    let node = tree.node(i);
    for &c in &node.children {
        post_order_inner(tree, c, out);
    }
    if !node.is_leaf() {
        out.push(i);
    }
}

/// Stamps `node` and every descendant that is not already constrained with
/// `id` (`constraint_mark_recursive` in the original): recursion stops the
/// moment it meets a node that already carries a constraint, so an earlier,
/// more specific constraint is never overwritten by a later, broader one.
fn mark_unconstrained_recursive(tree: &mut SpeciesTree, node_idx: usize, id: u32, lineno: u64) {
    if tree.node(node_idx).constraint_id != 0 {
        return;
    }
    let node = tree.node_mut(node_idx);
    node.constraint_id = id;
    node.constraint_lineno = Some(lineno);
    let (left, right) = (tree.node(node_idx).left, tree.node(node_idx).right);
    if let Some(l) = left {
        mark_unconstrained_recursive(tree, l, id, lineno);
    }
    if let Some(r) = right {
        mark_unconstrained_recursive(tree, r, id, lineno);
    }
}

/// Resolves one surviving constraint record's n-ary tree against the
/// species tree (`constraint_process`/`constraint_process_recursive` in the
/// original). First checks the record is a subtree of the species tree at
/// all: the species-tree LCA of every tip label in the record must have
/// exactly that many leaves, not more. Then every internal node of `ntree`
/// is post-order resolved to its species-tree LCA; the LCA's two children
/// (not the LCA itself) are compared against each other — differing
/// constraint ids is a conflict — and, if they agree, `next_id` is bumped
/// and both children are marked via [`mark_unconstrained_recursive`].
/// `next_id` is a single counter threaded across the whole constraint pass
/// (surviving constraints and the outgroup record), not reset per record,
/// since one multi-clade constraint record can mint more than one id.
fn apply_one_constraint(
    tree: &mut SpeciesTree,
    ntree: &NaryTree,
    next_id: &mut u32,
    lineno: u64,
    source: Option<&str>,
) -> BppResult<()> {
    let whole_labels = ntree.subtree_tip_labels(ntree.root_index());
    let whole_lca = tree.lca(&whole_labels).ok_or_else(|| {
        BppError::semantic(
            provenance(source, lineno),
            "constraint references a label not present in the species tree",
        )
    })?;
    if tree.node(whole_lca).leaves != whole_labels.len() {
        return Err(BppError::semantic(
            provenance(source, lineno),
            "constraint is not a subtree of the species tree",
        ));
    }

    let mut order = Vec::new();
    post_order_inner(ntree, ntree.root_index(), &mut order);

    for node_idx in order {
        let labels = ntree.subtree_tip_labels(node_idx);
        let lca = tree.lca(&labels).ok_or_else(|| {
            BppError::semantic(
                provenance(source, lineno),
                "constraint references a label not present in the species tree",
            )
        })?;
        let (left, right) = (tree.node(lca).left, tree.node(lca).right);
        let (Some(left), Some(right)) = (left, right) else {
            continue;
        };
        let left_id = tree.node(left).constraint_id;
        let right_id = tree.node(right).constraint_id;
        if left_id != right_id {
            let conflict_lineno = if left_id != 0 {
                tree.node(left).constraint_lineno
            } else {
                tree.node(right).constraint_lineno
            }
            .unwrap_or(0);
            return Err(BppError::semantic(
                provenance(source, lineno),
                format!(
                    "constraint at line {lineno} conflicts with constraint at line {conflict_lineno}"
                ),
            ));
        }
        *next_id += 1;
        let id = *next_id;
        mark_unconstrained_recursive(tree, left, id, lineno);
        mark_unconstrained_recursive(tree, right, id, lineno);
    }
    Ok(())
}

/// Checks whether `node` is `stop`, or every node strictly between them
/// (exclusive of `stop`) carries `mark` (`valid_outgroup_split_recursive` in
/// the original). Used twice to validate a candidate split edge: once from
/// the root down to the split (must all be marked) and once from the split
/// down to the leaves (must all be unmarked).
fn valid_outgroup_split_recursive(
    tree: &SpeciesTree,
    node: Option<usize>,
    stop: Option<usize>,
    mark: bool,
    marks: &[bool],
) -> bool {
    let Some(node) = node else {
        return true;
    };
    if Some(node) == stop {
        return true;
    }
    let n = tree.node(node);
    let m1 = valid_outgroup_split_recursive(tree, n.left, stop, mark, marks);
    let m2 = valid_outgroup_split_recursive(tree, n.right, stop, mark, marks);
    marks[node] == mark && m1 && m2
}

/// Applies an `outgroup` record (`outgroup_process` in the original): marks
/// the root-path of every outgroup tip, scans the node array for the unique
/// edge splitting the tree into an all-marked component (containing the
/// root) and an all-unmarked component, checks for constraint collisions
/// across the split, classifies the outgroup as monophyletic or
/// paraphyletic, and tags flags accordingly. The species tree's root is
/// unconditionally tagged `Partial` regardless of its own mark, matching
/// the original's "for consistency" comment.
fn apply_outgroup(
    tree: &mut SpeciesTree,
    labels: &[String],
    next_id: &mut u32,
    lineno: u64,
    source: Option<&str>,
) -> BppResult<()> {
    if labels.is_empty() {
        return Err(BppError::semantic(
            provenance(source, lineno),
            "no labels found in outgroup definition",
        ));
    }
    let mut tip_indices = Vec::with_capacity(labels.len());
    for label in labels {
        let idx = tree.find_tip(label).ok_or_else(|| {
            BppError::semantic(
                provenance(source, lineno),
                format!("invalid taxon '{label}' in outgroup definition"),
            )
        })?;
        tip_indices.push(idx);
    }
    if labels.len() >= tree.tip_count() {
        return Err(BppError::semantic(
            provenance(source, lineno),
            "outgroup must consist of fewer taxa than the species tree",
        ));
    }

    let mut marks = vec![false; tree.node_count()];
    for &tip in &tip_indices {
        let mut cur = Some(tip);
        while let Some(c) = cur {
            marks[c] = true;
            cur = tree.node(c).parent;
        }
    }

    let scan_count = tree.tip_count() + tree.inner_count();
    let mut split = None;
    for i in 0..scan_count {
        let Some(parent) = tree.node(i).parent else {
            continue;
        };
        if marks[i] == marks[parent] {
            continue;
        }
        if !marks[parent] {
            break;
        }
        if valid_outgroup_split_recursive(tree, Some(tree.root_index()), Some(i), true, &marks)
            && valid_outgroup_split_recursive(tree, Some(i), None, false, &marks)
        {
            split = Some(i);
            break;
        }
    }
    let split = split.ok_or_else(|| {
        BppError::semantic(
            provenance(source, lineno),
            "invalid outgroup definition: no edge splits the tree into outgroup and ingroup",
        )
    })?;

    // Check #2: no ingroup constraint id may also appear on an outgroup node.
    let mut conflict_lineno = None;
    'check2: for i in 0..scan_count {
        if marks[i] || i == split {
            continue;
        }
        let x_id = tree.node(i).constraint_id;
        for j in 0..scan_count {
            if !marks[j] {
                continue;
            }
            let y_id = tree.node(j).constraint_id;
            if y_id != 0 && y_id == x_id {
                conflict_lineno = tree.node(i).constraint_lineno;
                break 'check2;
            }
        }
    }
    if let Some(conflict_lineno) = conflict_lineno {
        return Err(BppError::semantic(
            provenance(source, lineno),
            format!("constraint at line {conflict_lineno} conflicts with outgroup definition"),
        ));
    }

    let split_constraint = tree.node(split).constraint_id;
    if split_constraint != 0 {
        let parent = tree
            .node(split)
            .parent
            .expect("split always has a parent: the scan above skips parentless nodes");
        let parent_node = tree.node(parent);
        let sister = if parent_node.left == Some(split) {
            parent_node.right
        } else {
            parent_node.left
        }
        .expect("species tree nodes are always bifurcating");
        if tree.node(sister).constraint_id != split_constraint {
            return Err(BppError::semantic(
                provenance(source, lineno),
                "internal constraint error: outgroup split's sister does not share its constraint",
            ));
        }
        if split_constraint == parent_node.constraint_id {
            let split_lineno = tree.node(split).constraint_lineno.unwrap_or(0);
            return Err(BppError::semantic(
                provenance(source, lineno),
                format!("constraint at line {split_lineno} conflicts with outgroup definition"),
            ));
        }
    }

    let parent = tree
        .node(split)
        .parent
        .expect("split always has a parent: the scan above skips parentless nodes");
    let monophyletic = tree.node(parent).parent.is_none();
    if monophyletic {
        for i in 0..scan_count {
            if marks[i] {
                tree.node_mut(i).outgroup = OutgroupFlag::Full;
            }
        }
    } else {
        for i in 0..scan_count {
            if !marks[i] {
                continue;
            }
            let mut ancestor_of_split = false;
            let mut y = Some(split);
            while let Some(yy) = y {
                if yy == i {
                    ancestor_of_split = true;
                    break;
                }
                y = tree.node(yy).parent;
            }
            tree.node_mut(i).outgroup = if ancestor_of_split {
                OutgroupFlag::Partial
            } else {
                OutgroupFlag::Full
            };
        }
    }
    // For consistency the root always receives `Partial`, even though the
    // root's own outgroup flag has no further meaning.
    let root_index = tree.root_index();
    tree.node_mut(root_index).outgroup = OutgroupFlag::Partial;

    *next_id += 1;
    let id = *next_id;
    for i in 0..scan_count {
        if marks[i] && tree.node(i).constraint_id == 0 {
            let node = tree.node_mut(i);
            node.constraint_id = id;
            node.constraint_lineno = Some(lineno);
        }
    }
    // Lets an unconstrained ingroup clade be regrafted within the
    // outgroup-classed clan during the (out-of-scope) SPR driver.
    if tree.node(split).constraint_id == 0 {
        tree.node_mut(split).constraint_id = id;
    }

    Ok(())
}

/// Parses, expands, prunes, and applies every record in `text` to `tree`.
/// Records are processed `define`s first (building the alias table),
/// `constraint`s next (after redundancy pruning), and `outgroup` last,
/// regardless of their order in the file — matching the original's pass of
/// repositioning the outgroup record to the tail of the list before
/// applying anything. Returns the redundant constraints that were dropped,
/// each naming the line that was kept and the line that was removed.
pub fn parse_and_set_constraints(
    tree: &mut SpeciesTree,
    text: &str,
    source: Option<&str>,
) -> BppResult<Vec<PrunedConstraint>> {
    let records = crate::records::parse_records(text, source)?;

    let mut outgroup: Option<(Vec<String>, u64)> = None;
    let mut aliases = AliasTable::new();
    let mut constraint_exprs: Vec<(String, u64)> = Vec::new();

    for record in &records {
        match record {
            Record::Define { alias, expr, lineno } => {
                let raw = newick::parse(expr, source)?;
                let expanded = aliases.expand(&raw, *lineno)?;
                aliases.define(alias.clone(), expanded, *lineno)?;
            }
            Record::Constraint { expr, lineno } => {
                constraint_exprs.push((expr.clone(), *lineno));
            }
            Record::Outgroup { labels, lineno } => {
                if outgroup.is_some() {
                    return Err(BppError::semantic(
                        provenance(source, *lineno),
                        "more than one outgroup record in constraint file",
                    ));
                }
                outgroup = Some((labels.clone(), *lineno));
            }
        }
    }

    let mut parsed_constraints = Vec::with_capacity(constraint_exprs.len());
    for (expr, lineno) in &constraint_exprs {
        let raw = newick::parse(expr, source)?;
        let expanded = aliases.expand(&raw, *lineno)?;
        let serialized = newick::write(&expanded, &|n| n.label.clone().unwrap_or_default());
        let ntree = parse_nary_tree(&serialized, source)?;
        parsed_constraints.push(ParsedConstraint {
            tree: ntree,
            lineno: *lineno,
        });
    }

    let outcome = prune_redundant(&parsed_constraints);

    // A single counter threaded across every surviving constraint record and
    // the outgroup record: one multi-clade constraint can mint more than one
    // id, so ids are not assigned one-per-record (see `apply_one_constraint`).
    let mut next_id: u32 = 0;
    for i in outcome.surviving {
        apply_one_constraint(
            tree,
            &parsed_constraints[i].tree,
            &mut next_id,
            parsed_constraints[i].lineno,
            source,
        )?;
    }

    if let Some((labels, lineno)) = outgroup {
        apply_outgroup(tree, &labels, &mut next_id, lineno, source)?;
    }

    Ok(outcome.pruned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpp_core::parse_species_tree;

    /// Literal scenario 1 (`spec.md` §8): species tree `((A,B),(C,D));`,
    /// constraint `(A,B);` — accepted; A and B receive the same positive
    /// constraint id; C, D unchanged. The constraint's own LCA node is left
    /// untouched — only its two children are marked.
    #[test]
    fn scenario_1_single_constraint_marks_children_not_lca() {
        let mut tree = parse_species_tree("((A,B),(C,D));", None).unwrap();
        parse_and_set_constraints(&mut tree, "constraint (A,B);\n", None).unwrap();
        let a = tree.find_tip("A").unwrap();
        let b = tree.find_tip("B").unwrap();
        let c = tree.find_tip("C").unwrap();
        let d = tree.find_tip("D").unwrap();
        assert!(tree.node(a).constraint_id > 0);
        assert_eq!(tree.node(a).constraint_id, tree.node(b).constraint_id);
        assert_eq!(tree.node(c).constraint_id, 0);
        assert_eq!(tree.node(d).constraint_id, 0);
        let ab_lca = tree.lca(&["A", "B"]).unwrap();
        assert_eq!(tree.node(ab_lca).constraint_id, 0);
    }

    /// Literal scenario 2 (`spec.md` §8): same tree, `(A,B);` then `(B,C);`
    /// — the second is rejected as conflicting: the species-tree LCA of
    /// {B,C} is the root, whose children `(A,B)` and `(C,D)` bear differing
    /// constraint ids.
    #[test]
    fn scenario_2_conflicting_second_constraint_is_rejected() {
        let mut tree = parse_species_tree("((A,B),(C,D));", None).unwrap();
        let text = "constraint (A,B);\nconstraint (B,C);\n";
        assert!(parse_and_set_constraints(&mut tree, text, None).is_err());
    }

    /// Literal scenario 3 (`spec.md` §8): species tree `(((A,B),C),D);`,
    /// outgroup `D` — accepted, monophyletic; D gets `full`; A, B, C get no
    /// outgroup flag; the root is tagged `partial` regardless.
    #[test]
    fn scenario_3_monophyletic_outgroup() {
        let mut tree = parse_species_tree("(((A,B),C),D);", None).unwrap();
        parse_and_set_constraints(&mut tree, "outgroup D;\n", None).unwrap();
        let a = tree.find_tip("A").unwrap();
        let b = tree.find_tip("B").unwrap();
        let c = tree.find_tip("C").unwrap();
        let d = tree.find_tip("D").unwrap();
        assert_eq!(tree.node(d).outgroup, OutgroupFlag::Full);
        assert_eq!(tree.node(a).outgroup, OutgroupFlag::None);
        assert_eq!(tree.node(b).outgroup, OutgroupFlag::None);
        assert_eq!(tree.node(c).outgroup, OutgroupFlag::None);
        let root = tree.root_index();
        assert_eq!(tree.node(root).outgroup, OutgroupFlag::Partial);
    }

    /// Literal scenario 4 (`spec.md` §8): same tree, outgroup `A,D` —
    /// rejected: no edge partitions the tree into {A,D,...} vs. the
    /// complement.
    #[test]
    fn scenario_4_non_splitting_outgroup_is_rejected() {
        let mut tree = parse_species_tree("(((A,B),C),D);", None).unwrap();
        assert!(parse_and_set_constraints(&mut tree, "outgroup A,D;\n", None).is_err());
    }

    /// A constraint whose tip set does not form a clade in the species tree
    /// at all is rejected outright: `(A,C)` over `(((A,B),C),D);` has LCA
    /// `ABC` with 3 leaves, not the 2 labels the constraint names.
    #[test]
    fn constraint_not_forming_a_species_tree_clade_is_rejected() {
        let mut tree = parse_species_tree("(((A,B),C),D);", None).unwrap();
        assert!(parse_and_set_constraints(&mut tree, "constraint (A,C);\n", None).is_err());
    }

    /// Literal scenario 6 (`spec.md` §8): constraint `(A,B);` followed by
    /// `((A,B),C);` over species tree `(((A,B),C),D);` — redundancy pruning
    /// removes the first (it is a full subtree of the second), logging both
    /// line numbers, and the surviving constraint still applies cleanly.
    #[test]
    fn scenario_6_redundant_constraint_is_pruned_and_logged() {
        let mut tree = parse_species_tree("(((A,B),C),D);", None).unwrap();
        let text = "constraint (A,B);\nconstraint ((A,B),C);\n";
        let pruned = parse_and_set_constraints(&mut tree, text, None).unwrap();
        assert_eq!(
            pruned,
            vec![PrunedConstraint {
                kept_line: 2,
                removed_line: 1
            }]
        );
        let a = tree.find_tip("A").unwrap();
        let b = tree.find_tip("B").unwrap();
        let c = tree.find_tip("C").unwrap();
        assert!(tree.node(a).constraint_id > 0);
        assert_eq!(tree.node(a).constraint_id, tree.node(b).constraint_id);
        assert!(tree.node(c).constraint_id > 0);
    }

    #[test]
    fn applies_outgroup_and_flags_full() {
        let mut tree = parse_species_tree("((A,B),(C,D));", None).unwrap();
        parse_and_set_constraints(&mut tree, "outgroup C,D;\n", None).unwrap();
        let cd = tree.lca(&["C", "D"]).unwrap();
        assert_eq!(tree.node(cd).outgroup, OutgroupFlag::Full);
    }

    #[test]
    fn alias_expansion_feeds_constraint() {
        let mut tree = parse_species_tree("(((A,B),C),D);", None).unwrap();
        let text = "define X as (A,B)\nconstraint (X,C);\n";
        parse_and_set_constraints(&mut tree, text, None).unwrap();
        let a = tree.find_tip("A").unwrap();
        let b = tree.find_tip("B").unwrap();
        let c = tree.find_tip("C").unwrap();
        let ab_species = tree.lca(&["A", "B"]).unwrap();
        assert_eq!(tree.node(a).constraint_id, tree.node(b).constraint_id);
        assert!(tree.node(a).constraint_id > 0);
        // The constraint's own top-level LCA (the A,B,C clade) is never
        // stamped; its two children (the A,B clade and C) are.
        assert_eq!(tree.node(ab_species).constraint_id, tree.node(c).constraint_id);
        assert!(tree.node(ab_species).constraint_id > 0);
        assert_ne!(tree.node(a).constraint_id, tree.node(ab_species).constraint_id);
    }

    #[test]
    fn redundant_constraint_is_pruned_not_applied_twice() {
        let mut tree = parse_species_tree("(((A,B),C),D);", None).unwrap();
        let text = "constraint (A,B);\nconstraint (B,A);\n";
        parse_and_set_constraints(&mut tree, text, None).unwrap();
        let a = tree.find_tip("A").unwrap();
        let b = tree.find_tip("B").unwrap();
        assert!(tree.node(a).constraint_id > 0);
        assert_eq!(tree.node(a).constraint_id, tree.node(b).constraint_id);
    }
}
