//! Redundant-constraint pruning (`remove_redundant_constraints` in the
//! original): a `constraint` record whose clades are already fully present
//! inside another record's tree is redundant, so it is dropped. Both line
//! numbers are logged so the user can see which record survived, and also
//! returned to the caller rather than only logged (`spec.md` §6 wants the
//! kept/removed pairing available to a test or a caller, not just stderr).

use bpp_core::NaryTree;

/// One parsed constraint record, carried alongside its source line for
/// diagnostics.
pub struct ParsedConstraint {
    pub tree: NaryTree,
    pub lineno: u64,
}

/// One redundant-constraint removal: `kept_line` survived, `removed_line`
/// was already a full subtree of it and was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrunedConstraint {
    pub kept_line: u64,
    pub removed_line: u64,
}

/// The result of a redundancy pass.
pub struct PruneOutcome {
    /// Indices into the input slice that survive, in original order.
    pub surviving: Vec<usize>,
    pub pruned: Vec<PrunedConstraint>,
}

/// Is `subtree` a full subtree of `ntree`: every inner clade of `subtree`
/// already exists, with exactly the same leaf count, inside `ntree`
/// (`ntree_is_fullsubtree` in the original). This is a structural
/// containment check, not a tip-set-equality check — `(A,B);` is a full
/// subtree of `((A,B),C);` even though their tip sets differ.
fn is_fullsubtree(ntree: &NaryTree, subtree: &NaryTree) -> bool {
    if subtree.tip_count() > ntree.tip_count() {
        return false;
    }
    if subtree.tip_count() == 1 {
        let label = subtree.root().label.as_deref().unwrap_or("");
        if ntree.find_tip(label).is_none() {
            return false;
        }
    }
    for i in subtree.inner_indices() {
        let labels = subtree.subtree_tip_labels(i);
        let Some(lca) = ntree.lca(&labels) else {
            return false;
        };
        if ntree.node(lca).leaves != subtree.node(i).leaves {
            return false;
        }
    }
    true
}

/// Drops records whose clades are already fully contained in another
/// surviving record's tree. Mirrors `remove_redundant_constraints`'s nested
/// scan exactly: for each surviving `i`, every other surviving `j` is
/// dropped if `trees[j]` is a full subtree of `trees[i]`, so the order in
/// which records are declared determines which one is "the container" and
/// which is "redundant" — not simply first-seen-wins.
pub fn prune_redundant(constraints: &[ParsedConstraint]) -> PruneOutcome {
    let mut dropped = vec![false; constraints.len()];
    let mut pruned = Vec::new();

    for i in 0..constraints.len() {
        if dropped[i] {
            continue;
        }
        for j in 0..constraints.len() {
            if i == j || dropped[j] {
                continue;
            }
            if is_fullsubtree(&constraints[i].tree, &constraints[j].tree) {
                tracing::info!(
                    kept_line = constraints[i].lineno,
                    dropped_line = constraints[j].lineno,
                    "dropping redundant constraint"
                );
                dropped[j] = true;
                pruned.push(PrunedConstraint {
                    kept_line: constraints[i].lineno,
                    removed_line: constraints[j].lineno,
                });
            }
        }
    }

    let surviving = (0..constraints.len()).filter(|&i| !dropped[i]).collect();
    PruneOutcome { surviving, pruned }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpp_core::parse_nary_tree;

    #[test]
    fn drops_later_duplicate_by_tip_set() {
        let a = ParsedConstraint {
            tree: parse_nary_tree("(A,B);", None).unwrap(),
            lineno: 1,
        };
        let b = ParsedConstraint {
            tree: parse_nary_tree("(B,A);", None).unwrap(),
            lineno: 2,
        };
        let c = ParsedConstraint {
            tree: parse_nary_tree("(A,C);", None).unwrap(),
            lineno: 3,
        };
        let outcome = prune_redundant(&[a, b, c]);
        assert_eq!(outcome.surviving, vec![0, 2]);
        assert_eq!(
            outcome.pruned,
            vec![PrunedConstraint {
                kept_line: 1,
                removed_line: 2
            }]
        );
    }

    /// Literal scenario 6 (`spec.md` §8): `(A,B);` followed by `((A,B),C);`
    /// over species tree `(((A,B),C),D);` — the first is pruned as a full
    /// subtree of the second, not because the tip sets match (they don't).
    #[test]
    fn full_subtree_constraint_is_pruned_by_its_container() {
        let a = ParsedConstraint {
            tree: parse_nary_tree("(A,B);", None).unwrap(),
            lineno: 1,
        };
        let b = ParsedConstraint {
            tree: parse_nary_tree("((A,B),C);", None).unwrap(),
            lineno: 2,
        };
        let outcome = prune_redundant(&[a, b]);
        assert_eq!(outcome.surviving, vec![1]);
        assert_eq!(
            outcome.pruned,
            vec![PrunedConstraint {
                kept_line: 2,
                removed_line: 1
            }]
        );
    }
}
