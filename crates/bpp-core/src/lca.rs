//! Most-recent-common-ancestor search shared by the species tree, gene tree,
//! and the transient n-ary constraint-parse tree.
//!
//! The algorithm is the one described for the species tree: mark every tip
//! in the query set, propagate the mark rootward along parent pointers, then
//! descend from the root following the single marked child until a node has
//! zero or at least two marked children. That node is the LCA. Runtime is
//! `O(tips + inner)`: the rootward propagation touches each ancestor of each
//! queried tip once, and the descent touches one node per level.
//!
//! The C original kept the "currently marked" bit directly on the species
//! tree node (`node->mark[0]`), so a second concurrent query would stomp on
//! the first. Here the caller supplies the scratch buffer, so the routine is
//! reentrant: nothing is mutated except the buffer the caller owns.

use smallvec::SmallVec;

/// Runs the mark/propagate/descend LCA search over any indexed tree, given
/// as a handful of accessor closures rather than a trait so the species
/// tree, gene tree, and n-ary tree can each supply their own node storage.
///
/// `marks` must have one entry per node and is restored to all-`false`
/// before returning, win or lose.
pub fn lca_of_labels(
    root: usize,
    node_count: usize,
    children_of: impl Fn(usize) -> SmallVec<[usize; 2]>,
    parent_of: impl Fn(usize) -> Option<usize>,
    find_tip: impl Fn(&str) -> Option<usize>,
    labels: &[&str],
    marks: &mut [bool],
) -> Option<usize> {
    debug_assert_eq!(marks.len(), node_count);
    for m in marks.iter_mut() {
        *m = false;
    }

    for label in labels {
        let tip = find_tip(label)?;
        let mut cur = Some(tip);
        while let Some(c) = cur {
            if marks[c] {
                break;
            }
            marks[c] = true;
            cur = parent_of(c);
        }
    }

    let mut node = root;
    loop {
        let children = children_of(node);
        let marked: SmallVec<[usize; 2]> = children.iter().copied().filter(|&c| marks[c]).collect();
        if marked.len() == 1 {
            node = marked[0];
        } else {
            break;
        }
    }

    for m in marks.iter_mut() {
        *m = false;
    }
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    // A tiny fixed binary tree: ((A,B),(C,D)) with nodes
    // 0=A 1=B 2=C 3=D 4=(A,B) 5=(C,D) 6=root
    fn children(i: usize) -> SmallVec<[usize; 2]> {
        match i {
            4 => SmallVec::from_slice(&[0, 1]),
            5 => SmallVec::from_slice(&[2, 3]),
            6 => SmallVec::from_slice(&[4, 5]),
            _ => SmallVec::new(),
        }
    }
    fn parent(i: usize) -> Option<usize> {
        match i {
            0 | 1 => Some(4),
            2 | 3 => Some(5),
            4 | 5 => Some(6),
            _ => None,
        }
    }
    fn find_tip(label: &str) -> Option<usize> {
        match label {
            "A" => Some(0),
            "B" => Some(1),
            "C" => Some(2),
            "D" => Some(3),
            _ => None,
        }
    }

    #[test]
    fn lca_of_single_tip_is_itself() {
        let mut marks = vec![false; 7];
        let lca = lca_of_labels(6, 7, children, parent, find_tip, &["A"], &mut marks);
        assert_eq!(lca, Some(0));
        assert!(marks.iter().all(|m| !*m));
    }

    #[test]
    fn lca_of_all_tips_is_root() {
        let mut marks = vec![false; 7];
        let lca = lca_of_labels(
            6,
            7,
            children,
            parent,
            find_tip,
            &["A", "B", "C", "D"],
            &mut marks,
        );
        assert_eq!(lca, Some(6));
    }

    #[test]
    fn lca_of_sibling_pair() {
        let mut marks = vec![false; 7];
        let lca = lca_of_labels(6, 7, children, parent, find_tip, &["A", "B"], &mut marks);
        assert_eq!(lca, Some(4));
    }

    #[test]
    fn unknown_label_returns_none() {
        let mut marks = vec![false; 7];
        let lca = lca_of_labels(6, 7, children, parent, find_tip, &["A", "Z"], &mut marks);
        assert_eq!(lca, None);
    }
}
