//! Coalescent-consistent gene tree initialization: builds a starting
//! genealogy for one locus that respects the species tree's divergence
//! times, so the MCMC driver's first likelihood evaluation is not
//! immediately rejected for proposing coalescences older than their
//! population allows.
//!
//! Per-population lineage pools are processed in post order, the same
//! traversal order the kernel uses for CLV updates: a population's
//! incoming lineages are its own tip individuals (if it is a species-tree
//! tip) plus whatever failed to coalesce in its two child populations: the
//! standard bottom-up multispecies-coalescent construction, grounded on the
//! population bookkeeping in the original `locus.c`/`init_locus` path (the
//! present source does not carry a from-scratch coalescent simulator to
//! transcribe directly, so the traversal and pooling scheme here is the
//! standard one for this algorithm, applied to this crate's tree types).

use bpp_core::domain::random_provider;
use bpp_core::{GeneTree, GeneTreeBuilder, SpeciesTree};
use bpp_error::{BppError, BppResult, Provenance};
use std::collections::HashMap;

/// Maps one sampled individual to the species tip it was collected from.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndividualMap {
    pub individual: String,
    pub species: String,
}

/// A single active lineage during the bottom-up coalescent build: its gene
/// tree node index and age.
type Lineage = (usize, f64);

/// Builds an initial gene tree for one locus whose node ages are consistent
/// with `species_tree`'s divergence times. Every species tip must have at
/// least one individual in `mapping`, and every individual's species must
/// name an actual species tree tip.
pub fn initial_gene_tree(
    species_tree: &SpeciesTree,
    mapping: &[IndividualMap],
) -> BppResult<GeneTree> {
    let mut by_species: HashMap<&str, Vec<&str>> = HashMap::new();
    for m in mapping {
        by_species
            .entry(m.species.as_str())
            .or_default()
            .push(m.individual.as_str());
    }

    let mut order = Vec::new();
    species_tree.traverse_post_order(species_tree.root_index(), |_| true, &mut order);

    let mut builder = GeneTreeBuilder::new();
    let mut pools: HashMap<usize, Vec<Lineage>> = HashMap::new();

    for node_idx in order {
        let node = species_tree.node(node_idx);
        let mut lineages: Vec<Lineage> = if node.is_tip() {
            let individuals = by_species.get(node.label.as_str()).ok_or_else(|| {
                BppError::semantic(
                    Provenance::none(),
                    format!("no individuals mapped to species '{}'", node.label),
                )
            })?;
            let mut lineages = Vec::with_capacity(individuals.len());
            for indiv in individuals {
                let idx = builder.add_tip((*indiv).to_string())?;
                lineages.push((idx, 0.0));
            }
            lineages
        } else {
            let left = node.left.expect("inner species node has a left child");
            let right = node.right.expect("inner species node has a right child");
            let mut lineages = pools.remove(&left).unwrap_or_default();
            lineages.extend(pools.remove(&right).unwrap_or_default());
            lineages
        };

        let lower = node.tau;
        let upper = node
            .parent
            .filter(|_| node_idx != species_tree.root_index())
            .map(|p| species_tree.node(p).tau);
        coalesce_in_population(&mut builder, &mut lineages, lower, upper);
        pools.insert(node_idx, lineages);
    }

    let root_lineages = pools.remove(&species_tree.root_index()).unwrap_or_default();
    if root_lineages.len() != 1 {
        return Err(BppError::semantic(
            Provenance::none(),
            "coalescent initialization left more than one lineage above the root",
        ));
    }

    Ok(builder.finish())
}

/// Coalesces lineages pairwise within one population's time span
/// `[lower, upper)`. At the root (`upper == None`), coalescence continues
/// until a single lineage remains, since there is no ancestral population
/// left to carry leftovers into. Coalescence times are evenly spaced
/// across the available span rather than drawn from the coalescent's
/// exponential waiting-time distribution: a starting point for the chain
/// to refine, not a draw from its stationary distribution.
fn coalesce_in_population(
    builder: &mut GeneTreeBuilder,
    lineages: &mut Vec<Lineage>,
    lower: f64,
    upper: Option<f64>,
) {
    let must_fully_coalesce = upper.is_none();
    let span = upper.map(|u| (u - lower).max(1e-9)).unwrap_or(1.0);
    let mut current_time = lower;

    loop {
        if lineages.len() < 2 {
            break;
        }
        let step = span / (lineages.len() as f64 + 1.0);
        if !must_fully_coalesce {
            let budget = upper.unwrap() - current_time;
            if budget <= step {
                break;
            }
        }
        current_time += step;

        let picked = random_provider::sample_indices(0..lineages.len(), 2);
        let (hi, lo) = if picked[0] > picked[1] {
            (picked[0], picked[1])
        } else {
            (picked[1], picked[0])
        };
        let (a_idx, _) = lineages[hi];
        let (b_idx, _) = lineages[lo];
        lineages.remove(hi);
        lineages.remove(lo);
        let parent = builder.merge(a_idx, b_idx, current_time);
        lineages.push((parent, current_time));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpp_core::parse_species_tree;

    fn mapping(pairs: &[(&str, &str)]) -> Vec<IndividualMap> {
        pairs
            .iter()
            .map(|(i, s)| IndividualMap {
                individual: i.to_string(),
                species: s.to_string(),
            })
            .collect()
    }

    #[test]
    fn single_individual_per_species_needs_no_coalescence_below_root() {
        let mut tree = parse_species_tree("((A,B),(C,D));", None).unwrap();
        for node in tree.nodes_mut() {
            node.tau = if node.is_tip() { 0.0 } else { 1.0 };
        }
        tree.node_mut(tree.root_index()).tau = 2.0;
        let map = mapping(&[("a1", "A"), ("b1", "B"), ("c1", "C"), ("d1", "D")]);
        let gene = initial_gene_tree(&tree, &map).unwrap();
        assert_eq!(gene.tip_count(), 4);
        assert_eq!(gene.node_count(), 7);
    }

    #[test]
    fn multiple_individuals_per_tip_coalesce_within_population() {
        let mut tree = parse_species_tree("(A,B);", None).unwrap();
        for node in tree.nodes_mut() {
            node.tau = 0.0;
        }
        tree.node_mut(tree.root_index()).tau = 5.0;
        let map = mapping(&[("a1", "A"), ("a2", "A"), ("a3", "A"), ("b1", "B")]);
        let gene = initial_gene_tree(&tree, &map).unwrap();
        assert_eq!(gene.tip_count(), 4);
        // All ages must respect non-negativity and monotonicity toward the root.
        let root = gene.root();
        assert!(root.time > 0.0);
    }

    #[test]
    fn unmapped_species_tip_is_an_error() {
        let mut tree = parse_species_tree("(A,B);", None).unwrap();
        for node in tree.nodes_mut() {
            node.tau = 0.0;
        }
        tree.node_mut(tree.root_index()).tau = 1.0;
        let map = mapping(&[("a1", "A")]);
        assert!(initial_gene_tree(&tree, &map).is_err());
    }
}
