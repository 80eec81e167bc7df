use crate::config::{EngineOptions, LocusInput};
use bpp_constraints::{parse_and_set_constraints, PrunedConstraint};
use bpp_core::domain::random_provider;
use bpp_core::{parse_species_tree, GeneTree, SpeciesTree};
use bpp_error::{BppError, BppResult};
use bpp_init::initial_gene_tree;
use bpp_kernel::LocusPartition;

/// Everything the first iteration of an outer MCMC driver needs: the
/// (possibly constrained) species tree, one coalescent-consistent starting
/// gene tree and substitution-model partition per locus, and a record of
/// which constraint records were pruned as redundant during setup.
pub struct EngineContext {
    pub species_tree: SpeciesTree,
    pub gene_trees: Vec<GeneTree>,
    pub loci: Vec<LocusPartition>,
    pub pruned_constraints: Vec<PrunedConstraint>,
}

/// The one-shot setup pipeline. Running the chain itself — proposing new
/// gene trees, accepting or rejecting them against the likelihood this
/// crate's kernel computes — is the outer driver's job and out of scope
/// here.
pub struct Engine;

impl Engine {
    #[tracing::instrument(skip(options))]
    pub fn initialize(options: EngineOptions) -> BppResult<EngineContext> {
        random_provider::set_seed(options.seed);

        let mut species_tree = parse_species_tree(&options.species_tree_newick, None)?;
        tracing::info!(
            tips = species_tree.tip_count(),
            "parsed species tree"
        );

        let pruned_constraints = match &options.constraints_text {
            Some(text) => {
                let pruned = parse_and_set_constraints(&mut species_tree, text, None)?;
                tracing::info!(pruned = pruned.len(), "resolved constraint records");
                pruned
            }
            None => Vec::new(),
        };

        let mut gene_trees = Vec::with_capacity(options.loci.len());
        let mut loci = Vec::with_capacity(options.loci.len());
        for (locus_index, locus) in options.loci.iter().enumerate() {
            let gene_tree = initial_gene_tree(&species_tree, &options.individuals)?;
            let partition = build_locus_partition(&gene_tree, locus, locus_index)?;
            gene_trees.push(gene_tree);
            loci.push(partition);
        }

        Ok(EngineContext {
            species_tree,
            gene_trees,
            loci,
            pruned_constraints,
        })
    }
}

#[tracing::instrument(skip(gene_tree, locus))]
fn build_locus_partition(
    gene_tree: &GeneTree,
    locus: &LocusInput,
    locus_index: usize,
) -> BppResult<LocusPartition> {
    let pattern_count = locus
        .sequences
        .first()
        .map(|(_, seq)| seq.len())
        .ok_or_else(|| BppError::resource(format!("locus {locus_index} has no sequences")))?;

    let mut partition = LocusPartition::new(
        locus.states,
        gene_tree.tip_count(),
        gene_tree.inner_count(),
        pattern_count,
        locus.rate_cats,
    );

    for (label, sequence) in &locus.sequences {
        let tip_index = gene_tree.find_tip(label).ok_or_else(|| {
            BppError::semantic(
                bpp_error::Provenance::none(),
                format!("locus {locus_index} has a sequence for '{label}', which is not a gene tree tip"),
            )
        })?;
        partition.set_tip_sequence(tip_index, sequence)?;
    }

    tracing::debug!(locus_index, pattern_count, "built locus partition");
    Ok(partition)
}
