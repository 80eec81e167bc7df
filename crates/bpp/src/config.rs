//! The knobs an outer MCMC driver loop would set before handing control to
//! [`crate::Engine::initialize`]. Parsing these values out of a control
//! file or command line is out of scope; this struct only describes their
//! shape once parsed.

/// One locus's aligned sequence data: a substitution model's state count and
/// one sequence per sampled individual, keyed by the same individual label
/// used in the species/individual mapping.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocusInput {
    pub states: usize,
    pub rate_cats: usize,
    /// `(individual label, aligned sequence bytes)`, one entry per sampled
    /// individual at this locus. All sequences must share the same length;
    /// that length becomes the locus's pattern count.
    pub sequences: Vec<(String, Vec<u8>)>,
}

/// The full set of inputs an MCMC chain needs before its first iteration:
/// the fixed species tree topology, the individual-to-species mapping, an
/// optional constraint file, and the per-locus alignments, plus the chain
/// parameters themselves.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineOptions {
    /// Seeds `bpp_core::domain::random_provider` exactly once, before the
    /// first gene tree is drawn.
    pub seed: u64,
    pub mcmc_length: u64,
    pub burnin: u64,
    pub sample_interval: u64,
    /// The fixed species tree in Newick, with `#tau`/`#theta` style
    /// annotations left to the caller to have stripped or embedded
    /// elsewhere; this crate consumes plain Newick topology and branch
    /// lengths only.
    pub species_tree_newick: String,
    pub individuals: Vec<bpp_init::IndividualMap>,
    pub loci: Vec<LocusInput>,
    /// Raw text of a `define`/`constraint`/`outgroup` control file. `None`
    /// means the species tree is run unconstrained.
    pub constraints_text: Option<String>,
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;
    use bpp_init::IndividualMap;

    #[test]
    fn engine_options_round_trip_through_json() {
        let options = EngineOptions {
            seed: 3,
            mcmc_length: 100,
            burnin: 10,
            sample_interval: 2,
            species_tree_newick: "(A,B);".to_string(),
            individuals: vec![IndividualMap {
                individual: "a1".to_string(),
                species: "A".to_string(),
            }],
            loci: vec![LocusInput {
                states: 4,
                rate_cats: 1,
                sequences: vec![("a1".to_string(), b"AC".to_vec())],
            }],
            constraints_text: None,
        };

        let json = serde_json::to_string(&options).unwrap();
        let restored: EngineOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.seed, 3);
        assert_eq!(restored.loci[0].sequences[0].0, "a1");
    }
}
