use bpp::{Engine, EngineOptions, IndividualMap, LocusInput};

fn individuals(pairs: &[(&str, &str)]) -> Vec<IndividualMap> {
    pairs
        .iter()
        .map(|(i, s)| IndividualMap {
            individual: i.to_string(),
            species: s.to_string(),
        })
        .collect()
}

#[test]
fn two_locus_chain_initializes_with_one_gene_tree_per_locus() {
    let options = EngineOptions {
        seed: 42,
        mcmc_length: 5000,
        burnin: 500,
        sample_interval: 5,
        species_tree_newick: "((A:1,B:1):2,(C:1,D:1):2);".to_string(),
        individuals: individuals(&[
            ("a1", "A"),
            ("a2", "A"),
            ("b1", "B"),
            ("c1", "C"),
            ("d1", "D"),
        ]),
        loci: vec![
            LocusInput {
                states: 4,
                rate_cats: 1,
                sequences: vec![
                    ("a1".to_string(), b"ACGTACGT".to_vec()),
                    ("a2".to_string(), b"ACGTACGA".to_vec()),
                    ("b1".to_string(), b"ACGTACGC".to_vec()),
                    ("c1".to_string(), b"ACGTACGG".to_vec()),
                    ("d1".to_string(), b"ACGTACGT".to_vec()),
                ],
            },
            LocusInput {
                states: 4,
                rate_cats: 2,
                sequences: vec![
                    ("a1".to_string(), b"TTGG".to_vec()),
                    ("a2".to_string(), b"TTGA".to_vec()),
                    ("b1".to_string(), b"TTGC".to_vec()),
                    ("c1".to_string(), b"TTGT".to_vec()),
                    ("d1".to_string(), b"TTGG".to_vec()),
                ],
            },
        ],
        constraints_text: Some("outgroup C,D;\n".to_string()),
    };

    let ctx = Engine::initialize(options).expect("engine setup should succeed");

    assert_eq!(ctx.gene_trees.len(), 2);
    assert_eq!(ctx.loci.len(), 2);
    assert_eq!(ctx.gene_trees[0].tip_count(), 5);
    assert_eq!(ctx.loci[1].rate_cats, 2);
    assert_eq!(ctx.loci[1].pattern_count, 4);

    let cd = ctx.species_tree.lca(&["C", "D"]).unwrap();
    assert_eq!(ctx.species_tree.node(cd).outgroup, bpp::OutgroupFlag::Full);
}

#[test]
fn unknown_species_in_mapping_surfaces_as_an_engine_error() {
    let options = EngineOptions {
        seed: 1,
        mcmc_length: 10,
        burnin: 0,
        sample_interval: 1,
        species_tree_newick: "(A:1,B:1);".to_string(),
        individuals: individuals(&[("a1", "A"), ("b1", "Z")]),
        loci: vec![LocusInput {
            states: 4,
            rate_cats: 1,
            sequences: vec![("a1".to_string(), b"AC".to_vec())],
        }],
        constraints_text: None,
    };

    assert!(Engine::initialize(options).is_err());
}
