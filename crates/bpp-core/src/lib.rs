//! Tree data models, hash index, Newick I/O, and the shared LCA routine for
//! the bpp phylogenetics engine: the species tree, gene trees, and the
//! transient n-ary tree the constraint parser builds along the way.

pub mod domain;
pub mod hash;
pub mod lca;
pub mod newick;
pub mod tree;

pub use domain::random_provider;
pub use hash::{ByteEq, Djb2a, Fnv1a, HashIndex, KeyEq, KeyHasher, LabelIndex, PointerEq};
pub use lca::lca_of_labels;
pub use newick::RawNode;
pub use tree::{
    gene::{parse_gene_tree, GeneNode, GeneTree, GeneTreeBuilder},
    nary::{parse_nary_tree, NaryNode, NaryTree},
    species::{parse_species_tree, OutgroupFlag, SpeciesNode, SpeciesTree},
};

pub mod prelude {
    pub use super::domain::random_provider;
    pub use super::hash::{ByteEq, Fnv1a, HashIndex};
    pub use super::lca::lca_of_labels;
    pub use super::newick::{self, RawNode};
    pub use super::tree::{
        gene::{parse_gene_tree, GeneNode, GeneTree, GeneTreeBuilder},
        nary::{parse_nary_tree, NaryNode, NaryTree},
        species::{parse_species_tree, OutgroupFlag, SpeciesNode, SpeciesTree},
    };
}
