//! Tree data models: the rooted binary species tree, the rooted binary gene
//! tree, and the transient n-ary tree used while parsing constraint records.
//! All three are flat, arena-style: nodes live in one `Vec` addressed by
//! plain `usize` index rather than `Box`-linked, so a node can hold both a
//! `parent` and `left`/`right` index without `Rc`/`RefCell`.

pub mod gene;
pub mod nary;
pub mod species;

pub use gene::{parse_gene_tree, GeneNode, GeneTree, GeneTreeBuilder};
pub use nary::{parse_nary_tree, NaryNode, NaryTree};
pub use species::{parse_species_tree, OutgroupFlag, SpeciesNode, SpeciesTree};
