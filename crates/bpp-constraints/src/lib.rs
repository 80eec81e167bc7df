//! Constraint-file parsing and species-tree constraint/outgroup resolution.
//!
//! A constraint file is a sequence of `define`/`constraint`/`outgroup`
//! records (see [`records`]). `define` introduces an alias usable as a tip
//! placeholder in later expressions ([`aliases`]); `constraint` pins a
//! subset of the species tree to a particular topology; `outgroup` marks a
//! monophyletic clade as outside the ingroup. [`engine::parse_and_set_constraints`]
//! is the single entry point the facade crate calls.

pub mod aliases;
pub mod engine;
pub mod records;
pub mod redundancy;

pub use aliases::AliasTable;
pub use engine::parse_and_set_constraints;
pub use records::{parse_records, Record};
pub use redundancy::{prune_redundant, ParsedConstraint, PruneOutcome, PrunedConstraint};
