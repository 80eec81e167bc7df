//! The substitution-model kernel: rate matrix construction, eigendecomposition,
//! transition-probability matrices, and the per-locus likelihood buffers
//! that the MCMC driver's tree-pruning algorithm consumes.

pub mod eigen;
pub mod locus;
pub mod pmatrix;
pub mod tiptip;

pub use eigen::{compute_eigen, EigenDecomposition};
pub use locus::{build_charmap, code_to_partials, CharCode, LocusPartition};
pub use pmatrix::{general_pmatrix, jc69_pmatrix};
pub use tiptip::{build_cherry_table, tip_tip_mode, TipCodeTable, TipTipMode};
