//! A Bayesian multispecies-coalescent phylogenetics engine.
//!
//! This crate wires together the workspace's layers into the one-shot setup
//! pipeline an outer Metropolis-Hastings driver (out of scope here) would
//! run once before its first iteration: parse the species tree, resolve its
//! constraint and outgroup records, build a substitution-model partition per
//! locus, and draw a coalescent-consistent starting genealogy for each one.

mod config;
mod context;

pub use config::{EngineOptions, LocusInput};
pub use context::{Engine, EngineContext};

pub use bpp_constraints::*;
pub use bpp_core::*;
pub use bpp_error::*;
pub use bpp_init::*;
pub use bpp_kernel::*;

/// Installs a `tracing-subscriber` fmt layer once per process, mirroring the
/// teacher's `init_logging`. Feature-gated since a library embedding this
/// engine may already own its own subscriber.
#[cfg(feature = "tracing-init")]
pub fn init_logging() {
    use std::sync::Once;
    static INIT_LOGGING: Once = Once::new();

    INIT_LOGGING.call_once(|| {
        use tracing_subscriber::fmt::format::FmtSpan;
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                    .with_target(false)
                    .with_level(true)
                    .compact(),
            )
            .init();
    });
}
