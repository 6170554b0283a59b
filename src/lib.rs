pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::storage::LocalStorage;
pub use config::CepConfig;
pub use crate::core::{
    cascade::CepResolver,
    engine::{EnrichmentEngine, ResolutionPool},
    pipeline::EnrichmentPipeline,
};
pub use utils::error::{CepError, Result};
