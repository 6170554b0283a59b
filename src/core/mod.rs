pub mod cascade;
pub mod engine;
pub mod normalizer;
pub mod pipeline;
pub mod validator;
pub mod variation;

pub use crate::domain::model::{Address, Record, ResolutionResult};
pub use crate::domain::ports::{CepProvider, Pipeline, Storage};
pub use crate::utils::error::Result;
