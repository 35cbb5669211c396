pub mod config;
pub mod error;
pub mod models;
pub mod traits;
pub mod types;

pub use config::{PipelineSettings, RerankSettings, RunConfig};
pub use error::{LoupeError, Result};
pub use types::*;
