//! SDGLens Core: error type, configuration and the domain types shared by
//! every pipeline stage.

pub mod config;
pub mod error;
pub mod types;

pub use config::{DataPaths, PipelineConfig};
pub use error::{Error, Result};
pub use types::*;
