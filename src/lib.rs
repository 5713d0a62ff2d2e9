pub mod api;
pub mod batch;
pub mod compare;
pub mod config;
pub mod context;
pub mod error;
pub mod fusion;
pub mod index;
pub mod normalize;
pub mod predict;
pub mod registry;
pub mod search;
pub mod types;

pub use context::ServiceContext;
pub use error::{Error, Result};

// Re-export vision types for convenience
pub use facefuse_vision::{face, Detection, EmbeddingProvider, ModelName, Pipeline};
