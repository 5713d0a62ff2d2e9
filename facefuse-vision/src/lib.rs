pub mod face;
pub mod model;
pub mod pipeline;
pub mod yunet;

// Re-export commonly used types
pub use face::Detection;
pub use model::{ModelName, EMBEDDING_DIM};
pub use pipeline::{EmbeddingProvider, Pipeline};
