pub mod face;
pub mod model;
pub mod pipeline;
pub mod represent;
pub mod yunet;

// Re-export commonly used types
pub use face::Detection;
pub use pipeline::Pipeline;
pub use represent::{EmbedError, Embedder, Representation};
