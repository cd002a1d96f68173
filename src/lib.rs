pub mod batch;
pub mod config;
pub mod error;
pub mod matcher;
pub mod producer;
pub mod storage;
pub mod web;

// Re-export the embedding boundary for convenience
pub use facematch_vision::{EmbedError, Embedder, Pipeline, Representation};
