use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("embedding store not found at {}", .0.display())]
    NotFound(PathBuf),
    #[error("reading embedding store {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("decoding embedding store {}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: postcard::Error,
    },
    #[error("embedding store {} has unsupported version {version}", path.display())]
    UnsupportedVersion { path: PathBuf, version: u32 },
    #[error("record {index} ({identity}) has {found} dimensions, expected {expected}")]
    Dimension {
        index: usize,
        identity: String,
        found: usize,
        expected: usize,
    },
    #[error("record {index} ({identity}) has a non-finite embedding component")]
    NonFinite { index: usize, identity: String },
    #[error("writing embedding store {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encoding embedding store")]
    Encode(#[source] postcard::Error),
}

#[derive(Debug, Error, PartialEq)]
pub enum RankError {
    #[error("candidate {index} has {found} dimensions, query has {expected}")]
    DimensionMismatch {
        index: usize,
        found: usize,
        expected: usize,
    },
}

/// Failure of a single web query. None of these take the server down.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    MalformedUpload(String),
    #[error("No face detected in the uploaded image.")]
    NoFaceDetected,
    #[error("An error occurred: {0}")]
    Model(String),
    #[error("An error occurred: {0}")]
    Rank(#[from] RankError),
    #[error("An error occurred: {0}")]
    Io(#[from] std::io::Error),
}
