use std::io::Write;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::config::MissingStore;
use crate::error::StoreError;

const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub identity: String,
    pub embedding: Vec<f32>,
    /// Gallery-relative image path, `/`-separated.
    pub source_ref: String,
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    records: Vec<EmbeddingRecord>,
}

/// The gallery, loaded once and never mutated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingStore {
    records: Vec<EmbeddingRecord>,
}

impl EmbeddingStore {
    /// Builds a store, checking every record has the dimensionality of the
    /// first one and only finite components.
    pub fn new(records: Vec<EmbeddingRecord>) -> Result<Self, StoreError> {
        if let Some((index, r)) = records
            .iter()
            .enumerate()
            .find(|(_, r)| r.embedding.iter().any(|x| !x.is_finite()))
        {
            return Err(StoreError::NonFinite {
                index,
                identity: r.identity.clone(),
            });
        }
        if let Some(first) = records.first() {
            let expected = first.embedding.len();
            if let Some((index, r)) = records
                .iter()
                .enumerate()
                .find(|(_, r)| r.embedding.len() != expected)
            {
                return Err(StoreError::Dimension {
                    index,
                    identity: r.identity.clone(),
                    found: r.embedding.len(),
                    expected,
                });
            }
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[EmbeddingRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.records.first().map(|r| r.embedding.len())
    }

    pub fn into_records(self) -> Vec<EmbeddingRecord> {
        self.records
    }
}

pub fn load(path: &Path) -> Result<EmbeddingStore, StoreError> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound(path.to_path_buf()))
        }
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let file: StoreFile = postcard::from_bytes(&data).map_err(|source| StoreError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    if file.version != STORE_VERSION {
        return Err(StoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            version: file.version,
        });
    }
    EmbeddingStore::new(file.records)
}

/// Load the store, applying `policy` when the file does not exist.
pub fn open(path: &Path, policy: MissingStore) -> Result<EmbeddingStore, StoreError> {
    match load(path) {
        Ok(store) => {
            info!(
                "Loaded {} known face embeddings from {}",
                store.len(),
                path.display()
            );
            Ok(store)
        }
        Err(StoreError::NotFound(p)) if policy == MissingStore::Empty => {
            warn!("Embedding store not found at {}", p.display());
            warn!("Serving with an empty gallery: every query will return zero matches.");
            warn!("Run 'facematch embed' first to create it.");
            Ok(EmbeddingStore::default())
        }
        Err(e) => Err(e),
    }
}

/// Write the whole store atomically: temp file in the target directory,
/// then rename over `path`.
pub fn save(path: &Path, records: &[EmbeddingRecord]) -> Result<(), StoreError> {
    let write_err = |source: std::io::Error| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    let file = StoreFile {
        version: STORE_VERSION,
        records: records.to_vec(),
    };
    let data = postcard::to_allocvec(&file).map_err(StoreError::Encode)?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(&data).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
