use std::fmt;
use std::path::Path;

use anyhow::Result;
use facematch_vision::Embedder;
use log::warn;
use walkdir::WalkDir;

use crate::matcher::{self, QueryResult};
use crate::producer::{is_image_file, open_image};
use crate::storage::EmbeddingStore;

/// Result of matching one unknown image.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchLine {
    Found { file: String, best: QueryResult },
    EmptyGallery { file: String },
    Failed { file: String, reason: String },
}

impl fmt::Display for MatchLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchLine::Found { file, best } => writeln!(
                f,
                "MATCH FOUND:\n   Unknown: {}\n   Match: {}\n   Distance: {:.4}",
                file,
                best.identity,
                best.distance()
            ),
            MatchLine::EmptyGallery { file } => {
                writeln!(f, "NO MATCH: {} (gallery is empty)", file)
            }
            MatchLine::Failed { file, reason } => {
                writeln!(f, "Error processing {}: {}", file, reason)
            }
        }
    }
}

fn match_file<E: Embedder + ?Sized>(
    embedder: &mut E,
    store: &EmbeddingStore,
    path: &Path,
    file: String,
) -> MatchLine {
    let img = match open_image(path) {
        Ok(img) => img,
        Err(e) => {
            return MatchLine::Failed {
                file,
                reason: format!("decoding image: {}", e),
            }
        }
    };
    let embedding = match embedder.represent(&img, false) {
        Ok(reps) => match reps.into_iter().next() {
            Some(rep) => rep.embedding,
            None => {
                return MatchLine::Failed {
                    file,
                    reason: "model returned no representation".to_string(),
                }
            }
        },
        Err(e) => {
            return MatchLine::Failed {
                file,
                reason: e.to_string(),
            }
        }
    };

    match matcher::best_match(&embedding, store.records()) {
        Ok(Some(best)) => MatchLine::Found { file, best },
        Ok(None) => MatchLine::EmptyGallery { file },
        Err(e) => MatchLine::Failed {
            file,
            reason: e.to_string(),
        },
    }
}

/// Best gallery match for every image directly inside `dir`, in file-name order.
pub fn match_directory<E: Embedder + ?Sized>(
    embedder: &mut E,
    store: &EmbeddingStore,
    dir: &Path,
) -> Result<Vec<MatchLine>> {
    if !dir.is_dir() {
        anyhow::bail!("unknown-image directory {} does not exist", dir.display());
    }

    let mut lines = Vec::new();
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || !is_image_file(path) {
            continue;
        }
        let file = entry.file_name().to_string_lossy().into_owned();
        lines.push(match_file(embedder, store, path, file));
    }
    Ok(lines)
}
