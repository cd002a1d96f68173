//! Offline gallery embedding.
//!
//! Layout: `<root>/<identity>/<image>`. Every image is embedded with
//! detection enforcement off; failures skip the image and never abort the run.

use std::path::{Component, Path};

use anyhow::{Context, Result};
use facematch_vision::Embedder;
use image::{DynamicImage, ImageReader};
use log::{info, warn};
use walkdir::WalkDir;

use crate::storage::{self, EmbeddingRecord};

pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Decode an image, trusting its content over its extension.
pub fn open_image(path: &Path) -> image::ImageResult<DynamicImage> {
    ImageReader::open(path)?.with_guessed_format()?.decode()
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

/// `/`-joined path of `path` relative to `root`.
pub fn relative_ref(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Option<_>>()?;
    (!parts.is_empty()).then(|| parts.join("/"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    pub identity: String,
    pub source_ref: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Embedded(EmbeddingRecord),
    Skipped(Skipped),
}

#[derive(Debug, Default)]
pub struct ProduceReport {
    pub records: Vec<EmbeddingRecord>,
    pub skipped: Vec<Skipped>,
}

impl ProduceReport {
    fn dimension(&self) -> Option<usize> {
        self.records.first().map(|r| r.embedding.len())
    }

    fn push(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Embedded(record) => self.records.push(record),
            ItemOutcome::Skipped(skip) => {
                warn!("Failed: {} → {}", skip.source_ref, skip.reason);
                self.skipped.push(skip);
            }
        }
    }
}

/// Embed a single gallery image.
pub fn embed_one<E: Embedder + ?Sized>(
    embedder: &mut E,
    path: &Path,
    identity: &str,
    source_ref: &str,
    expected_dim: Option<usize>,
) -> ItemOutcome {
    let skip = |reason: String| {
        ItemOutcome::Skipped(Skipped {
            identity: identity.to_string(),
            source_ref: source_ref.to_string(),
            reason,
        })
    };

    let img = match open_image(path) {
        Ok(img) => img,
        Err(e) => return skip(format!("decoding image: {}", e)),
    };
    let reps = match embedder.represent(&img, false) {
        Ok(reps) => reps,
        Err(e) => return skip(e.to_string()),
    };
    let Some(first) = reps.into_iter().next() else {
        return skip("model returned no representation".to_string());
    };
    if first.embedding.is_empty() {
        return skip("model returned an empty embedding".to_string());
    }
    if first.embedding.iter().any(|x| !x.is_finite()) {
        return skip("model returned a non-finite embedding".to_string());
    }
    if let Some(dim) = expected_dim {
        if first.embedding.len() != dim {
            return skip(format!(
                "embedding has {} dimensions, gallery has {}",
                first.embedding.len(),
                dim
            ));
        }
    }

    ItemOutcome::Embedded(EmbeddingRecord {
        identity: identity.to_string(),
        embedding: first.embedding,
        source_ref: source_ref.to_string(),
    })
}

/// Embed every image under `root`, in file-name order.
pub fn produce<E: Embedder + ?Sized>(embedder: &mut E, root: &Path) -> Result<ProduceReport> {
    if !root.is_dir() {
        anyhow::bail!("gallery directory {} does not exist", root.display());
    }

    let mut report = ProduceReport::default();
    let walker = WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
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
        let Some(source_ref) = relative_ref(root, path) else {
            continue;
        };
        let identity = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        info!("Processing: {}", source_ref);
        let dim = report.dimension();
        report.push(embed_one(embedder, path, &identity, &source_ref, dim));
    }

    Ok(report)
}

/// Produce the gallery under `root` and persist it atomically to `output`.
pub fn run<E: Embedder + ?Sized>(
    embedder: &mut E,
    root: &Path,
    output: &Path,
) -> Result<ProduceReport> {
    info!("Starting embedding generation in {}", root.display());
    let report = produce(embedder, root)?;

    storage::save(output, &report.records)
        .with_context(|| format!("saving embeddings to {}", output.display()))?;

    info!(
        "Saved {} embeddings to {} ({} skipped)",
        report.records.len(),
        output.display(),
        report.skipped.len()
    );
    Ok(report)
}
