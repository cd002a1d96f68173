#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use facematch::{EmbedError, Embedder, Representation};
use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};

/// Images this wide make the fake model fail.
pub const BROKEN_WIDTH: u32 = 13;
/// Images this wide get one extra embedding component.
pub const WIDE_WIDTH: u32 = 17;
/// Images this wide get a NaN in their embedding.
pub const NAN_WIDTH: u32 = 11;

/// Deterministic stand-in for the ONNX pipeline: the embedding is a 4x4
/// thumbnail of the image. An all-black image has no face.
#[derive(Clone, Default)]
pub struct FakeEmbedder {
    pub calls: Arc<AtomicUsize>,
}

impl FakeEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for FakeEmbedder {
    fn represent(
        &mut self,
        img: &DynamicImage,
        enforce_detection: bool,
    ) -> Result<Vec<Representation>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (w, h) = img.dimensions();
        if w == BROKEN_WIDTH {
            return Err(EmbedError::Model(anyhow::anyhow!("simulated model failure")));
        }
        let rgb = img.to_rgb8();
        if enforce_detection && rgb.pixels().all(|p| p.0 == [0, 0, 0]) {
            return Err(EmbedError::NoFaceDetected);
        }
        let thumb = img.resize_exact(4, 4, FilterType::Nearest).to_rgb8();
        let mut embedding: Vec<f32> = thumb
            .pixels()
            .flat_map(|p| p.0)
            .map(|v| v as f32 / 255.0 - 0.5)
            .collect();
        match w {
            WIDE_WIDTH => embedding.push(0.5),
            NAN_WIDTH => embedding[0] = f32::NAN,
            _ => {}
        }
        Ok(vec![Representation {
            embedding,
            bbox: [0.0, 0.0, w as f32, h as f32],
            score: Some(0.99),
        }])
    }
}

pub fn pattern(seed: u8) -> RgbImage {
    RgbImage::from_fn(16, 16, |x, y| {
        let (x, y) = (x as u8, y as u8);
        Rgb([
            x.wrapping_mul(16) ^ seed,
            y.wrapping_mul(16).wrapping_add(seed),
            seed.wrapping_mul(x.wrapping_add(y)).wrapping_add(7),
        ])
    })
}

pub fn png_bytes(img: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img.clone()).write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

pub fn write_png(path: &Path, img: &RgbImage) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    img.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Scratch layout mirroring a deployment: `dataset/Known`, `static`,
/// `embeddings`.
pub struct Workspace {
    pub dir: tempfile::TempDir,
    pub gallery: PathBuf,
    pub public: PathBuf,
    pub store: PathBuf,
}

impl Workspace {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let gallery = dir.path().join("dataset/Known");
        let public = dir.path().join("static");
        let store = dir.path().join("embeddings/known_embeddings.bin");
        std::fs::create_dir_all(&gallery)?;
        Ok(Self {
            dir,
            gallery,
            public,
            store,
        })
    }

    pub fn add_known(&self, identity: &str, file: &str, img: &RgbImage) -> Result<PathBuf> {
        let path = self.gallery.join(identity).join(file);
        write_png(&path, img)?;
        Ok(path)
    }

    pub fn config(&self) -> facematch::config::Config {
        facematch::config::Config {
            gallery_dir: self.gallery.clone(),
            public_dir: self.public.clone(),
            store_path: self.store.clone(),
            ..Default::default()
        }
    }
}
