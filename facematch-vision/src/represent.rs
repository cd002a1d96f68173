use image::DynamicImage;
use thiserror::Error;

/// One face found in an image, with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Representation {
    pub embedding: Vec<f32>,
    /// Face box in source image pixels (x, y, w, h). Covers the whole image
    /// when the face was not detected and enforcement was off.
    pub bbox: [f32; 4],
    /// Detector confidence, `None` for whole-image fallbacks.
    pub score: Option<f32>,
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error(transparent)]
    Model(#[from] anyhow::Error),
}

/// An embedding model: detection + encoding behind one call.
///
/// Results are ordered by descending detection score. With
/// `enforce_detection` set, an image without a detected face fails with
/// [`EmbedError::NoFaceDetected`] instead of being encoded whole.
pub trait Embedder {
    fn represent(
        &mut self,
        img: &DynamicImage,
        enforce_detection: bool,
    ) -> Result<Vec<Representation>, EmbedError>;
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn represent(
        &mut self,
        img: &DynamicImage,
        enforce_detection: bool,
    ) -> Result<Vec<Representation>, EmbedError> {
        (**self).represent(img, enforce_detection)
    }
}
