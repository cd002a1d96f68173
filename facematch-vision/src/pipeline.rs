use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::Session;

use crate::face::{self, FACE_SIZE};
use crate::represent::{EmbedError, Embedder, Representation};

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Pipeline {
    pub fn new(
        detector: &Path,
        encoder: &Path,
        score_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Self> {
        Ok(Self {
            detector: crate::model::detector_session(detector)?,
            encoder: crate::model::recog_session(encoder)?,
            score_threshold,
            nms_threshold,
        })
    }

    fn represent_detected(&mut self, img: &DynamicImage) -> Result<Vec<Representation>> {
        let detections = face::detect_faces(
            &mut self.detector,
            img,
            self.score_threshold,
            self.nms_threshold,
        )
        .context("detecting faces")?;

        detections
            .iter()
            .map(|d| {
                let crop = face::align_face(img, d, FACE_SIZE);
                let embedding =
                    face::encode_face(&mut self.encoder, &crop).context("encoding face")?;
                Ok(Representation {
                    embedding,
                    bbox: d.bbox,
                    score: Some(d.score),
                })
            })
            .collect()
    }
}

impl Embedder for Pipeline {
    fn represent(
        &mut self,
        img: &DynamicImage,
        enforce_detection: bool,
    ) -> Result<Vec<Representation>, EmbedError> {
        let found = self.represent_detected(img)?;
        if !found.is_empty() {
            return Ok(found);
        }
        if enforce_detection {
            return Err(EmbedError::NoFaceDetected);
        }

        log::debug!("no face detected, encoding whole image");
        let (w, h) = img.dimensions();
        let embedding = face::encode_face(&mut self.encoder, img).context("encoding image")?;
        Ok(vec![Representation {
            embedding,
            bbox: [0.0, 0.0, w as f32, h as f32],
            score: None,
        }])
    }
}
