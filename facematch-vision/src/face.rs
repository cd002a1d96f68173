use anyhow::Result;
use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::Array4;
use ort::{session::Session, value::Value};

use crate::yunet;

/// Detector input side length.
pub const DETECTOR_SIZE: u32 = 640;
/// Encoder input side length.
pub const FACE_SIZE: u32 = 112;

// ArcFace reference eye positions on the 112x112 crop.
const REF_LEFT_EYE: (f32, f32) = (38.2946, 51.6963);
const REF_RIGHT_EYE: (f32, f32) = (73.5318, 51.5014);

#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h in source pixels
    pub score: f32,
    pub landmarks: [f32; 10],
}

/// Aspect-preserving fit of an image onto a square canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub resized: (u32, u32),
    pub size: u32,
}

impl Letterbox {
    pub fn fit(width: u32, height: u32, size: u32) -> Self {
        let scale = size as f32 / width.max(height).max(1) as f32;
        let resized = (
            ((width as f32 * scale) as u32).clamp(1, size),
            ((height as f32 * scale) as u32).clamp(1, size),
        );
        Self {
            scale,
            offset_x: (size - resized.0) / 2,
            offset_y: (size - resized.1) / 2,
            resized,
            size,
        }
    }

    pub fn canvas(&self, img: &DynamicImage) -> RgbImage {
        let resized = img
            .resize_exact(self.resized.0, self.resized.1, FilterType::Triangle)
            .to_rgb8();
        let mut canvas = RgbImage::new(self.size, self.size);
        image::imageops::overlay(
            &mut canvas,
            &resized,
            self.offset_x as i64,
            self.offset_y as i64,
        );
        canvas
    }

    /// Canvas coordinates back to source image coordinates.
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        )
    }
}

/// Planar BGR tensor `[1, 3, H, W]` with values in [0, 255].
pub fn bgr_tensor(img: &RgbImage) -> Result<Array4<f32>> {
    let (w, h) = img.dimensions();
    let plane = (w * h) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    let (b, rest) = data.split_at_mut(plane);
    let (g, r) = rest.split_at_mut(plane);

    for (i, px) in img.pixels().enumerate() {
        r[i] = px[0] as f32;
        g[i] = px[1] as f32;
        b[i] = px[2] as f32;
    }

    Ok(Array4::from_shape_vec((1, 3, h as usize, w as usize), data)?)
}

/// Detect faces with YuNet. Results are NMS-filtered and sorted by score.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let (width, height) = img.dimensions();
    let letterbox = Letterbox::fit(width, height, DETECTOR_SIZE);
    let canvas = letterbox.canvas(img);

    let input = Value::from_array(bgr_tensor(&canvas)?)?;
    let outputs = session.run(ort::inputs![input])?;

    let mut tensors: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        tensors.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let views: Vec<(&[i64], &[f32])> = tensors
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let maps = yunet::parse_outputs(&views, DETECTOR_SIZE as usize)?;
    let raw = yunet::decode(&maps, score_threshold, DETECTOR_SIZE as usize);
    log::debug!("yunet: {} raw detections above {}", raw.len(), score_threshold);

    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| to_source(&letterbox, d))
        .collect();

    Ok(nms(&detections, nms_threshold))
}

fn to_source(letterbox: &Letterbox, d: yunet::RawDetection) -> Detection {
    let (x, y) = letterbox.unmap(d.bbox[0], d.bbox[1]);
    let mut landmarks = [0.0f32; 10];
    for (dst, src) in landmarks
        .chunks_exact_mut(2)
        .zip(d.landmarks.chunks_exact(2))
    {
        let (lx, ly) = letterbox.unmap(src[0], src[1]);
        dst[0] = lx;
        dst[1] = ly;
    }
    Detection {
        bbox: [
            x,
            y,
            d.bbox[2] / letterbox.scale,
            d.bbox[3] / letterbox.scale,
        ],
        score: d.score,
        landmarks,
    }
}

/// Greedy non-maximum suppression. Output is sorted by descending score.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::with_capacity(sorted.len());
    for candidate in sorted {
        if keep
            .iter()
            .all(|kept| iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Rotation + uniform scale that puts the detected eyes on the reference
/// eye line of a `size` x `size` crop.
#[derive(Debug, Clone, Copy)]
struct EyeTransform {
    cos: f32,
    sin: f32,
    scale: f32,
    src_center: (f32, f32),
    dst_center: (f32, f32),
}

impl EyeTransform {
    fn new(left_eye: (f32, f32), right_eye: (f32, f32), size: u32) -> Self {
        let k = size as f32 / FACE_SIZE as f32;
        let (dx, dy) = (right_eye.0 - left_eye.0, right_eye.1 - left_eye.1);
        let angle = dy.atan2(dx);

        let ref_dist = (REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).hypot(REF_RIGHT_EYE.1 - REF_LEFT_EYE.1);
        let eye_dist = dx.hypot(dy).max(f32::EPSILON);

        Self {
            cos: angle.cos(),
            sin: angle.sin(),
            scale: k * ref_dist / eye_dist,
            src_center: (
                (left_eye.0 + right_eye.0) / 2.0,
                (left_eye.1 + right_eye.1) / 2.0,
            ),
            dst_center: (
                k * (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0,
                k * (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0,
            ),
        }
    }

    /// Crop pixel to source pixel.
    fn source_of(&self, x: f32, y: f32) -> (f32, f32) {
        let u = (x - self.dst_center.0) / self.scale;
        let v = (y - self.dst_center.1) / self.scale;
        (
            self.src_center.0 + self.cos * u - self.sin * v,
            self.src_center.1 + self.sin * u + self.cos * v,
        )
    }
}

fn sample_bilinear(img: &RgbImage, x: f32, y: f32) -> Option<Rgb<u8>> {
    let (w, h) = img.dimensions();
    if x < 0.0 || y < 0.0 || x >= w as f32 || y >= h as f32 {
        return None;
    }
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for (c, value) in out.iter_mut().enumerate() {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        *value = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgb(out))
}

/// Align the face on its eye landmarks into a `size` x `size` crop.
/// Pixels that map outside the source stay black.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> DynamicImage {
    let lm = &detection.landmarks;
    let transform = EyeTransform::new((lm[0], lm[1]), (lm[2], lm[3]), size);
    let src = img.to_rgb8();

    let output = RgbImage::from_fn(size, size, |x, y| {
        let (sx, sy) = transform.source_of(x as f32, y as f32);
        sample_bilinear(&src, sx, sy).unwrap_or(Rgb([0, 0, 0]))
    });

    DynamicImage::ImageRgb8(output)
}

pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

/// Encode a face crop with SFace into an L2-normalized embedding.
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Vec<f32>> {
    let face = face_img
        .resize_exact(FACE_SIZE, FACE_SIZE, FilterType::Triangle)
        .to_rgb8();

    let input = Value::from_array(bgr_tensor(&face)?)?;
    let outputs = session.run(ort::inputs![input])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    let dim = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    if dim == 0 || dim > data.len() {
        anyhow::bail!(
            "encoder returned {} values for an output of rank {}",
            data.len(),
            shape.len()
        );
    }

    Ok(l2_normalize(data[..dim].to_vec()))
}
