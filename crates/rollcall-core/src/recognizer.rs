//! Recognizer adapter — ONNX-backed face detection and embedding.
//!
//! The detection and embedding models are treated as an opaque capability:
//! this module only does tensor plumbing (resize, normalize, decode rows)
//! around two ONNX sessions. Everything downstream depends solely on the
//! [`Recognizer`] trait, so tests substitute a scripted implementation.

use crate::types::{BoundingBox, Detection, Embedding};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Model input geometry and normalization ---
const DETECT_INPUT_SIZE: usize = 640;
const DETECT_MEAN: f32 = 127.5;
const DETECT_STD: f32 = 128.0;
const DETECT_CONFIDENCE_THRESHOLD: f32 = 0.5;
/// Floats per detection row: [score, x, y, w, h].
const DETECT_ROW_LEN: usize = 5;

const EMBED_INPUT_SIZE: usize = 112;
const EMBED_MEAN: f32 = 127.5;
const EMBED_STD: f32 = 127.5; // symmetric normalization, not 128.0

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer too short: expected {expected}, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// External face-recognition capability.
///
/// `detect_all` consumes one grayscale frame and yields every face found,
/// each with a bounding box and embedding. `embed_reference` builds a
/// reference embedding from a stored enrollment image, or `None` when the
/// image contains no usable face.
pub trait Recognizer: Send {
    fn detect_all(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, RecognizerError>;

    fn embed_reference(&mut self, image: &GrayImage) -> Result<Option<Embedding>, RecognizerError>;
}

/// ONNX Runtime recognizer: a post-processed detector graph (emits
/// `[N, 5]` score+box rows, NMS already applied in-graph) plus an
/// embedding graph over 112×112 face crops.
pub struct OnnxRecognizer {
    detect_session: Session,
    embed_session: Session,
}

impl OnnxRecognizer {
    /// Load both models from the given paths.
    pub fn load(detect_path: &str, embed_path: &str) -> Result<Self, RecognizerError> {
        let detect_session = load_session(detect_path)?;
        let embed_session = load_session(embed_path)?;
        Ok(Self {
            detect_session,
            embed_session,
        })
    }

    /// Run the detector and decode `[N, 5]` rows back to frame coordinates.
    fn detect_boxes(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, RecognizerError> {
        let resized = resize_bilinear(
            frame,
            width as usize,
            height as usize,
            DETECT_INPUT_SIZE,
            DETECT_INPUT_SIZE,
        )?;
        let input = to_tensor(&resized, DETECT_INPUT_SIZE, DETECT_MEAN, DETECT_STD);

        let outputs = self
            .detect_session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, rows) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("detector output: {e}")))?;

        // Map model-input coordinates back to frame coordinates.
        let sx = width as f32 / DETECT_INPUT_SIZE as f32;
        let sy = height as f32 / DETECT_INPUT_SIZE as f32;

        let mut boxes = Vec::new();
        for row in rows.chunks_exact(DETECT_ROW_LEN) {
            let confidence = row[0];
            if confidence < DETECT_CONFIDENCE_THRESHOLD {
                continue;
            }
            boxes.push(BoundingBox {
                x: row[1] * sx,
                y: row[2] * sy,
                width: row[3] * sx,
                height: row[4] * sy,
                confidence,
            });
        }
        boxes.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(boxes)
    }

    /// Crop a face box out of the frame, resize to 112×112, and run the
    /// embedding graph. Output is L2-normalized.
    fn embed_box(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        bbox: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        let crop = crop_clamped(frame, width as usize, height as usize, bbox)?;
        let resized = resize_bilinear(
            &crop.data,
            crop.width,
            crop.height,
            EMBED_INPUT_SIZE,
            EMBED_INPUT_SIZE,
        )?;
        let input = to_tensor(&resized, EMBED_INPUT_SIZE, EMBED_MEAN, EMBED_STD);

        let outputs = self
            .embed_session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding output: {e}")))?;

        Ok(Embedding {
            values: l2_normalize(raw),
        })
    }
}

impl Recognizer for OnnxRecognizer {
    fn detect_all(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, RecognizerError> {
        let boxes = self.detect_boxes(frame, width, height)?;
        let mut detections = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            let embedding = self.embed_box(frame, width, height, &bbox)?;
            detections.push(Detection { bbox, embedding });
        }
        Ok(detections)
    }

    fn embed_reference(&mut self, image: &GrayImage) -> Result<Option<Embedding>, RecognizerError> {
        let (w, h) = image.dimensions();
        // Take the highest-confidence face; detect_boxes sorts descending.
        let boxes = self.detect_boxes(image.as_raw(), w, h)?;
        let Some(best) = boxes.first() else {
            return Ok(None);
        };
        Ok(Some(self.embed_box(image.as_raw(), w, h, best)?))
    }
}

fn load_session(model_path: &str) -> Result<Session, RecognizerError> {
    if !Path::new(model_path).exists() {
        return Err(RecognizerError::ModelNotFound(model_path.to_string()));
    }
    let session = Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(model_path)?;
    tracing::info!(
        path = model_path,
        inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded ONNX model"
    );
    Ok(session)
}

/// Grayscale crop owned outside the source frame.
struct Crop {
    data: Vec<u8>,
    width: usize,
    height: usize,
}

/// Crop `bbox` out of a grayscale frame, clamping to frame bounds.
///
/// A box that has drifted partly (or entirely) outside the frame yields a
/// smaller crop, never an error beyond a degenerate empty intersection —
/// callers tolerate best-effort crops of a face that moved.
fn crop_clamped(
    frame: &[u8],
    width: usize,
    height: usize,
    bbox: &BoundingBox,
) -> Result<Crop, RecognizerError> {
    if frame.len() < width * height {
        return Err(RecognizerError::FrameTooShort {
            expected: width * height,
            actual: frame.len(),
        });
    }

    let x0 = (bbox.x.max(0.0) as usize).min(width.saturating_sub(1));
    let y0 = (bbox.y.max(0.0) as usize).min(height.saturating_sub(1));
    let x1 = ((bbox.x + bbox.width).max(0.0) as usize).clamp(x0 + 1, width);
    let y1 = ((bbox.y + bbox.height).max(0.0) as usize).clamp(y0 + 1, height);

    let cw = x1 - x0;
    let ch = y1 - y0;
    let mut data = Vec::with_capacity(cw * ch);
    for y in y0..y1 {
        data.extend_from_slice(&frame[y * width + x0..y * width + x1]);
    }

    Ok(Crop {
        data,
        width: cw,
        height: ch,
    })
}

/// Bilinear resize of a grayscale buffer.
fn resize_bilinear(
    src: &[u8],
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
) -> Result<Vec<u8>, RecognizerError> {
    if src.len() < src_w * src_h || src_w == 0 || src_h == 0 {
        return Err(RecognizerError::FrameTooShort {
            expected: src_w * src_h,
            actual: src.len(),
        });
    }

    let mut dst = vec![0u8; dst_w * dst_h];
    let x_ratio = src_w as f32 / dst_w as f32;
    let y_ratio = src_h as f32 / dst_h as f32;

    for dy in 0..dst_h {
        let fy = (dy as f32 + 0.5) * y_ratio - 0.5;
        let fy = fy.clamp(0.0, (src_h - 1) as f32);
        let y0 = fy as usize;
        let y1 = (y0 + 1).min(src_h - 1);
        let wy = fy - y0 as f32;

        for dx in 0..dst_w {
            let fx = (dx as f32 + 0.5) * x_ratio - 0.5;
            let fx = fx.clamp(0.0, (src_w - 1) as f32);
            let x0 = fx as usize;
            let x1 = (x0 + 1).min(src_w - 1);
            let wx = fx - x0 as f32;

            let tl = src[y0 * src_w + x0] as f32;
            let tr = src[y0 * src_w + x1] as f32;
            let bl = src[y1 * src_w + x0] as f32;
            let br = src[y1 * src_w + x1] as f32;

            let top = tl * (1.0 - wx) + tr * wx;
            let bot = bl * (1.0 - wx) + br * wx;
            dst[dy * dst_w + dx] = (top * (1.0 - wy) + bot * wy).round() as u8;
        }
    }

    Ok(dst)
}

/// Grayscale square → NCHW float tensor, Y replicated across 3 channels.
fn to_tensor(gray: &[u8], size: usize, mean: f32, std: f32) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for y in 0..size {
        for x in 0..size {
            let pixel = gray.get(y * size + x).copied().unwrap_or(0) as f32;
            let normalized = (pixel - mean) / std;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_tensor_shape_and_channels() {
        let gray = vec![128u8; 4 * 4];
        let tensor = to_tensor(&gray, 4, 127.5, 127.5);
        assert_eq!(tensor.shape(), &[1, 3, 4, 4]);
        // Grayscale replicated: all three channels identical.
        assert_eq!(tensor[[0, 0, 1, 2]], tensor[[0, 1, 1, 2]]);
        assert_eq!(tensor[[0, 1, 1, 2]], tensor[[0, 2, 1, 2]]);
    }

    #[test]
    fn test_to_tensor_normalization() {
        let gray = vec![128u8; 4];
        let tensor = to_tensor(&gray, 2, 127.5, 127.5);
        let expected = (128.0 - 127.5) / 127.5;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let out = l2_normalize(&[3.0, 4.0]);
        let norm: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_resize_identity() {
        let src: Vec<u8> = (0..16).collect();
        let dst = resize_bilinear(&src, 4, 4, 4, 4).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn test_resize_uniform_stays_uniform() {
        let src = vec![200u8; 8 * 8];
        let dst = resize_bilinear(&src, 8, 8, 3, 5).unwrap();
        assert!(dst.iter().all(|&p| p == 200));
    }

    #[test]
    fn test_resize_rejects_short_buffer() {
        assert!(resize_bilinear(&[0u8; 3], 2, 2, 4, 4).is_err());
    }

    #[test]
    fn test_crop_inside_frame() {
        // 4x4 frame with row-major values 0..16.
        let frame: Vec<u8> = (0..16).collect();
        let bbox = BoundingBox { x: 1.0, y: 1.0, width: 2.0, height: 2.0, confidence: 1.0 };
        let crop = crop_clamped(&frame, 4, 4, &bbox).unwrap();
        assert_eq!((crop.width, crop.height), (2, 2));
        assert_eq!(crop.data, vec![5, 6, 9, 10]);
    }

    #[test]
    fn test_crop_clamps_out_of_bounds_box() {
        let frame = vec![7u8; 16];
        let bbox = BoundingBox { x: -5.0, y: 2.0, width: 100.0, height: 100.0, confidence: 1.0 };
        let crop = crop_clamped(&frame, 4, 4, &bbox).unwrap();
        assert_eq!((crop.width, crop.height), (4, 2));
    }

    #[test]
    fn test_crop_fully_departed_box_yields_minimal_crop() {
        // Face left the frame entirely: still a 1x1 best-effort crop.
        let frame = vec![9u8; 16];
        let bbox = BoundingBox { x: 50.0, y: 50.0, width: 10.0, height: 10.0, confidence: 1.0 };
        let crop = crop_clamped(&frame, 4, 4, &bbox).unwrap();
        assert_eq!((crop.width, crop.height), (1, 1));
    }
}
