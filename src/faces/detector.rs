use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use super::embedding::{l2_normalize, Embedding};
use crate::config::ModelConfig;
use crate::error::RollcallError;

/// Bounding box for a detected face, in pixels of the source frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A detected face with bounding box and embedding
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
    pub confidence: f32,
}

/// Anything that can turn a frame into face embeddings.
pub trait FaceEncoder: Send + Sync {
    fn encode(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>>;
}

/// Enrollment and single-person attendance need exactly one face.
pub fn require_single_face(mut faces: Vec<DetectedFace>) -> Result<DetectedFace, RollcallError> {
    match faces.len() {
        0 => Err(RollcallError::NoFace),
        1 => Ok(faces.remove(0)),
        n => Err(RollcallError::MultipleFaces(n)),
    }
}

const DETECTION_MODEL_FILE: &str = "ultraface-320.onnx";
const DETECTION_MODEL_URL: &str =
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx";
const EMBEDDING_MODEL_FILE: &str = "arcface-resnet100.onnx";
const EMBEDDING_MODEL_URL: &str =
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/arcface/model/arcfaceresnet100-11-int8.onnx";

/// UltraFace detection followed by ArcFace embedding, via ONNX Runtime.
///
/// Models are downloaded into the configured directory and loaded on first use.
pub struct OnnxEncoder {
    models_dir: PathBuf,
    intra_threads: usize,
    detection: OnceLock<Mutex<Session>>,
    embedding: OnceLock<Mutex<Session>>,
}

impl OnnxEncoder {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            models_dir: config.dir.clone(),
            intra_threads: config.intra_threads.max(1),
            detection: OnceLock::new(),
            embedding: OnceLock::new(),
        }
    }

    /// Load both models up front so the first capture is not slow.
    pub fn warm_up(&self) -> Result<()> {
        self.detection_session()?;
        self.embedding_session()?;
        Ok(())
    }

    fn detection_session(&self) -> Result<&Mutex<Session>> {
        if self.detection.get().is_none() {
            let path = ensure_model(&self.models_dir, DETECTION_MODEL_FILE, DETECTION_MODEL_URL)?;
            let session = self.load_session(&path)?;
            let _ = self.detection.set(Mutex::new(session));
        }
        self.detection
            .get()
            .ok_or_else(|| anyhow!("Detection model not initialized"))
    }

    fn embedding_session(&self) -> Result<&Mutex<Session>> {
        if self.embedding.get().is_none() {
            let path = ensure_model(&self.models_dir, EMBEDDING_MODEL_FILE, EMBEDDING_MODEL_URL)?;
            let session = self.load_session(&path)?;
            let _ = self.embedding.set(Mutex::new(session));
        }
        self.embedding
            .get()
            .ok_or_else(|| anyhow!("Embedding model not initialized"))
    }

    fn load_session(&self, path: &Path) -> Result<Session> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.intra_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model {}", path.display()))?;
        Ok(session)
    }
}

impl FaceEncoder for OnnxEncoder {
    fn encode(&self, img: &DynamicImage) -> Result<Vec<DetectedFace>> {
        let (orig_width, orig_height) = img.dimensions();

        let face_boxes = {
            let mut detection_model = self
                .detection_session()?
                .lock()
                .map_err(|e| anyhow!("Failed to lock detection model: {}", e))?;
            run_ultraface_detection(&mut detection_model, img)?
        };

        if face_boxes.is_empty() {
            return Ok(Vec::new());
        }

        let mut embedding_model = self
            .embedding_session()?
            .lock()
            .map_err(|e| anyhow!("Failed to lock embedding model: {}", e))?;

        let mut detected_faces = Vec::new();

        for (bbox, confidence) in face_boxes {
            if bbox.width <= 0 || bbox.height <= 0 {
                continue;
            }

            let face_crop = crop_face(img, &bbox, orig_width, orig_height);
            let embedding = run_arcface_embedding(&mut embedding_model, &face_crop)?;

            detected_faces.push(DetectedFace {
                bbox,
                embedding: Embedding::new(embedding),
                confidence,
            });
        }

        tracing::debug!(faces = detected_faces.len(), "Encoded frame");
        Ok(detected_faces)
    }
}

/// Download a model file if it doesn't exist
fn ensure_model(models_dir: &Path, filename: &str, url: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(models_dir)?;
    let model_path = models_dir.join(filename);

    if !model_path.exists() {
        tracing::info!(model = %filename, "Downloading model...");
        let response = ureq::get(url)
            .call()
            .map_err(|e| anyhow!("Failed to download model: {}", e))?;

        // Write to a temp name first so an interrupted download is retried.
        let partial = model_path.with_extension("part");
        let mut file = std::fs::File::create(&partial)?;
        std::io::copy(&mut response.into_reader(), &mut file)?;
        std::fs::rename(&partial, &model_path)?;
        tracing::info!(model = %filename, path = ?model_path, "Model downloaded");
    }

    Ok(model_path)
}

/// Run UltraFace detection model
fn run_ultraface_detection(session: &mut Session, img: &DynamicImage) -> Result<Vec<(BoundingBox, f32)>> {
    const INPUT_WIDTH: u32 = 320;
    const INPUT_HEIGHT: u32 = 240;
    const CONFIDENCE_THRESHOLD: f32 = 0.7;
    const NMS_THRESHOLD: f32 = 0.3;

    let (orig_width, orig_height) = img.dimensions();

    let resized = img.resize_exact(INPUT_WIDTH, INPUT_HEIGHT, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    // NCHW, normalized to roughly [-1, 1]
    let plane = (INPUT_HEIGHT * INPUT_WIDTH) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let idx = y as usize * INPUT_WIDTH as usize + x as usize;
        input_data[idx] = (pixel[0] as f32 - 127.0) / 128.0;
        input_data[plane + idx] = (pixel[1] as f32 - 127.0) / 128.0;
        input_data[2 * plane + idx] = (pixel[2] as f32 - 127.0) / 128.0;
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize],
        input_data.into_boxed_slice(),
    ))?;

    let outputs = session.run(ort::inputs!["input" => input_tensor])?;

    let scores_value = outputs.get("scores")
        .ok_or_else(|| anyhow!("No scores output"))?;
    let boxes_value = outputs.get("boxes")
        .ok_or_else(|| anyhow!("No boxes output"))?;

    let (scores_shape, scores_data) = scores_value.try_extract_tensor::<f32>()?;
    let (_boxes_shape, boxes_data) = boxes_value.try_extract_tensor::<f32>()?;

    // scores: [1, anchors, 2] (background, face); boxes: [1, anchors, 4] normalized corners
    let num_anchors = scores_shape[1] as usize;
    let mut face_boxes = Vec::new();

    for i in 0..num_anchors {
        let confidence = scores_data[i * 2 + 1];
        if confidence <= CONFIDENCE_THRESHOLD {
            continue;
        }

        let x1 = (boxes_data[i * 4] * orig_width as f32) as i32;
        let y1 = (boxes_data[i * 4 + 1] * orig_height as f32) as i32;
        let x2 = (boxes_data[i * 4 + 2] * orig_width as f32) as i32;
        let y2 = (boxes_data[i * 4 + 3] * orig_height as f32) as i32;

        let bbox = BoundingBox {
            x: x1.max(0),
            y: y1.max(0),
            width: (x2 - x1).max(1),
            height: (y2 - y1).max(1),
        };

        face_boxes.push((bbox, confidence));
    }

    Ok(nms(face_boxes, NMS_THRESHOLD))
}

/// Non-maximum suppression to remove overlapping detections
fn nms(mut boxes: Vec<(BoundingBox, f32)>, threshold: f32) -> Vec<(BoundingBox, f32)> {
    boxes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }

        keep.push(boxes[i]);

        for j in (i + 1)..boxes.len() {
            if !suppressed[j] && compute_iou(&boxes[i].0, &boxes[j].0) > threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Compute Intersection over Union between two bounding boxes
fn compute_iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let intersection = ((x2 - x1).max(0) * (y2 - y1).max(0)) as f32;
    let area_a = (a.width * a.height) as f32;
    let area_b = (b.width * b.height) as f32;
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Crop face region from image with 20% padding
fn crop_face(img: &DynamicImage, bbox: &BoundingBox, img_width: u32, img_height: u32) -> DynamicImage {
    let padding_x = (bbox.width as f32 * 0.2) as i32;
    let padding_y = (bbox.height as f32 * 0.2) as i32;

    let x = ((bbox.x - padding_x).max(0) as u32).min(img_width.saturating_sub(1));
    let y = ((bbox.y - padding_y).max(0) as u32).min(img_height.saturating_sub(1));
    let w = ((bbox.width + padding_x * 2) as u32).min(img_width - x);
    let h = ((bbox.height + padding_y * 2) as u32).min(img_height - y);

    img.crop_imm(x, y, w.max(1), h.max(1))
}

/// Run ArcFace embedding model
fn run_arcface_embedding(session: &mut Session, face_img: &DynamicImage) -> Result<Vec<f32>> {
    const INPUT_SIZE: u32 = 112;

    let resized = face_img.resize_exact(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let idx = y as usize * INPUT_SIZE as usize + x as usize;
        input_data[idx] = (pixel[0] as f32 - 127.5) / 127.5;
        input_data[plane + idx] = (pixel[1] as f32 - 127.5) / 127.5;
        input_data[2 * plane + idx] = (pixel[2] as f32 - 127.5) / 127.5;
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
        input_data.into_boxed_slice(),
    ))?;

    // The ArcFace export names its input "data"
    let outputs = session.run(ort::inputs!["data" => input_tensor])?;

    let embedding_output = outputs.iter().next()
        .ok_or_else(|| anyhow!("No embedding output"))?;

    let (_embedding_shape, embedding_data) = embedding_output.1
        .try_extract_tensor::<f32>()?;

    Ok(l2_normalize(embedding_data.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(width: i32) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox { x: 0, y: 0, width, height: width },
            embedding: Embedding::new(vec![1.0, 0.0]),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox { x: 0, y: 0, width: 10, height: 10 };
        let b = BoundingBox { x: 0, y: 0, width: 10, height: 10 };
        assert!((compute_iou(&a, &b) - 1.0).abs() < 0.001);

        let c = BoundingBox { x: 20, y: 20, width: 10, height: 10 };
        assert!((compute_iou(&a, &c) - 0.0).abs() < 0.001);

        let d = BoundingBox { x: 5, y: 0, width: 10, height: 10 };
        assert!((compute_iou(&a, &d) - 50.0 / 150.0).abs() < 0.001);
    }

    #[test]
    fn test_nms_keeps_highest_confidence() {
        let boxes = vec![
            (BoundingBox { x: 1, y: 1, width: 10, height: 10 }, 0.8),
            (BoundingBox { x: 0, y: 0, width: 10, height: 10 }, 0.95),
            (BoundingBox { x: 50, y: 50, width: 10, height: 10 }, 0.75),
        ];

        let kept = nms(boxes, 0.3);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].0, BoundingBox { x: 0, y: 0, width: 10, height: 10 });
        assert_eq!(kept[1].0.x, 50);
    }

    #[test]
    fn test_crop_face_stays_in_bounds() {
        let img = DynamicImage::new_rgb8(40, 30);
        let bbox = BoundingBox { x: 30, y: 20, width: 20, height: 20 };
        let crop = crop_face(&img, &bbox, 40, 30);
        let (w, h) = crop.dimensions();
        assert!(w >= 1 && w <= 40);
        assert!(h >= 1 && h <= 30);
    }

    #[test]
    fn test_require_single_face() {
        assert_eq!(require_single_face(Vec::new()).unwrap_err(), RollcallError::NoFace);
        assert_eq!(
            require_single_face(vec![face(10), face(12)]).unwrap_err(),
            RollcallError::MultipleFaces(2)
        );
        assert_eq!(require_single_face(vec![face(10)]).unwrap().bbox.width, 10);
    }
}
