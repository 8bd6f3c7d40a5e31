//! Object detection network.
//!
//! Runs a YOLOv5-style ONNX model with `tract`. The network takes a square RGB image with values
//! in `[0, 1]` and returns one row per candidate box:
//! `[center_x, center_y, width, height, objectness, class_score_0, ..., class_score_n]`, with
//! coordinates in pixels of the network input.
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::RgbImage;
use ndarray::{s, Ix3};
use reqwest::Client;
use tract_onnx::prelude::*;

use crate::utils::download_file;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Bounding box `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`, relative to the
/// image size.
pub type Bbox = [f32; 4];

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Release asset of the small pretrained COCO model.
pub const DEFAULT_MODEL_URL: &str =
    "https://github.com/ultralytics/yolov5/releases/download/v7.0/yolov5s.onnx";

const MODEL_FILENAME: &str = "yolov5s.onnx";

/// Names of the 80 COCO classes in the order of the model output.
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Single detected object.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: Bbox,
    pub confidence: f32,
    pub class_id: usize,
}

impl Detection {
    pub fn label(&self) -> &'static str {
        COCO_CLASSES.get(self.class_id).copied().unwrap_or("object")
    }
}

pub trait InferModel {
    fn run(&self, input: &RgbImage) -> Result<Vec<Detection>>;
}

/// Settings of the detection model.
#[derive(Debug, Clone)]
pub struct YoloSettings {
    pub model_path: Option<PathBuf>,
    pub model_url: String,
    pub input_size: u32,
    pub min_confidence: f32,
    pub max_iou: f32,
}

impl Default for YoloSettings {
    fn default() -> Self {
        Self {
            model_path: None,
            model_url: DEFAULT_MODEL_URL.into(),
            input_size: 640,
            min_confidence: 0.25,
            max_iou: 0.45,
        }
    }
}

pub struct YoloModel {
    model: NnModel,
    input_size: u32,
    min_confidence: f32,
    max_iou: f32,
}

impl YoloModel {
    /// Load the model, downloading it into the cache directory first if necessary.
    pub async fn new(settings: &YoloSettings) -> Result<Self> {
        let model_path = match &settings.model_path {
            Some(path) => path.clone(),
            None => default_model_path()?,
        };

        if !model_path.exists() {
            log::info!(
                "Downloading model from {} to {}",
                &settings.model_url,
                model_path.display()
            );
            if let Some(dir) = model_path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            download_file(&Client::new(), &settings.model_url, &model_path).await?;
        }

        Self::from_path(&model_path, settings)
    }

    pub fn from_path(model_path: &Path, settings: &YoloSettings) -> Result<Self> {
        let size = settings.input_size as usize;
        let input_fact = InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size));
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to read model {}", model_path.display()))?
            .with_input_fact(0, input_fact)?
            .into_optimized()?
            .into_runnable()?;

        log::info!("Loaded model {}", model_path.display());

        Ok(Self {
            model,
            input_size: settings.input_size,
            min_confidence: settings.min_confidence,
            max_iou: settings.max_iou,
        })
    }

    fn preproc(&self, input: &RgbImage) -> Tensor {
        let resized: RgbImage = image::imageops::resize(
            input,
            self.input_size,
            self.input_size,
            image::imageops::FilterType::Triangle,
        );

        let size = self.input_size as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            resized[(x as _, y as _)][c] as f32 / 255.0
        })
        .into()
    }

    fn postproc(&self, raw_nn_out: &Tensor) -> Result<Vec<Detection>> {
        let output = raw_nn_out
            .to_array_view::<f32>()?
            .into_dimensionality::<Ix3>()?;
        if output.shape()[2] < 6 {
            bail!("unexpected model output shape {:?}", output.shape());
        }

        let rows: ndarray::ArrayView2<f32> = output.slice(s![0, .., ..]);
        let size = self.input_size as f32;
        let candidates = rows
            .outer_iter()
            .filter_map(|row| {
                let objectness = row[4];
                let (class_id, class_score) = row
                    .slice(s![5..])
                    .iter()
                    .copied()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(&b.1))?;
                let confidence = objectness * class_score;
                if confidence < self.min_confidence {
                    return None;
                }

                let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
                let bbox = [
                    ((cx - w / 2.0) / size).clamp(0.0, 1.0),
                    ((cy - h / 2.0) / size).clamp(0.0, 1.0),
                    ((cx + w / 2.0) / size).clamp(0.0, 1.0),
                    ((cy + h / 2.0) / size).clamp(0.0, 1.0),
                ];
                Some(Detection {
                    bbox,
                    confidence,
                    class_id,
                })
            })
            .collect();

        Ok(non_maximum_suppression(candidates, self.max_iou))
    }
}

impl InferModel for YoloModel {
    fn run(&self, input: &RgbImage) -> Result<Vec<Detection>> {
        let valid_input = tvec!(self.preproc(input).into());
        let raw_nn_out = self.model.run(valid_input)?;
        self.postproc(&raw_nn_out[0])
    }
}

fn default_model_path() -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir().context("no cache directory on this platform")?;
    Ok(cache_dir.join("detect_server").join(MODEL_FILENAME))
}

/// Run non-maximum-suppression on candidate detections.
///
/// Start with the most confident detection and iterate over all others in the order of sinking
/// confidence. A candidate is kept only if its IoU with every already kept box is at most
/// `max_iou`.
pub fn non_maximum_suppression(mut candidates: Vec<Detection>, max_iou: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| a.confidence.total_cmp(&b.confidence));

    let mut selected: Vec<Detection> = vec![];
    'candidates: while let Some(candidate) = candidates.pop() {
        for kept in selected.iter() {
            if iou(&candidate.bbox, &kept.bbox) > max_iou {
                continue 'candidates;
            }
        }

        selected.push(candidate);
    }

    selected
}

/// Calculate the intersection-over-union metric for two bounding boxes.
fn iou(bbox_a: &Bbox, bbox_b: &Bbox) -> f32 {
    // If the boxes do not overlap, the top left corner of the overlap box lies below and to the
    // right of its bottom right corner and the area is zero.
    let overlap_box: Bbox = [
        f32::max(bbox_a[0], bbox_b[0]),
        f32::max(bbox_a[1], bbox_b[1]),
        f32::min(bbox_a[2], bbox_b[2]),
        f32::min(bbox_a[3], bbox_b[3]),
    ];

    let overlap_area = bbox_area(&overlap_box);

    overlap_area / (bbox_area(bbox_a) + bbox_area(bbox_b) - overlap_area + EPS)
}

/// Calculate the area enclosed by a bounding box, zero for ill-defined boxes.
fn bbox_area(bbox: &Bbox) -> f32 {
    let width = bbox[2] - bbox[0];
    let height = bbox[3] - bbox[1];
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }

    width * height
}

#[cfg(test)]
mod test {
    use super::*;

    fn detection(bbox: Bbox, confidence: f32) -> Detection {
        Detection {
            bbox,
            confidence,
            class_id: 0,
        }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let bbox = [0.1, 0.1, 0.5, 0.5];
        assert!((iou(&bbox, &bbox) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        assert_eq!(iou(&[0.0, 0.0, 0.2, 0.2], &[0.5, 0.5, 0.9, 0.9]), 0.0);
    }

    #[test]
    fn nms_keeps_most_confident_of_overlapping() {
        let candidates = vec![
            detection([0.1, 0.1, 0.5, 0.5], 0.6),
            detection([0.12, 0.1, 0.5, 0.52], 0.9),
            detection([0.6, 0.6, 0.9, 0.9], 0.4),
        ];

        let selected = non_maximum_suppression(candidates, 0.45);

        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].confidence, 0.9);
        assert_eq!(selected[1].confidence, 0.4);
    }

    #[test]
    fn labels_fall_back_for_unknown_classes() {
        let mut det = detection([0.0; 4], 1.0);
        assert_eq!(det.label(), "person");
        det.class_id = 1000;
        assert_eq!(det.label(), "object");
    }
}
