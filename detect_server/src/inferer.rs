//! Detectors overlaying detection results on frames.
//!
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use rusttype::{Font, Scale};

use crate::{
    error::DetectionError,
    frame::Frame,
    nn::{Detection, InferModel},
};

/// Fonts tried in order when no font is configured.
pub const SYSTEM_FONTS: [&str; 5] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/TTF/DejaVuSansMono.ttf",
    "/usr/share/fonts/dejavu-sans-mono-fonts/DejaVuSansMono.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf",
    "/usr/share/fonts/truetype/freefont/FreeMono.ttf",
];

/// First of the candidate font files that exists.
pub fn find_font<P: AsRef<Path>>(candidates: &[P]) -> Option<PathBuf> {
    candidates
        .iter()
        .find(|path| path.as_ref().is_file())
        .map(|path| path.as_ref().to_path_buf())
}

/// Black-box annotation step applied to every frame.
pub trait Detector: Send + Sync {
    fn annotate(&self, frame: Frame) -> Result<Frame, DetectionError>;
}

/// Detector running an inference model and drawing its detections.
pub struct ModelDetector<M> {
    model: M,
    font: Option<Font<'static>>,
}

impl<M: InferModel> ModelDetector<M> {
    pub fn new(model: M) -> Self {
        Self { model, font: None }
    }

    /// Label boxes with class and confidence using the given TTF font.
    pub fn with_font(mut self, font_path: &Path) -> Result<Self> {
        let font_data = std::fs::read(font_path)
            .with_context(|| format!("failed to read font {}", font_path.display()))?;
        let font = Font::try_from_vec(font_data).context("invalid font file")?;
        self.font = Some(font);

        Ok(self)
    }
}

impl<M: InferModel + Send + Sync> Detector for ModelDetector<M> {
    fn annotate(&self, frame: Frame) -> Result<Frame, DetectionError> {
        let mut image = frame.into_rgb()?;
        let detections = self
            .model
            .run(&image)
            .map_err(|e| DetectionError::Model(e.to_string()))?;
        log::debug!("Found {} objects in frame", detections.len());

        draw_detections(&mut image, &detections, self.font.as_ref());

        Ok(Frame::from_rgb(image))
    }
}

/// Draw bounding boxes with optional labels onto the image.
fn draw_detections(image: &mut RgbImage, detections: &[Detection], font: Option<&Font<'static>>) {
    let (width, height) = image.dimensions();
    let (width, height) = (width as f32, height as f32);

    let color = Rgb::from([0, 255, 0]);

    for detection in detections {
        let bbox = detection.bbox;
        // Coordinate frame basis is on the top left corner
        let (x_tl, y_tl) = (bbox[0] * width, bbox[1] * height);
        let (x_br, y_br) = (bbox[2] * width, bbox[3] * height);
        let rect_width = (x_br - x_tl).max(1.0);
        let rect_height = (y_br - y_tl).max(1.0);

        let rect =
            Rect::at(x_tl as i32, y_tl as i32).of_size(rect_width as u32, rect_height as u32);
        draw_hollow_rect_mut(image, rect, color);

        if let Some(font) = font {
            draw_text_mut(
                image,
                color,
                x_tl as i32,
                y_tl as i32,
                Scale { x: 16.0, y: 16.0 },
                font,
                &format!("{} {:.0}%", detection.label(), detection.confidence * 100.0),
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::ChannelOrder;

    struct FixedModel(Vec<Detection>);

    impl InferModel for FixedModel {
        fn run(&self, _input: &RgbImage) -> Result<Vec<Detection>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenModel;

    impl InferModel for BrokenModel {
        fn run(&self, _input: &RgbImage) -> Result<Vec<Detection>> {
            anyhow::bail!("inference failed")
        }
    }

    #[test]
    fn draws_box_outline() {
        let detector = ModelDetector::new(FixedModel(vec![Detection {
            bbox: [0.25, 0.25, 0.75, 0.75],
            confidence: 0.9,
            class_id: 0,
        }]));
        let frame = Frame::from_rgb(RgbImage::new(8, 8));

        let annotated = detector.annotate(frame).unwrap().into_rgb().unwrap();

        assert_eq!(annotated.get_pixel(2, 2), &Rgb([0, 255, 0]));
        assert_eq!(annotated.get_pixel(4, 4), &Rgb([0, 0, 0]));
    }

    #[test]
    fn first_existing_font_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.ttf");
        std::fs::write(&present, b"").unwrap();
        let missing = dir.path().join("missing.ttf");

        assert_eq!(find_font(&[&missing, &present]), Some(present.clone()));
        assert_eq!(find_font(&[&missing]), None);
        assert_eq!(find_font(&[dir.path()]), None);
    }

    #[test]
    fn invalid_font_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let font_path = dir.path().join("broken.ttf");
        std::fs::write(&font_path, b"not a font").unwrap();

        assert!(ModelDetector::new(FixedModel(vec![]))
            .with_font(&font_path)
            .is_err());
    }

    #[test]
    fn malformed_frame_is_rejected() {
        let detector = ModelDetector::new(FixedModel(vec![]));
        let frame = Frame::new(4, 4, ChannelOrder::Rgb, vec![0; 3]);

        assert!(matches!(
            detector.annotate(frame),
            Err(DetectionError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn model_failure_is_a_detection_error() {
        let detector = ModelDetector::new(BrokenModel);
        let frame = Frame::from_rgb(RgbImage::new(4, 4));

        match detector.annotate(frame) {
            Err(DetectionError::Model(msg)) => assert!(msg.contains("inference failed")),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
