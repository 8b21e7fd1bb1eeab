use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;

use crate::face::{self, Detection, Embedding, ALIGNED_SIZE};
use crate::model::{self, ModelPaths};

/// One face found in an image together with its embedding.
#[derive(Debug, Clone)]
pub struct FaceObservation {
    pub detection: Detection,
    pub embedding: Embedding,
}

/// Anything that turns an image into zero or more embedded faces.
///
/// The ONNX [`Pipeline`] is the production implementation; callers hold the
/// trait so the model can be swapped out.
pub trait FaceAnalyzer: Send {
    fn analyze(&mut self, img: &DynamicImage) -> Result<Vec<FaceObservation>>;
}

#[derive(Debug, Clone, Copy)]
pub struct DetectorOptions {
    /// Side of the square detector input.
    pub input_size: u32,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            input_size: 640,
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
    pub options: DetectorOptions,
}

impl Pipeline {
    pub fn new(paths: &ModelPaths, options: DetectorOptions) -> Result<Self> {
        Ok(Self {
            detector: model::detector_session(paths)?,
            encoder: model::recog_session(paths)?,
            options,
        })
    }

    pub fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        face::detect_faces(
            &mut self.detector,
            img,
            self.options.input_size,
            self.options.score_threshold,
            self.options.nms_threshold,
        )
        .context("detecting faces")
    }

    pub fn embed(&mut self, img: &DynamicImage, detection: &Detection) -> Result<Embedding> {
        let crop = face::align_face(img, detection, ALIGNED_SIZE).context("aligning face")?;
        face::encode_face(&mut self.encoder, &crop).context("encoding face")
    }
}

impl FaceAnalyzer for Pipeline {
    fn analyze(&mut self, img: &DynamicImage) -> Result<Vec<FaceObservation>> {
        let detections = self.detect(img)?;
        log::debug!("detected {} face(s)", detections.len());

        detections
            .into_iter()
            .map(|detection| {
                let embedding = self.embed(img, &detection)?;
                Ok(FaceObservation {
                    detection,
                    embedding,
                })
            })
            .collect()
    }
}
