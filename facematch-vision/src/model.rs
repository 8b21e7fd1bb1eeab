use anyhow::{Context, Result};
use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
};
use std::path::{Path, PathBuf};

/// Where the two ONNX graphs live on disk.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    /// YuNet face detector.
    pub detector: PathBuf,
    /// ArcFace-style recognizer producing one embedding row per crop.
    pub recognizer: PathBuf,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            detector: PathBuf::from("models/face_detection_yunet_2023mar.onnx"),
            recognizer: PathBuf::from("models/w600k_r50.onnx"),
        }
    }
}

pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(ort::Error::<()>::from)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

fn load(path: &Path, what: &str) -> Result<Session> {
    log::info!("loading {} model from {}", what, path.display());
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load {} model {}", what, path.display()))
}

pub fn detector_session(paths: &ModelPaths) -> Result<Session> {
    load(&paths.detector, "detector")
}

pub fn recog_session(paths: &ModelPaths) -> Result<Session> {
    load(&paths.recognizer, "recognition")
}
