//! End-to-end checks against the real ONNX models.
//!
//! The models are not checked in. Point `FACEMATCH_MODELS_DIR` at a directory
//! holding `face_detection_yunet_2023mar.onnx` and `w600k_r50.onnx`; without
//! them these tests print a notice and pass.

use anyhow::Result;
use facematch_vision::{match_embedding, DetectorOptions, FaceAnalyzer, ModelPaths, Pipeline};
use image::{DynamicImage, RgbImage};
use std::path::{Path, PathBuf};

fn model_paths() -> Option<ModelPaths> {
    let dir = std::env::var("FACEMATCH_MODELS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("models"));
    let defaults = ModelPaths::default();
    let paths = ModelPaths {
        detector: dir.join(defaults.detector.file_name()?),
        recognizer: dir.join(defaults.recognizer.file_name()?),
    };
    if paths.detector.exists() && paths.recognizer.exists() {
        Some(paths)
    } else {
        eprintln!("Skipping: models not found in {}", dir.display());
        None
    }
}

#[test]
fn test_blank_image_has_no_faces() -> Result<()> {
    env_logger::try_init().ok();
    let Some(paths) = model_paths() else {
        return Ok(());
    };
    let mut pipeline = Pipeline::new(&paths, DetectorOptions::default())?;

    let blank = DynamicImage::ImageRgb8(RgbImage::from_pixel(
        480,
        360,
        image::Rgb([128, 128, 128]),
    ));
    let faces = pipeline.analyze(&blank)?;
    assert!(faces.is_empty(), "found {} face(s) in a flat grey image", faces.len());
    Ok(())
}

#[test]
fn test_same_photo_embeds_identically() -> Result<()> {
    env_logger::try_init().ok();
    let Some(paths) = model_paths() else {
        return Ok(());
    };
    let photo = Path::new("test_faces/single.jpg");
    if !photo.exists() {
        eprintln!("Skipping: {} not found", photo.display());
        return Ok(());
    }

    let mut pipeline = Pipeline::new(&paths, DetectorOptions::default())?;
    let img = image::open(photo)?;

    let first = pipeline.analyze(&img)?;
    let second = pipeline.analyze(&img)?;
    assert_eq!(first.len(), 1, "expected exactly one face in {}", photo.display());
    assert_eq!(first[0].embedding.dim(), 512);

    let sim = match_embedding(&first[0].embedding, &second[0].embedding);
    println!("self similarity: {:.4}", sim);
    assert!(sim > 0.999);

    // A mirrored copy is still the same person.
    let mirrored = pipeline.analyze(&img.fliph())?;
    assert_eq!(mirrored.len(), 1);
    let sim = match_embedding(&first[0].embedding, &mirrored[0].embedding);
    println!("mirror similarity: {:.4}", sim);
    assert!(sim > 0.3);
    Ok(())
}
