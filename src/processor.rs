use crate::error::ProcessError;
use crate::matcher::{self, MatchOutcome};
use crate::store::EmbeddingStore;
use facematch_vision::{Embedding, FaceAnalyzer};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

pub const UNKNOWN_NAME: &str = "Unknown";

/// One recognized (or unrecognized) face in a submitted image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in source image pixels.
    pub bbox: [i32; 4],
}

impl MatchResult {
    pub fn is_unknown(&self) -> bool {
        self.relation.is_none() && self.name == UNKNOWN_NAME
    }
}

fn round3(v: f32) -> f32 {
    (v * 1000.0).round() / 1000.0
}

/// Decodes images, runs the analyzer and matches every face it returns.
pub struct FrameProcessor {
    analyzer: Mutex<Box<dyn FaceAnalyzer>>,
    store: Arc<EmbeddingStore>,
    threshold: f32,
}

impl FrameProcessor {
    pub fn new(
        analyzer: Box<dyn FaceAnalyzer>,
        store: Arc<EmbeddingStore>,
        threshold: f32,
    ) -> Self {
        Self {
            analyzer: Mutex::new(analyzer),
            store,
            threshold,
        }
    }

    /// Decode an encoded image (JPEG, PNG, ...) and recognize every face.
    pub fn process(&self, bytes: &[u8]) -> Result<Vec<MatchResult>, ProcessError> {
        if bytes.is_empty() {
            return Err(ProcessError::InvalidImage("empty image data".to_string()));
        }
        let img = image::load_from_memory(bytes)
            .map_err(|e| ProcessError::InvalidImage(e.to_string()))?;
        self.process_image(&DynamicImage::ImageRgb8(img.to_rgb8()))
    }

    pub fn process_image(&self, img: &DynamicImage) -> Result<Vec<MatchResult>, ProcessError> {
        let faces = {
            // Recover the analyzer if an earlier analyze call panicked.
            let mut analyzer = self.analyzer.lock().unwrap_or_else(|e| e.into_inner());
            analyzer.analyze(img).map_err(ProcessError::Analyzer)?
        };

        let expected_dim = self.store.expected_dim();
        let gallery = self.store.snapshot();
        let mut results = Vec::with_capacity(faces.len());
        for face in faces {
            if face.embedding.dim() != expected_dim {
                return Err(ProcessError::Analyzer(anyhow::anyhow!(
                    "analyzer returned a {}-dim embedding, store expects {}",
                    face.embedding.dim(),
                    expected_dim
                )));
            }
            let probe = Embedding::from_raw(face.embedding.to_vec()).ok_or_else(|| {
                ProcessError::Analyzer(anyhow::anyhow!("analyzer returned a degenerate embedding"))
            })?;
            let bbox = face.detection.corners();

            let result = match matcher::best_match(&gallery, &probe, self.threshold) {
                MatchOutcome::Matched { record, score } => {
                    log::debug!("face at {:?} matched {} ({:.3})", bbox, record.id, score);
                    MatchResult {
                        name: record.name.clone(),
                        relation: Some(record.relation.clone()),
                        confidence: round3(score),
                        bbox,
                    }
                }
                MatchOutcome::Unknown { best_score } => {
                    log::debug!("face at {:?} unknown (best {:.3})", bbox, best_score);
                    MatchResult {
                        name: UNKNOWN_NAME.to_string(),
                        relation: None,
                        confidence: round3(best_score),
                        bbox,
                    }
                }
            };
            results.push(result);
        }

        Ok(results)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{png_bytes, ScriptedAnalyzer};
    use super::*;
    use crate::store::{Gallery, ReferenceRecord};
    use facematch_vision::FaceObservation;

    fn store_with_alice() -> Arc<EmbeddingStore> {
        let store = Arc::new(EmbeddingStore::new("unused", 3));
        store.replace(Gallery::from_records(vec![ReferenceRecord {
            id: "a1".into(),
            name: "Alice".into(),
            relation: "sister".into(),
            embedding: Embedding::from_raw(vec![1.0, 0.0, 0.0]).unwrap(),
        }]));
        store
    }

    fn processor(faces: Vec<(Vec<f32>, [f32; 4])>) -> FrameProcessor {
        FrameProcessor::new(Box::new(ScriptedAnalyzer { faces }), store_with_alice(), 0.3)
    }

    /// Panics on its first call, then reports no faces.
    struct PanicsOnce {
        calls: usize,
    }

    impl FaceAnalyzer for PanicsOnce {
        fn analyze(&mut self, _img: &DynamicImage) -> anyhow::Result<Vec<FaceObservation>> {
            self.calls += 1;
            if self.calls == 1 {
                panic!("inference blew up");
            }
            Ok(vec![])
        }
    }

    #[test]
    fn analyzer_panic_does_not_wedge_later_requests() {
        let p = FrameProcessor::new(Box::new(PanicsOnce { calls: 0 }), store_with_alice(), 0.3);
        let png = png_bytes();

        let first = std::thread::scope(|s| s.spawn(|| p.process(&png)).join());
        assert!(first.is_err(), "first call should have panicked");

        assert!(p.process(&png).unwrap().is_empty());
    }

    #[test]
    fn embedding_size_mismatch_is_an_analyzer_error() {
        // Truncating to the shorter vector would score 1.0 against Alice.
        let p = processor(vec![(vec![1.0, 0.0], [0.0, 0.0, 10.0, 10.0])]);
        match p.process(&png_bytes()) {
            Err(ProcessError::Analyzer(e)) => assert!(e.to_string().contains("2-dim")),
            other => panic!("expected analyzer error, got {:?}", other),
        }
    }

    #[test]
    fn matches_and_unknowns_per_face() {
        let p = processor(vec![
            (vec![0.62, 0.784_602, 0.0], [10.0, 20.0, 30.0, 40.0]),
            (vec![0.10, 0.994_987, 0.0], [100.0, 20.0, 30.0, 40.0]),
        ]);
        let results = p.process(&png_bytes()).unwrap();
        assert_eq!(results.len(), 2);

        assert_eq!(results[0].name, "Alice");
        assert_eq!(results[0].relation.as_deref(), Some("sister"));
        assert_eq!(results[0].confidence, 0.62);
        assert_eq!(results[0].bbox, [10, 20, 40, 60]);

        assert!(results[1].is_unknown());
        assert_eq!(results[1].confidence, 0.1);

        let unknown = serde_json::to_value(&results[1]).unwrap();
        assert!(unknown.get("relation").is_none());
    }

    #[test]
    fn no_faces_is_an_empty_list() {
        let p = processor(vec![]);
        assert!(p.process(&png_bytes()).unwrap().is_empty());
    }

    #[test]
    fn undecodable_bytes_are_invalid_image() {
        let p = processor(vec![]);
        assert!(matches!(
            p.process(b"definitely not an image"),
            Err(ProcessError::InvalidImage(_))
        ));
        assert!(matches!(p.process(&[]), Err(ProcessError::InvalidImage(_))));
    }
}
