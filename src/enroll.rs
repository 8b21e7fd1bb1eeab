//! Turn one reference photo into a record file.
//!
//! Enrollment is strict: the photo must contain exactly one detected face,
//! otherwise the identity would be ambiguous and nothing is written.

use crate::store::RecordFile;
use facematch_vision::{Embedding, FaceAnalyzer};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnrollError {
    #[error("failed to load image {path}: {source}")]
    UnreadableImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("No face detected")]
    NoFace,
    #[error("Multiple faces detected ({0}). Use a single face image.")]
    MultipleFaces(usize),
    #[error("face analysis failed: {0:#}")]
    Analyzer(anyhow::Error),
    #[error("model produced a {actual}-dim embedding, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("name must not be empty")]
    EmptyName,
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl EnrollError {
    /// Zero or several faces: the photo itself is unusable.
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, Self::NoFace | Self::MultipleFaces(_))
    }
}

/// Who the enrolled face belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub relationship: String,
}

/// Short random id: the first eight hex digits of a v4 UUID.
pub fn new_record_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Embed the single face in the image at `path`.
pub fn embed_single_face(
    analyzer: &mut dyn FaceAnalyzer,
    path: &Path,
) -> Result<Embedding, EnrollError> {
    let img = image::open(path).map_err(|source| EnrollError::UnreadableImage {
        path: path.to_path_buf(),
        source,
    })?;

    let mut faces = analyzer.analyze(&img).map_err(EnrollError::Analyzer)?;
    match faces.len() {
        0 => Err(EnrollError::NoFace),
        1 => {
            let face = faces.remove(0);
            log::info!(
                "face found at {:?} (score {:.3})",
                face.detection.corners(),
                face.detection.score
            );
            Embedding::from_raw(face.embedding.to_vec()).ok_or_else(|| {
                EnrollError::Analyzer(anyhow::anyhow!("model produced a zero embedding"))
            })
        }
        n => Err(EnrollError::MultipleFaces(n)),
    }
}

/// Write `record` as pretty JSON to `<dir>/<id>.json`.
pub fn write_record(dir: &Path, record: &RecordFile) -> Result<PathBuf, EnrollError> {
    std::fs::create_dir_all(dir).map_err(|source| EnrollError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(format!("{}.json", record.id));
    let data = serde_json::to_string_pretty(record)?;
    std::fs::write(&path, data).map_err(|source| EnrollError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Full enrollment flow. `identify` is asked for the name and relationship
/// only after the photo has passed the single-face check.
pub fn enroll(
    analyzer: &mut dyn FaceAnalyzer,
    image_path: &Path,
    expected_dim: usize,
    output_dir: &Path,
    identify: impl FnOnce() -> std::io::Result<Identity>,
) -> Result<PathBuf, EnrollError> {
    let embedding = embed_single_face(analyzer, image_path)?;
    if embedding.dim() != expected_dim {
        return Err(EnrollError::DimensionMismatch {
            expected: expected_dim,
            actual: embedding.dim(),
        });
    }

    let identity = identify().map_err(|source| EnrollError::Io {
        path: PathBuf::from("<stdin>"),
        source,
    })?;
    let name = identity.name.trim();
    if name.is_empty() {
        return Err(EnrollError::EmptyName);
    }

    let record = RecordFile {
        id: new_record_id(),
        name: name.to_string(),
        relationship: Some(identity.relationship.trim().to_string()),
        relation: None,
        embedding_dim: Some(embedding.dim()),
        embedding: embedding.to_vec(),
    };
    write_record(output_dir, &record)
}

/// Print `label` and read one trimmed line.
pub fn prompt(
    label: &str,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> std::io::Result<String> {
    write!(output, "{}", label)?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}
