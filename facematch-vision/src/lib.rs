pub mod face;
pub mod model;
pub mod pipeline;
pub mod yunet;

// Re-export commonly used types
pub use face::{match_embedding, Detection, Embedding};
pub use model::ModelPaths;
pub use pipeline::{DetectorOptions, FaceAnalyzer, FaceObservation, Pipeline};
