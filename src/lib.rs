pub mod auth;
pub mod config;
pub mod enroll;
pub mod error;
pub mod matcher;
pub mod processor;
pub mod server;
pub mod store;

// Re-export vision types for convenience
pub use facematch_vision::{
    face, pipeline, Detection, Embedding, FaceAnalyzer, FaceObservation, Pipeline,
};

use std::sync::Arc;

/// Wire the store, analyzer and token checker into router state.
pub fn build_state(
    cfg: &config::Config,
    store: Arc<store::EmbeddingStore>,
    analyzer: Box<dyn FaceAnalyzer>,
) -> server::AppState {
    let processor =
        processor::FrameProcessor::new(analyzer, store.clone(), cfg.similarity_threshold);
    let secret = cfg.resolved_secret();
    server::AppState {
        store,
        processor: Arc::new(processor),
        tokens: Arc::new(auth::TokenAuthority::new(
            secret.as_deref(),
            cfg.token_ttl_secs,
        )),
        require_auth: cfg.require_auth,
    }
}
