use anyhow::{bail, Context, Result};
use facematch_vision::{DetectorOptions, ModelPaths};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEMATCH_CONFIG_PATH").unwrap_or("facematch.toml"))
});

/// Environment variable holding the token signing secret.
pub const JWT_SECRET_ENV: &str = "FACEMATCH_JWT_SECRET";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind: SocketAddr,
    /// Directory of reference record JSON files.
    pub vectors_dir: PathBuf,
    pub similarity_threshold: f32,
    /// Gate `/api/recognize` behind a bearer token as well.
    pub require_auth: bool,
    /// The single origin allowed by CORS.
    pub cors_origin: String,
    pub embedding_dim: usize,
    /// HS256 secret; `FACEMATCH_JWT_SECRET` takes precedence.
    pub jwt_secret: Option<String>,
    pub token_ttl_secs: u64,
    /// Upper bound on request bodies; base64 photos are large.
    pub max_body_bytes: usize,
    pub model: ModelConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5000)),
            vectors_dir: PathBuf::from("vectors"),
            similarity_threshold: 0.3,
            require_auth: false,
            cors_origin: "http://localhost:3000".to_string(),
            embedding_dim: 512,
            jwt_secret: None,
            token_ttl_secs: 24 * 60 * 60,
            max_body_bytes: 16 * 1024 * 1024,
            model: ModelConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub detector_path: PathBuf,
    pub recognizer_path: PathBuf,
    pub detection_size: u32,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let paths = ModelPaths::default();
        let options = DetectorOptions::default();
        Self {
            detector_path: paths.detector,
            recognizer_path: paths.recognizer,
            detection_size: options.input_size,
            score_threshold: options.score_threshold,
            nms_threshold: options.nms_threshold,
        }
    }
}

impl ModelConfig {
    pub fn paths(&self) -> ModelPaths {
        ModelPaths {
            detector: self.detector_path.clone(),
            recognizer: self.recognizer_path.clone(),
        }
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            input_size: self.detection_size,
            score_threshold: self.score_threshold,
            nms_threshold: self.nms_threshold,
        }
    }
}

impl Config {
    /// Secret used to sign and verify tokens, if any is configured.
    pub fn resolved_secret(&self) -> Option<String> {
        std::env::var(JWT_SECRET_ENV)
            .ok()
            .or_else(|| self.jwt_secret.clone())
            .filter(|s| !s.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            bail!(
                "similarity_threshold must be within [-1, 1], got {}",
                self.similarity_threshold
            );
        }
        if self.embedding_dim == 0 {
            bail!("embedding_dim must be positive");
        }
        // YuNet's coarsest stride is 32
        if self.model.detection_size == 0 || self.model.detection_size % 32 != 0 {
            bail!(
                "model.detection_size must be a positive multiple of 32, got {}",
                self.model.detection_size
            );
        }
        if self.require_auth && self.resolved_secret().is_none() {
            bail!(
                "require_auth is enabled but no token secret is set (use {} or jwt_secret)",
                JWT_SECRET_ENV
            );
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}
