use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facematch::{auth::TokenAuthority, config, server, store::EmbeddingStore, Pipeline};
use log::{info, warn};

#[derive(Parser)]
#[command(name = "facematch")]
#[command(version, about = "Face recognition service matching against enrolled embeddings")]
struct Cli {
    /// Config file (defaults to the compiled-in path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Address to listen on
        #[arg(short, long)]
        bind: Option<std::net::SocketAddr>,
        /// Directory of reference record JSON files
        #[arg(long)]
        vectors_dir: Option<PathBuf>,
    },
    /// Print a bearer token signed with the configured secret
    IssueToken {
        /// Subject recorded in the token
        #[arg(short, long)]
        subject: String,
        /// Lifetime in seconds (defaults to token_ttl_secs)
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind, vectors_dir } => {
            if let Some(bind) = bind {
                cfg.bind = bind;
            }
            if let Some(dir) = vectors_dir {
                cfg.vectors_dir = dir;
            }
            serve(cfg).await
        }
        Commands::IssueToken { subject, ttl_secs } => {
            let ttl = ttl_secs.unwrap_or(cfg.token_ttl_secs);
            let secret = cfg.resolved_secret().with_context(|| {
                format!("no token secret configured, set {}", config::JWT_SECRET_ENV)
            })?;
            let token = TokenAuthority::new(Some(secret.as_str()), ttl).issue(&subject)?;
            println!("{}", token);
            Ok(())
        }
    }
}

async fn serve(cfg: config::Config) -> Result<()> {
    cfg.validate()?;

    let store = Arc::new(EmbeddingStore::new(&cfg.vectors_dir, cfg.embedding_dim));
    let count = store
        .load()
        .with_context(|| format!("loading embeddings from {}", cfg.vectors_dir.display()))?;

    let pipeline = Pipeline::new(&cfg.model.paths(), cfg.model.detector_options())
        .context("Failed to initialize face recognition pipeline")?;

    let state = facematch::build_state(&cfg, store, Box::new(pipeline));
    if !state.tokens.is_configured() {
        warn!(
            "{} is not set, /api/recognize/secure will reject every request",
            config::JWT_SECRET_ENV
        );
    }

    info!("Known faces loaded: {}", count);
    info!("Authentication required: {}", cfg.require_auth);
    info!("Similarity threshold: {}", cfg.similarity_threshold);

    server::serve(cfg.bind, state, &cfg.cors_origin, cfg.max_body_bytes).await
}
