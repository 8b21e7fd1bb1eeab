use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{error::ErrorKind, Parser};
use facematch::{
    config,
    enroll::{self, Identity},
    Pipeline,
};
use log::info;

#[derive(Parser)]
#[command(name = "facematch-enroll")]
#[command(version, about = "Convert one reference photo into an embedding record")]
struct Cli {
    /// Photo containing exactly one face
    image: PathBuf,

    /// Directory the record is written to
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Name of the person (prompted for when absent)
    #[arg(long)]
    name: Option<String>,

    /// Relationship to the user (prompted for when absent)
    #[arg(long)]
    relationship: Option<String>,

    /// Config file for model paths and embedding size
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            let _ = e.print();
            eprintln!("Usage: facematch-enroll <image_path>");
            std::process::exit(1);
        }
    };

    let cfg = config::load_config(cli.config.as_deref())?;
    let mut pipeline = Pipeline::new(&cfg.model.paths(), cfg.model.detector_options())
        .context("Failed to initialize face recognition pipeline")?;

    info!("Processing image {}", cli.image.display());
    let (name, relationship) = (cli.name, cli.relationship);
    let path = enroll::enroll(
        &mut pipeline,
        &cli.image,
        cfg.embedding_dim,
        &cli.output,
        move || {
            let stdin = io::stdin();
            let mut input = stdin.lock();
            let mut out = io::stdout();
            let name = match name {
                Some(n) => n,
                None => enroll::prompt("Enter name: ", &mut input, &mut out)?,
            };
            let relationship = match relationship {
                Some(r) => r,
                None => enroll::prompt("Enter relationship: ", &mut input, &mut out)?,
            };
            out.flush()?;
            Ok(Identity { name, relationship })
        },
    )
    .context("Enrollment failed")?;

    println!("Saved: {}", path.display());
    Ok(())
}
