//! annotate_still - run detection on one image file
//!
//! Writes the annotated picture as a JPEG and prints one line per detection.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use detect_stream::detect::load_detector;
use detect_stream::ingest::still::load_frame;
use detect_stream::{Annotator, JpegEncoder, Pipeline, StreamdConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image to run detection on.
    #[arg(long, default_value = "./dummy_image.jpg")]
    input: PathBuf,
    /// Where to write the annotated JPEG.
    #[arg(long, default_value = "./annotated.jpg")]
    output: PathBuf,
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "DETECT_STREAM_CONFIG")]
    config: Option<PathBuf>,
    /// Model artifact, overriding the config file.
    #[arg(long)]
    model: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = StreamdConfig::load_from(args.config.as_deref())?;
    if let Some(model) = args.model {
        config.detector.model_path = model;
    }
    let detector = load_detector(&config.detector).context("detector failed to load")?;
    let pipeline = Pipeline::new(
        detector,
        Annotator::default(),
        JpegEncoder::new(config.stream.jpeg_quality),
    );

    log::info!("performing detection on {}", args.input.display());
    let frame = load_frame(&args.input)?;
    let detections = pipeline.detect(&frame)?;
    for detection in &detections {
        let bbox = detection.bbox();
        println!(
            "{} at ({:.0}, {:.0})-({:.0}, {:.0})",
            detection.caption(),
            bbox.x1,
            bbox.y1,
            bbox.x2,
            bbox.y2
        );
    }
    let image = pipeline.render(frame, &detections)?;
    std::fs::write(&args.output, image.as_bytes())
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    log::info!(
        "{} detection(s), annotated image written to {}",
        detections.len(),
        args.output.display()
    );
    Ok(())
}
