//! detect_streamd - live object-detection camera stream
//!
//! This daemon:
//! 1. Loads the detection model once (failure is fatal)
//! 2. Checks that the camera can be opened (failure is fatal)
//! 3. Serves annotated snapshots and a live multipart stream over HTTP
//! 4. Releases the camera on Ctrl-C before exiting
//!
//! With `--test` it runs one inference on the sample image and exits
//! 0 on success, 1 on failure.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};

use detect_stream::{load_detector, smoke, AppContext, HttpServer, StreamdConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "DETECT_STREAM_CONFIG")]
    config: Option<PathBuf>,
    /// Listen address, overriding the config file.
    #[arg(long)]
    addr: Option<String>,
    /// Load the model, run one inference on the sample image, and exit.
    #[arg(long)]
    test: bool,
    /// Sample image for --test.
    #[arg(long, value_name = "PATH")]
    sample_image: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = StreamdConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(sample) = args.sample_image {
        config.sample_image = sample;
    }

    let detector = load_detector(&config.detector).context("detector failed to load")?;

    if args.test {
        match smoke::run_smoke_test(detector.as_ref(), &config.sample_image) {
            Ok(_) => return Ok(()),
            Err(err) => {
                log::error!("smoke test failed: {}", err);
                std::process::exit(1);
            }
        }
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let context = Arc::new(AppContext::new(
        config.camera.clone(),
        config.stream.clone(),
        detector,
        shutdown,
    ));
    log::info!(
        "camera {} ({}x{} @ {} fps), policy {}",
        config.camera.device,
        config.camera.width,
        config.camera.height,
        config.camera.target_fps,
        context.policy().as_str()
    );
    context
        .camera()
        .check_available()
        .with_context(|| format!("camera {} unavailable at start-up", config.camera.device))?;
    let handle = HttpServer::new(config.server.clone(), context).spawn()?;
    log::info!("open http://{}/ to view the live stream", handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("detect_streamd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, releasing camera...");
    handle.stop()?;
    Ok(())
}
