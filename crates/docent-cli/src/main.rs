use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docent_core::{Catalog, EncodedImage, GeminiRecognizer, HttpTransport, ImageMime, Recognizer};
use docent_hw::{Camera, CapturePipeline, Settle, V4lSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod controller;
mod engine;
mod presenter;

use config::Config;
use presenter::Command;

#[derive(Parser)]
#[command(name = "docent", about = "Docent AR museum guide")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the interactive tour (default)
    Tour,
    /// Identify a single image file (JPEG/PNG/WebP, or a data-URL text file)
    Identify {
        /// Image to send to the recognizer
        path: PathBuf,
    },
    /// List catalog artifacts
    Catalog,
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics
    Test {
        /// Write the encoded snapshot here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command.unwrap_or(Commands::Tour) {
        Commands::Tour => tour(&config).await,
        Commands::Identify { path } => identify(&config, &path).await,
        Commands::Catalog => list_catalog(&config),
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
            Ok(())
        }
        Commands::Test { output } => camera_test(&config, output.as_deref()),
    }
}

fn build_recognizer(config: &Config, api_key: &str, catalog: Arc<Catalog>) -> Result<GeminiRecognizer> {
    let transport = HttpTransport::new(&config.api_base, &config.model, api_key)
        .context("failed to build HTTP client")?;
    tracing::info!(url = transport.url(), "recognizer configured");
    Ok(GeminiRecognizer::new(transport, catalog))
}

async fn tour(config: &Config) -> Result<()> {
    let api_key = config.api_key()?;
    let catalog = Arc::new(config.load_catalog()?);
    let recognizer: Arc<dyn Recognizer> = Arc::new(build_recognizer(config, api_key, catalog.clone())?);

    let source = V4lSource::new(&config.camera_device);
    let pipeline = CapturePipeline::new(Box::new(source))
        .with_resolution(config.resolution())
        .with_jpeg_quality(config.jpeg_quality)
        .with_warmup_frames(config.warmup_frames);
    let camera = engine::spawn_camera(pipeline).context("failed to spawn camera thread")?;

    tracing::info!(
        device = %config.camera_device,
        artifacts = catalog.len(),
        "docent starting"
    );

    let (handle, task) = controller::spawn(catalog.clone(), camera, recognizer);
    let screen = tokio::spawn(presenter::run(handle.subscribe(), catalog));

    // Stdin is read off the runtime so ctrl-c never waits on a pending read.
    let mut lines = presenter::spawn_line_reader(std::io::BufReader::new(std::io::stdin()))
        .context("failed to spawn input thread")?;
    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match presenter::parse_command(&line) {
            Some(Command::Event(event)) => {
                if !handle.send(event).await {
                    break;
                }
            }
            Some(Command::Help) => println!("{}", presenter::HELP),
            Some(Command::Quit) => break,
            None if line.trim().is_empty() => {}
            None => println!("unknown command: {}  ({})", line.trim(), presenter::HELP),
        }
    }

    tracing::info!("docent shutting down");
    handle.shutdown().await;
    drop(handle);
    task.await?;
    screen.await?;
    Ok(())
}

async fn identify(config: &Config, path: &Path) -> Result<()> {
    let api_key = config.api_key()?;
    let catalog = Arc::new(config.load_catalog()?);
    let image = read_image(path)?;
    let recognizer = build_recognizer(config, api_key, catalog.clone())?;

    let verdict = recognizer.identify(&image).await;
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    if let Some(artifact) = verdict.artifact_id.as_deref().and_then(|id| catalog.lookup(id)) {
        println!("{} ({}): {}", artifact.name, artifact.year, artifact.short_description);
    }
    Ok(())
}

/// Load an image file; text files holding a data URL or bare base64 are decoded.
fn read_image(path: &Path) -> Result<EncodedImage> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    if let Some(mime) = ImageMime::from_extension(ext) {
        return Ok(EncodedImage { mime, bytes });
    }
    let text = String::from_utf8(bytes).context("not an image file or data URL")?;
    Ok(EncodedImage::from_data_url(&text)?)
}

fn list_catalog(config: &Config) -> Result<()> {
    let catalog = config.load_catalog()?;
    println!("{}: {}", catalog.museum().name, catalog.museum().tagline);
    for a in catalog.artifacts() {
        println!("{:<18} {:<5} {:<9} {}", a.id, a.year, a.kind, a.name);
    }
    Ok(())
}

/// Direct camera test, bypassing the controller.
fn camera_test(config: &Config, output: Option<&Path>) -> Result<()> {
    println!("Running camera diagnostics on {}...", config.camera_device);
    let mut camera = Camera::open(&config.camera_device, config.resolution())?;
    let requested = config.resolution();
    println!(
        "requested {}x{}, delivered {}x{} ({:?})",
        requested.width, requested.height, camera.width, camera.height, camera.fourcc
    );

    let frame = camera.capture_frame(&Settle::warmup(config.warmup_frames))?;
    let image = frame.encode_jpeg(config.jpeg_quality)?;
    println!(
        "frame #{}: brightness {:.1}, JPEG q{} = {} bytes",
        frame.sequence,
        frame.avg_brightness(),
        config.jpeg_quality,
        image.bytes.len()
    );

    if let Some(path) = output {
        std::fs::write(path, &image.bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("snapshot written to {}", path.display());
    }

    docent_hw::CameraStream::stop(&mut camera);
    Ok(())
}
