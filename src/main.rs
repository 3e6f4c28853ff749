//! Autoskip: find an intro marker frame in a media file

use std::path::PathBuf;

use autoskip::capture::{GstCapture, MediaSource};
use autoskip::{Config, Grabber, MarkerKind, SessionOutcome, SkipProfile};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "autoskip", version, about = "Locate intro marker frames in media")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode the media muted and stop at the first frame matching the reference
    Grab {
        /// Media file path or URI
        #[arg(short, long)]
        media: String,

        /// Encoded reference frame (JPEG or PNG), fitted to the analysis resolution
        #[arg(short, long)]
        reference: PathBuf,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Intro length in seconds, used to print the skip target
        #[arg(long)]
        intro_length: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("autoskip=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    match Cli::parse().command {
        Command::Grab {
            media,
            reference,
            config,
            intro_length,
        } => grab(media, reference, config, intro_length).await,
    }
}

async fn grab(
    media: String,
    reference: PathBuf,
    config: Option<PathBuf>,
    intro_length: Option<u32>,
) -> Result<()> {
    let config = Config::load(config.as_deref())?;
    let analysis = &config.analysis;

    let encoded = std::fs::read(&reference)
        .map_err(|e| eyre!("failed to read {}: {}", reference.display(), e))?;
    let mut profile = SkipProfile::new(media.clone(), Bytes::from(encoded));
    if let Some(seconds) = intro_length {
        profile.intro_min = seconds / 60;
        profile.intro_sec = seconds % 60;
    }
    let reference = profile
        .reference_image(MarkerKind::Intro, analysis.width, analysis.height)?
        .ok_or_else(|| eyre!("profile has no intro reference"))?;

    let engine = GstCapture::new(config.gstreamer.clone())?;
    let clock = engine.clock();
    let source = MediaSource::parse(&media);
    info!("Searching {} for {}", source, profile.name);

    let grabber = Grabber::new(config)?;
    let mut session = grabber.start(engine, &source, reference, clock)?;

    tokio::select! {
        found = session.match_found() => {
            if found.is_none() {
                info!("Session ended without a match");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping session");
            session.stop();
        }
    }

    let outcome = session.wait().await?;
    let stats = session.stats();
    info!(
        produced = stats.frames_produced,
        compared = stats.frames_compared,
        dropped = stats.frames_dropped,
        released = stats.buffers_released,
        "Session finished"
    );

    match outcome {
        SessionOutcome::Matched(found) => {
            println!("match at {} ms (difference {:.4})", found.timestamp_ms, found.difference);
            if intro_length.is_some() {
                println!("skip to {} ms", profile.skip_target(&found));
            }
            Ok(())
        }
        SessionOutcome::Cancelled => {
            println!("no match");
            Ok(())
        }
        SessionOutcome::Failed(err) => Err(eyre!("grab session failed: {}", err)),
    }
}
