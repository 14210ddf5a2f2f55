//! Parse and playback projection example
//!
//! Parses a few simulated sources with a timeout and a cancellation token,
//! then drives a state projector on a dedicated UI thread.
//!
//! Run with: cargo run -p mediabridge-core --example parse_media

use mediabridge_core::{
    CancellationToken, CoreConfig, DispatchQueue, MediaSource, ParseOptions, SimSource,
    SimulatedEngine, StateProjector,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    mediabridge_core::init();

    println!("MediaBridge Core - Parse Example");
    println!("================================\n");

    let engine = Arc::new(SimulatedEngine::new());
    engine.add_source("/music/album/01.flac", SimSource::audio(243_000, 2));
    engine.add_source("/music/album/02.flac", SimSource::never());

    let config = CoreConfig::from_json(r#"{"default_parse_timeout_ms": 500}"#)?;
    let queue = Arc::new(DispatchQueue::from_config(&config)?);
    let projector = StateProjector::builder(engine.clone())
        .config(config)
        .shared_scheduler(queue.clone())
        .build()?;

    projector.observe(|property| {
        println!("  [ui] {property} changed");
    });

    // Completes normally
    let media = projector.open(MediaSource::path("/music/album/01.flac")?)?;
    let outcome = media.parse_async(ParseOptions::new()).await?;
    println!("01.flac -> {outcome}, duration {:?}", media.duration()?);
    for track in media.tracks()? {
        println!("  track {} {:?} codec={}", track.id, track.track_type(), track.codec);
    }

    // Never completes: bounded by the configured timeout
    let stuck = projector.open(MediaSource::path("/music/album/02.flac")?)?;
    let outcome = stuck.parse_async(ParseOptions::new()).await?;
    println!("02.flac -> {outcome}");

    // Cancelled by the caller
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });
    let outcome = stuck
        .parse_async(ParseOptions::new().with_cancellation(token).with_timeout(Duration::from_secs(10)))
        .await?;
    println!("02.flac (cancelled) -> {outcome}");

    projector.attach_media(media)?;
    projector.play()?;
    projector.set_position(0.5)?;
    queue.flush();

    println!("\nSnapshot:\n{}", serde_json::to_string_pretty(&projector.snapshot()?)?);
    projector.dispose();
    Ok(())
}
