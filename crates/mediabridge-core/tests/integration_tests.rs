//! Integration tests for MediaBridge Core

use anyhow::Result;
use mediabridge_core::{
    CancellationToken, DispatchQueue, Error, Event, EventKind, HandleKind, Instance, Media,
    MediaSource, MetadataKey, ParseBehavior, ParseOptions, ParseOutcome, ParsedStatus, Property,
    SimSource, SimulatedEngine, StateProjector, TrackType,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup() -> (Arc<SimulatedEngine>, Instance) {
    init_tracing();
    let engine = Arc::new(SimulatedEngine::new());
    let instance = Instance::new(engine.clone()).expect("instance");
    (engine, instance)
}

// =============================================================================
// Parse Coordinator Tests
// =============================================================================

#[tokio::test]
async fn test_local_sources_parse_with_duration_and_tracks() -> Result<()> {
    let (engine, instance) = setup();
    let sources = [
        ("/library/a.mp3", SimSource::audio(215_000, 2)),
        ("/library/b.flac", SimSource::audio(61_000, 6)),
        ("/library/c.ogg", SimSource::audio(5_000, 1)),
    ];

    for (path, source) in sources {
        engine.add_source(path, source);
        let media = Media::from_path(&instance, path)?;
        let outcome = media
            .parse_async(ParseOptions::new().with_timeout(Duration::from_secs(5)))
            .await?;

        assert_eq!(outcome, ParseOutcome::Done, "{path}");
        assert!(media.duration()?.is_some_and(|d| d > Duration::ZERO));
        let tracks = media.tracks()?;
        assert!(!tracks.is_empty());
        assert_eq!(tracks[0].track_type(), TrackType::Audio);
    }
    assert_eq!(engine.live_callbacks(), 0);
    Ok(())
}

#[tokio::test]
async fn test_already_cancelled_is_ready_without_native_call() -> Result<()> {
    let (engine, instance) = setup();
    let media = Media::from_path(&instance, "/library/a.mp3")?;
    let token = CancellationToken::new();
    token.cancel();

    let mut parse = tokio_test::task::spawn(media.parse_async(ParseOptions::new().with_cancellation(token)));
    let outcome = tokio_test::assert_ready!(parse.poll())?;

    assert_eq!(outcome, ParseOutcome::Cancelled);
    assert!(!outcome.is_success());
    assert_eq!(engine.start_parse_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_cancel_after_delivered_completion_keeps_completion() -> Result<()> {
    let (engine, instance) = setup();
    engine.add_source("/library/slow.mkv", SimSource::never());
    let media = Media::from_path(&instance, "/library/slow.mkv")?;
    let raw = media.handle().raw();
    let token = CancellationToken::new();

    let mut parse = tokio_test::task::spawn(media.parse_async(ParseOptions::new().with_cancellation(token.clone())));
    tokio_test::assert_pending!(parse.poll());
    assert_eq!(engine.start_parse_count(), 1);

    engine.fire(raw, Event::ParsedChanged { status: ParsedStatus::Done });
    token.cancel();
    let outcome = tokio_test::assert_ready!(parse.poll())?;

    assert_eq!(outcome, ParseOutcome::Done);
    assert_eq!(engine.stop_parse_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_timeout_bounds() -> Result<()> {
    let (engine, instance) = setup();
    engine.add_source("/library/hang.ts", SimSource::never());
    let media = Media::from_path(&instance, "/library/hang.ts")?;
    let timeout = Duration::from_millis(100);

    let start = Instant::now();
    let outcome = media.parse_async(ParseOptions::new().with_timeout(timeout)).await?;
    let elapsed = start.elapsed();

    assert_eq!(outcome, ParseOutcome::Timeout);
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_secs(2), "took {elapsed:?}");
    assert_eq!(engine.stop_parse_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_outcomes_stay_distinct() -> Result<()> {
    let (engine, instance) = setup();
    engine.add_source(
        "/library/bad.bin",
        SimSource::default().with_parse(ParseBehavior::Complete {
            status: ParsedStatus::Failed,
            delay: Duration::from_millis(5),
        }),
    );
    engine.add_source("/library/hang.ts", SimSource::never());

    let failed = Media::from_path(&instance, "/library/bad.bin")?
        .parse_async(ParseOptions::new())
        .await?;

    let hang = Media::from_path(&instance, "/library/hang.ts")?;
    let timed_out = hang
        .parse_async(ParseOptions::new().with_timeout(Duration::from_millis(20)))
        .await?;

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });
    let cancelled = hang
        .parse_async(ParseOptions::new().with_cancellation(token))
        .await?;

    assert_eq!(failed, ParseOutcome::Failed);
    assert_eq!(timed_out, ParseOutcome::Timeout);
    assert_eq!(cancelled, ParseOutcome::Cancelled);
    assert_eq!(hang.parsed_status()?, ParsedStatus::Cancelled);
    Ok(())
}

#[tokio::test]
async fn test_rejected_start_settles_failed() -> Result<()> {
    let (engine, instance) = setup();
    engine.add_source("/library/locked.mkv", SimSource::default().with_parse(ParseBehavior::Reject));
    let media = Media::from_path(&instance, "/library/locked.mkv")?;

    let outcome = media.parse_async(ParseOptions::new()).await?;
    assert_eq!(outcome, ParseOutcome::Failed);
    assert_eq!(engine.live_callbacks(), 0);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_parses_on_different_media() -> Result<()> {
    let (_engine, instance) = setup();
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let instance = instance.clone();
            tokio::spawn(async move {
                let media = Media::from_path(&instance, format!("/library/{i}.mp3"))?;
                media.parse_async(ParseOptions::new()).await
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await??, ParseOutcome::Done);
    }
    Ok(())
}

// =============================================================================
// Handle Lifecycle Tests
// =============================================================================

#[test]
fn test_duplicate_is_valid_distinct_and_independent() -> Result<()> {
    let (engine, instance) = setup();
    let media = Media::from_path(&instance, "/library/a.mp3")?;
    let copy = media.duplicate()?;

    assert!(copy.handle().is_valid());
    assert_ne!(copy.handle().raw(), media.handle().raw());

    let copy_raw = copy.handle().raw();
    copy.release();
    assert!(media.handle().is_valid());
    assert_eq!(media.parsed_status()?, ParsedStatus::NotParsed);
    assert_eq!(engine.release_count(copy_raw), 1);
    Ok(())
}

#[test]
fn test_create_rejects_absent_instance_and_empty_sources() {
    let (engine, instance) = setup();
    assert!(matches!(Media::from_stream(&instance, Vec::new()), Err(Error::InvalidArgument(_))));

    instance.release();
    assert!(matches!(
        Media::new(&instance, MediaSource::path("/library/a.mp3").unwrap()),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(engine.open_count(), 0);
}

#[test]
fn test_released_media_fails_with_disposed() {
    let (_engine, instance) = setup();
    let media = Media::from_location(&instance, "https://example.com/live.m3u8").unwrap();
    media.release();
    media.release();

    let err = media.duration().unwrap_err();
    assert!(matches!(err, Error::Disposed { kind: HandleKind::Media }));
    assert_eq!(err.error_code(), "DISPOSED");
}

// =============================================================================
// Metadata Tests
// =============================================================================

#[test]
fn test_set_save_read_metadata() -> Result<()> {
    let (engine, instance) = setup();
    let media = Media::from_path(&instance, "/library/show.mkv")?;

    media.set_meta(MetadataKey::ShowName, "test")?;
    assert!(media.save_meta()?);
    assert_eq!(media.meta(MetadataKey::ShowName)?.as_deref(), Some("test"));
    assert_eq!(
        engine.saved_meta(media.handle().raw(), MetadataKey::ShowName).as_deref(),
        Some("test")
    );
    Ok(())
}

#[tokio::test]
async fn test_parse_reveals_metadata() -> Result<()> {
    let (engine, instance) = setup();
    engine.add_source(
        "/library/tagged.mp3",
        SimSource::audio(3_000, 2)
            .with_meta(MetadataKey::Title, "Tagged")
            .with_meta(MetadataKey::Artist, "Someone"),
    );
    let media = Media::from_path(&instance, "/library/tagged.mp3")?;
    assert_eq!(media.meta(MetadataKey::Title)?, None);

    media.parse_async(ParseOptions::new()).await?;
    assert_eq!(media.meta(MetadataKey::Title)?.as_deref(), Some("Tagged"));
    assert_eq!(media.meta(MetadataKey::Artist)?.as_deref(), Some("Someone"));
    Ok(())
}

// =============================================================================
// Event Bridge Tests
// =============================================================================

#[test]
fn test_native_thread_delivery() {
    let (engine, instance) = setup();
    let media = Media::from_path(&instance, "/library/a.mp3").unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let sub = media
        .subscribe(EventKind::MediaMetaChanged, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let raw = media.handle().raw();
    let workers: Vec<_> = (0..4)
        .map(|_| engine.fire_from_thread(raw, Event::MetaChanged { key: MetadataKey::Album }))
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(hits.load(Ordering::SeqCst), 4);

    assert!(media.unsubscribe(&sub));
    assert!(!media.unsubscribe(&sub));
    assert_eq!(engine.live_callbacks(), 0);
}

// =============================================================================
// State Projector Tests
// =============================================================================

#[test]
fn test_projector_swap_has_no_stray_notifications() -> Result<()> {
    init_tracing();
    let engine = Arc::new(SimulatedEngine::new());
    let queue = Arc::new(DispatchQueue::new("it-ui")?);
    let projector = StateProjector::builder(engine.clone())
        .shared_scheduler(queue.clone())
        .build()?;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    projector.observe(move |property| sink.lock().push(property));

    let first = projector.open(MediaSource::path("/library/a.mp3")?)?;
    let first_raw = first.handle().raw();
    let second = projector.open(MediaSource::path("/library/b.mp3")?)?;
    assert!(queue.flush());
    seen.lock().clear();

    assert_eq!(engine.fire(first_raw, Event::DurationChanged { duration_ms: 10 }), 0);
    engine.fire(second.handle().raw(), Event::ParsedChanged { status: ParsedStatus::Done });
    assert!(queue.flush());

    assert_eq!(*seen.lock(), vec![Property::MediaParsedStatus]);
    Ok(())
}

#[test]
fn test_projector_notifications_on_scheduler_thread() -> Result<()> {
    init_tracing();
    let engine = Arc::new(SimulatedEngine::new());
    let queue = Arc::new(DispatchQueue::new("it-ui")?);
    let projector = StateProjector::builder(engine.clone())
        .shared_scheduler(queue.clone())
        .build()?;

    let threads = Arc::new(Mutex::new(Vec::new()));
    let sink = threads.clone();
    projector.observe(move |property| sink.lock().push((property, std::thread::current().id())));

    let media = projector.open(MediaSource::path("/library/a.mp3")?)?;
    let player = projector.session().handle().raw();
    let native_threads: Vec<_> = [
        engine.fire_from_thread(player, Event::PositionChanged { position: 0.25 }),
        engine.fire_from_thread(player, Event::Buffering { cache: 80.0 }),
        engine.fire_from_thread(media.handle().raw(), Event::DurationChanged { duration_ms: 9_000 }),
    ]
    .into_iter()
    .map(|worker| {
        let id = worker.thread().id();
        worker.join().unwrap();
        id
    })
    .collect();
    assert!(queue.flush());

    let threads = threads.lock();
    assert_eq!(threads.len(), 4);
    for (_, thread) in threads.iter() {
        assert_eq!(*thread, queue.thread_id());
        assert!(!native_threads.contains(thread));
    }
    assert_eq!(projector.buffering(), 80.0);
    Ok(())
}

#[tokio::test]
async fn test_projector_tracks_parse() -> Result<()> {
    init_tracing();
    let engine = Arc::new(SimulatedEngine::new());
    engine.add_source("/library/a.mp3", SimSource::audio(42_000, 2));
    let queue = Arc::new(DispatchQueue::new("it-ui")?);
    let projector = StateProjector::builder(engine.clone())
        .shared_scheduler(queue.clone())
        .build()?;

    let media = projector.open(MediaSource::path("/library/a.mp3")?)?;
    assert_eq!(media.parse_async(ParseOptions::new()).await?, ParseOutcome::Done);
    assert!(queue.flush());

    assert_eq!(projector.media_parsed_status()?, ParsedStatus::Done);
    assert_eq!(projector.duration_ms()?, Some(42_000));
    Ok(())
}

#[test]
fn test_projector_double_dispose() -> Result<()> {
    init_tracing();
    let engine = Arc::new(SimulatedEngine::new());
    let projector = StateProjector::builder(engine.clone())
        .scheduler(|work: mediabridge_core::UnitOfWork| work())
        .build()?;
    let player = projector.session().handle().raw();

    projector.dispose();
    projector.dispose();
    drop(projector);
    assert_eq!(engine.release_count(player), 1);
    Ok(())
}
