//! Parse as a future
//!
//! Converts the engine's "start parsing, report completion through a
//! parsed-changed callback" protocol into one awaitable result bounded by an
//! optional timeout and an optional cancellation token.
//!
//! ```text
//!   Idle ──start──▶ Parsing ──┬── parsed-changed(Done)   ──▶ Done
//!                             ├── parsed-changed(Failed) ──▶ Failed
//!                             ├── local timer            ──▶ Timeout   (+ stop-parse)
//!                             └── token cancelled        ──▶ Cancelled (+ stop-parse)
//! ```
//!
//! All three triggers race for one [`Settlement`]; whichever settles first
//! decides the outcome and the rest are no-ops. The parsed-changed
//! subscription is registered before the native start call and removed on
//! every exit path, including the caller dropping the future.

use crate::{
    completion::Settlement,
    event::{Event, EventKind, Subscription},
    media::Media,
    types::*,
    Error, Result,
};
use parking_lot::Mutex;
use std::future::pending;
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Options for [`Media::parse_async`]
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Native parse flags; the instance configuration supplies the default
    pub flags: Option<ParseFlags>,
    /// Upper bound on the wait; the instance configuration supplies the default
    pub timeout: Option<Duration>,
    /// Cooperative cancellation
    pub cancellation: Option<CancellationToken>,
}

impl ParseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flags(mut self, flags: ParseFlags) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// One in-flight parse. Dropping it removes the subscription and, if
/// nothing has settled yet, settles `Cancelled` and stops the native parse.
struct InFlight<'a> {
    media: &'a Media,
    raw: RawHandle,
    slot: Arc<Settlement<ParseOutcome>>,
    subscription: Option<Subscription>,
}

impl InFlight<'_> {
    /// Settle from the coordinator's own side (timer or token). Only the
    /// winner stops the native parse.
    fn settle_locally(&self, outcome: ParseOutcome) {
        if self.slot.try_settle(outcome) {
            self.media.engine().stop_parse(self.raw);
            info!(handle = %self.raw, outcome = %outcome, "Parse settled locally, native parse stopped");
        } else {
            debug!(handle = %self.raw, attempted = %outcome, "Parse already settled");
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.slot.try_settle(ParseOutcome::Cancelled) {
            self.media.engine().stop_parse(self.raw);
            self.media.set_local_status(Some(ParsedStatus::Cancelled));
            debug!(handle = %self.raw, "Parse abandoned by caller");
        }
        if let Some(subscription) = self.subscription.take() {
            self.media.bridge().unsubscribe(&subscription);
        }
    }
}

/// Parse a media and wait for one terminal outcome.
///
/// `Err` is reserved for synchronous failures (a released media, a failed
/// subscription). Native failure, timeout and cancellation are `Ok`
/// outcomes.
#[instrument(skip(media, options), fields(handle = %media.handle().raw()))]
pub async fn parse_async(media: &Media, options: ParseOptions) -> Result<ParseOutcome> {
    let raw = media.handle().get()?;
    let config = media.instance().config();
    let flags = options.flags.unwrap_or(config.parse_flags);
    let timeout = options.timeout.or_else(|| config.default_parse_timeout());

    if options.cancellation.as_ref().is_some_and(|token| token.is_cancelled()) {
        debug!("Cancellation requested before parse start");
        media.set_local_status(Some(ParsedStatus::Cancelled));
        return Ok(ParseOutcome::Cancelled);
    }

    media.set_local_status(None);
    let slot = Arc::new(Settlement::new());

    let sink = Arc::clone(&slot);
    let subscription = media
        .bridge()
        .subscribe(raw, EventKind::MediaParsedChanged, move |event| {
            if let Event::ParsedChanged { status } = event {
                if let Some(outcome) = ParseOutcome::from_status(*status) {
                    sink.try_settle(outcome);
                }
            }
        })?;

    let in_flight = InFlight {
        media,
        raw,
        slot: Arc::clone(&slot),
        subscription: Some(subscription),
    };

    let native_timeout = if config.forward_timeout_to_engine {
        timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
    } else {
        None
    };

    debug!(flags = flags.bits(), timeout_ms = ?timeout.map(|t| t.as_millis()), "Starting parse");
    if let Err(err) = media.engine().start_parse(raw, flags, native_timeout) {
        warn!(error = %err, "Native parse did not start");
        slot.try_settle(ParseOutcome::Failed);
    }

    let timer = async {
        match timeout {
            Some(duration) => tokio::time::sleep(duration).await,
            None => pending().await,
        }
    };
    let cancelled = async {
        match &options.cancellation {
            Some(token) => token.cancelled().await,
            None => pending().await,
        }
    };

    // A settlement already delivered wins over a timer or token that
    // becomes ready in the same poll.
    tokio::select! {
        biased;
        _ = slot.wait() => {}
        _ = cancelled => in_flight.settle_locally(ParseOutcome::Cancelled),
        _ = timer => in_flight.settle_locally(ParseOutcome::Timeout),
    }

    let outcome = slot.wait().await;
    drop(in_flight);

    if matches!(outcome, ParseOutcome::Timeout | ParseOutcome::Cancelled) {
        media.set_local_status(Some(outcome.into()));
    }
    info!(outcome = %outcome, "Parse settled");
    Ok(outcome)
}

/// Parse on the calling thread and block until the engine reports a
/// terminal status. No timeout, no cancellation.
#[instrument(skip(media), fields(handle = %media.handle().raw()))]
pub fn parse_blocking(media: &Media, flags: ParseFlags) -> Result<ParsedStatus> {
    let raw = media.handle().get()?;
    if tokio::runtime::Handle::try_current().is_ok() {
        warn!("Blocking parse called from inside an async runtime");
    }
    media.set_local_status(None);

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let subscription = media
        .bridge()
        .subscribe(raw, EventKind::MediaParsedChanged, move |event| {
            if let Event::ParsedChanged { status } = event {
                if status.is_terminal() {
                    let _ = tx.lock().send(*status);
                }
            }
        })?;

    let result = media
        .engine()
        .start_parse(raw, flags, None)
        // The sender only disappears when the handle is released under us
        .and_then(|_| rx.recv().map_err(|_| Error::Disposed { kind: HandleKind::Media }));

    media.bridge().unsubscribe(&subscription);
    let status = result?;
    info!(status = %status, "Blocking parse finished");
    Ok(status)
}

impl Media {
    /// Parse and wait for one terminal outcome. See [`parse_async`].
    pub async fn parse_async(&self, options: ParseOptions) -> Result<ParseOutcome> {
        parse_async(self, options).await
    }

    /// Blocking parse with the instance's default flags. See [`parse_blocking`].
    pub fn parse(&self) -> Result<ParsedStatus> {
        parse_blocking(self, self.instance().config().parse_flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Instance;
    use crate::sim::{ParseBehavior, SimSource, SimulatedEngine};
    use std::time::Instant;

    fn setup(path: &str, source: SimSource) -> (Arc<SimulatedEngine>, Media) {
        let engine = Arc::new(SimulatedEngine::new());
        engine.add_source(path, source);
        let instance = Instance::new(engine.clone()).unwrap();
        let media = Media::from_path(&instance, path).unwrap();
        (engine, media)
    }

    #[tokio::test]
    async fn test_parse_done() {
        let (engine, media) = setup("/media/song.mp3", SimSource::audio(180_000, 2));
        let outcome = media.parse_async(ParseOptions::new()).await.unwrap();

        assert_eq!(outcome, ParseOutcome::Done);
        assert!(outcome.is_success());
        assert!(media.is_parsed().unwrap());
        assert_eq!(media.duration().unwrap(), Some(Duration::from_millis(180_000)));
        assert_eq!(media.tracks().unwrap()[0].channels(), Some(2));
        assert_eq!(engine.live_callbacks(), 0);
    }

    #[tokio::test]
    async fn test_parse_failed() {
        let source = SimSource {
            parse: ParseBehavior::Complete {
                status: ParsedStatus::Failed,
                delay: Duration::from_millis(5),
            },
            ..SimSource::default()
        };
        let (engine, media) = setup("/media/broken.bin", source);
        let outcome = media.parse_async(ParseOptions::new()).await.unwrap();

        assert_eq!(outcome, ParseOutcome::Failed);
        assert_eq!(media.parsed_status().unwrap(), ParsedStatus::Failed);
        assert_eq!(engine.stop_parse_count(), 0);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_starts() {
        let (engine, media) = setup("/media/song.mp3", SimSource::audio(1_000, 1));
        let token = CancellationToken::new();
        token.cancel();

        let outcome = media
            .parse_async(ParseOptions::new().with_cancellation(token))
            .await
            .unwrap();

        assert_eq!(outcome, ParseOutcome::Cancelled);
        assert_eq!(engine.start_parse_count(), 0);
        assert_eq!(engine.live_callbacks(), 0);
        assert_eq!(media.parsed_status().unwrap(), ParsedStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_timeout_stops_native_parse_once() {
        let (engine, media) = setup("/media/stuck.ts", SimSource::never());
        let timeout = Duration::from_millis(60);
        let start = Instant::now();

        let outcome = media
            .parse_async(ParseOptions::new().with_timeout(timeout))
            .await
            .unwrap();

        assert_eq!(outcome, ParseOutcome::Timeout);
        assert!(start.elapsed() >= timeout);
        assert_eq!(engine.stop_parse_count(), 1);
        assert_eq!(engine.live_callbacks(), 0);
        assert_eq!(media.parsed_status().unwrap(), ParsedStatus::Timeout);
    }

    #[tokio::test]
    async fn test_cancel_mid_parse() {
        let (engine, media) = setup("/media/stuck.ts", SimSource::never());
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = media
            .parse_async(ParseOptions::new().with_cancellation(token))
            .await
            .unwrap();

        assert_eq!(outcome, ParseOutcome::Cancelled);
        assert_eq!(engine.start_parse_count(), 1);
        assert_eq!(engine.stop_parse_count(), 1);
        assert_eq!(engine.live_callbacks(), 0);
    }

    #[tokio::test]
    async fn test_completion_beats_later_timeout() {
        let (engine, media) = setup("/media/song.mp3", SimSource::audio(2_000, 2));
        let outcome = media
            .parse_async(ParseOptions::new().with_timeout(Duration::from_secs(5)))
            .await
            .unwrap();

        assert_eq!(outcome, ParseOutcome::Done);
        assert_eq!(engine.stop_parse_count(), 0);
    }

    #[tokio::test]
    async fn test_config_default_timeout_applies() {
        let engine = Arc::new(SimulatedEngine::new());
        engine.add_source("/media/stuck.ts", SimSource::never());
        let config = crate::CoreConfig {
            default_parse_timeout_ms: Some(30),
            forward_timeout_to_engine: false,
            ..Default::default()
        };
        let instance = Instance::with_config(engine.clone(), config).unwrap();
        let media = Media::from_path(&instance, "/media/stuck.ts").unwrap();

        let outcome = media.parse_async(ParseOptions::new()).await.unwrap();
        assert_eq!(outcome, ParseOutcome::Timeout);
        assert_eq!(engine.last_parse_timeout(), Some(None));
    }

    #[tokio::test]
    async fn test_timeout_forwarded_to_engine() {
        let (engine, media) = setup("/media/song.mp3", SimSource::audio(1_000, 2));
        media
            .parse_async(ParseOptions::new().with_timeout(Duration::from_millis(750)))
            .await
            .unwrap();
        assert_eq!(engine.last_parse_timeout(), Some(Some(750)));
    }

    #[tokio::test]
    async fn test_oversized_timeout_saturates() {
        let (engine, media) = setup("/media/song.mp3", SimSource::audio(1_000, 2));
        let outcome = media
            .parse_async(ParseOptions::new().with_timeout(Duration::MAX))
            .await
            .unwrap();
        assert_eq!(outcome, ParseOutcome::Done);
        assert_eq!(engine.last_parse_timeout(), Some(Some(u64::MAX)));
    }

    #[tokio::test]
    async fn test_released_media_is_disposed() {
        let (engine, media) = setup("/media/song.mp3", SimSource::audio(1_000, 2));
        media.release();
        let result = media.parse_async(ParseOptions::new()).await;
        assert!(matches!(result, Err(Error::Disposed { kind: HandleKind::Media })));
        assert_eq!(engine.start_parse_count(), 0);
    }

    #[tokio::test]
    async fn test_second_parse_sees_no_stale_handler() {
        let (engine, media) = setup("/media/song.mp3", SimSource::audio(1_000, 2));
        assert_eq!(media.parse_async(ParseOptions::new()).await.unwrap(), ParseOutcome::Done);
        assert_eq!(media.parse_async(ParseOptions::new()).await.unwrap(), ParseOutcome::Done);
        assert_eq!(engine.start_parse_count(), 2);
        assert_eq!(media.bridge().subscriber_count(media.handle().raw(), EventKind::MediaParsedChanged), 0);
    }

    #[tokio::test]
    async fn test_dropped_future_cancels() {
        let (engine, media) = setup("/media/stuck.ts", SimSource::never());
        let result = tokio::time::timeout(
            Duration::from_millis(20),
            media.parse_async(ParseOptions::new()),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(engine.stop_parse_count(), 1);
        assert_eq!(engine.live_callbacks(), 0);
        assert_eq!(media.parsed_status().unwrap(), ParsedStatus::Cancelled);
    }

    #[test]
    fn test_blocking_parse() {
        let (engine, media) = setup("/media/song.mp3", SimSource::audio(3_000, 6));
        assert_eq!(media.parse().unwrap(), ParsedStatus::Done);
        assert_eq!(media.tracks().unwrap()[0].channels(), Some(6));
        assert_eq!(engine.live_callbacks(), 0);
    }
}
