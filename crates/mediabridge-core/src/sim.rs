//! In-process simulated engine
//!
//! Implements [`NativeEngine`] without any real decoding so the bridge can be
//! exercised end to end. Parse completion arrives on a thread the simulator
//! spawns, the same way a real engine reports it from its own worker. Spy
//! counters expose how the bridge drove the engine.

use crate::{
    engine::{CallbackToken, MediaSource, NativeCallback, NativeEngine},
    event::{Event, EventKind},
    types::*,
    Error, Result,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace};

/// How a simulated source answers a parse request
#[derive(Debug, Clone, PartialEq)]
pub enum ParseBehavior {
    /// Report `status` after `delay`
    Complete { status: ParsedStatus, delay: Duration },
    /// Accept the request and never report anything
    Never,
    /// Refuse to start
    Reject,
}

/// Behavior and content of one simulated source
#[derive(Debug, Clone)]
pub struct SimSource {
    pub parse: ParseBehavior,
    /// Duration revealed by a successful parse
    pub duration_ms: Option<i64>,
    /// Tracks revealed by a successful parse
    pub tracks: Vec<Track>,
    /// Metadata revealed by a successful parse
    pub meta: Vec<(MetadataKey, String)>,
    /// Overrides the type derived from the source
    pub media_type: Option<MediaType>,
}

impl Default for SimSource {
    fn default() -> Self {
        Self::audio(60_000, 2)
    }
}

impl SimSource {
    /// Audio file with one track that parses after a short delay
    pub fn audio(duration_ms: i64, channels: u32) -> Self {
        Self {
            parse: ParseBehavior::Complete {
                status: ParsedStatus::Done,
                delay: Duration::from_millis(10),
            },
            duration_ms: Some(duration_ms),
            tracks: vec![Track {
                id: 0,
                codec: "mp4a".to_string(),
                bitrate: 128_000,
                language: None,
                description: None,
                details: TrackDetails::Audio { channels, rate: 44_100 },
            }],
            meta: Vec::new(),
            media_type: None,
        }
    }

    /// Source whose parse never completes on its own
    pub fn never() -> Self {
        Self {
            parse: ParseBehavior::Never,
            ..Self::audio(0, 2)
        }
    }

    pub fn with_parse(mut self, parse: ParseBehavior) -> Self {
        self.parse = parse;
        self
    }

    pub fn with_meta(mut self, key: MetadataKey, value: impl Into<String>) -> Self {
        self.meta.push((key, value.into()));
        self
    }
}

struct MediaState {
    source: MediaSource,
    behavior: SimSource,
    status: ParsedStatus,
    duration_ms: Option<i64>,
    tracks: Vec<Track>,
    meta: HashMap<MetadataKey, String>,
    saved_meta: HashMap<MetadataKey, String>,
    options: Vec<String>,
    parse_generation: u64,
}

#[derive(Default)]
struct PlayerData {
    media: Option<RawHandle>,
    state: PlayerState,
    position: f32,
    volume: i32,
}

enum Resource {
    Instance,
    Media(Arc<Mutex<MediaState>>),
    Player(PlayerData),
}

struct Registration {
    handle: RawHandle,
    kind: EventKind,
    callback: NativeCallback,
}

#[derive(Default)]
struct Inner {
    next_handle: AtomicU64,
    next_token: AtomicU64,
    resources: Mutex<HashMap<RawHandle, Resource>>,
    sources: Mutex<HashMap<String, SimSource>>,
    callbacks: Mutex<HashMap<u64, Registration>>,
    releases: Mutex<HashMap<RawHandle, usize>>,
    open_count: AtomicUsize,
    start_parse_count: AtomicUsize,
    stop_parse_count: AtomicUsize,
    last_parse_timeout: Mutex<Option<Option<u64>>>,
    announce_on_register: Mutex<Option<Event>>,
}

impl Inner {
    fn allocate(&self) -> RawHandle {
        RawHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn media(&self, handle: RawHandle) -> Result<Arc<Mutex<MediaState>>> {
        match self.resources.lock().get(&handle) {
            Some(Resource::Media(state)) => Ok(Arc::clone(state)),
            _ => Err(Error::native(format!("unknown media handle {handle}"))),
        }
    }

    fn with_player<T>(&self, handle: RawHandle, f: impl FnOnce(&mut PlayerData) -> Result<T>) -> Result<T> {
        match self.resources.lock().get_mut(&handle) {
            Some(Resource::Player(player)) => f(player),
            _ => Err(Error::native(format!("unknown player handle {handle}"))),
        }
    }

    /// Invoke every callback registered for the event's kind on `handle`.
    /// Callbacks run with no simulator lock held.
    fn fire(&self, handle: RawHandle, event: Event) -> usize {
        let kind = event.kind();
        let targets: Vec<NativeCallback> = self
            .callbacks
            .lock()
            .values()
            .filter(|r| r.handle == handle && r.kind == kind)
            .map(|r| Arc::clone(&r.callback))
            .collect();

        trace!(handle = %handle, kind = ?kind, callbacks = targets.len(), "Simulated event");
        for callback in &targets {
            callback(event.clone());
        }
        targets.len()
    }

    fn complete_parse(&self, handle: RawHandle, generation: u64, status: ParsedStatus) {
        let Ok(state) = self.media(handle) else {
            return;
        };
        let (duration, meta) = {
            let mut state = state.lock();
            if state.parse_generation != generation || state.status != ParsedStatus::Parsing {
                return;
            }
            state.status = status;
            if status == ParsedStatus::Done {
                state.duration_ms = state.behavior.duration_ms;
                state.tracks = state.behavior.tracks.clone();
                let meta = state.behavior.meta.clone();
                state.meta.extend(meta.iter().cloned());
                (state.duration_ms, meta)
            } else {
                (None, Vec::new())
            }
        };

        if let Some(duration_ms) = duration {
            self.fire(handle, Event::DurationChanged { duration_ms });
        }
        for (key, _) in meta {
            self.fire(handle, Event::MetaChanged { key });
        }
        self.fire(handle, Event::ParsedChanged { status });
    }
}

/// Simulated engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SimulatedEngine {
    inner: Arc<Inner>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::default()),
        }
    }

    /// Configure how the source described by `key` behaves. The key matches
    /// a path as displayed or a location URI. Unknown sources use
    /// [`SimSource::default`].
    pub fn add_source(&self, key: impl Into<String>, source: SimSource) {
        self.inner.sources.lock().insert(key.into(), source);
    }

    /// Fire an event on the calling thread
    pub fn fire(&self, handle: RawHandle, event: Event) -> usize {
        self.inner.fire(handle, event)
    }

    /// Fire an event from a fresh thread, as a native worker would
    pub fn fire_from_thread(&self, handle: RawHandle, event: Event) -> JoinHandle<usize> {
        let inner = Arc::clone(&self.inner);
        std::thread::spawn(move || inner.fire(handle, event))
    }

    /// Deliver `event` synchronously from inside `register_callback` when a
    /// callback for its kind is registered, as engines that report current
    /// state on registration do
    pub fn announce_on_register(&self, event: Option<Event>) {
        *self.inner.announce_on_register.lock() = event;
    }

    /// Native callbacks currently registered
    pub fn live_callbacks(&self) -> usize {
        self.inner.callbacks.lock().len()
    }

    /// How many times `handle` was passed to [`NativeEngine::release`]
    pub fn release_count(&self, handle: RawHandle) -> usize {
        self.inner.releases.lock().get(&handle).copied().unwrap_or(0)
    }

    pub fn open_count(&self) -> usize {
        self.inner.open_count.load(Ordering::SeqCst)
    }

    pub fn start_parse_count(&self) -> usize {
        self.inner.start_parse_count.load(Ordering::SeqCst)
    }

    pub fn stop_parse_count(&self) -> usize {
        self.inner.stop_parse_count.load(Ordering::SeqCst)
    }

    /// Timeout passed to the latest start-parse call, `None` if never called
    pub fn last_parse_timeout(&self) -> Option<Option<u64>> {
        *self.inner.last_parse_timeout.lock()
    }

    /// Options added to a media, in order
    pub fn options(&self, media: RawHandle) -> Vec<String> {
        self.inner
            .media(media)
            .map(|state| state.lock().options.clone())
            .unwrap_or_default()
    }

    /// Metadata persisted by the last successful save
    pub fn saved_meta(&self, media: RawHandle, key: MetadataKey) -> Option<String> {
        self.inner
            .media(media)
            .ok()
            .and_then(|state| state.lock().saved_meta.get(&key).cloned())
    }

    /// Media currently set on a player
    pub fn player_media(&self, player: RawHandle) -> Option<RawHandle> {
        self.inner.with_player(player, |p| Ok(p.media)).ok().flatten()
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn source_key(source: &MediaSource) -> String {
    match source {
        MediaSource::Path(path) => path.display().to_string(),
        MediaSource::Location(url) => url.to_string(),
        MediaSource::Stream(_) => "stream".to_string(),
    }
}

fn derived_type(source: &MediaSource) -> MediaType {
    match source {
        MediaSource::Path(_) => MediaType::File,
        MediaSource::Location(url) if url.scheme() == "file" => MediaType::File,
        MediaSource::Location(_) | MediaSource::Stream(_) => MediaType::Stream,
    }
}

fn supports_save(source: &MediaSource) -> bool {
    match source {
        MediaSource::Path(_) => true,
        MediaSource::Location(url) => url.scheme() == "file",
        MediaSource::Stream(_) => false,
    }
}

impl NativeEngine for SimulatedEngine {
    fn new_instance(&self) -> Result<RawHandle> {
        let handle = self.inner.allocate();
        self.inner.resources.lock().insert(handle, Resource::Instance);
        Ok(handle)
    }

    fn open_media(&self, instance: RawHandle, source: &MediaSource) -> Result<RawHandle> {
        if !matches!(self.inner.resources.lock().get(&instance), Some(Resource::Instance)) {
            return Err(Error::native(format!("unknown instance handle {instance}")));
        }
        let behavior = self
            .inner
            .sources
            .lock()
            .get(&source_key(source))
            .cloned()
            .unwrap_or_default();

        let state = MediaState {
            source: source.clone(),
            behavior,
            status: ParsedStatus::NotParsed,
            duration_ms: None,
            tracks: Vec::new(),
            meta: HashMap::new(),
            saved_meta: HashMap::new(),
            options: Vec::new(),
            parse_generation: 0,
        };
        let handle = self.inner.allocate();
        self.inner
            .resources
            .lock()
            .insert(handle, Resource::Media(Arc::new(Mutex::new(state))));
        self.inner.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    fn duplicate_media(&self, media: RawHandle) -> Result<RawHandle> {
        let state = self.inner.media(media)?;
        let handle = self.inner.allocate();
        self.inner.resources.lock().insert(handle, Resource::Media(state));
        Ok(handle)
    }

    fn new_player(&self, instance: RawHandle) -> Result<RawHandle> {
        if !matches!(self.inner.resources.lock().get(&instance), Some(Resource::Instance)) {
            return Err(Error::native(format!("unknown instance handle {instance}")));
        }
        let handle = self.inner.allocate();
        let player = PlayerData {
            volume: 100,
            ..Default::default()
        };
        self.inner.resources.lock().insert(handle, Resource::Player(player));
        Ok(handle)
    }

    fn release(&self, handle: RawHandle) {
        *self.inner.releases.lock().entry(handle).or_insert(0) += 1;
        let removed = self.inner.resources.lock().remove(&handle);
        if let Some(Resource::Media(_)) = removed {
            self.inner.fire(handle, Event::MediaFreed);
        }
        debug!(handle = %handle, "Simulated release");
    }

    fn start_parse(&self, media: RawHandle, _flags: ParseFlags, timeout_ms: Option<u64>) -> Result<()> {
        let state = self.inner.media(media)?;
        self.inner.start_parse_count.fetch_add(1, Ordering::SeqCst);
        *self.inner.last_parse_timeout.lock() = Some(timeout_ms);

        let (behavior, generation) = {
            let mut state = state.lock();
            if state.behavior.parse == ParseBehavior::Reject {
                return Err(Error::native("parse request rejected"));
            }
            state.parse_generation += 1;
            state.status = ParsedStatus::Parsing;
            (state.behavior.parse.clone(), state.parse_generation)
        };

        if let ParseBehavior::Complete { status, delay } = behavior {
            let inner = Arc::clone(&self.inner);
            std::thread::Builder::new()
                .name("sim-parser".to_string())
                .spawn(move || {
                    std::thread::sleep(delay);
                    inner.complete_parse(media, generation, status);
                })?;
        }
        Ok(())
    }

    fn stop_parse(&self, media: RawHandle) {
        self.inner.stop_parse_count.fetch_add(1, Ordering::SeqCst);
        let Ok(state) = self.inner.media(media) else {
            return;
        };
        let stopped = {
            let mut state = state.lock();
            if state.status == ParsedStatus::Parsing {
                state.parse_generation += 1;
                state.status = ParsedStatus::Failed;
                true
            } else {
                false
            }
        };
        if stopped {
            self.inner.fire(media, Event::ParsedChanged { status: ParsedStatus::Failed });
        }
    }

    fn register_callback(
        &self,
        handle: RawHandle,
        kind: EventKind,
        callback: NativeCallback,
    ) -> Result<CallbackToken> {
        if handle.is_invalid() {
            return Err(Error::invalid_argument("callback on invalid handle"));
        }
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        let announce = self
            .inner
            .announce_on_register
            .lock()
            .clone()
            .filter(|event| event.kind() == kind);
        self.inner
            .callbacks
            .lock()
            .insert(token, Registration { handle, kind, callback: Arc::clone(&callback) });
        if let Some(event) = announce {
            callback(event);
        }
        Ok(CallbackToken(token))
    }

    fn unregister_callback(&self, token: CallbackToken) {
        self.inner.callbacks.lock().remove(&token.0);
    }

    fn parsed_status(&self, media: RawHandle) -> Result<ParsedStatus> {
        Ok(self.inner.media(media)?.lock().status)
    }

    fn duration_ms(&self, media: RawHandle) -> Result<Option<i64>> {
        Ok(self.inner.media(media)?.lock().duration_ms)
    }

    fn tracks(&self, media: RawHandle) -> Result<Vec<Track>> {
        Ok(self.inner.media(media)?.lock().tracks.clone())
    }

    fn media_type(&self, media: RawHandle) -> Result<MediaType> {
        let state = self.inner.media(media)?;
        let state = state.lock();
        Ok(state.behavior.media_type.unwrap_or_else(|| derived_type(&state.source)))
    }

    fn add_option(&self, media: RawHandle, option: &str) -> Result<()> {
        self.inner.media(media)?.lock().options.push(option.to_string());
        Ok(())
    }

    fn meta(&self, media: RawHandle, key: MetadataKey) -> Result<Option<String>> {
        Ok(self.inner.media(media)?.lock().meta.get(&key).cloned())
    }

    fn set_meta(&self, media: RawHandle, key: MetadataKey, value: &str) -> Result<()> {
        self.inner.media(media)?.lock().meta.insert(key, value.to_string());
        self.inner.fire(media, Event::MetaChanged { key });
        Ok(())
    }

    fn save_meta(&self, media: RawHandle) -> Result<bool> {
        let state = self.inner.media(media)?;
        let mut state = state.lock();
        if !supports_save(&state.source) {
            return Ok(false);
        }
        state.saved_meta = state.meta.clone();
        Ok(true)
    }

    fn set_player_media(&self, player: RawHandle, media: Option<RawHandle>) -> Result<()> {
        if let Some(media) = media {
            self.inner.media(media)?;
        }
        self.inner.with_player(player, |p| {
            p.media = media;
            p.state = PlayerState::NothingSpecial;
            p.position = 0.0;
            Ok(())
        })
    }

    fn play(&self, player: RawHandle) -> Result<()> {
        self.inner.with_player(player, |p| {
            if p.media.is_none() {
                return Err(Error::native("player has no media"));
            }
            p.state = PlayerState::Playing;
            Ok(())
        })?;
        self.inner.fire(player, Event::Playing);
        Ok(())
    }

    fn pause(&self, player: RawHandle) -> Result<()> {
        self.inner.with_player(player, |p| {
            p.state = PlayerState::Paused;
            Ok(())
        })?;
        self.inner.fire(player, Event::Paused);
        Ok(())
    }

    fn stop(&self, player: RawHandle) -> Result<()> {
        self.inner.with_player(player, |p| {
            p.state = PlayerState::Stopped;
            p.position = 0.0;
            Ok(())
        })?;
        self.inner.fire(player, Event::Stopped);
        Ok(())
    }

    fn position(&self, player: RawHandle) -> Result<f32> {
        self.inner.with_player(player, |p| Ok(p.position))
    }

    fn set_position(&self, player: RawHandle, position: f32) -> Result<()> {
        self.inner.with_player(player, |p| {
            p.position = position;
            Ok(())
        })
    }

    fn player_state(&self, player: RawHandle) -> Result<PlayerState> {
        self.inner.with_player(player, |p| Ok(p.state))
    }

    fn volume(&self, player: RawHandle) -> Result<i32> {
        self.inner.with_player(player, |p| Ok(p.volume))
    }

    fn set_volume(&self, player: RawHandle, volume: i32) -> Result<()> {
        self.inner.with_player(player, |p| {
            p.volume = volume;
            Ok(())
        })?;
        self.inner.fire(player, Event::VolumeChanged { volume: volume as f32 / 100.0 });
        Ok(())
    }
}
