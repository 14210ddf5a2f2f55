//! State projector
//!
//! Mirrors a live player/media pair into observable properties for a UI
//! layer. Native events arrive on engine threads; the projector never
//! notifies from there. Each event schedules exactly one unit of work on the
//! injected [`UiScheduler`], and that work updates the mirrored fields and
//! notifies observers on the UI context.
//!
//! Values the engine can answer directly (position, state, duration, parsed
//! status) are read live. Values only carried by events (buffering, corked,
//! chapter, time, audio device) are stored when the event is applied.
//!
//! Media subscriptions carry the generation they were made for. Work already
//! queued for a media that has since been replaced is dropped when it runs.
//! Player events that describe the media (length) are tagged with the
//! generation current when they fire. Mirrored media fields belong to one
//! generation and read as unset once a newer media is attached.

use crate::{
    config::CoreConfig,
    engine::{MediaSource, NativeEngine},
    event::{Event, EventKind, SubscriptionSet},
    handle::Instance,
    media::Media,
    player::PlayerSession,
    scheduler::UiScheduler,
    types::*,
    Error, Result,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, trace};

/// Observable properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Property {
    Position,
    Buffering,
    State,
    Duration,
    MediaParsedStatus,
    Meta,
    SubItems,
    Media,
    AudioDevice,
    Chapter,
    Corked,
    Volume,
    Time,
    HardwareAcceleration,
}

impl Property {
    pub fn name(&self) -> &'static str {
        match self {
            Property::Position => "Position",
            Property::Buffering => "Buffering",
            Property::State => "State",
            Property::Duration => "Duration",
            Property::MediaParsedStatus => "MediaParsedStatus",
            Property::Meta => "Meta",
            Property::SubItems => "SubItems",
            Property::Media => "Media",
            Property::AudioDevice => "AudioDevice",
            Property::Chapter => "Chapter",
            Property::Corked => "Corked",
            Property::Volume => "Volume",
            Property::Time => "Time",
            Property::HardwareAcceleration => "HardwareAcceleration",
        }
    }
}

impl std::fmt::Display for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which property an event changes
fn property_for(event: &Event) -> Property {
    match event {
        Event::DurationChanged { .. } | Event::LengthChanged { .. } => Property::Duration,
        Event::ParsedChanged { .. } => Property::MediaParsedStatus,
        Event::MetaChanged { .. } => Property::Meta,
        Event::SubItemAdded { .. } | Event::SubItemTreeAdded { .. } => Property::SubItems,
        Event::MediaFreed => Property::Media,
        Event::Buffering { .. } => Property::Buffering,
        Event::PositionChanged { .. } | Event::Backward | Event::Forward => Property::Position,
        Event::AudioDevice { .. } => Property::AudioDevice,
        Event::ChapterChanged { .. } => Property::Chapter,
        Event::Corked | Event::Uncorked => Property::Corked,
        Event::VolumeChanged { .. } | Event::Muted | Event::Unmuted => Property::Volume,
        Event::TimeChanged { .. } => Property::Time,
        Event::MediaStateChanged { .. }
        | Event::Playing
        | Event::Paused
        | Event::Stopped
        | Event::EndReached
        | Event::EncounteredError => Property::State,
    }
}

/// Player events whose payload describes the attached media
fn is_media_scoped(event: &Event) -> bool {
    matches!(event, Event::LengthChanged { .. })
}

/// Handle returned by [`StateProjector::observe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Property-change observer, invoked on the UI context
pub type PropertyObserver = Arc<dyn Fn(Property) + Send + Sync>;

/// Serializable view of everything the projector exposes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub session_id: SessionId,
    pub captured_at: DateTime<Utc>,
    /// Source of the attached media
    pub media: Option<String>,
    pub position: f32,
    pub buffering: f32,
    pub state: PlayerState,
    pub duration_ms: Option<i64>,
    pub parsed_status: ParsedStatus,
    pub time_ms: i64,
    pub volume: i32,
    pub muted: bool,
    pub corked: bool,
    pub chapter: i32,
    pub audio_device: Option<String>,
    pub sub_items: usize,
    pub hardware_acceleration: bool,
}

/// Values only carried by events
#[derive(Debug, Default)]
struct Mirrored {
    buffering: f32,
    corked: bool,
    muted: bool,
    chapter: i32,
    time_ms: i64,
    audio_device: Option<String>,
    hardware_acceleration: bool,
    media: MediaFields,
}

/// Event-carried values of one attached media
#[derive(Debug, Default)]
struct MediaFields {
    generation: u64,
    length_ms: Option<i64>,
    sub_items: usize,
    last_meta: Option<MetadataKey>,
}

impl MediaFields {
    /// Move to `generation`, clearing values of an older media. Returns false
    /// if `generation` is older than the one already held.
    fn enter(&mut self, generation: u64) -> bool {
        if generation < self.generation {
            return false;
        }
        if generation > self.generation {
            *self = MediaFields {
                generation,
                ..MediaFields::default()
            };
        }
        true
    }
}

struct Shared {
    session: PlayerSession,
    instance: Instance,
    scheduler: Arc<dyn UiScheduler>,
    mirrored: Mutex<Mirrored>,
    observers: RwLock<Vec<(ObserverId, PropertyObserver)>>,
    next_observer: AtomicU64,
    /// Bumped on every media attach
    generation: AtomicU64,
    disposed: AtomicBool,
}

impl Shared {
    /// Event handler that forwards to the scheduler. Runs on the native thread.
    fn forwarder(self: &Arc<Self>, generation: Option<u64>) -> impl Fn(&Event) + Send + Sync + 'static {
        let shared: Weak<Shared> = Arc::downgrade(self);
        move |event: &Event| {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            if shared.disposed.load(Ordering::Acquire) {
                return;
            }
            let generation = generation.or_else(|| {
                is_media_scoped(event).then(|| shared.generation.load(Ordering::Acquire))
            });
            let event = event.clone();
            let target = Arc::clone(&shared);
            shared
                .scheduler
                .schedule(Box::new(move || target.apply(generation, event)));
        }
    }

    /// Apply one event. Runs on the UI context.
    fn apply(&self, generation: Option<u64>, event: Event) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        if let Some(generation) = generation {
            if generation != self.generation.load(Ordering::Acquire) {
                trace!(kind = ?event.kind(), "Dropping event for a replaced media");
                return;
            }
        }

        {
            let mut mirrored = self.mirrored.lock();
            if let Some(generation) = generation {
                if !mirrored.media.enter(generation) {
                    return;
                }
            }
            match &event {
                Event::Buffering { cache } => mirrored.buffering = *cache,
                Event::Corked => mirrored.corked = true,
                Event::Uncorked => mirrored.corked = false,
                Event::Muted => mirrored.muted = true,
                Event::Unmuted => mirrored.muted = false,
                Event::ChapterChanged { chapter } => mirrored.chapter = *chapter,
                Event::TimeChanged { time_ms } => mirrored.time_ms = *time_ms,
                Event::LengthChanged { length_ms } => mirrored.media.length_ms = Some(*length_ms),
                Event::AudioDevice { device } => mirrored.audio_device = Some(device.clone()),
                Event::SubItemAdded { .. } | Event::SubItemTreeAdded { .. } => mirrored.media.sub_items += 1,
                Event::MetaChanged { key } => mirrored.media.last_meta = Some(*key),
                _ => {}
            }
        }

        self.notify(property_for(&event));
    }

    /// Read the mirrored fields of the current media, if any were recorded
    fn media_field<T: Default>(&self, read: impl FnOnce(&MediaFields) -> T) -> T {
        let current = self.generation.load(Ordering::Acquire);
        let mirrored = self.mirrored.lock();
        if mirrored.media.generation == current {
            read(&mirrored.media)
        } else {
            T::default()
        }
    }

    fn notify(&self, property: Property) {
        let observers: Vec<PropertyObserver> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        trace!(property = %property, observers = observers.len(), "Property changed");
        for observer in observers {
            observer(property);
        }
    }

    /// Schedule a notification not triggered by a native event
    fn schedule_notify(self: &Arc<Self>, property: Property) {
        let target = Arc::clone(self);
        self.scheduler.schedule(Box::new(move || {
            if !target.disposed.load(Ordering::Acquire) {
                target.notify(property);
            }
        }));
    }
}

/// Builder for [`StateProjector`]
pub struct StateProjectorBuilder {
    engine: Arc<dyn NativeEngine>,
    scheduler: Option<Arc<dyn UiScheduler>>,
    config: CoreConfig,
}

impl StateProjectorBuilder {
    /// UI-affine scheduler for every property notification. Required.
    pub fn scheduler(mut self, scheduler: impl UiScheduler + 'static) -> Self {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    /// Shared UI-affine scheduler
    pub fn shared_scheduler(mut self, scheduler: Arc<dyn UiScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Create the engine instance and player and subscribe to player events.
    /// Fails with [`Error::InvalidArgument`] before any native call if no
    /// scheduler was given.
    pub fn build(self) -> Result<StateProjector> {
        let scheduler = self
            .scheduler
            .ok_or_else(|| Error::invalid_argument("state projector requires a UI scheduler"))?;

        let instance = Instance::with_config(self.engine, self.config)?;
        let session = PlayerSession::new(&instance)?;

        let shared = Arc::new(Shared {
            session,
            instance,
            scheduler,
            mirrored: Mutex::new(Mirrored::default()),
            observers: RwLock::new(Vec::new()),
            next_observer: AtomicU64::new(1),
            generation: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        });

        for kind in EventKind::PLAYER {
            shared.session.subscribe(kind, shared.forwarder(None))?;
        }
        info!(session = %shared.session.id(), "State projector created");

        Ok(StateProjector { shared })
    }
}

/// Observable projection of one player and its attached media
pub struct StateProjector {
    shared: Arc<Shared>,
}

impl StateProjector {
    pub fn builder(engine: Arc<dyn NativeEngine>) -> StateProjectorBuilder {
        StateProjectorBuilder {
            engine,
            scheduler: None,
            config: CoreConfig::default(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.shared.session.id()
    }

    /// Engine instance owned by this projector
    pub fn instance(&self) -> &Instance {
        &self.shared.instance
    }

    pub fn session(&self) -> &PlayerSession {
        &self.shared.session
    }

    /// Register a property observer. It runs on the UI context.
    pub fn observe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(Property) + Send + Sync + 'static,
    {
        let id = ObserverId(self.shared.next_observer.fetch_add(1, Ordering::Relaxed));
        self.shared.observers.write().push((id, Arc::new(observer)));
        id
    }

    /// Remove an observer. Returns false if it was not registered.
    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut observers = self.shared.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Attach a media, replacing the current one.
    ///
    /// Subscriptions of the previous media are removed before the new
    /// media's are added.
    #[instrument(skip(self, media), fields(session = %self.id()))]
    pub fn attach_media(&self, media: Arc<Media>) -> Result<()> {
        let shared = &self.shared;
        let mut installed = 0;

        shared
            .session
            .attach_media_with(media, |media, subscriptions: &mut SubscriptionSet| {
                let raw = media.handle().get()?;
                // Previous media is detached by now; its queued work goes stale
                let generation = shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
                installed = generation;
                for kind in EventKind::MEDIA {
                    subscriptions.subscribe(raw, kind, shared.forwarder(Some(generation)))?;
                }
                Ok(())
            })?;

        debug!(generation = installed, "Media subscriptions installed");
        let target = Arc::clone(shared);
        shared.scheduler.schedule(Box::new(move || {
            if target.disposed.load(Ordering::Acquire) {
                return;
            }
            target.mirrored.lock().media.enter(installed);
            target.notify(Property::Media);
        }));
        Ok(())
    }

    /// Open a media from a source on the projector's instance and attach it
    pub fn open(&self, source: MediaSource) -> Result<Arc<Media>> {
        let media = Arc::new(Media::new(&self.shared.instance, source)?);
        self.attach_media(media.clone())?;
        Ok(media)
    }

    /// Currently attached media
    pub fn media(&self) -> Option<Arc<Media>> {
        self.shared.session.media()
    }

    pub fn play(&self) -> Result<()> {
        self.shared.session.play()
    }

    pub fn pause(&self) -> Result<()> {
        self.shared.session.pause()
    }

    pub fn stop(&self) -> Result<()> {
        self.shared.session.stop()
    }

    /// Playback position, 0.0 to 1.0
    pub fn position(&self) -> Result<f32> {
        self.shared.session.position()
    }

    /// Seek. The value is clamped to 0.0 to 1.0.
    pub fn set_position(&self, position: f32) -> Result<()> {
        let position = if position.is_nan() { 0.0 } else { position.clamp(0.0, 1.0) };
        self.shared.session.set_position(position)?;
        self.shared.schedule_notify(Property::Position);
        Ok(())
    }

    /// Buffer fill, 0.0 to 100.0, as last reported by the engine
    pub fn buffering(&self) -> f32 {
        self.shared.mirrored.lock().buffering
    }

    pub fn state(&self) -> Result<PlayerState> {
        self.shared.session.state()
    }

    /// Media duration; `None` until known or without media
    pub fn duration_ms(&self) -> Result<Option<i64>> {
        match self.media() {
            Some(media) => Ok(media
                .duration_ms()?
                .or_else(|| self.shared.media_field(|fields| fields.length_ms))),
            None => Ok(None),
        }
    }

    /// Parsed status of the attached media; `NotParsed` without media
    pub fn media_parsed_status(&self) -> Result<ParsedStatus> {
        match self.media() {
            Some(media) => media.parsed_status(),
            None => Ok(ParsedStatus::NotParsed),
        }
    }

    pub fn volume(&self) -> Result<i32> {
        self.shared.session.volume()
    }

    /// Volume in percent; the engine reports the change through an event
    pub fn set_volume(&self, volume: i32) -> Result<()> {
        self.shared.session.set_volume(volume.max(0))
    }

    pub fn is_muted(&self) -> bool {
        self.shared.mirrored.lock().muted
    }

    pub fn is_corked(&self) -> bool {
        self.shared.mirrored.lock().corked
    }

    pub fn chapter(&self) -> i32 {
        self.shared.mirrored.lock().chapter
    }

    pub fn time_ms(&self) -> i64 {
        self.shared.mirrored.lock().time_ms
    }

    pub fn audio_device(&self) -> Option<String> {
        self.shared.mirrored.lock().audio_device.clone()
    }

    /// Sub-items reported for the attached media
    pub fn sub_items(&self) -> usize {
        self.shared.media_field(|fields| fields.sub_items)
    }

    /// Last metadata key the engine reported as changed
    pub fn last_meta_change(&self) -> Option<MetadataKey> {
        self.shared.media_field(|fields| fields.last_meta)
    }

    pub fn hardware_acceleration(&self) -> bool {
        self.shared.mirrored.lock().hardware_acceleration
    }

    pub fn set_hardware_acceleration(&self, enabled: bool) {
        self.shared.mirrored.lock().hardware_acceleration = enabled;
        self.shared.schedule_notify(Property::HardwareAcceleration);
    }

    /// Everything the projector exposes, read now
    pub fn snapshot(&self) -> Result<PlaybackSnapshot> {
        let media = self.media();
        let (position, state, volume) = (self.position()?, self.state()?, self.volume()?);
        let duration_ms = self.duration_ms()?;
        let parsed_status = self.media_parsed_status()?;
        let sub_items = self.sub_items();

        let mirrored = self.shared.mirrored.lock();
        Ok(PlaybackSnapshot {
            session_id: self.id(),
            captured_at: Utc::now(),
            media: media.map(|m| m.source().describe()),
            position,
            buffering: mirrored.buffering,
            state,
            duration_ms,
            parsed_status,
            time_ms: mirrored.time_ms,
            volume,
            muted: mirrored.muted,
            corked: mirrored.corked,
            chapter: mirrored.chapter,
            audio_device: mirrored.audio_device.clone(),
            sub_items,
            hardware_acceleration: mirrored.hardware_acceleration,
        })
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Release the player and the engine instance. Only the first call does
    /// anything; work still queued on the scheduler becomes a no-op.
    pub fn dispose(&self) {
        if self
            .shared
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.shared.session.release();
        self.shared.instance.release();
        info!(session = %self.id(), "State projector disposed");
    }
}

impl Drop for StateProjector {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for StateProjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateProjector")
            .field("session", &self.shared.session)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
