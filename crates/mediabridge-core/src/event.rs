//! Event bridge
//!
//! Turns raw native callbacks into a typed publish/subscribe surface keyed by
//! (handle, event kind).
//!
//! - The first subscriber for a key registers one native callback; the last
//!   unsubscribe removes it again.
//! - Handler lists are copy-on-write: `dispatch` clones an `Arc` under a short
//!   read lock and runs handlers with no lock held, so native threads never
//!   wait on user code and handlers may subscribe or unsubscribe re-entrantly.
//! - Dispatch is synchronous on the calling (native) thread. Handlers that need
//!   another execution context schedule the work themselves.
//! - A panicking handler is logged and skipped; the remaining handlers still
//!   run and the subscriber list is untouched.

use crate::{
    engine::{CallbackToken, NativeCallback, NativeEngine},
    types::*,
    Error, Result,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Native event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // Media events
    MediaMetaChanged,
    MediaSubItemAdded,
    MediaDurationChanged,
    MediaParsedChanged,
    MediaFreed,
    MediaStateChanged,
    MediaSubItemTreeAdded,

    // Player events
    PlayerBuffering,
    PlayerPositionChanged,
    PlayerAudioDevice,
    PlayerBackward,
    PlayerForward,
    PlayerChapterChanged,
    PlayerCorked,
    PlayerUncorked,
    PlayerVolumeChanged,
    PlayerTimeChanged,
    PlayerLengthChanged,
    PlayerPlaying,
    PlayerPaused,
    PlayerStopped,
    PlayerEndReached,
    PlayerEncounteredError,
    PlayerMuted,
    PlayerUnmuted,
}

impl EventKind {
    /// Every media event kind
    pub const MEDIA: [EventKind; 7] = [
        EventKind::MediaDurationChanged,
        EventKind::MediaParsedChanged,
        EventKind::MediaStateChanged,
        EventKind::MediaMetaChanged,
        EventKind::MediaSubItemAdded,
        EventKind::MediaSubItemTreeAdded,
        EventKind::MediaFreed,
    ];

    /// Every player event kind
    pub const PLAYER: [EventKind; 18] = [
        EventKind::PlayerBuffering,
        EventKind::PlayerPositionChanged,
        EventKind::PlayerAudioDevice,
        EventKind::PlayerBackward,
        EventKind::PlayerForward,
        EventKind::PlayerChapterChanged,
        EventKind::PlayerCorked,
        EventKind::PlayerUncorked,
        EventKind::PlayerVolumeChanged,
        EventKind::PlayerTimeChanged,
        EventKind::PlayerLengthChanged,
        EventKind::PlayerPlaying,
        EventKind::PlayerPaused,
        EventKind::PlayerStopped,
        EventKind::PlayerEndReached,
        EventKind::PlayerEncounteredError,
        EventKind::PlayerMuted,
        EventKind::PlayerUnmuted,
    ];

    pub fn is_media_event(&self) -> bool {
        Self::MEDIA.contains(self)
    }
}

/// Typed payload of a native event
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    MetaChanged { key: MetadataKey },
    SubItemAdded { item: RawHandle },
    DurationChanged { duration_ms: i64 },
    ParsedChanged { status: ParsedStatus },
    MediaFreed,
    MediaStateChanged { state: PlayerState },
    SubItemTreeAdded { item: RawHandle },

    Buffering { cache: f32 },
    PositionChanged { position: f32 },
    AudioDevice { device: String },
    Backward,
    Forward,
    ChapterChanged { chapter: i32 },
    Corked,
    Uncorked,
    VolumeChanged { volume: f32 },
    TimeChanged { time_ms: i64 },
    LengthChanged { length_ms: i64 },
    Playing,
    Paused,
    Stopped,
    EndReached,
    EncounteredError,
    Muted,
    Unmuted,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::MetaChanged { .. } => EventKind::MediaMetaChanged,
            Event::SubItemAdded { .. } => EventKind::MediaSubItemAdded,
            Event::DurationChanged { .. } => EventKind::MediaDurationChanged,
            Event::ParsedChanged { .. } => EventKind::MediaParsedChanged,
            Event::MediaFreed => EventKind::MediaFreed,
            Event::MediaStateChanged { .. } => EventKind::MediaStateChanged,
            Event::SubItemTreeAdded { .. } => EventKind::MediaSubItemTreeAdded,
            Event::Buffering { .. } => EventKind::PlayerBuffering,
            Event::PositionChanged { .. } => EventKind::PlayerPositionChanged,
            Event::AudioDevice { .. } => EventKind::PlayerAudioDevice,
            Event::Backward => EventKind::PlayerBackward,
            Event::Forward => EventKind::PlayerForward,
            Event::ChapterChanged { .. } => EventKind::PlayerChapterChanged,
            Event::Corked => EventKind::PlayerCorked,
            Event::Uncorked => EventKind::PlayerUncorked,
            Event::VolumeChanged { .. } => EventKind::PlayerVolumeChanged,
            Event::TimeChanged { .. } => EventKind::PlayerTimeChanged,
            Event::LengthChanged { .. } => EventKind::PlayerLengthChanged,
            Event::Playing => EventKind::PlayerPlaying,
            Event::Paused => EventKind::PlayerPaused,
            Event::Stopped => EventKind::PlayerStopped,
            Event::EndReached => EventKind::PlayerEndReached,
            Event::EncounteredError => EventKind::PlayerEncounteredError,
            Event::Muted => EventKind::PlayerMuted,
            Event::Unmuted => EventKind::PlayerUnmuted,
        }
    }
}

/// Handler invoked for every delivery of one event kind
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// A registered (handle, event kind, handler) triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    handle: RawHandle,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    pub fn handle(&self) -> RawHandle {
        self.handle
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

type SlotKey = (RawHandle, EventKind);

struct Slot {
    token: CallbackToken,
    handlers: Arc<Vec<(u64, EventHandler)>>,
}

impl Slot {
    /// Copy-on-write append
    fn push(&mut self, id: u64, handler: EventHandler) {
        let mut handlers = Vec::with_capacity(self.handlers.len() + 1);
        handlers.extend(self.handlers.iter().cloned());
        handlers.push((id, handler));
        self.handlers = Arc::new(handlers);
    }
}

#[derive(Default)]
struct Registry {
    slots: RwLock<HashMap<SlotKey, Slot>>,
}

impl Registry {
    /// Add a handler to an existing slot. Returns false if the key has no
    /// native callback yet.
    fn append(&self, key: SlotKey, id: u64, handler: &EventHandler) -> bool {
        match self.slots.write().get_mut(&key) {
            Some(slot) => {
                slot.push(id, Arc::clone(handler));
                true
            }
            None => false,
        }
    }

    fn dispatch(&self, handle: RawHandle, kind: EventKind, event: &Event) -> usize {
        let handlers = {
            let slots = self.slots.read();
            match slots.get(&(handle, kind)) {
                Some(slot) => Arc::clone(&slot.handlers),
                None => return 0,
            }
        };

        trace!(handle = %handle, kind = ?kind, handlers = handlers.len(), "Dispatching event");

        for (id, handler) in handlers.iter() {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(handle = %handle, kind = ?kind, subscription = id, "Event handler panicked");
            }
        }
        handlers.len()
    }
}

/// Typed subscribe/unsubscribe/dispatch over native callbacks
pub struct EventBridge {
    engine: Arc<dyn NativeEngine>,
    registry: Arc<Registry>,
    next_id: AtomicU64,
}

impl EventBridge {
    /// Create a bridge over an engine
    pub fn new(engine: Arc<dyn NativeEngine>) -> Self {
        Self {
            engine,
            registry: Arc::new(Registry::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for one event kind on one handle
    pub fn subscribe<F>(&self, handle: RawHandle, kind: EventKind, handler: F) -> Result<Subscription>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe_handler(handle, kind, Arc::new(handler))
    }

    /// Register a shared handler for one event kind on one handle
    pub fn subscribe_handler(
        &self,
        handle: RawHandle,
        kind: EventKind,
        handler: EventHandler,
    ) -> Result<Subscription> {
        if handle.is_invalid() {
            return Err(Error::invalid_argument("cannot subscribe on an invalid handle"));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = (handle, kind);
        if self.registry.append(key, id, &handler) {
            return Ok(Subscription { handle, kind, id });
        }

        // The engine may deliver events while registering, so no registry
        // lock is held across the native call.
        let registry = Arc::downgrade(&self.registry);
        let callback: NativeCallback = Arc::new(move |event: Event| {
            if let Some(registry) = registry.upgrade() {
                registry.dispatch(handle, kind, &event);
            }
        });
        let token = self.engine.register_callback(handle, kind, callback)?;

        let duplicate = {
            let mut slots = self.registry.slots.write();
            match slots.get_mut(&key) {
                // Another subscriber registered this key in the meantime
                Some(slot) => {
                    slot.push(id, handler);
                    Some(token)
                }
                None => {
                    slots.insert(
                        key,
                        Slot {
                            token,
                            handlers: Arc::new(vec![(id, handler)]),
                        },
                    );
                    None
                }
            }
        };

        match duplicate {
            Some(token) => self.engine.unregister_callback(token),
            None => debug!(handle = %handle, kind = ?kind, "Native callback registered"),
        }

        Ok(Subscription { handle, kind, id })
    }

    /// Remove a handler. Returns false (and does nothing) if it is not
    /// registered, including when it was already removed.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let key = (subscription.handle, subscription.kind);
        let released = {
            let mut slots = self.registry.slots.write();
            let Some(slot) = slots.get_mut(&key) else {
                return false;
            };
            if !slot.handlers.iter().any(|(id, _)| *id == subscription.id) {
                return false;
            }

            let handlers: Vec<_> = slot
                .handlers
                .iter()
                .filter(|(id, _)| *id != subscription.id)
                .cloned()
                .collect();

            if handlers.is_empty() {
                slots.remove(&key).map(|slot| slot.token)
            } else {
                slot.handlers = Arc::new(handlers);
                None
            }
        };

        if let Some(token) = released {
            self.engine.unregister_callback(token);
            debug!(handle = %subscription.handle, kind = ?subscription.kind, "Native callback unregistered");
        }
        true
    }

    /// Drop every subscription on a handle. Used when the handle is released.
    pub fn unsubscribe_handle(&self, handle: RawHandle) -> usize {
        let removed: Vec<Slot> = {
            let mut slots = self.registry.slots.write();
            let keys: Vec<SlotKey> = slots.keys().filter(|(h, _)| *h == handle).copied().collect();
            keys.iter().filter_map(|key| slots.remove(key)).collect()
        };

        let mut count = 0;
        for slot in removed {
            count += slot.handlers.len();
            self.engine.unregister_callback(slot.token);
        }
        count
    }

    /// Deliver an event to every handler of (handle, kind) on the calling
    /// thread. Returns the number of handlers invoked.
    pub fn dispatch(&self, handle: RawHandle, kind: EventKind, event: &Event) -> usize {
        self.registry.dispatch(handle, kind, event)
    }

    /// Number of handlers registered for (handle, kind)
    pub fn subscriber_count(&self, handle: RawHandle, kind: EventKind) -> usize {
        self.registry
            .slots
            .read()
            .get(&(handle, kind))
            .map(|slot| slot.handlers.len())
            .unwrap_or(0)
    }

    /// Number of handlers registered on a handle across all kinds
    pub fn handle_subscriber_count(&self, handle: RawHandle) -> usize {
        self.registry
            .slots
            .read()
            .iter()
            .filter(|((h, _), _)| *h == handle)
            .map(|(_, slot)| slot.handlers.len())
            .sum()
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        let slots: Vec<Slot> = self.registry.slots.write().drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            self.engine.unregister_callback(slot.token);
        }
    }
}

/// Group of subscriptions torn down together
pub struct SubscriptionSet {
    bridge: Arc<EventBridge>,
    subscriptions: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn new(bridge: Arc<EventBridge>) -> Self {
        Self {
            bridge,
            subscriptions: Vec::new(),
        }
    }

    pub fn subscribe<F>(&mut self, handle: RawHandle, kind: EventKind, handler: F) -> Result<()>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let subscription = self.bridge.subscribe(handle, kind, handler)?;
        self.subscriptions.push(subscription);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Unsubscribe everything. Safe to call repeatedly.
    pub fn clear(&mut self) -> usize {
        let count = self.subscriptions.len();
        for subscription in self.subscriptions.drain(..) {
            self.bridge.unsubscribe(&subscription);
        }
        count
    }
}

impl Drop for SubscriptionSet {
    fn drop(&mut self) {
        self.clear();
    }
}
