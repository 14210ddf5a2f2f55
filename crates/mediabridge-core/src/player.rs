//! Player session
//!
//! Pairs one native player with at most one attached [`Media`]. Swapping the
//! media tears down every subscription on the old media before any
//! subscription on the new one exists, so no event from a detached media can
//! reach a handler wired for the current one.

use crate::{
    engine::NativeEngine,
    event::{Event, EventKind, SubscriptionSet},
    handle::{Instance, NativeHandle},
    media::Media,
    types::*,
    Error, Result,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

struct AttachedMedia {
    media: Arc<Media>,
    subscriptions: SubscriptionSet,
}

/// Player session managing one native player
pub struct PlayerSession {
    /// Unique session ID
    id: SessionId,
    /// Native player handle
    handle: NativeHandle,
    /// Owning engine instance
    instance: Instance,
    /// Currently attached media and its subscriptions
    attached: Mutex<Option<AttachedMedia>>,
    /// Subscriptions on the player handle itself
    player_subscriptions: Mutex<SubscriptionSet>,
}

impl PlayerSession {
    /// Create a player on an instance. A released instance counts as absent.
    #[instrument(skip(instance))]
    pub fn new(instance: &Instance) -> Result<Self> {
        let instance_raw = instance.require_live()?;
        let engine = instance.engine().clone();
        let raw = engine.new_player(instance_raw)?;
        let handle = NativeHandle::new(engine, HandleKind::Player, raw)?;

        let id = SessionId::new();
        info!(session = %id, handle = %raw, "Player session created");

        Ok(Self {
            id,
            handle,
            instance: instance.clone(),
            attached: Mutex::new(None),
            player_subscriptions: Mutex::new(SubscriptionSet::new(instance.bridge().clone())),
        })
    }

    /// Get session ID
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn handle(&self) -> &NativeHandle {
        &self.handle
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    fn engine(&self) -> &Arc<dyn NativeEngine> {
        self.handle.engine()
    }

    /// Currently attached media
    pub fn media(&self) -> Option<Arc<Media>> {
        self.attached.lock().as_ref().map(|a| a.media.clone())
    }

    /// Attach a media without wiring any media event handlers
    pub fn attach_media(&self, media: Arc<Media>) -> Result<()> {
        self.attach_media_with(media, |_, _| Ok(()))
    }

    /// Attach a media and wire its event handlers.
    ///
    /// The previous media's subscriptions are cleared before `wire` runs.
    /// If wiring or the native attach fails the player is left with no media.
    #[instrument(skip(self, media, wire), fields(session = %self.id))]
    pub fn attach_media_with<F>(&self, media: Arc<Media>, wire: F) -> Result<()>
    where
        F: FnOnce(&Media, &mut SubscriptionSet) -> Result<()>,
    {
        let player = self.handle.get()?;
        let media_raw = media.handle().get()?;

        // Declared before the guard so it drops after the lock is released.
        // Dropping the last reference releases the media, which fires
        // media-freed to handlers that may call back into this session.
        let mut previous = None;
        let mut attached = self.attached.lock();
        if let Some(mut detached) = attached.take() {
            let removed = detached.subscriptions.clear();
            debug!(previous = %detached.media.handle().raw(), removed, "Detached previous media");
            previous = Some(detached);
        }

        let mut subscriptions = SubscriptionSet::new(self.instance.bridge().clone());
        let wired = wire(&media, &mut subscriptions)
            .and_then(|_| self.engine().set_player_media(player, Some(media_raw)));
        if let Err(err) = wired {
            subscriptions.clear();
            if let Err(cleanup) = self.engine().set_player_media(player, None) {
                warn!(error = %cleanup, "Failed to clear player media after a failed attach");
            }
            return Err(err);
        }

        info!(media = %media_raw, subscriptions = subscriptions.len(), "Media attached");
        *attached = Some(AttachedMedia { media, subscriptions });
        drop(attached);
        drop(previous);
        Ok(())
    }

    /// Detach the current media. Returns it, if there was one.
    pub fn detach_media(&self) -> Result<Option<Arc<Media>>> {
        let player = self.handle.get()?;
        let previous = self.attached.lock().take();
        let Some(mut previous) = previous else {
            return Ok(None);
        };
        previous.subscriptions.clear();
        self.engine().set_player_media(player, None)?;
        Ok(Some(previous.media.clone()))
    }

    /// Subscribe to one of the player's events
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Result<()>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        if kind.is_media_event() {
            return Err(Error::invalid_argument(format!("{kind:?} is not a player event")));
        }
        let raw = self.handle.get()?;
        self.player_subscriptions.lock().subscribe(raw, kind, handler)
    }

    fn require_media(&self, action: &str) -> Result<RawHandle> {
        let raw = self.handle.get()?;
        if self.attached.lock().is_none() {
            return Err(Error::InvalidState(format!("cannot {action}: no media attached")));
        }
        Ok(raw)
    }

    pub fn play(&self) -> Result<()> {
        let raw = self.require_media("play")?;
        self.engine().play(raw)
    }

    pub fn pause(&self) -> Result<()> {
        let raw = self.require_media("pause")?;
        self.engine().pause(raw)
    }

    pub fn stop(&self) -> Result<()> {
        let raw = self.require_media("stop")?;
        self.engine().stop(raw)
    }

    /// Position as a fraction of the media length
    pub fn position(&self) -> Result<f32> {
        let raw = self.handle.get()?;
        self.engine().position(raw)
    }

    pub fn set_position(&self, position: f32) -> Result<()> {
        let raw = self.handle.get()?;
        self.engine().set_position(raw, position)
    }

    pub fn state(&self) -> Result<PlayerState> {
        let raw = self.handle.get()?;
        self.engine().player_state(raw)
    }

    pub fn volume(&self) -> Result<i32> {
        let raw = self.handle.get()?;
        self.engine().volume(raw)
    }

    pub fn set_volume(&self, volume: i32) -> Result<()> {
        let raw = self.handle.get()?;
        self.engine().set_volume(raw, volume)
    }

    /// Drop every subscription, forget the media and release the player.
    /// Idempotent.
    pub fn release(&self) -> bool {
        let attached = self.attached.lock().take();
        if let Some(mut attached) = attached {
            attached.subscriptions.clear();
        }
        self.player_subscriptions.lock().clear();
        let released = self.handle.release();
        if released {
            info!(session = %self.id, "Player session released");
        }
        released
    }
}

impl Drop for PlayerSession {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PlayerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerSession")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("media", &self.media().map(|m| m.handle().raw()))
            .finish()
    }
}
