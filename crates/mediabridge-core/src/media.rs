//! Media objects
//!
//! A [`Media`] owns one native media handle. Parse-dependent fields
//! (status, duration, tracks, metadata) are read from the engine on demand;
//! every accessor checks the handle first and fails with
//! [`Error::Disposed`] after release instead of returning stale data.

use crate::{
    engine::{MediaSource, NativeEngine},
    event::{Event, EventBridge, EventKind, Subscription},
    handle::{Instance, NativeHandle},
    types::*,
    Error, Result,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// A media opened from a path, location or byte stream
pub struct Media {
    handle: NativeHandle,
    instance: Instance,
    source: MediaSource,
    /// Status decided locally (timeout, cancellation) that the engine
    /// itself never reports. Cleared when the next parse starts.
    local_status: Mutex<Option<ParsedStatus>>,
}

impl Media {
    /// Open a media. Fails with [`Error::InvalidArgument`] if the instance
    /// has been released.
    #[instrument(skip(instance, source), fields(source = %source.describe()))]
    pub fn new(instance: &Instance, source: MediaSource) -> Result<Self> {
        let instance_raw = instance.require_live()?;
        let engine = instance.engine().clone();

        let raw = engine.open_media(instance_raw, &source)?;
        let handle = NativeHandle::new(engine, HandleKind::Media, raw)?;
        info!(handle = %raw, "Media opened");

        Ok(Self {
            handle,
            instance: instance.clone(),
            source,
            local_status: Mutex::new(None),
        })
    }

    pub fn from_path(instance: &Instance, path: impl AsRef<Path>) -> Result<Self> {
        Self::new(instance, MediaSource::path(path)?)
    }

    pub fn from_location(instance: &Instance, location: &str) -> Result<Self> {
        Self::new(instance, MediaSource::location(location)?)
    }

    pub fn from_stream(instance: &Instance, data: impl Into<Bytes>) -> Result<Self> {
        Self::new(instance, MediaSource::stream(data)?)
    }

    pub fn handle(&self) -> &NativeHandle {
        &self.handle
    }

    pub fn source(&self) -> &MediaSource {
        &self.source
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub(crate) fn engine(&self) -> &Arc<dyn NativeEngine> {
        self.handle.engine()
    }

    pub(crate) fn bridge(&self) -> &Arc<EventBridge> {
        self.instance.bridge()
    }

    /// Independent media on the same native resource
    pub fn duplicate(&self) -> Result<Media> {
        let handle = self.handle.duplicate()?;
        debug!(original = %self.handle.raw(), copy = %handle.raw(), "Media duplicated");
        Ok(Self {
            handle,
            instance: self.instance.clone(),
            source: self.source.clone(),
            local_status: Mutex::new(None),
        })
    }

    pub fn parsed_status(&self) -> Result<ParsedStatus> {
        let raw = self.handle.get()?;
        if let Some(status) = *self.local_status.lock() {
            return Ok(status);
        }
        self.engine().parsed_status(raw)
    }

    pub(crate) fn set_local_status(&self, status: Option<ParsedStatus>) {
        *self.local_status.lock() = status;
    }

    pub fn is_parsed(&self) -> Result<bool> {
        Ok(self.parsed_status()? == ParsedStatus::Done)
    }

    /// Duration, `None` until the engine knows it
    pub fn duration(&self) -> Result<Option<Duration>> {
        Ok(self
            .duration_ms()?
            .filter(|ms| *ms >= 0)
            .map(|ms| Duration::from_millis(ms as u64)))
    }

    /// Duration in milliseconds, `None` until the engine knows it
    pub fn duration_ms(&self) -> Result<Option<i64>> {
        let raw = self.handle.get()?;
        self.engine().duration_ms(raw)
    }

    pub fn tracks(&self) -> Result<Vec<Track>> {
        let raw = self.handle.get()?;
        self.engine().tracks(raw)
    }

    pub fn media_type(&self) -> Result<MediaType> {
        let raw = self.handle.get()?;
        self.engine().media_type(raw)
    }

    /// Pass an engine option (e.g. `:no-audio`) to this media
    pub fn add_option(&self, option: &str) -> Result<()> {
        let raw = self.handle.get()?;
        if option.trim().is_empty() {
            return Err(Error::invalid_argument("media option is empty"));
        }
        self.engine().add_option(raw, option)
    }

    pub fn meta(&self, key: MetadataKey) -> Result<Option<String>> {
        let raw = self.handle.get()?;
        self.engine().meta(raw, key)
    }

    pub fn set_meta(&self, key: MetadataKey, value: &str) -> Result<()> {
        let raw = self.handle.get()?;
        self.engine().set_meta(raw, key, value)
    }

    /// Persist metadata to the source. Returns false when the source does
    /// not support saving.
    pub fn save_meta(&self) -> Result<bool> {
        let raw = self.handle.get()?;
        let saved = self.engine().save_meta(raw)?;
        debug!(handle = %raw, saved, "Metadata save requested");
        Ok(saved)
    }

    /// Subscribe to one of this media's events
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Result<Subscription>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        if !kind.is_media_event() {
            return Err(Error::invalid_argument(format!("{kind:?} is not a media event")));
        }
        let raw = self.handle.get()?;
        self.bridge().subscribe(raw, kind, handler)
    }

    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.bridge().unsubscribe(subscription)
    }

    /// Release the native media. Idempotent; the engine's media-freed
    /// event reaches subscribers before they are dropped.
    pub fn release(&self) -> bool {
        let raw = self.handle.raw();
        if !self.handle.release() {
            return false;
        }
        self.bridge().unsubscribe_handle(raw);
        true
    }
}

impl Drop for Media {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Media {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Media")
            .field("handle", &self.handle)
            .field("source", &self.source.describe())
            .finish()
    }
}
