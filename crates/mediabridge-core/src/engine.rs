//! Native engine surface
//!
//! The bridge never decodes, demuxes or renders anything itself. Everything it
//! needs from the media engine goes through [`NativeEngine`]: opening
//! resources, starting and stopping a parse, registering raw callbacks and
//! releasing handles, plus the handful of accessors the projector reads.
//!
//! Engines deliver callbacks on threads they own. A [`NativeCallback`] must
//! therefore be `Send + Sync` and must not assume anything about the calling
//! thread.

use crate::{
    event::{Event, EventKind},
    types::*,
    Error, Result,
};
use bytes::Bytes;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Raw callback handed to the engine for one (handle, event kind) pair
pub type NativeCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// Token returned by the engine for a registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackToken(pub u64);

/// Where a media comes from
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSource {
    /// Local filesystem path
    Path(PathBuf),
    /// Location URI (file://, http://, ...)
    Location(Url),
    /// In-memory byte stream
    Stream(Bytes),
}

impl MediaSource {
    /// Source from a local path. Empty paths are rejected.
    pub fn path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::invalid_argument("media path is empty"));
        }
        Ok(MediaSource::Path(path.to_path_buf()))
    }

    /// Source from a location URI. Empty or unparsable locations are rejected.
    pub fn location(location: &str) -> Result<Self> {
        let location = location.trim();
        if location.is_empty() {
            return Err(Error::invalid_argument("media location is empty"));
        }
        let url = Url::parse(location)
            .map_err(|e| Error::invalid_argument(format!("invalid media location {location:?}: {e}")))?;
        Ok(MediaSource::Location(url))
    }

    /// Source from an in-memory stream. Empty streams are rejected.
    pub fn stream(data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        if data.is_empty() {
            return Err(Error::invalid_argument("media stream is empty"));
        }
        Ok(MediaSource::Stream(data))
    }

    /// Drain a reader into a stream source
    pub fn from_reader(mut reader: impl Read) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::stream(data)
    }

    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            MediaSource::Path(path) => path.display().to_string(),
            MediaSource::Location(url) => url.to_string(),
            MediaSource::Stream(data) => format!("<stream {} bytes>", data.len()),
        }
    }
}

/// Primitive operations of a callback-driven native media engine.
///
/// Implementations wrap the real engine's C surface (or, for tests, an
/// in-process simulation). All methods may be called from any thread.
/// Calls on a handle the engine no longer knows must fail or do nothing;
/// they must never crash.
pub trait NativeEngine: Send + Sync {
    /// Create an engine instance
    fn new_instance(&self) -> Result<RawHandle>;

    /// Open a media from a source description
    fn open_media(&self, instance: RawHandle, source: &MediaSource) -> Result<RawHandle>;

    /// Create a second, independently releasable handle on the same media
    fn duplicate_media(&self, media: RawHandle) -> Result<RawHandle>;

    /// Create a player bound to an instance
    fn new_player(&self, instance: RawHandle) -> Result<RawHandle>;

    /// Release any handle. Unknown handles are ignored.
    fn release(&self, handle: RawHandle);

    /// Start parsing. Completion is reported through a
    /// [`EventKind::MediaParsedChanged`] callback. A `timeout_ms` of `None`
    /// leaves the engine's own default in place.
    fn start_parse(&self, media: RawHandle, flags: ParseFlags, timeout_ms: Option<u64>) -> Result<()>;

    /// Best-effort request to stop an in-flight parse
    fn stop_parse(&self, media: RawHandle);

    /// Register a raw callback for one event kind on one handle. The callback
    /// may be invoked before this returns.
    fn register_callback(
        &self,
        handle: RawHandle,
        kind: EventKind,
        callback: NativeCallback,
    ) -> Result<CallbackToken>;

    /// Remove a registered callback. Unknown tokens are ignored.
    fn unregister_callback(&self, token: CallbackToken);

    // Media accessors

    fn parsed_status(&self, media: RawHandle) -> Result<ParsedStatus>;

    /// Duration in milliseconds, `None` while unknown
    fn duration_ms(&self, media: RawHandle) -> Result<Option<i64>>;

    fn tracks(&self, media: RawHandle) -> Result<Vec<Track>>;

    fn media_type(&self, media: RawHandle) -> Result<MediaType>;

    fn add_option(&self, media: RawHandle, option: &str) -> Result<()>;

    fn meta(&self, media: RawHandle, key: MetadataKey) -> Result<Option<String>>;

    fn set_meta(&self, media: RawHandle, key: MetadataKey, value: &str) -> Result<()>;

    /// Persist metadata to the underlying source. `false` when the source
    /// does not support it.
    fn save_meta(&self, media: RawHandle) -> Result<bool>;

    // Player primitives

    fn set_player_media(&self, player: RawHandle, media: Option<RawHandle>) -> Result<()>;

    fn play(&self, player: RawHandle) -> Result<()>;

    fn pause(&self, player: RawHandle) -> Result<()>;

    fn stop(&self, player: RawHandle) -> Result<()>;

    /// Position as a fraction of the media length, 0.0 to 1.0
    fn position(&self, player: RawHandle) -> Result<f32>;

    fn set_position(&self, player: RawHandle, position: f32) -> Result<()>;

    fn player_state(&self, player: RawHandle) -> Result<PlayerState>;

    /// Volume in percent
    fn volume(&self, player: RawHandle) -> Result<i32>;

    fn set_volume(&self, player: RawHandle, volume: i32) -> Result<()>;
}
