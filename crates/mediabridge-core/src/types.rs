//! Core types for MediaBridge

use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};
use uuid::Uuid;

/// Unique identifier for a projection session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of a native resource.
///
/// Zero is the sentinel for "no resource"; a released [`crate::NativeHandle`]
/// reads back as [`RawHandle::INVALID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RawHandle(pub u64);

impl RawHandle {
    pub const INVALID: RawHandle = RawHandle(0);

    pub fn is_invalid(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for RawHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Kind of native resource a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleKind {
    /// Engine instance every media and player is created from
    Instance,
    Media,
    Player,
}

impl std::fmt::Display for HandleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandleKind::Instance => write!(f, "instance"),
            HandleKind::Media => write!(f, "media"),
            HandleKind::Player => write!(f, "player"),
        }
    }
}

/// Parse status of a media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsedStatus {
    #[default]
    NotParsed,
    Parsing,
    Done,
    Failed,
    Timeout,
    Cancelled,
}

impl ParsedStatus {
    /// Returns true if no further parse event can change this status
    /// within the current parse.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ParsedStatus::NotParsed | ParsedStatus::Parsing)
    }
}

impl std::fmt::Display for ParsedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParsedStatus::NotParsed => write!(f, "not_parsed"),
            ParsedStatus::Parsing => write!(f, "parsing"),
            ParsedStatus::Done => write!(f, "done"),
            ParsedStatus::Failed => write!(f, "failed"),
            ParsedStatus::Timeout => write!(f, "timeout"),
            ParsedStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal result of an asynchronous parse.
///
/// Each variant is a distinct reason; only `Done` counts as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseOutcome {
    Done,
    Failed,
    Timeout,
    Cancelled,
}

impl ParseOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ParseOutcome::Done)
    }

    /// Map a native status onto an outcome. Non-terminal statuses have none.
    pub fn from_status(status: ParsedStatus) -> Option<Self> {
        match status {
            ParsedStatus::Done => Some(ParseOutcome::Done),
            ParsedStatus::Failed => Some(ParseOutcome::Failed),
            ParsedStatus::Timeout => Some(ParseOutcome::Timeout),
            ParsedStatus::Cancelled => Some(ParseOutcome::Cancelled),
            ParsedStatus::NotParsed | ParsedStatus::Parsing => None,
        }
    }
}

impl From<ParseOutcome> for ParsedStatus {
    fn from(outcome: ParseOutcome) -> Self {
        match outcome {
            ParseOutcome::Done => ParsedStatus::Done,
            ParseOutcome::Failed => ParsedStatus::Failed,
            ParseOutcome::Timeout => ParsedStatus::Timeout,
            ParseOutcome::Cancelled => ParsedStatus::Cancelled,
        }
    }
}

impl std::fmt::Display for ParseOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        ParsedStatus::from(*self).fmt(f)
    }
}

/// Native parse option bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParseFlags(pub u32);

impl ParseFlags {
    /// Parse local media only
    pub const LOCAL: ParseFlags = ParseFlags(0x00);
    /// Parse network media too
    pub const NETWORK: ParseFlags = ParseFlags(0x01);
    /// Fetch metadata and artwork with local resources
    pub const FETCH_LOCAL: ParseFlags = ParseFlags(0x02);
    /// Fetch metadata and artwork over the network
    pub const FETCH_NETWORK: ParseFlags = ParseFlags(0x04);
    /// Allow the engine to ask the user (login dialogs etc.)
    pub const INTERACT: ParseFlags = ParseFlags(0x08);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: ParseFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ParseFlags {
    type Output = ParseFlags;

    fn bitor(self, rhs: ParseFlags) -> ParseFlags {
        ParseFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ParseFlags {
    fn bitor_assign(&mut self, rhs: ParseFlags) {
        self.0 |= rhs.0;
    }
}

/// What a media resolves to once opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    #[default]
    Unknown,
    File,
    Directory,
    Disc,
    Stream,
    Playlist,
}

/// Playback state reported by the native player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    #[default]
    NothingSpecial,
    Opening,
    Buffering,
    Playing,
    Paused,
    Stopped,
    Ended,
    Error,
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerState::NothingSpecial => write!(f, "nothing_special"),
            PlayerState::Opening => write!(f, "opening"),
            PlayerState::Buffering => write!(f, "buffering"),
            PlayerState::Playing => write!(f, "playing"),
            PlayerState::Paused => write!(f, "paused"),
            PlayerState::Stopped => write!(f, "stopped"),
            PlayerState::Ended => write!(f, "ended"),
            PlayerState::Error => write!(f, "error"),
        }
    }
}

/// Metadata keys understood by the native engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKey {
    Title,
    Artist,
    Genre,
    Copyright,
    Album,
    TrackNumber,
    Description,
    Rating,
    Date,
    Setting,
    Url,
    Language,
    NowPlaying,
    Publisher,
    EncodedBy,
    ArtworkUrl,
    TrackId,
    TrackTotal,
    Director,
    Season,
    Episode,
    ShowName,
    Actors,
    AlbumArtist,
    DiscNumber,
    DiscTotal,
}

/// Track category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    Audio,
    Video,
    Subtitle,
    Unknown,
}

/// Type-specific track attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackDetails {
    Audio {
        channels: u32,
        rate: u32,
    },
    Video {
        width: u32,
        height: u32,
        frame_rate_num: u32,
        frame_rate_den: u32,
    },
    Subtitle {
        encoding: Option<String>,
    },
    Unknown,
}

/// Elementary stream discovered by a parse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Native track id
    pub id: i32,
    /// Codec fourcc, e.g. "mp4a"
    pub codec: String,
    /// Bitrate in bits per second, 0 when unknown
    pub bitrate: u32,
    pub language: Option<String>,
    pub description: Option<String>,
    pub details: TrackDetails,
}

impl Track {
    pub fn track_type(&self) -> TrackType {
        match self.details {
            TrackDetails::Audio { .. } => TrackType::Audio,
            TrackDetails::Video { .. } => TrackType::Video,
            TrackDetails::Subtitle { .. } => TrackType::Subtitle,
            TrackDetails::Unknown => TrackType::Unknown,
        }
    }

    /// Audio channel count, if this is an audio track
    pub fn channels(&self) -> Option<u32> {
        match self.details {
            TrackDetails::Audio { channels, .. } => Some(channels),
            _ => None,
        }
    }
}
