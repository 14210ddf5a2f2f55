//! MediaBridge Core - async event bridge over a callback-driven media engine
//!
//! This crate sits between a native media engine that reports everything
//! through fire-and-forget callbacks and application code that wants futures
//! and observable properties:
//! - Native handle lifecycle with idempotent release
//! - Typed event subscription over raw native callbacks
//! - Parsing as a single cancellable, timeout-bounded future
//! - Player state projected into properties on a UI-affine scheduler
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       MediaBridge Core                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐                      ┌──────────────┐         │
//! │  │    Parse     │                      │    State     │         │
//! │  │ Coordinator  │                      │  Projector   │──▶ UI   │
//! │  └──────┬───────┘                      └──────┬───────┘  sched. │
//! │         │                                     │                 │
//! │         │      ┌───────────────────────┐      │                 │
//! │         └─────▶│      Event Bridge     │◀─────┘                 │
//! │                └───────────┬───────────┘                        │
//! │                            │                                    │
//! │                ┌───────────┴───────────┐                        │
//! │                │   Handle Lifecycle    │                        │
//! │                │ Instance/Media/Player │                        │
//! │                └───────────┬───────────┘                        │
//! └────────────────────────────┼────────────────────────────────────┘
//!                              ▼
//!                     NativeEngine (trait)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use mediabridge_core::{Instance, Media, ParseOptions, SimulatedEngine};
//!
//! # async fn run() -> mediabridge_core::Result<()> {
//! let instance = Instance::new(Arc::new(SimulatedEngine::new()))?;
//! let media = Media::from_path(&instance, "/music/track.flac")?;
//! let outcome = media
//!     .parse_async(ParseOptions::new().with_timeout(Duration::from_secs(5)))
//!     .await?;
//! println!("parsed: {outcome}, duration: {:?}", media.duration()?);
//! # Ok(())
//! # }
//! ```

pub mod completion;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod handle;
pub mod media;
pub mod parse;
pub mod player;
pub mod projector;
pub mod scheduler;
#[cfg(any(test, feature = "simulated"))]
pub mod sim;
pub mod types;

pub use completion::Settlement;
pub use config::CoreConfig;
pub use engine::{CallbackToken, MediaSource, NativeCallback, NativeEngine};
pub use error::{Error, Result};
pub use event::{Event, EventBridge, EventHandler, EventKind, Subscription, SubscriptionSet};
pub use handle::{Instance, NativeHandle};
pub use media::Media;
pub use parse::ParseOptions;
pub use player::PlayerSession;
pub use projector::{ObserverId, PlaybackSnapshot, Property, StateProjector, StateProjectorBuilder};
pub use scheduler::{DispatchQueue, UiScheduler, UnitOfWork};
#[cfg(any(test, feature = "simulated"))]
pub use sim::{ParseBehavior, SimSource, SimulatedEngine};
pub use types::*;

pub use tokio_util::sync::CancellationToken;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version once at startup
pub fn init() {
    tracing::info!(version = VERSION, "MediaBridge Core initialized");
}
