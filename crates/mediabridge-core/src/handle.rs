//! Native handle lifecycle
//!
//! A [`NativeHandle`] owns exactly one release obligation. Release swaps the
//! stored id to [`RawHandle::INVALID`] atomically, so it is idempotent and
//! safe against concurrent readers: a read that races with release either
//! sees the live id or fails with [`Error::Disposed`], never a stale id
//! obtained after release.

use crate::{
    config::CoreConfig,
    engine::NativeEngine,
    event::EventBridge,
    types::*,
    Error, Result,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Owned handle to a native resource
pub struct NativeHandle {
    raw: AtomicU64,
    kind: HandleKind,
    engine: Arc<dyn NativeEngine>,
}

impl NativeHandle {
    /// Take ownership of a handle freshly returned by the engine
    pub(crate) fn new(engine: Arc<dyn NativeEngine>, kind: HandleKind, raw: RawHandle) -> Result<Self> {
        if raw.is_invalid() {
            return Err(Error::native(format!("engine returned an invalid {kind} handle")));
        }
        debug!(kind = %kind, handle = %raw, "Handle acquired");
        Ok(Self {
            raw: AtomicU64::new(raw.0),
            kind,
            engine,
        })
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Current id; [`RawHandle::INVALID`] once released
    pub fn raw(&self) -> RawHandle {
        RawHandle(self.raw.load(Ordering::Acquire))
    }

    /// Current id, or [`Error::Disposed`] once released
    pub fn get(&self) -> Result<RawHandle> {
        let raw = self.raw();
        if raw.is_invalid() {
            return Err(Error::Disposed { kind: self.kind });
        }
        Ok(raw)
    }

    pub fn is_valid(&self) -> bool {
        !self.raw().is_invalid()
    }

    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    /// Create an independent handle on the same native media. The copy has
    /// its own release obligation and a different id.
    pub fn duplicate(&self) -> Result<NativeHandle> {
        if self.kind != HandleKind::Media {
            return Err(Error::InvalidState(format!("{} handles cannot be duplicated", self.kind)));
        }
        let raw = self.get()?;
        let copy = self.engine.duplicate_media(raw)?;
        NativeHandle::new(self.engine.clone(), self.kind, copy)
    }

    /// Release the native resource. Returns true only for the call that
    /// actually released it; later calls are no-ops.
    pub fn release(&self) -> bool {
        let raw = RawHandle(self.raw.swap(RawHandle::INVALID.0, Ordering::AcqRel));
        if raw.is_invalid() {
            return false;
        }
        self.engine.release(raw);
        debug!(kind = %self.kind, handle = %raw, "Handle released");
        true
    }
}

impl Drop for NativeHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeHandle")
            .field("kind", &self.kind)
            .field("raw", &self.raw())
            .finish()
    }
}

struct InstanceInner {
    handle: NativeHandle,
    bridge: Arc<EventBridge>,
    config: CoreConfig,
}

/// Engine instance every media and player is created from.
///
/// Cheap to clone; all clones share one native handle and one
/// [`EventBridge`].
#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

impl Instance {
    /// Create an instance with the default configuration
    pub fn new(engine: Arc<dyn NativeEngine>) -> Result<Self> {
        Self::with_config(engine, CoreConfig::default())
    }

    /// Create an instance with an explicit configuration
    pub fn with_config(engine: Arc<dyn NativeEngine>, config: CoreConfig) -> Result<Self> {
        config.validate()?;
        let raw = engine.new_instance()?;
        let handle = NativeHandle::new(engine.clone(), HandleKind::Instance, raw)?;
        info!(handle = %raw, "Engine instance created");

        Ok(Self {
            inner: Arc::new(InstanceInner {
                handle,
                bridge: Arc::new(EventBridge::new(engine)),
                config,
            }),
        })
    }

    pub fn handle(&self) -> &NativeHandle {
        &self.inner.handle
    }

    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        self.inner.handle.engine()
    }

    pub fn bridge(&self) -> &Arc<EventBridge> {
        &self.inner.bridge
    }

    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    /// Live id for creating children. A released instance counts as absent.
    pub(crate) fn require_live(&self) -> Result<RawHandle> {
        self.inner
            .handle
            .get()
            .map_err(|_| Error::invalid_argument("engine instance is absent (already released)"))
    }

    /// Release the instance handle. Idempotent.
    pub fn release(&self) -> bool {
        self.inner.handle.release()
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("handle", &self.inner.handle)
            .finish()
    }
}
