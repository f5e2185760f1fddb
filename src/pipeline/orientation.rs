use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU8, Ordering},
};

use crate::types::Orientation;

type Listener = Arc<dyn Fn(Orientation) + Send + Sync>;

/// Process-wide device orientation. Clones share the same state.
///
/// The frame loop only snapshots `current()` at the start of a cycle; a change
/// delivered mid-cycle is picked up by the next one.
#[derive(Clone)]
pub struct OrientationTracker {
    inner: Arc<Inner>,
}

struct Inner {
    current: AtomicU8,
    listeners: Mutex<Vec<Listener>>,
}

impl OrientationTracker {
    pub fn new(initial: Orientation) -> Self {
        Self {
            inner: Arc::new(Inner {
                current: AtomicU8::new(initial.to_bits()),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn current(&self) -> Orientation {
        Orientation::from_bits(self.inner.current.load(Ordering::Acquire))
    }

    /// Record a new orientation and notify listeners if it changed. Listeners
    /// run on the caller's thread, outside the registry lock, so they may call
    /// `set` or `on_change` themselves.
    pub fn set(&self, orientation: Orientation) {
        let previous = self.inner.current.swap(orientation.to_bits(), Ordering::AcqRel);
        let previous = Orientation::from_bits(previous);
        if previous == orientation {
            return;
        }

        log::debug!("orientation changed {previous} -> {orientation}");
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            listener(orientation);
        }
    }

    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(Orientation) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }
}

impl Default for OrientationTracker {
    fn default() -> Self {
        Self::new(Orientation::PortraitUp)
    }
}

impl std::fmt::Debug for OrientationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrientationTracker")
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}
