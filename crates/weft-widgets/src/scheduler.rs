#![forbid(unsafe_code)]

//! Frame scheduler for view re-renders.
//!
//! Change notifications arrive synchronously and often in bursts (a command
//! that writes three properties notifies three times). Views therefore never
//! re-render from inside a notification; they [`schedule`](RenderScheduler::schedule)
//! themselves, and the host calls [`flush`](RenderScheduler::flush) once per
//! frame.
//!
//! # Invariants
//!
//! - A view is queued at most once per pass, however many times it is
//!   scheduled.
//! - Views scheduled while a pass runs are rendered in the next pass of the
//!   same flush, up to [`SchedulerConfig::max_passes`]; anything left after
//!   that stays pending for the next frame.
//! - Views dropped while queued are skipped.
//! - If a render panics, the rest of its batch goes back on the queue before
//!   the panic propagates.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashSet;

static NEXT_VIEW_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a mounted view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ViewId(u64);

impl ViewId {
    pub(crate) fn next() -> Self {
        Self(NEXT_VIEW_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view #{}", self.0)
    }
}

/// Something the scheduler can re-render.
pub trait Rerender {
    fn view_id(&self) -> ViewId;
    fn rerender(&self);
}

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchedulerConfig {
    /// Upper bound on passes per [`RenderScheduler::flush`]. Guards against
    /// views that keep re-scheduling each other.
    pub max_passes: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_passes: 16 }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    queue: RefCell<Vec<Weak<dyn Rerender>>>,
    queued: RefCell<AHashSet<ViewId>>,
    flushing: Cell<bool>,
    flushes: Cell<u64>,
}

/// Coalescing re-render queue. Cloning shares the same queue.
#[derive(Clone)]
pub struct RenderScheduler {
    inner: Rc<SchedulerInner>,
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    #[must_use]
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            inner: Rc::new(SchedulerInner {
                config,
                queue: RefCell::new(Vec::new()),
                queued: RefCell::new(AHashSet::new()),
                flushing: Cell::new(false),
                flushes: Cell::new(0),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> SchedulerConfig {
        self.inner.config
    }

    /// Queue `view` for the next pass. Returns `false` if it was already
    /// queued.
    pub fn schedule(&self, id: ViewId, view: Weak<dyn Rerender>) -> bool {
        if !self.inner.queued.borrow_mut().insert(id) {
            return false;
        }
        self.inner.queue.borrow_mut().push(view);
        true
    }

    /// Views waiting for a pass.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    /// Number of completed [`flush`](Self::flush) calls.
    #[must_use]
    pub fn flush_count(&self) -> u64 {
        self.inner.flushes.get()
    }

    /// Re-render every queued view. Returns the number of renders.
    ///
    /// Calling `flush` from inside a render is a no-op returning 0.
    pub fn flush(&self) -> usize {
        if self.inner.flushing.replace(true) {
            return 0;
        }
        struct Reset<'a>(&'a Cell<bool>);
        impl Drop for Reset<'_> {
            fn drop(&mut self) {
                self.0.set(false);
            }
        }
        let _reset = Reset(&self.inner.flushing);

        let max_passes = self.inner.config.max_passes.max(1);
        let mut renders = 0;
        let mut passes = 0;
        while self.pending() > 0 {
            if passes == max_passes {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    passes,
                    pending = self.pending(),
                    "render flush pass limit reached; leaving views pending"
                );
                break;
            }
            passes += 1;
            let batch = std::mem::take(&mut *self.inner.queue.borrow_mut());
            self.inner.queued.borrow_mut().clear();
            let mut rest = Requeue {
                inner: &self.inner,
                views: batch.into_iter(),
            };
            for view in rest.views.by_ref() {
                if let Some(view) = view.upgrade() {
                    view.rerender();
                    renders += 1;
                }
            }
        }

        self.inner.flushes.set(self.inner.flushes.get() + 1);
        #[cfg(feature = "tracing")]
        tracing::debug!(renders, passes, "render flush");
        renders
    }
}

/// Puts the unrendered tail of a batch back on the queue if a render
/// unwinds out of [`RenderScheduler::flush`].
struct Requeue<'a> {
    inner: &'a SchedulerInner,
    views: std::vec::IntoIter<Weak<dyn Rerender>>,
}

impl Drop for Requeue<'_> {
    fn drop(&mut self) {
        for weak in self.views.by_ref() {
            let Some(view) = weak.upgrade() else {
                continue;
            };
            if self.inner.queued.borrow_mut().insert(view.view_id()) {
                self.inner.queue.borrow_mut().push(weak);
            }
        }
    }
}

impl fmt::Debug for RenderScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderScheduler")
            .field("config", &self.inner.config)
            .field("pending", &self.pending())
            .field("flushing", &self.inner.flushing.get())
            .finish()
    }
}
