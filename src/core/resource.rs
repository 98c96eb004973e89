//! Observable load lifecycle for one cacheable object.
//!
//! A [`Resource`] moves `Init → Loading → Ready | Error` through
//! [`Resource::load`], and back to `Init` through [`Resource::reset`]. State
//! changes are announced to listeners synchronously, on the owning thread,
//! in registration order.
//!
//! Listeners may add or remove listeners (including themselves) while being
//! notified. Removal during a dispatch tombstones the entry; the list is
//! compacted once the outermost dispatch returns. Listeners added during a
//! dispatch are first notified on the next state change.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::core::{StoreEntry, TaskError, TaskHandle, TaskQueue};
use crate::util::panic_message;

/// Lifecycle state of a [`Resource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// Created, not yet loading.
    Init,
    /// Work dispatched to the worker pool.
    Loading,
    /// Payload available.
    Ready,
    /// Load failed; no payload.
    Error,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Identifier returned by [`Resource::add_listener`]. Never zero.
pub type ListenerId = u32;

/// Pure decode step run on a worker thread: resource id in, payload out.
pub type Loader<P> = Arc<dyn Fn(&str) -> anyhow::Result<P> + Send + Sync>;

type Listener<P> = Rc<dyn Fn(&Resource<P>)>;

struct ListenerEntry<P> {
    id: ListenerId,
    /// `None` marks a tombstone left by removal during dispatch.
    callback: Option<Listener<P>>,
}

struct Listeners<P> {
    entries: Vec<ListenerEntry<P>>,
    next_id: ListenerId,
    dispatch_depth: u32,
    tombstones: usize,
}

impl<P> Listeners<P> {
    const fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
            dispatch_depth: 0,
            tombstones: 0,
        }
    }
}

/// A cacheable object populated asynchronously by a [`Loader`].
///
/// Shared as `Rc<Resource<P>>` between its store and every consumer. All
/// methods must be called on the thread that owns the [`TaskQueue`] used to
/// load it.
pub struct Resource<P> {
    id: String,
    loader: Loader<P>,
    state: Cell<ResourceState>,
    payload: RefCell<Option<Rc<P>>>,
    error: RefCell<Option<Rc<TaskError>>>,
    ref_count: Cell<i32>,
    listeners: RefCell<Listeners<P>>,
    in_flight: RefCell<TaskHandle>,
}

impl<P: Send + 'static> Resource<P> {
    /// Create a resource in `Init` with a reference count of one.
    pub fn new<F>(id: impl Into<String>, loader: F) -> Rc<Self>
    where
        F: Fn(&str) -> anyhow::Result<P> + Send + Sync + 'static,
    {
        Self::with_loader(id, Arc::new(loader))
    }

    /// Create a resource sharing an existing loader.
    pub fn with_loader(id: impl Into<String>, loader: Loader<P>) -> Rc<Self> {
        Rc::new(Self {
            id: id.into(),
            loader,
            state: Cell::new(ResourceState::Init),
            payload: RefCell::new(None),
            error: RefCell::new(None),
            ref_count: Cell::new(1),
            listeners: RefCell::new(Listeners::new()),
            in_flight: RefCell::new(TaskHandle::default()),
        })
    }

    /// Start loading on `queue`'s worker pool.
    ///
    /// Any previous in-flight load is cancelled. A `Ready` or `Error`
    /// resource is silently reset first, so listeners always observe
    /// `Init → Loading → Ready | Error` within one load cycle. If the queue
    /// refuses the work the resource moves straight to `Error` and the
    /// returned handle is empty.
    pub fn load(self: &Rc<Self>, queue: &TaskQueue) -> TaskHandle {
        self.in_flight.replace(TaskHandle::default()).cancel();

        if matches!(self.state(), ResourceState::Ready | ResourceState::Error) {
            self.clear_results();
            self.set_state(ResourceState::Init, false);
        }
        self.set_state(ResourceState::Loading, true);
        if self.state() != ResourceState::Loading {
            debug!(resource = %self.id, "load superseded by a listener");
            return TaskHandle::default();
        }

        let loader = Arc::clone(&self.loader);
        let id = self.id.clone();
        let weak = Rc::downgrade(self);

        let submitted = queue.run_async(
            move || loader(id.as_str()),
            move |result: Result<P, TaskError>| {
                if let Some(resource) = weak.upgrade() {
                    resource.apply(result);
                }
            },
        );

        match submitted {
            Ok(handle) => {
                trace!(resource = %self.id, "load dispatched");
                *self.in_flight.borrow_mut() = handle.clone();
                handle
            }
            Err(e) => {
                warn!(resource = %self.id, error = %e, "load could not be submitted");
                *self.error.borrow_mut() = Some(Rc::new(TaskError::Submit(e)));
                self.set_state(ResourceState::Error, true);
                TaskHandle::default()
            }
        }
    }

    fn apply(&self, result: Result<P, TaskError>) {
        *self.in_flight.borrow_mut() = TaskHandle::default();
        if self.state() != ResourceState::Loading {
            debug!(resource = %self.id, state = %self.state(), "stale load result ignored");
            return;
        }
        match result {
            Ok(payload) => {
                *self.payload.borrow_mut() = Some(Rc::new(payload));
                *self.error.borrow_mut() = None;
                self.set_state(ResourceState::Ready, true);
            }
            Err(e) => {
                warn!(resource = %self.id, error = %e, "load failed");
                *self.error.borrow_mut() = Some(Rc::new(e));
                self.set_state(ResourceState::Error, true);
            }
        }
    }
}

impl<P> Resource<P> {
    /// Stable identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ResourceState {
        self.state.get()
    }

    /// Whether a payload is available.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ResourceState::Ready
    }

    /// Whether a load is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state() == ResourceState::Loading
    }

    /// Whether the last load failed.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.state() == ResourceState::Error
    }

    /// The loaded payload, if `Ready`.
    #[must_use]
    pub fn payload(&self) -> Option<Rc<P>> {
        self.payload.borrow().clone()
    }

    /// Why the last load failed, if `Error`.
    #[must_use]
    pub fn error(&self) -> Option<Rc<TaskError>> {
        self.error.borrow().clone()
    }

    /// Move to `next`. Returns `false` (and notifies nobody) if unchanged.
    pub fn set_state(&self, next: ResourceState, notify: bool) -> bool {
        let previous = self.state.replace(next);
        if previous == next {
            return false;
        }
        debug!(resource = %self.id, from = %previous, to = %next, "state change");
        if notify {
            self.dispatch();
        }
        true
    }

    /// Cancel any in-flight load, drop the payload, and return to `Init`
    /// without notifying listeners.
    pub fn reset(&self) {
        self.in_flight.replace(TaskHandle::default()).cancel();
        self.clear_results();
        self.set_state(ResourceState::Init, false);
    }

    fn clear_results(&self) {
        let payload = self.payload.borrow_mut().take();
        let error = self.error.borrow_mut().take();
        drop((payload, error));
    }

    /// Register `callback` for state changes. Ids start at 1 and increase.
    pub fn add_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Self) + 'static,
    {
        let mut listeners = self.listeners.borrow_mut();
        let id = listeners.next_id;
        listeners.next_id = listeners.next_id.wrapping_add(1).max(1);
        listeners.entries.push(ListenerEntry {
            id,
            callback: Some(Rc::new(callback)),
        });
        id
    }

    /// Unregister a listener. Returns `false` if `id` is unknown.
    ///
    /// Safe to call from inside a listener, including on itself.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let removed = {
            let mut listeners = self.listeners.borrow_mut();
            let Some(pos) = listeners
                .entries
                .iter()
                .position(|e| e.id == id && e.callback.is_some())
            else {
                return false;
            };
            if listeners.dispatch_depth > 0 {
                listeners.tombstones += 1;
                listeners.entries[pos].callback.take()
            } else {
                listeners.entries.remove(pos).callback
            }
        };
        // Dropped outside the borrow: the closure may own another resource.
        drop(removed);
        true
    }

    /// Number of live listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .borrow()
            .entries
            .iter()
            .filter(|e| e.callback.is_some())
            .count()
    }

    /// Increment the compatibility reference count; returns the new value.
    pub fn add_ref(&self) -> i32 {
        let count = self.ref_count.get().saturating_add(1);
        self.ref_count.set(count);
        count
    }

    /// Decrement the compatibility reference count; returns the new value.
    ///
    /// The count never goes below zero. Reaching zero does not destroy the
    /// resource; the owner decides what to do.
    pub fn remove_ref(&self) -> i32 {
        let count = self.ref_count.get();
        if count == 0 {
            warn!(resource = %self.id, "remove_ref on a resource with no references");
            return 0;
        }
        self.ref_count.set(count - 1);
        count - 1
    }

    /// Current compatibility reference count.
    #[must_use]
    pub fn ref_count(&self) -> i32 {
        self.ref_count.get()
    }

    fn dispatch(&self) {
        let end = {
            let mut listeners = self.listeners.borrow_mut();
            listeners.dispatch_depth += 1;
            listeners.entries.len()
        };

        // Tombstoning keeps indices below `end` stable for the whole pass.
        for index in 0..end {
            let next = {
                let listeners = self.listeners.borrow();
                listeners
                    .entries
                    .get(index)
                    .and_then(|e| e.callback.clone().map(|cb| (e.id, cb)))
            };
            let Some((listener_id, callback)) = next else {
                continue;
            };
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(self))) {
                error!(
                    resource = %self.id,
                    listener_id,
                    panic = %panic_message(payload.as_ref()),
                    "listener panicked"
                );
            }
        }

        let mut listeners = self.listeners.borrow_mut();
        listeners.dispatch_depth -= 1;
        if listeners.dispatch_depth == 0 && listeners.tombstones > 0 {
            let dead: Vec<_> = {
                let (live, dead) = std::mem::take(&mut listeners.entries)
                    .into_iter()
                    .partition(|e| e.callback.is_some());
                listeners.entries = live;
                dead
            };
            listeners.tombstones = 0;
            drop(listeners);
            drop(dead);
        }
    }
}

impl<P> Drop for Resource<P> {
    fn drop(&mut self) {
        self.in_flight.get_mut().cancel();
    }
}

impl<P> fmt::Debug for Resource<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("ref_count", &self.ref_count())
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

impl<P: Send + 'static> StoreEntry<String> for Resource<P> {
    type Context = TaskQueue;

    fn key(&self) -> String {
        self.id.clone()
    }

    fn on_attach(self: &Rc<Self>, queue: &TaskQueue) {
        if self.state() == ResourceState::Init {
            self.load(queue);
        }
    }

    fn on_detach(self: &Rc<Self>, _queue: &TaskQueue) {
        if self.is_loading() {
            self.reset();
        }
    }

    fn reset(&self) {
        Self::reset(self);
    }
}
