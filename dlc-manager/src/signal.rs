//! Small synchronous callback registries, one per emitted event.
//!
//! Shaped like `GlobalProfiler`'s own sink mechanism elsewhere in this
//! crate family (`sinks: HashMap<FrameSinkId, FrameSink>`,
//! `add_sink`/`remove_sink`): no async runtime, no broadcast channel.
//! Callbacks fire synchronously, inline,
//! on whichever thread calls `emit` (always the thread that owns the
//! [`crate::manager::DlcManager`], since emission only ever happens from
//! main-thread-confined code).

use std::collections::HashMap;

/// Identifies a connected callback so it can later be disconnected.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct SignalId(u64);

/// A multi-subscriber callback list for one event type.
pub struct Signal<T> {
    next_id: u64,
    callbacks: HashMap<SignalId, Box<dyn FnMut(&T)>>,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self {
            next_id: 1,
            callbacks: HashMap::new(),
        }
    }
}

impl<T> Signal<T> {
    /// Registers a callback, returning an id that can later be passed to
    /// [`Signal::disconnect`].
    pub fn connect(&mut self, callback: impl FnMut(&T) + 'static) -> SignalId {
        let id = SignalId(self.next_id);
        self.next_id += 1;
        self.callbacks.insert(id, Box::new(callback));
        id
    }

    /// Removes a single previously-connected callback.
    pub fn disconnect(&mut self, id: SignalId) {
        self.callbacks.remove(&id);
    }

    /// Removes every connected callback.
    pub fn disconnect_all(&mut self) {
        self.callbacks.clear();
    }

    /// Invokes every connected callback with `value`, in registration order.
    pub fn emit(&mut self, value: &T) {
        for callback in self.callbacks.values_mut() {
            callback(value);
        }
    }
}

/// Where an emitted [`ErrorEvent`] originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// A local file-system operation failed.
    FileIo,
    /// `timeout_for_initialization` elapsed without a successful remote
    /// negotiation.
    InitTimeout,
    /// The configured Downloader reported a failure.
    Download,
    /// A superpack binary-format validation failed.
    Codec,
}

/// Payload of the `error` signal. Kept separate from
/// [`crate::error::ManagerError`]: this is a stable wire shape subscribers
/// depend on, not an internal `Result` error type.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    /// Which subsystem raised the error.
    pub origin: ErrorOrigin,
    /// An OS errno, HTTP status, or other origin-specific numeric code.
    pub code: i32,
    /// A human-readable detail, usually the path or URL involved.
    pub detail: String,
}

/// Payload of the `initialize_finished` signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitializeFinished {
    /// Number of files that were already on disk and ready once scanning
    /// and metadata negotiation completed.
    pub downloaded_files: usize,
    /// Total number of files known to the superpack.
    pub total_files: usize,
}

/// Registry of all five signals the manager emits. Owned by
/// [`crate::manager::DlcManager`], never shared across threads.
#[derive(Default)]
pub struct Signals {
    /// See [`ErrorEvent`].
    pub error: Signal<ErrorEvent>,
    /// Edge-triggered: fires only when the boolean differs from the
    /// previously emitted value.
    pub network_ready: Signal<bool>,
    /// See [`InitializeFinished`].
    pub initialize_finished: Signal<InitializeFinished>,
    /// Fires whenever a [`crate::pack_request::PackRequest`]'s progress or
    /// state changes.
    pub request_updated: Signal<crate::pack_request::PackRequestSnapshot>,
    /// Fires once, when a request's first file download is kicked off.
    pub request_start_loading: Signal<crate::pack_request::PackRequestSnapshot>,
}

impl Signals {
    pub(crate) fn disconnect_all(&mut self) {
        self.error.disconnect_all();
        self.network_ready.disconnect_all();
        self.initialize_finished.disconnect_all();
        self.request_updated.disconnect_all();
        self.request_start_loading.disconnect_all();
    }
}
