//! Multi-subscriber callback registry for channel lifecycle events.
//!
//! Every `on_*` registration appends a handler and returns a
//! [`HandlerToken`]; handlers of one kind run in registration order.
//! Handlers are `Send + Sync` and are invoked from the connection actor task.

use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::RwLock;
use tracing::error;

use crate::{envelope::InboundMessage, error::RealtimeError, transport::CloseInfo};

/// Details passed to reconnect-exhaustion handlers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExhaustedInfo {
    pub attempts: u32,
    pub last_close: Option<CloseInfo>,
}

/// Token identifying one registration; pass it to
/// [`HandlerRegistry::remove`] to unregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerToken(u64);

pub type MessageHandler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;
pub type OpenHandler = Arc<dyn Fn() + Send + Sync>;
pub type CloseHandler = Arc<dyn Fn(&CloseInfo) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&RealtimeError) + Send + Sync>;
pub type ExhaustedHandler = Arc<dyn Fn(&ExhaustedInfo) + Send + Sync>;

struct HandlerList<F: ?Sized> {
    entries: RwLock<Vec<(HandlerToken, Arc<F>)>>,
}

impl<F: ?Sized> HandlerList<F> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    fn push(&self, token: HandlerToken, handler: Arc<F>) {
        self.entries.write().push((token, handler));
    }

    fn remove(&self, token: HandlerToken) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(t, _)| *t != token);
        entries.len() != before
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Snapshot so handlers can (un)register from inside a callback.
    fn snapshot(&self) -> Vec<Arc<F>> {
        self.entries.read().iter().map(|(_, h)| Arc::clone(h)).collect()
    }
}

/// Ordered registry of lifecycle and message handlers.
pub struct HandlerRegistry {
    next_token: AtomicU64,
    message: HandlerList<dyn Fn(&InboundMessage) + Send + Sync>,
    open: HandlerList<dyn Fn() + Send + Sync>,
    close: HandlerList<dyn Fn(&CloseInfo) + Send + Sync>,
    error: HandlerList<dyn Fn(&RealtimeError) + Send + Sync>,
    exhausted: HandlerList<dyn Fn(&ExhaustedInfo) + Send + Sync>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("message", &self.message.len())
            .field("open", &self.open.len())
            .field("close", &self.close.len())
            .field("error", &self.error.len())
            .field("exhausted", &self.exhausted.len())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            next_token: AtomicU64::new(1),
            message: HandlerList::new(),
            open: HandlerList::new(),
            close: HandlerList::new(),
            error: HandlerList::new(),
            exhausted: HandlerList::new(),
        }
    }

    fn token(&self) -> HandlerToken {
        HandlerToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    pub fn on_message(
        &self,
        handler: impl Fn(&InboundMessage) + Send + Sync + 'static,
    ) -> HandlerToken {
        let token = self.token();
        self.message.push(token, Arc::new(handler));
        token
    }

    pub fn on_open(&self, handler: impl Fn() + Send + Sync + 'static) -> HandlerToken {
        let token = self.token();
        self.open.push(token, Arc::new(handler));
        token
    }

    pub fn on_close(&self, handler: impl Fn(&CloseInfo) + Send + Sync + 'static) -> HandlerToken {
        let token = self.token();
        self.close.push(token, Arc::new(handler));
        token
    }

    pub fn on_error(
        &self,
        handler: impl Fn(&RealtimeError) + Send + Sync + 'static,
    ) -> HandlerToken {
        let token = self.token();
        self.error.push(token, Arc::new(handler));
        token
    }

    pub fn on_exhausted(
        &self,
        handler: impl Fn(&ExhaustedInfo) + Send + Sync + 'static,
    ) -> HandlerToken {
        let token = self.token();
        self.exhausted.push(token, Arc::new(handler));
        token
    }

    /// Unregister a handler. Returns `false` if the token was unknown.
    pub fn remove(&self, token: HandlerToken) -> bool {
        self.message.remove(token)
            || self.open.remove(token)
            || self.close.remove(token)
            || self.error.remove(token)
            || self.exhausted.remove(token)
    }

    /// Total number of registered handlers.
    pub fn len(&self) -> usize {
        self.message.len()
            + self.open.len()
            + self.close.len()
            + self.error.len()
            + self.exhausted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn emit_message(&self, message: &InboundMessage) {
        for handler in self.message.snapshot() {
            guarded("message", || handler(message));
        }
    }

    pub(crate) fn emit_open(&self) {
        for handler in self.open.snapshot() {
            guarded("open", || handler());
        }
    }

    pub(crate) fn emit_close(&self, info: &CloseInfo) {
        for handler in self.close.snapshot() {
            guarded("close", || handler(info));
        }
    }

    pub(crate) fn emit_error(&self, err: &RealtimeError) {
        for handler in self.error.snapshot() {
            guarded("error", || handler(err));
        }
    }

    pub(crate) fn emit_exhausted(&self, info: &ExhaustedInfo) {
        for handler in self.exhausted.snapshot() {
            guarded("exhausted", || handler(info));
        }
    }
}

/// Run a handler, containing any panic to this call.
fn guarded(kind: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(handler = kind, "Channel handler panicked");
    }
}

/// Lifecycle notifications broadcast by [`ChannelManager::events`](crate::ChannelManager::events).
#[derive(Clone, Debug)]
pub enum ChannelEvent {
    Opened,
    Closed(CloseInfo),
    /// Handshake or transport failure, rendered as text.
    Error(String),
    Message(InboundMessage),
    ReconnectScheduled { attempt: u32, delay: Duration },
    ReconnectExhausted(ExhaustedInfo),
}
