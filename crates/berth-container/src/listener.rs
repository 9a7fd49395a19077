//! Container lifecycle listeners.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, trace};

/// Receives container lifecycle notifications.
///
/// Callbacks run on the thread that started or stopped the container, after
/// the transition has completed. Errors and panics are logged and otherwise
/// ignored; they never affect the transition or other listeners.
pub trait ContainerListener: Send + Sync {
    /// The container reached the running state.
    ///
    /// # Errors
    ///
    /// Any error is logged by the container.
    fn started(&self) -> anyhow::Result<()>;

    /// The container stopped.
    ///
    /// # Errors
    ///
    /// Any error is logged by the container.
    fn stopped(&self) -> anyhow::Result<()>;

    /// Optional name for log output.
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "anonymous"
    }
}

#[derive(Debug, Clone, Copy)]
enum Notification {
    Started,
    Stopped,
}

impl Notification {
    fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Stopped => "stopped",
        }
    }
}

/// An ordered set of listeners, deduplicated by identity.
#[derive(Default)]
pub struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn ContainerListener>>>,
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listener_count", &self.len())
            .finish()
    }
}

fn same(a: &Arc<dyn ContainerListener>, b: &Arc<dyn ContainerListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

impl ListenerSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener. Returns `false` if it was already present.
    pub fn add(&self, listener: Arc<dyn ContainerListener>) -> bool {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|l| same(l, &listener)) {
            return false;
        }
        debug!(listener = listener.name(), "listener added");
        listeners.push(listener);
        true
    }

    /// Remove a listener. Returns `false` if it was not present.
    pub fn remove(&self, listener: &Arc<dyn ContainerListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !same(l, listener));
        listeners.len() != before
    }

    /// Whether `listener` is present.
    #[must_use]
    pub fn contains(&self, listener: &Arc<dyn ContainerListener>) -> bool {
        self.listeners.read().iter().any(|l| same(l, listener))
    }

    /// Copy of the current listeners, in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn ContainerListener>> {
        self.listeners.read().clone()
    }

    /// Number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Whether there are no listeners.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }
}

/// A lifecycle notification captured by a transition but not yet delivered.
///
/// Lets a caller that wraps the container publish its own state before
/// listeners run, and deliver them once its own locks are released.
#[must_use = "listeners are only notified by `notify`"]
pub struct PendingNotification {
    listeners: Vec<Arc<dyn ContainerListener>>,
    notification: Notification,
}

impl std::fmt::Debug for PendingNotification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingNotification")
            .field("event", &self.notification.as_str())
            .field("listener_count", &self.listeners.len())
            .finish()
    }
}

impl PendingNotification {
    pub(crate) fn started(listeners: Vec<Arc<dyn ContainerListener>>) -> Self {
        Self {
            listeners,
            notification: Notification::Started,
        }
    }

    pub(crate) fn stopped(listeners: Vec<Arc<dyn ContainerListener>>) -> Self {
        Self {
            listeners,
            notification: Notification::Stopped,
        }
    }

    /// Nothing to deliver; the transition was a no-op.
    pub(crate) fn none() -> Self {
        Self::started(Vec::new())
    }

    /// Whether there is no listener to notify.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Deliver the notification.
    pub fn notify(self) {
        notify(&self.listeners, self.notification);
    }
}

fn notify(listeners: &[Arc<dyn ContainerListener>], notification: Notification) {
    for listener in listeners {
        trace!(listener = listener.name(), event = notification.as_str(), "notifying listener");

        // One failing listener must not stop the others.
        let result = catch_unwind(AssertUnwindSafe(|| match notification {
            Notification::Started => listener.started(),
            Notification::Stopped => listener.stopped(),
        }));

        match result {
            Ok(Ok(())) => {},
            Ok(Err(e)) => error!(
                listener = listener.name(),
                event = notification.as_str(),
                error = %e,
                "listener failed"
            ),
            Err(panic) => error!(
                listener = listener.name(),
                event = notification.as_str(),
                panic = %panic_message(&*panic),
                "listener panicked"
            ),
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
