//! Listener doubles.

use std::sync::Arc;

use berth_container::ContainerListener;
use parking_lot::Mutex;

/// A lifecycle notification seen by [`RecordingListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerEvent {
    /// `started` was called.
    Started,
    /// `stopped` was called.
    Stopped,
}

/// Records every notification in order.
#[derive(Debug, Default)]
pub struct RecordingListener {
    name: String,
    events: Mutex<Vec<ListenerEvent>>,
}

impl RecordingListener {
    /// A shared recording listener.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            events: Mutex::new(Vec::new()),
        })
    }

    /// Notifications received so far.
    #[must_use]
    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().clone()
    }

    /// Number of `started` calls.
    #[must_use]
    pub fn started_count(&self) -> usize {
        self.count(ListenerEvent::Started)
    }

    /// Number of `stopped` calls.
    #[must_use]
    pub fn stopped_count(&self) -> usize {
        self.count(ListenerEvent::Stopped)
    }

    fn count(&self, event: ListenerEvent) -> usize {
        self.events.lock().iter().filter(|e| **e == event).count()
    }
}

impl ContainerListener for RecordingListener {
    fn started(&self) -> anyhow::Result<()> {
        self.events.lock().push(ListenerEvent::Started);
        Ok(())
    }

    fn stopped(&self) -> anyhow::Result<()> {
        self.events.lock().push(ListenerEvent::Stopped);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Fails every notification, by error or by panic.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingListener {
    panics: bool,
}

impl FailingListener {
    /// Returns an error from each callback.
    #[must_use]
    pub fn erroring() -> Arc<Self> {
        Arc::new(Self { panics: false })
    }

    /// Panics in each callback.
    #[must_use]
    pub fn panicking() -> Arc<Self> {
        Arc::new(Self { panics: true })
    }

    fn fail(self, what: &str) -> anyhow::Result<()> {
        assert!(!self.panics, "listener panicked on {what}");
        anyhow::bail!("listener failed on {what}")
    }
}

impl ContainerListener for FailingListener {
    fn started(&self) -> anyhow::Result<()> {
        self.fail("started")
    }

    fn stopped(&self) -> anyhow::Result<()> {
        self.fail("stopped")
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "failing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_listener() {
        let listener = RecordingListener::new("rec");
        listener.started().unwrap();
        listener.stopped().unwrap();
        listener.started().unwrap();
        assert_eq!(
            listener.events(),
            vec![ListenerEvent::Started, ListenerEvent::Stopped, ListenerEvent::Started]
        );
        assert_eq!(listener.started_count(), 2);
        assert_eq!(listener.stopped_count(), 1);
        assert_eq!(listener.name(), "rec");
    }

    #[test]
    fn test_failing_listener_errors() {
        let listener = FailingListener::erroring();
        assert!(listener.started().is_err());
        assert!(listener.stopped().is_err());
    }

    #[test]
    #[should_panic(expected = "listener panicked on started")]
    fn test_failing_listener_panics() {
        let _ = FailingListener::panicking().started();
    }
}
