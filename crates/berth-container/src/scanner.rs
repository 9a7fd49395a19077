//! Auto-deploy scanner.
//!
//! A background thread reconciles the deploy directory with the installed
//! modules. Filesystem events (via `notify`) trigger a scan one debounce
//! interval after the first event since the previous scan; a periodic poll
//! catches anything the watcher misses.
//!
//! ```text
//! notify event (archive path) ──► debounce ──┐
//!                                            ├──► Shared::rescan
//! poll interval elapsed ─────────────────────┘
//! ```

use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, trace, warn};

use crate::archive::is_archive_path;
use crate::error::ContainerResult;
use crate::local::{Settings, Shared};

pub(crate) enum ScanMessage {
    Fs(notify::Result<Event>),
    Shutdown,
}

/// Handle to a running scanner thread.
pub(crate) struct ScannerHandle {
    tx: Sender<ScanMessage>,
    thread: Option<JoinHandle<()>>,
}

impl ScannerHandle {
    /// Stop the scanner and wait for an in-progress scan to finish.
    pub(crate) fn shutdown(mut self) {
        let _ = self.tx.send(ScanMessage::Shutdown);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("deploy scanner panicked");
        }
    }
}

impl Drop for ScannerHandle {
    fn drop(&mut self) {
        // The watcher holds a sender too, so the channel never disconnects on its own.
        let _ = self.tx.send(ScanMessage::Shutdown);
    }
}

/// Start scanning `settings.deploy_dir`.
pub(crate) fn spawn(shared: Arc<Shared>, settings: Arc<Settings>) -> ContainerResult<ScannerHandle> {
    let (tx, rx) = mpsc::channel();
    let watcher = if settings.watch {
        watch(&settings.deploy_dir, tx.clone())
    } else {
        None
    };
    let thread = std::thread::Builder::new()
        .name("berth-deploy-scanner".into())
        .spawn(move || run(&shared, &settings, &rx, watcher))?;
    Ok(ScannerHandle {
        tx,
        thread: Some(thread),
    })
}

fn watch(dir: &Path, tx: Sender<ScanMessage>) -> Option<RecommendedWatcher> {
    let mut watcher = match RecommendedWatcher::new(
        move |res| {
            let _ = tx.send(ScanMessage::Fs(res));
        },
        notify::Config::default(),
    ) {
        Ok(watcher) => watcher,
        Err(e) => {
            warn!(error = %e, "filesystem watcher unavailable, relying on polling");
            return None;
        },
    };
    match watcher.watch(dir, RecursiveMode::NonRecursive) {
        Ok(()) => {
            info!(path = %dir.display(), "watching deploy directory");
            Some(watcher)
        },
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "failed to watch deploy directory, relying on polling");
            None
        },
    }
}

fn is_relevant(event: &Event, extensions: &[String]) -> bool {
    matches!(
        event.kind,
        EventKind::Any | EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|p| is_archive_path(p, extensions))
}

/// Delays a scan until `interval` after the first change since the last
/// scan. Later changes do not push the scan back.
#[derive(Debug, Clone, Copy)]
struct Debouncer {
    interval: Duration,
    since: Option<Instant>,
}

impl Debouncer {
    fn new(interval: Duration) -> Self {
        Self { interval, since: None }
    }

    fn mark(&mut self, now: Instant) {
        self.since.get_or_insert(now);
    }

    fn due(&self) -> Option<Instant> {
        self.since.and_then(|t| t.checked_add(self.interval))
    }

    fn is_due(&self, now: Instant) -> bool {
        self.due().is_some_and(|due| now >= due)
    }

    fn clear(&mut self) {
        self.since = None;
    }
}

fn run(
    shared: &Shared,
    settings: &Settings,
    rx: &Receiver<ScanMessage>,
    _watcher: Option<RecommendedWatcher>,
) {
    // A zero interval disables polling.
    let poll = (!settings.poll_interval.is_zero()).then_some(settings.poll_interval);
    let next_poll_from = |now: Instant| poll.and_then(|p| now.checked_add(p));
    let mut next_poll = next_poll_from(Instant::now());
    let mut debouncer = Debouncer::new(settings.debounce);

    loop {
        let deadline = debouncer.due().into_iter().chain(next_poll).min();
        let message = match deadline {
            Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match message {
            Ok(ScanMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(ScanMessage::Fs(Ok(event))) => {
                if is_relevant(&event, &settings.extensions) {
                    trace!(kind = ?event.kind, paths = ?event.paths, "deploy directory changed");
                    debouncer.mark(Instant::now());
                }
            },
            Ok(ScanMessage::Fs(Err(e))) => warn!(error = %e, "filesystem watcher error"),
            Err(RecvTimeoutError::Timeout) => {},
        }

        let now = Instant::now();
        let debounced = debouncer.is_due(now);
        let polled = next_poll.is_some_and(|due| now >= due);
        if debounced || polled {
            debug!(debounced, polled, "scanning deploy directory");
            shared.rescan(settings);
            debouncer.clear();
            next_poll = next_poll_from(Instant::now());
        }
    }
    debug!("deploy scanner stopped");
}
