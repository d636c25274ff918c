//! Transfer progress monitoring.
//!
//! Transports write to destination files without reporting progress
//! themselves. The [`TransferMonitor`] watches destination paths from a
//! background task instead: on each poll tick it stats every tracked
//! path and emits events when a file appears, grows, or reaches its
//! expected size. When the source size is unknown the transfer is
//! finished with an explicit [`TransferMonitor::complete`] call.
//!
//! Listeners receive events outside the tracking lock, so a slow
//! listener delays event delivery but never blocks `track` or
//! `release` callers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use log::{debug, warn};
use tokio::task::JoinHandle;

/// Default interval between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEventKind {
    /// The destination file has appeared.
    Started,
    /// The destination file has grown since the last observation.
    Updated,
    /// The transfer reached its expected size or was completed
    /// explicitly.
    Completed,
}

/// Snapshot of one tracked transfer at event time.
#[derive(Debug, Clone)]
pub struct TransferEvent {
    pub dest: PathBuf,
    pub kind: TransferEventKind,
    /// Bytes present at the destination.
    pub transferred: u64,
    /// Source size, when the source reports one.
    pub total: Option<u64>,
    pub timestamp: SystemTime,
}

impl TransferEvent {
    fn new(dest: &Path, kind: TransferEventKind, transferred: u64, total: Option<u64>) -> Self {
        TransferEvent {
            dest: dest.to_path_buf(),
            kind,
            transferred,
            total,
            timestamp: SystemTime::now(),
        }
    }

    /// Short name for display, the destination filename without the
    /// staging suffix.
    pub fn display_name(&self) -> String {
        let name = self
            .dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.dest.display().to_string());
        name.trim_end_matches(crate::cacher::PART_EXTENSION).to_string()
    }

    /// Completed fraction in `[0, 1]`, or `-1.0` when the source size
    /// is unknown.
    pub fn progress(&self) -> f64 {
        match self.kind {
            TransferEventKind::Started => 0.0,
            TransferEventKind::Completed => 1.0,
            TransferEventKind::Updated => match self.total {
                Some(total) if total > 0 => (self.transferred as f64 / total as f64).min(1.0),
                Some(_) => 1.0,
                None => -1.0,
            },
        }
    }
}

/// Receives progress events.
pub trait TransferListener: Send + Sync {
    fn on_event(&self, event: &TransferEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferState {
    Unstarted,
    Started,
    Completed,
}

struct Tracked {
    source_size: Option<u64>,
    state: TransferState,
    last_size: u64,
    last_mtime: Option<SystemTime>,
}

#[derive(Default)]
struct MonitorShared {
    tracked: Mutex<HashMap<PathBuf, Tracked>>,
    listeners: Mutex<Vec<Arc<dyn TransferListener>>>,
}

impl MonitorShared {
    fn emit(&self, events: Vec<TransferEvent>) {
        if events.is_empty() {
            return;
        }
        let listeners = match self.listeners.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for event in &events {
            debug!("transfer event: {event:?}");
            for listener in &listeners {
                listener.on_event(event);
            }
        }
    }

    fn poll(&self) {
        let mut events = Vec::new();
        {
            let mut tracked = match self.tracked.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for (dest, entry) in tracked.iter_mut() {
                if entry.state == TransferState::Completed {
                    continue;
                }
                let Ok(meta) = std::fs::metadata(dest) else {
                    continue;
                };
                let size = meta.len();
                let mtime = meta.modified().ok();

                if entry.state == TransferState::Unstarted {
                    entry.state = TransferState::Started;
                    events.push(TransferEvent::new(
                        dest,
                        TransferEventKind::Started,
                        size,
                        entry.source_size,
                    ));
                }
                if size != entry.last_size || mtime != entry.last_mtime {
                    entry.last_size = size;
                    entry.last_mtime = mtime;
                    events.push(TransferEvent::new(
                        dest,
                        TransferEventKind::Updated,
                        size,
                        entry.source_size,
                    ));
                }
                if let Some(total) = entry.source_size {
                    if size >= total {
                        entry.state = TransferState::Completed;
                        events.push(TransferEvent::new(
                            dest,
                            TransferEventKind::Completed,
                            size,
                            entry.source_size,
                        ));
                    }
                }
            }
        }
        self.emit(events);
    }
}

/// Polls tracked destination files and dispatches progress events.
pub struct TransferMonitor {
    shared: Arc<MonitorShared>,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TransferMonitor {
    pub fn new(poll_interval: Duration) -> Self {
        TransferMonitor {
            shared: Arc::new(MonitorShared::default()),
            poll_interval,
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    pub fn with_poll_seconds(secs: u64) -> Self {
        TransferMonitor::new(Duration::from_secs(secs))
    }

    pub fn add_listener(&self, listener: Arc<dyn TransferListener>) {
        let mut listeners = match self.shared.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.push(listener);
    }

    /// Begin tracking a destination. `source_size` of `None` means the
    /// transfer must be finished with [`complete`](Self::complete).
    pub fn track(&self, dest: &Path, source_size: Option<u64>) {
        let mut tracked = match self.shared.tracked.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tracked.insert(
            dest.to_path_buf(),
            Tracked {
                source_size,
                state: TransferState::Unstarted,
                last_size: 0,
                last_mtime: None,
            },
        );
    }

    /// Explicitly finish a tracked transfer. No effect on unknown or
    /// already completed destinations.
    pub fn complete(&self, dest: &Path) {
        let mut events = Vec::new();
        {
            let mut tracked = match self.shared.tracked.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(entry) = tracked.get_mut(dest) {
                if entry.state != TransferState::Completed {
                    let size = std::fs::metadata(dest)
                        .map(|m| m.len())
                        .unwrap_or(entry.last_size);
                    if entry.state == TransferState::Unstarted {
                        events.push(TransferEvent::new(
                            dest,
                            TransferEventKind::Started,
                            size,
                            entry.source_size,
                        ));
                    }
                    entry.state = TransferState::Completed;
                    events.push(TransferEvent::new(
                        dest,
                        TransferEventKind::Completed,
                        size,
                        entry.source_size,
                    ));
                }
            }
        }
        self.shared.emit(events);
    }

    /// Stop tracking a destination without emitting anything.
    pub fn release(&self, dest: &Path) {
        let mut tracked = match self.shared.tracked.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tracked.remove(dest);
    }

    /// Run one poll pass immediately on the caller's task.
    pub fn poll_now(&self) {
        self.shared.poll();
    }

    /// Spawn the background polling task. Repeated calls are ignored
    /// while the task is running.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let running = Arc::clone(&self.running);
        let interval = self.poll_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                shared.poll();
            }
        });
        let mut task = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(old) = task.replace(handle) {
            // stale handle from a previous start/stop cycle
            if !old.is_finished() {
                warn!("replacing unfinished monitor task");
                old.abort();
            }
        }
    }

    /// Request the background task to stop. Idempotent; the task exits
    /// at its next tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Default for TransferMonitor {
    fn default() -> Self {
        TransferMonitor::new(DEFAULT_POLL_INTERVAL)
    }
}

impl Drop for TransferMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        events: StdMutex<Vec<TransferEvent>>,
    }

    impl TransferListener for Recorder {
        fn on_event(&self, event: &TransferEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    impl Recorder {
        fn take(&self) -> Vec<TransferEvent> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    #[test]
    fn test_poll_state_machine_with_known_size() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.part");

        let monitor = TransferMonitor::default();
        let recorder = Arc::new(Recorder::default());
        monitor.add_listener(recorder.clone());
        monitor.track(&dest, Some(10));

        // nothing on disk yet
        monitor.poll_now();
        assert!(recorder.take().is_empty());

        std::fs::write(&dest, b"12345").unwrap();
        monitor.poll_now();
        let events = recorder.take();
        assert_eq!(events[0].kind, TransferEventKind::Started);
        assert_eq!(events[1].kind, TransferEventKind::Updated);
        assert_eq!(events[1].transferred, 5);
        assert_eq!(events[1].total, Some(10));
        assert!((events[1].progress() - 0.5).abs() < 1e-9);

        std::fs::write(&dest, b"1234567890").unwrap();
        monitor.poll_now();
        let events = recorder.take();
        let done = events
            .iter()
            .find(|e| e.kind == TransferEventKind::Completed)
            .unwrap();
        assert_eq!(done.transferred, 10);
        assert_eq!(done.progress(), 1.0);
        assert_eq!(done.display_name(), "file");

        // completed entries stay quiet
        monitor.poll_now();
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_explicit_complete_for_unknown_size() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.part");
        let mut f = std::fs::File::create(&dest).unwrap();
        f.write_all(b"abc").unwrap();
        f.flush().unwrap();

        let monitor = TransferMonitor::default();
        let recorder = Arc::new(Recorder::default());
        monitor.add_listener(recorder.clone());
        monitor.track(&dest, None);

        monitor.poll_now();
        let events = recorder.take();
        // grows, but never auto-completes without a known total
        assert!(!events.iter().any(|e| e.kind == TransferEventKind::Completed));
        assert_eq!(events.last().unwrap().progress(), -1.0);

        monitor.complete(&dest);
        let events = recorder.take();
        let last = events.last().unwrap();
        assert_eq!(last.kind, TransferEventKind::Completed);
        assert_eq!(last.transferred, 3);

        // complete is idempotent
        monitor.complete(&dest);
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_release_stops_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.part");
        std::fs::write(&dest, b"abc").unwrap();

        let monitor = TransferMonitor::default();
        let recorder = Arc::new(Recorder::default());
        monitor.add_listener(recorder.clone());
        monitor.track(&dest, Some(3));
        monitor.release(&dest);

        monitor.poll_now();
        assert!(recorder.take().is_empty());
    }

    #[tokio::test]
    async fn test_background_task_start_stop_idempotent() {
        let monitor = TransferMonitor::new(Duration::from_millis(10));
        monitor.start();
        monitor.start();
        monitor.stop();
        monitor.stop();
        // give the task a tick to observe the flag
        tokio::time::sleep(Duration::from_millis(30)).await;
        let task = monitor.task.lock().unwrap().take();
        if let Some(handle) = task {
            handle.await.unwrap();
        }
    }
}
