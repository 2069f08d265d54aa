// FileWatcher: public face of a monitoring session
// Owns the monitor thread, the shared half of the completion source and the
// shutdown coordinator; teardown runs in a fixed order on drop

use crate::application::{ApplicationHandle, ShutdownReason};
use crate::config::WatcherConfig;
use crate::error::{WatcherError, WatcherResult};
use crate::monitor::{MonitorLoop, SessionState};
use crate::shutdown::ShutdownCoordinator;
use crate::source::{self, ChangeReader, CompletionKey, CompletionSignal};
use crate::target::WatchTarget;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Handle on the monitor thread plus its exit rendezvous
struct MonitorThread {
    handle: JoinHandle<()>,
    // Disconnects when the thread's sender is dropped, i.e. when it exits
    exited: Receiver<()>,
}

impl MonitorThread {
    fn join(self, timeout: Duration) {
        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    error!("Monitor thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Monitor thread did not exit within {:?}; detaching it",
                    timeout
                );
            }
        }
    }
}

/// Watches one directory for the offline marker and, optionally, payload changes.
///
/// Creating a `FileWatcher` opens the directory, arms the first read and
/// starts the monitor thread. Dropping it stops the thread and releases the
/// directory, the completion source and the application, in that order.
pub struct FileWatcher {
    target: Arc<WatchTarget>,
    config: WatcherConfig,
    key: CompletionKey,
    state: Arc<SessionState>,
    coordinator: Arc<ShutdownCoordinator>,
    thread: Mutex<Option<MonitorThread>>,
    signal: Option<Box<dyn CompletionSignal>>,
}

impl FileWatcher {
    /// Start watching with the default configuration
    pub fn create(target: WatchTarget, application: ApplicationHandle) -> WatcherResult<Self> {
        Self::create_with_config(target, application, WatcherConfig::default())
    }

    pub fn create_with_config(
        target: WatchTarget,
        application: ApplicationHandle,
        config: WatcherConfig,
    ) -> WatcherResult<Self> {
        let key = CompletionKey::next_session();
        let (reader, signal) = source::open(&target, key, config.notify_filter)?;
        Self::start(target, application, config, key, reader, signal)
    }

    /// Arm the first read and launch the monitor thread over an opened source
    pub(crate) fn start(
        target: WatchTarget,
        application: ApplicationHandle,
        config: WatcherConfig,
        key: CompletionKey,
        reader: Box<dyn ChangeReader>,
        signal: Box<dyn CompletionSignal>,
    ) -> WatcherResult<Self> {
        let target = Arc::new(target);
        let state = Arc::new(SessionState::default());
        let coordinator = Arc::new(ShutdownCoordinator::new(application));

        let mut monitor = MonitorLoop::new(
            reader,
            key,
            Arc::clone(&target),
            Arc::clone(&state),
            Arc::clone(&coordinator),
            config.clone(),
        );
        monitor
            .arm_initial()
            .map_err(|e| WatcherError::initialization(target.directory(), e))?;

        let (exit_tx, exited) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("offline-watch-monitor".to_string())
            .spawn(move || {
                let _exit = exit_tx;
                monitor.run();
            })
            .map_err(WatcherError::Thread)?;

        info!(
            "Watching {} for {} (payload tracking {})",
            target.directory().display(),
            target.file_name(),
            if target.track_payload_changes() { "on" } else { "off" }
        );

        Ok(FileWatcher {
            target,
            config,
            key,
            state,
            coordinator,
            thread: Mutex::new(Some(MonitorThread { handle, exited })),
            signal: Some(signal),
        })
    }

    /// Make sure a read is outstanding. Safe to call repeatedly.
    pub fn monitor(&self) -> WatcherResult<()> {
        if self.state.stop_requested.is_set() {
            debug!("Monitor requested after stop; ignoring");
            return Ok(());
        }
        if let Some(signal) = &self.signal {
            signal.post(CompletionKey::REARM)?;
        }
        Ok(())
    }

    /// Stop the monitor thread. Only the first call does anything.
    ///
    /// Blocks for at most the configured join timeout.
    pub fn stop_monitor(&self) {
        if !self.state.stop_requested.set() {
            debug!("Monitor already stopping");
            return;
        }
        info!("Stopping monitor for {}", self.target.directory().display());

        if let Some(signal) = &self.signal {
            if let Err(e) = signal.cancel_pending() {
                warn!("Failed to cancel outstanding read: {}", e);
            }
            if let Err(e) = signal.post(CompletionKey::SHUTDOWN) {
                warn!("Failed to post shutdown key: {}", e);
            }
        }

        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            thread.join(self.config.join_timeout);
        }
    }

    /// Poll readiness up to `retries` times. Never errors.
    pub fn wait_for_monitor(&self, retries: u32) -> bool {
        for attempt in 0..retries {
            if self.is_ready() {
                return true;
            }
            if self.state.stop_requested.is_set() {
                return false;
            }
            if attempt + 1 < retries {
                thread::sleep(self.config.poll_interval);
            }
        }
        false
    }

    /// Deliver the shutdown notification unless one was already delivered.
    ///
    /// Returns `true` if this call delivered it.
    pub fn call_shutdown(&self, reason: ShutdownReason) -> bool {
        self.coordinator.call_shutdown(reason)
    }

    /// Monitor thread running with a read outstanding and no stop requested
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Monitor thread still alive; `false` once it stopped or gave up
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    pub fn is_shutdown_triggered(&self) -> bool {
        self.coordinator.is_triggered()
    }

    pub fn payload_changed(&self) -> bool {
        self.coordinator.payload_changed()
    }

    pub fn target(&self) -> &WatchTarget {
        &self.target
    }
}

impl fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileWatcher")
            .field("target", &self.target)
            .field("key", &self.key)
            .field("ready", &self.is_ready())
            .field("shutdown_triggered", &self.is_shutdown_triggered())
            .finish()
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop_monitor();
        // Directory handle first, then the completion source
        drop(self.signal.take());
        self.coordinator.release_application();
        debug!("Watcher for {} released", self.target.directory().display());
    }
}
