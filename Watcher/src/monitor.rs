// Monitor loop: the body of the background thread
// Waits on the completion source, decodes change records, dispatches
// triggers and keeps exactly one directory read outstanding

use crate::application::ShutdownReason;
use crate::config::WatcherConfig;
use crate::latch::Latch;
use crate::record::{ChangeAction, ChangeRecord, ChangeRecords};
use crate::shutdown::{spawn_trigger, ShutdownCoordinator};
use crate::source::{ChangeReader, Completion, CompletionKey};
use crate::target::{PayloadSnapshot, WatchTarget};
use log::{debug, error, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// State shared between the monitor thread and the watcher that owns it
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub stop_requested: Latch,
    pub read_in_flight: AtomicBool,
    pub running: AtomicBool,
}

impl SessionState {
    pub fn is_ready(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.read_in_flight.load(Ordering::Acquire)
            && !self.stop_requested.is_set()
    }
}

/// Triggers raised by one completed read
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Triggers {
    pub app_offline: bool,
    pub payload_changed: bool,
}

impl Triggers {
    pub fn is_empty(&self) -> bool {
        !self.app_offline && !self.payload_changed
    }

    fn merge(&mut self, other: Triggers) {
        self.app_offline |= other.app_offline;
        self.payload_changed |= other.payload_changed;
    }
}

/// Decide what a single change record means for the target
pub(crate) fn evaluate(target: &WatchTarget, record: &ChangeRecord) -> Triggers {
    Triggers {
        app_offline: target.is_marker(&record.file_name) && record.action.is_arrival(),
        payload_changed: target.is_payload(&record.file_name)
            && matches!(
                record.action,
                ChangeAction::Modified | ChangeAction::RenamedNewName
            ),
    }
}

pub(crate) struct MonitorLoop {
    reader: Box<dyn ChangeReader>,
    key: CompletionKey,
    target: Arc<WatchTarget>,
    state: Arc<SessionState>,
    coordinator: Arc<ShutdownCoordinator>,
    snapshot: PayloadSnapshot,
    config: WatcherConfig,
    consecutive_failures: u32,
}

impl MonitorLoop {
    pub fn new(
        reader: Box<dyn ChangeReader>,
        key: CompletionKey,
        target: Arc<WatchTarget>,
        state: Arc<SessionState>,
        coordinator: Arc<ShutdownCoordinator>,
        config: WatcherConfig,
    ) -> Self {
        let snapshot = PayloadSnapshot::capture(&target);
        MonitorLoop {
            reader,
            key,
            target,
            state,
            coordinator,
            snapshot,
            config,
            consecutive_failures: 0,
        }
    }

    /// Arm the first read on the creating thread, before the loop starts
    pub fn arm_initial(&mut self) -> std::io::Result<()> {
        self.reader.arm()?;
        self.state.read_in_flight.store(true, Ordering::Release);
        Ok(())
    }

    /// Thread body. Returns when the shutdown key arrives or re-arming gives up.
    pub fn run(mut self) {
        self.state.running.store(true, Ordering::Release);
        debug!("Monitor loop started for {}", self.target.directory().display());

        loop {
            let keep_going = match self.reader.next_completion() {
                Completion::Posted(CompletionKey::SHUTDOWN) => {
                    debug!("Monitor loop received shutdown key");
                    false
                }
                Completion::Posted(CompletionKey::REARM) => {
                    if self.state.read_in_flight.load(Ordering::Acquire) {
                        trace!("Re-arm requested with a read already outstanding");
                        true
                    } else {
                        self.rearm()
                    }
                }
                Completion::Posted(key) => {
                    warn!("Ignoring completion with unknown key {:?}", key);
                    true
                }
                Completion::Read { key, bytes } if key == self.key => {
                    self.state.read_in_flight.store(false, Ordering::Release);
                    self.consecutive_failures = 0;
                    self.handle_change_completion(bytes);
                    self.rearm()
                }
                Completion::Read { key, .. } => {
                    warn!("Ignoring read completion for foreign key {:?}", key);
                    true
                }
                Completion::Cancelled => {
                    self.state.read_in_flight.store(false, Ordering::Release);
                    debug!("Directory read cancelled");
                    self.rearm()
                }
                Completion::Failed(err) => {
                    self.state.read_in_flight.store(false, Ordering::Release);
                    self.consecutive_failures += 1;
                    if self.consecutive_failures > self.config.max_consecutive_failures {
                        error!(
                            "Directory read for {} failed {} times in a row, stopping monitor: {}",
                            self.target.directory().display(),
                            self.consecutive_failures,
                            err
                        );
                        false
                    } else {
                        warn!("Directory read failed, re-arming: {}", err);
                        self.rearm()
                    }
                }
            };

            if !keep_going {
                break;
            }
        }

        self.state.running.store(false, Ordering::Release);
        info!("Monitor loop for {} exited", self.target.directory().display());
    }

    /// Arm the next read unless a stop is under way. Returns `false` once
    /// every attempt has failed.
    fn rearm(&mut self) -> bool {
        for attempt in 1..=self.config.rearm_attempts {
            if self.state.stop_requested.is_set() {
                return true;
            }
            match self.reader.arm() {
                Ok(()) => {
                    self.state.read_in_flight.store(true, Ordering::Release);
                    return true;
                }
                Err(err) => {
                    warn!(
                        "Failed to arm directory read (attempt {}/{}): {}",
                        attempt, self.config.rearm_attempts, err
                    );
                    thread::sleep(self.config.rearm_backoff);
                }
            }
        }

        if self.state.stop_requested.is_set() {
            return true;
        }
        error!(
            "Giving up monitoring {} after {} failed arm attempts",
            self.target.directory().display(),
            self.config.rearm_attempts
        );
        false
    }

    /// Inspect one completed read. Never blocks and never calls the application.
    pub fn handle_change_completion(&mut self, bytes: usize) {
        if self.state.stop_requested.is_set() {
            return;
        }

        let triggers = if bytes == 0 {
            warn!(
                "Change buffer overflowed for {}; checking files directly",
                self.target.directory().display()
            );
            self.fallback_check()
        } else {
            let mut triggers = Triggers::default();
            for record in ChangeRecords::new(self.reader.buffer()) {
                trace!("Change record: {}", record);
                triggers.merge(evaluate(&self.target, &record));
            }
            triggers
        };

        self.dispatch(triggers);
    }

    /// Records were lost: look at the files themselves
    fn fallback_check(&mut self) -> Triggers {
        let mut triggers = Triggers {
            app_offline: self.target.marker_path().exists(),
            payload_changed: false,
        };

        if self.target.track_payload_changes() {
            let current = PayloadSnapshot::capture(&self.target);
            triggers.payload_changed = current != self.snapshot;
            self.snapshot = current;
        }

        triggers
    }

    fn dispatch(&self, triggers: Triggers) {
        if triggers.is_empty() {
            return;
        }
        if self.coordinator.is_triggered() {
            debug!("Shutdown already triggered, not dispatching {:?}", triggers);
            return;
        }

        if triggers.app_offline {
            debug!("Offline marker {} detected", self.target.file_name());
            let _ = spawn_trigger(Arc::clone(&self.coordinator), ShutdownReason::AppOffline);
        }
        if triggers.payload_changed {
            debug!("Payload change detected in {}", self.target.directory().display());
            let _ = spawn_trigger(Arc::clone(&self.coordinator), ShutdownReason::PayloadChanged);
        }
    }
}
