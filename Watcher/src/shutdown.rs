// Exactly-once delivery of the shutdown notification
// Trigger threads race here; only the latch winner reaches the application

use crate::application::{ApplicationHandle, ShutdownNotice, ShutdownReason};
use crate::latch::Latch;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::io;
use std::mem;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Where the application handle currently is
#[derive(Debug)]
enum ApplicationSlot {
    Idle(ApplicationHandle),
    /// Lent to the notifying trigger; the lock is not held meanwhile
    Notifying { dispose_pending: bool },
    Released,
}

/// Gate between trigger paths and the application callback
#[derive(Debug)]
pub struct ShutdownCoordinator {
    triggered: Latch,
    payload_changed: Latch,
    // Shared with trigger threads and teardown only, never the monitor loop
    application: Mutex<ApplicationSlot>,
}

impl ShutdownCoordinator {
    pub fn new(application: ApplicationHandle) -> Self {
        ShutdownCoordinator {
            triggered: Latch::new(),
            payload_changed: Latch::new(),
            application: Mutex::new(ApplicationSlot::Idle(application)),
        }
    }

    /// Deliver the shutdown notification if nobody has yet.
    ///
    /// Returns `true` for the one caller that won the latch. The application
    /// is called without any lock held.
    pub fn call_shutdown(&self, reason: ShutdownReason) -> bool {
        if !self.triggered.set() {
            debug!("Shutdown already triggered, ignoring {} request", reason);
            return false;
        }

        let notice = ShutdownNotice::new(reason);
        info!("Triggering application shutdown: {}", reason);

        let application = {
            let mut slot = self.application.lock();
            match mem::replace(&mut *slot, ApplicationSlot::Notifying { dispose_pending: false }) {
                ApplicationSlot::Idle(application) => Some(application),
                other => {
                    *slot = other;
                    None
                }
            }
        };

        let application = match application {
            Some(application) => application,
            None => {
                warn!("Application released before shutdown ({}) could be delivered", reason);
                return true;
            }
        };

        application.notify(&notice);

        let mut slot = self.application.lock();
        if let ApplicationSlot::Notifying { dispose_pending: true } = *slot {
            *slot = ApplicationSlot::Released;
            drop(slot);
            debug!("Releasing application handle after its notification");
            application.dispose();
        } else {
            *slot = ApplicationSlot::Idle(application);
        }
        true
    }

    /// Body of a trigger thread
    pub(crate) fn trigger(&self, reason: ShutdownReason) {
        if reason == ShutdownReason::PayloadChanged {
            self.payload_changed.set();
        }
        self.call_shutdown(reason);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.is_set()
    }

    /// Whether a payload change fired a trigger
    pub fn payload_changed(&self) -> bool {
        self.payload_changed.is_set()
    }

    /// Take the application out and run its disposer.
    ///
    /// Never waits on the application. If a notification is in progress, the
    /// notifying trigger runs the disposer once the callback returns.
    pub(crate) fn release_application(&self) {
        let application = {
            let mut slot = self.application.lock();
            match mem::replace(&mut *slot, ApplicationSlot::Released) {
                ApplicationSlot::Idle(application) => Some(application),
                ApplicationSlot::Notifying { .. } => {
                    *slot = ApplicationSlot::Notifying { dispose_pending: true };
                    debug!("Notification in progress; deferring application release");
                    None
                }
                ApplicationSlot::Released => None,
            }
        };

        if let Some(application) = application {
            debug!("Releasing application handle");
            application.dispose();
        }
    }
}

/// Run a trigger on its own thread so the monitor loop never waits on the application
pub(crate) fn spawn_trigger(
    coordinator: Arc<ShutdownCoordinator>,
    reason: ShutdownReason,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("offline-watch-trigger".to_string())
        .spawn(move || coordinator.trigger(reason))
        .map_err(|e| {
            error!("Failed to start {} trigger: {}", reason, e);
            e
        })
}
