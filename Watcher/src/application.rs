// The hosted application as seen by the watcher
// A single capability: being told that shutdown should proceed

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why shutdown was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    /// The offline marker appeared
    AppOffline,

    /// A tracked payload file was modified or replaced
    PayloadChanged,

    /// The host asked for it directly
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ShutdownReason::AppOffline => "app offline",
            ShutdownReason::PayloadChanged => "payload changed",
            ShutdownReason::Requested => "requested",
        };
        f.write_str(text)
    }
}

/// Delivered to the application exactly once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownNotice {
    pub reason: ShutdownReason,
    pub requested_at: DateTime<Utc>,
}

impl ShutdownNotice {
    pub fn new(reason: ShutdownReason) -> Self {
        ShutdownNotice {
            reason,
            requested_at: Utc::now(),
        }
    }
}

/// The application a watcher works for.
///
/// `notify_shutdown` runs on a trigger thread with no watcher lock held. If
/// the watcher is dropped while it runs, the disposer runs once it returns.
#[cfg_attr(test, mockall::automock)]
pub trait Application: Send + Sync {
    fn notify_shutdown(&self, notice: &ShutdownNotice);
}

type Disposer = Box<dyn FnOnce(Box<dyn Application>) + Send>;

/// Exclusive ownership of an application plus the routine that releases it.
///
/// The disposer comes from whoever built the application and runs exactly
/// once, either through [`ApplicationHandle::dispose`] or on drop.
pub struct ApplicationHandle {
    application: Option<Box<dyn Application>>,
    disposer: Option<Disposer>,
}

impl ApplicationHandle {
    pub fn new<A, D>(application: A, disposer: D) -> Self
    where
        A: Application + 'static,
        D: FnOnce(Box<dyn Application>) + Send + 'static,
    {
        ApplicationHandle {
            application: Some(Box::new(application)),
            disposer: Some(Box::new(disposer)),
        }
    }

    /// Handle whose teardown is an ordinary drop
    pub fn owned<A: Application + 'static>(application: A) -> Self {
        Self::new(application, |application| drop(application))
    }

    pub(crate) fn notify(&self, notice: &ShutdownNotice) {
        if let Some(application) = &self.application {
            application.notify_shutdown(notice);
        }
    }

    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let (Some(application), Some(disposer)) = (self.application.take(), self.disposer.take()) {
            disposer(application);
        }
    }
}

impl Drop for ApplicationHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ApplicationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationHandle")
            .field("released", &self.application.is_none())
            .finish()
    }
}
