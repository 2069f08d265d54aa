// offline-watcher: directory watcher that asks a hosted application to shut down
// Triggers on the offline marker file and, optionally, on payload file changes

pub mod application;
pub mod config;
pub mod error;
pub mod filter;
pub mod latch;
pub mod record;
pub mod shutdown;
pub mod target;
mod monitor;
mod source;
mod watcher;

pub use application::{Application, ApplicationHandle, ShutdownNotice, ShutdownReason};
pub use config::WatcherConfig;
pub use error::{WatcherError, WatcherResult};
pub use filter::NotifyFilter;
pub use record::{ChangeAction, ChangeRecord, ChangeRecords, CHANGE_BUFFER_SIZE};
pub use shutdown::ShutdownCoordinator;
pub use source::CompletionKey;
pub use target::{PayloadMatch, PayloadSnapshot, WatchTarget, DEFAULT_MARKER_FILE, DEFAULT_PAYLOAD_EXTENSION};
pub use watcher::FileWatcher;

/// Watcher version
pub const WATCHER_VERSION: &str = env!("CARGO_PKG_VERSION");
