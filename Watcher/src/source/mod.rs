// Completion sources: the OS facility the monitor loop waits on
// Windows uses an I/O completion port; other platforms emulate one over notify

use crate::error::WatcherResult;
use crate::filter::NotifyFilter;
use crate::target::WatchTarget;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(windows)]
mod windows;
#[cfg(not(windows))]
mod portable;
#[cfg(test)]
pub(crate) mod scripted;

/// Tag attached to every completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompletionKey(usize);

impl CompletionKey {
    /// Asks the monitor thread to exit
    pub const SHUTDOWN: CompletionKey = CompletionKey(usize::MAX);

    /// Asks the monitor thread to arm a read if none is outstanding
    pub const REARM: CompletionKey = CompletionKey(usize::MAX - 1);

    /// Fresh key for a new session, never one of the reserved values
    pub(crate) fn next_session() -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(1);
        CompletionKey(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_reserved(self) -> bool {
        self == CompletionKey::SHUTDOWN || self == CompletionKey::REARM
    }

    pub fn as_raw(self) -> usize {
        self.0
    }
}

/// One wake-up of the monitor loop
#[derive(Debug)]
pub(crate) enum Completion {
    /// A directory read finished; zero bytes means the buffer overflowed
    Read { key: CompletionKey, bytes: usize },

    /// A key posted through `CompletionSignal::post`
    Posted(CompletionKey),

    /// The outstanding read was cancelled
    Cancelled,

    /// The read (or the wait itself) failed
    Failed(io::Error),
}

/// Loop half of a completion source. Lives on the monitor thread and owns
/// the change buffer.
pub(crate) trait ChangeReader: Send {
    /// Issue one asynchronous directory read into the buffer
    fn arm(&mut self) -> io::Result<()>;

    /// Block until the next completion arrives
    fn next_completion(&mut self) -> Completion;

    /// Bytes delivered by the most recent read
    fn buffer(&self) -> &[u8];
}

/// Shared half of a completion source, usable from any thread
pub(crate) trait CompletionSignal: Send + Sync {
    /// Queue a key-only completion
    fn post(&self, key: CompletionKey) -> io::Result<()>;

    /// Cancel the outstanding read, if any
    fn cancel_pending(&self) -> io::Result<()>;
}

pub(crate) type SourcePair = (Box<dyn ChangeReader>, Box<dyn CompletionSignal>);

/// Open the directory and register it with the platform completion mechanism
pub(crate) fn open(
    target: &WatchTarget,
    key: CompletionKey,
    filter: NotifyFilter,
) -> WatcherResult<SourcePair> {
    #[cfg(windows)]
    {
        windows::open(target, key, filter)
    }
    #[cfg(not(windows))]
    {
        portable::open(target, key, filter)
    }
}
