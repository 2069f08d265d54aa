// Completion port emulation on top of notify
// notify events are turned into change records and delivered through a
// channel; one read is "outstanding" at a time, exactly like the Windows path

use super::{ChangeReader, Completion, CompletionKey, CompletionSignal, SourcePair};
use crate::error::{WatcherError, WatcherResult};
use crate::filter::NotifyFilter;
use crate::record::{encode_records, encoded_len, ChangeAction, ChangeBuffer, ChangeRecord, CHANGE_BUFFER_SIZE};
use crate::target::WatchTarget;
use log::{debug, trace};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};

enum Packet {
    Changes(Vec<ChangeRecord>),
    Rescan,
    Failed(io::Error),
    Posted(CompletionKey),
    Cancel,
}

pub(crate) struct NotifyReader {
    // Declared first so event delivery stops before the queue goes away
    _watcher: RecommendedWatcher,
    queue: Receiver<Packet>,
    key: CompletionKey,
    buffer: Box<ChangeBuffer>,
    filled: usize,
    armed: bool,
    pending: Vec<ChangeRecord>,
    overflowed: bool,
}

pub(crate) struct NotifySignal {
    queue: Sender<Packet>,
}

pub(crate) fn open(
    target: &WatchTarget,
    key: CompletionKey,
    filter: NotifyFilter,
) -> WatcherResult<SourcePair> {
    let directory = open_directory(target.directory())?;

    let (tx, rx) = mpsc::channel();
    let events = tx.clone();
    let root = directory.clone();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let packet = match res {
            Ok(event) if event.need_rescan() => Packet::Rescan,
            Ok(event) => {
                let records = records_from_event(&root, filter, &event);
                if records.is_empty() {
                    return;
                }
                Packet::Changes(records)
            }
            Err(e) => Packet::Failed(into_io_error(e)),
        };
        let _ = events.send(packet);
    })
    .map_err(|e| WatcherError::resource("change notification queue", into_io_error(e)))?;

    watcher
        .watch(&directory, RecursiveMode::NonRecursive)
        .map_err(|e| WatcherError::initialization(&directory, into_io_error(e)))?;

    debug!("Watching {} through notify", directory.display());

    let reader = NotifyReader {
        _watcher: watcher,
        queue: rx,
        key,
        buffer: ChangeBuffer::boxed(),
        filled: 0,
        armed: false,
        pending: Vec::new(),
        overflowed: false,
    };
    Ok((Box::new(reader), Box::new(NotifySignal { queue: tx })))
}

/// Check the directory the way opening it for listing would, and resolve it
/// to the form notify reports paths in
fn open_directory(directory: &Path) -> WatcherResult<PathBuf> {
    let metadata =
        fs::metadata(directory).map_err(|e| WatcherError::initialization(directory, e))?;
    if !metadata.is_dir() {
        return Err(WatcherError::initialization(
            directory,
            io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
        ));
    }
    fs::read_dir(directory).map_err(|e| WatcherError::initialization(directory, e))?;
    fs::canonicalize(directory).map_err(|e| WatcherError::initialization(directory, e))
}

impl NotifyReader {
    fn queue_records(&mut self, records: Vec<ChangeRecord>) {
        if self.overflowed {
            return;
        }
        self.pending.extend(records);
        // Same limit the kernel has: what doesn't fit in one buffer is lost
        if encoded_len(&self.pending) > CHANGE_BUFFER_SIZE {
            debug!("{} queued changes exceed the change buffer", self.pending.len());
            self.pending.clear();
            self.overflowed = true;
        }
    }

    fn complete_read(&mut self) -> Completion {
        self.armed = false;
        let bytes = if self.overflowed {
            0
        } else {
            encode_records(&self.pending, self.buffer.as_mut_bytes()).unwrap_or(0)
        };
        self.pending.clear();
        self.overflowed = false;
        self.filled = bytes;
        Completion::Read {
            key: self.key,
            bytes,
        }
    }
}

impl ChangeReader for NotifyReader {
    fn arm(&mut self) -> io::Result<()> {
        self.armed = true;
        Ok(())
    }

    fn next_completion(&mut self) -> Completion {
        loop {
            if self.armed && (self.overflowed || !self.pending.is_empty()) {
                return self.complete_read();
            }

            let packet = match self.queue.recv() {
                Ok(packet) => packet,
                Err(_) => {
                    return Completion::Failed(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "completion queue closed",
                    ))
                }
            };

            match packet {
                Packet::Changes(records) => self.queue_records(records),
                Packet::Rescan => {
                    self.pending.clear();
                    self.overflowed = true;
                }
                Packet::Failed(e) => {
                    self.armed = false;
                    return Completion::Failed(e);
                }
                Packet::Posted(key) => return Completion::Posted(key),
                Packet::Cancel => {
                    if self.armed {
                        self.armed = false;
                        return Completion::Cancelled;
                    }
                }
            }
        }
    }

    fn buffer(&self) -> &[u8] {
        self.buffer.filled(self.filled)
    }
}

impl CompletionSignal for NotifySignal {
    fn post(&self, key: CompletionKey) -> io::Result<()> {
        self.queue
            .send(Packet::Posted(key))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "completion queue closed"))
    }

    fn cancel_pending(&self) -> io::Result<()> {
        self.queue
            .send(Packet::Cancel)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "completion queue closed"))
    }
}

// ============================================================================
// Event Translation
// ============================================================================

fn records_from_event(root: &Path, filter: NotifyFilter, event: &notify::Event) -> Vec<ChangeRecord> {
    let mut records = Vec::new();
    let mut push = |action: ChangeAction, path: &Path| {
        if !filter.admits(action) {
            return;
        }
        if let Some(name) = relative_name(root, path) {
            trace!("Change: {:?} {}", action, name);
            records.push(ChangeRecord::new(action, name));
        }
    };

    match event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                push(ChangeAction::Added, path);
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                push(ChangeAction::Removed, path);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            for path in &event.paths {
                push(ChangeAction::RenamedOldName, path);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for path in &event.paths {
                push(ChangeAction::RenamedNewName, path);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to] = event.paths.as_slice() {
                push(ChangeAction::RenamedOldName, from);
                push(ChangeAction::RenamedNewName, to);
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            // Backends that can't pair renames: infer the side from what is on disk
            for path in &event.paths {
                let action = if path.exists() {
                    ChangeAction::RenamedNewName
                } else {
                    ChangeAction::RenamedOldName
                };
                push(action, path);
            }
        }
        EventKind::Modify(_) => {
            for path in &event.paths {
                push(ChangeAction::Modified, path);
            }
        }
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
    }

    records
}

/// Name of a direct child of `root`, or `None` for anything else
fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut components = relative.components();
    let name = components.next()?;
    if components.next().is_some() {
        return None;
    }
    Some(name.as_os_str().to_string_lossy().into_owned())
}

fn into_io_error(error: notify::Error) -> io::Error {
    let message = error.to_string();
    match error.kind {
        notify::ErrorKind::Io(e) => e,
        notify::ErrorKind::PathNotFound => io::Error::new(io::ErrorKind::NotFound, message),
        _ => io::Error::new(io::ErrorKind::Other, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> notify::Event {
        let mut event = notify::Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    #[test]
    fn test_create_maps_to_added() {
        let ev = event(EventKind::Create(CreateKind::File), &["/srv/app/app_offline.htm"]);
        let records = records_from_event(Path::new("/srv/app"), NotifyFilter::DEFAULT, &ev);
        assert_eq!(records, vec![ChangeRecord::new(ChangeAction::Added, "app_offline.htm")]);
    }

    #[test]
    fn test_rename_both_maps_to_pair() {
        let ev = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/srv/app/tmp.htm", "/srv/app/app_offline.htm"],
        );
        let records = records_from_event(Path::new("/srv/app"), NotifyFilter::DEFAULT, &ev);
        assert_eq!(
            records,
            vec![
                ChangeRecord::new(ChangeAction::RenamedOldName, "tmp.htm"),
                ChangeRecord::new(ChangeAction::RenamedNewName, "app_offline.htm"),
            ]
        );
    }

    #[test]
    fn test_nested_paths_are_ignored() {
        let ev = event(
            EventKind::Remove(RemoveKind::File),
            &["/srv/app/logs/app_offline.htm", "/elsewhere/app_offline.htm"],
        );
        let records = records_from_event(Path::new("/srv/app"), NotifyFilter::DEFAULT, &ev);
        assert!(records.is_empty());
    }

    #[test]
    fn test_filter_drops_unrequested_kinds() {
        let ev = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/srv/app/app.dll"],
        );
        let names_only = records_from_event(Path::new("/srv/app"), NotifyFilter::FILE_NAME, &ev);
        assert!(names_only.is_empty());

        let records = records_from_event(Path::new("/srv/app"), NotifyFilter::DEFAULT, &ev);
        assert_eq!(records, vec![ChangeRecord::new(ChangeAction::Modified, "app.dll")]);
    }
}
