// Completion source driven by the test itself
// Lets monitor and watcher tests feed exact completion sequences

use super::{ChangeReader, Completion, CompletionKey, CompletionSignal};
use crate::record::{encode_records, ChangeBuffer, ChangeRecord};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

pub(crate) enum Step {
    /// Complete the outstanding read with these records
    Records(Vec<ChangeRecord>),
    /// Complete the outstanding read with zero bytes
    Overflow,
    /// Complete the outstanding read with an error
    Fail(io::ErrorKind),
    /// Key-only packet
    Posted(CompletionKey),
    Cancel,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub arms: AtomicUsize,
    pub cancels: AtomicUsize,
    pub posts: AtomicUsize,
    /// Upcoming arm calls that fail
    pub failing_arms: AtomicUsize,
}

pub(crate) struct ScriptedReader {
    steps: Receiver<Step>,
    key: CompletionKey,
    buffer: Box<ChangeBuffer>,
    filled: usize,
    counters: Arc<Counters>,
}

pub(crate) struct ScriptedSignal {
    steps: Mutex<Sender<Step>>,
    counters: Arc<Counters>,
}

/// Test-side handle for pushing steps and reading counters
#[derive(Clone)]
pub(crate) struct Script {
    steps: Sender<Step>,
    pub counters: Arc<Counters>,
}

impl Script {
    pub fn push(&self, step: Step) {
        let _ = self.steps.send(step);
    }
}

pub(crate) fn source(key: CompletionKey) -> (ScriptedReader, ScriptedSignal, Script) {
    let (tx, rx) = mpsc::channel();
    let counters = Arc::new(Counters::default());
    let reader = ScriptedReader {
        steps: rx,
        key,
        buffer: ChangeBuffer::boxed(),
        filled: 0,
        counters: Arc::clone(&counters),
    };
    let signal = ScriptedSignal {
        steps: Mutex::new(tx.clone()),
        counters: Arc::clone(&counters),
    };
    (reader, signal, Script { steps: tx, counters })
}

impl ChangeReader for ScriptedReader {
    fn arm(&mut self) -> io::Result<()> {
        let failing = self.counters.failing_arms.load(Ordering::SeqCst);
        if failing > 0 {
            self.counters.failing_arms.store(failing - 1, Ordering::SeqCst);
            return Err(io::Error::new(io::ErrorKind::Other, "scripted arm failure"));
        }
        self.counters.arms.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn next_completion(&mut self) -> Completion {
        let step = match self.steps.recv() {
            Ok(step) => step,
            Err(_) => return Completion::Posted(CompletionKey::SHUTDOWN),
        };
        match step {
            Step::Records(records) => {
                let bytes = encode_records(&records, self.buffer.as_mut_bytes()).unwrap_or(0);
                self.filled = bytes;
                Completion::Read { key: self.key, bytes }
            }
            Step::Overflow => {
                self.filled = 0;
                Completion::Read { key: self.key, bytes: 0 }
            }
            Step::Fail(kind) => Completion::Failed(io::Error::new(kind, "scripted read failure")),
            Step::Posted(key) => Completion::Posted(key),
            Step::Cancel => Completion::Cancelled,
        }
    }

    fn buffer(&self) -> &[u8] {
        self.buffer.filled(self.filled)
    }
}

impl CompletionSignal for ScriptedSignal {
    fn post(&self, key: CompletionKey) -> io::Result<()> {
        self.counters.posts.fetch_add(1, Ordering::SeqCst);
        self.steps
            .lock()
            .send(Step::Posted(key))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "script closed"))
    }

    fn cancel_pending(&self) -> io::Result<()> {
        self.counters.cancels.fetch_add(1, Ordering::SeqCst);
        let _ = self.steps.lock().send(Step::Cancel);
        Ok(())
    }
}
