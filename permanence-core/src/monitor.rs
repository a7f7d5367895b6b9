//! Process Monitor: a single background poller that couples subprocess
//! exit detection back into the engine without anything else blocking on
//! `wait()`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::event::EventSource;

const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// How a watched subprocess ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Code(i32),
    Signaled,
    Unknown,
}

/// Anything the monitor can poll for completion without blocking.
pub trait Watched: Send {
    /// Non-blocking check: `Ok(None)` means still running.
    fn poll_exit(&mut self) -> anyhow::Result<Option<ExitStatus>>;
}

type WatchedPair = (Box<dyn Watched>, Box<dyn FnOnce(ExitStatus) + Send>);

struct State {
    queue: VecDeque<WatchedPair>,
}

/// An explicit, daemon-owned lifecycle object (not a process-wide global):
/// the entry point constructs one, hands it to sessions that need to
/// register subprocesses, and halts it during shutdown.
pub struct ProcessMonitor {
    state: Mutex<State>,
    active: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    pub on_empty: EventSource<()>,
}

impl ProcessMonitor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
            }),
            active: AtomicBool::new(false),
            worker: Mutex::new(None),
            on_empty: EventSource::new(),
        })
    }

    /// Enqueue `handle` with its exit callback. Starts the worker thread on
    /// the very first call.
    pub fn watch(
        self: &Arc<Self>,
        handle: Box<dyn Watched>,
        on_exit: impl FnOnce(ExitStatus) + Send + 'static,
    ) {
        self.state
            .lock()
            .unwrap()
            .queue
            .push_back((handle, Box::new(on_exit)));

        let mut worker = self.worker.lock().unwrap();
        if worker.is_none() {
            self.active.store(true, Ordering::SeqCst);
            let monitor = self.clone();
            *worker = Some(
                std::thread::Builder::new()
                    .name("process-monitor".to_string())
                    .spawn(move || monitor.run())
                    .expect("failed to spawn process monitor thread"),
            );
        }
    }

    /// Whether the watch set is currently empty - true both when nothing
    /// has ever been watched (the sweep thread was never started) and once
    /// everything previously watched has been reaped.
    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().queue.is_empty()
    }

    /// Ask the worker to stop after its current sweep, then wait for it.
    pub fn halt(&self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
    }

    fn run(&self) {
        while self.active.load(Ordering::SeqCst) {
            let became_empty = self.sweep();
            if became_empty {
                self.on_empty.fire(());
            }
            std::thread::sleep(SWEEP_INTERVAL);
        }
    }

    /// One O(n) pass over the watch set: poll each pair once, keep the
    /// ones still running, invoke and drop the ones that exited. Returns
    /// whether the set is empty once the sweep finishes.
    fn sweep(&self) -> bool {
        let pending_count = self.state.lock().unwrap().queue.len();

        for _ in 0..pending_count {
            let item = self.state.lock().unwrap().queue.pop_front();
            let Some((mut handle, on_exit)) = item else {
                break;
            };

            match handle.poll_exit() {
                Ok(Some(status)) => on_exit(status),
                Ok(None) => self.state.lock().unwrap().queue.push_back((handle, on_exit)),
                Err(_) => on_exit(ExitStatus::Unknown),
            }
        }

        self.state.lock().unwrap().queue.is_empty()
    }
}
