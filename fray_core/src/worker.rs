use log::{info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often worker loops poll for cancellation. Every blocking wait inside
/// a worker must be bounded by at most this interval so shutdown is prompt.
pub const TICK: Duration = Duration::from_millis(100);

/// A shared cooperative cancellation flag, checked at every loop tick.
///
/// Cancellation replaces OS-signal handling: the owner sets the flag, the
/// worker notices within one tick and runs its own teardown. No worker is
/// ever forcibly killed.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Returns `true` only for the first call;
    /// repeated calls are no-ops, which keeps shutdown paths idempotent.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A long-running pipeline worker with its own private state and loop.
///
/// Implementations communicate only through the shared histories and the
/// cancellation token; there is no shared mutable state beyond those.
pub trait Worker: Send + 'static {
    /// Stable name used for the thread and in log lines.
    fn name(&self) -> &'static str;

    /// The worker's main loop. Must poll `cancel` at least every [`TICK`]
    /// and return promptly once it is set, running any teardown itself.
    fn run(&mut self, cancel: &CancelToken);
}

/// Handle to a spawned worker: request cancellation, then join.
pub struct WorkerHandle {
    name: &'static str,
    cancel: CancelToken,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Sets the worker's cancellation flag. Idempotent: only the first call
    /// logs, a second call changes nothing.
    pub fn request_cancel(&self) {
        if self.cancel.cancel() {
            info!("{}: shutdown requested", self.name);
        }
    }

    /// Waits for the worker's thread to finish.
    pub fn join(self) {
        if self.thread.join().is_err() {
            warn!("{}: worker thread panicked", self.name);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

/// Spawns a worker on its own named thread.
pub fn spawn<W: Worker>(mut worker: W) -> std::io::Result<WorkerHandle> {
    let name = worker.name();
    let cancel = CancelToken::new();
    let token = cancel.clone();
    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            info!("{name}: worker started");
            worker.run(&token);
            info!("{name}: worker stopped");
        })?;
    Ok(WorkerHandle {
        name,
        cancel,
        thread,
    })
}

/// Sleeps for `duration`, waking early (within one [`TICK`]) if the token
/// is cancelled.
pub fn sleep_cancellable(cancel: &CancelToken, duration: Duration) {
    let deadline = Instant::now() + duration;
    while !cancel.is_cancelled() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(remaining.min(TICK));
    }
}
