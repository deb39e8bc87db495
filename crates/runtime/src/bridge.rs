//! Synchronous access to a single background async loop.
//!
//! The bridge owns one OS thread running a current-thread tokio runtime.
//! Synchronous callers hand futures to it with [`Bridge::run_blocking`] and
//! block until the result arrives or the deadline passes. All remote I/O
//! happens on that thread.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// How long startup waits for the loop thread to report in.
pub const READY_TIMEOUT: Duration = Duration::from_secs(5);

const THREAD_NAME: &str = "toolbridge-loop";
const JOIN_POLL: Duration = Duration::from_millis(10);

/// Handle to the background loop.
pub struct Bridge {
    handle: Handle,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    running: Arc<AtomicBool>,
    thread_id: ThreadId,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Bridge {
    /// Start the loop thread and wait until it is executing.
    pub fn start() -> Result<Self> {
        Self::start_with_timeout(READY_TIMEOUT)
    }

    pub fn start_with_timeout(ready_timeout: Duration) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let running = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::sync_channel::<std::io::Result<Handle>>(1);

        let thread = {
            let shutdown = shutdown.clone();
            let tracker = tracker.clone();
            let running = running.clone();
            std::thread::Builder::new()
                .name(THREAD_NAME.into())
                .spawn(move || run_loop(ready_tx, shutdown, tracker, running))
                .map_err(|e| Error::LoopStart(e.to_string()))?
        };
        let thread_id = thread.thread().id();

        let handle = match ready_rx.recv_timeout(ready_timeout) {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(Error::LoopStart(e.to_string())),
            Err(_) => {
                shutdown.cancel();
                return Err(Error::LoopStart(format!(
                    "loop thread did not start within {ready_timeout:?}"
                )));
            }
        };

        let deadline = Instant::now() + ready_timeout;
        while !running.load(Ordering::Acquire) {
            if Instant::now() >= deadline {
                shutdown.cancel();
                return Err(Error::LoopStart("loop thread never began running".into()));
            }
            std::thread::sleep(JOIN_POLL);
        }

        info!("scheduler loop started");
        Ok(Self {
            handle,
            shutdown,
            tracker,
            running,
            thread_id,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Tracker drained at shutdown. Tasks spawned on it run on the loop
    /// and delay shutdown until they finish.
    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.shutdown.is_cancelled()
    }

    /// Run `work` on the loop and block the calling thread for its result.
    ///
    /// On timeout the work is cancelled at its next suspension point and
    /// [`Error::Timeout`] is returned; errors produced by the work itself are
    /// passed through unchanged.
    pub fn run_blocking<F, T>(&self, operation: &str, work: F, timeout: Duration) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if std::thread::current().id() == self.thread_id {
            return Err(Error::LoopReentry);
        }
        if !self.is_running() {
            return Err(Error::LoopShutdown);
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let cancel = self.shutdown.child_token();
        let task_cancel = cancel.clone();
        self.tracker.spawn_on(
            async move {
                tokio::select! {
                    _ = task_cancel.cancelled() => {}
                    result = work => {
                        let _ = tx.send(result);
                    }
                }
            },
            &self.handle,
        );

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                cancel.cancel();
                warn!(operation, ?timeout, "operation timed out");
                Err(Error::Timeout {
                    operation: operation.to_string(),
                    after: timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::LoopShutdown),
        }
    }

    /// Cancel outstanding work, stop the loop and join its thread for at
    /// most `join_timeout`. Safe to call more than once.
    pub fn shutdown(&self, join_timeout: Duration) {
        self.shutdown.cancel();

        let Some(thread) = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let deadline = Instant::now() + join_timeout;
        while !thread.is_finished() && Instant::now() < deadline {
            std::thread::sleep(JOIN_POLL);
        }

        if thread.is_finished() {
            if thread.join().is_err() {
                warn!("scheduler loop thread panicked");
            }
            info!("scheduler loop stopped");
        } else {
            warn!(?join_timeout, "scheduler loop did not stop in time; detaching");
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown(Duration::ZERO);
    }
}

fn run_loop(
    ready: mpsc::SyncSender<std::io::Result<Handle>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    running: Arc<AtomicBool>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    runtime.block_on(async move {
        if ready.send(Ok(Handle::current())).is_err() {
            // Startup gave up waiting.
            return;
        }
        running.store(true, Ordering::Release);

        shutdown.cancelled().await;

        // Every task selects on a child of `shutdown`, so they all finish.
        tracker.close();
        debug!(pending = tracker.len(), "draining scheduler tasks");
        tracker.wait().await;
        running.store(false, Ordering::Release);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_work_and_returns_result() {
        let bridge = Bridge::start().unwrap();
        assert!(bridge.is_running());
        let value = bridge
            .run_blocking("add", async { Ok(40 + 2) }, Duration::from_secs(1))
            .unwrap();
        assert_eq!(value, 42);
        bridge.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn work_runs_on_the_loop_thread() {
        let bridge = Bridge::start().unwrap();
        let name = bridge
            .run_blocking(
                "thread name",
                async { Ok(std::thread::current().name().map(str::to_string)) },
                Duration::from_secs(1),
            )
            .unwrap();
        assert_eq!(name.as_deref(), Some(THREAD_NAME));
    }

    #[test]
    fn errors_from_work_pass_through() {
        let bridge = Bridge::start().unwrap();
        let err = bridge
            .run_blocking::<_, ()>(
                "fail",
                async { Err(Error::UnknownServer("x".into())) },
                Duration::from_secs(1),
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnknownServer(_)));
        assert!(!err.is_timeout());
    }

    #[test]
    fn timeout_is_distinct_and_cancels_work() {
        let bridge = Bridge::start().unwrap();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let err = bridge
            .run_blocking(
                "sleep",
                async move {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                },
                Duration::from_millis(20),
            )
            .unwrap_err();
        assert!(err.is_timeout());

        std::thread::sleep(Duration::from_millis(500));
        assert!(!finished.load(Ordering::SeqCst), "timed-out work kept running");

        // The loop is still usable afterwards.
        assert_eq!(
            bridge
                .run_blocking("again", async { Ok(1) }, Duration::from_secs(1))
                .unwrap(),
            1
        );
    }

    #[test]
    fn shutdown_cancels_pending_work() {
        let bridge = Arc::new(Bridge::start().unwrap());
        let caller = {
            let bridge = bridge.clone();
            std::thread::spawn(move || {
                bridge.run_blocking(
                    "forever",
                    std::future::pending::<Result<()>>(),
                    Duration::from_secs(30),
                )
            })
        };
        std::thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        bridge.shutdown(Duration::from_secs(2));
        let result = caller.join().unwrap();
        assert!(matches!(result, Err(Error::LoopShutdown)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!bridge.is_running());
    }

    #[test]
    fn work_after_shutdown_is_rejected() {
        let bridge = Bridge::start().unwrap();
        bridge.shutdown(Duration::from_secs(1));
        bridge.shutdown(Duration::from_secs(1));
        let err = bridge
            .run_blocking("late", async { Ok(()) }, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, Error::LoopShutdown));
    }

    #[test]
    fn blocking_from_the_loop_thread_is_refused() {
        let bridge = Arc::new(Bridge::start().unwrap());
        let inner = bridge.clone();
        let nested = bridge
            .run_blocking(
                "outer",
                async move {
                    Ok(inner
                        .run_blocking("inner", async { Ok(()) }, Duration::from_secs(1))
                        .map_err(|e| e.to_string()))
                },
                Duration::from_secs(1),
            )
            .unwrap();
        assert!(nested.is_err());
        bridge.shutdown(Duration::from_secs(1));
    }
}
