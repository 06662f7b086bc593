//! Client session state and task lifecycle
//!
//! [`SessionState`] holds the values shared between client event handlers
//! and the background cycles (recording flag, counters). [`ConnectionRegistry`]
//! owns the task handles and decides when cycles start and stop.

mod registry;

pub use registry::{ConnectionRegistry, CycleContext};

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Flags and counters shared with the cycles. All access is atomic.
#[derive(Debug, Default)]
pub struct SessionState {
    recording: AtomicBool,
    connections: AtomicUsize,
    loop_starts: AtomicU64,
    cycles: AtomicU64,
}

impl SessionState {
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::SeqCst);
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub(crate) fn set_connections(&self, count: usize) {
        self.connections.store(count, Ordering::SeqCst);
    }

    /// Broadcast loop runs started since process start.
    pub fn loop_starts(&self) -> u64 {
        self.loop_starts.load(Ordering::SeqCst)
    }

    pub(crate) fn record_loop_start(&self) {
        self.loop_starts.fetch_add(1, Ordering::SeqCst);
    }

    /// Broadcast cycles completed since process start.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    pub(crate) fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::SeqCst);
    }
}

/// Handle to one spawned cycle, uniform across all cycle kinds.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    join: JoinHandle<()>,
    token: CancellationToken,
}

impl TaskHandle {
    /// Spawn `make(token)` on the runtime with its own cancellation token.
    pub fn spawn<F, Fut>(name: &'static str, token: CancellationToken, make: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let join = tokio::spawn(make(token.clone()));
        Self { name, join, token }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task is still executing (not finished, crashed or aborted).
    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Ask the task to stop at its next cancellation check.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop the task at its next await point, without waiting for a checkpoint.
    pub fn abort(&self) {
        self.token.cancel();
        self.join.abort();
    }
}

/// Point-in-time view of the session, served by `/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub connections: usize,
    pub recording: bool,
    pub broadcast_running: bool,
    pub monitors_running: usize,
    pub loop_starts: u64,
    pub cycles: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_task_handle_cancel_and_liveness() {
        let handle = TaskHandle::spawn("test", CancellationToken::new(), |token| async move {
            token.cancelled().await;
        });
        assert!(handle.is_running());
        assert_eq!(handle.name(), "test");

        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), async {
            while handle.is_running() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_task_handle_abort() {
        let handle = TaskHandle::spawn("sleeper", CancellationToken::new(), |_| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        handle.abort();
        tokio::time::timeout(Duration::from_secs(1), async {
            while handle.is_running() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_session_state_counters() {
        let state = SessionState::default();
        state.set_recording(true);
        state.record_loop_start();
        state.record_cycle();
        state.record_cycle();
        assert!(state.is_recording());
        assert_eq!(state.loop_starts(), 1);
        assert_eq!(state.cycles(), 2);
    }
}
