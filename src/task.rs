//! Polling of remote asynchronous tasks until they settle.

use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::control_plane::{ControlPlane, TaskHandle};

/// Default interval between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Final state of an awaited task.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The task stopped with exit status `OK`.
    Succeeded,
    /// The task stopped with another exit status.
    Failed(String),
    /// The deadline elapsed before the task stopped.
    TimedOut,
}

/// Waits for tasks by polling [`ControlPlane::task_status`].
#[derive(Clone, Copy, Debug)]
pub struct TaskWaiter {
    poll_interval: Duration,
}

impl Default for TaskWaiter {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl TaskWaiter {
    /// Creates a waiter polling every `poll_interval`.
    #[must_use]
    pub const fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Interval between polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Polls `handle` until it stops or `timeout` elapses.
    ///
    /// Poll errors count as "still running". The deadline is checked after
    /// every poll and sleeps never overshoot it, so a task that never stops
    /// yields [`TaskOutcome::TimedOut`] exactly at `start + timeout`.
    pub async fn wait<C>(&self, control_plane: &C, handle: &TaskHandle, timeout: Duration) -> TaskOutcome
    where
        C: ControlPlane + ?Sized,
    {
        let deadline = Instant::now() + timeout;
        loop {
            match control_plane.task_status(handle).await {
                Ok(status) if status.is_terminal() => {
                    if status.succeeded() {
                        debug!(upid = %handle.upid, "task finished");
                        return TaskOutcome::Succeeded;
                    }
                    let reason = status
                        .exitstatus
                        .unwrap_or_else(|| String::from("unknown exit status"));
                    debug!(upid = %handle.upid, %reason, "task failed");
                    return TaskOutcome::Failed(reason);
                }
                Ok(status) => {
                    debug!(upid = %handle.upid, status = %status.status, "task still running");
                }
                Err(err) => {
                    warn!(upid = %handle.upid, error = %err, "task status poll failed; retrying");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return TaskOutcome::TimedOut;
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::ControlPlaneError;
    use crate::test_support::ScriptedControlPlane;

    fn handle() -> TaskHandle {
        TaskHandle::new("pve", "UPID:pve:0001:clone")
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_once_task_stops_ok() {
        let control_plane = ScriptedControlPlane::new();
        control_plane.push_task_running(&handle().upid);
        control_plane.push_task_running(&handle().upid);
        control_plane.push_task_stopped(&handle().upid, "OK");

        let start = Instant::now();
        let outcome = TaskWaiter::default()
            .wait(&control_plane, &handle(), Duration::from_secs(60))
            .await;

        assert_eq!(outcome, TaskOutcome::Succeeded);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_exit_status_is_reported() {
        let control_plane = ScriptedControlPlane::new();
        control_plane.push_task_stopped(&handle().upid, "storage full");

        let outcome = TaskWaiter::default()
            .wait(&control_plane, &handle(), Duration::from_secs(60))
            .await;

        assert_eq!(outcome, TaskOutcome::Failed(String::from("storage full")));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_exactly_at_deadline() {
        let control_plane = ScriptedControlPlane::new();
        control_plane.set_default_task_running();

        let start = Instant::now();
        let outcome = TaskWaiter::default()
            .wait(&control_plane, &handle(), Duration::from_secs(7))
            .await;

        assert_eq!(outcome, TaskOutcome::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_errors_are_retried() {
        let control_plane = ScriptedControlPlane::new();
        control_plane.push_task_error(
            &handle().upid,
            ControlPlaneError::Connection(String::from("reset by peer")),
        );
        control_plane.push_task_stopped(&handle().upid, "OK");

        let outcome = TaskWaiter::default()
            .wait(&control_plane, &handle(), Duration::from_secs(10))
            .await;

        assert_eq!(outcome, TaskOutcome::Succeeded);
    }
}
