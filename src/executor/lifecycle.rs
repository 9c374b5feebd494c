//! Executor lifecycle
//!
//! Entry points for scheduler connection events: registration,
//! disconnection, task launches, task kills, and opaque framework
//! messages. Launching a task validates the payload, registers it with
//! the tracker, and spawns an independent worker; the dispatch path never
//! waits for a worker to complete.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

use crate::protocol::{Message, StatusUpdateMessage, TaskLaunchMessage, FrameworkMessageData};
use crate::provision::ArtifactProvisioner;
use crate::search::{CancelToken, ObjectiveFactory};
use crate::types::TaskDescriptor;

use super::{TaskTracker, TaskWorker};

/// How long shutdown waits for each worker to drain after cancellation
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Top-level executor component.
///
/// Owns the worker tracker and the outbound message channel; the
/// transport layer feeds it connection events and forwards whatever it
/// emits.
pub struct ExecutorLifecycle {
    tracker: Arc<TaskTracker>,
    provisioner: Arc<ArtifactProvisioner>,
    objectives: Arc<dyn ObjectiveFactory>,
    outbound_tx: mpsc::Sender<Message>,
}

impl ExecutorLifecycle {
    /// Create the lifecycle and the outbound message receiver.
    ///
    /// Everything the executor sends to the scheduler (status updates,
    /// framework message echoes) arrives on the returned receiver in
    /// emission order.
    pub fn new(
        max_concurrent_tasks: usize,
        queue_size: usize,
        provisioner: Arc<ArtifactProvisioner>,
        objectives: Arc<dyn ObjectiveFactory>,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(queue_size);
        let tracker = Arc::new(TaskTracker::new(max_concurrent_tasks));

        (
            Self {
                tracker,
                provisioner,
                objectives,
                outbound_tx,
            },
            outbound_rx,
        )
    }

    /// The shared worker tracker
    pub fn tracker(&self) -> Arc<TaskTracker> {
        self.tracker.clone()
    }

    /// Called once when the executor establishes its scheduler connection
    pub fn on_registered(&self, executor_id: &str) {
        info!(executor_id = %executor_id, "Executor registered");
    }

    /// Called when the scheduler connection is lost.
    ///
    /// In-flight workers keep running; their status updates are dropped by
    /// the transport until the connection is re-established.
    pub fn on_disconnected(&self, reason: &str) {
        warn!(
            reason = %reason,
            in_flight = self.tracker.active_task_ids().len(),
            "Scheduler connection lost, workers keep running"
        );
    }

    /// Handle a task launch: validate, track, spawn a worker.
    ///
    /// On decode or validation failure a FAILED update is emitted
    /// synchronously and no worker is started.
    pub async fn on_launch_task(&self, launch: TaskLaunchMessage) {
        let task_id = launch.task_id.clone();

        let descriptor = match TaskDescriptor::parse(&task_id, &launch.data) {
            Ok(d) => d,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Rejecting malformed task");
                self.send(Message::StatusUpdate(StatusUpdateMessage::failed(
                    &task_id,
                    e.format_for_log(),
                )))
                .await;
                return;
            }
        };

        let cancel = CancelToken::new();
        if !self.tracker.add_task(&task_id, cancel.clone()) {
            warn!(task_id = %task_id, "Rejecting task, executor at capacity");
            self.send(Message::StatusUpdate(StatusUpdateMessage::failed(
                &task_id,
                "executor at capacity",
            )))
            .await;
            return;
        }

        info!(
            task_id = %task_id,
            uid = %descriptor.uid,
            temperature = descriptor.temperature,
            cooling_rate = descriptor.cooling_rate,
            num_mutations = descriptor.num_mutations,
            expected_rounds = descriptor.expected_rounds(),
            "Launching task"
        );

        let worker = TaskWorker::new(
            descriptor,
            self.tracker.clone(),
            self.provisioner.clone(),
            self.objectives.clone(),
            self.outbound_tx.clone(),
            cancel,
        );

        let handle = tokio::spawn(worker.run());
        self.tracker.attach_handle(&task_id, handle);
    }

    /// Handle a kill request from the scheduler
    pub fn on_kill_task(&self, task_id: &str, reason: &str) {
        if self.tracker.cancel_task(task_id) {
            info!(task_id = %task_id, reason = %reason, "Task cancellation requested");
        } else {
            warn!(task_id = %task_id, "Kill requested for unknown or finished task");
        }
    }

    /// Opaque pass-through: forward the framework message unchanged back
    /// through the scheduler connection.
    pub async fn on_framework_message(&self, message: FrameworkMessageData) {
        self.send(Message::FrameworkMessage(message)).await;
    }

    /// Cancel all in-flight workers and wait briefly for them to drain.
    ///
    /// Returns the ids of tasks that were abandoned, for the shutdown
    /// notification to the scheduler.
    pub async fn shutdown(&self) -> Vec<String> {
        let abandoned = self.tracker.cancel_all();
        if !abandoned.is_empty() {
            info!(count = abandoned.len(), "Cancelling in-flight workers");
        }

        for (task_id, handle) in self.tracker.take_handles() {
            if timeout(SHUTDOWN_DRAIN_TIMEOUT, handle).await.is_err() {
                warn!(task_id = %task_id, "Worker did not drain before shutdown timeout");
            }
        }

        abandoned
    }

    async fn send(&self, message: Message) {
        if self.outbound_tx.send(message).await.is_err() {
            warn!("Outbound channel closed, message dropped");
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
