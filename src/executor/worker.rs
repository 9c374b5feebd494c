//! Per-task worker
//!
//! One worker owns one task from launch to terminal state. It emits the
//! RUNNING update, provisions the problem package when one is referenced,
//! drives the search engine on a blocking thread, and reports
//! FINISHED/FAILED. Nothing a worker does can fail any other task.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{Message, SearchOutcome, StatusUpdateMessage, TaskMetrics};
use crate::provision::ArtifactProvisioner;
use crate::search::{
    AnnealingSchedule, CancelToken, ObjectiveFactory, SearchEngine, SearchReport,
};
use crate::types::TaskDescriptor;

use super::TaskTracker;

/// Worker for one launched task
pub struct TaskWorker {
    descriptor: TaskDescriptor,
    tracker: Arc<TaskTracker>,
    provisioner: Arc<ArtifactProvisioner>,
    objectives: Arc<dyn ObjectiveFactory>,
    outbound_tx: mpsc::Sender<Message>,
    cancel: CancelToken,
}

impl TaskWorker {
    pub fn new(
        descriptor: TaskDescriptor,
        tracker: Arc<TaskTracker>,
        provisioner: Arc<ArtifactProvisioner>,
        objectives: Arc<dyn ObjectiveFactory>,
        outbound_tx: mpsc::Sender<Message>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            descriptor,
            tracker,
            provisioner,
            objectives,
            outbound_tx,
            cancel,
        }
    }

    /// Run the task to a terminal state.
    ///
    /// Status updates are one-way emissions; a delivery failure (connection
    /// lost) is logged and otherwise ignored.
    pub async fn run(self) {
        let task_id = self.descriptor.task_id.clone();

        self.tracker.mark_running(&task_id);
        info!(task_id = %task_id, "Running task");
        self.emit(StatusUpdateMessage::running(&task_id)).await;

        let started = Instant::now();
        match self.execute().await {
            Ok(report) => {
                self.tracker.mark_finished(&task_id);
                info!(
                    task_id = %task_id,
                    best_fitness = ?report.best_fitness,
                    rounds = report.rounds,
                    "Task finished"
                );

                let metrics = TaskMetrics {
                    execution_time_ms: started.elapsed().as_millis() as u64,
                    rounds: report.rounds,
                    evaluations: report.evaluations,
                };
                let outcome = SearchOutcome {
                    uid: self.descriptor.uid.clone(),
                    best_location: report.best_key,
                    fitness_score: report.best_fitness,
                };
                self.emit(StatusUpdateMessage::finished(&task_id, outcome, metrics))
                    .await;
            }
            Err(e) => {
                let message = e.format_for_log();
                self.tracker.mark_failed(&task_id, message.clone());
                error!(task_id = %task_id, error = %e, "Task failed");
                self.emit(StatusUpdateMessage::failed(&task_id, message)).await;
            }
        }
    }

    /// Provision, build the objective, and run the search
    async fn execute(&self) -> Result<SearchReport> {
        let problem_path = match &self.descriptor.package {
            Some(pkg) => Some(self.provisioner.resolve(&pkg.name, &pkg.url).await?),
            None => None,
        };

        let objective = self
            .objectives
            .build(&self.descriptor, problem_path.as_deref())?;

        let schedule = AnnealingSchedule {
            initial_temperature: self.descriptor.temperature,
            cooling_rate: self.descriptor.cooling_rate,
            num_mutations: self.descriptor.num_mutations,
        };

        let initial_key = self.descriptor.location.clone();
        let cancel = self.cancel.clone();

        // The search loop is CPU-bound; keep it off the async workers.
        // A panicking callback surfaces as a JoinError and fails only this
        // task.
        let report = tokio::task::spawn_blocking(move || {
            let mut engine = SearchEngine::new(schedule);
            engine.run(initial_key, objective.as_ref(), &cancel)
        })
        .await
        .map_err(|e| Error::Internal(format!("search thread panicked: {}", e)))??;

        Ok(report)
    }

    /// Emit one status update, best effort
    async fn emit(&self, update: StatusUpdateMessage) {
        if self
            .outbound_tx
            .send(Message::StatusUpdate(update))
            .await
            .is_err()
        {
            warn!(task_id = %self.descriptor.task_id, "Status channel closed, update dropped");
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{StatusData, TaskState};
    use crate::search::MockObjectiveFactory;
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn descriptor(task_id: &str) -> TaskDescriptor {
        TaskDescriptor::parse(
            task_id,
            &json!({
                "uid": "u1",
                "location": "K0",
                "temperature": 2.0,
                "cooling_rate": 1.0,
                "num_mutations": 1
            })
            .to_string(),
        )
        .unwrap()
    }

    fn test_provisioner(cache: &TempDir) -> Arc<ArtifactProvisioner> {
        Arc::new(ArtifactProvisioner::new(cache.path(), Duration::from_secs(5)).unwrap())
    }

    #[tokio::test]
    async fn test_worker_reports_running_then_finished() {
        let cache = TempDir::new().unwrap();
        let tracker = Arc::new(TaskTracker::new(4));
        let (tx, mut rx) = mpsc::channel(16);

        let cancel = CancelToken::new();
        tracker.add_task("task-1", cancel.clone());

        let worker = TaskWorker::new(
            descriptor("task-1"),
            tracker.clone(),
            test_provisioner(&cache),
            Arc::new(MockObjectiveFactory::new(5.0)),
            tx,
            cancel,
        );
        worker.run().await;

        let first = match rx.recv().await.unwrap() {
            Message::StatusUpdate(u) => u,
            other => panic!("unexpected message {}", other.type_name()),
        };
        assert_eq!(first.state, TaskState::Running);

        let second = match rx.recv().await.unwrap() {
            Message::StatusUpdate(u) => u,
            other => panic!("unexpected message {}", other.type_name()),
        };
        assert_eq!(second.state, TaskState::Finished);
        match second.data {
            StatusData::Result(outcome) => {
                assert_eq!(outcome.uid, "u1");
                assert_eq!(outcome.best_location, json!("K0"));
                assert_eq!(outcome.fitness_score, Some(5.0));
            }
            StatusData::Message(m) => panic!("expected result payload, got {m}"),
        }
        let metrics = second.metrics.unwrap();
        assert_eq!(metrics.rounds, 3);
        assert_eq!(metrics.evaluations, 3);

        assert_eq!(tracker.total_finished(), 1);
    }

    #[tokio::test]
    async fn test_worker_reports_failed_on_callback_error() {
        struct FailingFactory;
        impl ObjectiveFactory for FailingFactory {
            fn build(
                &self,
                _descriptor: &TaskDescriptor,
                _problem_path: Option<&Path>,
            ) -> crate::error::Result<Box<dyn crate::search::Objective>> {
                Err(Error::callback("client library not linked"))
            }
        }

        let cache = TempDir::new().unwrap();
        let tracker = Arc::new(TaskTracker::new(4));
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancelToken::new();
        tracker.add_task("task-1", cancel.clone());

        let worker = TaskWorker::new(
            descriptor("task-1"),
            tracker.clone(),
            test_provisioner(&cache),
            Arc::new(FailingFactory),
            tx,
            cancel,
        );
        worker.run().await;

        // RUNNING is still emitted before the failure is discovered.
        let first = match rx.recv().await.unwrap() {
            Message::StatusUpdate(u) => u,
            other => panic!("unexpected message {}", other.type_name()),
        };
        assert_eq!(first.state, TaskState::Running);

        let second = match rx.recv().await.unwrap() {
            Message::StatusUpdate(u) => u,
            other => panic!("unexpected message {}", other.type_name()),
        };
        assert_eq!(second.state, TaskState::Failed);
        match second.data {
            StatusData::Message(m) => assert!(m.contains("client library")),
            StatusData::Result(_) => panic!("expected error message"),
        }
        assert_eq!(tracker.total_failed(), 1);
    }

    #[tokio::test]
    async fn test_worker_failed_on_unsupported_package_source() {
        let cache = TempDir::new().unwrap();
        let tracker = Arc::new(TaskTracker::new(4));
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancelToken::new();
        tracker.add_task("task-1", cancel.clone());

        let mut desc = descriptor("task-1");
        desc.package = Some(crate::types::PackageRef {
            name: "tsp".to_string(),
            url: "ftp://example.com/tsp.zip".to_string(),
        });

        let worker = TaskWorker::new(
            desc,
            tracker.clone(),
            test_provisioner(&cache),
            Arc::new(MockObjectiveFactory::default()),
            tx,
            cancel,
        );
        worker.run().await;

        // Skip RUNNING, inspect the terminal update.
        rx.recv().await.unwrap();
        let terminal = match rx.recv().await.unwrap() {
            Message::StatusUpdate(u) => u,
            other => panic!("unexpected message {}", other.type_name()),
        };
        assert_eq!(terminal.state, TaskState::Failed);
        match terminal.data {
            StatusData::Message(m) => assert!(m.contains("Unsupported package source")),
            StatusData::Result(_) => panic!("expected error message"),
        }
    }
}
