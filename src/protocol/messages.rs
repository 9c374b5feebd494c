//! Protocol message definitions
//!
//! All message types for executor-scheduler communication.
//! Messages are serialized as JSON with a type discriminator.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::ProtocolVersion;

// ─────────────────────────────────────────────────────────────────
// Message Envelope
// ─────────────────────────────────────────────────────────────────

/// Wrapper for all protocol messages with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Unique message ID
    pub id: Uuid,

    /// Message timestamp
    pub timestamp: DateTime<Utc>,

    /// Protocol version
    pub version: ProtocolVersion,

    /// The actual message payload
    #[serde(flatten)]
    pub payload: Message,
}

impl MessageEnvelope {
    /// Create a new message envelope
    pub fn new(payload: Message) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            version: ProtocolVersion::default(),
            payload,
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Deserialize from JSON bytes
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

// ─────────────────────────────────────────────────────────────────
// Message Types (Discriminated Union)
// ─────────────────────────────────────────────────────────────────

/// All protocol messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    // ─── Executor → Scheduler ───────────────────────────────────
    /// Executor registration request
    Register(RegisterRequest),

    /// Executor heartbeat
    Heartbeat(HeartbeatRequest),

    /// Per-task status update
    StatusUpdate(StatusUpdateMessage),

    /// Executor graceful shutdown notification
    Shutdown(ShutdownMessage),

    // ─── Scheduler → Executor ───────────────────────────────────
    /// Registration acknowledgment
    RegisterAck(RegisterAckResponse),

    /// Heartbeat acknowledgment
    HeartbeatAck(HeartbeatAckResponse),

    /// Task launch
    LaunchTask(TaskLaunchMessage),

    /// Task kill request
    KillTask(TaskKillMessage),

    /// Error response
    Error(ErrorMessage),

    // ─── Both directions ─────────────────────────────────────────
    /// Opaque framework message, relayed unmodified
    FrameworkMessage(FrameworkMessageData),
}

impl Message {
    /// Get the message type name
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Register(_) => "REGISTER",
            Message::RegisterAck(_) => "REGISTER_ACK",
            Message::Heartbeat(_) => "HEARTBEAT",
            Message::HeartbeatAck(_) => "HEARTBEAT_ACK",
            Message::LaunchTask(_) => "LAUNCH_TASK",
            Message::KillTask(_) => "KILL_TASK",
            Message::StatusUpdate(_) => "STATUS_UPDATE",
            Message::Shutdown(_) => "SHUTDOWN",
            Message::Error(_) => "ERROR",
            Message::FrameworkMessage(_) => "FRAMEWORK_MESSAGE",
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Registration Messages
// ─────────────────────────────────────────────────────────────────

/// Executor registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Executor ID (may be assigned by the scheduler if empty)
    #[serde(default)]
    pub executor_id: Option<String>,

    /// Human-readable executor name
    pub name: String,

    /// Maximum concurrent search tasks
    pub max_concurrent_tasks: u32,

    /// Executor software version
    pub executor_version: String,

    /// Executor tags for task routing
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Registration acknowledgment from the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAckResponse {
    /// Whether registration was successful
    pub success: bool,

    /// Assigned executor ID
    pub executor_id: String,

    /// Heartbeat interval (seconds)
    pub heartbeat_interval_secs: u32,

    /// Scheduler's protocol version
    pub scheduler_version: ProtocolVersion,

    /// Any error message
    #[serde(default)]
    pub error: Option<String>,
}

// ─────────────────────────────────────────────────────────────────
// Heartbeat Messages
// ─────────────────────────────────────────────────────────────────

/// Heartbeat request from the executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// Executor ID
    pub executor_id: String,

    /// Currently executing task ids
    pub active_tasks: Vec<String>,

    /// Tasks finished since startup
    #[serde(default)]
    pub finished_task_count: u64,

    /// Tasks failed since startup
    #[serde(default)]
    pub failed_task_count: u64,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

/// Heartbeat acknowledgment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatAckResponse {
    /// Whether the heartbeat was accepted
    pub accepted: bool,

    /// Next expected heartbeat (timestamp)
    pub next_heartbeat: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────
// Task Messages
// ─────────────────────────────────────────────────────────────────

/// Task launch from the scheduler.
///
/// `data` is the raw JSON task payload; it is decoded and validated by the
/// executor (see `TaskDescriptor::parse`), never by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLaunchMessage {
    /// Unique task ID
    pub task_id: String,

    /// Raw task payload (JSON document as a string)
    pub data: String,
}

/// Task kill request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskKillMessage {
    /// Task ID to kill
    pub task_id: String,

    /// Reason for the kill
    pub reason: String,
}

// ─────────────────────────────────────────────────────────────────
// Status Updates
// ─────────────────────────────────────────────────────────────────

/// Task state reported to the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// The search is running
    Running,
    /// The search completed and produced a result
    Finished,
    /// The task failed (bad payload, callback error, or kill)
    Failed,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Running => write!(f, "RUNNING"),
            TaskState::Finished => write!(f, "FINISHED"),
            TaskState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Result payload attached to a FINISHED status update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Echo token from the task payload
    pub uid: String,

    /// Best key found by the search
    pub best_location: Value,

    /// Fitness of the best key (null if no evaluation ever ran)
    pub fitness_score: Option<f64>,
}

/// Status update data: a result payload for FINISHED, a marker or error
/// string otherwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusData {
    /// FINISHED result payload
    Result(SearchOutcome),

    /// Human-readable marker (RUNNING) or error description (FAILED)
    Message(String),
}

/// Timing metrics attached to a terminal status update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetrics {
    /// Time spent executing (ms)
    pub execution_time_ms: u64,

    /// Annealing rounds completed
    pub rounds: u64,

    /// Fitness evaluations performed
    pub evaluations: u64,
}

/// Per-task status update sent to the scheduler.
///
/// Immutable after creation; ownership transfers to the scheduler
/// connection for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdateMessage {
    /// Task ID this update is for
    pub task_id: String,

    /// New task state
    pub state: TaskState,

    /// State-specific payload
    pub data: StatusData,

    /// Execution metrics (terminal states only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<TaskMetrics>,
}

impl StatusUpdateMessage {
    /// RUNNING update emitted when the search starts
    pub fn running(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            state: TaskState::Running,
            data: StatusData::Message("task running".to_string()),
            metrics: None,
        }
    }

    /// FINISHED update carrying the search result
    pub fn finished(task_id: impl Into<String>, outcome: SearchOutcome, metrics: TaskMetrics) -> Self {
        Self {
            task_id: task_id.into(),
            state: TaskState::Finished,
            data: StatusData::Result(outcome),
            metrics: Some(metrics),
        }
    }

    /// FAILED update with an error description
    pub fn failed(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            state: TaskState::Failed,
            data: StatusData::Message(error.into()),
            metrics: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Framework Messages
// ─────────────────────────────────────────────────────────────────

/// Opaque framework message carried base64-encoded inside the JSON envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkMessageData {
    /// Base64-encoded payload
    pub data: String,
}

impl FrameworkMessageData {
    /// Wrap raw bytes for transport
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Recover the raw bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD.decode(&self.data)
    }
}

// ─────────────────────────────────────────────────────────────────
// Control Messages
// ─────────────────────────────────────────────────────────────────

/// Executor shutdown notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownMessage {
    /// Executor ID
    pub executor_id: String,

    /// Reason for shutdown
    pub reason: String,

    /// Whether this is a graceful shutdown
    pub graceful: bool,

    /// Tasks that were in progress (will need reassignment)
    #[serde(default)]
    pub abandoned_tasks: Vec<String>,
}

/// Error message from the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code
    pub code: String,

    /// Human-readable message
    pub message: String,

    /// Related message ID (if this is in response to a specific message)
    #[serde(default)]
    pub related_message_id: Option<Uuid>,

    /// Whether the error is fatal (connection should be closed)
    #[serde(default)]
    pub fatal: bool,
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
