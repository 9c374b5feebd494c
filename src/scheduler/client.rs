//! WebSocket client for scheduler communication
//!
//! Provides a robust WebSocket client with:
//! - Automatic reconnection with exponential backoff
//! - Registration handshake and heartbeat management
//! - Best-effort delivery: sends fail silently while disconnected

use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::{backoff::Backoff, ExponentialBackoff};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{
    FrameworkMessageData, HeartbeatRequest, Message, MessageEnvelope, RegisterRequest,
    ShutdownMessage, StatusUpdateMessage, TaskLaunchMessage,
};

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for the scheduler client
#[derive(Debug, Clone)]
pub struct SchedulerClientConfig {
    /// WebSocket URL of the scheduler
    pub url: String,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Maximum reconnection attempts (0 = infinite)
    pub max_reconnect_attempts: u32,

    /// Initial reconnect delay
    pub initial_reconnect_delay: Duration,

    /// Maximum reconnect delay
    pub max_reconnect_delay: Duration,

    /// Heartbeat interval
    pub heartbeat_interval: Duration,

    /// Message queue size
    pub message_queue_size: usize,
}

impl Default for SchedulerClientConfig {
    fn default() -> Self {
        Self {
            url: "wss://scheduler.magellan.network".to_string(),
            connect_timeout: Duration::from_secs(30),
            max_reconnect_attempts: 0, // Infinite
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
            message_queue_size: 100,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Connection State
// ─────────────────────────────────────────────────────────────────

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected
    #[default]
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Connected but not registered
    Connected,
    /// Registered and ready
    Registered,
    /// Connection error, will retry
    Reconnecting,
    /// Shutting down
    ShuttingDown,
}

// ─────────────────────────────────────────────────────────────────
// Heartbeat Stats
// ─────────────────────────────────────────────────────────────────

/// Task counters reported in heartbeats.
///
/// The executor event loop refreshes these from its tracker; the client
/// only reads them when a heartbeat fires.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatStats {
    pub active_tasks: Vec<String>,
    pub finished_task_count: u64,
    pub failed_task_count: u64,
}

// ─────────────────────────────────────────────────────────────────
// Client State
// ─────────────────────────────────────────────────────────────────

/// Internal client state
struct ClientState {
    /// Current connection state
    connection_state: ConnectionState,

    /// Assigned executor ID (after registration)
    executor_id: Option<String>,

    /// Last successful heartbeat time
    last_heartbeat: Option<Instant>,

    /// Reconnection attempt count
    reconnect_attempts: u32,

    /// Connection start time
    connected_at: Option<Instant>,
}

impl Default for ClientState {
    fn default() -> Self {
        Self {
            connection_state: ConnectionState::Disconnected,
            executor_id: None,
            last_heartbeat: None,
            reconnect_attempts: 0,
            connected_at: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Command & Event Channels
// ─────────────────────────────────────────────────────────────────

/// Commands that can be sent to the client
#[derive(Debug)]
pub enum ClientCommand {
    /// Send a raw message to the scheduler
    Send(MessageEnvelope),

    /// Send a per-task status update
    SendStatus(StatusUpdateMessage),

    /// Relay an opaque framework message
    SendFrameworkMessage(FrameworkMessageData),

    /// Initiate graceful shutdown, listing abandoned tasks
    Shutdown { abandoned_tasks: Vec<String> },

    /// Get current connection state
    GetState(oneshot::Sender<ConnectionState>),
}

/// Events emitted by the client
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connected to the scheduler
    Connected,

    /// Disconnected from the scheduler
    Disconnected { reason: String },

    /// Successfully registered
    Registered { executor_id: String },

    /// Received a task launch
    TaskLaunched(TaskLaunchMessage),

    /// Received a task kill request
    TaskKilled { task_id: String, reason: String },

    /// Received an opaque framework message
    FrameworkMessage(FrameworkMessageData),

    /// Error occurred
    Error { message: String, fatal: bool },

    /// Heartbeat acknowledged
    HeartbeatAck,

    /// Reconnecting
    Reconnecting { attempt: u32 },
}

// ─────────────────────────────────────────────────────────────────
// Scheduler Client
// ─────────────────────────────────────────────────────────────────

/// WebSocket client for scheduler communication
pub struct SchedulerClient {
    config: SchedulerClientConfig,
    state: Arc<RwLock<ClientState>>,
    command_tx: mpsc::Sender<ClientCommand>,
    register: RegisterRequest,
    stats: Arc<RwLock<HeartbeatStats>>,
}

impl SchedulerClient {
    /// Create a new scheduler client
    pub fn new(
        config: SchedulerClientConfig,
        register: RegisterRequest,
        stats: Arc<RwLock<HeartbeatStats>>,
    ) -> Self {
        let (command_tx, _command_rx) = mpsc::channel(config.message_queue_size);

        Self {
            config,
            state: Arc::new(RwLock::new(ClientState::default())),
            command_tx,
            register,
            stats,
        }
    }

    /// Start the client and return the event receiver
    pub async fn start(&mut self) -> Result<mpsc::Receiver<ClientEvent>> {
        let (event_tx, event_rx) = mpsc::channel(self.config.message_queue_size);
        let (command_tx, command_rx) = mpsc::channel(self.config.message_queue_size);

        self.command_tx = command_tx;

        // Spawn the connection task
        let config = self.config.clone();
        let state = self.state.clone();
        let register = self.register.clone();
        let stats = self.stats.clone();

        tokio::spawn(async move {
            run_client_loop(config, state, command_rx, event_tx, register, stats).await;
        });

        Ok(event_rx)
    }

    /// Send a command to the client
    pub async fn send_command(&self, command: ClientCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| Error::Connection("Client channel closed".to_string()))
    }

    /// Get current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.state.read().connection_state
    }

    /// Get assigned executor ID
    pub fn executor_id(&self) -> Option<String> {
        self.state.read().executor_id.clone()
    }

    /// Check if connected and registered
    pub fn is_ready(&self) -> bool {
        self.state.read().connection_state == ConnectionState::Registered
    }

    /// Submit a status update
    pub async fn send_status(&self, update: StatusUpdateMessage) -> Result<()> {
        self.send_command(ClientCommand::SendStatus(update)).await
    }

    /// Relay a framework message back to the scheduler
    pub async fn send_framework_message(&self, message: FrameworkMessageData) -> Result<()> {
        self.send_command(ClientCommand::SendFrameworkMessage(message))
            .await
    }

    /// Request graceful shutdown
    pub async fn shutdown(&self, abandoned_tasks: Vec<String>) -> Result<()> {
        self.send_command(ClientCommand::Shutdown { abandoned_tasks })
            .await
    }
}

// ─────────────────────────────────────────────────────────────────
// Client Loop
// ─────────────────────────────────────────────────────────────────

/// Main client loop with reconnection logic
async fn run_client_loop(
    config: SchedulerClientConfig,
    state: Arc<RwLock<ClientState>>,
    mut command_rx: mpsc::Receiver<ClientCommand>,
    event_tx: mpsc::Sender<ClientEvent>,
    register: RegisterRequest,
    stats: Arc<RwLock<HeartbeatStats>>,
) {
    let url = match Url::parse(&config.url) {
        Ok(u) => u,
        Err(e) => {
            error!(url = %config.url, error = %e, "Invalid scheduler URL");
            let _ = event_tx
                .send(ClientEvent::Error {
                    message: format!("Invalid URL: {}", e),
                    fatal: true,
                })
                .await;
            return;
        }
    };

    // Create exponential backoff for reconnection
    let mut backoff = ExponentialBackoff {
        initial_interval: config.initial_reconnect_delay,
        max_interval: config.max_reconnect_delay,
        max_elapsed_time: None, // Retry forever
        ..Default::default()
    };

    loop {
        // Check if we should shutdown
        {
            let s = state.read();
            if s.connection_state == ConnectionState::ShuttingDown {
                info!("Client shutdown requested");
                break;
            }
        }

        // Update state to connecting
        {
            let mut s = state.write();
            s.connection_state = ConnectionState::Connecting;
        }

        info!(url = %url, "Connecting to scheduler");

        // Attempt connection
        match connect_async(url.as_str()).await {
            Ok((ws_stream, _response)) => {
                info!("WebSocket connection established");

                // Reset backoff on successful connection
                backoff.reset();
                {
                    let mut s = state.write();
                    s.connection_state = ConnectionState::Connected;
                    s.connected_at = Some(Instant::now());
                    s.reconnect_attempts = 0;
                }

                let _ = event_tx.send(ClientEvent::Connected).await;

                // Split the WebSocket stream
                let (write, read) = ws_stream.split();

                // Run the connection handler
                let result = handle_connection(
                    &config,
                    &state,
                    &mut command_rx,
                    &event_tx,
                    write,
                    read,
                    &register,
                    &stats,
                )
                .await;

                if let Err(e) = result {
                    warn!(error = %e, "Connection error");
                    let _ = event_tx
                        .send(ClientEvent::Disconnected {
                            reason: e.to_string(),
                        })
                        .await;
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to scheduler");
                let _ = event_tx
                    .send(ClientEvent::Error {
                        message: format!("Connection failed: {}", e),
                        fatal: false,
                    })
                    .await;
            }
        }

        // Update state to reconnecting
        {
            let mut s = state.write();
            if s.connection_state == ConnectionState::ShuttingDown {
                break;
            }
            s.connection_state = ConnectionState::Reconnecting;
            s.reconnect_attempts += 1;
        }

        // Check max reconnect attempts
        let attempts = state.read().reconnect_attempts;
        if config.max_reconnect_attempts > 0 && attempts >= config.max_reconnect_attempts {
            error!(
                attempts = attempts,
                max = config.max_reconnect_attempts,
                "Max reconnection attempts reached"
            );
            let _ = event_tx
                .send(ClientEvent::Error {
                    message: "Max reconnection attempts reached".to_string(),
                    fatal: true,
                })
                .await;
            break;
        }

        // Calculate next retry delay
        let delay = backoff.next_backoff().unwrap_or(config.max_reconnect_delay);

        let _ = event_tx.send(ClientEvent::Reconnecting { attempt: attempts }).await;

        info!(
            delay_secs = delay.as_secs(),
            attempt = attempts,
            "Waiting before reconnection"
        );

        // Wait before reconnecting (also check for shutdown commands)
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            Some(cmd) = command_rx.recv() => {
                if matches!(cmd, ClientCommand::Shutdown { .. }) {
                    let mut s = state.write();
                    s.connection_state = ConnectionState::ShuttingDown;
                    break;
                }
            }
        }
    }

    info!("Client loop terminated");
}

/// Handle an active WebSocket connection
#[allow(clippy::too_many_arguments)]
async fn handle_connection<S, R>(
    config: &SchedulerClientConfig,
    state: &Arc<RwLock<ClientState>>,
    command_rx: &mut mpsc::Receiver<ClientCommand>,
    event_tx: &mpsc::Sender<ClientEvent>,
    mut write: S,
    mut read: R,
    register: &RegisterRequest,
    stats: &Arc<RwLock<HeartbeatStats>>,
) -> Result<()>
where
    S: SinkExt<WsMessage, Error = WsError> + Unpin,
    R: StreamExt<Item = std::result::Result<WsMessage, WsError>> + Unpin,
{
    // Send registration message, echoing any previously assigned id
    let register_msg = Message::Register(RegisterRequest {
        executor_id: state.read().executor_id.clone().or(register.executor_id.clone()),
        ..register.clone()
    });

    send_message(&mut write, register_msg).await?;
    debug!("Sent registration request");

    // Wait for registration acknowledgment
    let registered = wait_for_registration(&mut read, state, event_tx).await?;
    if !registered {
        return Err(Error::RegistrationRejected {
            message: "Registration rejected".to_string(),
        });
    }

    // Start heartbeat timer
    let mut heartbeat_timer = tokio::time::interval(config.heartbeat_interval);
    heartbeat_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    // Main message loop
    loop {
        tokio::select! {
            // Heartbeat tick
            _ = heartbeat_timer.tick() => {
                let executor_id = state.read().executor_id.clone()
                    .unwrap_or_else(|| "unknown".to_string());
                let snapshot = stats.read().clone();

                let heartbeat = Message::Heartbeat(HeartbeatRequest {
                    executor_id,
                    active_tasks: snapshot.active_tasks,
                    finished_task_count: snapshot.finished_task_count,
                    failed_task_count: snapshot.failed_task_count,
                    uptime_secs: state.read().connected_at
                        .map(|t| t.elapsed().as_secs())
                        .unwrap_or(0),
                });

                if let Err(e) = send_message(&mut write, heartbeat).await {
                    warn!(error = %e, "Failed to send heartbeat");
                    return Err(e);
                }
                debug!("Sent heartbeat");
            }

            // Incoming message from the scheduler
            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        match MessageEnvelope::from_json(&text) {
                            Ok(envelope) => {
                                handle_incoming_message(envelope, state, event_tx).await?;
                            }
                            Err(e) => {
                                warn!(error = %e, "Failed to parse message");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        match MessageEnvelope::from_json_bytes(&data) {
                            Ok(envelope) => {
                                handle_incoming_message(envelope, state, event_tx).await?;
                            }
                            Err(e) => {
                                warn!(error = %e, "Failed to parse binary message");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        write.send(WsMessage::Pong(data)).await?;
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        // Ignore pong
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(frame = ?frame, "Received close frame");
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        return Err(Error::Connection(e.to_string()));
                    }
                    None => {
                        info!("WebSocket stream ended");
                        return Ok(());
                    }
                    _ => {}
                }
            }

            // Command from the executor
            cmd = command_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Send(envelope)) => {
                        let json = envelope.to_json()
                            .map_err(|e| Error::Protocol(e.to_string()))?;
                        write.send(WsMessage::Text(json)).await?;
                    }
                    Some(ClientCommand::SendStatus(update)) => {
                        send_message(&mut write, Message::StatusUpdate(update)).await?;
                    }
                    Some(ClientCommand::SendFrameworkMessage(message)) => {
                        send_message(&mut write, Message::FrameworkMessage(message)).await?;
                    }
                    Some(ClientCommand::Shutdown { abandoned_tasks }) => {
                        info!("Shutdown command received");
                        let executor_id = state.read().executor_id.clone()
                            .unwrap_or_else(|| "unknown".to_string());

                        let shutdown_msg = Message::Shutdown(ShutdownMessage {
                            executor_id,
                            reason: "Graceful shutdown".to_string(),
                            graceful: true,
                            abandoned_tasks,
                        });
                        let _ = send_message(&mut write, shutdown_msg).await;

                        // Send close frame
                        let _ = write.send(WsMessage::Close(None)).await;
                        state.write().connection_state = ConnectionState::ShuttingDown;
                        return Ok(());
                    }
                    Some(ClientCommand::GetState(tx)) => {
                        let _ = tx.send(state.read().connection_state);
                    }
                    None => {
                        info!("Command channel closed");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Send a protocol message
async fn send_message<S>(write: &mut S, msg: Message) -> Result<()>
where
    S: SinkExt<WsMessage, Error = WsError> + Unpin,
{
    let envelope = MessageEnvelope::new(msg);
    let json = envelope.to_json().map_err(|e| Error::Protocol(e.to_string()))?;
    write
        .send(WsMessage::Text(json))
        .await
        .map_err(|e| Error::Connection(e.to_string()))
}

/// Wait for registration acknowledgment
async fn wait_for_registration<R>(
    read: &mut R,
    state: &Arc<RwLock<ClientState>>,
    event_tx: &mpsc::Sender<ClientEvent>,
) -> Result<bool>
where
    R: StreamExt<Item = std::result::Result<WsMessage, WsError>> + Unpin,
{
    // Wait for registration response (with timeout)
    let timeout = tokio::time::timeout(Duration::from_secs(30), async {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => {
                    if let Ok(envelope) = MessageEnvelope::from_json(&text) {
                        if let Message::RegisterAck(ack) = envelope.payload {
                            return Ok(ack);
                        }
                        if let Message::Error(err) = envelope.payload {
                            return Err(Error::RegistrationRejected {
                                message: err.message,
                            });
                        }
                    }
                }
                Ok(WsMessage::Close(_)) => {
                    return Err(Error::Connection(
                        "Connection closed during registration".to_string(),
                    ));
                }
                Err(e) => {
                    return Err(Error::Connection(e.to_string()));
                }
                _ => {}
            }
        }
        Err(Error::Connection("Stream ended during registration".to_string()))
    });

    let ack = timeout
        .await
        .map_err(|_| Error::ConnectionTimeout {
            url: "scheduler".to_string(),
            timeout_secs: 30,
        })??;

    if ack.success {
        // Update state within a scope to ensure the guard is dropped
        // before the await
        let executor_id = {
            let mut s = state.write();
            s.executor_id = Some(ack.executor_id.clone());
            s.connection_state = ConnectionState::Registered;
            ack.executor_id.clone()
        };

        info!(executor_id = %executor_id, "Registration successful");
        let _ = event_tx.send(ClientEvent::Registered { executor_id }).await;

        Ok(true)
    } else {
        let error_msg = ack.error.unwrap_or_else(|| "Unknown error".to_string());
        error!(error = %error_msg, "Registration failed");
        let _ = event_tx
            .send(ClientEvent::Error {
                message: error_msg,
                fatal: true,
            })
            .await;

        Ok(false)
    }
}

/// Handle an incoming message from the scheduler
async fn handle_incoming_message(
    envelope: MessageEnvelope,
    state: &Arc<RwLock<ClientState>>,
    event_tx: &mpsc::Sender<ClientEvent>,
) -> Result<()> {
    debug!(message_type = %envelope.payload.type_name(), "Received message");

    match envelope.payload {
        Message::HeartbeatAck(_ack) => {
            state.write().last_heartbeat = Some(Instant::now());
            let _ = event_tx.send(ClientEvent::HeartbeatAck).await;
        }

        Message::LaunchTask(launch) => {
            info!(task_id = %launch.task_id, "Received task launch");
            let _ = event_tx.send(ClientEvent::TaskLaunched(launch)).await;
        }

        Message::KillTask(kill) => {
            info!(task_id = %kill.task_id, reason = %kill.reason, "Received task kill");
            let _ = event_tx
                .send(ClientEvent::TaskKilled {
                    task_id: kill.task_id,
                    reason: kill.reason,
                })
                .await;
        }

        Message::FrameworkMessage(message) => {
            debug!("Received framework message");
            let _ = event_tx.send(ClientEvent::FrameworkMessage(message)).await;
        }

        Message::Error(err) => {
            error!(code = %err.code, message = %err.message, fatal = err.fatal, "Received error");
            let _ = event_tx
                .send(ClientEvent::Error {
                    message: err.message,
                    fatal: err.fatal,
                })
                .await;
        }

        _ => {
            debug!(message_type = %envelope.payload.type_name(), "Unhandled message type");
        }
    }

    Ok(())
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
