use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

use super::protocol::{CorrelationId, WriteCommand};
use crate::utils::error::WriteError;

/// Shared Modbus client as seen from a write node.
///
/// Implementations own the physical link, framing and on-wire ordering.
/// Every intent handed to [`ModbusTransport::emit_write`] must be resolved
/// exactly once through its [`CompletionHandle`].
#[async_trait]
pub trait ModbusTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Polled before every write attempt.
    fn has_active_client(&self) -> bool;

    fn actual_service_state(&self) -> ServiceState;

    fn register(&self, registration: EndpointRegistration) -> Result<(), WriteError>;

    /// Resolves once the transport has forgotten the endpoint.
    async fn deregister(&self, endpoint_id: &str) -> Result<(), WriteError>;

    fn emit_write(&self, intent: WriteIntent);
}

/// What an endpoint hands over when it registers.
pub struct EndpointRegistration {
    pub endpoint_id: String,
    pub events: mpsc::UnboundedSender<ClientEvent>,
}

/// Connectivity changes the transport broadcasts to registered endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Initialized,
    Connected,
    Active,
    Queueing,
    Error(String),
    Closed,
    Broken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceState {
    Init,
    Connecting,
    Connected,
    Activated,
    Queueing,
    Writing,
    Broken,
    Failed,
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Init => write!(f, "INIT"),
            ServiceState::Connecting => write!(f, "CONNECTING"),
            ServiceState::Connected => write!(f, "CONNECTED"),
            ServiceState::Activated => write!(f, "ACTIVATED"),
            ServiceState::Queueing => write!(f, "QUEUEING"),
            ServiceState::Writing => write!(f, "WRITING"),
            ServiceState::Broken => write!(f, "BROKEN"),
            ServiceState::Failed => write!(f, "FAILED"),
            ServiceState::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Outcome of one write, delivered back to the issuing endpoint.
///
/// `message` is the command as the transport saw it; its correlation id is
/// the one the endpoint generated.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteCompletion {
    Done { response: Value, message: WriteCommand },
    Failed { error: WriteError, message: WriteCommand },
}

impl WriteCompletion {
    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            WriteCompletion::Done { message, .. } | WriteCompletion::Failed { message, .. } => {
                message.correlation_id
            }
        }
    }
}

/// A write request plus the means to answer it.
pub struct WriteIntent {
    pub command: WriteCommand,
    pub completion: CompletionHandle,
}

impl WriteIntent {
    pub fn new(command: WriteCommand, replies: mpsc::UnboundedSender<WriteCompletion>) -> Self {
        let completion = CompletionHandle {
            replies,
            command: Some(command.clone()),
        };
        Self { command, completion }
    }
}

/// One-shot answer channel for a [`WriteIntent`].
///
/// Resolving consumes the handle, so a write cannot be answered twice. A
/// handle dropped unresolved fails the write with [`WriteError::Abandoned`].
pub struct CompletionHandle {
    replies: mpsc::UnboundedSender<WriteCompletion>,
    command: Option<WriteCommand>,
}

impl CompletionHandle {
    pub fn succeed(mut self, response: Value, message: WriteCommand) {
        self.command = None;
        self.deliver(WriteCompletion::Done { response, message });
    }

    pub fn fail(mut self, error: WriteError, message: WriteCommand) {
        self.command = None;
        self.deliver(WriteCompletion::Failed { error, message });
    }

    fn deliver(&self, completion: WriteCompletion) {
        let id = completion.correlation_id();
        if self.replies.send(completion).is_err() {
            debug!("📭 Endpoint gone, completion for {} discarded", id);
        }
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        if let Some(command) = self.command.take() {
            warn!("⚠️  Write {} dropped by transport without completion", command.correlation_id);
            self.deliver(WriteCompletion::Failed {
                error: WriteError::Abandoned(command.correlation_id),
                message: command,
            });
        }
    }
}
