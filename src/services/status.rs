use serde::Serialize;

use crate::modbus::transport::{ClientEvent, ServiceState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFill {
    Green,
    Yellow,
    Red,
    Blue,
    Grey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusShape {
    Dot,
    Ring,
}

/// Badge the flow editor draws under a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub fill: StatusFill,
    pub shape: StatusShape,
    pub text: String,
}

impl NodeStatus {
    pub fn new(fill: StatusFill, shape: StatusShape, text: impl Into<String>) -> Self {
        Self {
            fill,
            shape,
            text: text.into(),
        }
    }

    pub fn waiting() -> Self {
        Self::new(StatusFill::Blue, StatusShape::Ring, "waiting")
    }

    /// Shown once at activation when status activities are off.
    pub fn default_active() -> Self {
        Self::new(StatusFill::Green, StatusShape::Ring, "active")
    }

    pub fn write_done() -> Self {
        Self::new(StatusFill::Green, StatusShape::Dot, "write done")
    }

    pub fn error(detail: &str) -> Self {
        Self::new(StatusFill::Red, StatusShape::Ring, format!("error: {}", detail))
    }

    pub fn closed() -> Self {
        Self::new(StatusFill::Grey, StatusShape::Ring, "closed")
    }

    pub fn from_service_state(state: ServiceState) -> Self {
        let text = state.to_string().to_lowercase();
        match state {
            ServiceState::Activated | ServiceState::Writing => {
                Self::new(StatusFill::Green, StatusShape::Dot, text)
            }
            ServiceState::Connected => Self::new(StatusFill::Green, StatusShape::Ring, text),
            ServiceState::Init | ServiceState::Connecting | ServiceState::Queueing => {
                Self::new(StatusFill::Yellow, StatusShape::Ring, text)
            }
            ServiceState::Broken | ServiceState::Failed => {
                Self::new(StatusFill::Red, StatusShape::Ring, text)
            }
            ServiceState::Stopped => Self::new(StatusFill::Grey, StatusShape::Ring, text),
        }
    }

    pub fn from_client_event(event: &ClientEvent) -> Self {
        match event {
            ClientEvent::Initialized => Self::new(StatusFill::Yellow, StatusShape::Ring, "initialized"),
            ClientEvent::Connected => Self::new(StatusFill::Green, StatusShape::Ring, "connected"),
            ClientEvent::Active => Self::new(StatusFill::Green, StatusShape::Dot, "active"),
            ClientEvent::Queueing => Self::new(StatusFill::Yellow, StatusShape::Ring, "queueing"),
            ClientEvent::Error(detail) => Self::error(detail),
            ClientEvent::Closed => Self::new(StatusFill::Red, StatusShape::Ring, "disconnected"),
            ClientEvent::Broken => Self::new(StatusFill::Red, StatusShape::Ring, "broken"),
        }
    }
}
