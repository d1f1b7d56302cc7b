use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use std::sync::Mutex;

use super::message::FlowMessage;
use crate::services::status::NodeStatus;
use crate::utils::error::WriteError;

/// Capabilities the flow runtime offers a node.
pub trait FlowHost: Send + Sync {
    /// Delivers a message to the downstream nodes.
    fn send(&self, node_id: &str, message: FlowMessage);

    /// Per-message error shown in the runtime's debug sidebar.
    fn log_error(&self, node_id: &str, error: &WriteError, message: &FlowMessage);

    /// Structured report for the runtime's central error channel.
    fn report_error(&self, report: ErrorReport);

    fn set_status(&self, node_id: &str, status: &NodeStatus);

    /// Teardown finished.
    fn closed(&self, node_id: &str);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub node_id: String,
    pub node_name: String,
    pub transport: String,
    pub error: String,
    pub message: FlowMessage,
    pub timestamp: DateTime<Utc>,
}

/// Host that keeps everything it is handed, for tests and dry runs.
#[derive(Default)]
pub struct RecordingHost {
    sent: Mutex<Vec<FlowMessage>>,
    logged: Mutex<Vec<(String, FlowMessage)>>,
    reports: Mutex<Vec<ErrorReport>>,
    statuses: Mutex<Vec<NodeStatus>>,
    closed: Mutex<Vec<String>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<FlowMessage> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn logged_errors(&self) -> Vec<(String, FlowMessage)> {
        self.logged.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn statuses(&self) -> Vec<NodeStatus> {
        self.statuses.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn last_status(&self) -> Option<NodeStatus> {
        self.statuses().pop()
    }

    pub fn closed_nodes(&self) -> Vec<String> {
        self.closed.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl FlowHost for RecordingHost {
    fn send(&self, _node_id: &str, message: FlowMessage) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message);
        }
    }

    fn log_error(&self, _node_id: &str, error: &WriteError, message: &FlowMessage) {
        if let Ok(mut logged) = self.logged.lock() {
            logged.push((error.to_string(), message.clone()));
        }
    }

    fn report_error(&self, report: ErrorReport) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report);
        }
    }

    fn set_status(&self, _node_id: &str, status: &NodeStatus) {
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.push(status.clone());
        }
    }

    fn closed(&self, node_id: &str) {
        info!("🔒 [RECORDING HOST] Node {} closed", node_id);
        if let Ok(mut closed) = self.closed.lock() {
            closed.push(node_id.to_string());
        }
    }
}
