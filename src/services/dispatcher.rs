use chrono::Utc;
use log::{debug, error, info};
use serde_json::{Map, Value};

use crate::config::settings::WriteNodeSettings;
use crate::flow::host::{ErrorReport, FlowHost};
use crate::flow::message::FlowMessage;
use crate::modbus::protocol::WriteCommand;
use crate::modbus::transport::WriteCompletion;
use crate::services::correlator::RequestCorrelator;
use crate::services::status::NodeStatus;
use crate::utils::error::WriteError;

/// What became of a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Delivered,
    Failed,
    /// No pending entry for the id: stale, duplicate, or issued before teardown.
    Unmatched,
}

/// Resolves transport completions against the correlator and talks to the host.
#[derive(Debug, Clone)]
pub struct CompletionDispatcher {
    node_id: String,
    node_name: String,
    transport_name: String,
    show_status_activities: bool,
    show_errors: bool,
    empty_msg_on_fail: bool,
}

impl CompletionDispatcher {
    pub fn new(settings: &WriteNodeSettings, transport_name: &str) -> Self {
        Self {
            node_id: settings.id.clone(),
            node_name: settings.label().to_string(),
            transport_name: transport_name.to_string(),
            show_status_activities: settings.show_status_activities,
            show_errors: settings.show_errors,
            empty_msg_on_fail: settings.empty_msg_on_fail,
        }
    }

    pub fn dispatch(
        &self,
        correlator: &mut RequestCorrelator,
        host: &dyn FlowHost,
        completion: WriteCompletion,
    ) -> Resolution {
        match completion {
            WriteCompletion::Done { response, message } => {
                self.on_write_done(correlator, host, response, &message)
            }
            WriteCompletion::Failed { error, message } => {
                self.on_write_error(correlator, host, &error, &message)
            }
        }
    }

    pub fn on_write_done(
        &self,
        correlator: &mut RequestCorrelator,
        host: &dyn FlowHost,
        response: Value,
        message: &WriteCommand,
    ) -> Resolution {
        let Some(original) = correlator.take(&message.correlation_id) else {
            correlator.forget_expired(&message.correlation_id);
            debug!("📭 No pending write for {}, completion ignored", message.correlation_id);
            return Resolution::Unmatched;
        };

        if self.show_status_activities {
            host.set_status(&self.node_id, &NodeStatus::write_done());
        }

        info!("✅ Write {} done on '{}'", message.correlation_id, self.transport_name);
        host.send(&self.node_id, build_outward_message(original, &response, message));
        Resolution::Delivered
    }

    /// Failure reported by the transport. The pending entry is resolved
    /// first so every report carries the caller's own message. A write that
    /// already timed out was reported then and stays silent here.
    pub fn on_write_error(
        &self,
        correlator: &mut RequestCorrelator,
        host: &dyn FlowHost,
        err: &WriteError,
        message: &WriteCommand,
    ) -> Resolution {
        let (original, resolution) = match correlator.take(&message.correlation_id) {
            Some(original) => (original, Resolution::Failed),
            None if correlator.forget_expired(&message.correlation_id) => {
                debug!("⏱️  Write {} already timed out, failure ignored: {}", message.correlation_id, err);
                return Resolution::Unmatched;
            }
            None => (message.to_message(), Resolution::Unmatched),
        };

        self.fail_with(host, err, &original);
        resolution
    }

    /// Reports a failure for a message already taken out of the correlator.
    pub fn fail_with(&self, host: &dyn FlowHost, err: &WriteError, original: &FlowMessage) {
        self.error_protocol_msg(host, err, original);

        if self.show_status_activities {
            host.set_status(&self.node_id, &NodeStatus::error(&err.to_string()));
        }

        host.report_error(ErrorReport {
            node_id: self.node_id.clone(),
            node_name: self.node_name.clone(),
            transport: self.transport_name.clone(),
            error: err.to_string(),
            message: original.clone(),
            timestamp: Utc::now(),
        });
    }

    /// The request never reached the transport. Status is left as it was.
    pub fn on_build_error(&self, host: &dyn FlowHost, err: &WriteError, original: &FlowMessage) {
        self.error_protocol_msg(host, err, original);
    }

    fn error_protocol_msg(&self, host: &dyn FlowHost, err: &WriteError, original: &FlowMessage) {
        error!("❌ Write failed on node '{}': {}", self.node_name, err);

        if self.show_errors {
            host.log_error(&self.node_id, err, original);
        }

        if self.empty_msg_on_fail {
            let mut placeholder = original.clone();
            placeholder.payload = Some(Value::String(String::new()));
            host.send(&self.node_id, placeholder);
        }
    }
}

/// Outward message for a successful write: the caller's message with the
/// transport response merged into its payload and the command under `input`.
pub fn build_outward_message(
    original: FlowMessage,
    response: &Value,
    command: &WriteCommand,
) -> FlowMessage {
    let FlowMessage {
        topic,
        payload,
        message_id,
        mut extra,
    } = original;

    let mut merged = match payload {
        Some(Value::Object(map)) => map,
        Some(other) => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
        None => Map::new(),
    };

    match response {
        Value::Object(fields) => {
            merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Value::Null => {}
        other => {
            merged.insert("response".to_string(), other.clone());
        }
    }

    extra.insert("input".to_string(), command.to_message().to_json());

    FlowMessage {
        topic: Some(topic.unwrap_or_else(|| command.topic.clone())),
        payload: Some(Value::Object(merged)),
        message_id,
        extra,
    }
}
