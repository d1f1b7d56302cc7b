use log::debug;

use crate::config::settings::{DataType, WriteNodeSettings};
use crate::flow::message::{normalize_http_payload, FlowMessage, WriteValue};
use crate::modbus::protocol::{CorrelationId, FunctionCode, WriteCommand};
use crate::services::correlator::RequestCorrelator;
use crate::utils::error::WriteError;

/// Turns inbound flow messages into write commands and parks their
/// context in the correlator.
#[derive(Debug, Clone)]
pub struct WriteRequestBuilder {
    node_id: String,
    unit_id: u8,
    data_type: DataType,
    address: u16,
    quantity: u16,
}

impl WriteRequestBuilder {
    pub fn from_settings(settings: &WriteNodeSettings) -> Self {
        Self {
            node_id: settings.id.clone(),
            unit_id: settings.unit_id,
            data_type: settings.data_type.clone(),
            address: settings.address,
            quantity: settings.quantity,
        }
    }

    /// Builds the command for `message`.
    ///
    /// On success exactly one entry was added to `correlator`. On failure
    /// the correlator is left as it was.
    pub fn build(
        &self,
        correlator: &mut RequestCorrelator,
        message: &FlowMessage,
    ) -> Result<WriteCommand, WriteError> {
        let normalized = normalize_http_payload(message)?;
        let correlation_id = CorrelationId::generate();
        correlator.put(correlation_id, normalized.clone())?;

        match self.command_for(correlation_id, &normalized) {
            Ok(command) => {
                debug!(
                    "📝 Built {} for unit {} @ {} [{}]",
                    command.function_code, command.unit_id, command.address, correlation_id
                );
                Ok(command)
            }
            Err(err) => {
                correlator.take(&correlation_id);
                Err(err)
            }
        }
    }

    fn command_for(
        &self,
        correlation_id: CorrelationId,
        normalized: &FlowMessage,
    ) -> Result<WriteCommand, WriteError> {
        let payload = normalized
            .payload
            .as_ref()
            .ok_or_else(|| WriteError::InvalidPayload("message has no payload".to_string()))?;

        Ok(WriteCommand {
            topic: normalized
                .topic
                .clone()
                .unwrap_or_else(|| self.node_id.clone()),
            unit_id: self.unit_id,
            function_code: FunctionCode::for_data_type(&self.data_type)?,
            address: self.address,
            quantity: self.quantity,
            value: WriteValue::from_payload(payload),
            correlation_id,
            message_id: normalized.message_id.clone(),
        })
    }
}
