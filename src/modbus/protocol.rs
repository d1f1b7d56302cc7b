use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};
use std::fmt;
use uuid::Uuid;

use crate::config::settings::DataType;
use crate::flow::message::{FlowMessage, WriteValue};
use crate::utils::error::WriteError;

/// Token binding one write request to its single completion.
///
/// Generated from a v4 UUID, so ids never collide while in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Modbus write function codes reachable from a configured data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    WriteSingleCoil = 5,
    WriteSingleRegister = 6,
    WriteMultipleCoils = 15,
    WriteMultipleRegisters = 16,
}

impl FunctionCode {
    pub fn for_data_type(data_type: &DataType) -> Result<Self, WriteError> {
        match data_type {
            DataType::Coil => Ok(FunctionCode::WriteSingleCoil),
            DataType::HoldingRegister => Ok(FunctionCode::WriteSingleRegister),
            DataType::MCoils => Ok(FunctionCode::WriteMultipleCoils),
            DataType::MHoldingRegisters => Ok(FunctionCode::WriteMultipleRegisters),
            DataType::Unknown(name) => Err(WriteError::UnsupportedDataType(name.clone())),
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_multiple(self) -> bool {
        matches!(
            self,
            FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters
        )
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionCode::WriteSingleCoil => write!(f, "FC5 (write single coil)"),
            FunctionCode::WriteSingleRegister => write!(f, "FC6 (write single register)"),
            FunctionCode::WriteMultipleCoils => write!(f, "FC15 (write multiple coils)"),
            FunctionCode::WriteMultipleRegisters => write!(f, "FC16 (write multiple registers)"),
        }
    }
}

impl Serialize for FunctionCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Transport-ready write request. Targeting comes from node configuration,
/// only `topic`, `value` and `message_id` originate in the inbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteCommand {
    pub topic: String,
    pub unit_id: u8,
    pub function_code: FunctionCode,
    pub address: u16,
    pub quantity: u16,
    pub value: WriteValue,
    pub correlation_id: CorrelationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Value>,
}

impl WriteCommand {
    /// The flow-message form handed to the transport: targeting and value in
    /// the payload, correlation id under `payload.messageId`.
    pub fn to_message(&self) -> FlowMessage {
        let mut payload = json!({
            "value": self.value,
            "unitid": self.unit_id,
            "fc": self.function_code.code(),
            "address": self.address,
            "quantity": self.quantity,
            "messageId": self.correlation_id.to_string(),
        });
        if let (Some(caller_id), Some(map)) = (&self.message_id, payload.as_object_mut()) {
            map.insert("callerMessageId".to_string(), caller_id.clone());
        }

        FlowMessage {
            topic: Some(self.topic.clone()),
            payload: Some(payload),
            ..FlowMessage::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_code_table() {
        assert_eq!(FunctionCode::for_data_type(&DataType::Coil).unwrap().code(), 5);
        assert_eq!(FunctionCode::for_data_type(&DataType::HoldingRegister).unwrap().code(), 6);
        assert_eq!(FunctionCode::for_data_type(&DataType::MCoils).unwrap().code(), 15);
        assert_eq!(FunctionCode::for_data_type(&DataType::MHoldingRegisters).unwrap().code(), 16);
    }

    #[test]
    fn test_unknown_data_type_is_an_error() {
        let result = FunctionCode::for_data_type(&DataType::Unknown("InputRegister".to_string()));
        assert_eq!(
            result,
            Err(WriteError::UnsupportedDataType("InputRegister".to_string()))
        );
    }

    #[test]
    fn test_command_message_carries_correlation_id() {
        let command = WriteCommand {
            topic: "pump/start".to_string(),
            unit_id: 1,
            function_code: FunctionCode::WriteSingleCoil,
            address: 10,
            quantity: 1,
            value: WriteValue::Bool(true),
            correlation_id: CorrelationId::generate(),
            message_id: None,
        };

        let message = command.to_message();
        let payload = message.payload.unwrap();
        assert_eq!(payload["fc"], 5);
        assert_eq!(payload["value"], true);
        assert_eq!(payload["messageId"], command.correlation_id.to_string());
        assert!(payload.get("callerMessageId").is_none());
        assert_eq!(message.topic.as_deref(), Some("pump/start"));
    }

    #[test]
    fn test_command_serializes_numeric_function_code() {
        let command = WriteCommand {
            topic: "t".to_string(),
            unit_id: 3,
            function_code: FunctionCode::WriteMultipleRegisters,
            address: 0,
            quantity: 2,
            value: WriteValue::List(vec![json!(1), json!(2)]),
            correlation_id: CorrelationId::generate(),
            message_id: Some(json!("abc")),
        };

        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(value["functionCode"], 16);
        assert_eq!(value["unitId"], 3);
        assert_eq!(value["messageId"], "abc");
        assert_eq!(value["value"], json!([1, 2]));
    }
}
