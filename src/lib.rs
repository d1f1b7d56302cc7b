//! Modbus Write Node Library
//!
//! A flow-runtime endpoint that turns inbound messages into Modbus write
//! requests, hands them to a shared transport and matches each asynchronous
//! completion back to the message that caused it. Successful writes go
//! downstream as enriched messages, failures are reported to the host with
//! the caller's original message attached.

pub mod cli;
pub mod config;
pub mod flow;
pub mod modbus;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::{DataType, NodeConfig, WriteNodeSettings};
pub use flow::{ErrorReport, FlowHost, FlowMessage, WriteValue};
pub use modbus::{CorrelationId, FunctionCode, LoopbackTransport, ModbusTransport, WriteCommand};
pub use services::{ModbusWriteNode, NodeStatus, RequestCorrelator, Resolution};
pub use utils::error::WriteError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
