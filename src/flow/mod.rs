pub mod host;
pub mod message;

pub use host::{ErrorReport, FlowHost, RecordingHost};
pub use message::{normalize_http_payload, FlowMessage, PayloadShape, WriteValue};
