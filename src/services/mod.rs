pub mod builder;
pub mod correlator;
pub mod dispatcher;
pub mod status;
pub mod write_node;

pub use builder::WriteRequestBuilder;
pub use correlator::{PendingWrite, RequestCorrelator};
pub use dispatcher::{build_outward_message, CompletionDispatcher, Resolution};
pub use status::{NodeStatus, StatusFill, StatusShape};
pub use write_node::{resolve_transport, ModbusWriteNode};
