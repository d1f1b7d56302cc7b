pub mod loopback;
pub mod protocol;
pub mod transport;

pub use loopback::{LoopbackTransport, ReplyMode};
pub use protocol::{CorrelationId, FunctionCode, WriteCommand};
pub use transport::{
    ClientEvent, CompletionHandle, EndpointRegistration, ModbusTransport, ServiceState,
    WriteCompletion, WriteIntent,
};
