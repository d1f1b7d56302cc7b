pub mod settings;

pub use settings::{DataType, LoopbackSettings, NodeConfig, WriteNodeSettings};
