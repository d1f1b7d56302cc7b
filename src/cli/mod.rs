pub mod commands;

pub use commands::{handle_subcommands, StdoutHost};
