//! CLI command implementations

pub mod checkpoint;
pub mod error;
pub mod run;
pub mod streams;

pub use checkpoint::CheckpointCommand;
pub use error::CliError;
pub use run::{Cli, Commands, RunArgs};
pub use streams::StreamsCommand;
