//! Persistence sink implementations.

mod filesystem;
mod logging;
mod memory;

pub use filesystem::FilesystemSink;
pub use logging::LoggingSink;
pub use memory::{MemorySink, SinkCall};
