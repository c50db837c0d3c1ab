//! Storage layer.
//!
//! This module provides the write-behind pipeline:
//! - **Primary**: concurrent in-memory map, the source of truth for reads
//! - **Queue**: lock-free FIFO of pending persistence work
//! - **Persistence**: sinks the flush scheduler hands batches to
//!
//! [`WriteBehindStore`] composes them with the event bus.

pub mod persistence;
mod primary;
mod queue;
pub mod traits;
mod write_behind;

pub use persistence::{FilesystemSink, LoggingSink, MemorySink, SinkCall};
pub use primary::{PrimaryStore, Snapshot};
pub use queue::WriteBehindQueue;
pub use traits::PersistenceSink;
pub use write_behind::WriteBehindStore;
