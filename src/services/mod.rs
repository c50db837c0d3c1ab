//! Store services.
//!
//! Services wrap the generic write-behind store with the chat and vector
//! variants, and run the background flush.

mod chat;
mod flush;
mod session;
pub mod similarity;
mod vector;

pub use chat::{ChatSession, ChatSessionHandler, ChatStore};
pub use flush::{FlushHandle, FlushReport, FlushScheduler, FlushState};
pub use session::SessionCounterRegistry;
pub use similarity::{MismatchPolicy, cosine_similarity, search};
pub use vector::VectorStore;
