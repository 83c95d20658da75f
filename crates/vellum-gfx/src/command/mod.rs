//! The command stream and its batching queue.
//!
//! Flow:
//! - the producer enqueues [`Command`]s; adjacent compatible draws merge
//! - a flush replays the buffer in order through the state cache
//! - the first failure poisons the queue until it is reset

mod cmd;
pub(crate) mod exec;
mod merge;
mod queue;

pub use cmd::{Command, DrawTriangles, Sources, SOURCE_SLOTS};
pub use queue::{CommandQueue, Executor, FlushStats, QueueConfig};
