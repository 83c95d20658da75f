//! Producer-facing contract.
//!
//! [`Graphics`] owns the device (through its state cache), every image and
//! shader, and the command queue. Producers only hold `ImageId`/`ShaderId`
//! handles; GPU objects are created and destroyed during flushes.

mod graphics;

pub use graphics::Graphics;
pub use crate::command::{FlushStats, QueueConfig};
