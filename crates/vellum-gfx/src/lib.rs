//! Vellum graphics command layer.
//!
//! This crate sits between a sprite/scene layer and a stateful GPU API:
//! - records draw and pixel-transfer commands into a queue
//! - merges adjacent compatible draws so state changes stay rare
//! - replays the queue against a [`device::Device`] through a [`state::StateCache`]
//!   that never issues a redundant bind
//!
//! The entry point for producers is [`core::Graphics`].

pub mod command;
pub mod coords;
pub mod core;
pub mod device;
pub mod image;
pub mod logging;
pub mod paint;
pub mod shader;
pub mod state;

mod error;

pub use error::{Error, ErrorKind, Result};
