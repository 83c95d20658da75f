//! Redundant-call elimination in front of a [`Device`].

mod cache;

pub use cache::{Framebuffer, StateCache};
