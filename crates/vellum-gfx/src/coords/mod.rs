//! Geometry types shared by commands and devices.
//!
//! Pixel space:
//! - origin at the first row of an image's pixel buffer
//! - +X right, +Y toward later rows
//! - source coordinates are texels, not normalized UVs

mod projection;
mod region;
mod vertex;

pub use projection::projection;
pub use region::Region;
pub use vertex::{quad, Vertex, QUAD_INDICES};
