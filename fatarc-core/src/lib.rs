pub mod error;
pub mod geometry;

pub use error::FatarcError;
pub use geometry::{disk_type, DiskType, Geometry, DISK_TYPES};
