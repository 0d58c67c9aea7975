// Risk management module
pub mod sizing;

pub use sizing::{position_size, SizingParams};
