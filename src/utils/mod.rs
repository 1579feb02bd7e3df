//! Small, dependency-free helpers shared by the PE model, the export codec and the
//! bundle patcher.
//!
//! - [`math`] - alignment rounding and checked integer narrowing
//! - [`search`] - exact byte pattern search over image buffers

pub mod math;
pub mod search;

pub use math::{round_up_to_alignment, to_u32};
pub use search::{find_pattern, KmpPattern};
