//! Cross-resolution downsampling: planner and aggregating executor.
//!
//! Segments of same-resolution blocks are folded into windows of the
//! target resolution, using the per-name aggregation method resolved
//! from [`crate::agg::AggRules`].

pub mod execute;
pub mod plan;

pub use execute::{DownsampleError, execute};
pub use plan::{Segment, plan};
