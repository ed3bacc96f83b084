//! Same-resolution block merge: planner and executor.
//!
//! The planner ([`plan`]) groups adjacent blocks into merge segments; the
//! executor ([`execute`]) k-way merges a segment's sorted keys into a
//! single new block, preferring earlier non-NaN values on overlap, then
//! unlinks the source blocks and their sidecars.

pub mod execute;
pub mod plan;

pub use execute::{MergeError, execute};
pub use plan::plan as plan_merge;
