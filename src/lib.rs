//! # lloyd
//!
//! Data-parallel kernels for Lloyd's K-Means on an accelerator-style
//! execution model.
//!
//! One Lloyd iteration runs these operations on caller-owned buffers:
//!
//! ```text
//! half_norm_squared ─► assignment ─► accumulate_shards ─► reduce_stats
//!                                                            │
//!                 ┌── n_empty_clusters > 0 ──────────────────┤
//!                 ▼                                          ▼
//!     repair_empty_clusters ───────────────────────► broadcast_divide ─► centroid_shift
//!     (order_statistic_threshold
//!      ─► select_far_samples
//!      ─► relocate_empty_clusters)
//! ```
//!
//! The driver (initialization, stopping rule, buffer allocation) stays with
//! the caller. Every operation validates its arguments synchronously and
//! returns `Err` without queueing anything on a contract violation;
//! otherwise it queues the kernel and returns a [`KernelLaunch`] right away.
//! Faults during execution are reported by [`Event::wait`] on the launch's
//! `compute` event.
//!
//! Data buffers are `f32` or `f64`, index buffers `i32` or `i64`; the two
//! widths are chosen independently per call.
//!
//! ## Layout
//!
//! Matrices are stored transposed, features first: samples are
//! `features x samples`, centroids `features x clusters`. All buffers must be
//! C-contiguous.
//!
//! ## Features
//!
//! - `parallel` (default): compute groups run on the rayon pool. Without it
//!   every group runs on the queue's worker thread, with identical results.

pub mod config;
pub mod device;
pub mod element;
/// Error types used across `lloyd`.
pub mod error;
mod kernels;
pub mod ops;

#[cfg(test)]
mod test_support;

pub use config::{DeviceLimits, WindowConfig};
pub use device::{Context, DeviceBuffer, DeviceFault, Event, EventStatus, KernelLaunch, Queue};
pub use element::{DataElement, Element, ElementType, IndexElement};
pub use error::{Error, Result};
pub use ops::{
    accumulate_shards, assignment, broadcast_divide, centroid_shift, distance_matrix,
    half_norm_squared, order_statistic_threshold, reduce_stats, relocate_empty_clusters,
    repair_empty_clusters, select_far_samples, ReductionBuffers, RelocationBuffers,
    SelectionBuffers, SelectionScratch, ShardBuffers,
};
