//! Measurement-driven search for the fastest array layouts of a kernel.
//!
//! ```text
//! Program ─▶ kernels() ─▶ cutout ─▶ group() ─▶ LayoutSpace ─▶ apply ─▶ measure ─▶ ReportStore
//! ```
//!
//! - [`groups`]: partition arrays into [`TuningGroup`]s under a [`GroupPolicy`]
//! - [`space`]: enumerate every joint permutation choice as a [`Configuration`]
//! - [`measure`]: run an executor a fixed number of times and aggregate
//! - [`cache`]: per-kernel [`LayoutReport`] stores (file or memory)
//! - [`tuner`]: the [`LayoutTuner`] sweep loop

pub mod cache;
pub mod error;
pub mod groups;
pub mod measure;
pub mod signature;
pub mod space;
pub mod tuner;

pub use cache::*;
pub use error::TuneError;
pub use groups::*;
pub use measure::*;
pub use signature::*;
pub use space::*;
pub use tuner::*;
