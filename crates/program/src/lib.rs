//! Dataflow programs, kernel cutouts, captured data and execution seams.

pub mod capture;
pub mod cutout;
pub mod executor;
pub mod graph;

pub use capture::*;
pub use cutout::*;
pub use executor::*;
pub use graph::*;
