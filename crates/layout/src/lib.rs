//! Array descriptors, dimension permutations, and physical relayout.

pub mod descriptor;
pub mod permutation;
pub mod relayout;

pub use descriptor::*;
pub use permutation::*;
pub use relayout::*;
