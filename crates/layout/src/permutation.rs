//! Dimension permutations and the stride-from-layout rule.

use anyhow::{ensure, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A physical dimension order for an array of rank `len()`.
///
/// Entry `i` is the physical position of logical dimension `i`: position 0 is
/// the outermost (largest stride), position `rank - 1` the innermost.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct Permutation(Vec<usize>);

impl Permutation {
    pub fn new(order: Vec<usize>) -> Result<Self> {
        let mut seen = vec![false; order.len()];
        for &position in &order {
            ensure!(
                position < order.len() && !seen[position],
                "{:?} is not a permutation of 0..{}",
                order,
                order.len()
            );
            seen[position] = true;
        }
        Ok(Self(order))
    }

    pub fn identity(rank: usize) -> Self {
        Self((0..rank).collect())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// Every permutation of `0..rank` in lexicographic order.
    pub fn all(rank: usize) -> Vec<Self> {
        (0..rank).permutations(rank).map(Self).collect()
    }
}

impl TryFrom<Vec<usize>> for Permutation {
    type Error = anyhow::Error;

    fn try_from(order: Vec<usize>) -> Result<Self> {
        Self::new(order)
    }
}

impl From<Permutation> for Vec<usize> {
    fn from(value: Permutation) -> Self {
        value.0
    }
}

impl fmt::Display for Permutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, pos) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{pos}")?;
        }
        write!(f, ")")
    }
}

/// Row-major element strides for `shape`.
pub fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for dim in (0..shape.len().saturating_sub(1)).rev() {
        strides[dim] = strides[dim + 1] * shape[dim + 1];
    }
    strides
}

/// Strides and total size of `shape` laid out with `permutation`.
///
/// Logical dimension `i` is placed at physical position `permutation[i]`, the
/// physical shape is stored row-major, and the strides are mapped back to
/// logical dimension order.
pub fn strides_from_layout(shape: &[usize], permutation: &Permutation) -> Result<(Vec<usize>, usize)> {
    ensure!(
        permutation.rank() == shape.len(),
        "permutation {} has rank {}, array has rank {}",
        permutation,
        permutation.rank(),
        shape.len()
    );

    let mut physical = vec![0; shape.len()];
    for (dim, &pos) in permutation.as_slice().iter().enumerate() {
        physical[pos] = shape[dim];
    }
    let physical_strides = row_major_strides(&physical);
    let strides = permutation
        .as_slice()
        .iter()
        .map(|&pos| physical_strides[pos])
        .collect();
    let total_size = shape.iter().product();

    Ok((strides, total_size))
}

/// Recover the permutation that produced `strides` for `shape`, if any.
pub fn layout_from_strides(shape: &[usize], strides: &[usize]) -> Option<Permutation> {
    if shape.len() != strides.len() {
        return None;
    }
    // Outermost first; ties (extent-1 dims) keep logical order.
    let mut dims: Vec<usize> = (0..shape.len()).collect();
    dims.sort_by(|&a, &b| strides[b].cmp(&strides[a]).then(a.cmp(&b)));

    let mut order = vec![0; shape.len()];
    for (pos, &dim) in dims.iter().enumerate() {
        order[dim] = pos;
    }
    let permutation = Permutation::new(order).ok()?;
    let (expected, _) = strides_from_layout(shape, &permutation).ok()?;
    (expected == strides).then_some(permutation)
}
