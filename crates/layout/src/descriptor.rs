//! Array descriptors and the per-kernel descriptor store.

use crate::permutation::{layout_from_strides, row_major_strides, strides_from_layout, Permutation};
use anyhow::{anyhow, ensure, Result};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};

/// Shape and physical layout of one array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayDescriptor {
    pub shape: Vec<usize>,
    /// Element strides, one per dimension.
    pub strides: Vec<usize>,
    /// Number of storage elements backing the array.
    pub total_size: usize,
    /// Internal to the kernel; never tuned or passed as an argument.
    #[serde(default)]
    pub transient: bool,
}

impl ArrayDescriptor {
    /// Row-major, non-transient descriptor.
    pub fn new(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            strides: row_major_strides(shape),
            total_size: shape.iter().product(),
            transient: false,
        }
    }

    pub fn transient(shape: &[usize]) -> Self {
        Self {
            transient: true,
            ..Self::new(shape)
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Rewrite strides and total size so the array is stored in `permutation` order.
    pub fn apply_layout(&mut self, permutation: &Permutation) -> Result<()> {
        let (strides, total_size) = strides_from_layout(&self.shape, permutation)?;
        self.strides = strides;
        self.total_size = total_size;
        Ok(())
    }

    /// Physical dimension order of the current strides.
    pub fn layout(&self) -> Option<Permutation> {
        layout_from_strides(&self.shape, &self.strides)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.shape.iter().all(|&extent| extent > 0),
            "shape {:?} has a zero extent",
            self.shape
        );
        ensure!(
            self.strides.len() == self.shape.len(),
            "{} strides for a rank-{} shape",
            self.strides.len(),
            self.shape.len()
        );
        ensure!(
            self.layout().is_some(),
            "strides {:?} are not a permuted row-major layout of {:?}",
            self.strides,
            self.shape
        );
        ensure!(
            self.total_size >= self.element_count(),
            "total size {} cannot hold {} elements",
            self.total_size,
            self.element_count()
        );
        Ok(())
    }
}

/// Descriptors of every array a kernel touches, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArrayStore {
    arrays: BTreeMap<String, ArrayDescriptor>,
}

impl ArrayStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, desc: ArrayDescriptor) -> Option<ArrayDescriptor> {
        self.arrays.insert(name.into(), desc)
    }

    pub fn get(&self, name: &str) -> Option<&ArrayDescriptor> {
        self.arrays.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&ArrayDescriptor> {
        self.arrays
            .get(name)
            .ok_or_else(|| anyhow!("unknown array `{name}`"))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.arrays.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, ArrayDescriptor> {
        self.arrays.iter()
    }

    /// Non-transient arrays in name order.
    pub fn tunable(&self) -> impl Iterator<Item = (&str, &ArrayDescriptor)> {
        self.arrays
            .iter()
            .filter(|(_, desc)| !desc.transient)
            .map(|(name, desc)| (name.as_str(), desc))
    }

    pub fn set_layout(&mut self, name: &str, permutation: &Permutation) -> Result<()> {
        let desc = self
            .arrays
            .get_mut(name)
            .ok_or_else(|| anyhow!("unknown array `{name}`"))?;
        desc.apply_layout(permutation)
    }

    pub fn set_transient(&mut self, name: &str, transient: bool) -> Result<()> {
        let desc = self
            .arrays
            .get_mut(name)
            .ok_or_else(|| anyhow!("unknown array `{name}`"))?;
        desc.transient = transient;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, desc) in &self.arrays {
            desc.validate()
                .map_err(|err| anyhow!("array `{name}`: {err}"))?;
        }
        Ok(())
    }
}

impl FromIterator<(String, ArrayDescriptor)> for ArrayStore {
    fn from_iter<T: IntoIterator<Item = (String, ArrayDescriptor)>>(iter: T) -> Self {
        Self {
            arrays: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ArrayStore {
    type Item = (&'a String, &'a ArrayDescriptor);
    type IntoIter = btree_map::Iter<'a, String, ArrayDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.arrays.iter()
    }
}
