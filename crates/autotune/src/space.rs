//! The layout space: every joint choice of one permutation per group.

use crate::groups::TuningGroup;
use anyhow::{anyhow, Result};
use layoutforge_layout::{ArrayStore, Permutation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::iter::FusedIterator;

/// The permutation chosen for one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLayout {
    pub members: Vec<String>,
    pub permutation: Permutation,
}

/// One point of the layout space, in group order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub index: usize,
    pub layouts: Vec<Permutation>,
}

/// Descriptors produced by applying a [`Configuration`] to a pristine store.
#[derive(Debug, Clone)]
pub struct AppliedLayout {
    pub arrays: ArrayStore,
    pub modified: BTreeSet<String>,
}

impl Configuration {
    /// Compute a fresh descriptor store for this configuration.
    ///
    /// `pristine` is never mutated, so configurations are independent of the
    /// order in which they are applied.
    pub fn apply(&self, groups: &[TuningGroup], pristine: &ArrayStore) -> Result<AppliedLayout> {
        let mut arrays = pristine.clone();
        let mut modified = BTreeSet::new();
        for (group, permutation) in groups.iter().zip(&self.layouts) {
            for member in group.members() {
                arrays.set_layout(member, permutation)?;
                modified.insert(member.to_string());
            }
        }
        Ok(AppliedLayout { arrays, modified })
    }

    pub fn describe(&self, groups: &[TuningGroup]) -> Vec<GroupLayout> {
        groups
            .iter()
            .zip(&self.layouts)
            .map(|(group, permutation)| GroupLayout {
                members: group.members().map(str::to_string).collect(),
                permutation: permutation.clone(),
            })
            .collect()
    }
}

/// Cartesian product of each group's permutations.
#[derive(Debug, Clone)]
pub struct LayoutSpace {
    groups: Vec<TuningGroup>,
    choices: Vec<Vec<Permutation>>,
    size: usize,
}

impl LayoutSpace {
    /// Fails when `∏ rank_g!` does not fit in a `usize`.
    pub fn new(groups: Vec<TuningGroup>) -> Result<Self> {
        let size = groups
            .iter()
            .try_fold(1usize, |acc, group| acc.checked_mul(factorial(group.rank())?))
            .ok_or_else(|| anyhow!("layout space of {} groups has more than {} configurations", groups.len(), usize::MAX))?;
        let choices = groups
            .iter()
            .map(|group| Permutation::all(group.rank()))
            .collect();
        Ok(Self { groups, choices, size })
    }

    pub fn groups(&self) -> &[TuningGroup] {
        &self.groups
    }

    /// `∏ rank_g!` over the groups.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Lazily enumerate configurations; the last group varies fastest.
    pub fn iter(&self) -> Configurations<'_> {
        Configurations {
            space: self,
            cursor: vec![0; self.choices.len()],
            next_index: 0,
            remaining: self.size(),
        }
    }
}

fn factorial(n: usize) -> Option<usize> {
    (1..=n).try_fold(1usize, |acc, k| acc.checked_mul(k))
}

impl<'a> IntoIterator for &'a LayoutSpace {
    type Item = Configuration;
    type IntoIter = Configurations<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct Configurations<'a> {
    space: &'a LayoutSpace,
    cursor: Vec<usize>,
    next_index: usize,
    remaining: usize,
}

impl Iterator for Configurations<'_> {
    type Item = Configuration;

    fn next(&mut self) -> Option<Configuration> {
        if self.remaining == 0 {
            return None;
        }

        let layouts = self
            .cursor
            .iter()
            .zip(&self.space.choices)
            .map(|(&pick, choices)| choices[pick].clone())
            .collect();
        let config = Configuration {
            index: self.next_index,
            layouts,
        };

        for (slot, choices) in self.cursor.iter_mut().zip(&self.space.choices).rev() {
            *slot += 1;
            if *slot < choices.len() {
                break;
            }
            *slot = 0;
        }
        self.next_index += 1;
        self.remaining -= 1;
        Some(config)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Configurations<'_> {}

impl FusedIterator for Configurations<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::resolve_groups;
    use layoutforge_program::{Program, State};
    use std::collections::HashSet;

    fn kernel(shapes: &[(&str, &[usize])]) -> Program {
        let mut state = State::new("s");
        let t = state.add_tasklet("t", None);
        let mut builder = Program::builder("k");
        for (name, shape) in shapes {
            let node = state.add_access(*name);
            state.add_edge(node, t);
            builder = builder.array(*name, shape);
        }
        builder.state(state).build().unwrap()
    }

    #[test]
    fn test_two_rank2_arrays_give_four_configurations() {
        let kernel = kernel(&[("A", &[4, 8]), ("B", &[2, 3])]);
        let space = LayoutSpace::new(resolve_groups(&kernel, None).unwrap()).unwrap();
        assert_eq!(space.size(), 4);

        let configs: Vec<Configuration> = space.iter().collect();
        assert_eq!(configs.len(), 4);
        let picks: Vec<Vec<Vec<usize>>> = configs
            .iter()
            .map(|c| c.layouts.iter().cloned().map(Vec::from).collect())
            .collect();
        assert_eq!(
            picks,
            vec![
                vec![vec![0, 1], vec![0, 1]],
                vec![vec![0, 1], vec![1, 0]],
                vec![vec![1, 0], vec![0, 1]],
                vec![vec![1, 0], vec![1, 0]],
            ]
        );
        assert_eq!(configs[3].index, 3);
    }

    #[test]
    fn test_mixed_ranks_product() {
        let kernel = kernel(&[("A", &[2]), ("B", &[2, 2]), ("C", &[2, 2, 2])]);
        let space = LayoutSpace::new(resolve_groups(&kernel, None).unwrap()).unwrap();
        assert_eq!(space.size(), 12);
        let mut iter = space.iter();
        assert_eq!(iter.len(), 12);
        iter.next();
        assert_eq!(iter.len(), 11);
        assert_eq!(iter.count(), 11);
    }

    #[test]
    fn test_apply_leaves_pristine_untouched() {
        let kernel = kernel(&[("A", &[4, 8])]);
        let space = LayoutSpace::new(resolve_groups(&kernel, None).unwrap()).unwrap();
        let pristine = kernel.arrays.clone();

        let mut seen = HashSet::new();
        for config in &space {
            let applied = config.apply(space.groups(), &kernel.arrays).unwrap();
            assert_eq!(applied.modified, BTreeSet::from(["A".to_string()]));
            seen.insert(applied.arrays.get("A").unwrap().strides.clone());
        }
        assert_eq!(kernel.arrays, pristine);
        assert_eq!(seen, HashSet::from([vec![8, 1], vec![1, 4]]));
    }

    #[test]
    fn test_oversized_space_is_rejected() {
        const SHAPE: &[usize] = &[2, 2, 2, 2];
        let names: Vec<String> = (0..14).map(|i| format!("a{i}")).collect();
        let shapes: Vec<(&str, &[usize])> = names.iter().map(|n| (n.as_str(), SHAPE)).collect();
        let groups = resolve_groups(&kernel(&shapes), None).unwrap();
        assert_eq!(groups.len(), 14);

        // 24^14 does not fit in 64 bits.
        let err = LayoutSpace::new(groups).unwrap_err();
        assert!(err.to_string().contains("14 groups"));

        let groups = resolve_groups(&kernel(&shapes[..13]), None).unwrap();
        assert_eq!(LayoutSpace::new(groups).unwrap().size(), 24usize.pow(13));
    }

    #[test]
    fn test_empty_space_has_single_configuration() {
        let space = LayoutSpace::new(Vec::new()).unwrap();
        assert_eq!(space.size(), 1);
        let configs: Vec<_> = space.iter().collect();
        assert_eq!(configs.len(), 1);
        assert!(configs[0].layouts.is_empty());
    }
}
