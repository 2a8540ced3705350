//! Tuning groups: arrays that must share one layout decision.

use crate::error::{Result, TuneError};
use layoutforge_program::Program;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// How the non-transient arrays of a kernel are bucketed into groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupPolicy {
    /// Every array is tuned on its own.
    Separate,
    /// Pure inputs share one layout, written arrays share another.
    #[default]
    InputsOutputs,
    /// One group per distinct rank.
    Dimension,
    /// Input/output role crossed with rank.
    InputsOutputsDimension,
}

impl GroupPolicy {
    fn by_role(self) -> bool {
        matches!(self, Self::InputsOutputs | Self::InputsOutputsDimension)
    }

    fn by_rank(self) -> bool {
        matches!(self, Self::Dimension | Self::InputsOutputsDimension)
    }
}

impl fmt::Display for GroupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Separate => "separate",
            Self::InputsOutputs => "inputs-outputs",
            Self::Dimension => "dimension",
            Self::InputsOutputsDimension => "inputs-outputs-dimension",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Role {
    Input,
    Output,
}

/// Arrays of equal rank tuned with one shared permutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningGroup {
    members: BTreeSet<String>,
    rank: usize,
}

impl TuningGroup {
    /// Build a group of `kernel` arrays, rejecting mixed ranks.
    pub fn new<I, S>(kernel: &Program, members: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members: BTreeSet<String> = members.into_iter().map(Into::into).collect();
        let mut ranks = BTreeMap::new();
        for member in &members {
            let desc = kernel.arrays.get(member).ok_or_else(|| {
                TuneError::configuration(&kernel.name, format!("group member `{member}` is not an array of the kernel"))
            })?;
            if desc.transient {
                return Err(TuneError::configuration(
                    &kernel.name,
                    format!("transient array `{member}` cannot be tuned"),
                ));
            }
            ranks.insert(member.as_str(), desc.rank());
        }

        let mut distinct: Vec<usize> = ranks.values().copied().collect();
        distinct.sort_unstable();
        distinct.dedup();
        match distinct.as_slice() {
            [] => Err(TuneError::configuration(&kernel.name, "empty tuning group")),
            [rank] => Ok(Self {
                rank: *rank,
                members,
            }),
            _ => Err(TuneError::configuration(
                &kernel.name,
                format!("group mixes array ranks {ranks:?}; cannot tune together"),
            )),
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl fmt::Display for TuningGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, member) in self.members.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{member}")?;
        }
        write!(f, "}} rank {}", self.rank)
    }
}

/// Partition the non-transient accessed arrays of `kernel` under `policy`.
///
/// `Separate` yields `None`; callers fall back to singletons through
/// [`resolve_groups`]. An array counts as an output when any of its access
/// nodes has an incoming edge, so membership never depends on visit order.
pub fn group(kernel: &Program, policy: GroupPolicy) -> Result<Option<Vec<TuningGroup>>> {
    if policy == GroupPolicy::Separate {
        return Ok(None);
    }

    let mut buckets: BTreeMap<(Option<Role>, Option<usize>), Vec<&str>> = BTreeMap::new();
    for name in kernel.accessed_arrays() {
        let Some(desc) = kernel.arrays.get(name) else {
            continue;
        };
        if desc.transient {
            continue;
        }
        let role = policy.by_role().then(|| {
            if kernel.is_written(name) {
                Role::Output
            } else {
                Role::Input
            }
        });
        let rank = policy.by_rank().then(|| desc.rank());
        buckets.entry((role, rank)).or_default().push(name);
    }

    buckets
        .into_values()
        .map(|members| TuningGroup::new(kernel, members))
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

/// Final group list: explicit groups first, then a singleton for every
/// remaining non-transient array.
pub fn resolve_groups(kernel: &Program, groups: Option<Vec<TuningGroup>>) -> Result<Vec<TuningGroup>> {
    let mut groups = groups.unwrap_or_default();
    let mut claimed = BTreeSet::new();
    for group in &groups {
        for member in group.members() {
            if !claimed.insert(member.to_string()) {
                return Err(TuneError::configuration(
                    &kernel.name,
                    format!("array `{member}` belongs to more than one group"),
                ));
            }
        }
    }

    for (name, _) in kernel.arrays.tunable() {
        if !claimed.contains(name) {
            groups.push(TuningGroup::new(kernel, [name])?);
        }
    }
    Ok(groups)
}
