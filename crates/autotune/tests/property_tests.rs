//! Property tests for layout-space sizes and signatures.

use layoutforge_autotune::{group, layout_signature, resolve_groups, GroupPolicy, LayoutSpace};
use layoutforge_layout::{ArrayDescriptor, ArrayStore, Permutation};
use layoutforge_program::{Program, State};
use proptest::prelude::*;
use std::collections::HashSet;

// ── Strategies ──────────────────────────────────────────────────────────────

/// Shapes of rank 1..=3 with extents >= 2 so every permutation is distinct.
fn arb_shape() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(2usize..5, 1..=3)
}

/// `(shape, written)` for up to four arrays.
fn arb_arrays() -> impl Strategy<Value = Vec<(Vec<usize>, bool)>> {
    prop::collection::vec((arb_shape(), any::<bool>()), 1..=4)
}

fn arb_policy() -> impl Strategy<Value = GroupPolicy> {
    prop_oneof![
        Just(GroupPolicy::Separate),
        Just(GroupPolicy::InputsOutputs),
        Just(GroupPolicy::Dimension),
        Just(GroupPolicy::InputsOutputsDimension),
    ]
}

/// One tasklet; written arrays hang off its output side.
fn kernel(arrays: &[(Vec<usize>, bool)]) -> Program {
    let mut state = State::new("s");
    let tasklet = state.add_tasklet("t", None);
    let mut builder = Program::builder("k");
    for (i, (shape, written)) in arrays.iter().enumerate() {
        let name = format!("a{i}");
        let node = state.add_access(name.clone());
        if *written {
            state.add_edge(tasklet, node);
        } else {
            state.add_edge(node, tasklet);
        }
        builder = builder.array(name, shape);
    }
    builder.state(state).build().unwrap()
}

fn factorial(n: usize) -> usize {
    (1..=n).product()
}

// ── Property tests ──────────────────────────────────────────────────────────

proptest! {
    /// The space has exactly `∏ rank_g!` configurations, all distinct.
    #[test]
    fn space_size_is_product_of_factorials(arrays in arb_arrays(), policy in arb_policy()) {
        let kernel = kernel(&arrays);
        let groups = match group(&kernel, policy) {
            Ok(groups) => groups,
            // Mixed-rank buckets are rejected up front.
            Err(_) => return Ok(()),
        };
        let groups = resolve_groups(&kernel, groups).unwrap();
        let expected: usize = groups.iter().map(|g| factorial(g.rank())).product();

        let space = LayoutSpace::new(groups).unwrap();
        prop_assert_eq!(space.size(), expected);

        let mut signatures = HashSet::new();
        let mut count = 0;
        for config in &space {
            let applied = config.apply(space.groups(), &kernel.arrays).unwrap();
            signatures.insert(layout_signature(&applied.arrays));
            count += 1;
        }
        prop_assert_eq!(count, expected);
        prop_assert_eq!(signatures.len(), expected);
    }

    /// Separate grouping covers every array exactly once as a singleton.
    #[test]
    fn separate_yields_singletons(arrays in arb_arrays()) {
        let kernel = kernel(&arrays);
        let groups = resolve_groups(&kernel, group(&kernel, GroupPolicy::Separate).unwrap()).unwrap();
        prop_assert_eq!(groups.len(), arrays.len());
        prop_assert!(groups.iter().all(|g| g.len() == 1));
    }

    /// Signatures depend only on the resulting strides.
    #[test]
    fn signature_tracks_strides(shape in arb_shape(), pick in 0usize..6, other in 0usize..6) {
        let perms = Permutation::all(shape.len());
        let a = &perms[pick % perms.len()];
        let b = &perms[other % perms.len()];

        let store_for = |perm: &Permutation| {
            let mut desc = ArrayDescriptor::new(&shape);
            desc.apply_layout(perm).unwrap();
            let mut store = ArrayStore::new();
            store.insert("A", desc);
            store
        };
        let (sa, sb) = (store_for(a), store_for(b));
        let same_strides = sa.get("A").unwrap().strides == sb.get("A").unwrap().strides;
        prop_assert_eq!(layout_signature(&sa) == layout_signature(&sb), same_strides);
    }
}
