//! Canonical layout signatures used as result keys.

use crate::cache::LayoutReport;
use layoutforge_layout::ArrayStore;

/// One line per non-transient array, in name order: `  A: (8, 1)`.
///
/// Two stores with the same physical strides always produce the same
/// signature; any stride difference changes it.
pub fn layout_signature(arrays: &ArrayStore) -> String {
    arrays
        .tunable()
        .map(|(name, desc)| {
            let strides: Vec<String> = desc.strides.iter().map(ToString::to_string).collect();
            format!("  {name}: ({})", strides.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Lowest-cost entry; ties go to the signature that sorts first.
pub fn best_entry(report: &LayoutReport) -> Option<(&str, f64)> {
    let mut best: Option<(&str, f64)> = None;
    for (signature, &cost) in report {
        match best {
            Some((_, best_cost)) if cost >= best_cost => {}
            _ => best = Some((signature.as_str(), cost)),
        }
    }
    best
}
