//! Materializing buffers in a descriptor's physical layout.

use crate::descriptor::ArrayDescriptor;
use anyhow::{ensure, Context, Result};
use ndarray::{ArrayD, ArrayViewD, IxDyn, ShapeBuilder};

/// Copy `source` into a fresh buffer laid out with `desc`'s strides.
///
/// Logical values are preserved; only the physical element order changes.
pub fn relayout(desc: &ArrayDescriptor, source: ArrayViewD<'_, f64>) -> Result<ArrayD<f64>> {
    ensure!(
        source.shape() == desc.shape.as_slice(),
        "buffer shape {:?} does not match descriptor shape {:?}",
        source.shape(),
        desc.shape
    );

    let storage = vec![0.0; desc.total_size];
    let shape = IxDyn(&desc.shape).strides(IxDyn(&desc.strides));
    let mut target = ArrayD::from_shape_vec(shape, storage).with_context(|| {
        format!(
            "strides {:?} do not fit in {} elements",
            desc.strides, desc.total_size
        )
    })?;
    target.assign(&source);
    Ok(target)
}

/// Whether `buffer` is physically laid out the way `desc` says.
pub fn matches_layout(desc: &ArrayDescriptor, buffer: &ArrayD<f64>) -> bool {
    buffer.shape() == desc.shape.as_slice()
        && buffer
            .strides()
            .iter()
            .zip(&desc.strides)
            .all(|(&actual, &expected)| actual >= 0 && actual as usize == expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permutation::Permutation;
    use ndarray::Array;

    #[test]
    fn test_relayout_preserves_values() {
        let source = Array::from_shape_fn(IxDyn(&[4, 8]), |idx| (idx[0] * 8 + idx[1]) as f64);
        let mut desc = ArrayDescriptor::new(&[4, 8]);
        desc.apply_layout(&Permutation::new(vec![1, 0]).unwrap()).unwrap();

        let moved = relayout(&desc, source.view()).unwrap();
        assert_eq!(moved, source);
        assert_eq!(moved.strides(), &[1, 4]);
        assert!(matches_layout(&desc, &moved));
        assert!(!matches_layout(&ArrayDescriptor::new(&[4, 8]), &moved));
    }

    #[test]
    fn test_relayout_rank3() {
        let source = Array::from_shape_fn(IxDyn(&[2, 3, 5]), |idx| {
            (idx[0] * 100 + idx[1] * 10 + idx[2]) as f64
        });
        let mut desc = ArrayDescriptor::new(&[2, 3, 5]);
        desc.apply_layout(&Permutation::new(vec![2, 0, 1]).unwrap()).unwrap();

        let moved = relayout(&desc, source.view()).unwrap();
        assert_eq!(moved, source);
        assert_eq!(moved.strides(), &[1, 10, 2]);
    }

    #[test]
    fn test_relayout_shape_mismatch() {
        let source = ArrayD::<f64>::zeros(IxDyn(&[3, 3]));
        let desc = ArrayDescriptor::new(&[4, 8]);
        assert!(relayout(&desc, source.view()).is_err());
    }
}
