//! Column-wise kernels over `features x clusters` matrices.

use ndarray::{ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis, Zip};

use super::for_each_group;
use crate::device::DeviceFault;
use crate::element::DataElement;

pub(crate) const HALF_NORM: &str = "half_l2_norm_squared";
pub(crate) const BROADCAST_DIVIDE: &str = "broadcast_divide";
pub(crate) const CENTROID_SHIFT: &str = "centroid_shift";

/// `norms[c] = 0.5 * sum_f centroids_t[f, c]^2`
pub(crate) fn half_l2_norm_squared<T: DataElement>(
    centroids_t: ArrayView2<'_, T>,
    mut norms: ArrayViewMut1<'_, T>,
    group: usize,
) -> Result<(), DeviceFault> {
    let groups: Vec<_> = norms.axis_chunks_iter_mut(Axis(0), group).collect();
    for_each_group(groups, |g, mut chunk| {
        let first = g * group;
        for (offset, out) in chunk.iter_mut().enumerate() {
            let column = centroids_t.column(first + offset);
            *out = T::HALF * column.iter().map(|&v| v * v).sum::<T>();
        }
        Ok(())
    })
}

/// `matrix[r, k] /= vector[k]`, in place.
pub(crate) fn broadcast_divide<T: DataElement>(
    mut matrix: ArrayViewMut2<'_, T>,
    vector: ArrayView1<'_, T>,
    group: usize,
) -> Result<(), DeviceFault> {
    let groups: Vec<_> = matrix.axis_chunks_iter_mut(Axis(0), group).collect();
    for_each_group(groups, |_, mut rows| {
        for mut row in rows.rows_mut() {
            Zip::from(&mut row)
                .and(&vector)
                .for_each(|value, &divisor| *value = *value / divisor);
        }
        Ok(())
    })
}

/// `shift[c] = sum_f (old[f, c] - new[f, c])^2`
pub(crate) fn centroid_shift<T: DataElement>(
    old_centroids_t: ArrayView2<'_, T>,
    new_centroids_t: ArrayView2<'_, T>,
    mut shift: ArrayViewMut1<'_, T>,
    group: usize,
) -> Result<(), DeviceFault> {
    let groups: Vec<_> = shift.axis_chunks_iter_mut(Axis(0), group).collect();
    for_each_group(groups, |g, mut chunk| {
        let first = g * group;
        for (offset, out) in chunk.iter_mut().enumerate() {
            let c = first + offset;
            *out = old_centroids_t
                .column(c)
                .iter()
                .zip(new_centroids_t.column(c).iter())
                .map(|(&a, &b)| (a - b) * (a - b))
                .sum::<T>();
        }
        Ok(())
    })
}
