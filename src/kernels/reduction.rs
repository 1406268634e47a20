//! Merge of the shard-private accumulators.
//!
//! Three phases: every group sums its clusters across copies (in copy
//! order) and counts the clusters that came out empty; an exclusive scan of
//! those counts gives each group its slot range in the empty-cluster list;
//! then every group writes its empty clusters into its range. Since groups
//! cover clusters in ascending order, so does the list.

use ndarray::{ArrayView2, ArrayView3, ArrayViewMut1, ArrayViewMut2, Axis};

use super::{for_each_group, map_groups};
use crate::device::DeviceFault;
use crate::element::{DataElement, IndexElement};

pub(crate) const REDUCE: &str = "reduce_centroid_data";

/// Outputs of [`reduce_centroid_data`].
pub(crate) struct ReducedStats<'a, T, I> {
    pub(crate) cluster_sizes: ArrayViewMut1<'a, T>,
    pub(crate) centroids_t: ArrayViewMut2<'a, T>,
    pub(crate) empty_clusters: ArrayViewMut1<'a, I>,
    pub(crate) n_empty: ArrayViewMut1<'a, I>,
}

pub(crate) fn reduce_centroid_data<T: DataElement, I: IndexElement>(
    size_copies: ArrayView2<'_, T>,
    sum_copies: ArrayView3<'_, T>,
    out: ReducedStats<'_, T, I>,
    group: usize,
) -> Result<(), DeviceFault> {
    let ReducedStats {
        mut cluster_sizes,
        mut centroids_t,
        mut empty_clusters,
        mut n_empty,
    } = out;

    let blocks: Vec<_> = cluster_sizes
        .axis_chunks_iter_mut(Axis(0), group)
        .zip(centroids_t.axis_chunks_iter_mut(Axis(1), group))
        .collect();
    let empty_per_group = map_groups(blocks, |g, (mut sizes, mut sums)| {
        let first = g * group;
        let mut empty = 0usize;
        for (offset, size) in sizes.iter_mut().enumerate() {
            let c = first + offset;
            *size = size_copies.column(c).iter().fold(T::zero(), |acc, &s| acc + s);
            if *size == T::zero() {
                empty += 1;
            }
            for (f, value) in sums.column_mut(offset).iter_mut().enumerate() {
                *value = sum_copies
                    .slice(ndarray::s![.., f, c])
                    .iter()
                    .fold(T::zero(), |acc, &s| acc + s);
            }
        }
        Ok(empty)
    })?;

    let total: usize = empty_per_group.iter().sum();
    let mut slots = Vec::with_capacity(empty_per_group.len());
    let mut rest = empty_clusters.slice_mut(ndarray::s![..total]);
    for &count in &empty_per_group {
        let (head, tail) = rest.split_at(Axis(0), count);
        slots.push(head);
        rest = tail;
    }

    let sizes = cluster_sizes.view();
    for_each_group(slots, |g, mut slot| {
        let first = g * group;
        let last = (first + group).min(sizes.len());
        let mut next = slot.iter_mut();
        for c in first..last {
            if sizes[c] == T::zero() {
                match next.next() {
                    Some(entry) => *entry = I::from_position(c),
                    None => {
                        return Err(DeviceFault::new(REDUCE, "empty-cluster count changed between phases"))
                    }
                }
            }
        }
        Ok(())
    })?;

    n_empty[0] = I::from_position(total);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1, Array2, Array3};
    use proptest::prelude::*;

    fn reduce(
        size_copies: &Array2<f32>,
        sum_copies: &Array3<f32>,
        group: usize,
    ) -> (Array1<f32>, Array2<f32>, Array1<i64>, i64) {
        let c = size_copies.ncols();
        let f = sum_copies.shape()[1];
        let mut sizes = Array1::zeros(c);
        let mut sums = Array2::zeros((f, c));
        let mut empty = Array1::from_elem(c, -7i64);
        let mut n_empty = Array1::zeros(1);
        reduce_centroid_data(
            size_copies.view(),
            sum_copies.view(),
            ReducedStats {
                cluster_sizes: sizes.view_mut(),
                centroids_t: sums.view_mut(),
                empty_clusters: empty.view_mut(),
                n_empty: n_empty.view_mut(),
            },
            group,
        )
        .unwrap();
        (sizes, sums, empty, n_empty[0])
    }

    #[test]
    fn test_reduce_and_flag_empty() {
        let size_copies = array![[1.0f32, 0.0, 2.0, 0.0], [3.0, 0.0, 0.0, 0.0]];
        let mut sum_copies = Array3::zeros((2, 1, 4));
        sum_copies[[0, 0, 0]] = 1.0;
        sum_copies[[1, 0, 0]] = 5.0;
        sum_copies[[0, 0, 2]] = 4.0;
        let (sizes, sums, empty, n_empty) = reduce(&size_copies, &sum_copies, 3);
        assert_eq!(sizes, array![4.0, 0.0, 2.0, 0.0]);
        assert_eq!(sums, array![[6.0, 0.0, 4.0, 0.0]]);
        assert_eq!(n_empty, 2);
        // entries past the count are untouched
        assert_eq!(empty, array![1, 3, -7, -7]);
    }

    fn copies() -> impl Strategy<Value = (Array2<f32>, Array3<f32>)> {
        (1usize..5, 1usize..4, 1usize..40).prop_flat_map(|(m, f, c)| {
            (
                prop::collection::vec(prop_oneof![Just(0.0f32), 1.0f32..4.0], m * c)
                    .prop_map(move |v| Array2::from_shape_vec((m, c), v).unwrap()),
                prop::collection::vec(-8.0f32..8.0, m * f * c)
                    .prop_map(move |v| Array3::from_shape_vec((m, f, c), v).unwrap()),
            )
        })
    }

    proptest! {
        #[test]
        fn reduction_matches_sequential((size_copies, sum_copies) in copies(), group in 1usize..9) {
            let (sizes, sums, empty, n_empty) = reduce(&size_copies, &sum_copies, group);
            let expected_sizes = size_copies.sum_axis(Axis(0));
            let expected_sums = sum_copies.sum_axis(Axis(0));
            for (a, b) in sizes.iter().zip(expected_sizes.iter()) {
                prop_assert!((a - b).abs() <= 1e-4);
            }
            for (a, b) in sums.iter().zip(expected_sums.iter()) {
                prop_assert!((a - b).abs() <= 1e-4);
            }
            let zeros: Vec<i64> = (0..sizes.len())
                .filter(|&c| expected_sizes[c] == 0.0)
                .map(|c| c as i64)
                .collect();
            prop_assert_eq!(n_empty as usize, zeros.len());
            prop_assert_eq!(empty.slice(ndarray::s![..zeros.len()]).to_vec(), zeros);
        }
    }
}
