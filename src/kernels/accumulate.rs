//! Shard-private accumulation of cluster statistics.

use ndarray::{ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, ArrayViewMut3, Axis};

use super::for_each_group;
use crate::device::DeviceFault;
use crate::element::{DataElement, IndexElement};

pub(crate) const ACCUMULATE: &str = "accumulate_shards";

/// Read-only inputs of [`accumulate_shards`].
pub(crate) struct ShardInputs<'a, T, I> {
    pub(crate) x_t: ArrayView2<'a, T>,
    pub(crate) sample_weights: ArrayView1<'a, T>,
    pub(crate) centroids_t: ArrayView2<'a, T>,
    pub(crate) assignment: ArrayView1<'a, I>,
}

struct Shard<'a, T> {
    sizes: ArrayViewMut1<'a, T>,
    sums: ArrayViewMut2<'a, T>,
    samples: Option<(ArrayViewMut1<'a, T>, ArrayViewMut1<'a, T>)>,
}

/// Fill copy `m` of the size and sum accumulators from the samples of
/// shard `m`, and record each sample's squared distance and inertia.
///
/// Shards own their copy outright, so no two shards ever write the same
/// element.
pub(crate) fn accumulate_shards<T: DataElement, I: IndexElement>(
    inputs: &ShardInputs<'_, T, I>,
    mut size_copies: ArrayViewMut2<'_, T>,
    mut sum_copies: ArrayViewMut3<'_, T>,
    mut sq_dist: ArrayViewMut1<'_, T>,
    mut inertia: ArrayViewMut1<'_, T>,
) -> Result<(), DeviceFault> {
    let n_samples = inputs.x_t.ncols();
    let n_clusters = inputs.centroids_t.ncols();
    let n_copies = size_copies.nrows();
    let per_shard = n_samples.div_ceil(n_copies.max(1)).max(1);

    let mut sample_chunks = sq_dist
        .axis_chunks_iter_mut(Axis(0), per_shard)
        .zip(inertia.axis_chunks_iter_mut(Axis(0), per_shard));
    let shards: Vec<Shard<'_, T>> = size_copies
        .axis_iter_mut(Axis(0))
        .zip(sum_copies.axis_iter_mut(Axis(0)))
        .map(|(sizes, sums)| Shard {
            sizes,
            sums,
            samples: sample_chunks.next(),
        })
        .collect();

    for_each_group(shards, |m, mut shard| {
        shard.sizes.fill(T::zero());
        shard.sums.fill(T::zero());
        let Some((mut dist, mut loss)) = shard.samples else {
            return Ok(());
        };
        let first = m * per_shard;
        for (offset, (d_out, l_out)) in dist.iter_mut().zip(loss.iter_mut()).enumerate() {
            let i = first + offset;
            let label = inputs.assignment[i];
            let c = label
                .to_position()
                .filter(|&c| c < n_clusters)
                .ok_or_else(|| {
                    DeviceFault::new(
                        ACCUMULATE,
                        format!("sample {i} is assigned to cluster {label:?}, outside 0..{n_clusters}"),
                    )
                })?;
            let w = inputs.sample_weights[i];
            let x = inputs.x_t.column(i);
            let d = x
                .iter()
                .zip(inputs.centroids_t.column(c).iter())
                .map(|(&a, &b)| (a - b) * (a - b))
                .sum::<T>();
            *d_out = d;
            *l_out = w * d;
            shard.sizes[c] = shard.sizes[c] + w;
            let mut column = shard.sums.column_mut(c);
            column.zip_mut_with(&x, |s, &v| *s = *s + w * v);
        }
        Ok(())
    })
}
