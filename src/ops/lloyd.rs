use log::debug;
use ndarray::{Ix1, Ix2, Ix3};

use super::{
    arg, check_index_capacity, check_layout, check_placement, data_type, index_type, out, with_data_type,
    with_element_types,
};
use crate::config::{group_size, WindowConfig};
use crate::device::{DeviceBuffer, Event, KernelArg, KernelLaunch, Queue};
use crate::element::ElementType;
use crate::error::{Error, Result};
use crate::kernels::accumulate::{self, ShardInputs};
use crate::kernels::distance;
use crate::kernels::reduction::{self, ReducedStats};

fn window_element(dt: super::DataType) -> ElementType {
    match dt {
        super::DataType::F32 => ElementType::F32,
        super::DataType::F64 => ElementType::F64,
    }
}

/// Full `clusters x samples` matrix of squared distances.
///
/// `x_t` is `features x samples`, `centroids_t` is `features x clusters`.
pub fn distance_matrix(
    queue: &Queue,
    x_t: &DeviceBuffer,
    centroids_t: &DeviceBuffer,
    distances: &DeviceBuffer,
    window: &WindowConfig,
    depends: &[Event],
) -> Result<KernelLaunch> {
    let args = [
        arg("x_t", x_t, 2),
        arg("centroids_t", centroids_t, 2),
        out("distances", distances, 2),
    ];
    check_layout(&args)?;
    let (n_features, n_samples) = (args[0].extent(0), args[0].extent(1));
    let n_clusters = args[1].extent(1);
    args[1].expect_extent(0, n_features)?;
    args[2].expect_extent(0, n_clusters)?;
    args[2].expect_extent(1, n_samples)?;
    check_placement(queue, &args)?;
    let dt = data_type(&args)?;
    window.validate(queue.limits(), window_element(dt))?;

    debug!(
        "{}: {n_samples} samples, {n_clusters} clusters, {n_features} features {dt:?}",
        distance::DISTANCES
    );
    let window = *window;
    let launch = with_data_type!(dt, T, {
        queue.submit(
            distance::DISTANCES,
            vec![
                KernelArg::read("x_t", x_t),
                KernelArg::read("centroids_t", centroids_t),
                KernelArg::write("distances", distances),
            ],
            depends,
            move |mut bound| {
                let x = bound.take(0)?;
                let c = bound.take(1)?;
                let mut out = bound.take(2)?;
                distance::pairwise_distances(
                    x.view::<T, Ix2>()?,
                    c.view::<T, Ix2>()?,
                    out.view_mut::<T, Ix2>()?,
                    &window,
                )
            },
        )
    });
    Ok(launch)
}

/// Label every sample with its nearest centroid without materializing the
/// distance matrix. `half_norms` comes from
/// [`half_norm_squared`](crate::half_norm_squared) of the same centroids.
pub fn assignment(
    queue: &Queue,
    x_t: &DeviceBuffer,
    centroids_t: &DeviceBuffer,
    half_norms: &DeviceBuffer,
    assignment: &DeviceBuffer,
    window: &WindowConfig,
    depends: &[Event],
) -> Result<KernelLaunch> {
    let args = [
        arg("x_t", x_t, 2),
        arg("centroids_t", centroids_t, 2),
        arg("centroids_half_l2_norm_squared", half_norms, 1),
        out("assignment_idx", assignment, 1),
    ];
    check_layout(&args)?;
    let (n_features, n_samples) = (args[0].extent(0), args[0].extent(1));
    let n_clusters = args[1].extent(1);
    args[1].expect_extent(0, n_features)?;
    args[2].expect_extent(0, n_clusters)?;
    args[3].expect_extent(0, n_samples)?;
    if n_clusters == 0 {
        return Err(Error::InvalidParameter {
            name: "centroids_t",
            message: "must hold at least one centroid",
        });
    }
    check_placement(queue, &args)?;
    let dt = data_type(&args[..3])?;
    let it = index_type(&args[3..])?;
    check_index_capacity(it, n_clusters - 1)?;
    window.validate(queue.limits(), window_element(dt))?;

    debug!(
        "{}: {n_samples} samples, {n_clusters} clusters, {n_features} features {dt:?}/{it:?}",
        distance::ASSIGNMENT
    );
    let window = *window;
    let launch = with_element_types!(dt, it, T, I, {
        queue.submit(
            distance::ASSIGNMENT,
            vec![
                KernelArg::read("x_t", x_t),
                KernelArg::read("centroids_t", centroids_t),
                KernelArg::read("centroids_half_l2_norm_squared", half_norms),
                KernelArg::write("assignment_idx", assignment),
            ],
            depends,
            move |mut bound| {
                let x = bound.take(0)?;
                let c = bound.take(1)?;
                let hn = bound.take(2)?;
                let mut labels = bound.take(3)?;
                distance::assign(
                    x.view::<T, Ix2>()?,
                    c.view::<T, Ix2>()?,
                    hn.view::<T, Ix1>()?,
                    labels.view_mut::<I, Ix1>()?,
                    &window,
                )
            },
        )
    });
    Ok(launch)
}

/// Buffers of [`accumulate_shards`].
#[derive(Debug, Clone, Copy)]
pub struct ShardBuffers<'a> {
    /// Samples, `features x samples`.
    pub x_t: &'a DeviceBuffer,
    /// Sample weights, `samples`.
    pub sample_weights: &'a DeviceBuffer,
    /// Centroids the samples were assigned against, `features x clusters`.
    pub centroids_t: &'a DeviceBuffer,
    /// Cluster label per sample, `samples`, index type.
    pub assignment: &'a DeviceBuffer,
    /// Output: per-shard cluster sizes, `copies x clusters`.
    pub size_copies: &'a DeviceBuffer,
    /// Output: per-shard weighted sums, `copies x features x clusters`.
    pub sum_copies: &'a DeviceBuffer,
    /// Output: squared distance to the assigned centroid, `samples`.
    pub sq_dist: &'a DeviceBuffer,
    /// Output: weighted squared distance, `samples`.
    pub per_sample_inertia: &'a DeviceBuffer,
}

/// Accumulate cluster statistics into shard-private copies.
///
/// Shard `m` owns copy `m` and the contiguous sample range
/// `[m * ceil(N / M), (m + 1) * ceil(N / M))`. All copies are overwritten.
/// Fold them with [`reduce_stats`].
pub fn accumulate_shards(
    queue: &Queue,
    buffers: &ShardBuffers<'_>,
    depends: &[Event],
) -> Result<KernelLaunch> {
    let b = buffers;
    let args = [
        arg("x_t", b.x_t, 2),
        arg("sample_weights", b.sample_weights, 1),
        arg("centroids_t", b.centroids_t, 2),
        arg("assignment_idx", b.assignment, 1),
        out("cluster_sizes_private_copies", b.size_copies, 2),
        out("centroids_t_private_copies", b.sum_copies, 3),
        out("sq_dist_to_nearest_centroid", b.sq_dist, 1),
        out("per_sample_inertia", b.per_sample_inertia, 1),
    ];
    check_layout(&args)?;
    let (n_features, n_samples) = (args[0].extent(0), args[0].extent(1));
    let n_clusters = args[2].extent(1);
    let n_copies = args[4].extent(0);
    args[1].expect_extent(0, n_samples)?;
    args[2].expect_extent(0, n_features)?;
    args[3].expect_extent(0, n_samples)?;
    args[4].expect_extent(1, n_clusters)?;
    args[5].expect_extent(0, n_copies)?;
    args[5].expect_extent(1, n_features)?;
    args[5].expect_extent(2, n_clusters)?;
    args[6].expect_extent(0, n_samples)?;
    args[7].expect_extent(0, n_samples)?;
    if n_copies == 0 {
        return Err(Error::InvalidParameter {
            name: "cluster_sizes_private_copies",
            message: "must hold at least one copy",
        });
    }
    check_placement(queue, &args)?;
    let data_args = [args[0], args[1], args[2], args[4], args[5], args[6], args[7]];
    let dt = data_type(&data_args)?;
    let it = index_type(&args[3..4])?;

    debug!(
        "{}: {n_samples} samples, {n_clusters} clusters, {n_copies} copies {dt:?}/{it:?}",
        accumulate::ACCUMULATE
    );
    let launch = with_element_types!(dt, it, T, I, {
        queue.submit(
            accumulate::ACCUMULATE,
            vec![
                KernelArg::read("x_t", b.x_t),
                KernelArg::read("sample_weights", b.sample_weights),
                KernelArg::read("centroids_t", b.centroids_t),
                KernelArg::read("assignment_idx", b.assignment),
                KernelArg::write("cluster_sizes_private_copies", b.size_copies),
                KernelArg::write("centroids_t_private_copies", b.sum_copies),
                KernelArg::write("sq_dist_to_nearest_centroid", b.sq_dist),
                KernelArg::write("per_sample_inertia", b.per_sample_inertia),
            ],
            depends,
            move |mut bound| {
                let x = bound.take(0)?;
                let w = bound.take(1)?;
                let c = bound.take(2)?;
                let labels = bound.take(3)?;
                let mut sizes = bound.take(4)?;
                let mut sums = bound.take(5)?;
                let mut sq = bound.take(6)?;
                let mut inertia = bound.take(7)?;
                let inputs = ShardInputs {
                    x_t: x.view::<T, Ix2>()?,
                    sample_weights: w.view::<T, Ix1>()?,
                    centroids_t: c.view::<T, Ix2>()?,
                    assignment: labels.view::<I, Ix1>()?,
                };
                accumulate::accumulate_shards(
                    &inputs,
                    sizes.view_mut::<T, Ix2>()?,
                    sums.view_mut::<T, Ix3>()?,
                    sq.view_mut::<T, Ix1>()?,
                    inertia.view_mut::<T, Ix1>()?,
                )
            },
        )
    });
    Ok(launch)
}

/// Buffers of [`reduce_stats`].
#[derive(Debug, Clone, Copy)]
pub struct ReductionBuffers<'a> {
    /// Per-shard cluster sizes, `copies x clusters`.
    pub size_copies: &'a DeviceBuffer,
    /// Per-shard weighted sums, `copies x features x clusters`.
    pub sum_copies: &'a DeviceBuffer,
    /// Output: cluster sizes, `clusters`.
    pub cluster_sizes: &'a DeviceBuffer,
    /// Output: weighted sums, `features x clusters`.
    pub centroids_t: &'a DeviceBuffer,
    /// Output: indices of empty clusters in ascending order, `clusters`,
    /// index type. Entries past the count are left as they were.
    pub empty_clusters: &'a DeviceBuffer,
    /// Output: number of empty clusters, `1`, index type.
    pub n_empty_clusters: &'a DeviceBuffer,
}

/// Fold the shard copies into global statistics and list empty clusters.
pub fn reduce_stats(
    queue: &Queue,
    buffers: &ReductionBuffers<'_>,
    depends: &[Event],
) -> Result<KernelLaunch> {
    let b = buffers;
    let args = [
        arg("cluster_sizes_private_copies", b.size_copies, 2),
        arg("centroids_t_private_copies", b.sum_copies, 3),
        out("cluster_sizes", b.cluster_sizes, 1),
        out("centroids_t", b.centroids_t, 2),
        out("empty_clusters_list", b.empty_clusters, 1),
        out("n_empty_clusters", b.n_empty_clusters, 1),
    ];
    check_layout(&args)?;
    let (n_copies, n_clusters) = (args[0].extent(0), args[0].extent(1));
    let n_features = args[1].extent(1);
    args[1].expect_extent(0, n_copies)?;
    args[1].expect_extent(2, n_clusters)?;
    args[2].expect_extent(0, n_clusters)?;
    args[3].expect_extent(0, n_features)?;
    args[3].expect_extent(1, n_clusters)?;
    args[4].expect_extent(0, n_clusters)?;
    args[5].expect_extent(0, 1)?;
    check_placement(queue, &args)?;
    let dt = data_type(&args[..4])?;
    let it = index_type(&args[4..])?;
    check_index_capacity(it, n_clusters)?;

    let group = queue.limits().clamp_group(group_size::REDUCTION);
    debug!(
        "{}: {n_copies} copies, {n_clusters} clusters, {n_features} features {dt:?}/{it:?}",
        reduction::REDUCE
    );
    let launch = with_element_types!(dt, it, T, I, {
        queue.submit(
            reduction::REDUCE,
            vec![
                KernelArg::read("cluster_sizes_private_copies", b.size_copies),
                KernelArg::read("centroids_t_private_copies", b.sum_copies),
                KernelArg::write("cluster_sizes", b.cluster_sizes),
                KernelArg::write("centroids_t", b.centroids_t),
                KernelArg::write("empty_clusters_list", b.empty_clusters),
                KernelArg::write("n_empty_clusters", b.n_empty_clusters),
            ],
            depends,
            move |mut bound| {
                let size_copies = bound.take(0)?;
                let sum_copies = bound.take(1)?;
                let mut sizes = bound.take(2)?;
                let mut sums = bound.take(3)?;
                let mut empty = bound.take(4)?;
                let mut n_empty = bound.take(5)?;
                reduction::reduce_centroid_data(
                    size_copies.view::<T, Ix2>()?,
                    sum_copies.view::<T, Ix3>()?,
                    ReducedStats {
                        cluster_sizes: sizes.view_mut::<T, Ix1>()?,
                        centroids_t: sums.view_mut::<T, Ix2>()?,
                        empty_clusters: empty.view_mut::<I, Ix1>()?,
                        n_empty: n_empty.view_mut::<I, Ix1>()?,
                    },
                    group,
                )
            },
        )
    });
    Ok(launch)
}
