use log::debug;
use ndarray::{Ix1, Ix2};

use super::{
    arg, check_index_capacity, check_layout, check_placement, data_type, index_type, out, with_data_type,
    with_element_types, DataType, IndexType,
};
use crate::config::group_size;
use crate::device::{DeviceBuffer, DeviceFault, Event, KernelArg, KernelLaunch, Queue};
use crate::element::IndexElement;
use crate::error::{Error, Result};
use crate::kernels::relocation::{self, RelocationInputs, RelocationTargets};
use crate::kernels::selection;

/// Write the `k`-th largest element of `data` (counting repeats) into
/// `threshold[0]`.
///
/// `k == 0` is valid and does nothing: the arguments are still validated,
/// `threshold` is left untouched and an already-complete launch is
/// returned.
pub fn order_statistic_threshold(
    queue: &Queue,
    data: &DeviceBuffer,
    k: usize,
    threshold: &DeviceBuffer,
    depends: &[Event],
) -> Result<KernelLaunch> {
    let dt = prepare_threshold(queue, data, k, threshold)?;
    Ok(submit_threshold(queue, dt, data, k, threshold, depends))
}

fn prepare_threshold(
    queue: &Queue,
    data: &DeviceBuffer,
    k: usize,
    threshold: &DeviceBuffer,
) -> Result<DataType> {
    let args = [arg("data", data, 1), out("threshold", threshold, 1)];
    check_layout(&args)?;
    args[1].expect_extent(0, 1)?;
    if k > args[0].extent(0) {
        return Err(Error::InvalidParameter {
            name: "k",
            message: "must not exceed the number of elements",
        });
    }
    check_placement(queue, &args)?;
    data_type(&args)
}

fn submit_threshold(
    queue: &Queue,
    dt: DataType,
    data: &DeviceBuffer,
    k: usize,
    threshold: &DeviceBuffer,
    depends: &[Event],
) -> KernelLaunch {
    if k == 0 {
        debug!("{}: k = 0, nothing to do", selection::THRESHOLD);
        return KernelLaunch::noop();
    }
    let group = queue.limits().clamp_group(group_size::THRESHOLD);
    debug!("{}: k = {k} of {} {dt:?}", selection::THRESHOLD, data.len());
    with_data_type!(dt, T, {
        queue.submit(
            selection::THRESHOLD,
            vec![KernelArg::read("data", data), KernelArg::write("threshold", threshold)],
            depends,
            move |mut bound| {
                let data = bound.take(0)?;
                let mut out = bound.take(1)?;
                let value = selection::kth_largest(data.view::<T, Ix1>()?, k, group)?;
                out.view_mut::<T, Ix1>()?[0] = value;
                Ok(())
            },
        )
    })
}

/// Buffers of [`select_far_samples`].
#[derive(Debug, Clone, Copy)]
pub struct SelectionBuffers<'a> {
    /// Distance of every sample to its centroid, `samples`.
    pub distances: &'a DeviceBuffer,
    /// Threshold from [`order_statistic_threshold`], `1`.
    pub threshold: &'a DeviceBuffer,
    /// Output: selected sample indices, at least `n_selected`, index type.
    pub selected: &'a DeviceBuffer,
    /// Output: number of samples strictly above the threshold, `1`.
    pub n_selected_gt_threshold: &'a DeviceBuffer,
    /// Output: number of samples equal to the threshold, `1`.
    pub n_selected_eq_threshold: &'a DeviceBuffer,
}

/// Select `n_selected` samples at or above the threshold.
///
/// Samples strictly above come first, farthest first with ties by index;
/// the remaining slots are filled with samples equal to the threshold in
/// ascending index order. Both counters report the full number of
/// qualifying samples, so `gt + eq < n_selected` means the output is short.
pub fn select_far_samples(
    queue: &Queue,
    n_selected: usize,
    buffers: &SelectionBuffers<'_>,
    depends: &[Event],
) -> Result<KernelLaunch> {
    let (dt, it) = prepare_selection(queue, n_selected, buffers)?;
    Ok(submit_selection(queue, dt, it, n_selected, buffers, depends))
}

fn prepare_selection(
    queue: &Queue,
    n_selected: usize,
    b: &SelectionBuffers<'_>,
) -> Result<(DataType, IndexType)> {
    let args = [
        arg("distance_to_centroid", b.distances, 1),
        arg("threshold", b.threshold, 1),
        out("selected_samples_idx", b.selected, 1),
        out("n_selected_gt_threshold", b.n_selected_gt_threshold, 1),
        out("n_selected_eq_threshold", b.n_selected_eq_threshold, 1),
    ];
    check_layout(&args)?;
    let n_samples = args[0].extent(0);
    args[1].expect_extent(0, 1)?;
    args[2].expect_at_least(0, n_selected)?;
    args[3].expect_extent(0, 1)?;
    args[4].expect_extent(0, 1)?;
    if n_selected == 0 {
        return Err(Error::InvalidParameter {
            name: "n_selected",
            message: "must be positive",
        });
    }
    if n_selected > n_samples {
        return Err(Error::InvalidParameter {
            name: "n_selected",
            message: "must not exceed the number of samples",
        });
    }
    check_placement(queue, &args)?;
    let dt = data_type(&args[..2])?;
    let it = index_type(&args[2..])?;
    check_index_capacity(it, n_samples)?;
    Ok((dt, it))
}

fn submit_selection(
    queue: &Queue,
    dt: DataType,
    it: IndexType,
    n_selected: usize,
    b: &SelectionBuffers<'_>,
    depends: &[Event],
) -> KernelLaunch {
    let group = queue.limits().clamp_group(group_size::SELECTION);
    debug!(
        "{}: {n_selected} of {} {dt:?}/{it:?}",
        selection::SELECT,
        b.distances.len()
    );
    with_element_types!(dt, it, T, I, {
        queue.submit(
            selection::SELECT,
            vec![
                KernelArg::read("distance_to_centroid", b.distances),
                KernelArg::read("threshold", b.threshold),
                KernelArg::write("selected_samples_idx", b.selected),
                KernelArg::write("n_selected_gt_threshold", b.n_selected_gt_threshold),
                KernelArg::write("n_selected_eq_threshold", b.n_selected_eq_threshold),
            ],
            depends,
            move |mut bound| {
                let distances = bound.take(0)?;
                let threshold = bound.take(1)?;
                let mut selected = bound.take(2)?;
                let mut gt = bound.take(3)?;
                let mut eq = bound.take(4)?;
                let counts = selection::select_far_samples(
                    distances.view::<T, Ix1>()?,
                    threshold.view::<T, Ix1>()?[0],
                    n_selected,
                    selected.view_mut::<I, Ix1>()?,
                    group,
                )?;
                gt.view_mut::<I, Ix1>()?[0] = I::from_position(counts.greater);
                eq.view_mut::<I, Ix1>()?[0] = I::from_position(counts.equal);
                Ok(())
            },
        )
    })
}

/// Buffers of [`relocate_empty_clusters`] and [`repair_empty_clusters`].
#[derive(Debug, Clone, Copy)]
pub struct RelocationBuffers<'a> {
    /// Samples, `features x samples`.
    pub x_t: &'a DeviceBuffer,
    /// Sample weights, `samples`.
    pub sample_weights: &'a DeviceBuffer,
    /// Cluster label per sample, `samples`, index type.
    pub assignment: &'a DeviceBuffer,
    /// Empty clusters from [`reduce_stats`](crate::reduce_stats), `clusters`.
    pub empty_clusters: &'a DeviceBuffer,
    /// Squared distance to the assigned centroid, `samples`.
    pub sq_dist: &'a DeviceBuffer,
    /// Reduced (unnormalized) weighted sums, `features x clusters`. Updated.
    pub centroids_t: &'a DeviceBuffer,
    /// Reduced cluster sizes, `clusters`. Updated.
    pub cluster_sizes: &'a DeviceBuffer,
    /// Weighted squared distance per sample, `samples`. Updated.
    pub per_sample_inertia: &'a DeviceBuffer,
}

/// Caller-owned scratch for [`repair_empty_clusters`].
#[derive(Debug, Clone, Copy)]
pub struct SelectionScratch<'a> {
    /// Threshold, `1`, data type.
    pub threshold: &'a DeviceBuffer,
    /// Selected sample indices, at least `n_empty_clusters`, index type.
    pub selected: &'a DeviceBuffer,
    /// Strictly-above counter, `1`, index type.
    pub n_selected_gt_threshold: &'a DeviceBuffer,
    /// Equal counter, `1`, index type.
    pub n_selected_eq_threshold: &'a DeviceBuffer,
}

/// Give each of the first `n_empty_clusters` empty clusters one sample
/// from `selected`, in order.
///
/// Runs on the reduced statistics before they are divided into centroids:
/// the empty cluster receives the sample's weighted coordinates and weight,
/// the sample's previous cluster loses them, and the sample's inertia
/// becomes zero. The launch faults without changing anything when a
/// sample or cluster repeats or a selected sample has no positive weight.
pub fn relocate_empty_clusters(
    queue: &Queue,
    n_empty_clusters: usize,
    buffers: &RelocationBuffers<'_>,
    selected: &DeviceBuffer,
    depends: &[Event],
) -> Result<KernelLaunch> {
    let (dt, it) = prepare_relocation(queue, n_empty_clusters, buffers, selected)?;
    Ok(submit_relocation(
        queue,
        dt,
        it,
        n_empty_clusters,
        buffers,
        selected,
        None,
        depends,
    ))
}

fn prepare_relocation(
    queue: &Queue,
    n_empty: usize,
    b: &RelocationBuffers<'_>,
    selected: &DeviceBuffer,
) -> Result<(DataType, IndexType)> {
    let args = [
        arg("x_t", b.x_t, 2),
        arg("sample_weights", b.sample_weights, 1),
        arg("sq_dist_to_nearest_centroid", b.sq_dist, 1),
        out("centroids_t", b.centroids_t, 2),
        out("cluster_sizes", b.cluster_sizes, 1),
        out("per_sample_inertia", b.per_sample_inertia, 1),
        arg("assignment_idx", b.assignment, 1),
        arg("empty_clusters_list", b.empty_clusters, 1),
        arg("selected_samples_idx", selected, 1),
    ];
    check_layout(&args)?;
    let (n_features, n_samples) = (args[0].extent(0), args[0].extent(1));
    let n_clusters = args[7].extent(0);
    args[1].expect_extent(0, n_samples)?;
    args[2].expect_extent(0, n_samples)?;
    args[3].expect_extent(0, n_features)?;
    args[3].expect_extent(1, n_clusters)?;
    args[4].expect_extent(0, n_clusters)?;
    args[5].expect_extent(0, n_samples)?;
    args[6].expect_extent(0, n_samples)?;
    args[8].expect_at_least(0, n_empty)?;
    if n_empty == 0 {
        return Err(Error::InvalidParameter {
            name: "n_empty_clusters",
            message: "must be non-zero",
        });
    }
    if n_empty > n_clusters || n_empty > n_samples {
        return Err(Error::InvalidParameter {
            name: "n_empty_clusters",
            message: "must not exceed the number of clusters or samples",
        });
    }
    check_placement(queue, &args)?;
    let dt = data_type(&args[..6])?;
    let it = index_type(&args[6..])?;
    check_index_capacity(it, n_samples.max(n_clusters))?;
    Ok((dt, it))
}

fn submit_relocation(
    queue: &Queue,
    dt: DataType,
    it: IndexType,
    n_empty: usize,
    b: &RelocationBuffers<'_>,
    selected: &DeviceBuffer,
    counters: Option<SelectionCounters<'_>>,
    depends: &[Event],
) -> KernelLaunch {
    let group = queue.limits().clamp_group(group_size::RELOCATION);
    debug!("{}: {n_empty} empty clusters {dt:?}/{it:?}", relocation::RELOCATE);
    let checked = counters.is_some();
    with_element_types!(dt, it, T, I, {
        let mut args = vec![
            KernelArg::read("x_t", b.x_t),
            KernelArg::read("sample_weights", b.sample_weights),
            KernelArg::read("assignment_idx", b.assignment),
            KernelArg::read("empty_clusters_list", b.empty_clusters),
            KernelArg::read("selected_samples_idx", selected),
            KernelArg::write("centroids_t", b.centroids_t),
            KernelArg::write("cluster_sizes", b.cluster_sizes),
            KernelArg::write("per_sample_inertia", b.per_sample_inertia),
            // held and read-locked so the selection input cannot change
            // underneath the relocation
            KernelArg::read("sq_dist_to_nearest_centroid", b.sq_dist),
        ];
        if let Some(c) = counters {
            args.push(KernelArg::read("n_selected_gt_threshold", c.greater));
            args.push(KernelArg::read("n_selected_eq_threshold", c.equal));
        }
        queue.submit(
            relocation::RELOCATE,
            args,
            depends,
            move |mut bound| {
                if checked {
                    let greater = bound.take(9)?;
                    let equal = bound.take(10)?;
                    let count = |n: I| n.to_position().unwrap_or(0);
                    let found = count(greater.view::<I, Ix1>()?[0])
                        .saturating_add(count(equal.view::<I, Ix1>()?[0]));
                    // a short selection leaves stale slots in `selected`
                    if found < n_empty {
                        return Err(DeviceFault::new(
                            relocation::RELOCATE,
                            format!("selection found {found} samples for {n_empty} empty clusters"),
                        ));
                    }
                }
                let x = bound.take(0)?;
                let w = bound.take(1)?;
                let labels = bound.take(2)?;
                let empty = bound.take(3)?;
                let picks = bound.take(4)?;
                let mut sums = bound.take(5)?;
                let mut sizes = bound.take(6)?;
                let mut inertia = bound.take(7)?;
                let inputs = RelocationInputs {
                    x_t: x.view::<T, Ix2>()?,
                    sample_weights: w.view::<T, Ix1>()?,
                    assignment: labels.view::<I, Ix1>()?,
                    empty_clusters: empty.view::<I, Ix1>()?,
                    selected: picks.view::<I, Ix1>()?,
                };
                relocation::relocate_empty_clusters(
                    &inputs,
                    RelocationTargets {
                        centroids_t: sums.view_mut::<T, Ix2>()?,
                        cluster_sizes: sizes.view_mut::<T, Ix1>()?,
                        per_sample_inertia: inertia.view_mut::<T, Ix1>()?,
                    },
                    n_empty,
                    group,
                )
            },
        )
    })
}

/// Counters written by the selection step of [`repair_empty_clusters`].
#[derive(Clone, Copy)]
struct SelectionCounters<'a> {
    greater: &'a DeviceBuffer,
    equal: &'a DeviceBuffer,
}

/// Threshold, select and relocate in one chain.
///
/// Picks the `n_empty_clusters` samples farthest from their centroids and
/// hands them to the empty clusters. Every step is validated before the
/// first one is queued; the returned launch is the relocation, which
/// depends on the selection, which depends on the threshold.
///
/// When fewer than `n_empty_clusters` samples qualify (NaN distances are
/// never selected), the relocation faults before touching the statistics.
pub fn repair_empty_clusters(
    queue: &Queue,
    n_empty_clusters: usize,
    buffers: &RelocationBuffers<'_>,
    scratch: &SelectionScratch<'_>,
    depends: &[Event],
) -> Result<KernelLaunch> {
    let n = n_empty_clusters;
    let selection = SelectionBuffers {
        distances: buffers.sq_dist,
        threshold: scratch.threshold,
        selected: scratch.selected,
        n_selected_gt_threshold: scratch.n_selected_gt_threshold,
        n_selected_eq_threshold: scratch.n_selected_eq_threshold,
    };
    let threshold_type = prepare_threshold(queue, buffers.sq_dist, n, scratch.threshold)?;
    let (select_dt, select_it) = prepare_selection(queue, n, &selection)?;
    let (dt, it) = prepare_relocation(queue, n, buffers, scratch.selected)?;

    let threshold = submit_threshold(queue, threshold_type, buffers.sq_dist, n, scratch.threshold, depends);
    let selected = submit_selection(
        queue,
        select_dt,
        select_it,
        n,
        &selection,
        &[threshold.compute],
    );
    Ok(submit_relocation(
        queue,
        dt,
        it,
        n,
        buffers,
        scratch.selected,
        Some(SelectionCounters {
            greater: scratch.n_selected_gt_threshold,
            equal: scratch.n_selected_eq_threshold,
        }),
        &[selected.compute],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Context;
    use crate::test_support::init;
    use ndarray::array;

    #[test]
    fn test_threshold_k_zero_is_noop() {
        init();
        let ctx = Context::new("test");
        let queue = Queue::new(&ctx).unwrap();
        let data = DeviceBuffer::from_array(&ctx, array![1.0f32, 2.0]);
        let threshold = DeviceBuffer::from_array(&ctx, array![-4.0f32]);
        let launch = order_statistic_threshold(&queue, &data, 0, &threshold, &[]).unwrap();
        assert!(launch.compute.is_complete());
        assert_eq!(threshold.to_vec::<f32>().unwrap(), vec![-4.0]);

        // still validated
        let err = order_statistic_threshold(&queue, &data, 3, &threshold, &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { name: "k", .. }));
        let wide = DeviceBuffer::zeros::<f32>(&ctx, &[2]);
        assert!(order_statistic_threshold(&queue, &data, 0, &wide, &[]).is_err());
    }

    #[test]
    fn test_threshold_and_select() {
        let ctx = Context::new("test");
        let queue = Queue::new(&ctx).unwrap();
        let d = DeviceBuffer::from_array(&ctx, array![4.0f64, 1.0, 4.0, 7.0, 2.0]);
        let threshold = DeviceBuffer::zeros::<f64>(&ctx, &[1]);
        let selected = DeviceBuffer::from_array(&ctx, array![-1i32, -1, -1, -1]);
        let gt = DeviceBuffer::zeros::<i32>(&ctx, &[1]);
        let eq = DeviceBuffer::zeros::<i32>(&ctx, &[1]);
        let t = order_statistic_threshold(&queue, &d, 2, &threshold, &[]).unwrap();
        let s = select_far_samples(
            &queue,
            2,
            &SelectionBuffers {
                distances: &d,
                threshold: &threshold,
                selected: &selected,
                n_selected_gt_threshold: &gt,
                n_selected_eq_threshold: &eq,
            },
            &[t.compute],
        )
        .unwrap();
        s.wait().unwrap();
        assert_eq!(threshold.to_vec::<f64>().unwrap(), vec![4.0]);
        assert_eq!(selected.to_vec::<i32>().unwrap(), vec![3, 0, -1, -1]);
        assert_eq!(gt.to_vec::<i32>().unwrap(), vec![1]);
        assert_eq!(eq.to_vec::<i32>().unwrap(), vec![2]);
    }

    #[test]
    fn test_selection_rejects_degenerate_counts() {
        let ctx = Context::new("test");
        let queue = Queue::new(&ctx).unwrap();
        let d = DeviceBuffer::zeros::<f32>(&ctx, &[3]);
        let threshold = DeviceBuffer::zeros::<f32>(&ctx, &[1]);
        let selected = DeviceBuffer::zeros::<i64>(&ctx, &[5]);
        let gt = DeviceBuffer::zeros::<i64>(&ctx, &[1]);
        let eq = DeviceBuffer::zeros::<i64>(&ctx, &[1]);
        let buffers = SelectionBuffers {
            distances: &d,
            threshold: &threshold,
            selected: &selected,
            n_selected_gt_threshold: &gt,
            n_selected_eq_threshold: &eq,
        };
        assert!(matches!(
            select_far_samples(&queue, 0, &buffers, &[]),
            Err(Error::InvalidParameter { name: "n_selected", .. })
        ));
        assert!(matches!(
            select_far_samples(&queue, 4, &buffers, &[]),
            Err(Error::InvalidParameter { name: "n_selected", .. })
        ));
        let short = DeviceBuffer::zeros::<i64>(&ctx, &[1]);
        assert!(matches!(
            select_far_samples(&queue, 2, &SelectionBuffers { selected: &short, ..buffers }, &[]),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_relocation_rejects_zero_empty_clusters() {
        let ctx = Context::new("test");
        let queue = Queue::new(&ctx).unwrap();
        let x = DeviceBuffer::zeros::<f32>(&ctx, &[2, 4]);
        let w = DeviceBuffer::zeros::<f32>(&ctx, &[4]);
        let labels = DeviceBuffer::zeros::<i32>(&ctx, &[4]);
        let empty = DeviceBuffer::zeros::<i32>(&ctx, &[2]);
        let sq = DeviceBuffer::zeros::<f32>(&ctx, &[4]);
        let sums = DeviceBuffer::zeros::<f32>(&ctx, &[2, 2]);
        let sizes = DeviceBuffer::zeros::<f32>(&ctx, &[2]);
        let inertia = DeviceBuffer::zeros::<f32>(&ctx, &[4]);
        let selected = DeviceBuffer::zeros::<i32>(&ctx, &[2]);
        let buffers = RelocationBuffers {
            x_t: &x,
            sample_weights: &w,
            assignment: &labels,
            empty_clusters: &empty,
            sq_dist: &sq,
            centroids_t: &sums,
            cluster_sizes: &sizes,
            per_sample_inertia: &inertia,
        };
        assert!(matches!(
            relocate_empty_clusters(&queue, 0, &buffers, &selected, &[]),
            Err(Error::InvalidParameter { name: "n_empty_clusters", .. })
        ));
        let mixed = DeviceBuffer::zeros::<i64>(&ctx, &[2]);
        assert!(matches!(
            relocate_empty_clusters(&queue, 1, &buffers, &mixed, &[]),
            Err(Error::ElementTypeMismatch { argument: "selected_samples_idx", .. })
        ));
    }

    #[test]
    fn test_repair_validates_before_queueing() {
        let ctx = Context::new("test");
        let queue = Queue::new(&ctx).unwrap();
        let x = DeviceBuffer::zeros::<f32>(&ctx, &[1, 2]);
        let w = DeviceBuffer::zeros::<f32>(&ctx, &[2]);
        let labels = DeviceBuffer::zeros::<i32>(&ctx, &[2]);
        let empty = DeviceBuffer::zeros::<i32>(&ctx, &[2]);
        let sq = DeviceBuffer::zeros::<f32>(&ctx, &[2]);
        // wrong number of clusters
        let sums = DeviceBuffer::zeros::<f32>(&ctx, &[1, 3]);
        let sizes = DeviceBuffer::zeros::<f32>(&ctx, &[2]);
        let inertia = DeviceBuffer::zeros::<f32>(&ctx, &[2]);
        let threshold = DeviceBuffer::from_array(&ctx, array![5.0f32]);
        let selected = DeviceBuffer::zeros::<i32>(&ctx, &[2]);
        let gt = DeviceBuffer::zeros::<i32>(&ctx, &[1]);
        let eq = DeviceBuffer::zeros::<i32>(&ctx, &[1]);
        let err = repair_empty_clusters(
            &queue,
            1,
            &RelocationBuffers {
                x_t: &x,
                sample_weights: &w,
                assignment: &labels,
                empty_clusters: &empty,
                sq_dist: &sq,
                centroids_t: &sums,
                cluster_sizes: &sizes,
                per_sample_inertia: &inertia,
            },
            &SelectionScratch {
                threshold: &threshold,
                selected: &selected,
                n_selected_gt_threshold: &gt,
                n_selected_eq_threshold: &eq,
            },
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        queue.barrier().wait().unwrap();
        assert_eq!(threshold.to_vec::<f32>().unwrap(), vec![5.0]);
    }

    #[test]
    fn test_selection_rejects_shared_counter() {
        let ctx = Context::new("test");
        let queue = Queue::new(&ctx).unwrap();
        let d = DeviceBuffer::from_array(&ctx, array![3.0f32, 1.0]);
        let threshold = DeviceBuffer::from_array(&ctx, array![1.0f32]);
        let selected = DeviceBuffer::zeros::<i32>(&ctx, &[2]);
        let count = DeviceBuffer::zeros::<i32>(&ctx, &[1]);
        let err = select_far_samples(
            &queue,
            1,
            &SelectionBuffers {
                distances: &d,
                threshold: &threshold,
                selected: &selected,
                n_selected_gt_threshold: &count,
                n_selected_eq_threshold: &count,
            },
            &[],
        )
        .unwrap_err();
        assert_eq!(
            err,
            Error::AliasedArguments {
                first: "n_selected_gt_threshold",
                second: "n_selected_eq_threshold",
            }
        );
    }

    #[test]
    fn test_repair_faults_when_selection_is_short() {
        init();
        let ctx = Context::new("test");
        let queue = Queue::new(&ctx).unwrap();
        let x = DeviceBuffer::from_array(&ctx, array![[1.0f32, 5.0, 9.0]]);
        let w = DeviceBuffer::from_array(&ctx, array![1.0f32, 1.0, 1.0]);
        let labels = DeviceBuffer::zeros::<i32>(&ctx, &[3]);
        let empty = DeviceBuffer::from_array(&ctx, array![1i32, 2, -1]);
        // only one sample is at or above the threshold once NaN is skipped
        let sq = DeviceBuffer::from_array(&ctx, array![f32::NAN, 25.0, 1.0]);
        let sums = DeviceBuffer::from_array(&ctx, array![[15.0f32, 0.0, 0.0]]);
        let sizes = DeviceBuffer::from_array(&ctx, array![3.0f32, 0.0, 0.0]);
        let inertia = DeviceBuffer::from_array(&ctx, array![0.5f32, 25.0, 1.0]);
        let threshold = DeviceBuffer::zeros::<f32>(&ctx, &[1]);
        // left over from an earlier round
        let selected = DeviceBuffer::from_array(&ctx, array![1i32, 1]);
        let gt = DeviceBuffer::zeros::<i32>(&ctx, &[1]);
        let eq = DeviceBuffer::zeros::<i32>(&ctx, &[1]);

        let launch = repair_empty_clusters(
            &queue,
            2,
            &RelocationBuffers {
                x_t: &x,
                sample_weights: &w,
                assignment: &labels,
                empty_clusters: &empty,
                sq_dist: &sq,
                centroids_t: &sums,
                cluster_sizes: &sizes,
                per_sample_inertia: &inertia,
            },
            &SelectionScratch {
                threshold: &threshold,
                selected: &selected,
                n_selected_gt_threshold: &gt,
                n_selected_eq_threshold: &eq,
            },
            &[],
        )
        .unwrap();
        let fault = launch.wait().unwrap_err();
        assert_eq!(fault.kernel(), relocation::RELOCATE);

        assert_eq!(gt.to_vec::<i32>().unwrap(), vec![0]);
        assert_eq!(eq.to_vec::<i32>().unwrap(), vec![1]);
        assert_eq!(sums.to_vec::<f32>().unwrap(), vec![15.0, 0.0, 0.0]);
        assert_eq!(sizes.to_vec::<f32>().unwrap(), vec![3.0, 0.0, 0.0]);
        assert_eq!(inertia.to_vec::<f32>().unwrap(), vec![0.5, 25.0, 1.0]);
    }

    #[test]
    fn test_relocation_faults_on_repeated_sample() {
        let ctx = Context::new("test");
        let queue = Queue::new(&ctx).unwrap();
        let x = DeviceBuffer::from_array(&ctx, array![[1.0f64, 5.0, 9.0]]);
        let w = DeviceBuffer::from_array(&ctx, array![1.0f64, 1.0, 1.0]);
        let labels = DeviceBuffer::zeros::<i64>(&ctx, &[3]);
        let empty = DeviceBuffer::from_array(&ctx, array![1i64, 2, -1]);
        let sq = DeviceBuffer::zeros::<f64>(&ctx, &[3]);
        let sums = DeviceBuffer::from_array(&ctx, array![[15.0f64, 0.0, 0.0]]);
        let sizes = DeviceBuffer::from_array(&ctx, array![3.0f64, 0.0, 0.0]);
        let inertia = DeviceBuffer::zeros::<f64>(&ctx, &[3]);
        let selected = DeviceBuffer::from_array(&ctx, array![2i64, 2]);
        let buffers = RelocationBuffers {
            x_t: &x,
            sample_weights: &w,
            assignment: &labels,
            empty_clusters: &empty,
            sq_dist: &sq,
            centroids_t: &sums,
            cluster_sizes: &sizes,
            per_sample_inertia: &inertia,
        };
        let launch = relocate_empty_clusters(&queue, 2, &buffers, &selected, &[]).unwrap();
        assert!(launch.wait().is_err());
        assert_eq!(sums.to_vec::<f64>().unwrap(), vec![15.0, 0.0, 0.0]);
        assert_eq!(sizes.to_vec::<f64>().unwrap(), vec![3.0, 0.0, 0.0]);
    }
}
