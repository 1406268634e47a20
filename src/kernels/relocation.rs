//! Empty-cluster relocation.

use ndarray::{ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis};

use super::for_each_group;
use crate::device::DeviceFault;
use crate::element::{DataElement, IndexElement};

pub(crate) const RELOCATE: &str = "relocate_empty_clusters";

/// Read-only inputs of [`relocate_empty_clusters`].
pub(crate) struct RelocationInputs<'a, T, I> {
    pub(crate) x_t: ArrayView2<'a, T>,
    pub(crate) sample_weights: ArrayView1<'a, T>,
    pub(crate) assignment: ArrayView1<'a, I>,
    pub(crate) empty_clusters: ArrayView1<'a, I>,
    pub(crate) selected: ArrayView1<'a, I>,
}

/// Statistics updated in place by [`relocate_empty_clusters`].
pub(crate) struct RelocationTargets<'a, T> {
    pub(crate) centroids_t: ArrayViewMut2<'a, T>,
    pub(crate) cluster_sizes: ArrayViewMut1<'a, T>,
    pub(crate) per_sample_inertia: ArrayViewMut1<'a, T>,
}

#[derive(Debug, Clone, Copy)]
struct Move<T> {
    cluster: usize,
    sample: usize,
    donor: usize,
    weight: T,
}

fn position<I: IndexElement>(value: I, bound: usize, what: &str) -> Result<usize, DeviceFault> {
    value
        .to_position()
        .filter(|&p| p < bound)
        .ok_or_else(|| DeviceFault::new(RELOCATE, format!("{what} {value:?} outside 0..{bound}")))
}

/// Hand the `r`-th selected sample to the `r`-th empty cluster.
///
/// Works on the reduced, not yet normalized statistics: the empty
/// cluster's column becomes `w * x`, the same amount leaves the sample's
/// previous cluster, the weight moves between the sizes and the sample's
/// inertia drops to zero.
///
/// Faults without writing anything when a cluster or a sample appears
/// twice among the first `n_empty` entries, or when a selected sample has
/// no positive weight and so could not make its cluster non-empty.
pub(crate) fn relocate_empty_clusters<T: DataElement, I: IndexElement>(
    inputs: &RelocationInputs<'_, T, I>,
    targets: RelocationTargets<'_, T>,
    n_empty: usize,
    group: usize,
) -> Result<(), DeviceFault> {
    let n_samples = inputs.x_t.ncols();
    let n_clusters = targets.cluster_sizes.len();
    if inputs.empty_clusters.len() < n_empty || inputs.selected.len() < n_empty {
        return Err(DeviceFault::new(
            RELOCATE,
            format!("{n_empty} relocations requested, fewer entries available"),
        ));
    }

    let moves = (0..n_empty)
        .map(|r| {
            let cluster = position(inputs.empty_clusters[r], n_clusters, "empty cluster")?;
            let sample = position(inputs.selected[r], n_samples, "selected sample")?;
            let donor = position(inputs.assignment[sample], n_clusters, "assigned cluster")?;
            let weight = inputs.sample_weights[sample];
            if weight.is_nan() || weight <= T::zero() {
                return Err(DeviceFault::new(
                    RELOCATE,
                    format!("selected sample {sample} has weight {weight:?}"),
                ));
            }
            Ok(Move {
                cluster,
                sample,
                donor,
                weight,
            })
        })
        .collect::<Result<Vec<_>, DeviceFault>>()?;

    let mut claimed_clusters = vec![false; n_clusters];
    let mut claimed_samples = vec![false; n_samples];
    for m in &moves {
        if std::mem::replace(&mut claimed_clusters[m.cluster], true) {
            return Err(DeviceFault::new(
                RELOCATE,
                format!("empty cluster {} listed twice", m.cluster),
            ));
        }
        if std::mem::replace(&mut claimed_samples[m.sample], true) {
            return Err(DeviceFault::new(
                RELOCATE,
                format!("sample {} selected for two clusters", m.sample),
            ));
        }
    }

    let RelocationTargets {
        mut centroids_t,
        mut cluster_sizes,
        mut per_sample_inertia,
    } = targets;

    let blocks: Vec<_> = centroids_t.axis_chunks_iter_mut(Axis(0), group).collect();
    for_each_group(blocks, |g, mut rows| {
        let first = g * group;
        for (offset, mut row) in rows.rows_mut().into_iter().enumerate() {
            let f = first + offset;
            for m in &moves {
                let contribution = m.weight * inputs.x_t[[f, m.sample]];
                row[m.cluster] = contribution;
                row[m.donor] = row[m.donor] - contribution;
            }
        }
        Ok(())
    })?;

    for m in &moves {
        cluster_sizes[m.cluster] = m.weight;
        cluster_sizes[m.donor] = cluster_sizes[m.donor] - m.weight;
        per_sample_inertia[m.sample] = T::zero();
    }
    Ok(())
}
