//! Windowed sample-to-centroid kernels.
//!
//! A compute group owns `work_group_size` consecutive samples. It walks the
//! centroids in windows of `centroids_window_height`; for each window it
//! stages the centroid coordinates tile by tile (`features_window_width`
//! features at a time) into group-local memory and lets every work-item
//! fold its own sample against the staged tile. The window is loaded once
//! per group and reused by all of its samples.

use std::ops::Range;

use ndarray::{ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis};

use super::for_each_group;
use crate::config::WindowConfig;
use crate::device::DeviceFault;
use crate::element::{DataElement, IndexElement};

pub(crate) const DISTANCES: &str = "compute_distances";
pub(crate) const ASSIGNMENT: &str = "assignment";

/// Group-local staging area for one centroid window.
struct CentroidWindow<T> {
    /// `height x width` tile, row per centroid.
    tile: Vec<T>,
    /// Per-item private accumulators, `items x height`.
    partial: Vec<T>,
    height: usize,
    width: usize,
}

impl<T: DataElement> CentroidWindow<T> {
    fn new(items: usize, window: &WindowConfig) -> Self {
        let height = window.centroids_window_height;
        let width = window.features_window_width;
        Self {
            tile: vec![T::zero(); height * width],
            partial: vec![T::zero(); items * height],
            height,
            width,
        }
    }

    /// Fold the samples in `samples` against every centroid of
    /// `clusters`, calling `on_window` with the accumulators once the
    /// window is complete.
    fn sweep<C, W>(
        &mut self,
        x_t: &ArrayView2<'_, T>,
        centroids_t: &ArrayView2<'_, T>,
        samples: Range<usize>,
        combine: C,
        mut on_window: W,
    ) where
        C: Fn(T, T, T) -> T,
        W: FnMut(Range<usize>, &[T]),
    {
        let n_features = x_t.nrows();
        let n_clusters = centroids_t.ncols();
        let items = samples.len();
        let height = self.height;

        let mut c0 = 0;
        while c0 < n_clusters {
            let c1 = (c0 + height).min(n_clusters);
            let rows = c1 - c0;
            self.partial[..items * height].fill(T::zero());

            let mut f0 = 0;
            while f0 < n_features {
                let f1 = (f0 + self.width).min(n_features);
                let cols = f1 - f0;
                for j in 0..rows {
                    for f in 0..cols {
                        self.tile[j * self.width + f] = centroids_t[[f0 + f, c0 + j]];
                    }
                }
                for (item, i) in samples.clone().enumerate() {
                    let acc = &mut self.partial[item * height..item * height + rows];
                    for (j, a) in acc.iter_mut().enumerate() {
                        let staged = &self.tile[j * self.width..j * self.width + cols];
                        for (f, &c) in staged.iter().enumerate() {
                            *a = combine(*a, x_t[[f0 + f, i]], c);
                        }
                    }
                }
                f0 = f1;
            }

            on_window(c0..c1, &self.partial[..items * height]);
            c0 = c1;
        }
    }
}

/// `out[c, i] = sum_f (x_t[f, i] - centroids_t[f, c])^2`
pub(crate) fn pairwise_distances<T: DataElement>(
    x_t: ArrayView2<'_, T>,
    centroids_t: ArrayView2<'_, T>,
    mut out: ArrayViewMut2<'_, T>,
    window: &WindowConfig,
) -> Result<(), DeviceFault> {
    let group = window.work_group_size;
    let groups: Vec<_> = out.axis_chunks_iter_mut(Axis(1), group).collect();
    for_each_group(groups, |g, mut block| {
        let first = g * group;
        let items = block.ncols();
        let height = window.centroids_window_height;
        let mut local = CentroidWindow::new(items, window);
        local.sweep(
            &x_t,
            &centroids_t,
            first..first + items,
            |acc, x, c| acc + (x - c) * (x - c),
            |clusters, partial| {
                for item in 0..items {
                    for (j, c) in clusters.clone().enumerate() {
                        block[[c, item]] = partial[item * height + j];
                    }
                }
            },
        );
        Ok(())
    })
}

/// Label every sample with its nearest centroid.
///
/// Compares `half_norms[c] - x . c`, which orders centroids the same way as
/// the squared distance. The first centroid reaching the minimum wins.
pub(crate) fn assign<T: DataElement, I: IndexElement>(
    x_t: ArrayView2<'_, T>,
    centroids_t: ArrayView2<'_, T>,
    half_norms: ArrayView1<'_, T>,
    mut assignment: ArrayViewMut1<'_, I>,
    window: &WindowConfig,
) -> Result<(), DeviceFault> {
    let group = window.work_group_size;
    let groups: Vec<_> = assignment.axis_chunks_iter_mut(Axis(0), group).collect();
    for_each_group(groups, |g, mut labels| {
        let first = g * group;
        let items = labels.len();
        let height = window.centroids_window_height;
        let mut best_value = vec![T::infinity(); items];
        let mut best_index = vec![0usize; items];
        let mut local = CentroidWindow::new(items, window);
        local.sweep(
            &x_t,
            &centroids_t,
            first..first + items,
            |acc, x, c| acc + x * c,
            |clusters, partial| {
                for item in 0..items {
                    for (j, c) in clusters.clone().enumerate() {
                        let value = half_norms[c] - partial[item * height + j];
                        if value < best_value[item] {
                            best_value[item] = value;
                            best_index[item] = c;
                        }
                    }
                }
            },
        );
        for (label, &c) in labels.iter_mut().zip(best_index.iter()) {
            *label = I::from_position(c);
        }
        Ok(())
    })
}
