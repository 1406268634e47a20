//! Top-k threshold and far-sample selection.

use std::cmp::Ordering;

use ndarray::{ArrayView1, ArrayViewMut1, Axis};

use super::map_groups;
use crate::device::DeviceFault;
use crate::element::{DataElement, IndexElement};

pub(crate) const THRESHOLD: &str = "compute_threshold";
pub(crate) const SELECT: &str = "select_samples_far_from_centroid";

const RADIX_BITS: u32 = 8;
const BINS: usize = 1 << RADIX_BITS;

/// The k-th largest element of `data`, counting multiplicity.
///
/// Radix select over [`DataElement::order_key`], most significant digit
/// first. Each pass builds per-group histograms of the next digit among the
/// keys still matching the chosen prefix, merges them, and fixes the digit
/// that holds the k-th largest key. The result depends only on the values,
/// never on how they were grouped.
pub(crate) fn kth_largest<T: DataElement>(
    data: ArrayView1<'_, T>,
    k: usize,
    group: usize,
) -> Result<T, DeviceFault> {
    if k == 0 || k > data.len() {
        return Err(DeviceFault::new(
            THRESHOLD,
            format!("k = {k} outside 1..={}", data.len()),
        ));
    }

    let mut prefix = 0u64;
    let mut remaining = k;
    let passes = T::KEY_BITS / RADIX_BITS;
    for pass in 0..passes {
        let shift = T::KEY_BITS - RADIX_BITS * (pass + 1);
        let fixed_mask = if pass == 0 { 0 } else { !0u64 << (shift + RADIX_BITS) };

        let chunks: Vec<_> = data.axis_chunks_iter(Axis(0), group).collect();
        let partial = map_groups(chunks, |_, chunk| {
            let mut histogram = [0usize; BINS];
            for &value in chunk.iter() {
                let key = value.order_key();
                if key & fixed_mask == prefix {
                    histogram[((key >> shift) & (BINS as u64 - 1)) as usize] += 1;
                }
            }
            Ok(histogram)
        })?;

        let mut histogram = [0usize; BINS];
        for h in &partial {
            for (total, &count) in histogram.iter_mut().zip(h.iter()) {
                *total += count;
            }
        }

        let mut digit = None;
        for d in (0..BINS).rev() {
            if histogram[d] >= remaining {
                digit = Some(d);
                break;
            }
            remaining -= histogram[d];
        }
        let digit = digit.ok_or_else(|| DeviceFault::new(THRESHOLD, "radix histogram lost elements"))?;
        prefix |= (digit as u64) << shift;
    }
    Ok(T::from_order_key(prefix))
}

/// Counts reported by [`select_far_samples`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SelectionCounts {
    pub(crate) greater: usize,
    pub(crate) equal: usize,
}

/// Write up to `n_selected` indices of samples at or above `threshold`
/// into `selected`: every sample strictly above it first (farthest first,
/// then by index), then samples equal to it in ascending index order.
///
/// NaN compares neither above nor equal and is never selected.
pub(crate) fn select_far_samples<T: DataElement, I: IndexElement>(
    distances: ArrayView1<'_, T>,
    threshold: T,
    n_selected: usize,
    mut selected: ArrayViewMut1<'_, I>,
    group: usize,
) -> Result<SelectionCounts, DeviceFault> {
    if selected.len() < n_selected {
        return Err(DeviceFault::new(
            SELECT,
            format!("output holds {} indices, {n_selected} requested", selected.len()),
        ));
    }

    let chunks: Vec<_> = distances.axis_chunks_iter(Axis(0), group).collect();
    let candidates = map_groups(chunks, |g, chunk| {
        let first = g * group;
        let mut greater = Vec::new();
        let mut equal = Vec::new();
        for (offset, &d) in chunk.iter().enumerate() {
            if d > threshold {
                greater.push((d, first + offset));
            } else if d == threshold {
                equal.push(first + offset);
            }
        }
        Ok((greater, equal))
    })?;

    let mut greater: Vec<(T, usize)> = Vec::new();
    let mut equal: Vec<usize> = Vec::new();
    for (g, e) in candidates {
        greater.extend(g);
        equal.extend(e);
    }
    greater.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then(a.1.cmp(&b.1))
    });

    let picks = greater
        .iter()
        .map(|&(_, i)| i)
        .chain(equal.iter().copied())
        .take(n_selected);
    for (slot, i) in selected.iter_mut().zip(picks) {
        *slot = I::from_position(i);
    }

    Ok(SelectionCounts {
        greater: greater.len(),
        equal: equal.len(),
    })
}
