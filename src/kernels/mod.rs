//! Device code.
//!
//! Every kernel is a plain generic function over ndarray views, instantiated
//! for one `(DataElement, IndexElement)` pair by [`ops`](crate::ops). Work is
//! split into compute groups that own disjoint slices of the output; groups
//! share nothing but read-only inputs and never synchronize with each
//! other. Aggregation across groups happens in a separate phase.

pub(crate) mod accumulate;
pub(crate) mod distance;
pub(crate) mod elementwise;
pub(crate) mod reduction;
pub(crate) mod relocation;
pub(crate) mod selection;

use crate::device::DeviceFault;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Run `body` once per group, on the rayon pool when available.
pub(crate) fn for_each_group<G, F>(groups: Vec<G>, body: F) -> Result<(), DeviceFault>
where
    G: Send,
    F: Fn(usize, G) -> Result<(), DeviceFault> + Send + Sync,
{
    #[cfg(feature = "parallel")]
    {
        groups
            .into_par_iter()
            .enumerate()
            .try_for_each(|(g, group)| body(g, group))
    }

    #[cfg(not(feature = "parallel"))]
    {
        groups
            .into_iter()
            .enumerate()
            .try_for_each(|(g, group)| body(g, group))
    }
}

/// Run `body` once per group and collect the per-group results in group
/// order.
pub(crate) fn map_groups<G, R, F>(groups: Vec<G>, body: F) -> Result<Vec<R>, DeviceFault>
where
    G: Send,
    R: Send,
    F: Fn(usize, G) -> Result<R, DeviceFault> + Send + Sync,
{
    #[cfg(feature = "parallel")]
    {
        groups
            .into_par_iter()
            .enumerate()
            .map(|(g, group)| body(g, group))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        groups
            .into_iter()
            .enumerate()
            .map(|(g, group)| body(g, group))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_groups_keeps_order() {
        let groups: Vec<Vec<u32>> = (0..50).map(|g| vec![g; 3]).collect();
        let sums = map_groups(groups, |g, items| {
            assert!(items.iter().all(|&v| v as usize == g));
            Ok(items.iter().sum::<u32>())
        })
        .unwrap();
        let expected: Vec<u32> = (0..50).map(|g| 3 * g).collect();
        assert_eq!(sums, expected);
    }

    #[test]
    fn test_first_fault_stops() {
        let groups: Vec<usize> = (0..8).collect();
        let err = for_each_group(groups, |_, g| {
            if g == 5 {
                Err(DeviceFault::new("test", "group 5"))
            } else {
                Ok(())
            }
        })
        .unwrap_err();
        assert_eq!(err.message(), "group 5");
    }
}
