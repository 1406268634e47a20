use log::debug;
use ndarray::{Ix1, Ix2};

use super::{arg, check_layout, check_placement, data_type, out, with_data_type};
use crate::config::group_size;
use crate::device::{DeviceBuffer, Event, KernelArg, KernelLaunch, Queue};
use crate::error::Result;
use crate::kernels::elementwise as kernel;

/// Divide every row of `matrix` (R x K) by `vector` (K), in place.
///
/// Entries of `vector` must be non-zero; division by zero is not checked.
/// In the Lloyd iteration this turns reduced sums into centroids, which is
/// why empty clusters have to be relocated first.
pub fn broadcast_divide(
    queue: &Queue,
    matrix: &DeviceBuffer,
    vector: &DeviceBuffer,
    depends: &[Event],
) -> Result<KernelLaunch> {
    let args = [out("matrix", matrix, 2), arg("vector", vector, 1)];
    check_layout(&args)?;
    args[1].expect_extent(0, args[0].extent(1))?;
    check_placement(queue, &args)?;
    let dt = data_type(&args)?;

    let group = queue.limits().clamp_group(group_size::BROADCAST_DIVIDE);
    debug!(
        "{}: {}x{} {dt:?}",
        kernel::BROADCAST_DIVIDE,
        args[0].extent(0),
        args[0].extent(1)
    );
    let launch = with_data_type!(dt, T, {
        queue.submit(
            kernel::BROADCAST_DIVIDE,
            vec![KernelArg::write("matrix", matrix), KernelArg::read("vector", vector)],
            depends,
            move |mut bound| {
                let mut matrix = bound.take(0)?;
                let vector = bound.take(1)?;
                kernel::broadcast_divide(matrix.view_mut::<T, Ix2>()?, vector.view::<T, Ix1>()?, group)
            },
        )
    });
    Ok(launch)
}

/// `norms[c] = 0.5 * ||centroids_t[:, c]||^2` for a `features x clusters`
/// centroid matrix.
pub fn half_norm_squared(
    queue: &Queue,
    centroids_t: &DeviceBuffer,
    norms: &DeviceBuffer,
    depends: &[Event],
) -> Result<KernelLaunch> {
    let args = [arg("centroids_t", centroids_t, 2), out("norms", norms, 1)];
    check_layout(&args)?;
    args[1].expect_extent(0, args[0].extent(1))?;
    check_placement(queue, &args)?;
    let dt = data_type(&args)?;

    let group = queue.limits().clamp_group(group_size::HALF_NORM);
    debug!(
        "{}: {} clusters, {} features {dt:?}",
        kernel::HALF_NORM,
        args[0].extent(1),
        args[0].extent(0)
    );
    let launch = with_data_type!(dt, T, {
        queue.submit(
            kernel::HALF_NORM,
            vec![KernelArg::read("centroids_t", centroids_t), KernelArg::write("norms", norms)],
            depends,
            move |mut bound| {
                let centroids = bound.take(0)?;
                let mut norms = bound.take(1)?;
                kernel::half_l2_norm_squared(centroids.view::<T, Ix2>()?, norms.view_mut::<T, Ix1>()?, group)
            },
        )
    });
    Ok(launch)
}

/// Squared displacement of every centroid between two iterations.
pub fn centroid_shift(
    queue: &Queue,
    old_centroids_t: &DeviceBuffer,
    new_centroids_t: &DeviceBuffer,
    shift: &DeviceBuffer,
    depends: &[Event],
) -> Result<KernelLaunch> {
    let args = [
        arg("old_centroids_t", old_centroids_t, 2),
        arg("new_centroids_t", new_centroids_t, 2),
        out("centroid_shifts", shift, 1),
    ];
    check_layout(&args)?;
    args[1].expect_extent(0, args[0].extent(0))?;
    args[1].expect_extent(1, args[0].extent(1))?;
    args[2].expect_extent(0, args[0].extent(1))?;
    check_placement(queue, &args)?;
    let dt = data_type(&args)?;

    let group = queue.limits().clamp_group(group_size::CENTROID_SHIFT);
    debug!("{}: {} clusters {dt:?}", kernel::CENTROID_SHIFT, args[0].extent(1));
    let launch = with_data_type!(dt, T, {
        queue.submit(
            kernel::CENTROID_SHIFT,
            vec![
                KernelArg::read("old_centroids_t", old_centroids_t),
                KernelArg::read("new_centroids_t", new_centroids_t),
                KernelArg::write("centroid_shifts", shift),
            ],
            depends,
            move |mut bound| {
                let old = bound.take(0)?;
                let new = bound.take(1)?;
                let mut shift = bound.take(2)?;
                kernel::centroid_shift(
                    old.view::<T, Ix2>()?,
                    new.view::<T, Ix2>()?,
                    shift.view_mut::<T, Ix1>()?,
                    group,
                )
            },
        )
    });
    Ok(launch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Context;
    use crate::error::Error;
    use crate::test_support::init;
    use ndarray::array;

    #[test]
    fn test_half_norm_and_shift() {
        init();
        let ctx = Context::new("test");
        let queue = Queue::new(&ctx).unwrap();
        let old = DeviceBuffer::from_array(&ctx, array![[0.0f64, 3.0], [0.5, 4.0]]);
        let new = DeviceBuffer::from_array(&ctx, array![[0.0f64, 0.0], [0.5, 0.0]]);
        let norms = DeviceBuffer::zeros::<f64>(&ctx, &[2]);
        let shift = DeviceBuffer::zeros::<f64>(&ctx, &[2]);

        let hn = half_norm_squared(&queue, &old, &norms, &[]).unwrap();
        let sh = centroid_shift(&queue, &old, &new, &shift, &[hn.compute.clone()]).unwrap();
        sh.wait().unwrap();
        assert_eq!(norms.to_vec::<f64>().unwrap(), vec![0.125, 12.5]);
        assert_eq!(shift.to_vec::<f64>().unwrap(), vec![0.0, 25.0]);
    }

    #[test]
    fn test_broadcast_divide_in_place() {
        let ctx = Context::new("test");
        let queue = Queue::new(&ctx).unwrap();
        let m = DeviceBuffer::from_array(&ctx, array![[2.0f32, 6.0], [4.0, 3.0]]);
        let v = DeviceBuffer::from_array(&ctx, array![2.0f32, 3.0]);
        broadcast_divide(&queue, &m, &v, &[]).unwrap().wait().unwrap();
        assert_eq!(m.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 2.0, 1.0]);
    }

    #[test]
    fn test_rejections_queue_nothing() {
        let ctx = Context::new("test");
        let queue = Queue::new(&ctx).unwrap();
        let m = DeviceBuffer::from_array(&ctx, array![[2.0f32, 6.0], [4.0, 3.0]]);
        let short = DeviceBuffer::from_array(&ctx, array![2.0f32]);
        assert!(matches!(
            broadcast_divide(&queue, &m, &short, &[]),
            Err(Error::ShapeMismatch { .. })
        ));

        let wide = DeviceBuffer::from_array(&ctx, array![2.0f64, 3.0]);
        assert!(matches!(
            broadcast_divide(&queue, &m, &wide, &[]),
            Err(Error::ElementTypeMismatch { argument: "vector", .. })
        ));

        let ints = DeviceBuffer::from_array(&ctx, array![[1i32, 2], [3, 4]]);
        let int_norms = DeviceBuffer::zeros::<i32>(&ctx, &[2]);
        assert!(matches!(
            half_norm_squared(&queue, &ints, &int_norms, &[]),
            Err(Error::UnsupportedElementType { argument: "centroids_t", .. })
        ));

        queue.barrier().wait().unwrap();
        assert_eq!(m.to_vec::<f32>().unwrap(), vec![2.0, 6.0, 4.0, 3.0]);
    }

    #[test]
    fn test_shift_against_itself_is_zero() {
        init();
        let ctx = Context::new("test");
        let queue = Queue::new(&ctx).unwrap();
        let c = DeviceBuffer::from_array(&ctx, array![[1.5f32, -2.0, 7.0], [0.25, 3.0, -1.0]]);
        let shift = DeviceBuffer::from_array(&ctx, array![9.0f32, 9.0, 9.0]);
        centroid_shift(&queue, &c, &c, &shift, &[]).unwrap().wait().unwrap();
        assert_eq!(shift.to_vec::<f32>().unwrap(), vec![0.0; 3]);
        assert_eq!(c.to_vec::<f32>().unwrap(), vec![1.5, -2.0, 7.0, 0.25, 3.0, -1.0]);
    }
}
