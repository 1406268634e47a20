//! Device limits and kernel tunables.

use crate::element::ElementType;
use crate::error::{Error, Result};

/// Work-group sizes of the kernels that do not expose one per call.
pub(crate) mod group_size {
    pub(crate) const BROADCAST_DIVIDE: usize = 32;
    pub(crate) const HALF_NORM: usize = 32;
    pub(crate) const CENTROID_SHIFT: usize = 128;
    pub(crate) const REDUCTION: usize = 256;
    pub(crate) const THRESHOLD: usize = 64;
    pub(crate) const SELECTION: usize = 64;
    pub(crate) const RELOCATION: usize = 64;
}

/// Samples per windowed work-group, relative to the sub-group width.
const PREFERRED_WORK_GROUP_MULTIPLIER: usize = 16;
/// Features per window tile, relative to the sub-group width.
const WINDOW_WIDTH_MULTIPLIER: usize = 4;

/// Hardware limits of an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Largest number of work-items in one compute group.
    pub max_work_group_size: usize,
    /// Bytes of group-local memory available to one compute group.
    pub local_memory_size: usize,
    /// Preferred sub-group width. Sizes the default window, see
    /// [`WindowConfig::for_device`].
    pub sub_group_size: usize,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_work_group_size: 1024,
            local_memory_size: 64 * 1024,
            sub_group_size: 8,
        }
    }
}

impl DeviceLimits {
    /// Set the maximum work-group size.
    pub fn with_max_work_group_size(mut self, size: usize) -> Self {
        self.max_work_group_size = size;
        self
    }

    /// Set the group-local memory size in bytes.
    pub fn with_local_memory_size(mut self, bytes: usize) -> Self {
        self.local_memory_size = bytes;
        self
    }

    /// Set the preferred sub-group width.
    pub fn with_sub_group_size(mut self, size: usize) -> Self {
        self.sub_group_size = size;
        self
    }

    /// Fit a fixed kernel group size to this device.
    pub(crate) fn clamp_group(&self, preferred: usize) -> usize {
        preferred.min(self.max_work_group_size).max(1)
    }
}

/// Tunables of the windowed kernels (`distance_matrix`, `assignment`).
///
/// Each compute group handles `work_group_size` samples and stages
/// `centroids_window_height` centroids at a time, `features_window_width`
/// features per tile, in group-local memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Samples per compute group.
    pub work_group_size: usize,
    /// Centroids staged per window.
    pub centroids_window_height: usize,
    /// Features staged per window tile.
    pub features_window_width: usize,
}

impl Default for WindowConfig {
    /// The window of [`DeviceLimits::default`].
    fn default() -> Self {
        Self::for_device(&DeviceLimits::default())
    }
}

impl WindowConfig {
    /// Window sized from the device's sub-group width, with the work-group
    /// size clamped to the device maximum.
    pub fn for_device(limits: &DeviceLimits) -> Self {
        let sub_group = limits.sub_group_size.max(1);
        Self {
            work_group_size: limits
                .clamp_group(sub_group.saturating_mul(PREFERRED_WORK_GROUP_MULTIPLIER)),
            centroids_window_height: 16,
            features_window_width: sub_group.saturating_mul(WINDOW_WIDTH_MULTIPLIER),
        }
    }

    /// Set samples per compute group.
    pub fn with_work_group_size(mut self, size: usize) -> Self {
        self.work_group_size = size;
        self
    }

    /// Set centroids per window.
    pub fn with_centroids_window_height(mut self, height: usize) -> Self {
        self.centroids_window_height = height;
        self
    }

    /// Set features per window tile.
    pub fn with_features_window_width(mut self, width: usize) -> Self {
        self.features_window_width = width;
        self
    }

    /// Group-local bytes one window occupies: the centroid tile plus one
    /// running value per staged centroid.
    pub fn local_memory_footprint(&self, element: ElementType) -> usize {
        let height = self.centroids_window_height;
        height
            .saturating_mul(self.features_window_width)
            .saturating_add(height)
            .saturating_mul(element.size_of())
    }

    /// Check the tunables against the device.
    pub fn validate(&self, limits: &DeviceLimits, element: ElementType) -> Result<()> {
        if self.work_group_size == 0 {
            return Err(Error::InvalidParameter {
                name: "work_group_size",
                message: "must be at least 1",
            });
        }
        if self.centroids_window_height == 0 {
            return Err(Error::InvalidParameter {
                name: "centroids_window_height",
                message: "must be at least 1",
            });
        }
        if self.features_window_width == 0 {
            return Err(Error::InvalidParameter {
                name: "features_window_width",
                message: "must be at least 1",
            });
        }
        if self.work_group_size > limits.max_work_group_size {
            return Err(Error::InvalidParameter {
                name: "work_group_size",
                message: "exceeds the device maximum work-group size",
            });
        }
        if self.local_memory_footprint(element) > limits.local_memory_size {
            return Err(Error::InvalidParameter {
                name: "centroids_window_height",
                message: "window does not fit in group-local memory",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fit_default_device() {
        let limits = DeviceLimits::default();
        let window = WindowConfig::default();
        assert!(window.validate(&limits, ElementType::F32).is_ok());
        assert!(window.validate(&limits, ElementType::F64).is_ok());
    }

    #[test]
    fn test_window_follows_sub_group_size() {
        assert_eq!(
            WindowConfig::default(),
            WindowConfig {
                work_group_size: 128,
                centroids_window_height: 16,
                features_window_width: 32,
            }
        );
        let narrow = DeviceLimits::default()
            .with_sub_group_size(16)
            .with_max_work_group_size(64);
        let window = WindowConfig::for_device(&narrow);
        assert_eq!(window.features_window_width, 64);
        assert_eq!(window.work_group_size, 64);
        assert!(window.validate(&narrow, ElementType::F64).is_ok());
    }

    #[test]
    fn test_footprint() {
        let window = WindowConfig::default()
            .with_centroids_window_height(4)
            .with_features_window_width(8);
        assert_eq!(window.local_memory_footprint(ElementType::F32), (4 * 8 + 4) * 4);
        assert_eq!(window.local_memory_footprint(ElementType::F64), (4 * 8 + 4) * 8);
    }

    #[test]
    fn test_rejects_bad_windows() {
        let limits = DeviceLimits::default().with_local_memory_size(1024);
        let zero = WindowConfig::default().with_work_group_size(0);
        assert!(matches!(
            zero.validate(&limits, ElementType::F32),
            Err(Error::InvalidParameter { name: "work_group_size", .. })
        ));

        let wide = WindowConfig::default().with_work_group_size(4096);
        assert!(wide.validate(&limits, ElementType::F32).is_err());

        // (16 * 32 + 16) * 4 = 2112 bytes > 1024
        let tall = WindowConfig::default();
        assert!(matches!(
            tall.validate(&limits, ElementType::F32),
            Err(Error::InvalidParameter { name: "centroids_window_height", .. })
        ));
    }

    #[test]
    fn test_clamp_group() {
        let limits = DeviceLimits::default().with_max_work_group_size(16);
        assert_eq!(limits.clamp_group(group_size::REDUCTION), 16);
        assert_eq!(limits.clamp_group(8), 8);
        let degenerate = DeviceLimits::default().with_max_work_group_size(0);
        assert_eq!(degenerate.clamp_group(32), 1);
    }
}
