//! GPU capability detection.

use ash::vk;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Detected GPU capabilities relevant to compute dispatch.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Device type (discrete, integrated, ...)
    pub device_type: vk::PhysicalDeviceType,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,

    /// Device-local memory in MB
    pub device_local_memory_mb: u64,

    // Compute limits
    /// Maximum compute workgroup size
    pub max_compute_workgroup_size: [u32; 3],
    /// Maximum compute workgroup invocations
    pub max_compute_workgroup_invocations: u32,
    /// Maximum compute workgroup count per dispatch
    pub max_compute_workgroup_count: [u32; 3],
    /// Maximum 3D image extent
    pub max_image_dimension_3d: u32,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let device_name = properties
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        let limits = properties.limits;

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            device_local_memory_mb,
            max_compute_workgroup_size: limits.max_compute_work_group_size,
            max_compute_workgroup_invocations: limits.max_compute_work_group_invocations,
            max_compute_workgroup_count: limits.max_compute_work_group_count,
            max_image_dimension_3d: limits.max_image_dimension3_d,
        }
    }

    /// Check the device can run a `local_size`³ shader over a grid with the
    /// given workgroup counts and 3D image extent.
    pub fn supports_dispatch(&self, local_size: u32, group_counts: [u32; 3], extent: [u32; 3]) -> bool {
        let api_major = vk::api_version_major(self.api_version);
        let api_minor = vk::api_version_minor(self.api_version);

        // synchronization2 barriers need Vulkan 1.3
        if api_major < 1 || (api_major == 1 && api_minor < 3) {
            return false;
        }

        if self
            .max_compute_workgroup_size
            .iter()
            .any(|&max| local_size > max)
        {
            return false;
        }

        if local_size.pow(3) > self.max_compute_workgroup_invocations {
            return false;
        }

        if group_counts
            .iter()
            .zip(self.max_compute_workgroup_count)
            .any(|(&count, max)| count > max)
        {
            return false;
        }

        extent.iter().all(|&axis| axis <= self.max_image_dimension_3d)
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            self.device_type,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> GpuCapabilities {
        GpuCapabilities {
            vendor: GpuVendor::Amd,
            device_name: "Test GPU".to_string(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            api_version: vk::make_api_version(0, 1, 3, 250),
            driver_version: 1,
            device_local_memory_mb: 8192,
            max_compute_workgroup_size: [1024, 1024, 64],
            max_compute_workgroup_invocations: 1024,
            max_compute_workgroup_count: [65535; 3],
            max_image_dimension_3d: 2048,
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn reference_dispatch_is_supported() {
        assert!(caps().supports_dispatch(8, [16, 8, 16], [128, 64, 128]));
    }

    #[test]
    fn dispatch_limits_are_enforced() {
        let mut small = caps();
        small.max_compute_workgroup_invocations = 256;
        assert!(!small.supports_dispatch(8, [16, 8, 16], [128, 64, 128]));

        assert!(!caps().supports_dispatch(8, [16, 8, 16], [4096, 64, 128]));

        let mut old = caps();
        old.api_version = vk::make_api_version(0, 1, 2, 0);
        assert!(!old.supports_dispatch(8, [16, 8, 16], [128, 64, 128]));
    }

    #[test]
    fn summary_names_device() {
        assert!(caps().summary().starts_with("Test GPU (Amd"));
    }
}
