//! Vulkan instance creation and physical device selection.

use crate::error::{GpuError, Result};
use ash::vk;
use std::borrow::Cow;
use std::ffi::{c_char, c_void, CStr, CString};

/// Instance extensions needed for a headless compute context.
pub fn required_instance_extensions(enable_validation: bool) -> Vec<&'static CStr> {
    let mut extensions = Vec::new();

    if enable_validation {
        extensions.push(ash::ext::debug_utils::NAME);
    }

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    extensions.push(ash::khr::portability_enumeration::NAME);

    extensions
}

/// Validation layers to enable when validation is requested.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Names from `requested` that do not appear in `available`.
pub fn missing_names<S: AsRef<str>>(requested: &[&CStr], available: &[S]) -> Vec<String> {
    requested
        .iter()
        .filter_map(|name| {
            let name = name.to_string_lossy();
            let found = available.iter().any(|a| a.as_ref() == name);
            (!found).then(|| name.into_owned())
        })
        .collect()
}

/// Debug-utils messenger routing validation output into `tracing`.
struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Owned Vulkan instance with an optional debug messenger.
///
/// Dropping it destroys the messenger and then the instance, so it must
/// outlive every device created from it.
pub struct Instance {
    // Entry must be kept alive for the lifetime of the instance
    entry: ash::Entry,
    instance: ash::Instance,
    debug_messenger: Option<DebugMessenger>,
}

impl Instance {
    /// Load Vulkan and create an instance.
    ///
    /// Every requested extension and layer is checked against what the
    /// loader reports; anything missing is an error.
    pub fn new(app_name: &str, enable_validation: bool) -> Result<Self> {
        let entry =
            unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        let version = unsafe { entry.try_enumerate_instance_version() }?
            .unwrap_or(vk::API_VERSION_1_0);
        tracing::info!(
            "System can support Vulkan version {}.{}.{}",
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version)
        );

        let app_name = CString::new(app_name)
            .map_err(|e| GpuError::InvalidState(format!("Invalid application name: {e}")))?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"voxelcast")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let extensions = required_instance_extensions(enable_validation);
        let layers = if enable_validation {
            validation_layers()
        } else {
            vec![]
        };

        unsafe { check_instance_support(&entry, &extensions, &layers) }?;

        let extension_names: Vec<*const c_char> =
            extensions.iter().map(|ext| ext.as_ptr()).collect();
        let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

        #[cfg(target_os = "macos")]
        let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        #[cfg(not(target_os = "macos"))]
        let create_flags = vk::InstanceCreateFlags::empty();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names)
            .flags(create_flags);

        let instance = unsafe { entry.create_instance(&create_info, None) }?;
        tracing::trace!("Vulkan instance created");

        let mut this = Self {
            entry,
            instance,
            debug_messenger: None,
        };

        // On failure `this` drops and takes the instance with it
        if enable_validation {
            this.debug_messenger = Some(unsafe { this.create_debug_messenger() }?);
            tracing::trace!("Debug messenger created");
        }

        Ok(this)
    }

    /// Get the Vulkan entry point.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get the Vulkan instance handle.
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Whether validation output is being routed to the log.
    pub fn has_debug_messenger(&self) -> bool {
        self.debug_messenger.is_some()
    }

    unsafe fn create_debug_messenger(&self) -> Result<DebugMessenger> {
        let loader = ash::ext::debug_utils::Instance::new(&self.entry, &self.instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vulkan_debug_callback));

        let messenger = loader.create_debug_utils_messenger(&create_info, None)?;

        Ok(DebugMessenger { loader, messenger })
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug) = self.debug_messenger.take() {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        tracing::trace!("Destroyed Vulkan instance");
    }
}

/// Fail if any requested extension or layer is unavailable.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
unsafe fn check_instance_support(
    entry: &ash::Entry,
    extensions: &[&CStr],
    layers: &[&CStr],
) -> Result<()> {
    if extensions.is_empty() && layers.is_empty() {
        return Ok(());
    }

    let available_extensions: Vec<String> = entry
        .enumerate_instance_extension_properties(None)?
        .iter()
        .filter_map(|props| props.extension_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect();

    let available_layers: Vec<String> = entry
        .enumerate_instance_layer_properties()?
        .iter()
        .filter_map(|props| props.layer_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect();

    tracing::trace!("Required extensions: {extensions:?}");
    tracing::trace!("Required layers: {layers:?}");

    if let Some(missing) = missing_names(extensions, available_extensions.as_slice()).pop() {
        return Err(GpuError::ExtensionNotSupported(missing));
    }

    if let Some(missing) = missing_names(layers, available_layers.as_slice()).pop() {
        tracing::info!("Validation layers need the Vulkan SDK to be installed");
        return Err(GpuError::LayerNotSupported(missing));
    }

    Ok(())
}

unsafe extern "system" fn vulkan_debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() || (*callback_data).p_message.is_null() {
        Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr((*callback_data).p_message).to_string_lossy()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "vulkan", "{message_type:?}: {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "vulkan", "{message_type:?}: {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::info!(target: "vulkan", "{message_type:?}: {message}");
    } else {
        tracing::trace!(target: "vulkan", "{message_type:?}: {message}");
    }

    vk::FALSE
}

/// Pick the best physical device that exposes a compute queue family.
///
/// Returns the device and the index of its compute queue family.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
) -> Result<(vk::PhysicalDevice, u32)> {
    let devices = instance.enumerate_physical_devices()?;

    if devices.is_empty() {
        return Err(GpuError::NoSuitableDevice);
    }

    let mut best = None;
    let mut best_score = -1i32;

    for device in devices {
        let properties = instance.get_physical_device_properties(device);
        let name = properties
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let Some(family) = find_compute_queue_family(instance, device) else {
            tracing::debug!("Skipping {name}: no compute queue family");
            continue;
        };

        let score = score_physical_device(instance, device);
        tracing::debug!("Candidate {name} ({:?}) score {score}", properties.device_type);

        if score > best_score {
            best_score = score;
            best = Some((device, family));
        }
    }

    best.ok_or(GpuError::NoSuitableDevice)
}

/// Find a queue family with compute support, preferring one without graphics.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn find_compute_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Option<u32> {
    let families = instance.get_physical_device_queue_family_properties(physical_device);
    let flags: Vec<vk::QueueFlags> = families.iter().map(|f| f.queue_flags).collect();
    pick_compute_family(&flags)
}

/// Queue family choice over raw flags: dedicated compute first, then any compute.
pub fn pick_compute_family(families: &[vk::QueueFlags]) -> Option<u32> {
    let dedicated = families.iter().position(|flags| {
        flags.contains(vk::QueueFlags::COMPUTE) && !flags.contains(vk::QueueFlags::GRAPHICS)
    });

    dedicated
        .or_else(|| {
            families
                .iter()
                .position(|flags| flags.contains(vk::QueueFlags::COMPUTE))
        })
        .map(|i| i as u32)
}

/// Score a physical device for selection, or -1 if unusable.
unsafe fn score_physical_device(instance: &ash::Instance, device: vk::PhysicalDevice) -> i32 {
    let properties = instance.get_physical_device_properties(device);

    // Check Vulkan 1.3 support
    let api_version = properties.api_version;
    if vk::api_version_major(api_version) < 1
        || (vk::api_version_major(api_version) == 1 && vk::api_version_minor(api_version) < 3)
    {
        return -1;
    }

    let mut score = 0;

    // Prefer discrete GPUs
    match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => score += 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => score += 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => score += 50,
        _ => {}
    }

    // Prefer more VRAM
    let memory = instance.get_physical_device_memory_properties(device);
    let vram_mb: u64 = memory
        .memory_heaps
        .iter()
        .take(memory.memory_heap_count as usize)
        .filter(|h| h.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|h| h.size / (1024 * 1024))
        .sum();
    score += (vram_mb / 1024) as i32; // +1 per GB

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_names_reports_only_absent() {
        let available = ["VK_EXT_debug_utils", "VK_KHR_surface"];
        let requested = [ash::ext::debug_utils::NAME, c"VK_KHR_fancy"];
        assert_eq!(missing_names(&requested, &available), vec!["VK_KHR_fancy"]);
        assert!(missing_names(&[], &available).is_empty());
    }

    #[test]
    fn validation_adds_debug_utils() {
        assert!(required_instance_extensions(true).contains(&ash::ext::debug_utils::NAME));
        assert!(!required_instance_extensions(false).contains(&ash::ext::debug_utils::NAME));
    }

    #[test]
    fn compute_family_prefers_dedicated() {
        let families = [
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            vk::QueueFlags::TRANSFER,
            vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        ];
        assert_eq!(pick_compute_family(&families), Some(2));
    }

    #[test]
    fn compute_family_falls_back_to_graphics() {
        let families = [
            vk::QueueFlags::TRANSFER,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        ];
        assert_eq!(pick_compute_family(&families), Some(1));
        assert_eq!(pick_compute_family(&[vk::QueueFlags::GRAPHICS]), None);
    }
}
