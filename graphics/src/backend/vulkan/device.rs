//! Physical device selection, logical device, allocator and command pool.

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};

use crate::error::GraphicsError;

/// The selected GPU and the queue family everything is submitted to.
#[derive(Debug, Clone, Copy)]
pub(super) struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub queue_family: u32,
}

/// Pick the highest scoring GPU with a graphics queue.
///
/// Discrete GPUs beat integrated ones; ties go to the larger 2D image limit.
pub(super) fn select_physical_device(
    instance: &ash::Instance,
) -> Result<SelectedDevice, GraphicsError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to enumerate physical devices: {e:?}"))
    })?;
    if devices.is_empty() {
        return Err(GraphicsError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best: Option<(u32, SelectedDevice)> = None;
    for physical_device in devices {
        let Some(queue_family) = find_graphics_queue_family(instance, physical_device) else {
            continue;
        };
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        let mut score = properties.limits.max_image_dimension2_d / 1024;
        score += match properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            _ => 0,
        };
        log::info!(
            "Found GPU: {:?} (type: {:?}, score: {})",
            properties.device_name_as_c_str().unwrap_or(c"<unnamed>"),
            properties.device_type,
            score
        );

        if best.is_none_or(|(best_score, _)| score > best_score) {
            best = Some((
                score,
                SelectedDevice {
                    physical_device,
                    queue_family,
                },
            ));
        }
    }

    best.map(|(_, device)| device)
        .ok_or_else(|| GraphicsError::InitializationFailed("No suitable GPU found".to_string()))
}

fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Option<u32> {
    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    families
        .iter()
        .position(|family| {
            family
                .queue_flags
                .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .map(|index| index as u32)
}

/// Create the logical device with dynamic rendering enabled.
pub(super) fn create_logical_device(
    instance: &ash::Instance,
    selected: SelectedDevice,
) -> Result<ash::Device, GraphicsError> {
    let priorities = [1.0f32];
    let queue_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(selected.queue_family)
        .queue_priorities(&priorities)];

    let extensions = [ash::khr::dynamic_rendering::NAME.as_ptr()];
    let mut dynamic_rendering =
        vk::PhysicalDeviceDynamicRenderingFeatures::default().dynamic_rendering(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .push_next(&mut dynamic_rendering);

    unsafe { instance.create_device(selected.physical_device, &create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create logical device: {e:?}"))
    })
}

pub(super) fn create_allocator(
    instance: &ash::Instance,
    device: &ash::Device,
    selected: SelectedDevice,
) -> Result<Allocator, GraphicsError> {
    Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device: device.clone(),
        physical_device: selected.physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create memory allocator: {e}"))
    })
}

/// Pool whose buffers can be reset individually; frame slots reuse theirs.
pub(super) fn create_command_pool(
    device: &ash::Device,
    queue_family: u32,
) -> Result<vk::CommandPool, GraphicsError> {
    let info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
    unsafe { device.create_command_pool(&info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create command pool: {e:?}"))
    })
}
