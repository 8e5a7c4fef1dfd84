//! Vulkan instance creation.

use std::ffi::CStr;

use ash::vk;

use crate::error::GraphicsError;

use super::debug;

/// MoltenVK tops out at 1.2; dynamic rendering then comes from the KHR extension.
#[cfg(target_os = "macos")]
pub(super) const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 2, 0);

#[cfg(not(target_os = "macos"))]
pub(super) const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance plus the validation messenger when one was installed.
pub(super) struct InstanceBundle {
    pub instance: ash::Instance,
    pub debug_utils: Option<ash::ext::debug_utils::Instance>,
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

/// Create a headless instance. No surface extensions are requested; frames
/// render into graph-owned images.
pub(super) fn create_instance(
    entry: &ash::Entry,
    validation_enabled: bool,
) -> Result<InstanceBundle, GraphicsError> {
    let validation_available = validation_enabled && has_validation_layer(entry);
    if validation_enabled && !validation_available {
        log::warn!("Validation layers requested but not installed");
    }

    let app_info = vk::ApplicationInfo::default()
        .application_name(c"Meridian")
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Meridian Renderer")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let mut extensions = Vec::new();
    if validation_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }
    #[cfg(target_os = "macos")]
    extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());

    let layers: Vec<*const std::ffi::c_char> = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        Vec::new()
    };

    #[allow(unused_mut)]
    let mut flags = vk::InstanceCreateFlags::empty();
    #[cfg(target_os = "macos")]
    {
        flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let create_info = vk::InstanceCreateInfo::default()
        .flags(flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create Vulkan instance: {e:?}"))
    })?;

    let (debug_utils, debug_messenger) = if validation_available {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, &instance);
        match debug::create_debug_messenger(&debug_utils) {
            Ok(messenger) => (Some(debug_utils), Some(messenger)),
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        }
    } else {
        (None, None)
    };

    Ok(InstanceBundle {
        instance,
        debug_utils,
        debug_messenger,
    })
}

fn has_validation_layer(entry: &ash::Entry) -> bool {
    let Ok(layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };
    layers.iter().any(|layer| {
        layer
            .layer_name_as_c_str()
            .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
    })
}
