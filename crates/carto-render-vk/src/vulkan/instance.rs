// SPDX-License-Identifier: CEPL-1.0
use crate::error::{RenderError, Result};
use crate::queue::QueueAssignment;
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_char, CStr};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const APP_NAME: &CStr = c"carto";

pub struct Surface {
    pub loader: surface::Instance,
    pub handle: vk::SurfaceKHR,
}

pub struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub unsafe fn destroy(&self) {
        unsafe { self.loader.destroy_debug_utils_messenger(self.handle, None) };
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if data.is_null() || unsafe { (*data).p_message.is_null() } {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{msg}");
    } else {
        debug!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

unsafe fn has_layer(entry: &ash::Entry, name: &CStr) -> bool {
    unsafe { entry.enumerate_instance_layer_properties() }
        .unwrap_or_default()
        .iter()
        .any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == name)
}

unsafe fn has_instance_extension(entry: &ash::Entry, name: &CStr) -> bool {
    unsafe { entry.enumerate_instance_extension_properties(None) }
        .unwrap_or_default()
        .iter()
        .any(|e| unsafe { CStr::from_ptr(e.extension_name.as_ptr()) } == name)
}

/// Returns the instance and whether validation actually got enabled.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    display: Option<RawDisplayHandle>,
    validation: bool,
) -> Result<(ash::Instance, bool)> {
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: 0,
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_1,
        ..Default::default()
    };

    let mut extensions: Vec<*const c_char> = match display {
        Some(dh) => ash_window::enumerate_required_extensions(dh)
            .map_err(RenderError::init("enumerate_required_extensions"))?
            .to_vec(),
        None => Vec::new(),
    };

    let mut layers: Vec<*const c_char> = Vec::new();
    let validation = if !validation {
        false
    } else if !unsafe { has_layer(entry, VALIDATION_LAYER) } {
        warn!("validation requested but {VALIDATION_LAYER:?} is not installed");
        false
    } else if !unsafe { has_instance_extension(entry, debug_utils::NAME) } {
        warn!("validation requested but VK_EXT_debug_utils is unavailable");
        false
    } else {
        layers.push(VALIDATION_LAYER.as_ptr());
        extensions.push(debug_utils::NAME.as_ptr());
        true
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };
    let instance = unsafe { entry.create_instance(&create_info, None) }
        .map_err(RenderError::init("create_instance"))?;
    info!("vk: instance created (validation={validation})");
    Ok((instance, validation))
}

pub unsafe fn create_debug_messenger(
    entry: &ash::Entry,
    instance: &ash::Instance,
) -> Result<DebugMessenger> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let handle = unsafe { loader.create_debug_utils_messenger(&ci, None) }
        .map_err(RenderError::init("create_debug_utils_messenger"))?;
    Ok(DebugMessenger { loader, handle })
}

pub unsafe fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> Result<Surface> {
    let handle = unsafe { ash_window::create_surface(entry, instance, display, window, None) }
        .map_err(RenderError::init("create_surface"))?;
    Ok(Surface {
        loader: surface::Instance::new(entry, instance),
        handle,
    })
}

unsafe fn supports_swapchain(instance: &ash::Instance, phys: vk::PhysicalDevice) -> bool {
    unsafe { instance.enumerate_device_extension_properties(phys) }
        .unwrap_or_default()
        .iter()
        .any(|e| unsafe { CStr::from_ptr(e.extension_name.as_ptr()) } == swapchain::NAME)
}

fn device_rank(ty: vk::PhysicalDeviceType) -> u32 {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 3,
        _ => 4,
    }
}

/// First device (discrete GPUs first) whose queues can render and, when a
/// surface is given, present to it.
pub unsafe fn pick_device(
    instance: &ash::Instance,
    surface: Option<&Surface>,
) -> Result<(vk::PhysicalDevice, QueueAssignment)> {
    let mut devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(RenderError::init("enumerate_physical_devices"))?;
    if devices.is_empty() {
        return Err(RenderError::NoDevice("no Vulkan devices".into()));
    }
    devices.sort_by_key(|&p| device_rank(unsafe { instance.get_physical_device_properties(p) }.device_type));

    for phys in devices {
        let props = unsafe { instance.get_physical_device_properties(phys) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy();
        if surface.is_some() && !unsafe { supports_swapchain(instance, phys) } {
            debug!("vk: skipping {name}: no VK_KHR_swapchain");
            continue;
        }
        let families = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        let assignment = QueueAssignment::select(&families, |i| match surface {
            Some(s) => unsafe {
                s.loader
                    .get_physical_device_surface_support(phys, i, s.handle)
                    .unwrap_or(false)
            },
            None => true,
        });
        match assignment {
            Some(q) => {
                info!(
                    "vk: using {name} (graphics family {}, present family {})",
                    q.graphics_index, q.present_index
                );
                return Ok((phys, q));
            }
            None => debug!("vk: skipping {name}: no suitable queue families"),
        }
    }
    Err(RenderError::NoQueue)
}

pub unsafe fn create_device(
    instance: &ash::Instance,
    phys: vk::PhysicalDevice,
    queues: &QueueAssignment,
    with_swapchain: bool,
) -> Result<ash::Device> {
    let priorities = [1.0_f32];
    let queue_infos: Vec<_> = queues
        .unique_families()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let extensions: Vec<*const c_char> = if with_swapchain {
        vec![swapchain::NAME.as_ptr()]
    } else {
        Vec::new()
    };

    let info = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        ..Default::default()
    };
    unsafe { instance.create_device(phys, &info, None) }.map_err(RenderError::init("create_device"))
}

pub unsafe fn pick_depth_format(instance: &ash::Instance, phys: vk::PhysicalDevice) -> vk::Format {
    // Prefer 32f → 24+S8 → 16
    let candidates = [
        vk::Format::D32_SFLOAT,
        vk::Format::D24_UNORM_S8_UINT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D16_UNORM,
    ];
    for &fmt in &candidates {
        let props = unsafe { instance.get_physical_device_format_properties(phys, fmt) };
        if props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            return fmt;
        }
    }
    vk::Format::D32_SFLOAT
}

pub unsafe fn create_command_pool(device: &ash::Device, family: u32) -> Result<vk::CommandPool> {
    let info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: family,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        ..Default::default()
    };
    unsafe { device.create_command_pool(&info, None) }
        .map_err(RenderError::init("create_command_pool"))
}

fn hex_bytes(b: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut s = String::with_capacity(b.len() * 2);
    for x in b {
        let _ = write!(&mut s, "{x:02x}");
    }
    s
}

/// Cache blobs are keyed by vendor, device, driver and cache UUID so a driver
/// update never reads a stale blob.
pub fn pipeline_cache_path(props: &vk::PhysicalDeviceProperties) -> PathBuf {
    PathBuf::from(format!(
        "vk_pipeline_cache_{:04x}_{:04x}_{:08x}_{}.bin",
        props.vendor_id,
        props.device_id,
        props.driver_version,
        hex_bytes(&props.pipeline_cache_uuid)
    ))
}

pub unsafe fn create_or_load_pipeline_cache(
    device: &ash::Device,
    path: Option<&Path>,
) -> Result<vk::PipelineCache> {
    let data = path.and_then(|p| fs::read(p).ok()).unwrap_or_default();
    if !data.is_empty() {
        debug!("vk: pipeline cache seeded with {} bytes", data.len());
    }
    let ci = vk::PipelineCacheCreateInfo {
        s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
        initial_data_size: data.len(),
        p_initial_data: if data.is_empty() {
            std::ptr::null()
        } else {
            data.as_ptr().cast()
        },
        ..Default::default()
    };
    unsafe { device.create_pipeline_cache(&ci, None) }
        .map_err(RenderError::init("create_pipeline_cache"))
}

pub unsafe fn save_pipeline_cache(device: &ash::Device, cache: vk::PipelineCache, path: &Path) {
    // drivers may refuse when the cache is empty or the device is lost
    match unsafe { device.get_pipeline_cache_data(cache) } {
        Ok(bytes) if !bytes.is_empty() => {
            if let Err(e) = fs::write(path, &bytes) {
                warn!("vk: saving pipeline cache to {}: {e}", path.display());
            }
        }
        Ok(_) => {}
        Err(e) => debug!("vk: pipeline cache data unavailable: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discrete_devices_rank_first() {
        let mut tys = [
            vk::PhysicalDeviceType::CPU,
            vk::PhysicalDeviceType::INTEGRATED_GPU,
            vk::PhysicalDeviceType::DISCRETE_GPU,
        ];
        tys.sort_by_key(|&t| device_rank(t));
        assert_eq!(tys[0], vk::PhysicalDeviceType::DISCRETE_GPU);
        assert_eq!(tys[2], vk::PhysicalDeviceType::CPU);
    }

    #[test]
    fn cache_path_names_the_driver() {
        let props = vk::PhysicalDeviceProperties {
            vendor_id: 0x10de,
            device_id: 0x2204,
            driver_version: 0x1234_5678,
            pipeline_cache_uuid: [0xab; vk::UUID_SIZE],
            ..Default::default()
        };
        let name = pipeline_cache_path(&props).display().to_string();
        assert!(name.starts_with("vk_pipeline_cache_10de_2204_12345678_abab"));
        assert!(name.ends_with(".bin"));
    }
}
