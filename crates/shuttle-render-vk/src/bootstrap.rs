// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, physical-device selection and logical device.
//!
//! STRICT ORDER:
//! 1) VkInstance (platform WSI exts + optional debug utils)
//! 2) VkSurfaceKHR from THIS instance
//! 3) Physical device/queues queried AGAINST this surface (present support)
//! 4) VkDevice with the extensions/features chosen for the selected GPU
//! Changing this order => surface may be incompatible with chosen device/queue.

use anyhow::{Context, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{c_char, c_void, CStr};
use tracing::{debug, error, info, trace, warn};

use crate::error::RenderError;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// What the instance and device must be created with.
#[derive(Clone, Debug)]
pub struct DeviceRequirements {
    pub layers: Vec<&'static CStr>,
    pub instance_extensions: Vec<&'static CStr>,
    pub device_extensions: Vec<&'static CStr>,
}

impl DeviceRequirements {
    pub fn new(validation: bool) -> Self {
        let mut instance_extensions = Vec::new();
        let mut layers = Vec::new();
        if validation {
            layers.push(VALIDATION_LAYER);
            instance_extensions.push(debug_utils::NAME);
        }
        Self {
            layers,
            instance_extensions,
            device_extensions: vec![swapchain::NAME],
        }
    }

    pub fn wants_debug_utils(&self) -> bool {
        self.instance_extensions.contains(&debug_utils::NAME)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Prefers one family that does both graphics and present; otherwise the
/// first graphics family paired with the first presenting family.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> Option<QueueFamilies> {
    let mut graphics = None;
    let mut present = None;
    for (i, f) in families.iter().enumerate() {
        let i = i as u32;
        let has_graphics = f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let has_present = supports_present(i);
        if has_graphics && has_present {
            return Some(QueueFamilies {
                graphics: i,
                present: i,
            });
        }
        if has_graphics && graphics.is_none() {
            graphics = Some(i);
        }
        if has_present && present.is_none() {
            present = Some(i);
        }
    }
    Some(QueueFamilies {
        graphics: graphics?,
        present: present?,
    })
}

pub fn device_type_score(ty: vk::PhysicalDeviceType) -> u32 {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    }
}

/// GPU handle + queue families, fixed for the renderer's lifetime.
#[derive(Clone, Debug)]
pub struct PhysicalDeviceSelection {
    pub phys: vk::PhysicalDevice,
    pub name: String,
    pub families: QueueFamilies,
    pub limits: vk::PhysicalDeviceLimits,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub sampler_anisotropy: bool,
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vulkan] {msg}");
    } else {
        trace!("[vulkan] {msg}");
    }
    vk::FALSE
}

unsafe fn has_layer(entry: &Entry, name: &CStr) -> bool {
    entry
        .enumerate_instance_layer_properties()
        .unwrap_or_default()
        .iter()
        .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == name)
}

unsafe fn create_instance(
    entry: &Entry,
    required_wsi: &[*const c_char],
    reqs: &mut DeviceRequirements,
) -> Result<Instance> {
    let app = c"shuttle";
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: app.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    // Missing validation layers (no SDK installed) degrade to a warning.
    if reqs.layers.contains(&VALIDATION_LAYER) && !has_layer(entry, VALIDATION_LAYER) {
        warn!("VK_LAYER_KHRONOS_validation not installed; continuing without validation");
        reqs.layers.retain(|l| *l != VALIDATION_LAYER);
        reqs.instance_extensions.retain(|e| *e != debug_utils::NAME);
    }

    let mut ext_vec: Vec<*const c_char> = required_wsi.to_vec();
    ext_vec.extend(reqs.instance_extensions.iter().map(|e| e.as_ptr()));
    let layer_vec: Vec<*const c_char> = reqs.layers.iter().map(|l| l.as_ptr()).collect();

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_vec.len() as u32,
        pp_enabled_extension_names: ext_vec.as_ptr(),
        enabled_layer_count: layer_vec.len() as u32,
        pp_enabled_layer_names: layer_vec.as_ptr(),
        ..Default::default()
    };

    Ok(entry
        .create_instance(&create_info, None)
        .map_err(RenderError::vk("vkCreateInstance"))?)
}

unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = loader
        .create_debug_utils_messenger(&ci, None)
        .map_err(RenderError::vk("vkCreateDebugUtilsMessengerEXT"))?;
    Ok((loader, messenger))
}

unsafe fn supports_extensions(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    wanted: &[&CStr],
) -> bool {
    let Ok(props) = instance.enumerate_device_extension_properties(phys) else {
        return false;
    };
    wanted.iter().all(|w| {
        props
            .iter()
            .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == *w)
    })
}

unsafe fn select_physical_device(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
    reqs: &DeviceRequirements,
) -> Result<PhysicalDeviceSelection> {
    let mut best: Option<(u32, vk::PhysicalDevice, QueueFamilies)> = None;

    for phys in instance
        .enumerate_physical_devices()
        .map_err(RenderError::vk("vkEnumeratePhysicalDevices"))?
    {
        let props = instance.get_physical_device_properties(phys);
        let name = CStr::from_ptr(props.device_name.as_ptr()).to_string_lossy();
        let qprops = instance.get_physical_device_queue_family_properties(phys);

        let Some(families) = find_queue_families(&qprops, |i| {
            surf_i
                .get_physical_device_surface_support(phys, i, surface)
                .unwrap_or(false)
        }) else {
            debug!("skip {name}: no graphics/present queue family");
            continue;
        };
        if !supports_extensions(instance, phys, &reqs.device_extensions) {
            debug!("skip {name}: missing device extensions");
            continue;
        }
        // A device that exposes no formats/modes for this surface can't build a swapchain.
        let formats = surf_i
            .get_physical_device_surface_formats(phys, surface)
            .unwrap_or_default();
        let modes = surf_i
            .get_physical_device_surface_present_modes(phys, surface)
            .unwrap_or_default();
        if formats.is_empty() || modes.is_empty() {
            debug!("skip {name}: surface has no formats/present modes");
            continue;
        }

        let score = device_type_score(props.device_type);
        if best.map_or(true, |(s, _, _)| score > s) {
            best = Some((score, phys, families));
        }
    }

    let (_, phys, families) = best.ok_or_else(|| {
        let names: Vec<_> = reqs
            .device_extensions
            .iter()
            .map(|e| e.to_string_lossy().into_owned())
            .collect();
        RenderError::NoSuitableDevice(names.join(", "))
    })?;

    let props = instance.get_physical_device_properties(phys);
    let features = instance.get_physical_device_features(phys);
    Ok(PhysicalDeviceSelection {
        phys,
        name: CStr::from_ptr(props.device_name.as_ptr())
            .to_string_lossy()
            .into_owned(),
        families,
        limits: props.limits,
        memory: instance.get_physical_device_memory_properties(phys),
        sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
    })
}

/// Instance-to-device bootstrap. Owns the logical device; every other GPU
/// object borrows it and must be destroyed before this drops.
pub struct GpuContext {
    _entry: Entry,
    pub instance: Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub selection: PhysicalDeviceSelection,
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub swapchain_loader: swapchain::Device,
    /// Short-lived command buffers for uploads.
    pub transient_pool: vk::CommandPool,
}

impl GpuContext {
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        mut reqs: DeviceRequirements,
    ) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .as_raw();

        let entry = Entry::load().map_err(|e| RenderError::Loader(e.to_string()))?;
        let wsi = ash_window::enumerate_required_extensions(dh)
            .context("enumerate_required_extensions")?;
        let instance = create_instance(&entry, wsi, &mut reqs).context("create_instance")?;

        let debug = if reqs.wants_debug_utils() {
            Some(create_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = ash_window::create_surface(&entry, &instance, dh, wh, None)
            .context("ash_window::create_surface")?;

        let selection = select_physical_device(&instance, &surface_loader, surface, &reqs)?;
        info!(
            "gpu: {} (graphics family {}, present family {})",
            selection.name, selection.families.graphics, selection.families.present
        );

        // --- Logical device: one queue per distinct family ---
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = selection
            .families
            .unique()
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();

        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: if selection.sampler_anisotropy {
                vk::TRUE
            } else {
                vk::FALSE
            },
            ..Default::default()
        };
        let device_exts: Vec<*const c_char> =
            reqs.device_extensions.iter().map(|e| e.as_ptr()).collect();

        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };
        let device = instance
            .create_device(selection.phys, &dinfo, None)
            .map_err(RenderError::vk("vkCreateDevice"))?;

        let graphics_queue = device.get_device_queue(selection.families.graphics, 0);
        let present_queue = device.get_device_queue(selection.families.present, 0);
        let swapchain_loader = swapchain::Device::new(&instance, &device);

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::TRANSIENT,
            queue_family_index: selection.families.graphics,
            ..Default::default()
        };
        let transient_pool = device
            .create_command_pool(&pool_info, None)
            .map_err(RenderError::vk("vkCreateCommandPool"))?;

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
            selection,
            device,
            graphics_queue,
            present_queue,
            swapchain_loader,
            transient_pool,
        })
    }

    pub fn phys(&self) -> vk::PhysicalDevice {
        self.selection.phys
    }

    pub unsafe fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        Ok(self
            .surface_loader
            .get_physical_device_surface_capabilities(self.selection.phys, self.surface)
            .map_err(RenderError::vk("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?)
    }

    pub unsafe fn wait_idle(&self) {
        if let Err(e) = self.device.device_wait_idle() {
            warn!("device_wait_idle: {e:?}");
        }
    }
}

// Device → surface → debug messenger → instance.
impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.transient_pool, None);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_combined_family() {
        let fams = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        // 0 graphics-only, 1 present-only, 2 both
        let found = find_queue_families(&fams, |i| i == 1 || i == 2).unwrap();
        assert_eq!(
            found,
            QueueFamilies {
                graphics: 2,
                present: 2
            }
        );
        assert!(found.is_shared());
        assert_eq!(found.unique(), vec![2]);
    }

    #[test]
    fn falls_back_to_split_families() {
        let fams = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let found = find_queue_families(&fams, |i| i == 1).unwrap();
        assert_eq!(found.graphics, 0);
        assert_eq!(found.present, 1);
        assert!(!found.is_shared());
        assert_eq!(found.unique(), vec![0, 1]);
    }

    #[test]
    fn no_present_means_no_selection() {
        let fams = [family(vk::QueueFlags::GRAPHICS)];
        assert!(find_queue_families(&fams, |_| false).is_none());
    }

    #[test]
    fn empty_graphics_family_is_ignored() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let fams = [empty, family(vk::QueueFlags::GRAPHICS)];
        let found = find_queue_families(&fams, |_| true).unwrap();
        assert_eq!(found.graphics, 1);
    }

    #[test]
    fn discrete_beats_integrated() {
        assert!(
            device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU)
                > device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > device_type_score(vk::PhysicalDeviceType::CPU)
        );
    }

    #[test]
    fn validation_adds_layer_and_debug_utils() {
        let on = DeviceRequirements::new(true);
        assert!(on.layers.contains(&VALIDATION_LAYER));
        assert!(on.wants_debug_utils());
        assert_eq!(on.device_extensions, vec![swapchain::NAME]);

        let off = DeviceRequirements::new(false);
        assert!(off.layers.is_empty());
        assert!(!off.wants_debug_utils());
    }
}
