// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, physical device and logical device. Everything here
//! lives for the whole renderer lifetime; nothing depends on the swapchain.

use anyhow::{anyhow, Context, Result};
#[cfg(debug_assertions)]
use ash::ext::debug_utils as ext_debug;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::ffi::{c_char, CStr};
use tracing::info;

#[cfg(debug_assertions)]
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

// Upper bound on sampler anisotropy; the device limit may lower it.
const MAX_ANISOTROPY: f32 = 8.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// First family doing both graphics and present wins; otherwise the first of
/// each.
pub fn pick_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut can_present: impl FnMut(u32) -> bool,
) -> Option<QueueFamilies> {
    let mut graphics = None;
    let mut present = None;
    for (i, fam) in families.iter().enumerate() {
        let i = i as u32;
        let gfx = fam.queue_count > 0 && fam.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let pres = can_present(i);
        if gfx && pres {
            return Some(QueueFamilies {
                graphics: i,
                present: i,
            });
        }
        if gfx && graphics.is_none() {
            graphics = Some(i);
        }
        if pres && present.is_none() {
            present = Some(i);
        }
    }
    Some(QueueFamilies {
        graphics: graphics?,
        present: present?,
    })
}

/// Discrete GPUs first, then software rasterizers, then the rest; larger
/// maximum texture size breaks ties.
pub fn score_device(props: &vk::PhysicalDeviceProperties) -> u32 {
    let kind = match props.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::CPU => 500,
        _ => 0,
    };
    kind + props.limits.max_image_dimension2_d
}

#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!("[vulkan] {}", msg);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!("[vulkan] {}", msg);
    } else {
        tracing::trace!("[vulkan] {}", msg);
    }
    vk::FALSE
}

#[cfg(debug_assertions)]
struct DebugState {
    loader: ext_debug::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}
#[cfg(not(debug_assertions))]
struct DebugState;

#[cfg(debug_assertions)]
unsafe fn create_debug_messenger(entry: &Entry, instance: &Instance) -> Result<DebugState> {
    let loader = ext_debug::Instance::new(entry, instance);
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
    let messenger = loader.create_debug_utils_messenger(&ci, None)?;
    Ok(DebugState { loader, messenger })
}

#[cfg(not(debug_assertions))]
unsafe fn create_debug_messenger(_entry: &Entry, _instance: &Instance) -> Result<DebugState> {
    Ok(DebugState)
}

impl DebugState {
    #[cfg(debug_assertions)]
    unsafe fn destroy(&self) {
        self.loader.destroy_debug_utils_messenger(self.messenger, None);
    }

    #[cfg(not(debug_assertions))]
    unsafe fn destroy(&self) {}
}

unsafe fn create_instance(entry: &Entry, display_raw: RawDisplayHandle) -> Result<Instance> {
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: c"lodge".as_ptr(),
        application_version: 0,
        p_engine_name: c"lodge".as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    #[allow(unused_mut)]
    let mut ext_vec: Vec<*const c_char> = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();
    #[cfg(debug_assertions)]
    ext_vec.push(ext_debug::NAME.as_ptr());

    // Validation only when the layer is actually installed.
    #[cfg(debug_assertions)]
    let layers: Vec<*const c_char> = {
        let available = entry
            .enumerate_instance_layer_properties()
            .unwrap_or_default();
        let found = available
            .iter()
            .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == VALIDATION_LAYER);
        if found {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            tracing::warn!("{:?} not installed, running without validation", VALIDATION_LAYER);
            Vec::new()
        }
    };
    #[cfg(not(debug_assertions))]
    let layers: Vec<*const c_char> = Vec::new();

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_vec.len() as u32,
        pp_enabled_extension_names: ext_vec.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    Ok(entry.create_instance(&create_info, None)?)
}

pub struct DeviceContext {
    _entry: Entry,
    pub instance: Instance,
    debug: DebugState,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,

    pub phys: vk::PhysicalDevice,
    pub memory_props: vk::PhysicalDeviceMemoryProperties,
    pub families: QueueFamilies,
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub swapchain_loader: swapchain::Device,

    /// `Some(level)` when sampler anisotropy was enabled on the device.
    pub anisotropy: Option<f32>,
    pub depth_format: vk::Format,
}

impl DeviceContext {
    // STRICT ORDER:
    // 1) instance (WSI + debug extensions)
    // 2) surface FROM THIS INSTANCE
    // 3) physical device + queue families checked AGAINST THIS SURFACE
    // 4) logical device with swapchain extension
    pub unsafe fn new(window: &dyn HasWindowHandle, display: &dyn HasDisplayHandle) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window.window_handle().map_err(|e| anyhow!("{e}"))?.as_raw();

        let entry = Entry::linked();
        let instance = create_instance(&entry, dh).context("create_instance")?;
        let debug = create_debug_messenger(&entry, &instance)?;

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = ash_window::create_surface(&entry, &instance, dh, wh, None)
            .context("ash_window::create_surface")?;

        let (phys, families) = pick_physical_device(&instance, &surface_loader, surface)?;
        let props = instance.get_physical_device_properties(phys);
        let features = instance.get_physical_device_features(phys);
        let anisotropy = (features.sampler_anisotropy == vk::TRUE)
            .then(|| MAX_ANISOTROPY.min(props.limits.max_sampler_anisotropy));

        info!(
            "gpu: {} ({:?}), graphics family {}, present family {}, anisotropy {:?}",
            props
                .device_name_as_c_str()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            props.device_type,
            families.graphics,
            families.present,
            anisotropy
        );

        let priorities = [1.0_f32];
        let queue_infos: Vec<_> = families
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
        let enabled = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: if anisotropy.is_some() { vk::TRUE } else { vk::FALSE },
            ..Default::default()
        };
        let device_exts = [swapchain::NAME.as_ptr()];
        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            p_enabled_features: &enabled,
            ..Default::default()
        };
        let device = instance
            .create_device(phys, &dinfo, None)
            .context("create_device")?;

        let graphics_queue = device.get_device_queue(families.graphics, 0);
        let present_queue = device.get_device_queue(families.present, 0);
        let swapchain_loader = swapchain::Device::new(&instance, &device);
        let memory_props = instance.get_physical_device_memory_properties(phys);
        let depth_format = pick_depth_format(&instance, phys);

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
            phys,
            memory_props,
            families,
            device,
            graphics_queue,
            present_queue,
            swapchain_loader,
            anisotropy,
            depth_format,
        })
    }

    /// Device first, then surface, debug messenger and instance. Every
    /// device-owned object must already be gone.
    pub unsafe fn destroy(&mut self) {
        self.device.destroy_device(None);
        self.surface_loader.destroy_surface(self.surface, None);
        self.debug.destroy();
        self.instance.destroy_instance(None);
    }
}

unsafe fn device_supports_swapchain(instance: &Instance, phys: vk::PhysicalDevice) -> bool {
    instance
        .enumerate_device_extension_properties(phys)
        .unwrap_or_default()
        .iter()
        .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == swapchain::NAME)
}

unsafe fn pick_physical_device(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let mut best: Option<(u32, vk::PhysicalDevice, QueueFamilies)> = None;
    for phys in instance.enumerate_physical_devices()? {
        if !device_supports_swapchain(instance, phys) {
            continue;
        }
        let qprops = instance.get_physical_device_queue_family_properties(phys);
        let Some(families) = pick_queue_families(&qprops, |i| {
            surf_i
                .get_physical_device_surface_support(phys, i, surface)
                .unwrap_or(false)
        }) else {
            continue;
        };
        let score = score_device(&instance.get_physical_device_properties(phys));
        if best.map_or(true, |(s, _, _)| score > s) {
            best = Some((score, phys, families));
        }
    }
    best.map(|(_, phys, families)| (phys, families))
        .ok_or_else(|| anyhow!("no physical device can render and present to this surface"))
}

unsafe fn pick_depth_format(instance: &Instance, phys: vk::PhysicalDevice) -> vk::Format {
    let candidates = [
        vk::Format::D32_SFLOAT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
    ];
    for &fmt in &candidates {
        let props = instance.get_physical_device_format_properties(phys, fmt);
        if props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            return fmt;
        }
    }
    vk::Format::D32_SFLOAT
}
