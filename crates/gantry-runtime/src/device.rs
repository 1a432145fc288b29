//! Platform and device discovery.
//!
//! A *platform* is one driver backend (Vulkan, Metal, DX12, GL) and a *device*
//! is one adapter exposed by it. Selection never ranks devices: the first
//! platform, in [`PLATFORM_ORDER`], that has a device of the requested class
//! wins, and on that platform its first such device in driver order.

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use std::fmt;

/// Order in which platforms are considered.
pub const PLATFORM_ORDER: [wgpu::Backend; 5] = [
    wgpu::Backend::Vulkan,
    wgpu::Backend::Metal,
    wgpu::Backend::Dx12,
    wgpu::Backend::Gl,
    wgpu::Backend::BrowserWebGpu,
];

fn platform_rank(backend: wgpu::Backend) -> usize {
    PLATFORM_ORDER
        .iter()
        .position(|&b| b == backend)
        .unwrap_or(PLATFORM_ORDER.len())
}

/// Requested device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceClass {
    /// Whatever the platform offers first.
    #[default]
    Default,
    /// Discrete, integrated or virtual GPU.
    Gpu,
    /// CPU / software implementation.
    Cpu,
    /// Anything the driver reports as neither GPU nor CPU.
    Accelerator,
    /// Every device, used for listing.
    All,
}

impl DeviceClass {
    /// Whether a device of `kind` satisfies this class.
    pub fn matches(self, kind: DeviceKind) -> bool {
        match self {
            DeviceClass::Default | DeviceClass::All => true,
            DeviceClass::Gpu => kind == DeviceKind::Gpu,
            DeviceClass::Cpu => kind == DeviceKind::Cpu,
            DeviceClass::Accelerator => kind == DeviceKind::Accelerator,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceClass::Default => "default",
            DeviceClass::Gpu => "GPU",
            DeviceClass::Cpu => "CPU",
            DeviceClass::Accelerator => "accelerator",
            DeviceClass::All => "any",
        };
        f.write_str(name)
    }
}

/// Coarse device kind derived from the driver's device type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Any flavour of GPU.
    Gpu,
    /// CPU or software rasterizer.
    Cpu,
    /// Everything else.
    Accelerator,
}

impl From<wgpu::DeviceType> for DeviceKind {
    fn from(device_type: wgpu::DeviceType) -> Self {
        match device_type {
            wgpu::DeviceType::DiscreteGpu
            | wgpu::DeviceType::IntegratedGpu
            | wgpu::DeviceType::VirtualGpu => DeviceKind::Gpu,
            wgpu::DeviceType::Cpu => DeviceKind::Cpu,
            wgpu::DeviceType::Other => DeviceKind::Accelerator,
        }
    }
}

/// Immutable snapshot of a device's identity and capability attributes.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Platform (driver backend) exposing the device.
    pub backend: wgpu::Backend,
    /// Device name.
    pub name: String,
    /// PCI vendor id (0 when the driver does not report one).
    pub vendor: u32,
    /// Driver name.
    pub driver: String,
    /// Driver version string.
    pub driver_info: String,
    /// Raw driver device type.
    pub device_type: wgpu::DeviceType,
    /// Limits the adapter supports.
    pub limits: wgpu::Limits,
}

impl DeviceInfo {
    fn from_adapter(adapter: &wgpu::Adapter) -> Self {
        let info = adapter.get_info();
        Self {
            backend: info.backend,
            name: info.name,
            vendor: info.vendor,
            driver: info.driver,
            driver_info: info.driver_info,
            device_type: info.device_type,
            limits: adapter.limits(),
        }
    }

    /// Coarse device kind.
    pub fn kind(&self) -> DeviceKind {
        self.device_type.into()
    }

    /// Number of compute units. Not exposed by the driver layer.
    pub fn compute_units(&self) -> Option<u32> {
        None
    }

    /// Work-group shared (local) memory size in bytes.
    pub fn local_memory_size(&self) -> u64 {
        u64::from(self.limits.max_compute_workgroup_storage_size)
    }

    /// Global memory size in bytes. Not exposed by the driver layer.
    pub fn global_memory_size(&self) -> Option<u64> {
        None
    }

    /// Largest single buffer that can be allocated and bound to a kernel.
    pub fn max_allocation(&self) -> u64 {
        self.limits
            .max_buffer_size
            .min(u64::from(self.limits.max_storage_buffer_binding_size))
    }

    /// Number of work-item dimensions.
    pub fn max_work_item_dimensions(&self) -> u32 {
        3
    }

    /// Per-dimension work-group size limits.
    pub fn max_work_item_sizes(&self) -> [u32; 3] {
        [
            self.limits.max_compute_workgroup_size_x,
            self.limits.max_compute_workgroup_size_y,
            self.limits.max_compute_workgroup_size_z,
        ]
    }

    /// Maximum work items in one work-group.
    pub fn max_work_group_size(&self) -> u32 {
        self.limits.max_compute_invocations_per_workgroup
    }

    /// Maximum work-group count along any dimension of one launch.
    pub fn max_work_groups_per_dimension(&self) -> u32 {
        self.limits.max_compute_workgroups_per_dimension
    }
}

/// A device picked by the selector, ready to open a session on.
#[derive(Debug, Clone)]
pub struct SelectedDevice {
    pub(crate) adapter: wgpu::Adapter,
    info: DeviceInfo,
}

impl SelectedDevice {
    /// Capability snapshot of the device.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }
}

/// One platform and the devices it exposes, in driver order.
#[derive(Debug, Clone)]
pub struct PlatformInfo {
    /// Driver backend.
    pub backend: wgpu::Backend,
    /// Devices on this platform.
    pub devices: Vec<DeviceInfo>,
}

/// Enumerates platforms and devices and applies the selection policy.
pub struct DeviceSelector {
    instance: wgpu::Instance,
    backends: wgpu::Backends,
}

impl DeviceSelector {
    /// Create a selector over the backends enabled in `config`.
    pub fn new(config: &RuntimeConfig) -> Self {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: config.backends,
            ..Default::default()
        });

        Self {
            instance,
            backends: config.backends,
        }
    }

    /// Every device on every platform, in platform order then driver order.
    pub fn enumerate(&self) -> Vec<SelectedDevice> {
        let adapters = pollster::block_on(self.instance.enumerate_adapters(self.backends));

        let mut devices: Vec<SelectedDevice> = adapters
            .into_iter()
            .map(|adapter| SelectedDevice {
                info: DeviceInfo::from_adapter(&adapter),
                adapter,
            })
            .collect();

        // Stable sort keeps driver order inside a platform.
        devices.sort_by_key(|d| platform_rank(d.info.backend));
        devices
    }

    /// Devices grouped by platform.
    pub fn platforms(&self) -> Vec<PlatformInfo> {
        let mut platforms: Vec<PlatformInfo> = Vec::new();
        for device in self.enumerate() {
            match platforms.last_mut() {
                Some(p) if p.backend == device.info.backend => p.devices.push(device.info),
                _ => platforms.push(PlatformInfo {
                    backend: device.info.backend,
                    devices: vec![device.info],
                }),
            }
        }
        platforms
    }

    /// Select a device of the given class.
    ///
    /// # Errors
    /// [`RuntimeError::NoPlatformFound`] when nothing is enumerated at all,
    /// [`RuntimeError::NoDeviceFound`] when no platform has a matching device.
    pub fn select(&self, class: DeviceClass) -> Result<SelectedDevice> {
        let mut devices = self.enumerate();
        if devices.is_empty() {
            return Err(RuntimeError::NoPlatformFound);
        }

        let infos: Vec<DeviceInfo> = devices.iter().map(|d| d.info.clone()).collect();
        let index = pick(&infos, class).ok_or(RuntimeError::NoDeviceFound { class })?;
        let device = devices.swap_remove(index);

        tracing::info!(
            device = %device.info.name,
            backend = ?device.info.backend,
            device_type = ?device.info.device_type,
            %class,
            "compute device selected"
        );

        Ok(device)
    }
}

/// Apply the selection policy to a device list.
///
/// Returns the index of the first device of `class` on the first platform (in
/// [`PLATFORM_ORDER`]) that has one. Devices keep their relative order within
/// a platform.
pub fn pick(devices: &[DeviceInfo], class: DeviceClass) -> Option<usize> {
    devices
        .iter()
        .enumerate()
        .filter(|(_, d)| class.matches(d.kind()))
        .min_by_key(|&(i, d)| (platform_rank(d.backend), i))
        .map(|(i, _)| i)
}
