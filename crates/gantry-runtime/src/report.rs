//! Human-readable capability dumps.

use crate::device::{DeviceInfo, DeviceSelector, PlatformInfo};
use std::fmt;

const RULE: &str = "------------------------";

/// Every platform and device the driver exposes.
#[derive(Debug, Clone)]
pub struct CapabilityReport {
    platforms: Vec<PlatformInfo>,
}

impl CapabilityReport {
    pub fn new(platforms: Vec<PlatformInfo>) -> Self {
        Self { platforms }
    }

    /// Enumerate through `selector`.
    pub fn collect(selector: &DeviceSelector) -> Self {
        Self::new(selector.platforms())
    }

    pub fn platforms(&self) -> &[PlatformInfo] {
        &self.platforms
    }
}

impl fmt::Display for CapabilityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.platforms.is_empty() {
            return writeln!(f, "Found 0 platforms!");
        }

        writeln!(f, "Number of platforms: {}", self.platforms.len())?;
        writeln!(f, "{RULE}")?;

        for platform in &self.platforms {
            writeln!(f, "Platform: {:?}", platform.backend)?;
            writeln!(f, "Number of devices: {}", platform.devices.len())?;
            for device in &platform.devices {
                writeln!(f, "\t{RULE}")?;
                write!(f, "{}", DeviceSummary::new(device).indent("\t\t"))?;
                writeln!(f, "\t{RULE}")?;
            }
            writeln!(f, "{RULE}")?;
        }
        Ok(())
    }
}

/// Capability summary of one device.
#[derive(Debug, Clone, Copy)]
pub struct DeviceSummary<'a> {
    device: &'a DeviceInfo,
    indent: &'a str,
}

impl<'a> DeviceSummary<'a> {
    pub fn new(device: &'a DeviceInfo) -> Self {
        Self { device, indent: "" }
    }

    /// Prefix every line with `indent`.
    pub fn indent(mut self, indent: &'a str) -> Self {
        self.indent = indent;
        self
    }
}

fn or_unknown<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}

impl fmt::Display for DeviceSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.device;
        let pad = self.indent;
        let [x, y, z] = d.max_work_item_sizes();

        writeln!(f, "{pad}Name: {}", d.name)?;
        writeln!(f, "{pad}Type: {:?}", d.device_type)?;
        writeln!(f, "{pad}Vendor: {:#06x}", d.vendor)?;
        writeln!(f, "{pad}Driver: {}", d.driver)?;
        writeln!(f, "{pad}Version: {}", d.driver_info)?;
        writeln!(f, "{pad}Max. Compute Units: {}", or_unknown(d.compute_units()))?;
        writeln!(f, "{pad}Local Memory Size: {} KB", d.local_memory_size() / 1024)?;
        writeln!(
            f,
            "{pad}Global Memory Size: {}",
            or_unknown(d.global_memory_size().map(|m| format!("{} MB", m / (1024 * 1024))))
        )?;
        writeln!(f, "{pad}Max Alloc Size: {} MB", d.max_allocation() / (1024 * 1024))?;
        writeln!(f, "{pad}Max Work-group Total Size: {}", d.max_work_group_size())?;
        writeln!(f, "{pad}Max Work-item Dims: {}", d.max_work_item_dimensions())?;
        writeln!(f, "{pad}Max Work-group Dims: ( {x} {y} {z} )")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str) -> DeviceInfo {
        DeviceInfo {
            backend: wgpu::Backend::Vulkan,
            name: name.to_string(),
            vendor: 0x10de,
            driver: "test".to_string(),
            driver_info: "1.0".to_string(),
            device_type: wgpu::DeviceType::DiscreteGpu,
            limits: wgpu::Limits::default(),
        }
    }

    #[test]
    fn test_empty_report() {
        assert_eq!(CapabilityReport::new(vec![]).to_string(), "Found 0 platforms!\n");
    }

    #[test]
    fn test_report_lists_every_device() {
        let report = CapabilityReport::new(vec![PlatformInfo {
            backend: wgpu::Backend::Vulkan,
            devices: vec![device("first"), device("second")],
        }]);
        let text = report.to_string();

        assert!(text.contains("Number of platforms: 1"));
        assert!(text.contains("Number of devices: 2"));
        assert!(text.contains("\t\tName: first"));
        assert!(text.contains("\t\tName: second"));
        assert!(text.contains("Max. Compute Units: unknown"));
    }

    #[test]
    fn test_summary_work_group_dims() {
        let info = device("gpu");
        let limits = wgpu::Limits::default();
        let text = DeviceSummary::new(&info).to_string();
        assert!(text.starts_with("Name: gpu\n"));
        assert!(text.contains(&format!(
            "Max Work-group Dims: ( {} {} {} )",
            limits.max_compute_workgroup_size_x,
            limits.max_compute_workgroup_size_y,
            limits.max_compute_workgroup_size_z
        )));
        assert!(text.contains("Vendor: 0x10de"));
    }
}
