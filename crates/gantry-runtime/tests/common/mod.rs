//! Common helpers for the device-backed integration tests.

#![allow(dead_code)]

use gantry_kernels::{MMUL, VADD, VADD3, default_tile_defs, default_workgroup_defs};
use gantry_runtime::{
    DeviceClass, DeviceSelector, KernelSource, RuntimeConfig, RuntimeError, SelectedDevice,
};

pub const WORKGROUP_SIZE: u32 = 64;
pub const TILE_SIZE: u32 = 8;

/// Install a debug-level subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Select the default device, or `None` when the machine has no adapter.
pub fn try_device(config: &RuntimeConfig) -> Option<SelectedDevice> {
    init_tracing();

    match DeviceSelector::new(config).select(DeviceClass::Default) {
        Ok(device) => {
            println!("Device: {} ({:?})", device.info().name, device.info().backend);
            Some(device)
        }
        Err(e @ (RuntimeError::NoPlatformFound | RuntimeError::NoDeviceFound { .. })) => {
            eprintln!("Skipping test: {e}");
            eprintln!("This is expected if no GPU is available (e.g., in CI)");
            None
        }
        Err(e) => panic!("device selection failed: {e}"),
    }
}

pub fn vadd_source() -> KernelSource<'static> {
    KernelSource::new(VADD)
        .with_path("vadd.wgsl")
        .with_defs(default_workgroup_defs(WORKGROUP_SIZE))
}

pub fn vadd3_source() -> KernelSource<'static> {
    KernelSource::new(VADD3)
        .with_path("vadd3.wgsl")
        .with_defs(default_workgroup_defs(WORKGROUP_SIZE))
}

pub fn mmul_source() -> KernelSource<'static> {
    KernelSource::new(MMUL)
        .with_path("mmul.wgsl")
        .with_defs(default_tile_defs(TILE_SIZE))
}
