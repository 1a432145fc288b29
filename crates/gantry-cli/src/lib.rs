//! Gantry CLI library - sample pipelines shared by the binary and its tests.

pub mod pipelines;

use gantry_runtime::DeviceClass;

/// Device class accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DeviceClassArg {
    Default,
    Gpu,
    Cpu,
    Accelerator,
    All,
}

impl From<DeviceClassArg> for DeviceClass {
    fn from(arg: DeviceClassArg) -> Self {
        match arg {
            DeviceClassArg::Default => DeviceClass::Default,
            DeviceClassArg::Gpu => DeviceClass::Gpu,
            DeviceClassArg::Cpu => DeviceClass::Cpu,
            DeviceClassArg::Accelerator => DeviceClass::Accelerator,
            DeviceClassArg::All => DeviceClass::All,
        }
    }
}

/// Parse a `--tolerance` value: a finite, non-negative number.
pub fn parse_tolerance(value: &str) -> Result<f32, String> {
    let tolerance: f32 = value
        .parse()
        .map_err(|e| format!("invalid tolerance '{value}': {e}"))?;
    if tolerance.is_finite() && tolerance >= 0.0 {
        Ok(tolerance)
    } else {
        Err(format!("tolerance must be finite and non-negative, got {value}"))
    }
}

/// Short name of the error kind behind `err`, for the `error[...]` prefix.
pub fn error_kind(err: &anyhow::Error) -> &'static str {
    if let Some(runtime) = err.downcast_ref::<gantry_runtime::RuntimeError>() {
        return runtime.kind();
    }
    if err.downcast_ref::<gantry_kernels::KernelError>().is_some() {
        return "KernelSource";
    }
    if err.downcast_ref::<pipelines::VerificationFailed>().is_some() {
        return "VerificationFailed";
    }
    "Error"
}
