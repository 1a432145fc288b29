//! Host-side compute dispatch on top of `wgpu`.
//!
//! This crate selects a compute device, builds a kernel program on it and
//! runs ordered chains of kernel launches over device buffers.
//!
//! # Architecture
//!
//! The runtime is organised around five responsibilities:
//! 1. **Device selection** - enumerate platforms and devices, pick one by class
//! 2. **Resource session** - one context, queue, program and kernel set per device
//! 3. **Buffer staging** - allocate device buffers and copy data in and out
//! 4. **Dispatch chains** - bind arguments and enqueue dependent stages in order
//! 5. **Result checking** - compare device output against a host reference
//!
//! # Example
//!
//! ```no_run
//! use gantry_runtime::{
//!     AccessMode, ChainPlan, DeviceSelector, DispatchChain, KernelArg, KernelSource,
//!     ResultOracle, RuntimeConfig, Scalar, Session, ShaderDefValue, Stage, WorkSize,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = RuntimeConfig::default();
//!     let device = DeviceSelector::new(&config).select(config.device_class)?;
//!
//!     let text = std::fs::read_to_string("vadd.wgsl")?;
//!     let source = KernelSource::new(&text).with_def("WORKGROUP_SIZE", ShaderDefValue::UInt(64));
//!     let mut session = Session::open(&device, source, &["vadd"], &config)?;
//!
//!     let a: Vec<f32> = (0..1024).map(|i| i as f32).collect();
//!     let b: Vec<f32> = (0..1024).map(|i| 2.0 * i as f32).collect();
//!     let da = session.allocate_for::<f32>(a.len(), AccessMode::ReadOnly)?;
//!     let db = session.allocate_for::<f32>(b.len(), AccessMode::ReadOnly)?;
//!     let dc = session.allocate_for::<f32>(a.len(), AccessMode::WriteOnly)?;
//!     session.upload(da, &a)?;
//!     session.upload(db, &b)?;
//!
//!     let stage = Stage::new(
//!         "vadd",
//!         vec![da.into(), db.into(), dc.into(), KernelArg::Scalar(Scalar::U32(1024))],
//!         WorkSize::One(1024),
//!     );
//!     DispatchChain::run(&mut session, &ChainPlan::new().then(stage))?;
//!
//!     let c: Vec<f32> = session.download(dc)?;
//!     let expected: Vec<f32> = a.iter().zip(&b).map(|(x, y)| x + y).collect();
//!     println!("{}", ResultOracle::absolute(0.001).check(&expected, &c));
//!
//!     session.close()?;
//!     Ok(())
//! }
//! ```

mod buffer;
mod chain;
mod config;
mod device;
mod error;
mod oracle;
mod program;
mod report;
mod session;

// Public exports
pub use buffer::{AccessMode, BufferId, COPY_ALIGNMENT, check_allocation};
pub use chain::{
    ChainPlan, ChainReport, DispatchChain, KernelArg, Scalar, Stage, WorkSize, check_arguments,
    workgroup_count,
};
pub use config::{Ordering, RuntimeConfig};
pub use device::{
    DeviceClass, DeviceInfo, DeviceKind, DeviceSelector, PLATFORM_ORDER, PlatformInfo,
    SelectedDevice, pick,
};
pub use error::{Result, RuntimeError};
pub use oracle::{ResultOracle, Tolerance, Verification, verify, verify_relative};
pub use naga_oil::compose::ShaderDefValue;
pub use program::{
    KernelParam, KernelSignature, KernelSource, ParamKind, Program, ShaderDefs,
    check_workgroup_size,
};
pub use report::{CapabilityReport, DeviceSummary};
pub use session::{Kernel, Session};
