//! Kernel sources and host references for the gantry sample pipelines.
//!
//! Bundles the WGSL kernel templates the drivers launch with their shader
//! defs, the sequential host code their results are checked against, and
//! deterministic input generators.
//!
//! # Example
//!
//! ```
//! use gantry_kernels::{ShaderDefValue, VADD, default_workgroup_defs, reference};
//!
//! assert!(VADD.contains("#{WORKGROUP_SIZE}"));
//! let defs = default_workgroup_defs(64);
//! assert_eq!(defs["WORKGROUP_SIZE"], ShaderDefValue::UInt(64));
//!
//! let expected = reference::vadd(&[1.0, 2.0], &[3.0, 4.0]);
//! assert_eq!(expected, vec![4.0, 6.0]);
//! ```

pub mod error;
pub mod reference;
pub mod sources;
pub mod values;

pub use error::{KernelError, Result};
pub use sources::{
    MMUL, MMUL_ENTRY, ShaderDefValue, ShaderDefs, VADD, VADD_ENTRY, VADD3, VADD3_ENTRY,
    default_tile_defs, default_workgroup_defs, get_kernel_source, load_kernel,
};
pub use values::{ValueGenerator, ramp};
