//! WGSL kernel sources.
//!
//! Sources are templates: work-group dimensions are written as `#{NAME}` and
//! substituted from [`ShaderDefs`] by naga_oil's composer when the program is
//! built.

// Re-export naga_oil types for callers building their own defs
pub use naga_oil::compose::ShaderDefValue;

use crate::error::{KernelError, Result};
use std::collections::HashMap;
use std::path::Path;

/// Collection of shader definitions (shader def names to values)
pub type ShaderDefs = HashMap<String, ShaderDefValue>;

/// `c = a + b` over `count` elements.
pub const VADD: &str = include_str!("../shaders/vadd.wgsl");
/// Entry point of [`VADD`].
pub const VADD_ENTRY: &str = "vadd";

/// `d = a + b + c` over `count` elements.
pub const VADD3: &str = include_str!("../shaders/vadd3.wgsl");
/// Entry point of [`VADD3`].
pub const VADD3_ENTRY: &str = "vadd3";

/// `c = a * b` for `n x n` matrices, launched over a 2-D extent.
pub const MMUL: &str = include_str!("../shaders/mmul.wgsl");
/// Entry point of [`MMUL`].
pub const MMUL_ENTRY: &str = "mmul";

/// Get a bundled kernel template and its entry point by name.
pub fn get_kernel_source(name: &str) -> Option<(&'static str, &'static str)> {
    match name {
        "vadd" => Some((VADD, VADD_ENTRY)),
        "vadd3" => Some((VADD3, VADD3_ENTRY)),
        "mmul" => Some((MMUL, MMUL_ENTRY)),
        _ => None,
    }
}

/// Defs for the one-dimensional vector kernels.
pub fn default_workgroup_defs(workgroup_size: u32) -> ShaderDefs {
    let mut defs = ShaderDefs::new();
    defs.insert(
        "WORKGROUP_SIZE".to_string(),
        ShaderDefValue::UInt(workgroup_size),
    );
    defs
}

/// Defs for the two-dimensional matrix kernel.
pub fn default_tile_defs(tile_size: u32) -> ShaderDefs {
    let mut defs = ShaderDefs::new();
    defs.insert("TILE_SIZE".to_string(), ShaderDefValue::UInt(tile_size));
    defs
}

/// Read a kernel source file.
pub fn load_kernel(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    std::fs::read_to_string(path).map_err(|source| KernelError::Io {
        path: path.to_path_buf(),
        source,
    })
}
