//! Kernel program compilation and entry-point reflection.
//!
//! Sources are WGSL templates. naga_oil's composer substitutes their shader
//! defs and builds a validated naga module before anything is created on the
//! device, so a malformed program never produces a session.

use crate::error::{Result, RuntimeError};
use naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};
use naga_oil::compose::{Composer, ComposerError, NagaModuleDescriptor, ShaderDefValue};
use std::collections::HashMap;

/// Shader def names mapped to the values substituted for `#{NAME}`.
pub type ShaderDefs = HashMap<String, ShaderDefValue>;

/// WGSL source text plus the shader defs it is built with.
#[derive(Debug, Clone)]
pub struct KernelSource<'a> {
    /// WGSL text, possibly containing `#{NAME}` placeholders.
    pub text: &'a str,
    /// Name reported in build logs.
    pub path: &'a str,
    /// Values for the placeholders.
    pub defs: ShaderDefs,
}

impl<'a> KernelSource<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            path: "kernel.wgsl",
            defs: ShaderDefs::new(),
        }
    }

    /// Name the source in build logs.
    pub fn with_path(mut self, path: &'a str) -> Self {
        self.path = path;
        self
    }

    /// Add every def in `defs`, replacing existing values.
    pub fn with_defs(mut self, defs: ShaderDefs) -> Self {
        self.defs.extend(defs);
        self
    }

    /// Add one def.
    pub fn with_def(mut self, name: impl Into<String>, value: ShaderDefValue) -> Self {
        self.defs.insert(name.into(), value);
        self
    }
}

impl<'a> From<&'a str> for KernelSource<'a> {
    fn from(text: &'a str) -> Self {
        Self::new(text)
    }
}

impl<'a> From<&'a String> for KernelSource<'a> {
    fn from(text: &'a String) -> Self {
        Self::new(text)
    }
}

/// How a kernel parameter is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Read-only storage buffer.
    StorageRead,
    /// Read-write storage buffer.
    StorageReadWrite,
    /// Uniform block holding by-value scalars.
    Uniform {
        /// Size of the block in bytes.
        size: u64,
    },
}

impl ParamKind {
    /// Whether a device buffer binds here.
    pub fn is_storage(self) -> bool {
        matches!(self, ParamKind::StorageRead | ParamKind::StorageReadWrite)
    }
}

/// One parameter of a kernel, in binding order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelParam {
    /// Binding slot in group 0.
    pub binding: u32,
    /// Variable name in the source, if any.
    pub name: Option<String>,
    /// Binding kind.
    pub kind: ParamKind,
}

/// Reflected parameter list and launch shape of a compute entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSignature {
    /// Entry point name.
    pub name: String,
    /// Parameters sorted by binding.
    pub params: Vec<KernelParam>,
    /// Work-group size declared by the kernel.
    pub workgroup_size: [u32; 3],
}

/// A parsed and validated kernel program.
#[derive(Debug)]
pub struct Program {
    module: naga::Module,
    info: ModuleInfo,
}

impl Program {
    /// Substitute shader defs, then parse and validate the WGSL.
    ///
    /// # Errors
    /// [`RuntimeError::BuildFailure`] with the compiler diagnostic. A
    /// placeholder with no matching def is left in the text and fails to
    /// parse.
    pub fn compile<'a>(source: impl Into<KernelSource<'a>>) -> Result<Self> {
        let source = source.into();
        let mut composer = Composer::default().with_capabilities(Capabilities::all());

        let module = composer
            .make_naga_module(NagaModuleDescriptor {
                source: source.text,
                file_path: source.path,
                shader_defs: source.defs,
                ..Default::default()
            })
            .map_err(|e| RuntimeError::BuildFailure {
                log: composer_log(&e, &composer),
            })?;

        let info = Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .map_err(|e| RuntimeError::BuildFailure {
                log: validation_log(e.as_inner()),
            })?;

        Ok(Self { module, info })
    }

    /// The validated module, as handed to the device.
    pub fn module(&self) -> &naga::Module {
        &self.module
    }

    /// Names of the compute entry points, in source order.
    pub fn entry_points(&self) -> impl Iterator<Item = &str> {
        self.module
            .entry_points
            .iter()
            .filter(|ep| ep.stage == naga::ShaderStage::Compute)
            .map(|ep| ep.name.as_str())
    }

    /// Reflect the parameters of a compute entry point.
    ///
    /// Only the group-0 buffers the entry point actually uses are reported.
    pub fn signature(&self, name: &str) -> Result<KernelSignature> {
        let (index, entry) = self
            .module
            .entry_points
            .iter()
            .enumerate()
            .find(|(_, ep)| ep.name == name && ep.stage == naga::ShaderStage::Compute)
            .ok_or_else(|| RuntimeError::KernelNotFound {
                name: name.to_string(),
            })?;

        let usage = self.info.get_entry_point(index);
        let mut params = Vec::new();

        for (handle, var) in self.module.global_variables.iter() {
            if usage[handle].is_empty() {
                continue;
            }
            let Some(binding) = &var.binding else {
                continue;
            };

            if binding.group != 0 {
                return Err(RuntimeError::BuildFailure {
                    log: format!(
                        "kernel '{name}' binds group {} (only group 0 is supported)",
                        binding.group
                    ),
                });
            }

            let kind = match var.space {
                naga::AddressSpace::Storage { access } => {
                    if access.contains(naga::StorageAccess::STORE) {
                        ParamKind::StorageReadWrite
                    } else {
                        ParamKind::StorageRead
                    }
                }
                naga::AddressSpace::Uniform => ParamKind::Uniform {
                    size: u64::from(self.module.types[var.ty].inner.size(self.module.to_ctx())),
                },
                other => {
                    return Err(RuntimeError::BuildFailure {
                        log: format!(
                            "kernel '{name}' binding {} is not a buffer ({other:?})",
                            binding.binding
                        ),
                    });
                }
            };

            params.push(KernelParam {
                binding: binding.binding,
                name: var.name.clone(),
                kind,
            });
        }

        params.sort_by_key(|p| p.binding);

        Ok(KernelSignature {
            name: name.to_string(),
            params,
            workgroup_size: entry.workgroup_size,
        })
    }
}

fn composer_log(err: &ComposerError, composer: &Composer) -> String {
    let log = err.emit_to_string(composer);
    if log.trim().is_empty() {
        err.to_string()
    } else {
        log
    }
}

fn validation_log(err: &naga::valid::ValidationError) -> String {
    let mut log = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        log.push_str("\n  caused by: ");
        log.push_str(&cause.to_string());
        source = cause.source();
    }
    log
}

/// Check a kernel's declared work-group size against the device limits.
pub fn check_workgroup_size(signature: &KernelSignature, limits: &wgpu::Limits) -> Result<()> {
    let [x, y, z] = signature.workgroup_size;
    let max = [
        limits.max_compute_workgroup_size_x,
        limits.max_compute_workgroup_size_y,
        limits.max_compute_workgroup_size_z,
    ];

    if x > max[0] || y > max[1] || z > max[2] {
        return Err(RuntimeError::BuildFailure {
            log: format!(
                "kernel '{}' work-group size {x}x{y}x{z} exceeds device limit {}x{}x{}",
                signature.name, max[0], max[1], max[2]
            ),
        });
    }

    let invocations = u64::from(x) * u64::from(y) * u64::from(z);
    if invocations > u64::from(limits.max_compute_invocations_per_workgroup) {
        return Err(RuntimeError::BuildFailure {
            log: format!(
                "kernel '{}' uses {invocations} invocations per work-group, device allows {}",
                signature.name, limits.max_compute_invocations_per_workgroup
            ),
        });
    }

    Ok(())
}
