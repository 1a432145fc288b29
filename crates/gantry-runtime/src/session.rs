//! Device context, queue, program and kernels bound to one selected device.

use crate::buffer::{AccessMode, BufferId, BufferStager, DeviceBuffer};
use crate::config::RuntimeConfig;
use crate::device::{DeviceInfo, SelectedDevice};
use crate::error::{Result, RuntimeError};
use crate::program::{KernelParam, KernelSignature, KernelSource, Program, check_workgroup_size};
use bytemuck::Pod;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

/// A compiled compute entry point.
pub struct Kernel {
    signature: KernelSignature,
    pub(crate) pipeline: wgpu::ComputePipeline,
    /// `None` when the kernel has no parameters.
    pub(crate) layout: Option<wgpu::BindGroupLayout>,
}

impl Kernel {
    fn create(
        device: &wgpu::Device,
        module: &wgpu::ShaderModule,
        signature: KernelSignature,
    ) -> Self {
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(signature.name.as_str()),
            layout: None,
            module,
            entry_point: Some(signature.name.as_str()),
            compilation_options: Default::default(),
            cache: None,
        });

        let layout = if signature.params.is_empty() {
            None
        } else {
            Some(pipeline.get_bind_group_layout(0))
        };

        Self {
            signature,
            pipeline,
            layout,
        }
    }

    /// Entry point name.
    pub fn name(&self) -> &str {
        &self.signature.name
    }

    /// Parameters in binding order.
    pub fn params(&self) -> &[KernelParam] {
        &self.signature.params
    }

    /// Declared work-group size.
    pub fn workgroup_size(&self) -> [u32; 3] {
        self.signature.workgroup_size
    }
}

/// Everything needed to run kernels on one device.
///
/// Resources are released in reverse acquisition order when the session is
/// closed or dropped: buffers newest first, then kernels, the program, the
/// queue and finally the device context.
///
/// # Example
/// ```no_run
/// # use gantry_runtime::{AccessMode, DeviceClass, DeviceSelector, RuntimeConfig, Session};
/// # fn main() -> gantry_runtime::Result<()> {
/// let config = RuntimeConfig::default();
/// let device = DeviceSelector::new(&config).select(DeviceClass::Gpu)?;
/// let source = "@compute @workgroup_size(1) fn noop() {}";
/// let mut session = Session::open(&device, source, &["noop"], &config)?;
/// let buffer = session.allocate(16, AccessMode::ReadWrite)?;
/// session.upload(buffer, &[1.0f32, 2.0, 3.0, 4.0])?;
/// session.close()?;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    // Field order is drop order.
    stager: BufferStager,
    kernels: Vec<Kernel>,
    program: wgpu::ShaderModule,
    queue: Arc<wgpu::Queue>,
    device: Arc<wgpu::Device>,
    info: DeviceInfo,
    config: RuntimeConfig,
}

impl Session {
    /// Create a context on `device`, build `kernel_source` and resolve the
    /// named entry points.
    ///
    /// `kernel_source` is plain WGSL or a [`KernelSource`] carrying shader
    /// defs for its `#{NAME}` placeholders.
    ///
    /// # Errors
    /// [`RuntimeError::BuildFailure`] if the source does not compile or the
    /// driver rejects a pipeline, [`RuntimeError::KernelNotFound`] if an
    /// entry point is missing and [`RuntimeError::DeviceRequest`] if the
    /// driver refuses a context.
    #[tracing::instrument(skip_all, fields(device = %device.info().name))]
    pub fn open<'a>(
        device: &SelectedDevice,
        kernel_source: impl Into<KernelSource<'a>>,
        entry_points: &[&str],
        config: &RuntimeConfig,
    ) -> Result<Self> {
        let program = Program::compile(kernel_source)?;
        let info = device.info().clone();

        let signatures = entry_points
            .iter()
            .map(|name| {
                let signature = program.signature(name)?;
                check_workgroup_size(&signature, &info.limits)?;
                Ok(signature)
            })
            .collect::<Result<Vec<_>>>()?;

        let (context, queue) = pollster::block_on(device.adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("gantry session"),
                required_features: wgpu::Features::empty(),
                required_limits: device.adapter.limits(),
                ..Default::default()
            },
        ))
        .map_err(|e| RuntimeError::DeviceRequest(e.to_string()))?;
        context.on_uncaptured_error(Arc::new(|err| {
            tracing::error!(%err, "uncaptured device error");
        }));
        let context = Arc::new(context);
        let queue = Arc::new(queue);

        let (module, kernels) = capture_errors(&context, || {
            let module = context.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("gantry program"),
                source: wgpu::ShaderSource::Naga(Cow::Owned(program.module().clone())),
            });
            let kernels: Vec<Kernel> = signatures
                .into_iter()
                .map(|signature| Kernel::create(&context, &module, signature))
                .collect();
            (module, kernels)
        })
        .map_err(|e| RuntimeError::BuildFailure {
            log: format!("device rejected the program: {e}"),
        })?;

        let stager = BufferStager::new(
            Arc::clone(&context),
            Arc::clone(&queue),
            info.max_allocation(),
            config.wait_timeout,
        );

        tracing::info!(
            kernels = kernels.len(),
            max_allocation = info.max_allocation(),
            "session opened"
        );

        Ok(Self {
            stager,
            kernels,
            program: module,
            queue,
            device: context,
            info,
            config: config.clone(),
        })
    }

    /// Capability snapshot of the session's device.
    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Limits of the session's device.
    pub fn limits(&self) -> &wgpu::Limits {
        &self.info.limits
    }

    /// Configuration the session was opened with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Look up a kernel by entry point name.
    pub fn kernel(&self, name: &str) -> Option<&Kernel> {
        self.kernels.iter().find(|k| k.name() == name)
    }

    /// Allocate a device buffer of `byte_len` bytes.
    pub fn allocate(&mut self, byte_len: u64, access: AccessMode) -> Result<BufferId> {
        self.stager.allocate(byte_len, access)
    }

    /// Allocate a buffer sized for `len` elements of `T`.
    pub fn allocate_for<T: Pod>(&mut self, len: usize, access: AccessMode) -> Result<BufferId> {
        let byte_len = (len as u64).saturating_mul(std::mem::size_of::<T>() as u64);
        self.stager.allocate(byte_len, access)
    }

    /// Copy `data` into `buffer`, blocking until the transfer completes.
    pub fn upload<T: Pod>(&self, buffer: BufferId, data: &[T]) -> Result<()> {
        self.stager.upload(buffer, data)
    }

    /// Read `buffer` back to the host, blocking until the transfer completes.
    pub fn download<T: Pod>(&self, buffer: BufferId) -> Result<Vec<T>> {
        self.stager.download(buffer)
    }

    /// Release a buffer before the session closes.
    pub fn release(&mut self, buffer: BufferId) -> Result<()> {
        self.stager.release(buffer)
    }

    /// Byte length and declared access mode of a live buffer.
    pub fn buffer_info(&self, buffer: BufferId) -> Result<(u64, AccessMode)> {
        let buffer = self.stager.get(buffer)?;
        Ok((buffer.len, buffer.access))
    }

    /// Number of buffers currently held by the session.
    pub fn live_buffers(&self) -> usize {
        self.stager.live()
    }

    /// Block until all submitted work has completed.
    pub fn finish(&self) -> Result<()> {
        wait_idle(&self.device, None, self.config.wait_timeout, "finish")
    }

    /// Wait for outstanding work, then release every resource.
    pub fn close(self) -> Result<()> {
        let result = self.finish();
        drop(self);
        result
    }

    pub(crate) fn buffer(&self, id: BufferId) -> Result<&DeviceBuffer> {
        self.stager.get(id)
    }

    pub(crate) fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub(crate) fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stager.release_all();
        while let Some(kernel) = self.kernels.pop() {
            tracing::debug!(kernel = kernel.name(), "kernel released");
        }
        tracing::debug!(program = ?self.program, "session closed");
    }
}

/// Run `f` with validation and out-of-memory errors captured in error scopes
/// instead of reaching the device's uncaptured-error handler.
///
/// Returns the first captured error; whatever `f` produced is dropped.
pub(crate) fn capture_errors<T>(
    device: &wgpu::Device,
    f: impl FnOnce() -> T,
) -> std::result::Result<T, wgpu::Error> {
    let out_of_memory = device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    let validation = device.push_error_scope(wgpu::ErrorFilter::Validation);

    let value = f();

    // Scopes pop innermost first.
    let validation = pollster::block_on(validation.pop());
    let out_of_memory = pollster::block_on(out_of_memory.pop());
    match validation.or(out_of_memory) {
        Some(err) => Err(err),
        None => Ok(value),
    }
}

/// Block until `submission` (or all work, when `None`) has completed.
pub(crate) fn wait_idle(
    device: &wgpu::Device,
    submission: Option<wgpu::SubmissionIndex>,
    timeout: Option<Duration>,
    operation: &str,
) -> Result<()> {
    match device.poll(wgpu::PollType::Wait {
        submission_index: submission,
        timeout,
    }) {
        Ok(_) => Ok(()),
        Err(wgpu::PollError::Timeout) => Err(RuntimeError::DeviceHang {
            operation: operation.to_string(),
            timeout: timeout.unwrap_or_default(),
        }),
        Err(e) => Err(RuntimeError::PollFailure {
            operation: operation.to_string(),
            reason: e.to_string(),
        }),
    }
}
