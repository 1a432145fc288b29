//! Device buffer allocation and host <-> device transfers.

use crate::error::{Result, RuntimeError};
use crate::session::{capture_errors, wait_idle};
use bytemuck::Pod;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Copy granularity required by the driver for buffer sizes and offsets.
pub const COPY_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

/// Handle to a buffer owned by a [`Session`](crate::Session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u32);

impl BufferId {
    /// Build an id from its raw slot index.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

/// How kernels are going to access a buffer.
///
/// The mode is declared at allocation and recorded on the buffer. Binding a
/// write-only buffer where a kernel reads (or the reverse) is a caller error
/// that is not detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Kernels only read the buffer.
    ReadOnly,
    /// Kernels only write the buffer.
    WriteOnly,
    /// Kernels read and write the buffer.
    ReadWrite,
}

/// Check an allocation request against the device's single-allocation limit.
///
/// Returns the driver-side size (rounded up to [`COPY_ALIGNMENT`]).
pub fn check_allocation(byte_len: u64, max_allocation: u64) -> Result<u64> {
    if byte_len == 0 {
        return Err(RuntimeError::AllocationFailure {
            requested: byte_len,
            reason: "zero-length buffers are not allowed".to_string(),
        });
    }

    if byte_len > max_allocation {
        return Err(RuntimeError::AllocationFailure {
            requested: byte_len,
            reason: format!("exceeds device max allocation size of {max_allocation} bytes"),
        });
    }

    let aligned = byte_len.div_ceil(COPY_ALIGNMENT) * COPY_ALIGNMENT;
    if aligned > max_allocation {
        return Err(RuntimeError::AllocationFailure {
            requested: byte_len,
            reason: format!(
                "aligned size {aligned} exceeds device max allocation size of {max_allocation} bytes"
            ),
        });
    }

    Ok(aligned)
}

/// Device-resident memory region.
#[derive(Debug)]
pub(crate) struct DeviceBuffer {
    pub buffer: wgpu::Buffer,
    /// Length requested by the caller.
    pub len: u64,
    /// Length actually reserved on the device.
    pub size: u64,
    pub access: AccessMode,
}

/// Owns a session's buffers and moves data in and out of them.
pub(crate) struct BufferStager {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    max_allocation: u64,
    wait_timeout: Option<Duration>,
    slots: Vec<Option<DeviceBuffer>>,
}

impl BufferStager {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        max_allocation: u64,
        wait_timeout: Option<Duration>,
    ) -> Self {
        Self {
            device,
            queue,
            max_allocation,
            wait_timeout,
            slots: Vec::new(),
        }
    }

    /// Allocate a buffer of `byte_len` bytes.
    ///
    /// Oversize requests fail before the driver is asked; a driver that runs
    /// out of memory also yields [`RuntimeError::AllocationFailure`].
    pub fn allocate(&mut self, byte_len: u64, access: AccessMode) -> Result<BufferId> {
        let size = check_allocation(byte_len, self.max_allocation)?;
        let id = BufferId(self.slots.len() as u32);
        let label = format!("{id} ({access:?})");

        let buffer = capture_errors(&self.device, || {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label.as_str()),
                size,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        })
        .map_err(|e| RuntimeError::AllocationFailure {
            requested: byte_len,
            reason: format!("device rejected the allocation: {e}"),
        })?;

        tracing::debug!(%id, len = byte_len, size, ?access, "buffer allocated");

        self.slots.push(Some(DeviceBuffer {
            buffer,
            len: byte_len,
            size,
            access,
        }));

        Ok(id)
    }

    pub fn get(&self, id: BufferId) -> Result<&DeviceBuffer> {
        self.slots
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(RuntimeError::UnknownBuffer(id))
    }

    /// Copy host data into a buffer and block until the copy has landed.
    pub fn upload<T: Pod>(&self, id: BufferId, data: &[T]) -> Result<()> {
        let target = self.get(id)?;
        let bytes: &[u8] = bytemuck::cast_slice(data);

        if bytes.len() as u64 != target.len {
            return Err(RuntimeError::TransferFailure {
                buffer: id,
                reason: format!(
                    "host data is {} bytes but the buffer holds {}",
                    bytes.len(),
                    target.len
                ),
            });
        }

        if bytes.len() as u64 % COPY_ALIGNMENT != 0 {
            return Err(RuntimeError::TransferFailure {
                buffer: id,
                reason: format!(
                    "transfer length {} is not a multiple of {COPY_ALIGNMENT}",
                    bytes.len()
                ),
            });
        }

        let submission = capture_errors(&self.device, || {
            self.queue.write_buffer(&target.buffer, 0, bytes);
            self.queue.submit(std::iter::empty())
        })
        .map_err(|e| RuntimeError::TransferFailure {
            buffer: id,
            reason: format!("device rejected the upload: {e}"),
        })?;
        wait_idle(&self.device, Some(submission), self.wait_timeout, "upload")?;

        tracing::debug!(%id, bytes = bytes.len(), "upload complete");
        Ok(())
    }

    /// Read a buffer back to the host, blocking until the data is available.
    pub fn download<T: Pod>(&self, id: BufferId) -> Result<Vec<T>> {
        let source = self.get(id)?;

        let staging = capture_errors(&self.device, || {
            let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("download staging"),
                size: source.size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });

            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("download copy"),
                });
            encoder.copy_buffer_to_buffer(&source.buffer, 0, &staging, 0, source.size);
            self.queue.submit(Some(encoder.finish()));
            staging
        })
        .map_err(|e| RuntimeError::TransferFailure {
            buffer: id,
            reason: format!("device rejected the readback: {e}"),
        })?;

        let slice = staging.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });

        // Waits for every submission so the map callback has fired.
        wait_idle(&self.device, None, self.wait_timeout, "download")?;

        pollster::block_on(receiver)
            .map_err(|_| RuntimeError::TransferFailure {
                buffer: id,
                reason: "map callback was dropped".to_string(),
            })?
            .map_err(|e| RuntimeError::TransferFailure {
                buffer: id,
                reason: format!("failed to map staging buffer: {e}"),
            })?;

        let result = {
            let mapped = slice.get_mapped_range();
            let bytes = &mapped[..source.len as usize];
            bytemuck::try_cast_slice::<u8, T>(bytes)
                .map(<[T]>::to_vec)
                .map_err(|e| RuntimeError::TransferFailure {
                    buffer: id,
                    reason: format!("cannot reinterpret {} bytes: {e}", bytes.len()),
                })
        };
        staging.unmap();

        tracing::debug!(%id, bytes = source.len, "download complete");
        result
    }

    /// Release one buffer ahead of the session.
    pub fn release(&mut self, id: BufferId) -> Result<()> {
        let slot = self
            .slots
            .get_mut(id.index())
            .ok_or(RuntimeError::UnknownBuffer(id))?;
        let buffer = slot.take().ok_or(RuntimeError::UnknownBuffer(id))?;
        buffer.buffer.destroy();
        tracing::debug!(%id, "buffer released");
        Ok(())
    }

    /// Release every live buffer, newest first.
    pub fn release_all(&mut self) {
        while let Some(slot) = self.slots.pop() {
            if let Some(buffer) = slot {
                buffer.buffer.destroy();
                tracing::debug!(id = %BufferId(self.slots.len() as u32), "buffer released");
            }
        }
    }

    /// Number of live buffers.
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl Drop for BufferStager {
    fn drop(&mut self) {
        self.release_all();
    }
}
