//! Error types for the runtime crate.

use crate::buffer::BufferId;
use crate::device::DeviceClass;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while selecting a device, building a session or dispatching
/// work onto it.
///
/// None of these are retried: arguments, sizes and hardware availability are
/// fixed for the duration of a run.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The driver exposes no platform at all.
    #[error("no compute platform found")]
    NoPlatformFound,

    /// Platforms exist but none of them exposes a device of the requested class.
    #[error("no {class} device found on any platform")]
    NoDeviceFound {
        /// Device class that was requested.
        class: DeviceClass,
    },

    /// The adapter refused to create a logical device.
    #[error("failed to create device context: {0}")]
    DeviceRequest(String),

    /// Kernel source failed to compile. `log` is the compiler diagnostic, verbatim.
    #[error("kernel build failed:\n{log}")]
    BuildFailure {
        /// Compiler diagnostic text.
        log: String,
    },

    /// A requested entry point is not a compute entry point of the program.
    #[error("kernel entry point '{name}' not found in program")]
    KernelNotFound {
        /// Entry point name.
        name: String,
    },

    /// Device memory could not be reserved for a buffer.
    #[error("allocation of {requested} bytes failed: {reason}")]
    AllocationFailure {
        /// Requested byte length.
        requested: u64,
        /// Why the request was refused.
        reason: String,
    },

    /// The buffer id does not name a live buffer of this session.
    #[error("unknown buffer {0}")]
    UnknownBuffer(BufferId),

    /// Arguments of a stage do not fit the kernel's parameter list.
    #[error("stage {stage}: kernel argument error: {reason}")]
    KernelArgumentError {
        /// Index of the stage in its chain.
        stage: usize,
        /// What did not fit.
        reason: String,
    },

    /// The stage could not be enqueued.
    #[error("stage {stage}: enqueue failed: {reason}")]
    EnqueueError {
        /// Index of the stage in its chain.
        stage: usize,
        /// Why the launch was rejected.
        reason: String,
    },

    /// A stage does not consume the buffer its predecessor produces.
    #[error("stage {stage} reads {found} but its predecessor produced {expected}")]
    BrokenChain {
        /// Index of the consuming stage.
        stage: usize,
        /// Output buffer of the previous stage.
        expected: BufferId,
        /// Input buffer of this stage.
        found: BufferId,
    },

    /// A host <-> device copy did not complete.
    #[error("transfer on {buffer} failed: {reason}")]
    TransferFailure {
        /// Buffer being copied.
        buffer: BufferId,
        /// Why the copy failed.
        reason: String,
    },

    /// The device did not finish outstanding work within the wait bound.
    #[error("device did not complete {operation} within {timeout:?}")]
    DeviceHang {
        /// Operation that was waiting.
        operation: String,
        /// Configured bound.
        timeout: Duration,
    },

    /// Waiting on the device failed for a reason other than the wait bound.
    #[error("waiting for {operation} failed: {reason}")]
    PollFailure {
        /// Operation that was waiting.
        operation: String,
        /// Driver message.
        reason: String,
    },
}

impl RuntimeError {
    /// Stable short name of the error kind, for reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::NoPlatformFound => "NoPlatformFound",
            RuntimeError::NoDeviceFound { .. } => "NoDeviceFound",
            RuntimeError::DeviceRequest(_) => "DeviceRequest",
            RuntimeError::BuildFailure { .. } => "BuildFailure",
            RuntimeError::KernelNotFound { .. } => "KernelNotFound",
            RuntimeError::AllocationFailure { .. } => "AllocationFailure",
            RuntimeError::UnknownBuffer(_) => "UnknownBuffer",
            RuntimeError::KernelArgumentError { .. } => "KernelArgumentError",
            RuntimeError::EnqueueError { .. } => "EnqueueError",
            RuntimeError::BrokenChain { .. } => "BrokenChain",
            RuntimeError::TransferFailure { .. } => "TransferFailure",
            RuntimeError::DeviceHang { .. } => "DeviceHang",
            RuntimeError::PollFailure { .. } => "PollFailure",
        }
    }

    /// Index of the chain stage the error belongs to, if any.
    pub fn stage(&self) -> Option<usize> {
        match self {
            RuntimeError::KernelArgumentError { stage, .. }
            | RuntimeError::EnqueueError { stage, .. }
            | RuntimeError::BrokenChain { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Specialized Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
