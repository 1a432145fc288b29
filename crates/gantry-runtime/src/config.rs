//! Runtime configuration.

use crate::device::DeviceClass;
use std::time::Duration;

/// How dependent stages of a chain are ordered on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ordering {
    /// Submit every stage to the session's single in-order queue. Stages
    /// execute in submission order.
    #[default]
    InOrderQueue,

    /// Additionally block on each stage's completion before the next one is
    /// enqueued.
    StageBarrier,
}

/// Configuration for device selection and session behaviour.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Driver backends (platforms) to enumerate.
    pub backends: wgpu::Backends,
    /// Device class requested from the selector.
    pub device_class: DeviceClass,
    /// Upper bound on any single wait for device work (`None` = wait forever).
    pub wait_timeout: Option<Duration>,
    /// Stage ordering used by the dispatch chain.
    pub ordering: Ordering,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            device_class: DeviceClass::Default,
            wait_timeout: Some(Duration::from_secs(60)),
            ordering: Ordering::InOrderQueue,
        }
    }
}

impl RuntimeConfig {
    /// Set the requested device class.
    pub fn with_device_class(mut self, class: DeviceClass) -> Self {
        self.device_class = class;
        self
    }

    /// Set the wait bound.
    pub fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Set the stage ordering.
    pub fn with_ordering(mut self, ordering: Ordering) -> Self {
        self.ordering = ordering;
        self
    }

    /// Restrict enumeration to the given backends.
    pub fn with_backends(mut self, backends: wgpu::Backends) -> Self {
        self.backends = backends;
        self
    }
}
