//! Headless GPU device initialization.
//!
//! Provides [`GpuContext`] which owns the wgpu state the precompute and sky
//! passes run on, and [`GpuContextError`] for clear diagnostics when
//! initialization fails.

use std::sync::Arc;

/// Error type for GPU context initialization failures.
#[derive(Debug, thiserror::Error)]
pub enum GpuContextError {
    /// No compatible GPU adapter found.
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    /// Failed to request GPU device.
    #[error("failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
}

/// Owns the instance, adapter, device and queue. Device and queue are shared
/// with every [`WgpuBackend`](crate::WgpuBackend) created from the context.
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    /// Initialize the GPU asynchronously without a surface.
    pub async fn new() -> Result<Self, GpuContextError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = match instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
        {
            Ok(adapter) => adapter,
            Err(_) => return Err(GpuContextError::NoAdapter),
        };

        let info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?}, {:?})",
            info.name,
            info.backend,
            info.device_type
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("aether-device"),
                required_features: wgpu::Features::empty(),
                required_limits: required_limits(&adapter.limits()),
                memory_hints: wgpu::MemoryHints::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                trace: wgpu::Trace::Off,
            })
            .await?;

        Ok(Self {
            instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }
}

/// Default limits, raised to whatever the adapter allows for storage buffer
/// bindings so full resolution scattering tables fit in one binding.
fn required_limits(supported: &wgpu::Limits) -> wgpu::Limits {
    let defaults = wgpu::Limits::default();
    wgpu::Limits {
        max_storage_buffer_binding_size: supported
            .max_storage_buffer_binding_size
            .max(defaults.max_storage_buffer_binding_size),
        max_buffer_size: supported.max_buffer_size.max(defaults.max_buffer_size),
        ..defaults
    }
}

/// Initialize the GPU synchronously using `pollster`.
pub fn init_gpu_context_blocking() -> Result<GpuContext, GpuContextError> {
    pollster::block_on(GpuContext::new())
}

#[cfg(test)]
pub(crate) fn create_test_device_queue() -> Option<(Arc<wgpu::Device>, Arc<wgpu::Queue>)> {
    let context = init_gpu_context_blocking().ok()?;
    Some((context.device, context.queue))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_context_fields_exist() {
        #[allow(dead_code)]
        fn assert_fields(ctx: &GpuContext) {
            let _: &wgpu::Instance = &ctx.instance;
            let _: &wgpu::Adapter = &ctx.adapter;
            let _: &Arc<wgpu::Device> = &ctx.device;
            let _: &Arc<wgpu::Queue> = &ctx.queue;
        }
    }

    #[test]
    fn test_required_limits_never_drop_below_defaults() {
        let defaults = wgpu::Limits::default();
        let weak = wgpu::Limits {
            max_storage_buffer_binding_size: 1 << 20,
            max_buffer_size: 1 << 20,
            ..wgpu::Limits::default()
        };
        let limits = required_limits(&weak);
        assert_eq!(
            limits.max_storage_buffer_binding_size,
            defaults.max_storage_buffer_binding_size
        );
        assert_eq!(limits.max_buffer_size, defaults.max_buffer_size);
    }

    #[test]
    fn test_error_messages_are_readable() {
        assert_eq!(
            GpuContextError::NoAdapter.to_string(),
            "no compatible GPU adapter found"
        );
    }
}
