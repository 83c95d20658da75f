use anyhow::{Context, Result};

use super::WgpuDevice;

/// Initialization parameters for [`WgpuDevice`].
///
/// The device renders offscreen only; no surface is involved, so there is no
/// format or present-mode choice to make here.
#[derive(Debug, Clone)]
pub struct WgpuInit {
    /// Adapter preference.
    pub power_preference: wgpu::PowerPreference,

    /// Required wgpu features. Nothing in the device needs any.
    pub required_features: wgpu::Features,

    /// Limits requested from the adapter/device.
    pub required_limits: wgpu::Limits,

    /// Use a software adapter (e.g. for CI).
    pub force_fallback_adapter: bool,

    /// Bytes of texture and renderbuffer memory the device may hand out
    /// before allocations fail with `OutOfMemory`. `None` is unlimited.
    pub memory_budget: Option<u64>,
}

impl Default for WgpuInit {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            force_fallback_adapter: false,
            memory_budget: None,
        }
    }
}

impl WgpuDevice {
    /// Acquires an adapter and a device without any window.
    pub async fn new(init: WgpuInit) -> Result<Self> {
        let WgpuInit {
            power_preference,
            required_features,
            required_limits,
            force_fallback_adapter,
            memory_budget,
        } = init;

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        log::info!("wgpu adapter: {:?}", adapter.get_info());

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("vellum device"),
                required_features,
                required_limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        Ok(Self::from_parts(device, queue, memory_budget))
    }

    /// Blocking variant of [`WgpuDevice::new`].
    pub fn new_blocking(init: WgpuInit) -> Result<Self> {
        pollster::block_on(Self::new(init))
    }
}
