use std::fmt;
use std::sync::Arc;

use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::config::Config;
use crate::frame::{FrameStats, NoteRenderer};
use crate::notes::NoteSource;

use super::msaa;
use super::sink::DeviceBufferSink;
use super::wgpu_device::WgpuNoteDevice;

#[derive(Debug)]
pub enum FrameError {
    Surface(wgpu::SurfaceError),
    Device(anyhow::Error),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Surface(err) => write!(f, "surface: {err}"),
            FrameError::Device(err) => write!(f, "device: {err:#}"),
        }
    }
}

impl std::error::Error for FrameError {}

impl From<wgpu::SurfaceError> for FrameError {
    fn from(err: wgpu::SurfaceError) -> Self {
        FrameError::Surface(err)
    }
}

impl From<anyhow::Error> for FrameError {
    fn from(err: anyhow::Error) -> Self {
        FrameError::Device(err)
    }
}

pub struct GpuRenderer {
    _window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    config: wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,
    sink: DeviceBufferSink<WgpuNoteDevice>,
}

impl GpuRenderer {
    pub fn new(window: Arc<Window>, app_config: &Config) -> anyhow::Result<Self> {
        let size = window.inner_size();
        let instance = wgpu::Instance::default();

        // The surface borrows the window; keeping the Arc here keeps it alive.
        let surface = instance.create_surface(window.clone())?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|e| anyhow::anyhow!("request_adapter failed: {e}"))?;

        let requested_msaa = msaa::normalize_msaa_samples(app_config.performance.msaa_samples);
        let mut required_features = wgpu::Features::empty();
        if requested_msaa != 1
            && requested_msaa != 4
            && adapter
                .features()
                .contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES)
        {
            required_features |= wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES;
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("device"),
            required_features,
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::Off,
            experimental_features: wgpu::ExperimentalFeatures::default(),
        }))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let Some(&first_format) = surface_caps.formats.first() else {
            anyhow::bail!("surface reports no supported formats");
        };
        let Some(&alpha_mode) = surface_caps.alpha_modes.first() else {
            anyhow::bail!("surface reports no supported alpha modes");
        };
        let format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .unwrap_or(first_format);

        let has_mode = |mode| surface_caps.present_modes.contains(&mode);
        let present_mode = if app_config.performance.prefer_vrr {
            if has_mode(wgpu::PresentMode::Mailbox) {
                wgpu::PresentMode::Mailbox
            } else {
                wgpu::PresentMode::Fifo
            }
        } else if has_mode(wgpu::PresentMode::Immediate) {
            wgpu::PresentMode::Immediate
        } else if has_mode(wgpu::PresentMode::Mailbox) {
            wgpu::PresentMode::Mailbox
        } else {
            // always supported
            wgpu::PresentMode::Fifo
        };

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let msaa_samples =
            msaa::select_supported_msaa_samples(&adapter, config.format, app_config.performance.msaa_samples);
        let render = app_config.render.sanitized();
        let note_device = WgpuNoteDevice::new(
            device.clone(),
            queue,
            config.format,
            (config.width, config.height),
            msaa_samples,
            render.batch_capacity,
            render.background_color(),
        );

        log!(
            "[gpu] adapter {:?}, format {:?}, {:?}, msaa {}x",
            adapter.get_info().name,
            config.format,
            present_mode,
            msaa_samples
        );

        Ok(Self {
            _window: window,
            surface,
            device,
            config,
            size,
            sink: DeviceBufferSink::new(note_device),
        })
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        self.size = new_size;
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }

        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);

        match self.sink.device_mut() {
            Ok(device) => device.resize(new_size.width, new_size.height),
            Err(err) => log!("[gpu] resize skipped: {err:#}"),
        }
    }

    /// Draws one frame of `notes` at song time `time` and presents it.
    pub fn render<S: NoteSource + ?Sized>(
        &mut self,
        notes: &S,
        renderer: &mut NoteRenderer,
        time: f64,
    ) -> Result<FrameStats, FrameError> {
        if self.size.width == 0 || self.size.height == 0 {
            return Ok(FrameStats::default());
        }

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.sink.device_mut()?.begin_target(view);

        let screen_aspect = self.config.height as f32 / self.config.width as f32;
        let stats = renderer.render_frame(notes, &self.sink, time, screen_aspect)?;
        output.present();
        Ok(stats)
    }
}
