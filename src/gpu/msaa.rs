pub fn normalize_msaa_samples(samples: u32) -> u32 {
    match samples {
        0 | 1 => 1,
        2 => 2,
        3 | 4 => 4,
        _ => 8,
    }
}

/// Highest sample count not above `requested` that the adapter can render `format` with.
pub fn select_supported_msaa_samples(
    adapter: &wgpu::Adapter,
    format: wgpu::TextureFormat,
    requested: u32,
) -> u32 {
    // 1x and 4x are guaranteed; 2x and 8x need TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES.
    let requested = normalize_msaa_samples(requested);
    let flags = adapter.get_texture_format_features(format).flags;

    [
        (2, wgpu::TextureFormatFeatureFlags::MULTISAMPLE_X2),
        (4, wgpu::TextureFormatFeatureFlags::MULTISAMPLE_X4),
        (8, wgpu::TextureFormatFeatureFlags::MULTISAMPLE_X8),
    ]
    .into_iter()
    .filter(|(samples, flag)| *samples <= requested && flags.contains(*flag))
    .map(|(samples, _)| samples)
    .max()
    .unwrap_or(1)
}

/// Multisampled color target resolved into the swapchain image. Absent at 1x.
pub struct MsaaTarget {
    samples: u32,
    view: Option<wgpu::TextureView>,
}

impl MsaaTarget {
    pub fn new(device: &wgpu::Device, format: wgpu::TextureFormat, width: u32, height: u32, samples: u32) -> Self {
        if samples <= 1 {
            return Self {
                samples: 1,
                view: None,
            };
        }

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("msaa color"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: samples,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        Self {
            samples,
            view: Some(texture.create_view(&wgpu::TextureViewDescriptor::default())),
        }
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Attachment view and resolve target for drawing into `target`.
    pub fn attachment<'a>(
        &'a self,
        target: &'a wgpu::TextureView,
    ) -> (&'a wgpu::TextureView, Option<&'a wgpu::TextureView>) {
        match &self.view {
            Some(view) => (view, Some(target)),
            None => (target, None),
        }
    }
}
