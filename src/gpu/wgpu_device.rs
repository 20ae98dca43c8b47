use anyhow::bail;

use super::device::{DeviceBuffer, RenderDevice};
use super::msaa::MsaaTarget;
use super::types::{FRAME_CONSTANTS_SIZE, RENDER_NOTE_ATTRIBUTES, RENDER_NOTE_STRIDE};

/// One recorded draw: where its constants and notes live in the frame arenas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct DrawCall {
    constants_offset: u32,
    vertex_start: u64,
    count: u32,
}

impl DrawCall {
    fn vertex_end(&self) -> u64 {
        self.vertex_start + self.count as u64 * RENDER_NOTE_STRIDE as u64
    }
}

/// CPU copies of everything drawn this frame, uploaded in one go on flush.
/// Each draw gets its own constants block and note range, so a later batch never
/// overwrites what an earlier draw reads.
#[derive(Default)]
struct FrameArena {
    uniform_alignment: u64,
    constants: Vec<u8>,
    vertices: Vec<u8>,
    draws: Vec<DrawCall>,
}

impl FrameArena {
    fn new(uniform_alignment: u64) -> Self {
        Self {
            uniform_alignment: uniform_alignment.max(FRAME_CONSTANTS_SIZE),
            ..Default::default()
        }
    }

    fn push(&mut self, constants: &[u8], notes: &[u8], count: u32) {
        let constants_offset = (self.constants.len() as u64).next_multiple_of(self.uniform_alignment);
        self.constants.resize(constants_offset as usize, 0);
        self.constants.extend_from_slice(constants);

        let vertex_start = self.vertices.len() as u64;
        self.vertices.extend_from_slice(notes);

        self.draws.push(DrawCall {
            constants_offset: constants_offset as u32,
            vertex_start,
            count,
        });
    }

    fn clear(&mut self) {
        self.constants.clear();
        self.vertices.clear();
        self.draws.clear();
    }
}

struct GrowableBuffer {
    label: &'static str,
    usage: wgpu::BufferUsages,
    buffer: wgpu::Buffer,
    capacity: u64,
}

impl GrowableBuffer {
    fn new(device: &wgpu::Device, label: &'static str, usage: wgpu::BufferUsages, capacity: u64) -> Self {
        let capacity = capacity.next_power_of_two().max(256);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: capacity,
            usage: usage | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            label,
            usage,
            buffer,
            capacity,
        }
    }

    /// Returns true when the buffer had to be recreated.
    fn ensure(&mut self, device: &wgpu::Device, len: u64) -> bool {
        if len <= self.capacity {
            return false;
        }
        *self = Self::new(device, self.label, self.usage, len);
        true
    }
}

/// [`RenderDevice`] on top of wgpu. Draws are recorded while the workers stream
/// and replayed in order inside a single render pass on [`flush`].
///
/// [`flush`]: RenderDevice::flush
pub struct WgpuNoteDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    format: wgpu::TextureFormat,
    pipeline: wgpu::RenderPipeline,
    constants_layout: wgpu::BindGroupLayout,
    uniforms: GrowableBuffer,
    constants_bind_group: wgpu::BindGroup,
    vertices: GrowableBuffer,
    msaa: MsaaTarget,
    background: wgpu::Color,

    constants_staging: Vec<u8>,
    notes_staging: Vec<u8>,
    mapped: Option<DeviceBuffer>,
    vertex_stride: Option<u32>,
    constants_bound: bool,
    arena: FrameArena,
    target: Option<wgpu::TextureView>,
}

impl WgpuNoteDevice {
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        format: wgpu::TextureFormat,
        size: (u32, u32),
        msaa_samples: u32,
        batch_capacity: usize,
        background: wgpu::Color,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("notes.wgsl"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/notes.wgsl").into()),
        });

        let constants_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame constants layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(FRAME_CONSTANTS_SIZE),
                },
                count: None,
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("notes pipeline layout"),
            bind_group_layouts: &[&constants_layout],
            immediate_size: 0,
        });

        let msaa = MsaaTarget::new(&device, format, size.0, size.1, msaa_samples);

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("notes pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_note"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: RENDER_NOTE_STRIDE as u64,
                    step_mode: wgpu::VertexStepMode::Instance,
                    attributes: &RENDER_NOTE_ATTRIBUTES,
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_note"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: msaa.samples(),
                ..Default::default()
            },
            multiview_mask: None,
            cache: None,
        });

        let uniform_alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        let batch_bytes = batch_capacity.max(1) * RENDER_NOTE_STRIDE as usize;
        let uniforms = GrowableBuffer::new(
            &device,
            "frame constants arena",
            wgpu::BufferUsages::UNIFORM,
            uniform_alignment * 128,
        );
        let vertices = GrowableBuffer::new(
            &device,
            "note instances arena",
            wgpu::BufferUsages::VERTEX,
            batch_bytes as u64 * 8,
        );
        let constants_bind_group = create_constants_bind_group(&device, &constants_layout, &uniforms.buffer);

        Self {
            device,
            queue,
            format,
            pipeline,
            constants_layout,
            uniforms,
            constants_bind_group,
            vertices,
            msaa,
            background,
            constants_staging: vec![0; FRAME_CONSTANTS_SIZE as usize],
            notes_staging: vec![0; batch_bytes],
            mapped: None,
            vertex_stride: None,
            constants_bound: false,
            arena: FrameArena::new(uniform_alignment),
            target: None,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.msaa = MsaaTarget::new(&self.device, self.format, width, height, self.msaa.samples());
    }

    /// Sets the view the next [`RenderDevice::flush`] renders into.
    pub fn begin_target(&mut self, view: wgpu::TextureView) {
        self.target = Some(view);
    }

    fn upload_arena(&mut self) {
        if self.uniforms.ensure(&self.device, self.arena.constants.len() as u64) {
            self.constants_bind_group =
                create_constants_bind_group(&self.device, &self.constants_layout, &self.uniforms.buffer);
            log!("[gpu] constants arena grown to {} bytes", self.uniforms.capacity);
        }
        if self.vertices.ensure(&self.device, self.arena.vertices.len() as u64) {
            log!("[gpu] note arena grown to {} bytes", self.vertices.capacity);
        }
        if !self.arena.constants.is_empty() {
            self.queue.write_buffer(&self.uniforms.buffer, 0, &self.arena.constants);
        }
        if !self.arena.vertices.is_empty() {
            self.queue.write_buffer(&self.vertices.buffer, 0, &self.arena.vertices);
        }
    }
}

fn create_constants_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    buffer: &wgpu::Buffer,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("frame constants bind group"),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer,
                offset: 0,
                size: wgpu::BufferSize::new(FRAME_CONSTANTS_SIZE),
            }),
        }],
    })
}

impl RenderDevice for WgpuNoteDevice {
    fn map_for_write(&mut self, buffer: DeviceBuffer) -> anyhow::Result<&mut [u8]> {
        if let Some(mapped) = self.mapped {
            bail!("cannot map {buffer:?} while {mapped:?} is mapped");
        }
        self.mapped = Some(buffer);
        Ok(match buffer {
            DeviceBuffer::Constants => self.constants_staging.as_mut_slice(),
            DeviceBuffer::Notes => self.notes_staging.as_mut_slice(),
        })
    }

    fn unmap(&mut self, buffer: DeviceBuffer) {
        if self.mapped == Some(buffer) {
            self.mapped = None;
        }
    }

    fn set_constant_buffer(&mut self, _slot: u32, buffer: DeviceBuffer) {
        self.constants_bound = buffer == DeviceBuffer::Constants;
    }

    fn set_vertex_buffer(&mut self, buffer: DeviceBuffer, stride: u32) {
        self.vertex_stride = (buffer == DeviceBuffer::Notes).then_some(stride);
    }

    fn draw(&mut self, count: u32) -> anyhow::Result<()> {
        if let Some(mapped) = self.mapped {
            bail!("draw while {mapped:?} is mapped");
        }
        let Some(stride) = self.vertex_stride else {
            bail!("draw without a note vertex buffer");
        };
        if stride != RENDER_NOTE_STRIDE {
            bail!("note stride {stride} does not match the pipeline's {RENDER_NOTE_STRIDE}");
        }
        if !self.constants_bound {
            bail!("draw without frame constants");
        }
        let len = count as usize * stride as usize;
        if len > self.notes_staging.len() {
            bail!("draw of {count} notes overruns the {} byte note buffer", self.notes_staging.len());
        }
        if count == 0 {
            return Ok(());
        }
        self.arena.push(&self.constants_staging, &self.notes_staging[..len], count);
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        let Some(target) = self.target.take() else {
            self.arena.clear();
            bail!("flush without a render target");
        };
        self.upload_arena();

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("notes encoder"),
        });
        {
            let (color_view, resolve_target) = self.msaa.attachment(&target);
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("notes pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color_view,
                    resolve_target,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.background),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            rpass.set_pipeline(&self.pipeline);
            for draw in &self.arena.draws {
                rpass.set_bind_group(0, &self.constants_bind_group, &[draw.constants_offset]);
                rpass.set_vertex_buffer(0, self.vertices.buffer.slice(draw.vertex_start..draw.vertex_end()));
                rpass.draw(0..6, 0..draw.count);
            }
        }
        self.queue.submit(Some(encoder.finish()));
        self.arena.clear();
        Ok(())
    }

    fn abort_frame(&mut self) {
        self.arena.clear();
        self.mapped = None;
        self.target = None;
    }
}
