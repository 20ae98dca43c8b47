use anyhow::bail;

use super::device::{DeviceBuffer, RenderDevice};
use super::types::{FRAME_CONSTANTS_SIZE, FrameConstants, RENDER_NOTE_STRIDE, RenderNote};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeviceOp {
    Map(DeviceBuffer),
    Unmap(DeviceBuffer),
    SetConstantBuffer(u32, DeviceBuffer),
    SetVertexBuffer(DeviceBuffer, u32),
    Draw(u32),
    Flush,
    AbortFrame,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedDraw {
    pub constants: FrameConstants,
    pub notes: Vec<RenderNote>,
}

/// Device double that checks call ordering and keeps a copy of every draw.
pub struct RecordingDevice {
    pub ops: Vec<DeviceOp>,
    pub draws: Vec<RecordedDraw>,
    pub fail_draws: bool,
    constants: Vec<u8>,
    notes: Vec<u8>,
    mapped: Option<DeviceBuffer>,
    vertex_buffer: Option<(DeviceBuffer, u32)>,
    constant_buffer: Option<DeviceBuffer>,
}

impl RecordingDevice {
    pub fn new(note_capacity: usize) -> Self {
        Self {
            ops: Vec::new(),
            draws: Vec::new(),
            fail_draws: false,
            constants: vec![0; FRAME_CONSTANTS_SIZE as usize],
            notes: vec![0; note_capacity * RENDER_NOTE_STRIDE as usize],
            mapped: None,
            vertex_buffer: None,
            constant_buffer: None,
        }
    }

    pub fn flush_count(&self) -> usize {
        self.ops.iter().filter(|op| **op == DeviceOp::Flush).count()
    }
}

impl RenderDevice for RecordingDevice {
    fn map_for_write(&mut self, buffer: DeviceBuffer) -> anyhow::Result<&mut [u8]> {
        if let Some(mapped) = self.mapped {
            bail!("{buffer:?} mapped while {mapped:?} is still mapped");
        }
        self.mapped = Some(buffer);
        self.ops.push(DeviceOp::Map(buffer));
        Ok(match buffer {
            DeviceBuffer::Constants => self.constants.as_mut_slice(),
            DeviceBuffer::Notes => self.notes.as_mut_slice(),
        })
    }

    fn unmap(&mut self, buffer: DeviceBuffer) {
        assert_eq!(self.mapped.take(), Some(buffer), "unmap without matching map");
        self.ops.push(DeviceOp::Unmap(buffer));
    }

    fn set_constant_buffer(&mut self, slot: u32, buffer: DeviceBuffer) {
        self.constant_buffer = Some(buffer);
        self.ops.push(DeviceOp::SetConstantBuffer(slot, buffer));
    }

    fn set_vertex_buffer(&mut self, buffer: DeviceBuffer, stride: u32) {
        self.vertex_buffer = Some((buffer, stride));
        self.ops.push(DeviceOp::SetVertexBuffer(buffer, stride));
    }

    fn draw(&mut self, count: u32) -> anyhow::Result<()> {
        self.ops.push(DeviceOp::Draw(count));
        if self.fail_draws {
            bail!("device removed");
        }
        if self.mapped.is_some() {
            bail!("draw while a buffer is mapped");
        }
        let Some((DeviceBuffer::Notes, stride)) = self.vertex_buffer else {
            bail!("draw without a note vertex buffer");
        };
        if self.constant_buffer.is_none() {
            bail!("draw without constants");
        }
        let len = count as usize * stride as usize;
        if len > self.notes.len() {
            bail!("draw of {count} elements overruns the note buffer");
        }

        let notes = self.notes[..len]
            .chunks_exact(stride as usize)
            .map(bytemuck::pod_read_unaligned::<RenderNote>)
            .collect();
        let constants = bytemuck::pod_read_unaligned::<FrameConstants>(&self.constants);
        self.draws.push(RecordedDraw { constants, notes });
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.ops.push(DeviceOp::Flush);
        Ok(())
    }

    fn abort_frame(&mut self) {
        self.mapped = None;
        self.ops.push(DeviceOp::AbortFrame);
    }
}
