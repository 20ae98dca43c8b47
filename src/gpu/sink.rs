use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, anyhow, bail};

use super::device::{DeviceBuffer, RenderDevice};
use super::types::{FrameConstants, RENDER_NOTE_STRIDE, RenderNote};
use crate::layout::KeySlot;

const CONSTANTS_SLOT: u32 = 0;

struct SinkState<D> {
    device: D,
    constants: FrameConstants,
}

/// Serializes batch flushes from the key workers onto one rendering device.
pub struct DeviceBufferSink<D: RenderDevice> {
    state: Mutex<SinkState<D>>,
}

impl<D: RenderDevice> DeviceBufferSink<D> {
    pub fn new(device: D) -> Self {
        Self {
            state: Mutex::new(SinkState {
                device,
                constants: FrameConstants::default(),
            }),
        }
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, SinkState<D>>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("render device lock poisoned"))
    }

    pub fn begin_frame(&self, screen_aspect: f32, border_width: f32) -> anyhow::Result<()> {
        let mut state = self.lock()?;
        state.constants = FrameConstants {
            note_left_x: 0.0,
            note_right_x: 1.0,
            border_width,
            screen_aspect,
        };
        let SinkState { device, constants } = &mut *state;
        write_constants(device, constants).context("writing frame constants")?;
        device.set_constant_buffer(CONSTANTS_SLOT, DeviceBuffer::Constants);
        Ok(())
    }

    /// Uploads one batch of `key`'s notes and draws it in that key's column.
    pub fn flush(&self, key: usize, slot: &KeySlot, notes: &[RenderNote]) -> anyhow::Result<()> {
        if notes.is_empty() {
            return Ok(());
        }
        let mut state = self.lock()?;
        let SinkState { device, constants } = &mut *state;

        let bytes: &[u8] = bytemuck::cast_slice(notes);
        let region = device
            .map_for_write(DeviceBuffer::Notes)
            .with_context(|| format!("key {key}: mapping note buffer"))?;
        if bytes.len() > region.len() {
            let region_len = region.len();
            device.unmap(DeviceBuffer::Notes);
            bail!(
                "key {key}: batch of {} bytes does not fit the {region_len} byte note buffer",
                bytes.len()
            );
        }
        region[..bytes.len()].copy_from_slice(bytes);
        device.unmap(DeviceBuffer::Notes);
        device.set_vertex_buffer(DeviceBuffer::Notes, RENDER_NOTE_STRIDE);

        constants.note_left_x = slot.x as f32;
        constants.note_right_x = slot.right() as f32;
        write_constants(device, constants).with_context(|| format!("key {key}: writing constants"))?;
        device.set_constant_buffer(CONSTANTS_SLOT, DeviceBuffer::Constants);

        device
            .draw(notes.len() as u32)
            .with_context(|| format!("key {key}: drawing {} notes", notes.len()))
    }

    pub fn end_frame(&self) -> anyhow::Result<()> {
        self.lock()?.device.flush().context("flushing render device")
    }

    pub fn abort_frame(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.device.abort_frame();
        }
    }

    pub fn device_mut(&mut self) -> anyhow::Result<&mut D> {
        self.state
            .get_mut()
            .map(|state| &mut state.device)
            .map_err(|_| anyhow!("render device lock poisoned"))
    }
}

fn write_constants<D: RenderDevice>(device: &mut D, constants: &FrameConstants) -> anyhow::Result<()> {
    let bytes = bytemuck::bytes_of(constants);
    let region = device.map_for_write(DeviceBuffer::Constants)?;
    if region.len() < bytes.len() {
        let region_len = region.len();
        device.unmap(DeviceBuffer::Constants);
        bail!("constant buffer holds {region_len} bytes, need {}", bytes.len());
    }
    region[..bytes.len()].copy_from_slice(bytes);
    device.unmap(DeviceBuffer::Constants);
    Ok(())
}
