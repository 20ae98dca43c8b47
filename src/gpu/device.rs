/// The two buffers the note pipeline writes through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceBuffer {
    Constants,
    Notes,
}

/// Minimal immediate-mode device the note sink drives.
///
/// Calls arrive serialized (the sink holds a lock around every flush), but from
/// whichever worker thread produced the batch, hence `Send`.
pub trait RenderDevice: Send {
    /// Exposes the CPU side of `buffer` for writing. Must be paired with [`unmap`].
    ///
    /// [`unmap`]: RenderDevice::unmap
    fn map_for_write(&mut self, buffer: DeviceBuffer) -> anyhow::Result<&mut [u8]>;

    fn unmap(&mut self, buffer: DeviceBuffer);

    fn set_constant_buffer(&mut self, slot: u32, buffer: DeviceBuffer);

    fn set_vertex_buffer(&mut self, buffer: DeviceBuffer, stride: u32);

    /// Draws the first `count` elements of the bound vertex buffer.
    fn draw(&mut self, count: u32) -> anyhow::Result<()>;

    /// Submits everything drawn since the previous flush.
    fn flush(&mut self) -> anyhow::Result<()>;

    /// Drops work recorded for a frame that failed part-way.
    fn abort_frame(&mut self) {}
}
