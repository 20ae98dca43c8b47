pub mod device;
pub mod gpu;
pub mod msaa;
pub mod sink;
pub mod types;
pub mod wgpu_device;

#[cfg(test)]
pub mod recording;
