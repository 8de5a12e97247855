//! Copying lookup textures back to main memory.

use std::sync::mpsc;

use aether_scattering::PrecomputeBackend;

use crate::backend::{WgpuBackend, WgpuTexture};

#[derive(Debug, thiserror::Error)]
pub enum ReadbackError {
    #[error("texture '{0}' was released")]
    Released(&'static str),

    #[error("failed to map readback buffer: {0}")]
    Map(#[from] wgpu::BufferAsyncError),

    #[error("device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),

    #[error("map callback was dropped before it ran")]
    CallbackDropped,
}

impl WgpuBackend {
    /// Every texel of `texture` in storage order (x fastest, then y, then z).
    /// Waits for all submitted work first.
    pub fn read_texels(&self, texture: &WgpuTexture) -> Result<Vec<[f32; 4]>, ReadbackError> {
        let desc = texture.descriptor();
        if texture.is_released() {
            return Err(ReadbackError::Released(desc.label));
        }
        self.barrier();

        let size = texture.buffer().size();
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("aether-readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("aether-readback"),
            });
        encoder.copy_buffer_to_buffer(texture.buffer(), 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::PollType::wait_indefinitely())?;
        rx.recv().map_err(|_| ReadbackError::CallbackDropped)??;

        let texels = {
            let mapped = slice.get_mapped_range();
            let texels: &[[f32; 4]] = bytemuck::cast_slice(&mapped[..]);
            texels[..desc.texel_count()].to_vec()
        };
        staging.unmap();
        log::debug!("Read back {} texels of '{}'", texels.len(), desc.label);
        Ok(texels)
    }
}
