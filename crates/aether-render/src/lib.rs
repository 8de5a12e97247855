//! wgpu execution of the scattering precompute, plus a full-screen sky pass
//! that consumes the resulting lookup textures.

pub mod backend;
pub mod gpu;
pub mod readback;
pub mod shader;
pub mod sky;

pub use backend::{PassUniform, WgpuBackend, WgpuTexture};
pub use gpu::{GpuContext, GpuContextError, init_gpu_context_blocking};
pub use readback::ReadbackError;
pub use shader::{ShaderError, ShaderLibrary};
pub use sky::{MaterialUniform, SkyCamera, SkyRenderer, SkyError};
