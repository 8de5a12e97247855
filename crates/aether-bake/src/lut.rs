//! PNG dumps of the precomputed lookup textures.
//!
//! 3D textures are written as their depth slices stacked vertically. Each
//! image is normalized by its brightest RGB channel so that transmittance,
//! irradiance and scattering are all visible regardless of their scale.

use std::path::{Path, PathBuf};

use aether_render::{WgpuBackend, WgpuTexture};
use aether_scattering::{
    CpuBackend, CpuTexture, ModelTextures, PrecomputeBackend, TextureDescriptor,
};
use image::{Rgb, RgbImage};

use crate::BakeError;

/// A backend whose textures can be copied back to main memory.
pub trait TexelSource: PrecomputeBackend {
    fn texels(&self, texture: &Self::Texture) -> Result<(TextureDescriptor, Vec<[f32; 4]>), BakeError>;
}

impl TexelSource for CpuBackend {
    fn texels(&self, texture: &CpuTexture) -> Result<(TextureDescriptor, Vec<[f32; 4]>), BakeError> {
        let desc = texture.descriptor().clone();
        let texels = texture
            .read_texels()
            .ok_or(BakeError::Released(desc.label))?;
        Ok((desc, texels))
    }
}

impl TexelSource for WgpuBackend {
    fn texels(&self, texture: &WgpuTexture) -> Result<(TextureDescriptor, Vec<[f32; 4]>), BakeError> {
        let texels = self.read_texels(texture)?;
        Ok((texture.descriptor().clone(), texels))
    }
}

/// Tone-map `texels` into an RGB image, `depth` slices stacked vertically.
pub fn encode_texels(desc: &TextureDescriptor, texels: &[[f32; 4]]) -> RgbImage {
    let max = texels
        .iter()
        .flat_map(|texel| texel[..3].iter().copied())
        .filter(|value| value.is_finite())
        .fold(0.0f32, f32::max);
    let scale = if max > 0.0 { 1.0 / max } else { 0.0 };

    let to_byte = |value: f32| {
        let value = if value.is_finite() { value * scale } else { 0.0 };
        (value.clamp(0.0, 1.0) * 255.0).round() as u8
    };

    // Rows are flipped so that texel row 0 ends up at the bottom of each slice.
    let height = desc.height;
    RgbImage::from_fn(desc.width, height * desc.depth, |x, y| {
        let z = y / height;
        let row = height - 1 - y % height;
        let index = (z as usize * height as usize + row as usize) * desc.width as usize + x as usize;
        let texel = texels.get(index).copied().unwrap_or([0.0; 4]);
        Rgb([to_byte(texel[0]), to_byte(texel[1]), to_byte(texel[2])])
    })
}

/// Write every texture the model owns into `directory` as
/// `<label>.png`. Returns the written paths.
pub fn dump_textures<B>(
    backend: &B,
    textures: &ModelTextures<B::Texture>,
    directory: &Path,
) -> Result<Vec<PathBuf>, BakeError>
where
    B: TexelSource,
{
    std::fs::create_dir_all(directory)?;
    let mut written = Vec::new();
    for texture in textures.iter() {
        let (desc, texels) = backend.texels(texture)?;
        if desc.texel_count() <= 1 {
            continue;
        }
        let path = directory.join(format!("{}.png", desc.label));
        encode_texels(&desc, &texels).save(&path)?;
        tracing::info!(
            path = %path.display(),
            width = desc.width,
            height = desc.height,
            depth = desc.depth,
            "Wrote lookup texture"
        );
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_scattering::TexelPrecision;

    #[test]
    fn test_encode_normalizes_to_brightest_channel() {
        let desc = TextureDescriptor::new_2d("irradiance", 2, 1, TexelPrecision::Full);
        let image = encode_texels(&desc, &[[0.5, 0.25, 0.0, 9.0], [2.0, 1.0, 0.0, 9.0]]);
        assert_eq!(image.dimensions(), (2, 1));
        assert_eq!(image.get_pixel(0, 0), &Rgb([64, 32, 0]));
        assert_eq!(image.get_pixel(1, 0), &Rgb([255, 128, 0]));
    }

    #[test]
    fn test_encode_stacks_depth_slices() {
        let desc = TextureDescriptor::new_3d("scattering", 1, 2, 2, TexelPrecision::Full);
        let texels = [
            [0.0, 0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ];
        let image = encode_texels(&desc, &texels);
        assert_eq!(image.dimensions(), (1, 4));
        // Slice 0 top row is texel row 1.
        assert_eq!(image.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(image.get_pixel(0, 1), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(0, 2), &Rgb([0, 0, 255]));
        assert_eq!(image.get_pixel(0, 3), &Rgb([0, 255, 0]));
    }

    #[test]
    fn test_encode_ignores_non_finite_values() {
        let desc = TextureDescriptor::new_2d("transmittance", 2, 1, TexelPrecision::Full);
        let image = encode_texels(&desc, &[[f32::NAN, 1.0, 0.0, 0.0], [f32::INFINITY, 0.0, 0.0, 0.0]]);
        assert_eq!(image.get_pixel(0, 0), &Rgb([0, 255, 0]));
        assert_eq!(image.get_pixel(1, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_released_cpu_texture_is_an_error() {
        let backend = CpuBackend::new();
        let desc = TextureDescriptor::new_2d("irradiance", 2, 2, TexelPrecision::Full);
        let texture = backend.create_texture(&desc);
        assert_eq!(backend.texels(&texture).expect("live texture").1.len(), 4);

        backend.release_texture(&texture);
        assert!(matches!(
            backend.texels(&texture),
            Err(BakeError::Released("irradiance"))
        ));
    }
}
