//! Ground-level sky preview rendered with the baked textures.

use std::path::{Path, PathBuf};

use aether_config::OutputConfig;
use aether_render::{MaterialUniform, SkyCamera, SkyRenderer, WgpuBackend, WgpuTexture};
use aether_scattering::{ModelHandle, ModelArena, PropertyBlock};
use glam::Vec3;

use crate::BakeError;

/// Elevation of the preview view direction above the horizon.
const HORIZON_PITCH_DEGREES: f32 = 10.0;

/// Camera `altitude` length units above the ground, looking at the horizon
/// towards the sun. `earth_center` and `bottom_radius` are in length units.
pub fn preview_camera(
    earth_center: Vec3,
    bottom_radius: f32,
    altitude: f32,
    sun_direction: Vec3,
    fov_y_degrees: f32,
    aspect: f32,
) -> SkyCamera {
    let up = (-earth_center).try_normalize().unwrap_or(Vec3::Y);
    let position = earth_center + up * (bottom_radius + altitude);

    let towards_sun = sun_direction - up * sun_direction.dot(up);
    let horizontal = towards_sun
        .try_normalize()
        .unwrap_or_else(|| up.any_orthonormal_vector());
    let pitch = HORIZON_PITCH_DEGREES.to_radians();
    let forward = horizontal * pitch.cos() + up * pitch.sin();

    SkyCamera::look_at(
        position,
        position + forward,
        up,
        fov_y_degrees.to_radians(),
        aspect,
    )
}

/// Render the sky as seen by the model at `handle` and write `sky.png`.
pub fn render_sky_preview(
    backend: &WgpuBackend,
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    arena: &ModelArena<WgpuBackend>,
    handle: ModelHandle,
    output: &OutputConfig,
    directory: &Path,
) -> Result<PathBuf, BakeError> {
    let model = arena.get(handle).ok_or(BakeError::MissingModel)?;
    let mut block = PropertyBlock::<WgpuTexture>::new();
    model.bind_to_material(&mut block)?;

    let material = MaterialUniform::from_properties(&block)?;
    let length_unit = model.config().length_unit_in_meters;
    let camera = preview_camera(
        Vec3::from_array(material.earth_center),
        material.bottom_radius,
        (output.preview_altitude_m / length_unit) as f32,
        Vec3::from_array(material.sun_direction),
        output.preview_fov_degrees,
        output.preview_width as f32 / output.preview_height.max(1) as f32,
    );

    let renderer = SkyRenderer::new(device, wgpu::TextureFormat::Rgba8Unorm);
    renderer.update_material(queue, &material);
    renderer.update_camera(queue, &camera);
    let bind_group = renderer.create_bind_group(backend, &block)?;
    let pixels = renderer.render_offscreen(
        device,
        queue,
        &bind_group,
        output.preview_width,
        output.preview_height,
    )?;

    std::fs::create_dir_all(directory)?;
    let path = directory.join("sky.png");
    let image = image::RgbaImage::from_raw(output.preview_width, output.preview_height, pixels)
        .ok_or(BakeError::PreviewSize)?;
    image.save(&path)?;
    tracing::info!(
        path = %path.display(),
        width = output.preview_width,
        height = output.preview_height,
        "Wrote sky preview"
    );
    Ok(path)
}
