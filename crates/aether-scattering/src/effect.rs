//! User-tunable render-time parameters, separate from the precomputation.

use glam::{Vec2, Vec3};

use crate::config::LuminanceMode;

/// Exposure and white balance applied when the textures are sampled.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EffectParameters {
    pub exposure: f32,
    pub do_white_balance: bool,
}

impl Default for EffectParameters {
    fn default() -> Self {
        Self {
            exposure: 10.0,
            do_white_balance: false,
        }
    }
}

impl EffectParameters {
    /// Exposure as the shader expects it. Luminance values are about 1e5
    /// times larger than radiance values.
    pub fn shader_exposure(&self, luminance: LuminanceMode) -> f32 {
        match luminance {
            LuminanceMode::None => self.exposure,
            LuminanceMode::Approximate | LuminanceMode::Precomputed => self.exposure * 1e-5,
        }
    }

    /// `normalized` when white balancing, white otherwise.
    pub fn white_point(&self, normalized: Option<Vec3>) -> Vec3 {
        match (self.do_white_balance, normalized) {
            (true, Some(white_point)) => white_point,
            (true, None) => {
                log::warn!("White balance requested but the solar spectrum has no white point");
                Vec3::ONE
            }
            (false, _) => Vec3::ONE,
        }
    }
}

/// `(tan r, cos r)` of the sun's angular radius `r`.
pub fn sun_size(sun_angular_radius: f32) -> Vec2 {
    Vec2::new(sun_angular_radius.tan(), sun_angular_radius.cos())
}

/// Planet center used when no world position is known: the camera origin
/// sits on the ground.
pub fn default_earth_center(bottom_radius: f64, length_unit_in_meters: f64) -> Vec3 {
    Vec3::new(0.0, -(bottom_radius / length_unit_in_meters) as f32, 0.0)
}
