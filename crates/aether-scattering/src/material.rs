//! The shader parameter sink a model binds into, and the names it writes.

use std::collections::BTreeMap;

use glam::Vec4;

/// Names shared with the consuming sky and water shaders.
pub mod names {
    pub const TRANSMITTANCE_TEXTURE: &str = "transmittance_texture";
    pub const SCATTERING_TEXTURE: &str = "scattering_texture";
    pub const IRRADIANCE_TEXTURE: &str = "irradiance_texture";
    pub const SINGLE_MIE_SCATTERING_TEXTURE: &str = "single_mie_scattering_texture";

    pub const TRANSMITTANCE_TEXTURE_WIDTH: &str = "transmittance_texture_width";
    pub const TRANSMITTANCE_TEXTURE_HEIGHT: &str = "transmittance_texture_height";
    pub const SCATTERING_TEXTURE_R_SIZE: &str = "scattering_texture_r_size";
    pub const SCATTERING_TEXTURE_MU_SIZE: &str = "scattering_texture_mu_size";
    pub const SCATTERING_TEXTURE_MU_S_SIZE: &str = "scattering_texture_mu_s_size";
    pub const SCATTERING_TEXTURE_NU_SIZE: &str = "scattering_texture_nu_size";
    pub const IRRADIANCE_TEXTURE_WIDTH: &str = "irradiance_texture_width";
    pub const IRRADIANCE_TEXTURE_HEIGHT: &str = "irradiance_texture_height";

    pub const SOLAR_IRRADIANCE: &str = "solar_irradiance";
    pub const RAYLEIGH_SCATTERING: &str = "rayleigh_scattering";
    pub const MIE_SCATTERING: &str = "mie_scattering";
    pub const MIE_EXTINCTION: &str = "mie_extinction";
    pub const SUN_ANGULAR_RADIUS: &str = "sun_angular_radius";
    pub const BOTTOM_RADIUS: &str = "bottom_radius";
    pub const TOP_RADIUS: &str = "top_radius";
    pub const MIE_PHASE_FUNCTION_G: &str = "mie_phase_function_g";
    pub const MU_S_MIN: &str = "mu_s_min";
    pub const MIE_SCATTERING_TO_EXTINCTION: &str = "mie_scattering_to_extinction";
    pub const COMBINED_SCATTERING_TEXTURES: &str = "combined_scattering_textures";
    pub const USE_LUMINANCE: &str = "use_luminance";
    pub const SKY_SPECTRAL_RADIANCE_TO_LUMINANCE: &str = "sky_spectral_radiance_to_luminance";
    pub const SUN_SPECTRAL_RADIANCE_TO_LUMINANCE: &str = "sun_spectral_radiance_to_luminance";

    pub const EXPOSURE: &str = "exposure";
    pub const EARTH_CENTER: &str = "earth_center";
    pub const SUN_SIZE: &str = "sun_size";
    pub const SUN_DIRECTION: &str = "sun_direction";
    pub const WHITE_POINT: &str = "white_point";

    pub const PLANET_CENTER: &str = "planet_center";
    pub const PLANET_RADIUS: &str = "planet_radius";
}

/// Key-value sink for shader parameters. Vectors always carry four lanes;
/// narrower values leave the unused lanes at zero.
pub trait MaterialProperties<T> {
    fn set_float(&mut self, name: &str, value: f32);
    fn set_int(&mut self, name: &str, value: i32);
    fn set_vector(&mut self, name: &str, value: Vec4);
    fn set_texture(&mut self, name: &str, texture: &T);
}

#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue<T> {
    Float(f32),
    Int(i32),
    Vector(Vec4),
    Texture(T),
}

/// In-memory [`MaterialProperties`] keyed by name, in name order.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyBlock<T> {
    values: BTreeMap<String, PropertyValue<T>>,
}

impl<T> Default for PropertyBlock<T> {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }
}

impl<T> PropertyBlock<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue<T>> {
        self.values.get(name)
    }

    pub fn float(&self, name: &str) -> Option<f32> {
        match self.values.get(name) {
            Some(PropertyValue::Float(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i32> {
        match self.values.get(name) {
            Some(PropertyValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn vector(&self, name: &str) -> Option<Vec4> {
        match self.values.get(name) {
            Some(PropertyValue::Vector(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn texture(&self, name: &str) -> Option<&T> {
        match self.values.get(name) {
            Some(PropertyValue::Texture(texture)) => Some(texture),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue<T>)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<T: Clone> MaterialProperties<T> for PropertyBlock<T> {
    fn set_float(&mut self, name: &str, value: f32) {
        self.values.insert(name.to_owned(), PropertyValue::Float(value));
    }

    fn set_int(&mut self, name: &str, value: i32) {
        self.values.insert(name.to_owned(), PropertyValue::Int(value));
    }

    fn set_vector(&mut self, name: &str, value: Vec4) {
        self.values.insert(name.to_owned(), PropertyValue::Vector(value));
    }

    fn set_texture(&mut self, name: &str, texture: &T) {
        self.values
            .insert(name.to_owned(), PropertyValue::Texture(texture.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_block_typed_access() {
        let mut block = PropertyBlock::<u32>::new();
        block.set_float(names::EXPOSURE, 10.0);
        block.set_int(names::SCATTERING_TEXTURE_NU_SIZE, 8);
        block.set_vector(names::SUN_DIRECTION, Vec4::Y);
        block.set_texture(names::TRANSMITTANCE_TEXTURE, &7);

        assert_eq!(block.float(names::EXPOSURE), Some(10.0));
        assert_eq!(block.int(names::SCATTERING_TEXTURE_NU_SIZE), Some(8));
        assert_eq!(block.vector(names::SUN_DIRECTION), Some(Vec4::Y));
        assert_eq!(block.texture(names::TRANSMITTANCE_TEXTURE), Some(&7));
        assert_eq!(block.float(names::SUN_DIRECTION), None, "wrong kind is not coerced");
        assert_eq!(block.len(), 4);
    }

    #[test]
    fn test_setting_a_name_twice_overwrites() {
        let mut block = PropertyBlock::<u32>::new();
        block.set_float(names::EXPOSURE, 1.0);
        block.set_float(names::EXPOSURE, 2.0);
        assert_eq!(block.float(names::EXPOSURE), Some(2.0));
        assert_eq!(block.len(), 1);
    }
}
