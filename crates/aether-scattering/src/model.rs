//! The scattering model: configuration, precomputed textures and the binding
//! contract towards consuming shaders.

use std::sync::Arc;

use glam::Vec3;

use crate::backend::PrecomputeBackend;
use crate::config::{LuminanceMode, ScatteringConfig};
use crate::effect::{self, EffectParameters};
use crate::error::ScatteringError;
use crate::material::{MaterialProperties, names};
use crate::orchestrator::{ModelTextures, PrecomputeOrchestrator};
use crate::reference::ReferenceAtmosphere;
use crate::registry::ScatteringResources;
use crate::spectrum::{self, RGB_LAMBDAS};
use crate::uniform::AtmosphereUniform;

/// Scalars bound next to the textures, derived once at `init`.
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeConstants {
    pub solar_irradiance: Vec3,
    pub rayleigh_scattering: Vec3,
    pub mie_scattering: Vec3,
    pub mie_extinction: Vec3,
    pub sun_angular_radius: f32,
    pub bottom_radius: f32,
    pub top_radius: f32,
    pub mie_phase_function_g: f32,
    pub mu_s_min: f32,
    pub mie_scattering_to_extinction: Vec3,
    pub combined_scattering_textures: bool,
    pub sky_spectral_radiance_to_luminance: Vec3,
    pub sun_spectral_radiance_to_luminance: Vec3,
    /// Solar spectrum color divided by its channel mean, if it has any
    /// visible energy.
    pub white_point: Option<Vec3>,
}

impl RuntimeConstants {
    pub fn new(config: &ScatteringConfig) -> Self {
        let atmosphere = AtmosphereUniform::from_config(config, RGB_LAMBDAS);
        let mie_scattering = Vec3::from_array(atmosphere.mie_scattering);
        let mie_extinction = Vec3::from_array(atmosphere.mie_extinction);
        let ratio = |s: f32, e: f32| if e > 0.0 { s / e } else { 0.0 };

        let spectrum = &config.spectrum;
        let factors = |lambda_power: f64| {
            let k = spectrum::spectral_radiance_to_luminance_factors(
                &spectrum.wavelengths,
                &spectrum.solar_irradiance,
                lambda_power,
            );
            Vec3::new(k[0] as f32, k[1] as f32, k[2] as f32)
        };
        let sky_spectral_radiance_to_luminance = if config.precomputes_luminance() {
            Vec3::splat(spectrum::MAX_LUMINOUS_EFFICACY as f32)
        } else {
            factors(-3.0)
        };
        let white_point = spectrum::normalized_white_point(
            &spectrum.wavelengths,
            &spectrum.solar_irradiance,
        )
        .ok()
        .map(|[r, g, b]| Vec3::new(r as f32, g as f32, b as f32));

        Self {
            solar_irradiance: Vec3::from_array(atmosphere.solar_irradiance),
            rayleigh_scattering: Vec3::from_array(atmosphere.rayleigh_scattering),
            mie_scattering,
            mie_extinction,
            sun_angular_radius: atmosphere.sun_angular_radius,
            bottom_radius: atmosphere.bottom_radius,
            top_radius: atmosphere.top_radius,
            mie_phase_function_g: atmosphere.mie_phase_function_g,
            mu_s_min: atmosphere.mu_s_min,
            mie_scattering_to_extinction: Vec3::new(
                ratio(mie_scattering.x, mie_extinction.x),
                ratio(mie_scattering.y, mie_extinction.y),
                ratio(mie_scattering.z, mie_extinction.z),
            ),
            combined_scattering_textures: config.combine_scattering_textures,
            sky_spectral_radiance_to_luminance,
            sun_spectral_radiance_to_luminance: factors(0.0),
            white_point,
        }
    }
}

enum ModelState<B: PrecomputeBackend> {
    Uninitialized,
    Ready {
        backend: Arc<B>,
        textures: ModelTextures<B::Texture>,
        constants: RuntimeConstants,
    },
    Released,
}

/// One atmosphere: immutable configuration, the textures precomputed from
/// it, and per-frame world state.
///
/// `Uninitialized -> Ready -> Released`; nothing returns to
/// `Uninitialized`. Dropping a ready model releases its textures.
pub struct ScatteringModel<B: PrecomputeBackend> {
    config: ScatteringConfig,
    /// World-space planet center, in length units. `None` places the camera
    /// origin on the ground.
    pub planet_center: Option<Vec3>,
    /// Direction towards the sun. Normalized when bound.
    pub sun_direction: Vec3,
    pub effect: EffectParameters,
    state: ModelState<B>,
}

impl<B: PrecomputeBackend> ScatteringModel<B> {
    pub fn new(config: ScatteringConfig) -> Self {
        Self {
            config,
            planet_center: None,
            sun_direction: Vec3::Y,
            effect: EffectParameters::default(),
            state: ModelState::Uninitialized,
        }
    }

    /// Model for a reference planet, with its world placement and sun.
    pub fn from_reference(reference: &ReferenceAtmosphere) -> Self {
        let mut model = Self::new(reference.scattering_config());
        model.planet_center = reference.planet_center;
        model.sun_direction = reference.sun_direction;
        model
    }

    pub fn config(&self) -> &ScatteringConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ModelState::Ready { .. })
    }

    pub fn is_released(&self) -> bool {
        matches!(self.state, ModelState::Released)
    }

    pub fn textures(&self) -> Option<&ModelTextures<B::Texture>> {
        match &self.state {
            ModelState::Ready { textures, .. } => Some(textures),
            _ => None,
        }
    }

    pub fn runtime_constants(&self) -> Option<&RuntimeConstants> {
        match &self.state {
            ModelState::Ready { constants, .. } => Some(constants),
            _ => None,
        }
    }

    /// Validate the configuration, allocate the textures and run every
    /// precompute pass with the shared compute handle from `resources`.
    ///
    /// Nothing is allocated unless every check passes.
    pub fn init<S>(
        &mut self,
        resources: &ScatteringResources<B, S>,
        scattering_orders: u32,
    ) -> Result<(), ScatteringError> {
        match self.state {
            ModelState::Uninitialized => {}
            ModelState::Ready { .. } => return Err(ScatteringError::AlreadyInitialized),
            ModelState::Released => return Err(ScatteringError::Released),
        }
        let backend = Arc::clone(resources.precompute()?);
        self.config.validate(scattering_orders)?;

        let textures = ModelTextures::allocate(backend.as_ref(), &self.config);
        PrecomputeOrchestrator::new(backend.as_ref(), &self.config)
            .run(&textures, scattering_orders);
        let constants = RuntimeConstants::new(&self.config);
        log::info!(
            "Scattering model ready: radii {:.1}..{:.1} units, {} orders, {:?} luminance, {} precision",
            constants.bottom_radius,
            constants.top_radius,
            scattering_orders,
            self.config.luminance,
            if self.config.half_precision { "half" } else { "full" }
        );

        self.state = ModelState::Ready {
            backend,
            textures,
            constants,
        };
        Ok(())
    }

    fn ready(&self) -> Result<(&ModelTextures<B::Texture>, &RuntimeConstants), ScatteringError> {
        match &self.state {
            ModelState::Ready {
                textures,
                constants,
                ..
            } => Ok((textures, constants)),
            ModelState::Uninitialized => Err(ScatteringError::NotInitialized),
            ModelState::Released => Err(ScatteringError::Released),
        }
    }

    fn earth_center(&self) -> Vec3 {
        self.planet_center.unwrap_or_else(|| {
            effect::default_earth_center(self.config.bottom_radius, self.config.length_unit_in_meters)
        })
    }

    fn bound_sun_direction(&self) -> Vec3 {
        self.sun_direction.try_normalize().unwrap_or(Vec3::Y)
    }

    /// Push the textures, the precomputed constants and the current effect
    /// and world state into `material`. Does not modify the model.
    pub fn bind_to_material<M>(&self, material: &mut M) -> Result<(), ScatteringError>
    where
        M: MaterialProperties<B::Texture>,
    {
        let (textures, constants) = self.ready()?;
        let layout = &self.config.layout;

        material.set_texture(names::TRANSMITTANCE_TEXTURE, &textures.transmittance);
        material.set_texture(names::SCATTERING_TEXTURE, &textures.scattering);
        material.set_texture(names::IRRADIANCE_TEXTURE, &textures.irradiance);
        if let Some(single_mie) = textures.single_mie_binding() {
            material.set_texture(names::SINGLE_MIE_SCATTERING_TEXTURE, single_mie);
        }

        let sizes = [
            (names::TRANSMITTANCE_TEXTURE_WIDTH, layout.transmittance_width),
            (names::TRANSMITTANCE_TEXTURE_HEIGHT, layout.transmittance_height),
            (names::SCATTERING_TEXTURE_R_SIZE, layout.scattering_r),
            (names::SCATTERING_TEXTURE_MU_SIZE, layout.scattering_mu),
            (names::SCATTERING_TEXTURE_MU_S_SIZE, layout.scattering_mu_s),
            (names::SCATTERING_TEXTURE_NU_SIZE, layout.scattering_nu),
            (names::IRRADIANCE_TEXTURE_WIDTH, layout.irradiance_width),
            (names::IRRADIANCE_TEXTURE_HEIGHT, layout.irradiance_height),
        ];
        for (name, size) in sizes {
            material.set_int(name, size as i32);
        }

        let vectors = [
            (names::SOLAR_IRRADIANCE, constants.solar_irradiance),
            (names::RAYLEIGH_SCATTERING, constants.rayleigh_scattering),
            (names::MIE_SCATTERING, constants.mie_scattering),
            (names::MIE_EXTINCTION, constants.mie_extinction),
            (
                names::MIE_SCATTERING_TO_EXTINCTION,
                constants.mie_scattering_to_extinction,
            ),
            (
                names::SKY_SPECTRAL_RADIANCE_TO_LUMINANCE,
                constants.sky_spectral_radiance_to_luminance,
            ),
            (
                names::SUN_SPECTRAL_RADIANCE_TO_LUMINANCE,
                constants.sun_spectral_radiance_to_luminance,
            ),
        ];
        for (name, value) in vectors {
            material.set_vector(name, value.extend(0.0));
        }

        material.set_float(names::SUN_ANGULAR_RADIUS, constants.sun_angular_radius);
        material.set_float(names::BOTTOM_RADIUS, constants.bottom_radius);
        material.set_float(names::TOP_RADIUS, constants.top_radius);
        material.set_float(names::MIE_PHASE_FUNCTION_G, constants.mie_phase_function_g);
        material.set_float(names::MU_S_MIN, constants.mu_s_min);
        material.set_int(
            names::COMBINED_SCATTERING_TEXTURES,
            i32::from(constants.combined_scattering_textures),
        );
        material.set_int(
            names::USE_LUMINANCE,
            i32::from(self.config.luminance != LuminanceMode::None),
        );

        material.set_float(
            names::EXPOSURE,
            self.effect.shader_exposure(self.config.luminance),
        );
        material.set_vector(names::EARTH_CENTER, self.earth_center().extend(0.0));
        material.set_vector(
            names::SUN_SIZE,
            effect::sun_size(constants.sun_angular_radius).extend(0.0).extend(0.0),
        );
        material.set_vector(
            names::SUN_DIRECTION,
            self.bound_sun_direction().extend(0.0),
        );
        material.set_vector(
            names::WHITE_POINT,
            self.effect.white_point(constants.white_point).extend(0.0),
        );
        Ok(())
    }

    /// Planet position, radius and sun direction for surface shaders such as
    /// water, which only need the planet geometry.
    pub fn bind_planet_properties<M>(&self, material: &mut M) -> Result<(), ScatteringError>
    where
        M: MaterialProperties<B::Texture>,
    {
        let (_, constants) = self.ready()?;
        material.set_vector(names::PLANET_CENTER, self.earth_center().extend(0.0));
        material.set_float(names::PLANET_RADIUS, constants.bottom_radius);
        material.set_vector(
            names::SUN_DIRECTION,
            self.bound_sun_direction().extend(0.0),
        );
        Ok(())
    }

    /// Free every texture. Later calls do nothing; releasing a model that was
    /// never initialized leaves it uninitialized.
    pub fn release(&mut self) {
        match std::mem::replace(&mut self.state, ModelState::Released) {
            ModelState::Ready {
                backend, textures, ..
            } => {
                textures.release(backend.as_ref());
                log::info!("Scattering model released");
            }
            ModelState::Uninitialized => self.state = ModelState::Uninitialized,
            ModelState::Released => {}
        }
    }
}

impl<B: PrecomputeBackend> Drop for ScatteringModel<B> {
    fn drop(&mut self) {
        if self.is_ready() {
            log::warn!("Scattering model dropped without release, releasing its textures");
            self.release();
        }
    }
}

impl<B: PrecomputeBackend> std::fmt::Debug for ScatteringModel<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            ModelState::Uninitialized => "uninitialized",
            ModelState::Ready { .. } => "ready",
            ModelState::Released => "released",
        };
        f.debug_struct("ScatteringModel")
            .field("state", &state)
            .field("planet_center", &self.planet_center)
            .field("sun_direction", &self.sun_direction)
            .field("effect", &self.effect)
            .finish_non_exhaustive()
    }
}
