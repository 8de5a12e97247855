//! Scalar evaluation of the precompute kernels.
//!
//! Every function here has a WGSL twin in `aether-render`; both follow the
//! same texture parameterizations so a texture written by one backend can be
//! sampled by the other's formulas. Lengths are in the model's length unit.

use std::f32::consts::PI;

use glam::{Vec2, Vec3, Vec4};

use crate::config::{SampleCounts, TextureLayout};
use crate::density::MAX_DENSITY_LAYERS;
use crate::uniform::{AtmosphereUniform, DensityLayerUniform};

/// How far the last transmittance column stays above the horizon cosine.
/// Rays at or below it touch the ground and their optical length is not
/// reproducible in single precision.
pub const GRAZING_MU_MARGIN: f32 = 1e-4;

pub fn clamp_cosine(mu: f32) -> f32 {
    mu.clamp(-1.0, 1.0)
}

pub fn clamp_distance(d: f32) -> f32 {
    d.max(0.0)
}

pub fn safe_sqrt(a: f32) -> f32 {
    a.max(0.0).sqrt()
}

/// Hermite step. Degenerates to a hard step when both edges coincide.
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        return if x >= edge0 { 1.0 } else { 0.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Map `x` in [0, 1] to texel centers of an `n` texel axis.
pub fn texture_coord_from_unit_range(x: f32, n: f32) -> f32 {
    0.5 / n + x * (1.0 - 1.0 / n)
}

pub fn unit_range_from_texture_coord(u: f32, n: f32) -> f32 {
    (u - 0.5 / n) / (1.0 - 1.0 / n)
}

pub fn rayleigh_phase_function(nu: f32) -> f32 {
    let k = 3.0 / (16.0 * PI);
    k * (1.0 + nu * nu)
}

/// Cornette-Shanks phase function.
pub fn mie_phase_function(g: f32, nu: f32) -> f32 {
    let k = 3.0 / (8.0 * PI) * (1.0 - g * g) / (2.0 + g * g);
    k * (1.0 + nu * nu) / (1.0 + g * g - 2.0 * g * nu).powf(1.5)
}

fn layer_density(layer: &DensityLayerUniform, altitude: f32) -> f32 {
    let density = layer.exp_term * (layer.exp_scale * altitude).exp()
        + layer.linear_term * altitude
        + layer.constant_term;
    density.clamp(0.0, 1.0)
}

fn profile_density(profile: &[DensityLayerUniform; MAX_DENSITY_LAYERS], altitude: f32) -> f32 {
    if altitude < profile[0].width {
        layer_density(&profile[0], altitude)
    } else {
        layer_density(&profile[1], altitude)
    }
}

/// Read-only view of an RGBA texture, row-major with `x` fastest.
#[derive(Clone, Copy, Debug)]
pub struct Lut<'a> {
    texels: &'a [[f32; 4]],
    width: u32,
    height: u32,
    depth: u32,
}

impl<'a> Lut<'a> {
    pub fn new(texels: &'a [[f32; 4]], width: u32, height: u32, depth: u32) -> Self {
        Self {
            texels,
            width,
            height,
            depth,
        }
    }

    /// Texel at integer coordinates, clamped to the edges.
    pub fn fetch(&self, x: i32, y: i32, z: i32) -> Vec4 {
        let x = x.clamp(0, self.width as i32 - 1) as usize;
        let y = y.clamp(0, self.height as i32 - 1) as usize;
        let z = z.clamp(0, self.depth as i32 - 1) as usize;
        let index = (z * self.height as usize + y) * self.width as usize + x;
        self.texels
            .get(index)
            .map(|texel| Vec4::from_array(*texel))
            .unwrap_or(Vec4::ZERO)
    }

    pub fn sample_2d(&self, uv: Vec2) -> Vec4 {
        self.sample_3d(uv.extend(0.5))
    }

    /// Trilinear filtering with clamp-to-edge addressing.
    pub fn sample_3d(&self, uvw: Vec3) -> Vec4 {
        let size = Vec3::new(self.width as f32, self.height as f32, self.depth as f32);
        let position = uvw * size - 0.5;
        let base = position.floor();
        let f = position - base;
        let (x, y, z) = (base.x as i32, base.y as i32, base.z as i32);

        let lerp_x = |y: i32, z: i32| self.fetch(x, y, z).lerp(self.fetch(x + 1, y, z), f.x);
        let lerp_y = |z: i32| lerp_x(y, z).lerp(lerp_x(y + 1, z), f.y);
        lerp_y(z).lerp(lerp_y(z + 1), f.z)
    }
}

/// Scattering textures of the previous order: single Rayleigh and single Mie
/// for order 1, the multiple scattering delta afterwards.
#[derive(Clone, Copy, Debug)]
pub struct ScatteringInputs<'a> {
    pub single_rayleigh: Lut<'a>,
    pub single_mie: Lut<'a>,
    pub multiple: Lut<'a>,
}

/// Atmosphere parameters unpacked into vectors.
#[derive(Clone, Debug, PartialEq)]
pub struct Atmosphere {
    pub solar_irradiance: Vec3,
    pub sun_angular_radius: f32,
    pub bottom_radius: f32,
    pub top_radius: f32,
    pub rayleigh_density: [DensityLayerUniform; MAX_DENSITY_LAYERS],
    pub rayleigh_scattering: Vec3,
    pub mie_density: [DensityLayerUniform; MAX_DENSITY_LAYERS],
    pub mie_scattering: Vec3,
    pub mie_extinction: Vec3,
    pub mie_phase_function_g: f32,
    pub absorption_density: [DensityLayerUniform; MAX_DENSITY_LAYERS],
    pub absorption_extinction: Vec3,
    pub ground_albedo: Vec3,
    pub mu_s_min: f32,
}

impl From<&AtmosphereUniform> for Atmosphere {
    fn from(uniform: &AtmosphereUniform) -> Self {
        Self {
            solar_irradiance: Vec3::from_array(uniform.solar_irradiance),
            sun_angular_radius: uniform.sun_angular_radius,
            bottom_radius: uniform.bottom_radius,
            top_radius: uniform.top_radius,
            rayleigh_density: uniform.rayleigh_density,
            rayleigh_scattering: Vec3::from_array(uniform.rayleigh_scattering),
            mie_density: uniform.mie_density,
            mie_scattering: Vec3::from_array(uniform.mie_scattering),
            mie_extinction: Vec3::from_array(uniform.mie_extinction),
            mie_phase_function_g: uniform.mie_phase_function_g,
            absorption_density: uniform.absorption_density,
            absorption_extinction: Vec3::from_array(uniform.absorption_extinction),
            ground_albedo: Vec3::from_array(uniform.ground_albedo),
            mu_s_min: uniform.mu_s_min,
        }
    }
}

/// A point in the 4D scattering domain.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScatteringSample {
    pub r: f32,
    pub mu: f32,
    pub mu_s: f32,
    pub nu: f32,
    pub ray_r_mu_intersects_ground: bool,
}

/// Kernel evaluator for one atmosphere, texture layout and sample budget.
#[derive(Clone, Debug)]
pub struct Kernels {
    pub atmosphere: Atmosphere,
    pub layout: TextureLayout,
    pub samples: SampleCounts,
}

impl Kernels {
    pub fn new(uniform: &AtmosphereUniform, layout: TextureLayout, samples: SampleCounts) -> Self {
        Self {
            atmosphere: Atmosphere::from(uniform),
            layout,
            samples,
        }
    }

    fn clamp_radius(&self, r: f32) -> f32 {
        r.clamp(self.atmosphere.bottom_radius, self.atmosphere.top_radius)
    }

    fn horizon_length(&self) -> f32 {
        let atm = &self.atmosphere;
        safe_sqrt(atm.top_radius * atm.top_radius - atm.bottom_radius * atm.bottom_radius)
    }

    pub fn distance_to_top_atmosphere_boundary(&self, r: f32, mu: f32) -> f32 {
        let top = self.atmosphere.top_radius;
        let discriminant = r * r * (mu * mu - 1.0) + top * top;
        clamp_distance(-r * mu + safe_sqrt(discriminant))
    }

    pub fn distance_to_bottom_atmosphere_boundary(&self, r: f32, mu: f32) -> f32 {
        let bottom = self.atmosphere.bottom_radius;
        let discriminant = r * r * (mu * mu - 1.0) + bottom * bottom;
        clamp_distance(-r * mu - safe_sqrt(discriminant))
    }

    pub fn ray_intersects_ground(&self, r: f32, mu: f32) -> bool {
        let bottom = self.atmosphere.bottom_radius;
        mu < 0.0 && r * r * (mu * mu - 1.0) + bottom * bottom >= 0.0
    }

    fn distance_to_nearest_atmosphere_boundary(&self, r: f32, mu: f32, ground: bool) -> f32 {
        if ground {
            self.distance_to_bottom_atmosphere_boundary(r, mu)
        } else {
            self.distance_to_top_atmosphere_boundary(r, mu)
        }
    }

    // Transmittance

    fn optical_length_to_top_atmosphere_boundary(
        &self,
        profile: &[DensityLayerUniform; MAX_DENSITY_LAYERS],
        r: f32,
        mu: f32,
    ) -> f32 {
        let count = self.samples.transmittance;
        let dx = self.distance_to_top_atmosphere_boundary(r, mu) / count as f32;
        let mut result = 0.0;
        for i in 0..=count {
            let d_i = i as f32 * dx;
            let r_i = (d_i * d_i + 2.0 * r * mu * d_i + r * r).sqrt();
            let y_i = profile_density(profile, r_i - self.atmosphere.bottom_radius);
            let weight_i = if i == 0 || i == count { 0.5 } else { 1.0 };
            result += y_i * weight_i * dx;
        }
        result
    }

    pub fn transmittance_to_top_atmosphere_boundary(&self, r: f32, mu: f32) -> Vec3 {
        let atm = &self.atmosphere;
        let optical_depth = atm.rayleigh_scattering
            * self.optical_length_to_top_atmosphere_boundary(&atm.rayleigh_density, r, mu)
            + atm.mie_extinction
                * self.optical_length_to_top_atmosphere_boundary(&atm.mie_density, r, mu)
            + atm.absorption_extinction
                * self.optical_length_to_top_atmosphere_boundary(&atm.absorption_density, r, mu);
        (-optical_depth).exp()
    }

    pub fn transmittance_uv(&self, r: f32, mu: f32) -> Vec2 {
        let atm = &self.atmosphere;
        let h = self.horizon_length();
        let rho = safe_sqrt(r * r - atm.bottom_radius * atm.bottom_radius);
        let d = self.distance_to_top_atmosphere_boundary(r, mu);
        let d_min = atm.top_radius - r;
        let d_max = rho + h;
        let x_mu = (d - d_min) / (d_max - d_min);
        let x_r = rho / h;
        Vec2::new(
            texture_coord_from_unit_range(x_mu, self.layout.transmittance_width as f32),
            texture_coord_from_unit_range(x_r, self.layout.transmittance_height as f32),
        )
    }

    pub fn r_mu_from_transmittance_uv(&self, uv: Vec2) -> (f32, f32) {
        let atm = &self.atmosphere;
        let x_mu = unit_range_from_texture_coord(uv.x, self.layout.transmittance_width as f32);
        let x_r = unit_range_from_texture_coord(uv.y, self.layout.transmittance_height as f32);
        let h = self.horizon_length();
        let rho = h * x_r;
        let r = (rho * rho + atm.bottom_radius * atm.bottom_radius).sqrt();
        let d_min = atm.top_radius - r;
        let d_max = rho + h;
        let d = d_min + x_mu * (d_max - d_min);
        let mu = if d == 0.0 {
            1.0
        } else {
            (h * h - rho * rho - d * d) / (2.0 * r * d)
        };
        let mu_horizon = -rho / r;
        (r, clamp_cosine(mu.max(mu_horizon + GRAZING_MU_MARGIN)))
    }

    /// Transmittance texel at fragment coordinates (pixel center).
    pub fn transmittance_texel(&self, frag_coord: Vec2) -> Vec3 {
        let size = Vec2::new(
            self.layout.transmittance_width as f32,
            self.layout.transmittance_height as f32,
        );
        let (r, mu) = self.r_mu_from_transmittance_uv(frag_coord / size);
        self.transmittance_to_top_atmosphere_boundary(r, mu)
    }

    pub fn transmittance_to_top(&self, transmittance: &Lut<'_>, r: f32, mu: f32) -> Vec3 {
        transmittance.sample_2d(self.transmittance_uv(r, mu)).truncate()
    }

    /// Transmittance between the point at `r` and the point `d` further along
    /// the ray of cosine `mu`.
    pub fn transmittance(
        &self,
        transmittance: &Lut<'_>,
        r: f32,
        mu: f32,
        d: f32,
        ray_r_mu_intersects_ground: bool,
    ) -> Vec3 {
        let r_d = self.clamp_radius((d * d + 2.0 * r * mu * d + r * r).sqrt());
        let mu_d = clamp_cosine((r * mu + d) / r_d);
        if ray_r_mu_intersects_ground {
            (self.transmittance_to_top(transmittance, r_d, -mu_d)
                / self.transmittance_to_top(transmittance, r, -mu))
            .min(Vec3::ONE)
        } else {
            (self.transmittance_to_top(transmittance, r, mu)
                / self.transmittance_to_top(transmittance, r_d, mu_d))
            .min(Vec3::ONE)
        }
    }

    /// Transmittance towards the sun, faded over the sun disc as it crosses
    /// the horizon.
    pub fn transmittance_to_sun(&self, transmittance: &Lut<'_>, r: f32, mu_s: f32) -> Vec3 {
        let sin_theta_h = self.atmosphere.bottom_radius / r;
        let cos_theta_h = -safe_sqrt(1.0 - sin_theta_h * sin_theta_h);
        let alpha = self.atmosphere.sun_angular_radius;
        self.transmittance_to_top(transmittance, r, mu_s)
            * smoothstep(
                -sin_theta_h * alpha,
                sin_theta_h * alpha,
                mu_s - cos_theta_h,
            )
    }

    // Single scattering

    fn single_scattering_integrand(
        &self,
        transmittance: &Lut<'_>,
        sample: &ScatteringSample,
        d: f32,
    ) -> (Vec3, Vec3) {
        let ScatteringSample {
            r, mu, mu_s, nu, ..
        } = *sample;
        let r_d = self.clamp_radius((d * d + 2.0 * r * mu * d + r * r).sqrt());
        let mu_s_d = clamp_cosine((r * mu_s + d * nu) / r_d);
        let t = self.transmittance(transmittance, r, mu, d, sample.ray_r_mu_intersects_ground)
            * self.transmittance_to_sun(transmittance, r_d, mu_s_d);
        let altitude = r_d - self.atmosphere.bottom_radius;
        (
            t * profile_density(&self.atmosphere.rayleigh_density, altitude),
            t * profile_density(&self.atmosphere.mie_density, altitude),
        )
    }

    /// Single scattered Rayleigh and Mie radiance, without phase functions.
    pub fn single_scattering(
        &self,
        transmittance: &Lut<'_>,
        sample: &ScatteringSample,
    ) -> (Vec3, Vec3) {
        let count = self.samples.single_scattering;
        let dx = self.distance_to_nearest_atmosphere_boundary(
            sample.r,
            sample.mu,
            sample.ray_r_mu_intersects_ground,
        ) / count as f32;
        let mut rayleigh_sum = Vec3::ZERO;
        let mut mie_sum = Vec3::ZERO;
        for i in 0..=count {
            let d_i = i as f32 * dx;
            let (rayleigh_i, mie_i) = self.single_scattering_integrand(transmittance, sample, d_i);
            let weight_i = if i == 0 || i == count { 0.5 } else { 1.0 };
            rayleigh_sum += rayleigh_i * weight_i;
            mie_sum += mie_i * weight_i;
        }
        let atm = &self.atmosphere;
        (
            rayleigh_sum * dx * atm.solar_irradiance * atm.rayleigh_scattering,
            mie_sum * dx * atm.solar_irradiance * atm.mie_scattering,
        )
    }

    pub fn single_scattering_texel(
        &self,
        transmittance: &Lut<'_>,
        frag_coord: Vec3,
    ) -> (Vec3, Vec3) {
        let sample = self.scattering_sample_from_frag_coord(frag_coord);
        self.single_scattering(transmittance, &sample)
    }

    // Scattering texture parameterization

    /// Texture coordinates `(u_nu, u_mu_s, u_mu, u_r)` of a scattering sample.
    pub fn scattering_uvwz(&self, sample: &ScatteringSample) -> Vec4 {
        let atm = &self.atmosphere;
        let layout = &self.layout;
        let ScatteringSample {
            r, mu, mu_s, nu, ..
        } = *sample;
        let bottom = atm.bottom_radius;
        let h = self.horizon_length();
        let rho = safe_sqrt(r * r - bottom * bottom);
        let u_r = texture_coord_from_unit_range(rho / h, layout.scattering_r as f32);

        let half_mu = layout.scattering_mu as f32 / 2.0;
        let r_mu = r * mu;
        let discriminant = r_mu * r_mu - r * r + bottom * bottom;
        let u_mu = if sample.ray_r_mu_intersects_ground {
            let d = -r_mu - safe_sqrt(discriminant);
            let d_min = r - bottom;
            let d_max = rho;
            let x = if d_max == d_min {
                0.0
            } else {
                (d - d_min) / (d_max - d_min)
            };
            0.5 - 0.5 * texture_coord_from_unit_range(x, half_mu)
        } else {
            let d = -r_mu + safe_sqrt(discriminant + h * h);
            let d_min = atm.top_radius - r;
            let d_max = rho + h;
            0.5 + 0.5 * texture_coord_from_unit_range((d - d_min) / (d_max - d_min), half_mu)
        };

        let d_min = atm.top_radius - bottom;
        let d_max = h;
        let d = self.distance_to_top_atmosphere_boundary(bottom, mu_s);
        let a = (d - d_min) / (d_max - d_min);
        let big_d = self.distance_to_top_atmosphere_boundary(bottom, atm.mu_s_min);
        let big_a = (big_d - d_min) / (d_max - d_min);
        let u_mu_s = texture_coord_from_unit_range(
            (1.0 - a / big_a).max(0.0) / (1.0 + a),
            layout.scattering_mu_s as f32,
        );

        let u_nu = (nu + 1.0) / 2.0;
        Vec4::new(u_nu, u_mu_s, u_mu, u_r)
    }

    pub fn scattering_sample_from_uvwz(&self, uvwz: Vec4) -> ScatteringSample {
        let atm = &self.atmosphere;
        let layout = &self.layout;
        let bottom = atm.bottom_radius;
        let h = self.horizon_length();
        let rho = h * unit_range_from_texture_coord(uvwz.w, layout.scattering_r as f32);
        let r = (rho * rho + bottom * bottom).sqrt();

        let half_mu = layout.scattering_mu as f32 / 2.0;
        let (mu, ray_r_mu_intersects_ground) = if uvwz.z < 0.5 {
            let d_min = r - bottom;
            let d_max = rho;
            let d = d_min
                + (d_max - d_min) * unit_range_from_texture_coord(1.0 - 2.0 * uvwz.z, half_mu);
            let mu = if d == 0.0 {
                -1.0
            } else {
                clamp_cosine(-(rho * rho + d * d) / (2.0 * r * d))
            };
            (mu, true)
        } else {
            let d_min = atm.top_radius - r;
            let d_max = rho + h;
            let d = d_min
                + (d_max - d_min) * unit_range_from_texture_coord(2.0 * uvwz.z - 1.0, half_mu);
            let mu = if d == 0.0 {
                1.0
            } else {
                clamp_cosine((h * h - rho * rho - d * d) / (2.0 * r * d))
            };
            (mu, false)
        };

        let x_mu_s = unit_range_from_texture_coord(uvwz.y, layout.scattering_mu_s as f32);
        let d_min = atm.top_radius - bottom;
        let d_max = h;
        let big_d = self.distance_to_top_atmosphere_boundary(bottom, atm.mu_s_min);
        let big_a = (big_d - d_min) / (d_max - d_min);
        let a = (big_a - x_mu_s * big_a) / (1.0 + x_mu_s * big_a);
        let d = d_min + a.min(big_a) * (d_max - d_min);
        let mu_s = if d == 0.0 {
            1.0
        } else {
            clamp_cosine((h * h - d * d) / (2.0 * bottom * d))
        };

        ScatteringSample {
            r,
            mu,
            mu_s,
            nu: clamp_cosine(uvwz.x * 2.0 - 1.0),
            ray_r_mu_intersects_ground,
        }
    }

    /// Scattering sample at a 3D texel center, with `nu` clamped to the range
    /// allowed by `mu` and `mu_s`.
    pub fn scattering_sample_from_frag_coord(&self, frag_coord: Vec3) -> ScatteringSample {
        let layout = &self.layout;
        let mu_s_size = layout.scattering_mu_s as f32;
        let size = Vec4::new(
            layout.scattering_nu as f32 - 1.0,
            mu_s_size,
            layout.scattering_mu as f32,
            layout.scattering_r as f32,
        );
        let frag_coord_nu = (frag_coord.x / mu_s_size).floor();
        let frag_coord_mu_s = frag_coord.x.rem_euclid(mu_s_size);
        let uvwz = Vec4::new(frag_coord_nu, frag_coord_mu_s, frag_coord.y, frag_coord.z) / size;
        let mut sample = self.scattering_sample_from_uvwz(uvwz);

        let (mu, mu_s) = (sample.mu, sample.mu_s);
        let spread = safe_sqrt((1.0 - mu * mu) * (1.0 - mu_s * mu_s));
        sample.nu = sample.nu.clamp(mu * mu_s - spread, mu * mu_s + spread);
        sample
    }

    /// Sample a 4D scattering table, interpolating manually along `nu`.
    pub fn scattering(&self, lut: &Lut<'_>, sample: &ScatteringSample) -> Vec3 {
        let uvwz = self.scattering_uvwz(sample);
        let nu_size = self.layout.scattering_nu as f32;
        let tex_coord_x = uvwz.x * (nu_size - 1.0);
        let tex_x = tex_coord_x.floor();
        let lerp = tex_coord_x - tex_x;
        let uvw0 = Vec3::new((tex_x + uvwz.y) / nu_size, uvwz.z, uvwz.w);
        let uvw1 = Vec3::new((tex_x + 1.0 + uvwz.y) / nu_size, uvwz.z, uvwz.w);
        (lut.sample_3d(uvw0) * (1.0 - lerp) + lut.sample_3d(uvw1) * lerp).truncate()
    }

    /// Radiance of scattering order `order`, phase functions included.
    fn scattering_for_order(
        &self,
        inputs: &ScatteringInputs<'_>,
        sample: &ScatteringSample,
        order: u32,
    ) -> Vec3 {
        if order == 1 {
            let rayleigh = self.scattering(&inputs.single_rayleigh, sample);
            let mie = self.scattering(&inputs.single_mie, sample);
            rayleigh * rayleigh_phase_function(sample.nu)
                + mie * mie_phase_function(self.atmosphere.mie_phase_function_g, sample.nu)
        } else {
            self.scattering(&inputs.multiple, sample)
        }
    }

    // Irradiance parameterization

    pub fn irradiance_uv(&self, r: f32, mu_s: f32) -> Vec2 {
        let atm = &self.atmosphere;
        let x_r = (r - atm.bottom_radius) / (atm.top_radius - atm.bottom_radius);
        let x_mu_s = mu_s * 0.5 + 0.5;
        Vec2::new(
            texture_coord_from_unit_range(x_mu_s, self.layout.irradiance_width as f32),
            texture_coord_from_unit_range(x_r, self.layout.irradiance_height as f32),
        )
    }

    pub fn r_mu_s_from_irradiance_uv(&self, uv: Vec2) -> (f32, f32) {
        let atm = &self.atmosphere;
        let x_mu_s = unit_range_from_texture_coord(uv.x, self.layout.irradiance_width as f32);
        let x_r = unit_range_from_texture_coord(uv.y, self.layout.irradiance_height as f32);
        let r = atm.bottom_radius + x_r * (atm.top_radius - atm.bottom_radius);
        (r, clamp_cosine(2.0 * x_mu_s - 1.0))
    }

    fn irradiance_r_mu_s_from_frag(&self, frag_coord: Vec2) -> (f32, f32) {
        let size = Vec2::new(
            self.layout.irradiance_width as f32,
            self.layout.irradiance_height as f32,
        );
        self.r_mu_s_from_irradiance_uv(frag_coord / size)
    }

    pub fn irradiance(&self, irradiance: &Lut<'_>, r: f32, mu_s: f32) -> Vec3 {
        irradiance.sample_2d(self.irradiance_uv(r, mu_s)).truncate()
    }

    // Multiple scattering

    /// Radiance scattered towards the viewer at a point, from every incident
    /// direction of order `order - 1` plus light reflected by the ground.
    pub fn scattering_density(
        &self,
        transmittance: &Lut<'_>,
        inputs: &ScatteringInputs<'_>,
        irradiance: &Lut<'_>,
        sample: &ScatteringSample,
        order: u32,
    ) -> Vec3 {
        let atm = &self.atmosphere;
        let ScatteringSample {
            r, mu, mu_s, nu, ..
        } = *sample;

        let zenith_direction = Vec3::Z;
        let omega = Vec3::new(safe_sqrt(1.0 - mu * mu), 0.0, mu);
        let sun_dir_x = if omega.x == 0.0 {
            0.0
        } else {
            (nu - mu * mu_s) / omega.x
        };
        let sun_dir_y = safe_sqrt(1.0 - sun_dir_x * sun_dir_x - mu_s * mu_s);
        let omega_s = Vec3::new(sun_dir_x, sun_dir_y, mu_s);

        let count = self.samples.scattering_density;
        let d_phi = PI / count as f32;
        let d_theta = PI / count as f32;
        let altitude = r - atm.bottom_radius;
        let rayleigh_density = profile_density(&atm.rayleigh_density, altitude);
        let mie_density = profile_density(&atm.mie_density, altitude);
        let g = atm.mie_phase_function_g;

        let mut rayleigh_mie = Vec3::ZERO;
        for l in 0..count {
            let theta = (l as f32 + 0.5) * d_theta;
            let (sin_theta, cos_theta) = theta.sin_cos();
            let ray_r_theta_intersects_ground = self.ray_intersects_ground(r, cos_theta);

            let mut distance_to_ground = 0.0;
            let mut transmittance_to_ground = Vec3::ZERO;
            let mut ground_albedo = Vec3::ZERO;
            if ray_r_theta_intersects_ground {
                distance_to_ground = self.distance_to_bottom_atmosphere_boundary(r, cos_theta);
                transmittance_to_ground =
                    self.transmittance(transmittance, r, cos_theta, distance_to_ground, true);
                ground_albedo = atm.ground_albedo;
            }

            for m in 0..2 * count {
                let phi = (m as f32 + 0.5) * d_phi;
                let (sin_phi, cos_phi) = phi.sin_cos();
                let omega_i = Vec3::new(cos_phi * sin_theta, sin_phi * sin_theta, cos_theta);
                let domega_i = d_theta * d_phi * sin_theta;

                let nu1 = omega_s.dot(omega_i);
                let incident_sample = ScatteringSample {
                    r,
                    mu: omega_i.z,
                    mu_s,
                    nu: nu1,
                    ray_r_mu_intersects_ground: ray_r_theta_intersects_ground,
                };
                let mut incident_radiance =
                    self.scattering_for_order(inputs, &incident_sample, order - 1);

                let ground_normal =
                    (zenith_direction * r + omega_i * distance_to_ground).normalize();
                let ground_irradiance =
                    self.irradiance(irradiance, atm.bottom_radius, ground_normal.dot(omega_s));
                incident_radiance +=
                    transmittance_to_ground * ground_albedo * (1.0 / PI) * ground_irradiance;

                let nu2 = omega.dot(omega_i);
                rayleigh_mie += incident_radiance
                    * (atm.rayleigh_scattering * rayleigh_density * rayleigh_phase_function(nu2)
                        + atm.mie_scattering * mie_density * mie_phase_function(g, nu2))
                    * domega_i;
            }
        }
        rayleigh_mie
    }

    pub fn scattering_density_texel(
        &self,
        transmittance: &Lut<'_>,
        inputs: &ScatteringInputs<'_>,
        irradiance: &Lut<'_>,
        frag_coord: Vec3,
        order: u32,
    ) -> Vec3 {
        let sample = self.scattering_sample_from_frag_coord(frag_coord);
        self.scattering_density(transmittance, inputs, irradiance, &sample, order)
    }

    /// Integrate the scattering density along the view ray.
    pub fn multiple_scattering(
        &self,
        transmittance: &Lut<'_>,
        scattering_density: &Lut<'_>,
        sample: &ScatteringSample,
    ) -> Vec3 {
        let ScatteringSample {
            r,
            mu,
            mu_s,
            nu,
            ray_r_mu_intersects_ground: ground,
        } = *sample;
        let count = self.samples.multiple_scattering;
        let dx = self.distance_to_nearest_atmosphere_boundary(r, mu, ground) / count as f32;
        let mut rayleigh_mie_sum = Vec3::ZERO;
        for i in 0..=count {
            let d_i = i as f32 * dx;
            let r_i = self.clamp_radius((d_i * d_i + 2.0 * r * mu * d_i + r * r).sqrt());
            let point = ScatteringSample {
                r: r_i,
                mu: clamp_cosine((r * mu + d_i) / r_i),
                mu_s: clamp_cosine((r * mu_s + d_i * nu) / r_i),
                nu,
                ray_r_mu_intersects_ground: ground,
            };
            let rayleigh_mie_i = self.scattering(scattering_density, &point)
                * self.transmittance(transmittance, r, mu, d_i, ground)
                * dx;
            let weight_i = if i == 0 || i == count { 0.5 } else { 1.0 };
            rayleigh_mie_sum += rayleigh_mie_i * weight_i;
        }
        rayleigh_mie_sum
    }

    /// Multiple scattering texel and the `nu` it was evaluated at.
    pub fn multiple_scattering_texel(
        &self,
        transmittance: &Lut<'_>,
        scattering_density: &Lut<'_>,
        frag_coord: Vec3,
    ) -> (Vec3, f32) {
        let sample = self.scattering_sample_from_frag_coord(frag_coord);
        (
            self.multiple_scattering(transmittance, scattering_density, &sample),
            sample.nu,
        )
    }

    // Ground irradiance

    pub fn direct_irradiance(&self, transmittance: &Lut<'_>, r: f32, mu_s: f32) -> Vec3 {
        let atm = &self.atmosphere;
        let alpha_s = atm.sun_angular_radius;
        // Cosine factor averaged over the visible part of the sun disc.
        let average_cosine_factor = if mu_s < -alpha_s {
            0.0
        } else if mu_s > alpha_s {
            mu_s
        } else {
            (mu_s + alpha_s) * (mu_s + alpha_s) / (4.0 * alpha_s)
        };
        atm.solar_irradiance
            * self.transmittance_to_top(transmittance, r, mu_s)
            * average_cosine_factor
    }

    pub fn direct_irradiance_texel(&self, transmittance: &Lut<'_>, frag_coord: Vec2) -> Vec3 {
        let (r, mu_s) = self.irradiance_r_mu_s_from_frag(frag_coord);
        self.direct_irradiance(transmittance, r, mu_s)
    }

    /// Irradiance on a horizontal surface from sky radiance of order
    /// `order`, integrated over the upper hemisphere.
    pub fn indirect_irradiance(
        &self,
        inputs: &ScatteringInputs<'_>,
        r: f32,
        mu_s: f32,
        order: u32,
    ) -> Vec3 {
        let count = self.samples.indirect_irradiance;
        let d_phi = PI / count as f32;
        let d_theta = PI / count as f32;
        let omega_s = Vec3::new(safe_sqrt(1.0 - mu_s * mu_s), 0.0, mu_s);

        let mut result = Vec3::ZERO;
        for j in 0..count / 2 {
            let theta = (j as f32 + 0.5) * d_theta;
            let (sin_theta, cos_theta) = theta.sin_cos();
            for i in 0..2 * count {
                let phi = (i as f32 + 0.5) * d_phi;
                let (sin_phi, cos_phi) = phi.sin_cos();
                let omega = Vec3::new(cos_phi * sin_theta, sin_phi * sin_theta, cos_theta);
                let domega = d_theta * d_phi * sin_theta;
                let sample = ScatteringSample {
                    r,
                    mu: omega.z,
                    mu_s,
                    nu: omega.dot(omega_s),
                    ray_r_mu_intersects_ground: false,
                };
                result += self.scattering_for_order(inputs, &sample, order) * omega.z * domega;
            }
        }
        result
    }

    pub fn indirect_irradiance_texel(
        &self,
        inputs: &ScatteringInputs<'_>,
        frag_coord: Vec2,
        order: u32,
    ) -> Vec3 {
        let (r, mu_s) = self.irradiance_r_mu_s_from_frag(frag_coord);
        self.indirect_irradiance(inputs, r, mu_s, order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScatteringConfig;
    use crate::spectrum::RGB_LAMBDAS;

    fn earth_kernels() -> Kernels {
        let config = ScatteringConfig::default();
        let uniform = AtmosphereUniform::from_config(&config, RGB_LAMBDAS);
        Kernels::new(&uniform, TextureLayout::default(), SampleCounts::default())
    }

    /// Transmittance table computed directly, for tests that sample it.
    fn transmittance_table(kernels: &Kernels) -> Vec<[f32; 4]> {
        let layout = &kernels.layout;
        let mut texels = Vec::new();
        for y in 0..layout.transmittance_height {
            for x in 0..layout.transmittance_width {
                let frag = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                texels.push(kernels.transmittance_texel(frag).extend(0.0).to_array());
            }
        }
        texels
    }

    #[test]
    fn test_phase_functions_integrate_to_one() {
        let steps = 2000;
        let mut rayleigh = 0.0;
        let mut mie = 0.0;
        for i in 0..steps {
            let theta = (i as f32 + 0.5) / steps as f32 * PI;
            let weight = 2.0 * PI * theta.sin() * PI / steps as f32;
            rayleigh += rayleigh_phase_function(theta.cos()) * weight;
            mie += mie_phase_function(0.8, theta.cos()) * weight;
        }
        assert!((rayleigh - 1.0).abs() < 1e-3, "rayleigh phase integral {rayleigh}");
        assert!((mie - 1.0).abs() < 2e-2, "mie phase integral {mie}");
    }

    #[test]
    fn test_unit_range_round_trip() {
        for n in [4.0, 32.0, 256.0] {
            let u = texture_coord_from_unit_range(0.3, n);
            assert!((unit_range_from_texture_coord(u, n) - 0.3).abs() < 1e-6);
        }
        assert_eq!(texture_coord_from_unit_range(0.0, 4.0), 0.125);
    }

    #[test]
    fn test_smoothstep_degenerate_edges() {
        assert_eq!(smoothstep(0.0, 0.0, 0.1), 1.0);
        assert_eq!(smoothstep(0.0, 0.0, -0.1), 0.0);
        assert!((smoothstep(-1.0, 1.0, 0.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_transmittance_texel_at_top_looking_up_is_one() {
        let kernels = earth_kernels();
        let height = kernels.layout.transmittance_height as f32;
        let t = kernels.transmittance_texel(Vec2::new(0.5, height - 0.5));
        assert!(
            (t - Vec3::ONE).abs().max_element() < 1e-3,
            "nothing above the top of the atmosphere, got {t}"
        );
    }

    #[test]
    fn test_transmittance_decreases_towards_horizon() {
        let kernels = earth_kernels();
        let r = kernels.atmosphere.bottom_radius + 0.01;
        let mut previous = Vec3::splat(f32::INFINITY);
        for mu in [1.0, 0.8, 0.5, 0.2, 0.05, 0.0] {
            let t = kernels.transmittance_to_top_atmosphere_boundary(r, mu);
            assert!(
                t.cmple(previous + 1e-6).all(),
                "transmittance grew from {previous} to {t} at mu {mu}"
            );
            previous = t;
        }
    }

    #[test]
    fn test_constant_density_matches_closed_form() {
        let mut kernels = earth_kernels();
        let constant = [
            DensityLayerUniform::default(),
            DensityLayerUniform {
                constant_term: 1.0,
                ..DensityLayerUniform::default()
            },
        ];
        let zero = [DensityLayerUniform::default(); MAX_DENSITY_LAYERS];
        let atm = &mut kernels.atmosphere;
        atm.rayleigh_density = constant;
        atm.mie_density = zero;
        atm.absorption_density = zero;
        let beta = atm.rayleigh_scattering;
        let r = atm.bottom_radius;

        for mu in [1.0, 0.3, 0.0] {
            let d = kernels.distance_to_top_atmosphere_boundary(r, mu);
            let expected = (-beta * d).exp();
            let t = kernels.transmittance_to_top_atmosphere_boundary(r, mu);
            assert!(
                (t - expected).abs().max_element() < 1e-4,
                "mu {mu}: expected {expected}, got {t}"
            );
        }
    }

    #[test]
    fn test_transmittance_uv_round_trip() {
        let kernels = earth_kernels();
        let r = 63.8;
        let mu = 0.25;
        let (r2, mu2) = kernels.r_mu_from_transmittance_uv(kernels.transmittance_uv(r, mu));
        assert!((r - r2).abs() < 1e-3, "r {r} vs {r2}");
        assert!((mu - mu2).abs() < 1e-3, "mu {mu} vs {mu2}");
    }

    #[test]
    fn test_scattering_uvwz_round_trip() {
        let kernels = earth_kernels();
        for (mu, ground) in [(0.4, false), (-0.2, true)] {
            let sample = ScatteringSample {
                r: 63.7,
                mu,
                mu_s: 0.3,
                nu: 0.1,
                ray_r_mu_intersects_ground: ground,
            };
            assert_eq!(kernels.ray_intersects_ground(sample.r, mu), ground);
            let back = kernels.scattering_sample_from_uvwz(kernels.scattering_uvwz(&sample));
            assert_eq!(back.ray_r_mu_intersects_ground, ground);
            assert!((back.r - sample.r).abs() < 1e-3);
            assert!((back.mu - sample.mu).abs() < 1e-3, "mu {mu} vs {}", back.mu);
            assert!((back.mu_s - sample.mu_s).abs() < 1e-3);
            assert!((back.nu - sample.nu).abs() < 1e-5);
        }
    }

    #[test]
    fn test_frag_coord_nu_is_geometrically_valid() {
        let kernels = earth_kernels();
        let layout = kernels.layout;
        for x in [0.5, 37.5, 255.5] {
            for y in [0.5, 63.5, 64.5, 127.5] {
                let s = kernels.scattering_sample_from_frag_coord(Vec3::new(x, y, 10.5));
                let spread = safe_sqrt((1.0 - s.mu * s.mu) * (1.0 - s.mu_s * s.mu_s));
                assert!(s.nu >= s.mu * s.mu_s - spread - 1e-6);
                assert!(s.nu <= s.mu * s.mu_s + spread + 1e-6);
                assert_eq!(s.ray_r_mu_intersects_ground, y < layout.scattering_mu as f32 / 2.0);
            }
        }
    }

    #[test]
    fn test_lut_sampling_interpolates_and_clamps() {
        let texels = [[0.0; 4], [1.0; 4], [2.0; 4], [3.0; 4]];
        let lut = Lut::new(&texels, 2, 2, 1);
        assert_eq!(lut.sample_2d(Vec2::new(0.25, 0.25)).x, 0.0);
        assert!((lut.sample_2d(Vec2::new(0.5, 0.25)).x - 0.5).abs() < 1e-6);
        assert!((lut.sample_2d(Vec2::new(0.5, 0.5)).x - 1.5).abs() < 1e-6);
        assert_eq!(lut.sample_2d(Vec2::new(2.0, 2.0)).x, 3.0, "clamped to edge");
        assert_eq!(lut.fetch(-3, 0, 9).x, 0.0);
    }

    #[test]
    fn test_direct_irradiance_follows_sun_elevation() {
        let mut kernels = earth_kernels();
        kernels.layout = TextureLayout::compact();
        kernels.samples = SampleCounts::compact();
        let table = transmittance_table(&kernels);
        let lut = Lut::new(
            &table,
            kernels.layout.transmittance_width,
            kernels.layout.transmittance_height,
            1,
        );
        let r = kernels.atmosphere.top_radius;
        let below = kernels.direct_irradiance(&lut, r, -0.5);
        let low = kernels.direct_irradiance(&lut, r, 0.2);
        let high = kernels.direct_irradiance(&lut, r, 1.0);
        assert_eq!(below, Vec3::ZERO, "sun below the horizon gives no light");
        assert!(high.cmpgt(low).all());
        assert!(
            (high - kernels.atmosphere.solar_irradiance).abs().max_element() < 1e-3,
            "overhead sun at the top sees the full solar irradiance, got {high}"
        );
    }

    #[test]
    fn test_horizon_column_stays_above_the_ground() {
        let kernels = earth_kernels();
        let width = kernels.layout.transmittance_width as f32;
        let height = kernels.layout.transmittance_height as f32;
        for y in 0..kernels.layout.transmittance_height {
            let v = (y as f32 + 0.5) / height;
            let (r, mu) = kernels.r_mu_from_transmittance_uv(Vec2::new((width - 0.5) / width, v));
            assert!(
                !kernels.ray_intersects_ground(r, mu),
                "row {y}: grazing ray r={r} mu={mu} hits the ground"
            );
        }
    }

    #[test]
    fn test_horizon_column_transmittance_is_stable() {
        let kernels = earth_kernels();
        let width = kernels.layout.transmittance_width as f32;
        for y in 0..kernels.layout.transmittance_height {
            let row = y as f32 + 0.5;
            let grazing = kernels.transmittance_texel(Vec2::new(width - 0.5, row));
            let nudged = kernels.transmittance_texel(Vec2::new(width - 0.5 - 1e-3, row));
            let inner = kernels.transmittance_texel(Vec2::new(width - 1.5, row));
            assert!(
                ((grazing - nudged).abs() - 1e-2 * grazing).max_element() <= 1e-6,
                "row {y}: last column {grazing} jumps to {nudged} under a tiny offset"
            );
            assert!(
                grazing.cmple(inner + 1e-6).all(),
                "row {y}: grazing transmittance {grazing} exceeds the steeper column {inner}"
            );
        }
    }

    #[test]
    fn test_single_scattering_is_positive_and_blue() {
        let mut kernels = earth_kernels();
        kernels.layout = TextureLayout::compact();
        kernels.samples = SampleCounts::compact();
        let table = transmittance_table(&kernels);
        let lut = Lut::new(
            &table,
            kernels.layout.transmittance_width,
            kernels.layout.transmittance_height,
            1,
        );
        let sample = ScatteringSample {
            r: kernels.atmosphere.bottom_radius + 0.001,
            mu: 0.5,
            mu_s: 0.8,
            nu: 0.4,
            ray_r_mu_intersects_ground: false,
        };
        let (rayleigh, mie) = kernels.single_scattering(&lut, &sample);
        assert!(rayleigh.cmpgt(Vec3::ZERO).all());
        assert!(mie.cmpgt(Vec3::ZERO).all());
        assert!(rayleigh.z > rayleigh.x, "rayleigh scattering favours blue");
    }
}
