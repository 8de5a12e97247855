//! Altitude density profiles for the scattering and absorbing media.
//!
//! A profile is a stack of one or two [`DensityProfileLayer`]s. Each layer
//! covers `width` meters above the previous one; the last layer extends to the
//! top of the atmosphere whatever its width.

use crate::error::ScatteringError;

/// Maximum number of layers the precompute kernels understand.
pub const MAX_DENSITY_LAYERS: usize = 2;

/// One layer of a density profile.
///
/// The density at altitude `h` is
/// `exp_term * exp(exp_scale * h) + linear_term * h + constant_term`,
/// clamped to `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DensityProfileLayer {
    /// Thickness of the layer in meters.
    pub width: f64,
    pub exp_term: f64,
    /// Inverse meters.
    pub exp_scale: f64,
    /// Inverse meters.
    pub linear_term: f64,
    pub constant_term: f64,
}

impl DensityProfileLayer {
    /// Exponentially decaying layer with the given scale height in meters.
    pub fn exponential(scale_height: f64) -> Self {
        Self {
            width: 0.0,
            exp_term: 1.0,
            exp_scale: -1.0 / scale_height,
            linear_term: 0.0,
            constant_term: 0.0,
        }
    }

    /// Piecewise-linear layer `linear_term * h + constant_term`.
    pub fn linear(width: f64, linear_term: f64, constant_term: f64) -> Self {
        Self {
            width,
            exp_term: 0.0,
            exp_scale: 0.0,
            linear_term,
            constant_term,
        }
    }

    /// Evaluate the layer formula at `altitude` meters.
    pub fn density(&self, altitude: f64) -> f64 {
        let density = self.exp_term * (self.exp_scale * altitude).exp()
            + self.linear_term * altitude
            + self.constant_term;
        density.clamp(0.0, 1.0)
    }

    /// The same layer expressed in `length_unit`-meter units.
    pub fn scaled(&self, length_unit: f64) -> Self {
        Self {
            width: self.width / length_unit,
            exp_term: self.exp_term,
            exp_scale: self.exp_scale * length_unit,
            linear_term: self.linear_term * length_unit,
            constant_term: self.constant_term,
        }
    }

    fn is_finite(&self) -> bool {
        [
            self.width,
            self.exp_term,
            self.exp_scale,
            self.linear_term,
            self.constant_term,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// An ordered stack of density layers, ground first.
#[derive(Clone, Debug, PartialEq)]
pub struct DensityProfile {
    layers: Vec<DensityProfileLayer>,
}

impl DensityProfile {
    pub fn new(layers: Vec<DensityProfileLayer>) -> Self {
        Self { layers }
    }

    /// A profile made of a single layer covering the whole atmosphere.
    pub fn single(layer: DensityProfileLayer) -> Self {
        Self {
            layers: vec![layer],
        }
    }

    /// A profile with no absorbing or scattering medium at all.
    pub fn empty_medium() -> Self {
        Self::single(DensityProfileLayer::default())
    }

    pub fn layers(&self) -> &[DensityProfileLayer] {
        &self.layers
    }

    /// Density multiplier at `altitude` meters above the ground.
    ///
    /// Altitudes below the ground use the first layer and altitudes above the
    /// last boundary use the last layer.
    pub fn density(&self, altitude: f64) -> f64 {
        let mut ceiling = 0.0;
        for (index, layer) in self.layers.iter().enumerate() {
            ceiling += layer.width;
            if altitude < ceiling || index + 1 == self.layers.len() {
                return layer.density(altitude);
            }
        }
        0.0
    }

    /// Reject profiles the kernels cannot represent.
    pub fn validate(&self, name: &str) -> Result<(), ScatteringError> {
        if self.layers.is_empty() {
            return Err(ScatteringError::invalid(format!(
                "{name} density profile has no layers"
            )));
        }
        if self.layers.len() > MAX_DENSITY_LAYERS {
            return Err(ScatteringError::invalid(format!(
                "{name} density profile has {} layers, at most {MAX_DENSITY_LAYERS} are supported",
                self.layers.len()
            )));
        }
        for (index, layer) in self.layers.iter().enumerate() {
            if !layer.is_finite() {
                return Err(ScatteringError::invalid(format!(
                    "{name} density layer {index} has a non-finite term"
                )));
            }
            if layer.width < 0.0 {
                return Err(ScatteringError::invalid(format!(
                    "{name} density layer {index} has negative width {}",
                    layer.width
                )));
            }
        }
        Ok(())
    }

    /// Exactly two layers in `length_unit` units, the form the kernels read.
    ///
    /// A single-layer profile gets an empty zero-width layer in front of it,
    /// so the kernels always select the second layer.
    pub fn kernel_layers(&self, length_unit: f64) -> [DensityProfileLayer; MAX_DENSITY_LAYERS] {
        match self.layers.as_slice() {
            [only] => [DensityProfileLayer::default(), only.scaled(length_unit)],
            [first, second, ..] => [first.scaled(length_unit), second.scaled(length_unit)],
            [] => [DensityProfileLayer::default(); MAX_DENSITY_LAYERS],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ozone_profile() -> DensityProfile {
        DensityProfile::new(vec![
            DensityProfileLayer::linear(25000.0, 1.0 / 15000.0, -2.0 / 3.0),
            DensityProfileLayer::linear(0.0, -1.0 / 15000.0, 8.0 / 3.0),
        ])
    }

    #[test]
    fn test_exponential_layer_decays_with_scale_height() {
        let profile = DensityProfile::single(DensityProfileLayer::exponential(8000.0));
        assert!((profile.density(0.0) - 1.0).abs() < 1e-12);
        let one_scale_height = profile.density(8000.0);
        assert!(
            (one_scale_height - (-1.0_f64).exp()).abs() < 1e-12,
            "density at one scale height should be 1/e, got {one_scale_height}"
        );
    }

    #[test]
    fn test_two_layer_profile_is_continuous_at_boundary() {
        let profile = ozone_profile();
        let below = profile.density(25000.0 - 1e-6);
        let at = profile.density(25000.0);
        assert!(
            (below - at).abs() < 1e-6,
            "density jumps at the layer boundary: {below} vs {at}"
        );
        assert!((at - 1.0).abs() < 1e-9, "ozone peak should be 1, got {at}");
    }

    #[test]
    fn test_ozone_profile_shape() {
        let profile = ozone_profile();
        assert_eq!(profile.density(5000.0), 0.0, "no ozone near the ground");
        assert!((profile.density(17500.0) - 0.5).abs() < 1e-9);
        assert!((profile.density(32500.0) - 0.5).abs() < 1e-9);
        assert_eq!(profile.density(60000.0), 0.0, "no ozone above 40 km");
    }

    #[test]
    fn test_density_is_clamped() {
        let layer = DensityProfileLayer {
            width: 0.0,
            exp_term: 0.0,
            exp_scale: 0.0,
            linear_term: 0.0,
            constant_term: 3.0,
        };
        assert_eq!(DensityProfile::single(layer).density(10.0), 1.0);
        let negative = DensityProfileLayer::linear(0.0, 0.0, -2.0);
        assert_eq!(DensityProfile::single(negative).density(10.0), 0.0);
    }

    #[test]
    fn test_negative_altitude_uses_first_layer() {
        let profile = DensityProfile::single(DensityProfileLayer::exponential(8000.0));
        assert_eq!(profile.density(-100.0), 1.0, "clamped, not an error");
    }

    #[test]
    fn test_validate_rejects_empty_and_oversized_profiles() {
        assert!(DensityProfile::new(Vec::new()).validate("rayleigh").is_err());
        let three = DensityProfile::new(vec![DensityProfileLayer::default(); 3]);
        assert!(three.validate("mie").is_err());
        let negative = DensityProfile::single(DensityProfileLayer::linear(-1.0, 0.0, 1.0));
        assert!(negative.validate("ozone").is_err());
        assert!(ozone_profile().validate("ozone").is_ok());
    }

    #[test]
    fn test_kernel_layers_pad_single_layer_profiles() {
        let profile = DensityProfile::single(DensityProfileLayer::exponential(8000.0));
        let [first, second] = profile.kernel_layers(1000.0);
        assert_eq!(first, DensityProfileLayer::default());
        assert!((second.exp_scale - (-1.0 / 8.0)).abs() < 1e-12);
    }

    #[test]
    fn test_scaled_layer_keeps_density_in_new_units() {
        let layer = DensityProfileLayer::linear(25000.0, 1.0 / 15000.0, -2.0 / 3.0);
        let scaled = layer.scaled(1000.0);
        assert!((scaled.width - 25.0).abs() < 1e-12);
        assert!((layer.density(20000.0) - scaled.density(20.0)).abs() < 1e-12);
    }
}
