//! Shared shader handles and the set of live scattering models.

use std::sync::Arc;

use glam::Vec3;

use crate::backend::PrecomputeBackend;
use crate::error::ScatteringError;
use crate::model::ScatteringModel;

/// Handles shared by every model: the precompute backend and the sky and
/// water shaders that consume the textures. Registered once, read by `init`.
#[derive(Debug)]
pub struct ScatteringResources<B, S = ()> {
    precompute: Option<Arc<B>>,
    scattering_shader: Option<S>,
    water_shader: Option<S>,
}

impl<B, S> Default for ScatteringResources<B, S> {
    fn default() -> Self {
        Self {
            precompute: None,
            scattering_shader: None,
            water_shader: None,
        }
    }
}

impl<B, S> ScatteringResources<B, S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_precompute(&mut self, backend: Arc<B>) {
        self.precompute = Some(backend);
    }

    pub fn set_scattering_shader(&mut self, shader: S) {
        self.scattering_shader = Some(shader);
    }

    pub fn set_water_shader(&mut self, shader: S) {
        self.water_shader = Some(shader);
    }

    pub fn precompute(&self) -> Result<&Arc<B>, ScatteringError> {
        self.precompute
            .as_ref()
            .ok_or(ScatteringError::MissingResource("precompute compute shader"))
    }

    pub fn scattering_shader(&self) -> Result<&S, ScatteringError> {
        self.scattering_shader
            .as_ref()
            .ok_or(ScatteringError::MissingResource("scattering shader"))
    }

    pub fn water_shader(&self) -> Result<&S, ScatteringError> {
        self.water_shader
            .as_ref()
            .ok_or(ScatteringError::MissingResource("water shader"))
    }

    /// All three handles are registered.
    pub fn is_ready(&self) -> bool {
        self.precompute.is_some() && self.scattering_shader.is_some() && self.water_shader.is_some()
    }
}

/// Stable index of a model inside a [`ModelArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelHandle(u32);

/// Models in insertion order. Removed slots are never reused, so a stale
/// handle resolves to nothing.
pub struct ModelArena<B: PrecomputeBackend> {
    models: Vec<(ModelHandle, ScatteringModel<B>)>,
    next: u32,
}

impl<B: PrecomputeBackend> Default for ModelArena<B> {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            next: 0,
        }
    }
}

impl<B: PrecomputeBackend> ModelArena<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `model` and return its handle. `None` once every handle has
    /// been issued; the model is then dropped, which releases its textures.
    pub fn insert(&mut self, model: ScatteringModel<B>) -> Option<ModelHandle> {
        let handle = ModelHandle(self.next);
        self.next = self.next.checked_add(1)?;
        self.models.push((handle, model));
        Some(handle)
    }

    pub fn get(&self, handle: ModelHandle) -> Option<&ScatteringModel<B>> {
        self.models
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, model)| model)
    }

    pub fn get_mut(&mut self, handle: ModelHandle) -> Option<&mut ScatteringModel<B>> {
        self.models
            .iter_mut()
            .find(|(h, _)| *h == handle)
            .map(|(_, model)| model)
    }

    /// Take a model out of the arena. Its textures stay alive until the
    /// caller releases or drops it.
    pub fn remove(&mut self, handle: ModelHandle) -> Option<ScatteringModel<B>> {
        let index = self.models.iter().position(|(h, _)| *h == handle)?;
        Some(self.models.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModelHandle, &ScatteringModel<B>)> {
        self.models.iter().map(|(handle, model)| (*handle, model))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ModelHandle, &mut ScatteringModel<B>)> {
        self.models
            .iter_mut()
            .map(|(handle, model)| (*handle, model))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Point every model at the same sun, e.g. from a directional light.
    pub fn update_sun_direction(&mut self, direction: Vec3) {
        for (_, model) in self.iter_mut() {
            model.sun_direction = direction;
        }
    }

    /// Release every model's textures and empty the arena. Handles issued
    /// before stay invalid.
    pub fn release_all(&mut self) {
        for (_, mut model) in self.models.drain(..) {
            model.release();
        }
        log::debug!("Released every scattering model");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SampleCounts, ScatteringConfig, TextureLayout};
    use crate::cpu::CpuBackend;

    fn compact_config() -> ScatteringConfig {
        ScatteringConfig {
            layout: TextureLayout::compact(),
            samples: SampleCounts::compact(),
            ..ScatteringConfig::default()
        }
    }

    #[test]
    fn test_missing_handles_are_reported_by_name() {
        let mut resources = ScatteringResources::<CpuBackend, &'static str>::new();
        assert!(!resources.is_ready());
        assert_eq!(
            resources.scattering_shader(),
            Err(ScatteringError::MissingResource("scattering shader"))
        );
        resources.set_precompute(Arc::new(CpuBackend::new()));
        resources.set_scattering_shader("sky");
        resources.set_water_shader("water");
        assert!(resources.is_ready());
        assert_eq!(resources.water_shader(), Ok(&"water"));
    }

    #[test]
    fn test_arena_handles_stay_stable() {
        let mut arena = ModelArena::<CpuBackend>::new();
        let first = arena.insert(ScatteringModel::new(compact_config())).expect("handle");
        let second = arena.insert(ScatteringModel::new(compact_config())).expect("handle");
        assert_eq!(arena.len(), 2);

        assert!(arena.remove(first).is_some());
        assert!(arena.get(first).is_none(), "removed handle resolves to nothing");
        assert!(arena.get(second).is_some());
        let third = arena.insert(ScatteringModel::new(compact_config())).expect("handle");
        assert_ne!(third, first, "handles are not reused");
        let order: Vec<_> = arena.iter().map(|(handle, _)| handle).collect();
        assert_eq!(order, vec![second, third]);
    }

    #[test]
    fn test_sun_direction_and_release_all() {
        let backend = Arc::new(CpuBackend::new());
        let mut resources = ScatteringResources::<CpuBackend>::new();
        resources.set_precompute(Arc::clone(&backend));

        let mut arena = ModelArena::new();
        for _ in 0..2 {
            let mut model = ScatteringModel::new(compact_config());
            model.init(&resources, 1).expect("init");
            arena.insert(model).expect("handle");
        }
        assert_eq!(backend.live_texture_count(), 8);

        arena.update_sun_direction(Vec3::X);
        assert!(arena.iter().all(|(_, model)| model.sun_direction == Vec3::X));

        let stale = arena.iter().map(|(handle, _)| handle).next();
        arena.release_all();
        assert_eq!(backend.live_texture_count(), 0);
        assert!(arena.is_empty());
        let fresh = arena.insert(ScatteringModel::new(compact_config())).expect("handle");
        assert_ne!(Some(fresh), stale, "handles are not reused after release_all");
    }

    #[test]
    fn test_insert_stops_when_handles_run_out() {
        let backend = Arc::new(CpuBackend::new());
        let mut resources = ScatteringResources::<CpuBackend>::new();
        resources.set_precompute(Arc::clone(&backend));

        let mut arena = ModelArena::new();
        arena.next = u32::MAX - 1;
        let last = arena.insert(ScatteringModel::new(compact_config()));
        assert_eq!(last, Some(ModelHandle(u32::MAX - 1)));

        let mut model = ScatteringModel::new(compact_config());
        model.init(&resources, 1).expect("init");
        assert_eq!(arena.insert(model), None, "no handle left to issue");
        assert_eq!(arena.len(), 1);
        assert_eq!(backend.live_texture_count(), 0, "rejected model is released");
        assert!(arena.get(ModelHandle(u32::MAX - 1)).is_some());
    }
}
