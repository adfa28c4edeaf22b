use crate::core::decorators::{Decorator, Xyzr, sphere_distance};
use crate::core::models::derivatives::DerivativeAccumulator;
use crate::core::models::ids::ParticleIndex;
use crate::core::models::store::ParticleStore;
use crate::engine::error::EngineError;
use crate::engine::restraint::Restraint;
use crate::engine::states::ClosePairsScoreState;

/// Penalizes overlapping spheres from a close-pair list.
///
/// Reads the pairs maintained by a [`ClosePairsScoreState`] on `container`
/// and scores `0.5 * k * s^2` for every pair whose surface distance `s` is
/// negative. Pairs that merely lie within the list's cutoff cost nothing.
#[derive(Debug, Clone)]
pub struct SoftSphereRestraint {
    name: String,
    container: ParticleIndex,
    stiffness: f64,
}

impl SoftSphereRestraint {
    /// Scores the pairs listed on `container` with spring constant `stiffness`.
    pub fn new(name: impl Into<String>, container: ParticleIndex, stiffness: f64) -> Self {
        Self {
            name: name.into(),
            container,
            stiffness,
        }
    }

    pub fn container(&self) -> ParticleIndex {
        self.container
    }

    pub fn stiffness(&self) -> f64 {
        self.stiffness
    }
}

impl Restraint for SoftSphereRestraint {
    fn name(&self) -> &str {
        &self.name
    }

    fn unprotected_evaluate(
        &self,
        particles: &ParticleStore,
        mut accumulator: Option<&mut DerivativeAccumulator<'_>>,
    ) -> Result<f64, EngineError> {
        let mut score = 0.0;
        for (a, b) in ClosePairsScoreState::pairs_in(particles, self.container)? {
            let a = Xyzr::decorate(particles, a)?;
            let b = Xyzr::decorate(particles, b)?;
            let overlap = sphere_distance(&a, &b);
            if overlap >= 0.0 {
                continue;
            }
            score += 0.5 * self.stiffness * overlap * overlap;
            if let Some(da) = accumulator.as_deref_mut() {
                super::add_distance_derivative(&a.as_xyz(), &b.as_xyz(), self.stiffness * overlap, da)?;
            }
        }
        Ok(score)
    }

    /// The container and every particle currently listed in it.
    fn inputs(&self, particles: &ParticleStore) -> Vec<ParticleIndex> {
        let mut inputs = vec![self.container];
        if let Ok(pairs) = ClosePairsScoreState::pairs_in(particles, self.container) {
            inputs.extend(pairs.into_iter().flat_map(|(a, b)| [a, b]));
        }
        inputs.sort_unstable();
        inputs.dedup();
        inputs
    }
}
