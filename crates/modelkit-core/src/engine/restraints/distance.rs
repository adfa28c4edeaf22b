use super::{add_distance_derivative, harmonic};
use crate::core::decorators::{Decorator, Xyz};
use crate::core::models::derivatives::DerivativeAccumulator;
use crate::core::models::ids::ParticleIndex;
use crate::core::models::store::ParticleStore;
use crate::engine::error::EngineError;
use crate::engine::restraint::Restraint;

/// Harmonic restraint `0.5 * k * (d - mean)^2` on the distance between two `Xyz` particles.
#[derive(Debug, Clone)]
pub struct DistanceRestraint {
    name: String,
    particles: [ParticleIndex; 2],
    mean: f64,
    stiffness: f64,
}

impl DistanceRestraint {
    /// Creates a harmonic restraint holding `a` and `b` at distance `mean`.
    pub fn new(name: impl Into<String>, a: ParticleIndex, b: ParticleIndex, mean: f64, stiffness: f64) -> Self {
        Self {
            name: name.into(),
            particles: [a, b],
            mean,
            stiffness,
        }
    }

    pub fn particles(&self) -> [ParticleIndex; 2] {
        self.particles
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn stiffness(&self) -> f64 {
        self.stiffness
    }
}

impl Restraint for DistanceRestraint {
    fn name(&self) -> &str {
        &self.name
    }

    fn unprotected_evaluate(
        &self,
        particles: &ParticleStore,
        accumulator: Option<&mut DerivativeAccumulator<'_>>,
    ) -> Result<f64, EngineError> {
        let [a, b] = self.particles;
        let a = Xyz::decorate(particles, a)?;
        let b = Xyz::decorate(particles, b)?;
        let (score, d_score) = harmonic(a.distance_to(&b), self.mean, self.stiffness);
        if let Some(da) = accumulator {
            add_distance_derivative(&a, &b, d_score, da)?;
        }
        Ok(score)
    }

    fn inputs(&self, _particles: &ParticleStore) -> Vec<ParticleIndex> {
        self.particles.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::Model;
    use nalgebra::Vector3;

    fn stretched() -> (Model, ParticleIndex, ParticleIndex) {
        let mut model = Model::new("m");
        let a = model.add_particle("a");
        let b = model.add_particle("b");
        Xyz::setup_particle(model.particles_mut(), a, Vector3::new(0.0, 0.0, 0.0)).unwrap();
        Xyz::setup_particle(model.particles_mut(), b, Vector3::new(3.0, 4.0, 0.0)).unwrap();
        (model, a, b)
    }

    #[test]
    fn score_is_harmonic_in_the_distance() {
        let (mut model, a, b) = stretched();
        model.add_restraint(DistanceRestraint::new("ab", a, b, 3.0, 2.0));
        let score = model.evaluate(false).unwrap();
        assert!((score - 4.0).abs() < 1e-12);
    }

    #[test]
    fn derivatives_point_along_the_separation() {
        let (mut model, a, b) = stretched();
        model.add_restraint(DistanceRestraint::new("ab", a, b, 3.0, 2.0));
        model.evaluate(true).unwrap();
        // d score / d distance = 2 * (5 - 3) = 4, direction (a - b) / 5.
        let da = Xyz::decorate(model.particles(), a).unwrap().derivatives().unwrap();
        let db = Xyz::decorate(model.particles(), b).unwrap().derivatives().unwrap();
        assert!((da - Vector3::new(-2.4, -3.2, 0.0)).norm() < 1e-12);
        assert!((db + da).norm() < 1e-12);
    }

    #[test]
    fn missing_coordinates_are_reported() {
        let (mut model, a, _) = stretched();
        let bare = model.add_particle("bare");
        model.add_restraint(DistanceRestraint::new("bad", a, bare, 1.0, 1.0));
        let err = model.evaluate(false).unwrap_err();
        assert!(err.to_string().contains("Xyz"));
    }
}
