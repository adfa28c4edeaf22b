use super::{add_distance_derivative, harmonic};
use crate::core::decorators::{Bonded, Decorator, Xyz};
use crate::core::models::derivatives::DerivativeAccumulator;
use crate::core::models::ids::{EdgeIndex, ParticleIndex};
use crate::core::models::store::ParticleStore;
use crate::engine::error::EngineError;
use crate::engine::restraint::Restraint;
use std::collections::HashSet;

const DEFAULT_STIFFNESS: f64 = 1.0;

/// Harmonic restraint on every bond touching a set of `Bonded` particles.
///
/// Each bond is scored once, against its equilibrium length. Bonds without a
/// length are ignored; bonds without a stiffness use `1.0`.
#[derive(Debug, Clone)]
pub struct BondRestraint {
    name: String,
    particles: Vec<ParticleIndex>,
}

impl BondRestraint {
    /// Scores every bond incident to one of `particles`, each bond once.
    pub fn new(name: impl Into<String>, particles: Vec<ParticleIndex>) -> Self {
        Self {
            name: name.into(),
            particles,
        }
    }

    pub fn particles(&self) -> &[ParticleIndex] {
        &self.particles
    }
}

impl Restraint for BondRestraint {
    fn name(&self) -> &str {
        &self.name
    }

    fn unprotected_evaluate(
        &self,
        particles: &ParticleStore,
        mut accumulator: Option<&mut DerivativeAccumulator<'_>>,
    ) -> Result<f64, EngineError> {
        let mut seen: HashSet<EdgeIndex> = HashSet::new();
        let mut score = 0.0;
        for particle in &self.particles {
            let bonded = Bonded::decorate(particles, *particle)?;
            for slot in 0..bonded.number_of_bonds() {
                let bond = bonded.bond(slot)?;
                if !seen.insert(bond.index()) {
                    continue;
                }
                let Some(length) = bond.length() else {
                    continue;
                };
                let stiffness = bond.stiffness().unwrap_or(DEFAULT_STIFFNESS);
                let [a, b] = bond.endpoints();
                let a = Xyz::decorate(particles, a)?;
                let b = Xyz::decorate(particles, b)?;
                let (term, d_score) = harmonic(a.distance_to(&b), length, stiffness);
                score += term;
                if let Some(da) = accumulator.as_deref_mut() {
                    add_distance_derivative(&a, &b, d_score, da)?;
                }
            }
        }
        Ok(score)
    }

    fn inputs(&self, particles: &ParticleStore) -> Vec<ParticleIndex> {
        let mut inputs = self.particles.clone();
        for particle in &self.particles {
            if let Some(bonded) = Bonded::try_decorate(particles, *particle) {
                inputs.extend(bonded.bonded_particles());
            }
        }
        inputs.sort_unstable();
        inputs.dedup();
        inputs
    }
}
