use super::error::EngineError;
use super::score_state::AsAny;
use crate::core::models::derivatives::DerivativeAccumulator;
use crate::core::models::ids::ParticleIndex;
use crate::core::models::store::ParticleStore;
use std::fmt::Debug;

/// A scoring function over particles.
///
/// Restraints only ever see the particles through a shared borrow, so scoring
/// cannot change any attribute value. Derivative contributions go through the
/// accumulator, which already carries the restraint's weight.
pub trait Restraint: AsAny + Debug + Send {
    fn name(&self) -> &str;

    /// The unweighted score. The model multiplies it by the restraint weight.
    fn unprotected_evaluate(
        &self,
        particles: &ParticleStore,
        accumulator: Option<&mut DerivativeAccumulator<'_>>,
    ) -> Result<f64, EngineError>;

    /// Particles whose attributes the score reads.
    fn inputs(&self, particles: &ParticleStore) -> Vec<ParticleIndex>;
}
