use super::error::EngineError;
use crate::core::models::derivatives::DerivativeAccumulator;
use crate::core::models::ids::ParticleIndex;
use crate::core::models::store::ParticleStore;
use std::any::Any;
use std::fmt::Debug;

/// Upcast to [`Any`] so boxed score states and restraints can be handed back
/// to callers as their concrete types.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A node that keeps derived attributes consistent around restraint scoring.
///
/// `before_evaluate` runs with exclusive access to the particles, before any
/// restraint is scored, in dependency order. `after_evaluate` runs in reverse
/// order with read-only access, and receives an accumulator when derivatives
/// are being computed so it can propagate them back to primary attributes.
///
/// `inputs` and `outputs` name the particles the state reads and writes. A
/// state whose outputs overlap another state's inputs is ordered before it.
pub trait ScoreState: AsAny + Debug + Send {
    fn name(&self) -> &str;

    fn before_evaluate(&mut self, particles: &mut ParticleStore) -> Result<(), EngineError>;

    fn after_evaluate(
        &mut self,
        _particles: &ParticleStore,
        _accumulator: Option<&mut DerivativeAccumulator<'_>>,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn inputs(&self, particles: &ParticleStore) -> Vec<ParticleIndex>;

    fn outputs(&self, particles: &ParticleStore) -> Vec<ParticleIndex>;
}
