use super::ids::ParticleIndex;
use super::store::ParticleStore;
use crate::core::error::{ModelError, describe};
use crate::core::keys::{FloatKey, KeyKind};
use slotmap::SecondaryMap;

/// Derivative columns checked out of a [`ParticleStore`] for one evaluation pass.
#[derive(Debug, Default)]
pub struct DerivativeBuffers(SecondaryMap<ParticleIndex, Vec<f64>>);

impl DerivativeBuffers {
    pub(crate) fn insert(&mut self, index: ParticleIndex, column: Vec<f64>) {
        self.0.insert(index, column);
    }

    pub(crate) fn take(&mut self, index: ParticleIndex) -> Option<Vec<f64>> {
        self.0.remove(index)
    }

    pub(crate) fn get(&self, index: ParticleIndex) -> Option<&Vec<f64>> {
        self.0.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: ParticleIndex) -> Option<&mut Vec<f64>> {
        self.0.get_mut(index)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (ParticleIndex, &Vec<f64>)> + '_ {
        self.0.iter()
    }
}

/// The scoped token through which derivative contributions are written.
///
/// An accumulator borrows the buffers checked out for the current evaluation
/// and carries a weight that multiplies every contribution. It cannot outlive
/// the evaluation that created it, and it is the only way to add to a
/// derivative.
#[derive(Debug)]
pub struct DerivativeAccumulator<'a> {
    particles: &'a ParticleStore,
    buffers: &'a mut DerivativeBuffers,
    weight: f64,
}

impl<'a> DerivativeAccumulator<'a> {
    pub(crate) fn new(particles: &'a ParticleStore, buffers: &'a mut DerivativeBuffers, weight: f64) -> Self {
        Self {
            particles,
            buffers,
            weight,
        }
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Adds `value * weight` to the derivative of `key` on particle `index`.
    ///
    /// # Errors
    ///
    /// Fails if the particle is not live or does not carry the float attribute.
    pub fn add_to_derivative(&mut self, index: ParticleIndex, key: FloatKey, value: f64) -> Result<(), ModelError> {
        let particle = self.particles.particle(index)?;
        if !particle.has_attribute(key) {
            return Err(ModelError::AttributeNotFound {
                particle: describe(particle.name(), index),
                key: key.name(),
                kind: KeyKind::Float,
            });
        }
        let slot = self
            .buffers
            .get_mut(index)
            .and_then(|column| column.get_mut(key.index()))
            .ok_or_else(|| {
                ModelError::Internal(format!(
                    "no derivative slot for '{}' on particle {}",
                    key,
                    describe(particle.name(), index)
                ))
            })?;
        *slot += value * self.weight;
        Ok(())
    }

    /// The derivative accumulated so far in this pass (already weighted).
    pub fn derivative(&self, index: ParticleIndex, key: FloatKey) -> Result<f64, ModelError> {
        let particle = self.particles.particle(index)?;
        if !particle.has_attribute(key) {
            return Err(ModelError::AttributeNotFound {
                particle: describe(particle.name(), index),
                key: key.name(),
                kind: KeyKind::Float,
            });
        }
        Ok(self
            .buffers
            .get(index)
            .and_then(|column| column.get(key.index()))
            .copied()
            .unwrap_or(0.0))
    }

    /// Reborrows this accumulator with its weight multiplied by `factor`.
    pub fn scaled(&mut self, factor: f64) -> DerivativeAccumulator<'_> {
        DerivativeAccumulator {
            particles: self.particles,
            buffers: &mut *self.buffers,
            weight: self.weight * factor,
        }
    }

    pub fn particles(&self) -> &'a ParticleStore {
        self.particles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_float(name: &str) -> (ParticleStore, ParticleIndex, FloatKey) {
        let mut store = ParticleStore::new();
        let p = store.add_particle("p");
        let key = FloatKey::new(name);
        store.add_float_attribute(p, key, 0.0, true).unwrap();
        (store, p, key)
    }

    #[test]
    fn contributions_are_multiplied_by_weight() {
        let (mut store, p, key) = store_with_float("accumulator_test_weight");
        let mut buffers = store.checkout_derivatives().unwrap();
        {
            let mut da = DerivativeAccumulator::new(&store, &mut buffers, 2.0);
            da.add_to_derivative(p, key, 1.5).unwrap();
            da.add_to_derivative(p, key, 0.5).unwrap();
            assert!((da.derivative(p, key).unwrap() - 4.0).abs() < 1e-12);
        }
        store.restore_derivatives(buffers);
        assert!((store.get_derivative(p, key).unwrap() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn scaled_accumulator_compounds_weights() {
        let (mut store, p, key) = store_with_float("accumulator_test_scaled");
        let mut buffers = store.checkout_derivatives().unwrap();
        {
            let mut da = DerivativeAccumulator::new(&store, &mut buffers, 0.5);
            let mut inner = da.scaled(4.0);
            assert_eq!(inner.weight(), 2.0);
            inner.add_to_derivative(p, key, 1.0).unwrap();
            da.add_to_derivative(p, key, 1.0).unwrap();
        }
        store.restore_derivatives(buffers);
        assert!((store.get_derivative(p, key).unwrap() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn adding_to_missing_attribute_fails() {
        let (mut store, p, _) = store_with_float("accumulator_test_present");
        let missing = FloatKey::new("accumulator_test_absent");
        let mut buffers = store.checkout_derivatives().unwrap();
        {
            let mut da = DerivativeAccumulator::new(&store, &mut buffers, 1.0);
            assert!(matches!(
                da.add_to_derivative(p, missing, 1.0),
                Err(ModelError::AttributeNotFound { .. })
            ));
        }
        store.restore_derivatives(buffers);
    }
}
