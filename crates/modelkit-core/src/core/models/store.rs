use super::derivatives::DerivativeBuffers;
use super::ids::ParticleIndex;
use super::particle::{Particle, ParticleData, ParticleMut};
use crate::core::attributes::AttributeKind;
use crate::core::error::ModelError;
use crate::core::graph::GraphStorage;
use crate::core::keys::{FloatKey, Key};
use slotmap::SlotMap;
use tracing::trace;

/// The particle arena: owns every particle's attribute table and every graph
/// stored over the particles.
///
/// Indices are generational. Once a particle is removed its index never
/// compares equal to a live one, even if the slot is reused, and every access
/// through a stale index fails with [`ModelError::ParticleNotFound`].
#[derive(Debug, Clone, Default)]
pub struct ParticleStore {
    particles: SlotMap<ParticleIndex, ParticleData>,
    pub(crate) graphs: Vec<GraphStorage>,
    derivatives_checked_out: bool,
}

impl ParticleStore {
    /// Creates a new, empty particle store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a particle with no attributes and returns its index.
    pub fn add_particle(&mut self, name: impl Into<String>) -> ParticleIndex {
        let index = self.particles.insert(ParticleData::new(name));
        trace!(particle = ?index, "Added particle");
        index
    }

    /// Removes a particle, disconnecting it from every graph first.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::ParticleNotFound`] if `index` is not live.
    pub fn remove_particle(&mut self, index: ParticleIndex) -> Result<(), ModelError> {
        if !self.particles.contains_key(index) {
            return Err(ModelError::ParticleNotFound { index });
        }
        let detached: usize = self.graphs.iter_mut().map(|graph| graph.detach(index)).sum();
        self.particles.remove(index);
        trace!(particle = ?index, edges = detached, "Removed particle");
        Ok(())
    }

    /// Returns `true` if `index` refers to a live particle.
    pub fn contains(&self, index: ParticleIndex) -> bool {
        self.particles.contains_key(index)
    }

    /// Returns the number of live particles.
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Retrieves a read-only view of a particle.
    ///
    /// # Errors
    ///
    /// Returns `ParticleNotFound` if `index` is not live.
    pub fn particle(&self, index: ParticleIndex) -> Result<Particle<'_>, ModelError> {
        self.particles
            .get(index)
            .map(|data| Particle::new(index, data, !self.derivatives_checked_out))
            .ok_or(ModelError::ParticleNotFound { index })
    }

    /// Retrieves a mutable view of a particle.
    pub fn particle_mut(&mut self, index: ParticleIndex) -> Result<ParticleMut<'_>, ModelError> {
        let available = !self.derivatives_checked_out;
        self.particles
            .get_mut(index)
            .map(|data| ParticleMut::new(index, data, available))
            .ok_or(ModelError::ParticleNotFound { index })
    }

    /// Live particle indices in arena order, which is stable between mutations.
    pub fn particle_indexes(&self) -> impl Iterator<Item = ParticleIndex> + '_ {
        self.particles.keys()
    }

    /// Iterates over live particles in index order.
    pub fn iter(&self) -> impl Iterator<Item = Particle<'_>> + '_ {
        let available = !self.derivatives_checked_out;
        self.particles
            .iter()
            .map(move |(index, data)| Particle::new(index, data, available))
    }

    /// Returns `false` for removed particles as well as missing attributes.
    pub fn has_attribute<T: AttributeKind>(&self, index: ParticleIndex, key: Key<T>) -> bool {
        self.particles
            .get(index)
            .is_some_and(|data| data.table.has(key))
    }

    /// Returns a copy of the value of `key` on particle `index`.
    pub fn get_value<T: AttributeKind>(&self, index: ParticleIndex, key: Key<T>) -> Result<T::Value, ModelError> {
        self.particle(index)?.get_value(key)
    }

    /// Borrows the value of `key` on particle `index`.
    pub fn value_ref<T: AttributeKind>(&self, index: ParticleIndex, key: Key<T>) -> Result<&T::Value, ModelError> {
        self.particle(index)?.value_ref(key)
    }

    /// Adds a new attribute to a particle.
    ///
    /// # Errors
    ///
    /// Returns `AttributeExists` if the particle already has `key`.
    pub fn add_attribute<T: AttributeKind>(
        &mut self,
        index: ParticleIndex,
        key: Key<T>,
        value: T::Value,
    ) -> Result<(), ModelError> {
        self.particle_mut(index)?.add_attribute(key, value)
    }

    /// Adds a Float attribute and marks whether it is optimized.
    pub fn add_float_attribute(
        &mut self,
        index: ParticleIndex,
        key: FloatKey,
        value: f64,
        optimized: bool,
    ) -> Result<(), ModelError> {
        self.particle_mut(index)?.add_float_attribute(key, value, optimized)
    }

    /// Overwrites an existing attribute.
    ///
    /// # Errors
    ///
    /// Returns `AttributeNotFound` if the particle lacks `key`.
    pub fn set_value<T: AttributeKind>(
        &mut self,
        index: ParticleIndex,
        key: Key<T>,
        value: T::Value,
    ) -> Result<(), ModelError> {
        self.particle_mut(index)?.set_value(key, value)
    }

    /// Removes `key` from a particle and returns its value.
    pub fn remove_attribute<T: AttributeKind>(
        &mut self,
        index: ParticleIndex,
        key: Key<T>,
    ) -> Result<T::Value, ModelError> {
        self.particle_mut(index)?.remove_attribute(key)
    }

    pub fn get_is_optimized(&self, index: ParticleIndex, key: FloatKey) -> Result<bool, ModelError> {
        self.particle(index)?.get_is_optimized(key)
    }

    pub fn set_is_optimized(&mut self, index: ParticleIndex, key: FloatKey, optimized: bool) -> Result<(), ModelError> {
        self.particle_mut(index)?.set_is_optimized(key, optimized)
    }

    /// The derivative of `key` accumulated by the last evaluation.
    ///
    /// # Errors
    ///
    /// Returns `DerivativesCheckedOut` while an evaluation holds the buffers.
    pub fn get_derivative(&self, index: ParticleIndex, key: FloatKey) -> Result<f64, ModelError> {
        self.particle(index)?.get_derivative(key)
    }

    /// Whether an evaluation currently holds the derivative buffers.
    pub fn derivatives_checked_out(&self) -> bool {
        self.derivatives_checked_out
    }

    /// Moves every particle's derivative column into a zeroed buffer set.
    ///
    /// Until [`restore_derivatives`](Self::restore_derivatives) is called,
    /// derivative reads through the store report `DerivativesCheckedOut`.
    pub(crate) fn checkout_derivatives(&mut self) -> Result<DerivativeBuffers, ModelError> {
        if self.derivatives_checked_out {
            return Err(ModelError::Internal(
                "derivative buffers are already checked out".to_string(),
            ));
        }
        let mut buffers = DerivativeBuffers::default();
        for (index, data) in self.particles.iter_mut() {
            buffers.insert(index, data.table.take_derivatives());
        }
        self.derivatives_checked_out = true;
        Ok(buffers)
    }

    pub(crate) fn restore_derivatives(&mut self, mut buffers: DerivativeBuffers) {
        for (index, data) in self.particles.iter_mut() {
            data.table.restore_derivatives(buffers.take(index).unwrap_or_default());
        }
        self.derivatives_checked_out = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::attributes::ObjectRef;
    use crate::core::error::ErrorKind;
    use crate::core::keys::{IntKey, ObjectKey, ParticleKey, StringKey};
    use std::sync::Arc;

    mod particles {
        use super::*;

        #[test]
        fn removed_index_is_never_equal_to_a_new_one() {
            let mut store = ParticleStore::new();
            let a = store.add_particle("a");
            store.remove_particle(a).unwrap();
            let b = store.add_particle("b");
            assert_ne!(a, b);
            assert!(!store.contains(a));
            assert!(store.contains(b));
        }

        #[test]
        fn stale_index_access_is_out_of_range() {
            let mut store = ParticleStore::new();
            let a = store.add_particle("a");
            store.remove_particle(a).unwrap();
            let err = store.particle(a).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::OutOfRange);
            assert!(matches!(store.remove_particle(a), Err(ModelError::ParticleNotFound { .. })));
        }

        #[test]
        fn particle_indexes_lists_live_particles() {
            let mut store = ParticleStore::new();
            let a = store.add_particle("a");
            let b = store.add_particle("b");
            let c = store.add_particle("c");
            store.remove_particle(b).unwrap();
            assert_eq!(store.particle_indexes().collect::<Vec<_>>(), vec![a, c]);
            assert_eq!(store.len(), 2);
        }

        #[test]
        fn display_lists_every_attribute() {
            let mut store = ParticleStore::new();
            let p = store.add_particle("atom");
            let x = FloatKey::new("store_test_show_x");
            let s = StringKey::new("store_test_show_name");
            store.add_float_attribute(p, x, 1.5, true).unwrap();
            store.add_attribute(p, s, "CA".to_string()).unwrap();
            let shown = store.particle(p).unwrap().to_string();
            assert!(shown.starts_with("Particle 'atom'"));
            assert!(shown.contains("float store_test_show_x: 1.5 (optimized)"));
            assert!(shown.contains("string store_test_show_name: \"CA\""));
        }
    }

    mod attributes {
        use super::*;

        #[test]
        fn values_round_trip_for_every_kind() {
            let mut store = ParticleStore::new();
            let p = store.add_particle("p");
            let q = store.add_particle("q");
            let f = FloatKey::new("store_test_rt_f");
            let i = IntKey::new("store_test_rt_i");
            let s = StringKey::new("store_test_rt_s");
            let r = ParticleKey::new("store_test_rt_p");
            let o = ObjectKey::new("store_test_rt_o");

            store.add_float_attribute(p, f, 3.25, true).unwrap();
            store.add_attribute(p, i, 11).unwrap();
            store.add_attribute(p, s, "name".to_string()).unwrap();
            store.add_attribute(p, r, q).unwrap();
            store.add_attribute(p, o, Arc::new(String::from("shared")) as ObjectRef).unwrap();

            assert_eq!(store.get_value(p, f).unwrap(), 3.25);
            assert!(store.get_is_optimized(p, f).unwrap());
            assert_eq!(store.get_value(p, i).unwrap(), 11);
            assert_eq!(store.get_value(p, s).unwrap(), "name");
            assert_eq!(store.get_value(p, r).unwrap(), q);
            let object = store.get_value(p, o).unwrap();
            assert_eq!(object.downcast_ref::<String>().map(String::as_str), Some("shared"));
        }

        #[test]
        fn double_add_is_a_usage_error_and_keeps_value() {
            let mut store = ParticleStore::new();
            let p = store.add_particle("p");
            let k = FloatKey::new("store_test_double");
            store.add_float_attribute(p, k, 1.0, false).unwrap();
            let err = store.add_float_attribute(p, k, 2.0, false).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Usage);
            assert!(matches!(err, ModelError::AttributeExists { .. }));
            assert_eq!(store.get_value(p, k).unwrap(), 1.0);
        }

        #[test]
        fn missing_attribute_errors_name_key_and_particle() {
            let mut store = ParticleStore::new();
            let p = store.add_particle("lonely");
            let k = IntKey::new("store_test_missing");
            let err = store.get_value(p, k).unwrap_err();
            let message = err.to_string();
            assert!(message.contains("store_test_missing"));
            assert!(message.contains("'lonely'"));
            assert!(store.set_value(p, k, 1).is_err());
            assert!(!store.has_attribute(p, k));
        }

        #[test]
        fn remove_then_readd_resets_derivative() {
            let mut store = ParticleStore::new();
            let p = store.add_particle("p");
            let k = FloatKey::new("store_test_readd");
            store.add_float_attribute(p, k, 1.0, true).unwrap();

            let mut buffers = store.checkout_derivatives().unwrap();
            buffers.get_mut(p).unwrap()[k.index()] = 4.0;
            store.restore_derivatives(buffers);
            assert_eq!(store.get_derivative(p, k).unwrap(), 4.0);

            assert_eq!(store.remove_attribute(p, k).unwrap(), 1.0);
            assert!(!store.has_attribute(p, k));
            store.add_float_attribute(p, k, 2.0, false).unwrap();
            assert_eq!(store.get_value(p, k).unwrap(), 2.0);
            assert_eq!(store.get_derivative(p, k).unwrap(), 0.0);
            assert!(!store.get_is_optimized(p, k).unwrap());
        }

        #[test]
        fn derivatives_are_unreadable_while_checked_out() {
            let mut store = ParticleStore::new();
            let p = store.add_particle("p");
            let k = FloatKey::new("store_test_checked_out");
            store.add_float_attribute(p, k, 0.0, false).unwrap();
            let buffers = store.checkout_derivatives().unwrap();
            assert!(matches!(
                store.get_derivative(p, k),
                Err(ModelError::DerivativesCheckedOut { .. })
            ));
            assert!(store.checkout_derivatives().is_err());
            store.restore_derivatives(buffers);
            assert_eq!(store.get_derivative(p, k).unwrap(), 0.0);
        }
    }
}
