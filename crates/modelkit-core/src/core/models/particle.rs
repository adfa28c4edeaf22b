use super::ids::ParticleIndex;
use crate::core::attributes::{
    AttributeKind, AttributeTable, FloatAttr, IntAttr, ObjectAttr, ParticleAttr, ParticlesAttr,
    StringAttr,
};
use crate::core::error::{ModelError, describe};
use crate::core::keys::{FloatKey, Key};
use std::fmt;

/// Storage owned by the particle arena for one particle.
#[derive(Debug, Clone, Default)]
pub struct ParticleData {
    pub(crate) name: String,
    pub(crate) table: AttributeTable,
}

impl ParticleData {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: AttributeTable::new(),
        }
    }
}

fn not_found<T: AttributeKind>(name: &str, index: ParticleIndex, key: Key<T>) -> ModelError {
    ModelError::AttributeNotFound {
        particle: describe(name, index),
        key: key.name(),
        kind: T::KIND,
    }
}

/// A read-only view of one live particle.
#[derive(Clone, Copy)]
pub struct Particle<'a> {
    index: ParticleIndex,
    data: &'a ParticleData,
    derivatives_available: bool,
}

impl<'a> Particle<'a> {
    pub(crate) fn new(index: ParticleIndex, data: &'a ParticleData, derivatives_available: bool) -> Self {
        Self {
            index,
            data,
            derivatives_available,
        }
    }

    pub fn index(&self) -> ParticleIndex {
        self.index
    }

    pub fn name(&self) -> &'a str {
        &self.data.name
    }

    pub fn attributes(&self) -> &'a AttributeTable {
        &self.data.table
    }

    pub fn has_attribute<T: AttributeKind>(&self, key: Key<T>) -> bool {
        self.data.table.has(key)
    }

    pub fn get_value<T: AttributeKind>(&self, key: Key<T>) -> Result<T::Value, ModelError> {
        self.value_ref(key).cloned()
    }

    pub fn value_ref<T: AttributeKind>(&self, key: Key<T>) -> Result<&'a T::Value, ModelError> {
        self.data
            .table
            .get(key)
            .ok_or_else(|| not_found(&self.data.name, self.index, key))
    }

    pub fn get_is_optimized(&self, key: FloatKey) -> Result<bool, ModelError> {
        if !self.has_attribute(key) {
            return Err(not_found(&self.data.name, self.index, key));
        }
        Ok(self.data.table.is_optimized(key))
    }

    /// The derivative stored by the last derivative-computing evaluation.
    pub fn get_derivative(&self, key: FloatKey) -> Result<f64, ModelError> {
        if !self.derivatives_available {
            return Err(ModelError::DerivativesCheckedOut {
                particle: describe(&self.data.name, self.index),
            });
        }
        self.data
            .table
            .derivative(key)
            .ok_or_else(|| not_found(&self.data.name, self.index, key))
    }

    pub fn keys<T: AttributeKind>(&self) -> impl Iterator<Item = Key<T>> + 'a {
        self.data.table.keys::<T>()
    }

    pub fn float_keys(&self) -> impl Iterator<Item = FloatKey> + 'a {
        self.keys::<FloatAttr>()
    }

    pub fn optimized_float_keys(&self) -> impl Iterator<Item = FloatKey> + 'a {
        self.data.table.optimized_keys()
    }
}

impl fmt::Debug for Particle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("index", &self.index)
            .field("name", &self.data.name)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Particle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = &self.data.table;
        writeln!(f, "Particle {}", describe(&self.data.name, self.index))?;
        for key in table.keys::<FloatAttr>() {
            let flag = if table.is_optimized(key) { " (optimized)" } else { "" };
            writeln!(f, "  float {}: {}{}", key, table.get(key).copied().unwrap_or_default(), flag)?;
        }
        for key in table.keys::<IntAttr>() {
            writeln!(f, "  int {}: {}", key, table.get(key).copied().unwrap_or_default())?;
        }
        for key in table.keys::<StringAttr>() {
            writeln!(f, "  string {}: {:?}", key, table.get(key).map(String::as_str).unwrap_or_default())?;
        }
        for key in table.keys::<ParticleAttr>() {
            if let Some(other) = table.get(key) {
                writeln!(f, "  particle {}: {:?}", key, other)?;
            }
        }
        for key in table.keys::<ParticlesAttr>() {
            if let Some(list) = table.get(key) {
                writeln!(f, "  particles {}: {:?}", key, list)?;
            }
        }
        for key in table.keys::<ObjectAttr>() {
            writeln!(f, "  object {}: <shared>", key)?;
        }
        Ok(())
    }
}

/// A mutable view of one live particle.
pub struct ParticleMut<'a> {
    index: ParticleIndex,
    data: &'a mut ParticleData,
    derivatives_available: bool,
}

impl<'a> ParticleMut<'a> {
    pub(crate) fn new(index: ParticleIndex, data: &'a mut ParticleData, derivatives_available: bool) -> Self {
        Self {
            index,
            data,
            derivatives_available,
        }
    }

    pub fn as_particle(&self) -> Particle<'_> {
        Particle::new(self.index, self.data, self.derivatives_available)
    }

    pub fn index(&self) -> ParticleIndex {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.data.name = name.into();
    }

    pub fn has_attribute<T: AttributeKind>(&self, key: Key<T>) -> bool {
        self.data.table.has(key)
    }

    /// Adds a new attribute; fails without overwriting if the key is already set.
    pub fn add_attribute<T: AttributeKind>(&mut self, key: Key<T>, value: T::Value) -> Result<(), ModelError> {
        self.data
            .table
            .insert(key, value)
            .map_err(|_| ModelError::AttributeExists {
                particle: describe(&self.data.name, self.index),
                key: key.name(),
                kind: T::KIND,
            })
    }

    pub fn add_float_attribute(&mut self, key: FloatKey, value: f64, optimized: bool) -> Result<(), ModelError> {
        self.add_attribute(key, value)?;
        self.data.table.set_is_optimized(key, optimized);
        Ok(())
    }

    pub fn set_value<T: AttributeKind>(&mut self, key: Key<T>, value: T::Value) -> Result<(), ModelError> {
        match self.data.table.replace(key, value) {
            Some(_) => Ok(()),
            None => Err(not_found(&self.data.name, self.index, key)),
        }
    }

    pub fn value_mut<T: AttributeKind>(&mut self, key: Key<T>) -> Result<&mut T::Value, ModelError> {
        let (name, index) = (&self.data.name, self.index);
        self.data
            .table
            .get_mut(key)
            .ok_or_else(|| not_found(name, index, key))
    }

    /// Removes an attribute, clearing its derivative slot for floats.
    pub fn remove_attribute<T: AttributeKind>(&mut self, key: Key<T>) -> Result<T::Value, ModelError> {
        self.data
            .table
            .remove(key)
            .ok_or_else(|| not_found(&self.data.name, self.index, key))
    }

    pub fn set_is_optimized(&mut self, key: FloatKey, optimized: bool) -> Result<(), ModelError> {
        if self.data.table.set_is_optimized(key, optimized) {
            Ok(())
        } else {
            Err(not_found(&self.data.name, self.index, key))
        }
    }
}
