use super::kinds::{AttributeKind, FloatAttr, ObjectRef};
use crate::core::keys::{FloatKey, Key};
use crate::core::models::ids::ParticleIndex;

/// A sparse-to-dense column: slot `i` holds the value for key index `i`.
///
/// Storage grows only to the largest key index actually inserted, never to the
/// number of keys registered process-wide.
#[derive(Debug, Clone)]
pub struct DenseTable<V> {
    slots: Vec<Option<V>>,
    len: usize,
}

impl<V> Default for DenseTable<V> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
        }
    }
}

impl<V> DenseTable<V> {
    pub fn get(&self, index: usize) -> Option<&V> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut V> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Stores `value` at `index` unless the slot is occupied, in which case the
    /// value is handed back untouched.
    pub fn insert(&mut self, index: usize, value: V) -> Result<(), V> {
        if self.contains(index) {
            return Err(value);
        }
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        self.slots[index] = Some(value);
        self.len += 1;
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Option<V> {
        let value = self.slots.get_mut(index)?.take()?;
        self.len -= 1;
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots currently backed by storage (largest touched index + 1).
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn indexes(&self) -> impl Iterator<Item = usize> + '_ {
        self.iter().map(|(index, _)| index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &V)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (index, value)))
    }
}

/// Per-particle attribute storage: one dense column per value kind.
///
/// Float columns are shadowed by an optimized flag and a derivative slot of the
/// same index. The derivative column can be checked out for the duration of an
/// evaluation pass so that restraints accumulate into it through a
/// `DerivativeAccumulator` while the table itself stays shared.
#[derive(Debug, Clone, Default)]
pub struct AttributeTable {
    pub(super) floats: DenseTable<f64>,
    pub(super) ints: DenseTable<i64>,
    pub(super) strings: DenseTable<String>,
    pub(super) particles: DenseTable<ParticleIndex>,
    pub(super) particle_lists: DenseTable<Vec<ParticleIndex>>,
    pub(super) objects: DenseTable<ObjectRef>,
    optimized: Vec<bool>,
    derivatives: Vec<f64>,
}

impl AttributeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has<T: AttributeKind>(&self, key: Key<T>) -> bool {
        T::slots(self).contains(key.index())
    }

    pub fn get<T: AttributeKind>(&self, key: Key<T>) -> Option<&T::Value> {
        T::slots(self).get(key.index())
    }

    pub fn get_mut<T: AttributeKind>(&mut self, key: Key<T>) -> Option<&mut T::Value> {
        T::slots_mut(self).get_mut(key.index())
    }

    /// Adds a new attribute. Fails, returning the value, if the key is already present.
    pub fn insert<T: AttributeKind>(&mut self, key: Key<T>, value: T::Value) -> Result<(), T::Value> {
        T::slots_mut(self).insert(key.index(), value)?;
        T::on_insert(self, key.index());
        Ok(())
    }

    /// Overwrites an existing attribute and returns the previous value, or
    /// returns `None` without storing anything if the key is absent.
    pub fn replace<T: AttributeKind>(&mut self, key: Key<T>, value: T::Value) -> Option<T::Value> {
        self.get_mut(key).map(|slot| std::mem::replace(slot, value))
    }

    pub fn remove<T: AttributeKind>(&mut self, key: Key<T>) -> Option<T::Value> {
        let value = T::slots_mut(self).remove(key.index())?;
        T::on_remove(self, key.index());
        Some(value)
    }

    /// Keys of kind `T` present in this table, in ascending index order.
    pub fn keys<T: AttributeKind>(&self) -> impl Iterator<Item = Key<T>> + '_ {
        T::slots(self).indexes().map(Key::from_index)
    }

    pub fn len<T: AttributeKind>(&self) -> usize {
        T::slots(self).len()
    }

    pub fn is_optimized(&self, key: FloatKey) -> bool {
        self.has(key) && self.optimized.get(key.index()).copied().unwrap_or(false)
    }

    /// Returns `false` if the float attribute is absent.
    pub fn set_is_optimized(&mut self, key: FloatKey, optimized: bool) -> bool {
        if !self.has(key) {
            return false;
        }
        self.optimized[key.index()] = optimized;
        true
    }

    pub fn optimized_keys(&self) -> impl Iterator<Item = FloatKey> + '_ {
        self.keys::<FloatAttr>().filter(|key| self.is_optimized(*key))
    }

    /// The derivative accumulated for a float attribute during the last
    /// derivative-computing evaluation, or `None` if the attribute is absent or
    /// the derivative column is currently checked out.
    pub fn derivative(&self, key: FloatKey) -> Option<f64> {
        if !self.has(key) {
            return None;
        }
        self.derivatives.get(key.index()).copied()
    }

    pub(crate) fn take_derivatives(&mut self) -> Vec<f64> {
        let mut derivatives = std::mem::take(&mut self.derivatives);
        derivatives.resize(self.floats.capacity(), 0.0);
        derivatives.fill(0.0);
        derivatives
    }

    pub(crate) fn restore_derivatives(&mut self, mut derivatives: Vec<f64>) {
        if derivatives.len() < self.optimized.len() {
            derivatives.resize(self.optimized.len(), 0.0);
        }
        self.derivatives = derivatives;
    }

    pub(super) fn reset_float_slot(&mut self, index: usize) {
        if index >= self.optimized.len() {
            self.optimized.resize(index + 1, false);
        }
        if index >= self.derivatives.len() {
            self.derivatives.resize(index + 1, 0.0);
        }
        self.optimized[index] = false;
        self.derivatives[index] = 0.0;
    }
}
