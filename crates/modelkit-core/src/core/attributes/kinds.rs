use super::table::{AttributeTable, DenseTable};
use crate::core::keys::KeyKind;
use crate::core::models::ids::ParticleIndex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A shared, reference-counted handle stored in an object attribute.
///
/// The value is dropped once the last particle (or caller) holding a clone
/// releases it.
pub type ObjectRef = Arc<dyn Any + Send + Sync>;

mod sealed {
    pub trait Sealed {}
}

/// Ties a marker type to its value type and to its column in an [`AttributeTable`].
///
/// Implemented only by the six marker types in this module; the set of value
/// kinds is closed.
pub trait AttributeKind: sealed::Sealed + 'static {
    const KIND: KeyKind;
    type Value: Clone + fmt::Debug;

    fn slots(table: &AttributeTable) -> &DenseTable<Self::Value>;
    fn slots_mut(table: &mut AttributeTable) -> &mut DenseTable<Self::Value>;

    fn on_insert(_table: &mut AttributeTable, _index: usize) {}
    fn on_remove(_table: &mut AttributeTable, _index: usize) {}
}

macro_rules! attribute_kind {
    ($marker:ident, $kind:expr, $value:ty, $field:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $marker {}

        impl sealed::Sealed for $marker {}

        impl AttributeKind for $marker {
            const KIND: KeyKind = $kind;
            type Value = $value;

            fn slots(table: &AttributeTable) -> &DenseTable<Self::Value> {
                &table.$field
            }

            fn slots_mut(table: &mut AttributeTable) -> &mut DenseTable<Self::Value> {
                &mut table.$field
            }
        }
    };
}

attribute_kind!(IntAttr, KeyKind::Int, i64, ints);
attribute_kind!(StringAttr, KeyKind::String, String, strings);
attribute_kind!(ParticleAttr, KeyKind::Particle, ParticleIndex, particles);
attribute_kind!(ParticlesAttr, KeyKind::ParticleList, Vec<ParticleIndex>, particle_lists);
attribute_kind!(ObjectAttr, KeyKind::Object, ObjectRef, objects);

/// Floats additionally carry an optimized flag and a derivative slot, both
/// reset whenever the attribute is added or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatAttr {}

impl sealed::Sealed for FloatAttr {}

impl AttributeKind for FloatAttr {
    const KIND: KeyKind = KeyKind::Float;
    type Value = f64;

    fn slots(table: &AttributeTable) -> &DenseTable<f64> {
        &table.floats
    }

    fn slots_mut(table: &mut AttributeTable) -> &mut DenseTable<f64> {
        &mut table.floats
    }

    fn on_insert(table: &mut AttributeTable, index: usize) {
        table.reset_float_slot(index);
    }

    fn on_remove(table: &mut AttributeTable, index: usize) {
        table.reset_float_slot(index);
    }
}
