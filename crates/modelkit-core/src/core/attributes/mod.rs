mod kinds;
mod table;

pub use kinds::{
    AttributeKind, FloatAttr, IntAttr, ObjectAttr, ObjectRef, ParticleAttr, ParticlesAttr,
    StringAttr,
};
pub use table::{AttributeTable, DenseTable};
