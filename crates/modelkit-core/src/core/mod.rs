//! # Core Module
//!
//! Stateless building blocks shared by every consumer of the particle model.
//!
//! ## Architecture
//!
//! - **Keys** ([`keys`]) - Process-wide interning of attribute names into dense per-kind indices
//! - **Attributes** ([`attributes`]) - The value kinds and the sparse-to-dense attribute table
//! - **Models** ([`models`]) - Particle identities, the particle arena and derivative buffers
//! - **Graphs** ([`graph`]) - Edge arena with per-node adjacency, keyed by an interned graph identity
//! - **Decorators** ([`decorators`]) - Typed views that enforce attribute-set invariants
//! - **Errors** ([`error`]) - The error type and its usage/range/value/internal classification
//!
//! Nothing in this module owns score states or restraints; see [`crate::engine`].

pub mod attributes;
pub mod decorators;
pub mod error;
pub mod graph;
pub mod keys;
pub mod models;
