//! # Modelkit Core Library
//!
//! The data kernel of a structural-biology modeling toolkit: a type-erased,
//! per-particle attribute store, the decorators that give it typed meaning, and
//! a scoring model that keeps derived attributes consistent while restraints
//! are evaluated.
//!
//! ## Architectural Philosophy
//!
//! The library is split into two layers.
//!
//! - **[`core`]: The Foundation.** Interned attribute keys, dense per-particle
//!   attribute tables, the generational particle arena (`ParticleStore`), graph
//!   storage, and decorators (`Xyz`, `Xyzr`, `Bonded`, `Hierarchy`, `RigidBody`).
//!   Nothing in this layer knows about evaluation order.
//!
//! - **[`engine`]: The Evaluation Core.** The `Model` owns the particle arena together
//!   with its score states and restraints, orders score states by their declared
//!   inputs and outputs, and drives the before-evaluate / score / after-evaluate
//!   protocol with a scoped `DerivativeAccumulator`.
//!
//! ```ignore
//! use modelkit::core::decorators::{Decorator, Xyz};
//! use modelkit::engine::model::Model;
//! use nalgebra::Vector3;
//!
//! let mut model = Model::new("example");
//! let p = model.add_particle("p0");
//! Xyz::setup_particle(model.particles_mut(), p, Vector3::new(1.0, 2.0, 3.0))?;
//! let xyz = Xyz::decorate(model.particles(), p)?;
//! assert_eq!(xyz.coordinates(), Vector3::new(1.0, 2.0, 3.0));
//! ```

pub mod core;
pub mod engine;
