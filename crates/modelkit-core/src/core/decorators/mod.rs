//! Typed views over particles.
//!
//! A decorator is a borrowed view `D<P>` where `P` is `&ParticleStore` or
//! `&mut ParticleStore`. Constructing one through [`Decorator::decorate`]
//! checks that the particle carries every attribute the decorator needs; while
//! the view exists the borrow keeps anyone else from removing them, so its
//! getters are infallible. Mutators are only available when `P: DerefMut`.
//!
//! Every decorator also offers, as inherent associated functions,
//! `get_is_setup(&store, index)` and `setup_particle(&mut store, index, ...)`.
//! Setup refuses particles that are already decorated and checks every key it
//! is about to add before adding any, so a failed setup leaves the particle
//! unchanged.

mod bonds;
mod hierarchy;
mod rigid_body;
mod xyz;

pub use bonds::{Bond, BondType, Bonded, ParseBondTypeError, bond, get_bond, unbond};
pub use hierarchy::Hierarchy;
pub use rigid_body::{RigidBody, RigidMember};
pub use xyz::{Axis, Xyz, Xyzr, distance, sphere_distance};

use super::attributes::AttributeKind;
use super::error::{ModelError, describe};
use super::keys::Key;
use super::models::ids::ParticleIndex;
use super::models::store::ParticleStore;
use std::ops::Deref;

pub trait Decorator<P: Deref<Target = ParticleStore>>: Sized {
    /// Short name used in error messages.
    const NAME: &'static str;
    /// Human-readable list of the attributes the invariant requires.
    const REQUIRES: &'static str;

    fn is_setup_in(store: &ParticleStore, index: ParticleIndex) -> bool;

    /// Builds the view without any check.
    fn wrap(store: P, index: ParticleIndex) -> Self;

    fn particle_index(&self) -> ParticleIndex;

    /// Checked cast: fails unless the particle is live and satisfies the invariant.
    fn decorate(store: P, index: ParticleIndex) -> Result<Self, ModelError> {
        let particle = store.particle(index)?;
        if !Self::is_setup_in(&store, index) {
            return Err(ModelError::NotDecorated {
                particle: describe(particle.name(), index),
                decorator: Self::NAME,
                missing: Self::REQUIRES.to_string(),
            });
        }
        Ok(Self::wrap(store, index))
    }

    fn try_decorate(store: P, index: ParticleIndex) -> Option<Self> {
        if store.contains(index) && Self::is_setup_in(&store, index) {
            Some(Self::wrap(store, index))
        } else {
            None
        }
    }

    /// Zero-cost cast. The invariant is only asserted in debug builds; a view
    /// over a particle that does not satisfy it panics on first access.
    fn decorate_unchecked(store: P, index: ParticleIndex) -> Self {
        debug_assert!(
            Self::is_setup_in(&store, index),
            "particle {:?} is not a valid {}",
            index,
            Self::NAME
        );
        Self::wrap(store, index)
    }
}

/// Unwraps a value the decorator invariant guarantees to exist.
///
/// A failure here means the invariant was broken behind the view's back, which
/// is an internal error and therefore fatal.
#[track_caller]
pub(crate) fn required<T>(result: Result<T, ModelError>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("decorator invariant violated: {err}"),
    }
}

/// Fails with `AlreadyDecorated` if `is_setup`, otherwise with `AttributeExists`
/// for the first of `keys` already present on the particle.
pub(crate) fn ensure_absent<T: AttributeKind>(
    store: &ParticleStore,
    index: ParticleIndex,
    decorator: &'static str,
    is_setup: bool,
    keys: &[Key<T>],
) -> Result<(), ModelError> {
    let particle = store.particle(index)?;
    if is_setup {
        return Err(ModelError::AlreadyDecorated {
            particle: describe(particle.name(), index),
            decorator,
        });
    }
    match keys.iter().find(|key| particle.has_attribute(**key)) {
        Some(key) => Err(ModelError::AttributeExists {
            particle: describe(particle.name(), index),
            key: key.name(),
            kind: T::KIND,
        }),
        None => Ok(()),
    }
}

/// Implements [`Decorator`] plus the common `index`/`store` accessors and the
/// inherent `get_is_setup` for a view struct with `store` and `index` fields.
macro_rules! impl_decorator {
    ($ty:ident, $name:literal, $requires:literal, $is_setup:path) => {
        impl<P: std::ops::Deref<Target = $crate::core::models::store::ParticleStore>>
            $crate::core::decorators::Decorator<P> for $ty<P>
        {
            const NAME: &'static str = $name;
            const REQUIRES: &'static str = $requires;

            fn is_setup_in(
                store: &$crate::core::models::store::ParticleStore,
                index: $crate::core::models::ids::ParticleIndex,
            ) -> bool {
                $is_setup(store, index)
            }

            fn wrap(store: P, index: $crate::core::models::ids::ParticleIndex) -> Self {
                Self { store, index }
            }

            fn particle_index(&self) -> $crate::core::models::ids::ParticleIndex {
                self.index
            }
        }

        impl<'a> $ty<&'a $crate::core::models::store::ParticleStore> {
            pub fn get_is_setup(
                store: &$crate::core::models::store::ParticleStore,
                index: $crate::core::models::ids::ParticleIndex,
            ) -> bool {
                store.contains(index) && $is_setup(store, index)
            }
        }

        impl<P: std::ops::Deref<Target = $crate::core::models::store::ParticleStore>> $ty<P> {
            pub fn index(&self) -> $crate::core::models::ids::ParticleIndex {
                self.index
            }

            pub fn store(&self) -> &$crate::core::models::store::ParticleStore {
                &self.store
            }

            pub fn name(&self) -> &str {
                $crate::core::decorators::required(self.store.particle(self.index)).name()
            }
        }

        impl<P: std::ops::Deref<Target = $crate::core::models::store::ParticleStore>> std::fmt::Debug
            for $ty<P>
        {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_tuple($name).field(&self.index).finish()
            }
        }
    };
}

pub(crate) use impl_decorator;
