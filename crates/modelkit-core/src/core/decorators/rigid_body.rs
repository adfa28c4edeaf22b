use super::{Decorator, Xyz, ensure_absent, impl_decorator, required};
use crate::core::error::{ModelError, describe};
use crate::core::keys::{FloatKey, ParticleKey, ParticlesKey};
use crate::core::models::derivatives::DerivativeAccumulator;
use crate::core::models::ids::ParticleIndex;
use crate::core::models::store::ParticleStore;
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use std::ops::{Deref, DerefMut};
use std::sync::OnceLock;

struct RigidKeys {
    quaternion: [FloatKey; 4],
    torque: [FloatKey; 3],
    members: ParticlesKey,
    local: [FloatKey; 3],
    body: ParticleKey,
}

fn rigid_keys() -> &'static RigidKeys {
    static KEYS: OnceLock<RigidKeys> = OnceLock::new();
    KEYS.get_or_init(|| RigidKeys {
        quaternion: ["rigid body q0", "rigid body q1", "rigid body q2", "rigid body q3"].map(FloatKey::new),
        torque: ["rigid body torque x", "rigid body torque y", "rigid body torque z"].map(FloatKey::new),
        members: ParticlesKey::new("rigid body members"),
        local: ["rigid member local x", "rigid member local y", "rigid member local z"].map(FloatKey::new),
        body: ParticleKey::new("rigid member body"),
    })
}

/// A rigid collection of `Xyz` members moved by one reference frame.
///
/// The body itself is an `Xyz` (the frame origin) with a unit quaternion
/// orientation. Members store their coordinates in the body frame; their
/// global coordinates are derived and refreshed by [`RigidBody::update_members`].
///
/// Torque is accumulated in the derivative slots of three auxiliary float
/// attributes whose values are unused.
pub struct RigidBody<P> {
    store: P,
    index: ParticleIndex,
}

fn is_rigid_body(store: &ParticleStore, index: ParticleIndex) -> bool {
    let keys = rigid_keys();
    Xyz::get_is_setup(store, index)
        && keys.quaternion.iter().all(|k| store.has_attribute(index, *k))
        && keys.torque.iter().all(|k| store.has_attribute(index, *k))
        && store.has_attribute(index, keys.members)
}

impl_decorator!(
    RigidBody,
    "RigidBody",
    "Xyz, quaternion, torque and member attributes",
    is_rigid_body
);

fn centroid(store: &ParticleStore, members: &[ParticleIndex]) -> Result<Vector3<f64>, ModelError> {
    let mut sum = Vector3::<f64>::zeros();
    for member in members {
        sum += Xyz::decorate(store, *member)?.coordinates();
    }
    Ok(sum / members.len() as f64)
}

impl<'a> RigidBody<&'a mut ParticleStore> {
    /// Turns `index` into a rigid body over `members`, placing the frame origin
    /// at the members' centroid with identity orientation.
    ///
    /// # Errors
    ///
    /// `InvalidValue` for an empty member list, duplicates, or a member equal
    /// to the body; `NotDecorated` if a member is not an `Xyz`;
    /// `AlreadyDecorated`/`AttributeExists` if the body or a member already
    /// carries rigid-body attributes. Nothing is modified on error.
    pub fn setup_particle(
        store: &'a mut ParticleStore,
        index: ParticleIndex,
        members: &[ParticleIndex],
    ) -> Result<Self, ModelError> {
        let keys = rigid_keys();
        if members.is_empty() {
            return Err(ModelError::invalid("RigidBody::setup_particle", "a rigid body needs members"));
        }
        let name = describe(store.particle(index)?.name(), index);
        for (i, member) in members.iter().enumerate() {
            if *member == index || members[..i].contains(member) {
                return Err(ModelError::invalid(
                    "RigidBody::setup_particle",
                    format!("member {:?} of {} is repeated or is the body itself", member, name),
                ));
            }
            ensure_absent(store, *member, "RigidMember", RigidMember::get_is_setup(store, *member), &keys.local)?;
        }
        ensure_absent(store, index, "RigidBody", is_rigid_body(store, index), &Xyz::coordinate_keys())?;
        ensure_absent(store, index, "RigidBody", false, &keys.quaternion)?;
        ensure_absent(store, index, "RigidBody", false, &keys.torque)?;
        ensure_absent(store, index, "RigidBody", false, &[keys.members])?;

        let origin = centroid(store, members)?;
        let globals: Vec<Vector3<f64>> = members
            .iter()
            .map(|m| Xyz::decorate(&*store, *m).map(|xyz| xyz.coordinates()))
            .collect::<Result<_, _>>()?;

        Xyz::setup_particle(&mut *store, index, origin)?;
        let identity = UnitQuaternion::<f64>::identity();
        for (key, value) in keys.quaternion.iter().zip(quaternion_components(&identity)) {
            store.add_float_attribute(index, *key, value, false)?;
        }
        for key in keys.torque {
            store.add_float_attribute(index, key, 0.0, false)?;
        }
        store.add_attribute(index, keys.members, members.to_vec())?;
        for (member, global) in members.iter().zip(globals) {
            let local = global - origin;
            for (key, value) in keys.local.iter().zip(local.iter()) {
                store.add_float_attribute(*member, *key, *value, false)?;
            }
            store.add_attribute(*member, keys.body, index)?;
        }
        Ok(Self { store, index })
    }
}

fn quaternion_components(q: &UnitQuaternion<f64>) -> [f64; 4] {
    [q.w, q.i, q.j, q.k]
}

impl<P: Deref<Target = ParticleStore>> RigidBody<P> {
    pub fn as_xyz(&self) -> Xyz<&ParticleStore> {
        Xyz::decorate_unchecked(&*self.store, self.index)
    }

    pub fn coordinates(&self) -> Vector3<f64> {
        self.as_xyz().coordinates()
    }

    /// Rotation taking member local coordinates to the global frame.
    pub fn orientation(&self) -> UnitQuaternion<f64> {
        let [w, i, j, k] = rigid_keys()
            .quaternion
            .map(|key| required(self.store.get_value(self.index, key)));
        UnitQuaternion::from_quaternion(Quaternion::new(w, i, j, k))
    }

    /// The member particles, in the order they were added.
    pub fn members(&self) -> &[ParticleIndex] {
        required(self.store.value_ref(self.index, rigid_keys().members).map(Vec::as_slice))
    }

    /// Maps a body-frame vector to global coordinates.
    pub fn to_global(&self, local: &Vector3<f64>) -> Vector3<f64> {
        self.orientation() * local + self.coordinates()
    }

    /// Where `member` should be given the current frame.
    pub fn member_position(&self, member: ParticleIndex) -> Result<Vector3<f64>, ModelError> {
        let local = RigidMember::decorate(&*self.store, member)?.local_coordinates();
        Ok(self.to_global(&local))
    }

    pub fn torque(&self) -> Result<Vector3<f64>, ModelError> {
        let [x, y, z] = rigid_keys().torque;
        Ok(Vector3::new(
            self.store.get_derivative(self.index, x)?,
            self.store.get_derivative(self.index, y)?,
            self.store.get_derivative(self.index, z)?,
        ))
    }

    pub fn add_to_torque(&self, torque: &Vector3<f64>, da: &mut DerivativeAccumulator) -> Result<(), ModelError> {
        for (key, value) in rigid_keys().torque.iter().zip(torque.iter()) {
            da.add_to_derivative(self.index, *key, *value)?;
        }
        Ok(())
    }
}

impl<P: DerefMut<Target = ParticleStore>> RigidBody<P> {
    pub fn as_xyz_mut(&mut self) -> Xyz<&mut ParticleStore> {
        Xyz::decorate_unchecked(&mut *self.store, self.index)
    }

    pub fn set_coordinates(&mut self, origin: Vector3<f64>) {
        self.as_xyz_mut().set_coordinates(origin);
    }

    /// Sets the orientation. Members move on the next score-state update.
    pub fn set_orientation(&mut self, orientation: UnitQuaternion<f64>) {
        for (key, value) in rigid_keys().quaternion.iter().zip(quaternion_components(&orientation)) {
            required(self.store.set_value(self.index, *key, value));
        }
    }

    /// Rewrites every live member's global coordinates from the body frame.
    /// Returns the number of members placed.
    pub fn update_members(&mut self) -> Result<usize, ModelError> {
        let placements: Vec<(ParticleIndex, Vector3<f64>)> = self
            .members()
            .iter()
            .filter(|m| self.store.contains(**m))
            .map(|m| self.member_position(*m).map(|position| (*m, position)))
            .collect::<Result<_, _>>()?;
        for (member, position) in &placements {
            Xyz::decorate(&mut *self.store, *member)?.set_coordinates(*position);
        }
        Ok(placements.len())
    }
}

/// A particle whose global coordinates are driven by a [`RigidBody`].
pub struct RigidMember<P> {
    store: P,
    index: ParticleIndex,
}

fn is_rigid_member(store: &ParticleStore, index: ParticleIndex) -> bool {
    let keys = rigid_keys();
    Xyz::get_is_setup(store, index)
        && keys.local.iter().all(|k| store.has_attribute(index, *k))
        && store.has_attribute(index, keys.body)
}

impl_decorator!(
    RigidMember,
    "RigidMember",
    "Xyz, body-frame coordinates and a body reference",
    is_rigid_member
);

impl<P: Deref<Target = ParticleStore>> RigidMember<P> {
    /// The rigid body this particle belongs to.
    pub fn body(&self) -> ParticleIndex {
        required(self.store.get_value(self.index, rigid_keys().body))
    }

    /// Position in the body's frame.
    pub fn local_coordinates(&self) -> Vector3<f64> {
        let [x, y, z] = rigid_keys()
            .local
            .map(|key| required(self.store.get_value(self.index, key)));
        Vector3::new(x, y, z)
    }
}

impl<P: DerefMut<Target = ParticleStore>> RigidMember<P> {
    pub fn set_local_coordinates(&mut self, local: Vector3<f64>) {
        for (key, value) in rigid_keys().local.iter().zip(local.iter()) {
            required(self.store.set_value(self.index, *key, *value));
        }
    }
}
