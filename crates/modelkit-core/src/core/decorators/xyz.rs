use super::{Decorator, ensure_absent, impl_decorator, required};
use crate::core::error::ModelError;
use crate::core::keys::FloatKey;
use crate::core::models::derivatives::DerivativeAccumulator;
use crate::core::models::ids::ParticleIndex;
use crate::core::models::store::ParticleStore;
use nalgebra::Vector3;
use std::ops::{Deref, DerefMut};
use std::sync::OnceLock;

/// One of the three Cartesian axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// The float attribute holding this coordinate.
    pub fn key(self) -> FloatKey {
        Xyz::coordinate_keys()[self as usize]
    }
}

/// A particle with Cartesian coordinates stored in the float attributes `x`, `y`, `z`.
pub struct Xyz<P> {
    store: P,
    index: ParticleIndex,
}

fn is_xyz(store: &ParticleStore, index: ParticleIndex) -> bool {
    let keys = Xyz::coordinate_keys();
    keys.iter().all(|key| store.has_attribute(index, *key))
}

impl_decorator!(Xyz, "Xyz", "float attributes x, y, z", is_xyz);

fn finite(operation: &'static str, coordinates: &Vector3<f64>) -> Result<(), ModelError> {
    if coordinates.iter().all(|c| c.is_finite()) {
        Ok(())
    } else {
        Err(ModelError::invalid(
            operation,
            format!("coordinates must be finite, got {:?}", coordinates.as_slice()),
        ))
    }
}

impl<'a> Xyz<&'a ParticleStore> {
    pub fn coordinate_keys() -> [FloatKey; 3] {
        static KEYS: OnceLock<[FloatKey; 3]> = OnceLock::new();
        *KEYS.get_or_init(|| [FloatKey::new("x"), FloatKey::new("y"), FloatKey::new("z")])
    }
}

impl<'a> Xyz<&'a mut ParticleStore> {
    /// Adds `x`, `y`, `z` (not optimized) to a particle.
    ///
    /// # Errors
    ///
    /// `AlreadyDecorated` if the particle already is an `Xyz`, `AttributeExists`
    /// if some but not all coordinate keys are present, `InvalidValue` for
    /// non-finite coordinates.
    pub fn setup_particle(
        store: &'a mut ParticleStore,
        index: ParticleIndex,
        coordinates: Vector3<f64>,
    ) -> Result<Self, ModelError> {
        let keys = Xyz::coordinate_keys();
        ensure_absent(store, index, "Xyz", is_xyz(store, index), &keys)?;
        finite("Xyz::setup_particle", &coordinates)?;
        for (key, value) in keys.iter().zip(coordinates.iter()) {
            store.add_float_attribute(index, *key, *value, false)?;
        }
        Ok(Self { store, index })
    }
}

impl<P: Deref<Target = ParticleStore>> Xyz<P> {
    /// The coordinate along `axis`.
    pub fn coordinate(&self, axis: Axis) -> f64 {
        required(self.store.get_value(self.index, axis.key()))
    }

    pub fn x(&self) -> f64 {
        self.coordinate(Axis::X)
    }

    pub fn y(&self) -> f64 {
        self.coordinate(Axis::Y)
    }

    pub fn z(&self) -> f64 {
        self.coordinate(Axis::Z)
    }

    /// The position as a vector.
    pub fn coordinates(&self) -> Vector3<f64> {
        Vector3::new(self.x(), self.y(), self.z())
    }

    pub fn coordinates_are_optimized(&self) -> bool {
        Xyz::coordinate_keys()
            .iter()
            .all(|key| required(self.store.get_is_optimized(self.index, *key)))
    }

    /// The coordinate derivatives from the last derivative-computing evaluation.
    ///
    /// # Errors
    ///
    /// Returns `DerivativesCheckedOut` if called during an evaluation pass.
    pub fn derivatives(&self) -> Result<Vector3<f64>, ModelError> {
        let [x, y, z] = Xyz::coordinate_keys();
        Ok(Vector3::new(
            self.store.get_derivative(self.index, x)?,
            self.store.get_derivative(self.index, y)?,
            self.store.get_derivative(self.index, z)?,
        ))
    }

    /// Adds `derivative` (scaled by the accumulator weight) to the coordinate derivatives.
    pub fn add_to_derivatives(&self, derivative: &Vector3<f64>, da: &mut DerivativeAccumulator) -> Result<(), ModelError> {
        for (key, value) in Xyz::coordinate_keys().iter().zip(derivative.iter()) {
            da.add_to_derivative(self.index, *key, *value)?;
        }
        Ok(())
    }

    /// Euclidean distance between the two centers.
    pub fn distance_to<Q: Deref<Target = ParticleStore>>(&self, other: &Xyz<Q>) -> f64 {
        (self.coordinates() - other.coordinates()).norm()
    }
}

impl<P: DerefMut<Target = ParticleStore>> Xyz<P> {
    pub fn set_coordinate(&mut self, axis: Axis, value: f64) {
        required(self.store.set_value(self.index, axis.key(), value));
    }

    pub fn set_x(&mut self, value: f64) {
        self.set_coordinate(Axis::X, value);
    }

    pub fn set_y(&mut self, value: f64) {
        self.set_coordinate(Axis::Y, value);
    }

    pub fn set_z(&mut self, value: f64) {
        self.set_coordinate(Axis::Z, value);
    }

    pub fn set_coordinates(&mut self, coordinates: Vector3<f64>) {
        for (axis, value) in Axis::ALL.into_iter().zip(coordinates.iter()) {
            self.set_coordinate(axis, *value);
        }
    }

    /// Marks all three coordinates as optimized or fixed.
    pub fn set_coordinates_are_optimized(&mut self, optimized: bool) {
        for key in Xyz::coordinate_keys() {
            required(self.store.set_is_optimized(self.index, key, optimized));
        }
    }
}

/// Euclidean distance between two coordinate particles.
pub fn distance<P, Q>(a: &Xyz<P>, b: &Xyz<Q>) -> f64
where
    P: Deref<Target = ParticleStore>,
    Q: Deref<Target = ParticleStore>,
{
    a.distance_to(b)
}

/// An `Xyz` particle with a radius stored in the float attribute `radius`.
pub struct Xyzr<P> {
    store: P,
    index: ParticleIndex,
}

fn is_xyzr(store: &ParticleStore, index: ParticleIndex) -> bool {
    is_xyz(store, index) && store.has_attribute(index, Xyzr::radius_key())
}

impl_decorator!(Xyzr, "Xyzr", "float attributes x, y, z, radius", is_xyzr);

fn check_radius(radius: f64) -> Result<(), ModelError> {
    if radius.is_finite() && radius >= 0.0 {
        Ok(())
    } else {
        Err(ModelError::invalid(
            "Xyzr::setup_particle",
            format!("radius must be finite and non-negative, got {radius}"),
        ))
    }
}

impl<'a> Xyzr<&'a ParticleStore> {
    /// The key holding the radius.
    pub fn radius_key() -> FloatKey {
        static KEY: OnceLock<FloatKey> = OnceLock::new();
        *KEY.get_or_init(|| FloatKey::new("radius"))
    }
}

impl<'a> Xyzr<&'a mut ParticleStore> {
    /// Sets up a fresh particle as both `Xyz` and `Xyzr`.
    pub fn setup_particle(
        store: &'a mut ParticleStore,
        index: ParticleIndex,
        center: Vector3<f64>,
        radius: f64,
    ) -> Result<Self, ModelError> {
        ensure_absent(store, index, "Xyzr", is_xyzr(store, index), &[Xyzr::radius_key()])?;
        check_radius(radius)?;
        Xyz::setup_particle(&mut *store, index, center)?;
        store.add_float_attribute(index, Xyzr::radius_key(), radius, false)?;
        Ok(Self { store, index })
    }

    /// Adds a radius to a particle that already is an `Xyz`.
    pub fn setup_from_xyz(store: &'a mut ParticleStore, index: ParticleIndex, radius: f64) -> Result<Self, ModelError> {
        Xyz::decorate(&*store, index)?;
        ensure_absent(store, index, "Xyzr", is_xyzr(store, index), &[Xyzr::radius_key()])?;
        check_radius(radius)?;
        store.add_float_attribute(index, Xyzr::radius_key(), radius, false)?;
        Ok(Self { store, index })
    }
}

impl<P: Deref<Target = ParticleStore>> Xyzr<P> {
    pub fn radius(&self) -> f64 {
        required(self.store.get_value(self.index, Xyzr::radius_key()))
    }

    pub fn coordinates(&self) -> Vector3<f64> {
        self.as_xyz().coordinates()
    }

    pub fn as_xyz(&self) -> Xyz<&ParticleStore> {
        Xyz::decorate_unchecked(&*self.store, self.index)
    }
}

impl<P: DerefMut<Target = ParticleStore>> Xyzr<P> {
    /// Sets the radius. It must be finite and non-negative.
    pub fn set_radius(&mut self, radius: f64) -> Result<(), ModelError> {
        check_radius(radius)?;
        required(self.store.set_value(self.index, Xyzr::radius_key(), radius));
        Ok(())
    }

    pub fn as_xyz_mut(&mut self) -> Xyz<&mut ParticleStore> {
        Xyz::decorate_unchecked(&mut *self.store, self.index)
    }
}

/// Distance between two spheres' surfaces; negative when they overlap.
pub fn sphere_distance<P, Q>(a: &Xyzr<P>, b: &Xyzr<Q>) -> f64
where
    P: Deref<Target = ParticleStore>,
    Q: Deref<Target = ParticleStore>,
{
    (a.coordinates() - b.coordinates()).norm() - a.radius() - b.radius()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    mod xyz {
        use super::*;

        #[test]
        fn is_not_setup_before_and_is_setup_after() {
            let mut store = ParticleStore::new();
            let p = store.add_particle("p");
            assert!(!Xyz::get_is_setup(&store, p));
            Xyz::setup_particle(&mut store, p, Vector3::new(0.0, 0.0, 0.0)).unwrap();
            assert!(Xyz::get_is_setup(&store, p));
        }

        #[test]
        fn coordinates_round_trip_and_double_setup_fails() {
            let mut store = ParticleStore::new();
            let p = store.add_particle("P");
            Xyz::setup_particle(&mut store, p, Vector3::new(1.0, 2.0, 3.0)).unwrap();
            assert_eq!(Xyz::decorate(&store, p).unwrap().coordinates(), Vector3::new(1.0, 2.0, 3.0));

            Xyz::decorate(&mut store, p)
                .unwrap()
                .set_coordinates(Vector3::new(4.0, 5.0, 6.0));
            assert_eq!(Xyz::decorate(&store, p).unwrap().coordinates(), Vector3::new(4.0, 5.0, 6.0));

            let err = Xyz::setup_particle(&mut store, p, Vector3::new(7.0, 8.0, 9.0)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Usage);
            assert!(matches!(err, ModelError::AlreadyDecorated { .. }));
            assert_eq!(Xyz::decorate(&store, p).unwrap().coordinates(), Vector3::new(4.0, 5.0, 6.0));
        }

        #[test]
        fn single_axes_read_and_write_their_own_key() {
            let mut store = ParticleStore::new();
            let p = store.add_particle("p");
            Xyz::setup_particle(&mut store, p, Vector3::new(1.0, 2.0, 3.0)).unwrap();
            let mut xyz = Xyz::decorate(&mut store, p).unwrap();
            xyz.set_coordinate(Axis::Y, -5.0);
            assert_eq!(xyz.coordinate(Axis::Y), -5.0);
            assert_eq!(xyz.coordinates(), Vector3::new(1.0, -5.0, 3.0));
            assert_eq!(Axis::ALL.map(|axis| axis.key().name()), ["x", "y", "z"]);
        }

        #[test]
        fn partial_keys_block_setup_without_mutation() {
            let mut store = ParticleStore::new();
            let p = store.add_particle("p");
            let [x, y, _] = Xyz::coordinate_keys();
            store.add_float_attribute(p, y, 9.0, false).unwrap();
            let err = Xyz::setup_particle(&mut store, p, Vector3::zeros()).unwrap_err();
            assert!(matches!(err, ModelError::AttributeExists { key: "y", .. }));
            assert!(!store.has_attribute(p, x));
            assert_eq!(store.get_value(p, y).unwrap(), 9.0);
        }

        #[test]
        fn decorating_a_plain_particle_fails_and_try_decorate_is_none() {
            let mut store = ParticleStore::new();
            let p = store.add_particle("plain");
            let err = Xyz::decorate(&store, p).unwrap_err();
            assert!(matches!(err, ModelError::NotDecorated { decorator: "Xyz", .. }));
            assert!(Xyz::try_decorate(&store, p).is_none());
        }

        #[test]
        fn non_finite_coordinates_are_a_value_error() {
            let mut store = ParticleStore::new();
            let p = store.add_particle("p");
            let err = Xyz::setup_particle(&mut store, p, Vector3::new(f64::NAN, 0.0, 0.0)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Value);
            assert!(!Xyz::get_is_setup(&store, p));
        }

        #[test]
        fn optimized_flag_covers_all_three_coordinates() {
            let mut store = ParticleStore::new();
            let p = store.add_particle("p");
            let mut xyz = Xyz::setup_particle(&mut store, p, Vector3::zeros()).unwrap();
            assert!(!xyz.coordinates_are_optimized());
            xyz.set_coordinates_are_optimized(true);
            assert!(xyz.coordinates_are_optimized());
            assert_eq!(store.particle(p).unwrap().optimized_float_keys().count(), 3);
        }

        #[test]
        fn distance_between_two_particles() {
            let mut store = ParticleStore::new();
            let a = store.add_particle("a");
            let b = store.add_particle("b");
            Xyz::setup_particle(&mut store, a, Vector3::new(0.0, 0.0, 0.0)).unwrap();
            Xyz::setup_particle(&mut store, b, Vector3::new(3.0, 4.0, 0.0)).unwrap();
            let (xa, xb) = (Xyz::decorate(&store, a).unwrap(), Xyz::decorate(&store, b).unwrap());
            assert!((distance(&xa, &xb) - 5.0).abs() < 1e-12);
        }
    }

    mod xyzr {
        use super::*;

        #[test]
        fn setup_composes_xyz() {
            let mut store = ParticleStore::new();
            let p = store.add_particle("sphere");
            Xyzr::setup_particle(&mut store, p, Vector3::new(1.0, 0.0, 0.0), 2.5).unwrap();
            assert!(Xyz::get_is_setup(&store, p));
            let sphere = Xyzr::decorate(&store, p).unwrap();
            assert_eq!(sphere.radius(), 2.5);
            assert_eq!(sphere.as_xyz().x(), 1.0);
        }

        #[test]
        fn negative_radius_is_a_value_error_without_mutation() {
            let mut store = ParticleStore::new();
            let p = store.add_particle("p");
            let err = Xyzr::setup_particle(&mut store, p, Vector3::zeros(), -1.0).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Value);
            assert!(!Xyz::get_is_setup(&store, p));
        }

        #[test]
        fn setup_from_xyz_requires_xyz() {
            let mut store = ParticleStore::new();
            let p = store.add_particle("p");
            assert!(Xyzr::setup_from_xyz(&mut store, p, 1.0).is_err());
            Xyz::setup_particle(&mut store, p, Vector3::zeros()).unwrap();
            Xyzr::setup_from_xyz(&mut store, p, 1.0).unwrap();
            assert!(Xyzr::get_is_setup(&store, p));
        }

        #[test]
        fn sphere_distance_is_negative_on_overlap() {
            let mut store = ParticleStore::new();
            let a = store.add_particle("a");
            let b = store.add_particle("b");
            Xyzr::setup_particle(&mut store, a, Vector3::zeros(), 1.0).unwrap();
            Xyzr::setup_particle(&mut store, b, Vector3::new(1.5, 0.0, 0.0), 1.0).unwrap();
            let (sa, sb) = (Xyzr::decorate(&store, a).unwrap(), Xyzr::decorate(&store, b).unwrap());
            assert!((sphere_distance(&sa, &sb) + 0.5).abs() < 1e-12);
        }
    }
}
