//! Built-in restraints.

mod bond;
mod distance;
mod soft_sphere;

pub use bond::BondRestraint;
pub use distance::DistanceRestraint;
pub use soft_sphere::SoftSphereRestraint;

use crate::core::decorators::Xyz;
use crate::core::models::derivatives::DerivativeAccumulator;
use crate::core::models::store::ParticleStore;
use crate::engine::error::EngineError;

/// `0.5 * k * (x - mean)^2` and its derivative with respect to `x`.
pub(crate) fn harmonic(x: f64, mean: f64, k: f64) -> (f64, f64) {
    let diff = x - mean;
    (0.5 * k * diff * diff, k * diff)
}

/// Spreads `d score / d distance` onto the coordinates of the two endpoints.
/// Coincident points get no contribution since the direction is undefined.
pub(crate) fn add_distance_derivative(
    a: &Xyz<&ParticleStore>,
    b: &Xyz<&ParticleStore>,
    d_score: f64,
    da: &mut DerivativeAccumulator<'_>,
) -> Result<(), EngineError> {
    let delta = a.coordinates() - b.coordinates();
    let distance = delta.norm();
    if distance <= f64::EPSILON {
        return Ok(());
    }
    let gradient = delta * (d_score / distance);
    a.add_to_derivatives(&gradient, da)?;
    b.add_to_derivatives(&(-gradient), da)?;
    Ok(())
}
