use crate::core::decorators::{Decorator, RigidBody, RigidMember, Xyz};
use crate::core::models::derivatives::DerivativeAccumulator;
use crate::core::models::ids::ParticleIndex;
use crate::core::models::store::ParticleStore;
use crate::engine::error::EngineError;
use crate::engine::score_state::ScoreState;
use nalgebra::Vector3;

/// Keeps rigid-body members in place and folds their derivatives back.
///
/// Before scoring, every member's global coordinates are recomputed from its
/// body's frame. After scoring, the coordinate derivatives of the members are
/// summed into the body's translational derivatives and into its torque
/// `sum(R * local x d)`.
#[derive(Debug, Clone)]
pub struct RigidBodyState {
    name: String,
    bodies: Vec<ParticleIndex>,
}

impl RigidBodyState {
    /// Creates a state moving the members of every body in `bodies`.
    pub fn new(name: impl Into<String>, bodies: Vec<ParticleIndex>) -> Self {
        Self {
            name: name.into(),
            bodies,
        }
    }

    pub fn bodies(&self) -> &[ParticleIndex] {
        &self.bodies
    }

    fn live_members(&self, particles: &ParticleStore) -> Vec<ParticleIndex> {
        self.bodies
            .iter()
            .filter_map(|body| RigidBody::try_decorate(particles, *body))
            .flat_map(|body| body.members().to_vec())
            .filter(|member| particles.contains(*member))
            .collect()
    }
}

impl ScoreState for RigidBodyState {
    fn name(&self) -> &str {
        &self.name
    }

    fn before_evaluate(&mut self, particles: &mut ParticleStore) -> Result<(), EngineError> {
        for body in &self.bodies {
            RigidBody::decorate(&mut *particles, *body)?.update_members()?;
        }
        Ok(())
    }

    fn after_evaluate(
        &mut self,
        particles: &ParticleStore,
        accumulator: Option<&mut DerivativeAccumulator<'_>>,
    ) -> Result<(), EngineError> {
        let Some(da) = accumulator else {
            return Ok(());
        };
        let [x, y, z] = Xyz::coordinate_keys();
        for body in &self.bodies {
            let body = RigidBody::decorate(particles, *body)?;
            let rotation = body.orientation();
            let mut force = Vector3::<f64>::zeros();
            let mut torque = Vector3::<f64>::zeros();
            for member in body.members().iter().filter(|m| particles.contains(**m)) {
                let derivative = Vector3::new(
                    da.derivative(*member, x)?,
                    da.derivative(*member, y)?,
                    da.derivative(*member, z)?,
                );
                let arm = rotation * RigidMember::decorate(particles, *member)?.local_coordinates();
                force += derivative;
                torque += arm.cross(&derivative);
            }
            body.as_xyz().add_to_derivatives(&force, da)?;
            body.add_to_torque(&torque, da)?;
        }
        Ok(())
    }

    /// The bodies, plus the members whose local coordinates are read.
    fn inputs(&self, particles: &ParticleStore) -> Vec<ParticleIndex> {
        let mut inputs = self.bodies.clone();
        inputs.extend(self.live_members(particles));
        inputs
    }

    fn outputs(&self, particles: &ParticleStore) -> Vec<ParticleIndex> {
        self.live_members(particles)
    }
}
