use super::config::{CheckLevel, FloatRange, ModelConfig};
use super::dependency::{DependencyGraph, StateInfo};
use super::error::EngineError;
use super::ids::{RestraintId, ScoreStateId};
use super::restraint::Restraint;
use super::score_state::ScoreState;
use super::snapshot::Configuration;
use super::statistics::{Statistics, StatisticsReport};
use crate::core::error::ModelError;
use crate::core::keys::FloatKey;
use crate::core::models::ids::ParticleIndex;
use crate::core::models::particle::Particle;
use crate::core::models::store::ParticleStore;
use slotmap::SlotMap;
use std::collections::BTreeMap;
use tracing::{debug, info};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug)]
pub(super) struct RestraintEntry {
    /// The restraint itself.
    pub restraint: Box<dyn Restraint>,
    /// Factor applied to the restraint's score and derivatives.
    pub weight: f64,
}

/// Owns the particles together with the score states and restraints that
/// evaluate them.
///
/// Score states run in dependency order (see [`DependencyGraph`]); restraints
/// are scored in insertion order. The dependency order is cached and
/// recomputed after any score state, restraint or particle is added or
/// removed, and after a state or restraint is borrowed mutably. Call
/// [`Model::invalidate_dependencies`] if a state changes its inputs or outputs
/// in some other way.
#[derive(Debug)]
pub struct Model {
    pub(super) name: String,
    pub(super) particles: ParticleStore,
    pub(super) score_states: SlotMap<ScoreStateId, Box<dyn ScoreState>>,
    pub(super) state_order: Vec<ScoreStateId>,
    pub(super) restraints: SlotMap<RestraintId, RestraintEntry>,
    pub(super) restraint_order: Vec<RestraintId>,
    pub(super) ranges: BTreeMap<FloatKey, FloatRange>,
    pub(super) dependencies: Option<DependencyGraph>,
    pub(super) statistics: Statistics,
    pub(super) check_level: CheckLevel,
    pub(super) gather_statistics: bool,
    pub(super) maximum_score: Option<f64>,
    pub(super) evaluation_count: u64,
}

impl Model {
    /// Creates an empty model with default settings.
    ///
    /// Checks run at [`CheckLevel::Usage`], statistics are off and there is no
    /// maximum score.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            particles: ParticleStore::new(),
            score_states: SlotMap::with_key(),
            state_order: Vec::new(),
            restraints: SlotMap::with_key(),
            restraint_order: Vec::new(),
            ranges: BTreeMap::new(),
            dependencies: None,
            statistics: Statistics::default(),
            check_level: CheckLevel::default(),
            gather_statistics: false,
            maximum_score: None,
            evaluation_count: 0,
        }
    }

    /// Creates an empty model from a configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Name, check level, statistics flag, maximum score and ranges.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if the maximum score or a range is invalid.
    pub fn from_config(config: &ModelConfig) -> Result<Self, EngineError> {
        let mut model = Self::new(config.name.clone());
        model.check_level = config.check_level;
        model.gather_statistics = config.gather_statistics;
        model.set_maximum_score(config.maximum_score)?;
        for (name, range) in &config.ranges {
            model.set_range(FloatKey::new(name), *range)?;
        }
        info!(model = %model.name, ranges = config.ranges.len(), "Model created from configuration.");
        Ok(model)
    }

    /// The model's current settings as a configuration.
    pub fn to_config(&self) -> ModelConfig {
        ModelConfig {
            name: self.name.clone(),
            check_level: self.check_level,
            gather_statistics: self.gather_statistics,
            maximum_score: self.maximum_score,
            ranges: self
                .ranges
                .iter()
                .map(|(key, range)| (key.name().to_string(), *range))
                .collect(),
        }
    }

    /// The model's name, used in log spans.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The level of optional validation run during evaluation.
    pub fn check_level(&self) -> CheckLevel {
        self.check_level
    }

    /// Sets the level of optional validation run during evaluation.
    pub fn set_check_level(&mut self, level: CheckLevel) {
        self.check_level = level;
    }

    /// The score above which [`Model::evaluate`] stops summing restraints, if any.
    pub fn maximum_score(&self) -> Option<f64> {
        self.maximum_score
    }

    /// Sets the score above which [`Model::evaluate`] stops summing restraints.
    pub fn set_maximum_score(&mut self, maximum: Option<f64>) -> Result<(), EngineError> {
        if let Some(value) = maximum {
            if value.is_nan() {
                return Err(EngineError::invalid("Model::set_maximum_score", "maximum score is NaN"));
            }
        }
        self.maximum_score = maximum;
        Ok(())
    }

    /// Number of completed evaluations since the model was created.
    pub fn evaluation_count(&self) -> u64 {
        self.evaluation_count
    }

    // --- Particles ---

    /// Adds a particle with no attributes.
    ///
    /// # Return
    ///
    /// The index of the new particle. It never equals the index of a live particle.
    pub fn add_particle(&mut self, name: impl Into<String>) -> ParticleIndex {
        self.particles.add_particle(name)
    }

    /// Removes a particle and all of its graph edges.
    ///
    /// Score states that still list the particle as an input fail the next
    /// evaluation with `StaleDependency` unless checks are disabled.
    pub fn remove_particle(&mut self, index: ParticleIndex) -> Result<(), EngineError> {
        self.particles.remove_particle(index)?;
        self.dependencies = None;
        Ok(())
    }

    /// Retrieves a read-only view of a particle.
    ///
    /// # Errors
    ///
    /// Returns `ParticleNotFound` if `index` was removed or never allocated.
    pub fn get_particle(&self, index: ParticleIndex) -> Result<Particle<'_>, ModelError> {
        self.particles.particle(index)
    }

    /// The particle arena.
    pub fn particles(&self) -> &ParticleStore {
        &self.particles
    }

    /// Mutable access to the particle arena, for setup between evaluations.
    pub fn particles_mut(&mut self) -> &mut ParticleStore {
        &mut self.particles
    }

    // --- Score states ---

    /// Registers a score state after all existing ones.
    ///
    /// States without an ordering constraint between them run in insertion order.
    pub fn add_score_state<S: ScoreState>(&mut self, state: S) -> ScoreStateId {
        debug!(state = state.name(), "Adding score state.");
        let id = self.score_states.insert(Box::new(state));
        self.state_order.push(id);
        self.dependencies = None;
        id
    }

    /// Removes a score state and its statistics and returns it.
    ///
    /// # Errors
    ///
    /// Returns `ScoreStateNotFound` if `id` is not registered.
    pub fn remove_score_state(&mut self, id: ScoreStateId) -> Result<Box<dyn ScoreState>, EngineError> {
        let state = self
            .score_states
            .remove(id)
            .ok_or(EngineError::ScoreStateNotFound(id))?;
        self.state_order.retain(|other| *other != id);
        self.statistics.forget_state(id);
        self.dependencies = None;
        Ok(state)
    }

    /// The score state `id`, if it exists and is an `S`.
    pub fn score_state<S: ScoreState>(&self, id: ScoreStateId) -> Option<&S> {
        self.score_states
            .get(id)
            .and_then(|state| (**state).as_any().downcast_ref::<S>())
    }

    /// Mutable access to a score state. Its inputs or outputs may change through
    /// this borrow, so the cached dependency order is dropped.
    pub fn score_state_mut<S: ScoreState>(&mut self, id: ScoreStateId) -> Option<&mut S> {
        self.dependencies = None;
        self.score_states
            .get_mut(id)
            .and_then(|state| (**state).as_any_mut().downcast_mut::<S>())
    }

    /// Score state ids in insertion order.
    pub fn score_state_ids(&self) -> &[ScoreStateId] {
        &self.state_order
    }

    // --- Restraints ---

    /// Registers a restraint with weight `1.0` after all existing ones.
    pub fn add_restraint<R: Restraint>(&mut self, restraint: R) -> RestraintId {
        debug!(restraint = restraint.name(), "Adding restraint.");
        let id = self.restraints.insert(RestraintEntry {
            restraint: Box::new(restraint),
            weight: 1.0,
        });
        self.restraint_order.push(id);
        self.dependencies = None;
        id
    }

    /// Registers a restraint with an explicit weight.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if `weight` is negative or not finite. Nothing is
    /// registered in that case.
    pub fn add_restraint_with_weight<R: Restraint>(&mut self, restraint: R, weight: f64) -> Result<RestraintId, EngineError> {
        check_weight(weight)?;
        let id = self.add_restraint(restraint);
        self.restraints[id].weight = weight;
        Ok(id)
    }

    /// The weight of restraint `id`.
    pub fn restraint_weight(&self, id: RestraintId) -> Result<f64, EngineError> {
        self.restraints
            .get(id)
            .map(|entry| entry.weight)
            .ok_or(EngineError::RestraintNotFound(id))
    }

    /// Changes the weight of restraint `id`. The weight must be finite and non-negative.
    pub fn set_restraint_weight(&mut self, id: RestraintId, weight: f64) -> Result<(), EngineError> {
        check_weight(weight)?;
        let entry = self
            .restraints
            .get_mut(id)
            .ok_or(EngineError::RestraintNotFound(id))?;
        entry.weight = weight;
        Ok(())
    }

    /// Removes a restraint and its statistics and returns it.
    ///
    /// # Errors
    ///
    /// Returns `RestraintNotFound` if `id` is not registered.
    pub fn remove_restraint(&mut self, id: RestraintId) -> Result<Box<dyn Restraint>, EngineError> {
        let entry = self
            .restraints
            .remove(id)
            .ok_or(EngineError::RestraintNotFound(id))?;
        self.restraint_order.retain(|other| *other != id);
        self.statistics.forget_restraint(id);
        self.dependencies = None;
        Ok(entry.restraint)
    }

    /// The restraint `id`, if it exists and is an `R`.
    pub fn restraint<R: Restraint>(&self, id: RestraintId) -> Option<&R> {
        self.restraints
            .get(id)
            .and_then(|entry| (*entry.restraint).as_any().downcast_ref::<R>())
    }

    /// Mutable access to a restraint; drops the cached dependency order like
    /// [`Model::score_state_mut`].
    pub fn restraint_mut<R: Restraint>(&mut self, id: RestraintId) -> Option<&mut R> {
        self.dependencies = None;
        self.restraints
            .get_mut(id)
            .and_then(|entry| (*entry.restraint).as_any_mut().downcast_mut::<R>())
    }

    /// Restraint ids in insertion order.
    pub fn restraint_ids(&self) -> &[RestraintId] {
        &self.restraint_order
    }

    // --- Dependencies ---

    /// Drops the cached score-state order; it is rebuilt on the next evaluation.
    pub fn invalidate_dependencies(&mut self) {
        self.dependencies = None;
    }

    /// The score-state dependency graph, recomputed if anything changed.
    ///
    /// # Errors
    ///
    /// `DependencyCycle` if the states' inputs and outputs cannot be ordered.
    pub fn dependency_graph(&mut self) -> Result<&DependencyGraph, EngineError> {
        if self.dependencies.is_none() {
            info!(model = %self.name, states = self.state_order.len(), "Recomputing score state dependencies.");
            let infos = self
                .state_order
                .iter()
                .map(|id| -> Result<StateInfo, EngineError> {
                    let state = self
                        .score_states
                        .get(*id)
                        .ok_or(EngineError::ScoreStateNotFound(*id))?;
                    Ok(StateInfo {
                        id: *id,
                        name: state.name().to_string(),
                        inputs: state.inputs(&self.particles),
                        outputs: state.outputs(&self.particles),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            self.dependencies = Some(DependencyGraph::build(infos)?);
        }
        self.dependencies
            .as_ref()
            .ok_or_else(|| EngineError::Internal("dependency graph missing after rebuild".to_string()))
    }

    // --- Ranges ---

    /// The explicit range set for `key`, or else the span of the values
    /// currently present on live particles. `None` if neither exists.
    pub fn get_range(&self, key: FloatKey) -> Option<FloatRange> {
        if let Some(range) = self.ranges.get(&key) {
            return Some(*range);
        }
        let particles = &self.particles;
        let indexes: Vec<ParticleIndex> = particles.particle_indexes().collect();

        #[cfg(not(feature = "parallel"))]
        let iterator = indexes.iter();
        #[cfg(feature = "parallel")]
        let iterator = indexes.par_iter();

        let values: Vec<f64> = iterator
            .filter_map(|index| particles.get_value(*index, key).ok())
            .collect();
        values.iter().fold(None, |range: Option<FloatRange>, value| {
            Some(match range {
                None => FloatRange::new(*value, *value),
                Some(r) => FloatRange::new(r.lo.min(*value), r.hi.max(*value)),
            })
        })
    }

    /// Sets an explicit range for `key`, overriding the observed span.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if the range is not a finite interval with `lo <= hi`.
    pub fn set_range(&mut self, key: FloatKey, range: FloatRange) -> Result<(), EngineError> {
        if !range.is_valid() {
            return Err(EngineError::invalid(
                "Model::set_range",
                format!("range [{}, {}] for '{}' is not a finite interval", range.lo, range.hi, key),
            ));
        }
        self.ranges.insert(key, range);
        Ok(())
    }

    /// Removes the explicit range for `key` and returns it.
    pub fn clear_range(&mut self, key: FloatKey) -> Option<FloatRange> {
        self.ranges.remove(&key)
    }

    // --- Statistics ---

    /// Whether evaluations record timings and scores.
    pub fn gather_statistics(&self) -> bool {
        self.gather_statistics
    }

    /// Turns recording of timings and scores on or off.
    pub fn set_gather_statistics(&mut self, gather: bool) {
        self.gather_statistics = gather;
    }

    /// Statistics keyed by score state and restraint id.
    pub fn raw_statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Statistics in model order. Entries appear once the state or restraint
    /// has run with statistics enabled.
    pub fn statistics(&self) -> StatisticsReport<'_> {
        StatisticsReport {
            states: self
                .state_order
                .iter()
                .filter_map(|id| self.statistics.score_state(*id))
                .collect(),
            restraints: self
                .restraint_order
                .iter()
                .filter_map(|id| self.statistics.restraint(*id))
                .collect(),
        }
    }

    /// Forgets every recorded statistic.
    pub fn clear_statistics(&mut self) {
        self.statistics.clear();
    }

    // --- Configurations ---

    /// Captures the Float, Int and String attributes of every particle.
    pub fn save_configuration(&self) -> Configuration {
        Configuration::capture(&self.particles)
    }

    /// Restores attribute values captured by [`Model::save_configuration`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if the number of particles differs from the snapshot.
    pub fn load_configuration(&mut self, configuration: &Configuration) -> Result<(), EngineError> {
        configuration.restore(&mut self.particles)
    }
}

fn check_weight(weight: f64) -> Result<(), EngineError> {
    if weight.is_finite() && weight >= 0.0 {
        Ok(())
    } else {
        Err(EngineError::invalid(
            "Model::set_restraint_weight",
            format!("weight {} must be finite and non-negative", weight),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::decorators::{Decorator, RigidBody, Xyz};
    use crate::core::error::ErrorKind;
    use crate::engine::config::ModelConfigBuilder;
    use crate::engine::restraints::DistanceRestraint;
    use crate::engine::states::{MaxChangeScoreState, RigidBodyState};
    use nalgebra::Vector3;

    fn two_points(model: &mut Model) -> (ParticleIndex, ParticleIndex) {
        let a = model.add_particle("a");
        let b = model.add_particle("b");
        Xyz::setup_particle(model.particles_mut(), a, Vector3::new(0.0, 0.0, 0.0)).unwrap();
        Xyz::setup_particle(model.particles_mut(), b, Vector3::new(3.0, 0.0, 0.0)).unwrap();
        (a, b)
    }

    mod particles {
        use super::*;

        #[test]
        fn removed_particles_are_out_of_range() {
            let mut model = Model::new("m");
            let p = model.add_particle("p");
            model.remove_particle(p).unwrap();
            let err = model.get_particle(p).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::OutOfRange);
            let err = model.remove_particle(p).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::OutOfRange);
        }
    }

    mod registry {
        use super::*;

        #[test]
        fn typed_getters_downcast_to_the_concrete_type() {
            let mut model = Model::new("m");
            let (a, b) = two_points(&mut model);
            let r = model.add_restraint(DistanceRestraint::new("ab", a, b, 3.0, 1.0));
            let s = model.add_score_state(MaxChangeScoreState::new("moves", Xyz::coordinate_keys().to_vec(), vec![a]));

            assert_eq!(model.restraint::<DistanceRestraint>(r).unwrap().mean(), 3.0);
            assert!(model.score_state::<MaxChangeScoreState>(s).is_some());
            model.score_state_mut::<MaxChangeScoreState>(s).unwrap();
            model.remove_score_state(s).unwrap();
            assert!(model.score_state::<MaxChangeScoreState>(s).is_none());
        }

        #[test]
        fn mutable_access_refreshes_the_dependency_order() {
            let mut model = Model::new("m");
            let (p, q) = two_points(&mut model);
            let body = model.add_particle("body");
            RigidBody::setup_particle(model.particles_mut(), body, &[q]).unwrap();
            let tracker = model.add_score_state(MaxChangeScoreState::new("moves", Xyz::coordinate_keys().to_vec(), vec![p]));
            let writer = model.add_score_state(RigidBodyState::new("rigid", vec![body]));

            model.evaluate(false).unwrap();
            let order: Vec<_> = model.dependency_graph().unwrap().order().collect();
            assert_eq!(order, vec![tracker, writer]);

            model
                .score_state_mut::<MaxChangeScoreState>(tracker)
                .unwrap()
                .add_particle(q);
            let order: Vec<_> = model.dependency_graph().unwrap().order().collect();
            assert_eq!(order, vec![writer, tracker]);
        }

        #[test]
        fn removing_keeps_the_remaining_order() {
            let mut model = Model::new("m");
            let (a, b) = two_points(&mut model);
            let r1 = model.add_restraint(DistanceRestraint::new("one", a, b, 0.0, 1.0));
            let r2 = model.add_restraint(DistanceRestraint::new("two", a, b, 0.0, 1.0));
            let r3 = model.add_restraint(DistanceRestraint::new("three", a, b, 0.0, 1.0));
            let removed = model.remove_restraint(r2).unwrap();
            assert_eq!(removed.name(), "two");
            assert_eq!(model.restraint_ids(), &[r1, r3]);
            assert!(matches!(model.remove_restraint(r2), Err(EngineError::RestraintNotFound(_))));
        }

        #[test]
        fn weights_must_be_finite_and_non_negative() {
            let mut model = Model::new("m");
            let (a, b) = two_points(&mut model);
            let err = model
                .add_restraint_with_weight(DistanceRestraint::new("ab", a, b, 0.0, 1.0), -1.0)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Value);
            assert!(model.restraint_ids().is_empty());

            let r = model
                .add_restraint_with_weight(DistanceRestraint::new("ab", a, b, 0.0, 1.0), 2.0)
                .unwrap();
            assert_eq!(model.restraint_weight(r).unwrap(), 2.0);
            model.set_restraint_weight(r, 0.5).unwrap();
            assert_eq!(model.restraint_weight(r).unwrap(), 0.5);
            assert!(model.set_restraint_weight(r, f64::NAN).is_err());
        }
    }

    mod ranges {
        use super::*;

        #[test]
        fn range_falls_back_to_the_span_of_present_values() {
            let mut model = Model::new("m");
            let key = FloatKey::new("model range value");
            for (i, value) in [4.0, -2.0, 1.0].into_iter().enumerate() {
                let p = model.add_particle(format!("p{i}"));
                model.particles_mut().add_attribute(p, key, value).unwrap();
            }
            model.add_particle("without");
            assert_eq!(model.get_range(key), Some(FloatRange::new(-2.0, 4.0)));

            model.set_range(key, FloatRange::new(-10.0, 10.0)).unwrap();
            assert_eq!(model.get_range(key), Some(FloatRange::new(-10.0, 10.0)));
            model.clear_range(key);
            assert_eq!(model.get_range(key), Some(FloatRange::new(-2.0, 4.0)));
        }

        #[test]
        fn range_of_an_unused_key_is_none() {
            let model = Model::new("m");
            assert_eq!(model.get_range(FloatKey::new("model range unused")), None);
        }

        #[test]
        fn inverted_range_is_rejected() {
            let mut model = Model::new("m");
            let err = model
                .set_range(FloatKey::new("model range bad"), FloatRange::new(1.0, 0.0))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Value);
        }
    }

    mod configuration {
        use super::*;

        #[test]
        fn model_settings_follow_the_config() {
            let config = ModelConfigBuilder::new()
                .name("configured")
                .check_level(CheckLevel::UsageAndInternal)
                .gather_statistics(true)
                .maximum_score(10.0)
                .range("model config x", FloatRange::new(0.0, 1.0))
                .build()
                .unwrap();
            let model = Model::from_config(&config).unwrap();
            assert_eq!(model.name(), "configured");
            assert_eq!(model.check_level(), CheckLevel::UsageAndInternal);
            assert!(model.gather_statistics());
            assert_eq!(model.maximum_score(), Some(10.0));
            assert_eq!(
                model.get_range(FloatKey::new("model config x")),
                Some(FloatRange::new(0.0, 1.0))
            );
            assert_eq!(model.to_config(), config);
        }

        #[test]
        fn saved_configuration_restores_coordinates() {
            let mut model = Model::new("m");
            let (a, _) = two_points(&mut model);
            let saved = model.save_configuration();
            Xyz::decorate(model.particles_mut(), a)
                .unwrap()
                .set_coordinates(Vector3::new(9.0, 9.0, 9.0));
            model.load_configuration(&saved).unwrap();
            let xyz = Xyz::decorate(model.particles(), a).unwrap();
            assert_eq!(xyz.coordinates(), Vector3::new(0.0, 0.0, 0.0));
        }
    }
}
