use super::config::CheckLevel;
use super::error::EngineError;
use super::ids::{RestraintId, ScoreStateId};
use super::model::Model;
use crate::core::error::describe;
use crate::core::keys::FloatKey;
use crate::core::models::derivatives::{DerivativeAccumulator, DerivativeBuffers};
use crate::core::models::ids::ParticleIndex;
use std::time::Instant;
use tracing::{debug, info, instrument, trace};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// The outcome of an evaluation that may have stopped early.
///
/// When `is_partial` is set the restraint summation stopped as soon as the
/// running total exceeded the maximum score, so `score` is a lower bound on
/// the full score (for non-negative restraints) rather than the exact value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// The weighted sum of the restraints that were scored.
    pub score: f64,
    /// Set when some restraints were skipped because of the cutoff.
    pub is_partial: bool,
}

impl Model {
    /// Runs every score state and restraint and returns the total weighted score.
    ///
    /// If a maximum score is configured the result may be partial; use
    /// [`Model::evaluate_with_cutoff`] to find out.
    pub fn evaluate(&mut self, calc_derivs: bool) -> Result<f64, EngineError> {
        let (states, restraints) = self.full_selection()?;
        let cutoff = self.maximum_score;
        Ok(self.run(&states, &restraints, calc_derivs, cutoff)?.score)
    }

    /// Evaluates with an explicit maximum score.
    ///
    /// # Arguments
    ///
    /// * `calc_derivs` - Whether derivatives are accumulated.
    /// * `maximum_score` - Summation stops once the running total exceeds this.
    ///
    /// # Return
    ///
    /// The score and whether it is partial.
    pub fn evaluate_with_cutoff(&mut self, calc_derivs: bool, maximum_score: f64) -> Result<Evaluation, EngineError> {
        let (states, restraints) = self.full_selection()?;
        self.run(&states, &restraints, calc_derivs, Some(maximum_score))
    }

    /// Scores only `restraints`, running just the score states they depend on.
    pub fn evaluate_subset(&mut self, restraints: &[RestraintId], calc_derivs: bool) -> Result<f64, EngineError> {
        let mut inputs: Vec<ParticleIndex> = Vec::new();
        for id in restraints {
            let entry = self.restraints.get(*id).ok_or(EngineError::RestraintNotFound(*id))?;
            inputs.extend(entry.restraint.inputs(&self.particles));
        }
        let states = self.dependency_graph()?.upstream_of(&inputs);
        let cutoff = self.maximum_score;
        Ok(self.run(&states, restraints, calc_derivs, cutoff)?.score)
    }

    /// Runs only the before-evaluate pass, bringing derived attributes up to date.
    #[instrument(skip_all, name = "model_update", fields(model = %self.name))]
    pub fn update(&mut self) -> Result<(), EngineError> {
        let states: Vec<ScoreStateId> = self.dependency_graph()?.order().collect();
        self.before_pass(&states)
    }

    fn full_selection(&mut self) -> Result<(Vec<ScoreStateId>, Vec<RestraintId>), EngineError> {
        let states = self.dependency_graph()?.order().collect();
        Ok((states, self.restraint_order.clone()))
    }

    #[instrument(
        skip_all,
        name = "model_evaluate",
        fields(model = %self.name, calc_derivs = calc_derivs, states = states.len(), restraints = restraints.len())
    )]
    fn run(
        &mut self,
        states: &[ScoreStateId],
        restraints: &[RestraintId],
        calc_derivs: bool,
        cutoff: Option<f64>,
    ) -> Result<Evaluation, EngineError> {
        self.before_pass(states)?;

        let mut buffers = if calc_derivs {
            Some(self.particles.checkout_derivatives()?)
        } else {
            None
        };
        let result = self.score_and_propagate(states, restraints, buffers.as_mut(), cutoff);
        if let Some(buffers) = buffers {
            self.particles.restore_derivatives(buffers);
        }
        let evaluation = result?;

        if calc_derivs && self.check_level >= CheckLevel::UsageAndInternal {
            self.validate_derivatives()?;
        }
        self.evaluation_count += 1;
        debug!(score = evaluation.score, partial = evaluation.is_partial, "Evaluation complete.");
        Ok(evaluation)
    }

    fn before_pass(&mut self, states: &[ScoreStateId]) -> Result<(), EngineError> {
        debug!(states = states.len(), "Running before-evaluate pass.");
        for id in states {
            let state = self
                .score_states
                .get_mut(*id)
                .ok_or(EngineError::ScoreStateNotFound(*id))?;
            if self.check_level >= CheckLevel::Usage {
                let inputs = state.inputs(&self.particles);
                if let Some(particle) = inputs.into_iter().find(|p| !self.particles.contains(*p)) {
                    return Err(EngineError::StaleDependency {
                        state: state.name().to_string(),
                        particle,
                    });
                }
            }
            let started = Instant::now();
            state.before_evaluate(&mut self.particles)?;
            if self.gather_statistics {
                let stats = self.statistics.state_entry(*id, state.name());
                stats.calls += 1;
                stats.before_time += started.elapsed();
            }
            trace!(state = state.name(), "before_evaluate finished");
        }
        Ok(())
    }

    fn score_and_propagate(
        &mut self,
        states: &[ScoreStateId],
        restraints: &[RestraintId],
        mut buffers: Option<&mut DerivativeBuffers>,
        cutoff: Option<f64>,
    ) -> Result<Evaluation, EngineError> {
        let particles = &self.particles;
        let mut score = 0.0;
        let mut is_partial = false;

        debug!(restraints = restraints.len(), "Scoring restraints.");
        for (position, id) in restraints.iter().enumerate() {
            let entry = self.restraints.get(*id).ok_or(EngineError::RestraintNotFound(*id))?;
            let started = Instant::now();
            let mut accumulator = buffers
                .as_deref_mut()
                .map(|b| DerivativeAccumulator::new(particles, b, entry.weight));
            let value = entry.restraint.unprotected_evaluate(particles, accumulator.as_mut())?;
            let weighted = entry.weight * value;
            score += weighted;
            if self.gather_statistics {
                self.statistics
                    .restraint_entry(*id, entry.restraint.name())
                    .record(weighted, started.elapsed());
            }
            trace!(restraint = entry.restraint.name(), score = weighted, "Restraint scored.");

            if let Some(maximum) = cutoff {
                if score > maximum && position + 1 < restraints.len() {
                    info!(
                        score,
                        maximum,
                        skipped = restraints.len() - position - 1,
                        "Maximum score exceeded; stopping early."
                    );
                    is_partial = true;
                    break;
                }
            }
        }

        debug!(states = states.len(), "Running after-evaluate pass.");
        for id in states.iter().rev() {
            let state = self
                .score_states
                .get_mut(*id)
                .ok_or(EngineError::ScoreStateNotFound(*id))?;
            let started = Instant::now();
            let mut accumulator = buffers
                .as_deref_mut()
                .map(|b| DerivativeAccumulator::new(particles, b, 1.0));
            state.after_evaluate(particles, accumulator.as_mut())?;
            if self.gather_statistics {
                self.statistics.state_entry(*id, state.name()).after_time += started.elapsed();
            }
        }

        Ok(Evaluation { score, is_partial })
    }

    fn validate_derivatives(&self) -> Result<(), EngineError> {
        let particles = &self.particles;
        let indexes: Vec<ParticleIndex> = particles.particle_indexes().collect();

        #[cfg(not(feature = "parallel"))]
        let iterator = indexes.iter();
        #[cfg(feature = "parallel")]
        let iterator = indexes.par_iter();

        let invalid: Vec<(ParticleIndex, FloatKey, f64)> = iterator
            .flat_map(|index| {
                particles
                    .particle(*index)
                    .map(|particle| {
                        particle
                            .float_keys()
                            .filter_map(|key| particle.attributes().derivative(key).map(|d| (*index, key, d)))
                            .filter(|(_, _, d)| !d.is_finite())
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default()
            })
            .collect();

        match invalid.first() {
            Some((index, key, value)) => {
                let name = particles.particle(*index)?.name();
                Err(EngineError::InvalidDerivative {
                    particle: describe(name, *index),
                    key: key.name(),
                    value: *value,
                })
            }
            None => Ok(()),
        }
    }
}
