use crate::core::keys::FloatKey;
use crate::core::models::ids::ParticleIndex;
use crate::core::models::store::ParticleStore;
use crate::engine::error::EngineError;
use crate::engine::score_state::ScoreState;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

static NEXT_TRACKER: AtomicU64 = AtomicU64::new(0);

/// Shadow keys are per tracker, so trackers on the same particles never share references.
fn shadow_key(key: FloatKey, tracker: u64) -> FloatKey {
    FloatKey::new(&format!("{} original #{tracker}", key.name()))
}

/// Tracks how far a set of float attributes has moved since the last reset.
///
/// The reference value of each tracked attribute is kept in a shadow attribute
/// named `"<key> original #<n>"` on the same particle, where `n` identifies
/// this tracker. The change of a particle is
/// the Euclidean norm over its tracked keys; [`max_change`](Self::max_change)
/// is the largest such change seen since the last [`reset`](Self::reset).
///
/// If a tracked attribute is removed while its shadow is still present, the
/// shadow is dropped as well and the change is reported as infinite until the
/// next reset.
#[derive(Debug)]
pub struct MaxChangeScoreState {
    name: String,
    keys: Vec<FloatKey>,
    shadows: Vec<FloatKey>,
    particles: Vec<ParticleIndex>,
    max_change: f64,
}

impl MaxChangeScoreState {
    /// Tracks `keys` on `particles`.
    ///
    /// The reference values are taken on the first `before_evaluate`.
    pub fn new(name: impl Into<String>, keys: Vec<FloatKey>, particles: Vec<ParticleIndex>) -> Self {
        let tracker = NEXT_TRACKER.fetch_add(1, Ordering::Relaxed);
        let shadows = keys.iter().map(|key| shadow_key(*key, tracker)).collect();
        Self {
            name: name.into(),
            keys,
            shadows,
            particles,
            max_change: 0.0,
        }
    }

    /// Largest absolute change of any tracked value since the last reset.
    pub fn max_change(&self) -> f64 {
        self.max_change
    }

    pub fn keys(&self) -> &[FloatKey] {
        &self.keys
    }

    pub fn particles(&self) -> &[ParticleIndex] {
        &self.particles
    }

    /// Starts tracking `particle`; its current values become its reference.
    pub fn add_particle(&mut self, particle: ParticleIndex) {
        if !self.particles.contains(&particle) {
            self.particles.push(particle);
        }
    }

    /// Makes the current values the reference and zeroes the maximum change.
    pub fn reset(&mut self, store: &mut ParticleStore) -> Result<(), EngineError> {
        for particle in &self.particles {
            if !store.contains(*particle) {
                continue;
            }
            for (key, shadow) in self.keys.iter().zip(&self.shadows) {
                match store.get_value(*particle, *key) {
                    Ok(value) if store.has_attribute(*particle, *shadow) => {
                        store.set_value(*particle, *shadow, value)?;
                    }
                    Ok(value) => store.add_attribute(*particle, *shadow, value)?,
                    Err(_) if store.has_attribute(*particle, *shadow) => {
                        store.remove_attribute(*particle, *shadow)?;
                    }
                    Err(_) => {}
                }
            }
        }
        self.max_change = 0.0;
        Ok(())
    }

    fn measure(&self, store: &mut ParticleStore) -> Result<f64, EngineError> {
        let mut largest: f64 = 0.0;
        for particle in &self.particles {
            if !store.contains(*particle) {
                continue;
            }
            let mut squared = 0.0;
            for (key, shadow) in self.keys.iter().zip(&self.shadows) {
                let tracked = store.has_attribute(*particle, *key);
                let shadowed = store.has_attribute(*particle, *shadow);
                match (tracked, shadowed) {
                    (true, true) => {
                        let delta = store.get_value(*particle, *key)? - store.get_value(*particle, *shadow)?;
                        squared += delta * delta;
                    }
                    (true, false) => {
                        let value = store.get_value(*particle, *key)?;
                        store.add_attribute(*particle, *shadow, value)?;
                    }
                    (false, true) => {
                        warn!(state = %self.name, key = key.name(), "Tracked attribute was removed.");
                        store.remove_attribute(*particle, *shadow)?;
                        squared = f64::INFINITY;
                    }
                    (false, false) => {}
                }
            }
            largest = largest.max(squared.sqrt());
        }
        Ok(largest)
    }
}

impl ScoreState for MaxChangeScoreState {
    fn name(&self) -> &str {
        &self.name
    }

    fn before_evaluate(&mut self, particles: &mut ParticleStore) -> Result<(), EngineError> {
        let change = self.measure(particles)?;
        self.max_change = self.max_change.max(change);
        Ok(())
    }

    fn inputs(&self, _particles: &ParticleStore) -> Vec<ParticleIndex> {
        self.particles.clone()
    }

    // Shadow attributes are private to this state.
    fn outputs(&self, _particles: &ParticleStore) -> Vec<ParticleIndex> {
        Vec::new()
    }
}
