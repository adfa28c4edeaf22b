use super::max_change::MaxChangeScoreState;
use crate::core::decorators::{Decorator, Xyz, Xyzr, sphere_distance};
use crate::core::error::ModelError;
use crate::core::keys::ParticlesKey;
use crate::core::models::ids::ParticleIndex;
use crate::core::models::store::ParticleStore;
use crate::engine::error::EngineError;
use crate::engine::score_state::ScoreState;
use kiddo::{KdTree, SquaredEuclidean};
use std::sync::OnceLock;
use tracing::debug;

fn pairs_key() -> ParticlesKey {
    static KEY: OnceLock<ParticlesKey> = OnceLock::new();
    *KEY.get_or_init(|| ParticlesKey::new("close pairs"))
}

/// Maintains the list of `Xyzr` particle pairs whose surfaces are closer than
/// `distance`.
///
/// The list lives on a container particle created by the state, as a flat
/// particle list `[a0, b0, a1, b1, ...]`, so restraints can depend on it like
/// on any other attribute. Pairs are collected within `distance + slack` and
/// the list is only rebuilt once some particle has moved more than half the
/// slack since the last rebuild. Radius changes do not trigger a rebuild.
#[derive(Debug)]
pub struct ClosePairsScoreState {
    name: String,
    particles: Vec<ParticleIndex>,
    container: ParticleIndex,
    distance: f64,
    slack: f64,
    tracker: MaxChangeScoreState,
    built: bool,
    rebuilds: usize,
}

impl ClosePairsScoreState {
    /// Creates the state and its container particle.
    ///
    /// # Arguments
    ///
    /// * `distance` - Surface distance below which a pair is listed.
    /// * `slack` - Extra reach that lets the list survive small moves.
    ///
    /// # Errors
    ///
    /// Returns `NotDecorated` if a particle is not an `Xyzr` and `InvalidValue`
    /// if `distance` is negative or `slack` is not positive.
    pub fn new(
        store: &mut ParticleStore,
        name: impl Into<String>,
        particles: Vec<ParticleIndex>,
        distance: f64,
        slack: f64,
    ) -> Result<Self, EngineError> {
        let name = name.into();
        if !(distance.is_finite() && distance >= 0.0) {
            return Err(EngineError::invalid(
                "ClosePairsScoreState::new",
                format!("distance must be finite and non-negative, got {distance}"),
            ));
        }
        if !(slack.is_finite() && slack > 0.0) {
            return Err(EngineError::invalid(
                "ClosePairsScoreState::new",
                format!("slack must be finite and positive, got {slack}"),
            ));
        }
        for particle in &particles {
            Xyzr::decorate(&*store, *particle)?;
        }
        let container = store.add_particle(format!("{name} pairs"));
        store.add_attribute(container, pairs_key(), Vec::new())?;
        let tracker = MaxChangeScoreState::new(
            format!("{name} tracker"),
            Xyz::coordinate_keys().to_vec(),
            particles.clone(),
        );
        Ok(Self {
            name,
            particles,
            container,
            distance,
            slack,
            tracker,
            built: false,
            rebuilds: 0,
        })
    }

    /// The particle holding the pair list.
    pub fn container(&self) -> ParticleIndex {
        self.container
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn slack(&self) -> f64 {
        self.slack
    }

    /// How many times the pair list has been recomputed from scratch.
    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }

    /// Reads the pair list stored on `container`.
    pub fn pairs_in(store: &ParticleStore, container: ParticleIndex) -> Result<Vec<(ParticleIndex, ParticleIndex)>, ModelError> {
        let flat = store.value_ref(container, pairs_key())?;
        Ok(flat.chunks_exact(2).map(|pair| (pair[0], pair[1])).collect())
    }

    fn rebuild(&mut self, store: &mut ParticleStore) -> Result<(), EngineError> {
        let spheres: Vec<(ParticleIndex, [f64; 3], f64)> = self
            .particles
            .iter()
            .filter(|p| store.contains(**p))
            .map(|p| -> Result<(ParticleIndex, [f64; 3], f64), ModelError> {
                let sphere = Xyzr::decorate(&*store, *p)?;
                let c = sphere.coordinates();
                Ok((*p, [c.x, c.y, c.z], sphere.radius()))
            })
            .collect::<Result<_, _>>()?;

        let max_radius = spheres.iter().map(|(_, _, r)| *r).fold(0.0, f64::max);
        let reach = self.distance + self.slack;

        let mut tree: KdTree<f64, 3> = KdTree::new();
        for (i, (_, center, _)) in spheres.iter().enumerate() {
            tree.add(center, i as u64);
        }

        let mut pairs: Vec<(usize, usize)> = Vec::new();
        for (i, (_, center, radius)) in spheres.iter().enumerate() {
            let search = reach + radius + max_radius;
            for neighbour in tree.within_unsorted::<SquaredEuclidean>(center, search * search) {
                let j = neighbour.item as usize;
                if j <= i {
                    continue;
                }
                let a = Xyzr::decorate_unchecked(&*store, spheres[i].0);
                let b = Xyzr::decorate_unchecked(&*store, spheres[j].0);
                if sphere_distance(&a, &b) <= reach {
                    pairs.push((i, j));
                }
            }
        }
        pairs.sort_unstable();

        let flat: Vec<ParticleIndex> = pairs
            .iter()
            .flat_map(|(i, j)| [spheres[*i].0, spheres[*j].0])
            .collect();
        debug!(state = %self.name, spheres = spheres.len(), pairs = pairs.len(), "Close pair list rebuilt.");
        store.set_value(self.container, pairs_key(), flat)?;
        Ok(())
    }
}

impl ScoreState for ClosePairsScoreState {
    fn name(&self) -> &str {
        &self.name
    }

    fn before_evaluate(&mut self, particles: &mut ParticleStore) -> Result<(), EngineError> {
        self.tracker.before_evaluate(particles)?;
        if !self.built || self.tracker.max_change() > self.slack / 2.0 {
            self.rebuild(particles)?;
            self.tracker.reset(particles)?;
            self.built = true;
            self.rebuilds += 1;
        }
        Ok(())
    }

    fn inputs(&self, _particles: &ParticleStore) -> Vec<ParticleIndex> {
        self.particles.clone()
    }

    fn outputs(&self, _particles: &ParticleStore) -> Vec<ParticleIndex> {
        vec![self.container]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn spheres(centers: &[[f64; 3]]) -> (ParticleStore, Vec<ParticleIndex>) {
        let mut store = ParticleStore::new();
        let particles = centers
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let p = store.add_particle(format!("s{i}"));
                Xyzr::setup_particle(&mut store, p, Vector3::new(c[0], c[1], c[2]), 0.5).unwrap();
                p
            })
            .collect();
        (store, particles)
    }

    #[test]
    fn finds_pairs_within_distance_plus_slack() {
        let (mut store, p) = spheres(&[[0.0, 0.0, 0.0], [1.5, 0.1, 0.0], [10.0, 0.2, 0.3]]);
        let mut state = ClosePairsScoreState::new(&mut store, "pairs", p.clone(), 0.2, 0.4).unwrap();
        state.before_evaluate(&mut store).unwrap();
        let pairs = ClosePairsScoreState::pairs_in(&store, state.container()).unwrap();
        assert_eq!(pairs, vec![(p[0], p[1])]);
        assert_eq!(state.rebuilds(), 1);
    }

    #[test]
    fn small_moves_reuse_the_list_and_large_moves_rebuild_it() {
        let (mut store, p) = spheres(&[[0.0, 0.0, 0.0], [5.0, 0.1, 0.0]]);
        let mut state = ClosePairsScoreState::new(&mut store, "pairs", p.clone(), 0.5, 1.0).unwrap();
        state.before_evaluate(&mut store).unwrap();
        assert!(ClosePairsScoreState::pairs_in(&store, state.container()).unwrap().is_empty());

        Xyz::decorate(&mut store, p[1]).unwrap().set_coordinates(Vector3::new(4.8, 0.1, 0.0));
        state.before_evaluate(&mut store).unwrap();
        assert_eq!(state.rebuilds(), 1);

        Xyz::decorate(&mut store, p[1]).unwrap().set_coordinates(Vector3::new(1.2, 0.1, 0.0));
        state.before_evaluate(&mut store).unwrap();
        assert_eq!(state.rebuilds(), 2);
        assert_eq!(
            ClosePairsScoreState::pairs_in(&store, state.container()).unwrap(),
            vec![(p[0], p[1])]
        );
    }

    #[test]
    fn states_sharing_particles_rebuild_independently() {
        let (mut store, p) = spheres(&[[0.0, 0.0, 0.0], [10.0, 0.0, 0.0]]);
        let mut fine = ClosePairsScoreState::new(&mut store, "fine", p.clone(), 0.0, 1.0).unwrap();
        let mut coarse = ClosePairsScoreState::new(&mut store, "coarse", p.clone(), 0.0, 4.0).unwrap();
        fine.before_evaluate(&mut store).unwrap();
        coarse.before_evaluate(&mut store).unwrap();

        for x in [8.5, 7.0, 5.5, 4.0, 2.5, 1.0, 0.8] {
            Xyz::decorate(&mut store, p[1]).unwrap().set_coordinates(Vector3::new(x, 0.0, 0.0));
            fine.before_evaluate(&mut store).unwrap();
            coarse.before_evaluate(&mut store).unwrap();
        }

        assert!(coarse.rebuilds() > 1);
        for state in [&fine, &coarse] {
            assert_eq!(
                ClosePairsScoreState::pairs_in(&store, state.container()).unwrap(),
                vec![(p[0], p[1])]
            );
        }
    }

    #[test]
    fn rebuilding_does_not_reset_other_trackers() {
        let (mut store, p) = spheres(&[[0.0, 0.0, 0.0], [10.0, 0.0, 0.0]]);
        let mut tracker = MaxChangeScoreState::new("moves", Xyz::coordinate_keys().to_vec(), vec![p[1]]);
        let mut pairs = ClosePairsScoreState::new(&mut store, "pairs", p.clone(), 0.0, 1.0).unwrap();
        tracker.before_evaluate(&mut store).unwrap();
        pairs.before_evaluate(&mut store).unwrap();

        for x in [9.0, 8.0, 7.0] {
            Xyz::decorate(&mut store, p[1]).unwrap().set_coordinates(Vector3::new(x, 0.0, 0.0));
            pairs.before_evaluate(&mut store).unwrap();
            tracker.before_evaluate(&mut store).unwrap();
        }

        assert_eq!(pairs.rebuilds(), 4);
        assert!((tracker.max_change() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_spheres_and_bad_parameters() {
        let (mut store, p) = spheres(&[[0.0, 0.0, 0.0]]);
        let bare = store.add_particle("bare");
        assert!(ClosePairsScoreState::new(&mut store, "x", vec![p[0], bare], 1.0, 1.0).is_err());
        assert!(ClosePairsScoreState::new(&mut store, "x", p.clone(), -1.0, 1.0).is_err());
        assert!(ClosePairsScoreState::new(&mut store, "x", p, 1.0, 0.0).is_err());
    }
}
