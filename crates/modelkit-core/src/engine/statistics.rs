use super::ids::{RestraintId, ScoreStateId};
use slotmap::SecondaryMap;
use std::fmt;
use std::time::Duration;

/// Call count and time spent in one score state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreStateStatistics {
    /// Name of the score state when it was first recorded.
    pub name: String,
    /// Number of before-evaluate passes.
    pub calls: u64,
    /// Total time spent in `before_evaluate`.
    pub before_time: Duration,
    /// Total time spent in `after_evaluate`.
    pub after_time: Duration,
}

/// Call count, time and score history of one restraint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestraintStatistics {
    /// Name of the restraint when it was first recorded.
    pub name: String,
    /// Number of times the restraint was scored.
    pub calls: u64,
    /// Total time spent scoring.
    pub time: Duration,
    /// Weighted score of the most recent call.
    pub last_score: f64,
    /// Lowest weighted score seen.
    pub min_score: f64,
    /// Highest weighted score seen.
    pub max_score: f64,
    total_score: f64,
}

impl RestraintStatistics {
    pub(crate) fn record(&mut self, score: f64, elapsed: Duration) {
        if self.calls == 0 {
            self.min_score = score;
            self.max_score = score;
        } else {
            self.min_score = self.min_score.min(score);
            self.max_score = self.max_score.max(score);
        }
        self.calls += 1;
        self.time += elapsed;
        self.last_score = score;
        self.total_score += score;
    }

    /// Mean weighted score over all recorded calls, or `0.0` before the first one.
    pub fn mean_score(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_score / self.calls as f64
        }
    }
}

/// Timing and score history gathered while statistics are enabled.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    states: SecondaryMap<ScoreStateId, ScoreStateStatistics>,
    restraints: SecondaryMap<RestraintId, RestraintStatistics>,
}

impl Statistics {
    /// Statistics for score state `id`, if it has run while recording was on.
    pub fn score_state(&self, id: ScoreStateId) -> Option<&ScoreStateStatistics> {
        self.states.get(id)
    }

    /// Statistics for restraint `id`, if it has been scored while recording was on.
    pub fn restraint(&self, id: RestraintId) -> Option<&RestraintStatistics> {
        self.restraints.get(id)
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.restraints.clear();
    }

    pub(crate) fn state_entry(&mut self, id: ScoreStateId, name: &str) -> &mut ScoreStateStatistics {
        if !self.states.contains_key(id) {
            self.states.insert(
                id,
                ScoreStateStatistics {
                    name: name.to_string(),
                    ..Default::default()
                },
            );
        }
        &mut self.states[id]
    }

    pub(crate) fn restraint_entry(&mut self, id: RestraintId, name: &str) -> &mut RestraintStatistics {
        if !self.restraints.contains_key(id) {
            self.restraints.insert(
                id,
                RestraintStatistics {
                    name: name.to_string(),
                    ..Default::default()
                },
            );
        }
        &mut self.restraints[id]
    }

    pub(crate) fn forget_state(&mut self, id: ScoreStateId) {
        self.states.remove(id);
    }

    pub(crate) fn forget_restraint(&mut self, id: RestraintId) {
        self.restraints.remove(id);
    }
}

/// Statistics listed in model order, ready for display.
#[derive(Debug)]
pub struct StatisticsReport<'a> {
    pub states: Vec<&'a ScoreStateStatistics>,
    pub restraints: Vec<&'a RestraintStatistics>,
}

impl fmt::Display for StatisticsReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Score states:")?;
        for s in &self.states {
            writeln!(
                f,
                "  {}: {} calls, before {:.3} ms, after {:.3} ms",
                s.name,
                s.calls,
                s.before_time.as_secs_f64() * 1e3,
                s.after_time.as_secs_f64() * 1e3
            )?;
        }
        writeln!(f, "Restraints:")?;
        for r in &self.restraints {
            writeln!(
                f,
                "  {}: {} calls, {:.3} ms, score last {:.4} min {:.4} max {:.4} mean {:.4}",
                r.name,
                r.calls,
                r.time.as_secs_f64() * 1e3,
                r.last_score,
                r.min_score,
                r.max_score,
                r.mean_score()
            )?;
        }
        Ok(())
    }
}
