//! Built-in score states.

mod close_pairs;
mod max_change;
mod rigid_body;

pub use close_pairs::ClosePairsScoreState;
pub use max_change::MaxChangeScoreState;
pub use rigid_body::RigidBodyState;
