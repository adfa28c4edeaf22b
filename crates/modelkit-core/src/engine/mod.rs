//! # Engine Module
//!
//! The scoring model: a particle arena together with the score states that keep
//! derived attributes current and the restraints that turn particle attributes
//! into a score.
//!
//! ## Overview
//!
//! An evaluation runs in three phases. Score states run `before_evaluate` in
//! dependency order, restraints are summed with their weights, and then score
//! states run `after_evaluate` in reverse order so they can push derivatives
//! back onto the particles they were computed from. Dependencies are derived
//! from the particles each state declares as inputs and outputs.
//!
//! ## Architecture
//!
//! - **Model** ([`model`]) - Particle ownership, registries of score states and restraints, ranges
//! - **Evaluation** ([`Evaluation`]) - The three-phase protocol, cutoffs and subset evaluation
//! - **Dependencies** ([`dependency`]) - Score-state ordering and cycle detection
//! - **Score States** ([`score_state`], [`states`]) - The update hooks and the built-in states
//! - **Restraints** ([`restraint`], [`restraints`]) - The scoring trait and the built-in restraints
//! - **Snapshots** ([`snapshot`]) - Capturing and restoring attribute values, optionally on disk
//! - **Statistics** ([`statistics`]) - Per-state and per-restraint call counts and timings
//! - **Configuration** ([`config`]) - Model settings loaded from or written to TOML
//! - **Error Handling** ([`error`]) - Engine errors, wrapping model errors

pub mod config;
pub mod dependency;
pub mod error;
mod evaluate;
pub mod ids;
pub mod model;
pub mod restraint;
pub mod restraints;
pub mod score_state;
pub mod snapshot;
pub mod states;
pub mod statistics;

pub use evaluate::Evaluation;
