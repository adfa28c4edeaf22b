use super::config::ConfigError;
use super::error::EngineError;
use crate::core::attributes::{AttributeKind, FloatAttr, IntAttr, StringAttr};
use crate::core::keys::Key;
use crate::core::models::ids::ParticleIndex;
use crate::core::models::particle::{Particle, ParticleMut};
use crate::core::models::store::ParticleStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

/// The scalar attributes of one particle, keyed by attribute name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ParticleSnapshot {
    /// The particle's name.
    pub name: String,
    /// Names of the float attributes marked as optimized.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub optimized: BTreeSet<String>,
    /// Float attribute values by key name.
    #[serde(default)]
    pub floats: BTreeMap<String, f64>,
    /// Int attribute values by key name.
    #[serde(default)]
    pub ints: BTreeMap<String, i64>,
    /// String attribute values by key name.
    #[serde(default)]
    pub strings: BTreeMap<String, String>,
}

impl ParticleSnapshot {
    fn capture(particle: Particle<'_>) -> Self {
        let table = particle.attributes();
        Self {
            name: particle.name().to_string(),
            optimized: table.optimized_keys().map(|key| key.name().to_string()).collect(),
            floats: named_values::<FloatAttr>(particle),
            ints: named_values::<IntAttr>(particle),
            strings: named_values::<StringAttr>(particle),
        }
    }
}

fn named_values<T: AttributeKind>(particle: Particle<'_>) -> BTreeMap<String, T::Value> {
    particle
        .keys::<T>()
        .filter_map(|key| particle.get_value(key).ok().map(|value| (key.name().to_string(), value)))
        .collect()
}

/// A saved state of every particle's float, int and string attributes.
///
/// Particles are matched by position in arena order when restoring, so a
/// configuration can only be loaded into a store with the same particle layout
/// it was saved from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// One entry per live particle, in arena order.
    #[serde(default)]
    pub particles: Vec<ParticleSnapshot>,
}

impl Configuration {
    /// Records the scalar attributes of every live particle in `store`.
    pub fn capture(store: &ParticleStore) -> Self {
        Self {
            particles: store.iter().map(ParticleSnapshot::capture).collect(),
        }
    }

    /// Writes every saved value back, adding attributes that are missing.
    /// Attributes not mentioned in the configuration are left untouched.
    pub fn restore(&self, store: &mut ParticleStore) -> Result<(), EngineError> {
        let indexes: Vec<ParticleIndex> = store.particle_indexes().collect();
        if indexes.len() != self.particles.len() {
            return Err(EngineError::invalid(
                "Configuration::restore",
                format!(
                    "configuration has {} particles but the model has {}",
                    self.particles.len(),
                    indexes.len()
                ),
            ));
        }
        for (index, snapshot) in indexes.into_iter().zip(&self.particles) {
            let mut particle = store.particle_mut(index)?;
            particle.set_name(snapshot.name.clone());
            for (name, value) in &snapshot.floats {
                put(&mut particle, Key::<FloatAttr>::new(name), *value)?;
                let optimized = snapshot.optimized.contains(name);
                particle.set_is_optimized(Key::new(name), optimized)?;
            }
            for (name, value) in &snapshot.ints {
                put(&mut particle, Key::<IntAttr>::new(name), *value)?;
            }
            for (name, value) in &snapshot.strings {
                put(&mut particle, Key::<StringAttr>::new(name), value.clone())?;
            }
        }
        info!(particles = self.particles.len(), "Configuration restored.");
        Ok(())
    }

    /// Writes the configuration to `path` as TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string(self)?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Reads a configuration written by [`Configuration::save`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Toml {
            path: path.to_string_lossy().to_string(),
            source: e,
        })
    }
}

fn put<T: AttributeKind>(
    particle: &mut ParticleMut<'_>,
    key: Key<T>,
    value: T::Value,
) -> Result<(), EngineError> {
    if particle.has_attribute(key) {
        particle.set_value(key, value)?;
    } else {
        particle.add_attribute(key, value)?;
    }
    Ok(())
}
