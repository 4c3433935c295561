//! In-process entity state registry
//!
//! This module provides the state registry the trackers read from and publish
//! into. Upstream meters are written with `set_state`; trackers publish their
//! derived reading with `publish`. Every write fans out the entity id on a
//! broadcast channel so tracker runtimes can react to source changes.
//!
//! Published states can be saved to and restored from a JSON snapshot file so
//! a tracker finds its last published value again after a restart.

use crate::error::Result;
use crate::logging::get_logger;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tokio::sync::broadcast;

/// State string for an entity that has not reported yet
pub const STATE_UNKNOWN: &str = "unknown";

/// State string for an entity that is currently unreachable
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// State of a single entity: raw state string plus attribute map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub state: String,

    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// Entity/state registry shared by all trackers
pub struct EntityRegistry {
    states: RwLock<HashMap<String, EntityState>>,
    change_tx: broadcast::Sender<String>,
    logger: crate::logging::StructuredLogger,
}

impl EntityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        let (change_tx, _rx) = broadcast::channel(64);
        Self {
            states: RwLock::new(HashMap::new()),
            change_tx,
            logger: get_logger("registry"),
        }
    }

    /// Subscribe to entity ids of changed entities
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.change_tx.subscribe()
    }

    /// Get the current state of an entity
    pub fn get(&self, entity_id: &str) -> Option<EntityState> {
        self.states
            .read()
            .ok()
            .and_then(|states| states.get(entity_id).cloned())
    }

    /// Update an entity's state string, keeping its attributes
    pub fn set_state(&self, entity_id: &str, state: &str) {
        if let Ok(mut states) = self.states.write() {
            states
                .entry(entity_id.to_string())
                .and_modify(|e| e.state = state.to_string())
                .or_insert_with(|| EntityState {
                    state: state.to_string(),
                    attributes: Map::new(),
                });
        }
        let _ = self.change_tx.send(entity_id.to_string());
    }

    /// Publish a full (state, attributes) pair for an entity
    pub fn publish(&self, entity_id: &str, state: String, attributes: Map<String, Value>) {
        if let Ok(mut states) = self.states.write() {
            states.insert(entity_id.to_string(), EntityState { state, attributes });
        }
        let _ = self.change_tx.send(entity_id.to_string());
    }

    /// Numeric reading of an entity
    ///
    /// Missing entities, `unknown`/`unavailable` states and non-numeric
    /// values all read as `None`.
    pub fn numeric_state(&self, entity_id: &str) -> Option<f64> {
        let entity = self.get(entity_id)?;
        if entity.state == STATE_UNKNOWN || entity.state == STATE_UNAVAILABLE {
            return None;
        }
        entity.state.parse::<f64>().ok()
    }

    /// Save all entity states to a JSON snapshot file
    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let states = self
            .states
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();
        let contents = serde_json::to_string_pretty(&states)?;
        std::fs::write(path, contents)?;
        self.logger.debug("Saved registry snapshot to disk");
        Ok(())
    }

    /// Restore entity states from a JSON snapshot file
    pub fn load_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            self.logger.info("No registry snapshot found, starting empty");
            return Ok(());
        }

        let contents = std::fs::read_to_string(path)?;
        let restored: HashMap<String, EntityState> = serde_json::from_str(&contents)?;
        if let Ok(mut states) = self.states.write() {
            *states = restored;
        }
        self.logger.info("Restored registry snapshot from disk");
        Ok(())
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_state_parses_floats() {
        let registry = EntityRegistry::new();
        registry.set_state("sensor.meter", "123.456");
        assert_eq!(registry.numeric_state("sensor.meter"), Some(123.456));
    }

    #[test]
    fn numeric_state_rejects_unknown_and_unavailable() {
        let registry = EntityRegistry::new();
        assert_eq!(registry.numeric_state("sensor.missing"), None);

        registry.set_state("sensor.meter", STATE_UNKNOWN);
        assert_eq!(registry.numeric_state("sensor.meter"), None);

        registry.set_state("sensor.meter", STATE_UNAVAILABLE);
        assert_eq!(registry.numeric_state("sensor.meter"), None);

        registry.set_state("sensor.meter", "not-a-number");
        assert_eq!(registry.numeric_state("sensor.meter"), None);
    }

    #[test]
    fn set_state_keeps_published_attributes() {
        let registry = EntityRegistry::new();
        let mut attrs = Map::new();
        attrs.insert("unit_of_measurement".to_string(), Value::from("kWh"));
        registry.publish("sensor.meter", "10.0".to_string(), attrs);

        registry.set_state("sensor.meter", "11.0");
        let entity = registry.get("sensor.meter").unwrap();
        assert_eq!(entity.state, "11.0");
        assert_eq!(entity.attributes["unit_of_measurement"], "kWh");
    }

    #[test]
    fn changes_are_broadcast() {
        let registry = EntityRegistry::new();
        let mut rx = registry.subscribe();
        registry.set_state("sensor.meter", "1.0");
        assert_eq!(rx.try_recv().ok().as_deref(), Some("sensor.meter"));
    }
}
