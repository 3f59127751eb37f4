//! Scene and world payloads: the bulk state written beside the metadata.
//!
//! Scene payloads carry only entities that differ from their authored
//! state. The world payload carries producer states plus the player-data
//! and settings maps, and in global mode every scene as well.

use crate::{
    producer::ProducerState,
    types::EntityId,
    value::CustomValue,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One entity that no longer matches its authored/original state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityDelta {
    pub entity_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position:  Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation:  Option<[f32; 4]>,
    #[serde(default)]
    pub active:    bool,
    #[serde(default)]
    pub fields:    BTreeMap<String, CustomValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ScenePayload {
    pub name:            String,
    /// Total objects in the scene, not just the changed ones.
    pub object_count:    u32,
    pub entity_deltas:   Vec<EntityDelta>,
    pub broken_entities: BTreeSet<EntityId>,
    pub triggers:        BTreeMap<String, bool>,
}

impl ScenePayload {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// File name for this scene in per-scene mode. Characters that are
    /// unsafe in a path component are replaced by `_`.
    pub fn file_name(&self) -> String {
        let safe: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("scene_{safe}.sav")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WorldPayload {
    /// Empty in per-scene mode; every scene in global mode.
    #[serde(default)]
    pub scenes:      Vec<ScenePayload>,
    #[serde(default)]
    pub producers:   Vec<ProducerState>,
    #[serde(default)]
    pub player_data: BTreeMap<String, CustomValue>,
    #[serde(default)]
    pub settings:    BTreeMap<String, CustomValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_file_names_are_path_safe() {
        assert_eq!(ScenePayload::new("Forest-01").file_name(), "scene_Forest-01.sav");
        assert_eq!(ScenePayload::new("../up/../x").file_name(), "scene____up____x.sav");
    }
}
