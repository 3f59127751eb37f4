//! Shared primitive types used across the entire save engine.

use serde::{Deserialize, Serialize};

/// A named, addressable persistence unit. Validated by `validate_slot_id`.
pub type SlotId = String;

/// A stable resource identifier ("coins", "wood", ...).
pub type ResourceId = String;

/// A stable identifier for an authored entity inside a scene.
pub type EntityId = String;

/// A stable producer identifier, shared by definition and runtime state.
pub type ProducerId = String;

/// Continuous simulation time in seconds. Never a wall-clock string.
pub type SimSeconds = f64;

/// Schema version written into every metadata record.
pub const SAVE_VERSION: u32 = 1;

/// The state categories tracked by the dirty tracker.
/// Variants are appended only, never removed or reordered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StateCategory {
    Resources,
    WorldState,
    SceneState,
    PlayerData,
    Settings,
    CharacterData,
}

impl StateCategory {
    pub const ALL: [StateCategory; 6] = [
        StateCategory::Resources,
        StateCategory::WorldState,
        StateCategory::SceneState,
        StateCategory::PlayerData,
        StateCategory::Settings,
        StateCategory::CharacterData,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Resources     => "resources",
            Self::WorldState    => "world_state",
            Self::SceneState    => "scene_state",
            Self::PlayerData    => "player_data",
            Self::Settings      => "settings",
            Self::CharacterData => "character_data",
        }
    }

    /// Categories whose mutations schedule a debounced instant save.
    pub fn wants_instant_save(&self) -> bool {
        matches!(self, Self::Resources | Self::CharacterData)
    }
}

/// Rejects ids that would escape the save root or collide with layout files.
pub fn validate_slot_id(slot_id: &str) -> bool {
    !slot_id.is_empty()
        && slot_id.len() <= 64
        && slot_id != "."
        && slot_id != ".."
        && slot_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}
