//! GameSnapshot: everything the providers hand over for one save, and
//! everything they get back on load.
//!
//! A snapshot is built fresh on every save call and never mutated after
//! the save assembles its generation from it.

use crate::{
    metadata::CharacterSnapshot,
    payload::ScenePayload,
    types::ResourceId,
    value::CustomValue,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GameSnapshot {
    pub resources:   BTreeMap<ResourceId, f64>,
    pub character:   Option<CharacterSnapshot>,
    pub scenes:      Vec<ScenePayload>,
    pub player_data: BTreeMap<String, CustomValue>,
    pub settings:    BTreeMap<String, CustomValue>,
}
