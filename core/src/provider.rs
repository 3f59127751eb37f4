//! State provider contract.
//!
//! RULE: Every independently-owned subsystem that persists state
//! implements StateProvider. The manager reads providers only at the
//! start of a save (`capture`) and writes them only at the end of a load
//! (`restore`). Providers never call into each other through the manager.

use crate::{snapshot::GameSnapshot, types::StateCategory};
use std::sync::{Arc, Mutex};

pub trait StateProvider: Send {
    /// Unique stable name for this provider, used in logs.
    fn name(&self) -> &'static str;

    /// The dirty-flag category this provider's mutations belong to.
    fn category(&self) -> StateCategory;

    /// Write this provider's part of the state into `snapshot`.
    fn capture(&self, snapshot: &mut GameSnapshot);

    /// Replace this provider's state from `snapshot`.
    fn restore(&mut self, snapshot: &GameSnapshot);
}

/// Receives producer output. Usually the resource ledger.
pub trait ResourceSink: Send {
    fn credit(&mut self, resource_id: &str, amount: f64);
}

pub type SharedProvider = Arc<Mutex<dyn StateProvider>>;
pub type SharedSink = Arc<Mutex<dyn ResourceSink>>;
