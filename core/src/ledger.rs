//! The resource ledger: amount per resource id.
//!
//! Registered with the manager both as a state provider (Resources
//! category) and as the sink for producer output.

use crate::{
    provider::{ResourceSink, StateProvider},
    snapshot::GameSnapshot,
    types::{ResourceId, StateCategory},
};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceLedger {
    amounts: BTreeMap<ResourceId, f64>,
}

impl ResourceLedger {
    pub fn new() -> Self { Self::default() }

    pub fn get(&self, resource_id: &str) -> f64 {
        self.amounts.get(resource_id).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, resource_id: impl Into<ResourceId>, amount: f64) {
        self.amounts.insert(resource_id.into(), amount);
    }

    pub fn add(&mut self, resource_id: &str, amount: f64) {
        *self.amounts.entry(resource_id.to_string()).or_insert(0.0) += amount;
    }

    /// Remove `amount` if available. Returns false and changes nothing otherwise.
    pub fn spend(&mut self, resource_id: &str, amount: f64) -> bool {
        match self.amounts.get_mut(resource_id) {
            Some(held) if *held >= amount => {
                *held -= amount;
                true
            }
            _ => false,
        }
    }

    pub fn amounts(&self) -> &BTreeMap<ResourceId, f64> { &self.amounts }
}

impl StateProvider for ResourceLedger {
    fn name(&self) -> &'static str { "resource_ledger" }

    fn category(&self) -> StateCategory { StateCategory::Resources }

    fn capture(&self, snapshot: &mut GameSnapshot) {
        snapshot.resources = self.amounts.clone();
    }

    fn restore(&mut self, snapshot: &GameSnapshot) {
        self.amounts = snapshot.resources.clone();
    }
}

impl ResourceSink for ResourceLedger {
    fn credit(&mut self, resource_id: &str, amount: f64) {
        if amount > 0.0 {
            self.add(resource_id, amount);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spend_refuses_overdraft() {
        let mut ledger = ResourceLedger::new();
        ledger.set("coins", 10.0);
        assert!(!ledger.spend("coins", 11.0));
        assert!(ledger.spend("coins", 4.0));
        assert_eq!(ledger.get("coins"), 6.0);
        assert!(!ledger.spend("gems", 1.0));
    }

    #[test]
    fn capture_restore_round_trips() {
        let mut ledger = ResourceLedger::new();
        ledger.set("coins", 100.0);
        let mut snapshot = GameSnapshot::default();
        ledger.capture(&mut snapshot);

        let mut fresh = ResourceLedger::new();
        fresh.restore(&snapshot);
        assert_eq!(fresh, ledger);
    }
}
