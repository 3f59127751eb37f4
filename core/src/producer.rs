//! Producer simulator: advances resource producers by elapsed time.
//!
//! RULES:
//!   - `advance()` is a pure function of (definition, previous state, Δ).
//!   - 0 ≤ current_output ≤ capacity after every update.
//!   - The ledger credit is new_output − current_output, never negative.
//!   - Foreground ticks and offline catch-up share `advance()`; they differ
//!     only in where Δ comes from.

use crate::{
    config::ProducerCatalog,
    types::{ProducerId, ResourceId, SimSeconds},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable, author-time configuration for one producer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProducerDefinition {
    pub id:              ProducerId,
    pub output_resource: ResourceId,
    pub rate_per_sec:    f64,
    pub capacity:        f64,
    /// Passive producers keep running without a worker assignment step;
    /// output still scales with `worker_count`.
    #[serde(default)]
    pub passive:         bool,
    #[serde(default = "default_workers")]
    pub worker_count:    u32,
    #[serde(default)]
    pub decay_rate:      f64,
}

fn default_workers() -> u32 { 1 }

/// Runtime state for one producer. Persisted in the world payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProducerState {
    pub id:               ProducerId,
    pub last_update_time: SimSeconds,
    pub current_output:   f64,
    pub worker_count:     u32,
    pub is_active:        bool,
}

impl ProducerState {
    pub fn from_definition(def: &ProducerDefinition, start_time: SimSeconds) -> Self {
        Self {
            id:               def.id.clone(),
            last_update_time: start_time,
            current_output:   0.0,
            worker_count:     def.worker_count,
            is_active:        true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProducerUpdate {
    pub state:    ProducerState,
    pub credited: f64,
}

/// Advance one producer by `elapsed` seconds.
///
/// produced = rate × workers × Δ × e^(−decay × Δ), with Δ in the decay term
/// held at 1/decay once it passes the peak so the result never shrinks as
/// Δ grows. Non-finite or negative Δ counts as zero.
pub fn advance(def: &ProducerDefinition, prev: &ProducerState, elapsed: SimSeconds) -> ProducerUpdate {
    let elapsed = if elapsed.is_finite() && elapsed > 0.0 { elapsed } else { 0.0 };
    let capacity = def.capacity.max(0.0);
    let current = prev.current_output.clamp(0.0, capacity);

    if !prev.is_active {
        return ProducerUpdate { state: prev.clone(), credited: 0.0 };
    }

    let mut produced = def.rate_per_sec.max(0.0) * prev.worker_count as f64;
    if def.decay_rate > 0.0 {
        let effective = elapsed.min(1.0 / def.decay_rate);
        produced *= effective * (-def.decay_rate * effective).exp();
    } else {
        produced *= elapsed;
    }

    let new_output = (current + produced).min(capacity);
    let credited = (new_output - current).max(0.0);

    ProducerUpdate {
        state: ProducerState {
            id:               prev.id.clone(),
            last_update_time: prev.last_update_time + elapsed,
            current_output:   new_output,
            worker_count:     prev.worker_count,
            is_active:        prev.is_active,
        },
        credited,
    }
}

/// Result of replaying a wall-clock gap.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OfflineReport {
    pub gap_secs:     f64,
    pub applied_secs: f64,
    pub clamped:      bool,
    pub credits:      BTreeMap<ResourceId, f64>,
}

/// Owns every definition/state pair. One definition maps to exactly one state.
#[derive(Debug, Clone, Default)]
pub struct ProducerSimulator {
    definitions: BTreeMap<ProducerId, ProducerDefinition>,
    states:      BTreeMap<ProducerId, ProducerState>,
}

impl ProducerSimulator {
    pub fn new(catalog: &ProducerCatalog) -> Self {
        let definitions: BTreeMap<_, _> = catalog
            .definitions
            .iter()
            .map(|d| (d.id.clone(), d.clone()))
            .collect();
        let states = definitions
            .values()
            .map(|d| (d.id.clone(), ProducerState::from_definition(d, 0.0)))
            .collect();
        Self { definitions, states }
    }

    pub fn is_empty(&self) -> bool { self.definitions.is_empty() }

    pub fn state(&self, id: &str) -> Option<&ProducerState> {
        self.states.get(id)
    }

    pub fn states(&self) -> Vec<ProducerState> {
        self.states.values().cloned().collect()
    }

    pub fn set_active(&mut self, id: &str, active: bool) -> bool {
        match self.states.get_mut(id) {
            Some(state) => { state.is_active = active; true }
            None => false,
        }
    }

    pub fn set_workers(&mut self, id: &str, workers: u32) -> bool {
        match self.states.get_mut(id) {
            Some(state) => { state.worker_count = workers; true }
            None => false,
        }
    }

    /// Take an amount out of a producer's buffer (e.g. the player collected it).
    pub fn drain(&mut self, id: &str, amount: f64) -> f64 {
        let Some(state) = self.states.get_mut(id) else { return 0.0 };
        let taken = amount.max(0.0).min(state.current_output);
        state.current_output -= taken;
        taken
    }

    /// Replace runtime states with persisted ones. States without a
    /// definition are dropped; definitions without a state start fresh.
    pub fn restore(&mut self, persisted: Vec<ProducerState>) {
        let mut restored = BTreeMap::new();
        for state in persisted {
            match self.definitions.get(&state.id) {
                Some(def) => {
                    let mut state = state;
                    state.current_output = state.current_output.clamp(0.0, def.capacity.max(0.0));
                    restored.insert(state.id.clone(), state);
                }
                None => log::warn!("dropping persisted producer '{}' with no definition", state.id),
            }
        }
        for def in self.definitions.values() {
            restored
                .entry(def.id.clone())
                .or_insert_with(|| ProducerState::from_definition(def, 0.0));
        }
        self.states = restored;
    }

    /// Foreground tick: Δ is the caller's polling interval.
    pub fn tick(&mut self, elapsed: SimSeconds) -> BTreeMap<ResourceId, f64> {
        let mut credits = BTreeMap::new();
        for (id, state) in self.states.iter_mut() {
            let Some(def) = self.definitions.get(id) else { continue };
            let update = advance(def, state, elapsed);
            if update.credited > 0.0 {
                *credits.entry(def.output_resource.clone()).or_insert(0.0) += update.credited;
            }
            *state = update.state;
        }
        credits
    }

    /// Offline catch-up: Δ is the wall-clock gap, clamped to `max_offline_secs`.
    pub fn catch_up(&mut self, gap_secs: f64, max_offline_secs: f64) -> OfflineReport {
        let gap = if gap_secs.is_finite() { gap_secs.max(0.0) } else { 0.0 };
        let applied = gap.min(max_offline_secs.max(0.0));
        let credits = self.tick(applied);
        log::info!(
            "offline catch-up: gap={gap:.1}s applied={applied:.1}s resources={}",
            credits.len()
        );
        OfflineReport {
            gap_secs: gap,
            applied_secs: applied,
            clamped: applied < gap,
            credits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(rate: f64, capacity: f64, decay: f64) -> ProducerDefinition {
        ProducerDefinition {
            id: "mine".into(),
            output_resource: "ore".into(),
            rate_per_sec: rate,
            capacity,
            passive: true,
            worker_count: 1,
            decay_rate: decay,
        }
    }

    #[test]
    fn capacity_clamp_credits_exact_headroom() {
        let d = def(10.0, 100.0, 0.0);
        let mut s = ProducerState::from_definition(&d, 0.0);
        s.current_output = 20.0;
        let u = advance(&d, &s, 1000.0);
        assert_eq!(u.state.current_output, 100.0);
        assert_eq!(u.credited, 80.0);
        assert_eq!(u.state.last_update_time, 1000.0);
    }

    #[test]
    fn zero_elapsed_is_identity() {
        let d = def(3.0, 50.0, 0.1);
        let mut s = ProducerState::from_definition(&d, 12.5);
        s.current_output = 7.0;
        let u = advance(&d, &s, 0.0);
        assert_eq!(u.state, s);
        assert_eq!(u.credited, 0.0);
    }

    #[test]
    fn decay_is_monotonic_in_elapsed() {
        let d = def(1.0, 1e9, 0.5);
        let s = ProducerState::from_definition(&d, 0.0);
        let mut last = 0.0;
        for step in 0..100 {
            let out = advance(&d, &s, step as f64 * 0.25).state.current_output;
            assert!(out >= last, "output shrank at step {step}: {out} < {last}");
            last = out;
        }
    }

    #[test]
    fn decay_matches_formula_before_peak() {
        let d = def(2.0, 1e9, 0.1);
        let s = ProducerState::from_definition(&d, 0.0);
        let u = advance(&d, &s, 4.0);
        let expected = 2.0 * 4.0 * (-0.1f64 * 4.0).exp();
        assert!((u.credited - expected).abs() < 1e-12);
    }

    #[test]
    fn output_scales_with_worker_count_for_every_producer() {
        for passive in [true, false] {
            let mut d = def(1.0, 1000.0, 0.0);
            d.passive = passive;
            let mut s = ProducerState::from_definition(&d, 0.0);
            s.worker_count = 3;
            assert_eq!(advance(&d, &s, 10.0).credited, 30.0, "passive={passive}");
            s.worker_count = 0;
            assert_eq!(advance(&d, &s, 10.0).credited, 0.0, "passive={passive}");
        }
    }

    #[test]
    fn inactive_or_negative_elapsed_changes_nothing() {
        let d = def(1.0, 10.0, 0.0);
        let mut s = ProducerState::from_definition(&d, 5.0);
        assert_eq!(advance(&d, &s, -3.0).state, s);
        assert_eq!(advance(&d, &s, f64::NAN).state, s);
        s.is_active = false;
        assert_eq!(advance(&d, &s, 100.0).state, s);
    }
}
