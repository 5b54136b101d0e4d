//! Reconciliation of optimistic power-transition flags against the power
//! states the region store pushes out of band.

use std::collections::HashMap;

use shared::domain::{PowerState, SystemId};
use shared::protocol::Machine;

/// Remembers the last observed `(system_id, power_state)` pairs and reports
/// which machines changed between observations. Each id is compared
/// independently, so observation order never matters.
#[derive(Debug, Default)]
pub struct PowerWatcher {
    previous: HashMap<SystemId, PowerState>,
}

impl PowerWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diffs `machines` against the previous snapshot and replaces it.
    /// Returns the ids whose power state changed; machines seen for the
    /// first time are recorded but not reported. Entries for machines no
    /// longer present are dropped.
    pub fn observe(&mut self, machines: &[Machine]) -> Vec<SystemId> {
        let mut changed = Vec::new();
        let mut next = HashMap::with_capacity(machines.len());
        for machine in machines {
            if let Some(previous) = self.previous.get(&machine.system_id) {
                if *previous != machine.power_state {
                    changed.push(machine.system_id.clone());
                }
            }
            next.insert(machine.system_id.clone(), machine.power_state);
        }
        self.previous = next;
        changed
    }
}
