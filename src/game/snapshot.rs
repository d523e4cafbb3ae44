//! Change tracking for outbound views

use std::collections::{BTreeMap, HashMap};

use crate::bus::Outbound;
use crate::ws::protocol::ServerMsg;

use super::sonar::SonarDisplayState;
use super::state::{TeamId, UnitKey, UnitState};

/// Remembers the last view sent for every unit and team so a tick only
/// publishes what changed
#[derive(Debug, Default)]
pub struct ChangeTracker {
    units: HashMap<UnitKey, UnitState>,
    sonar: HashMap<TeamId, SonarDisplayState>,
    stats: TrackerStats,
}

/// Counters for debugging bandwidth
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrackerStats {
    pub sent: u64,
    pub suppressed: u64,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unit views for every unit whose state differs from the last send,
    /// addressed to the unit's own team
    pub fn unit_views(&mut self, tick: u64, units: &BTreeMap<UnitKey, UnitState>) -> Vec<Outbound> {
        let mut out = Vec::new();
        for (key, unit) in units {
            if self.units.get(key) == Some(unit) {
                self.stats.suppressed += 1;
                continue;
            }
            self.units.insert(*key, unit.clone());
            self.stats.sent += 1;
            out.push(Outbound::team(
                unit.team,
                ServerMsg::UnitState {
                    tick,
                    state: unit.clone(),
                },
            ));
        }
        out
    }

    /// Sonar displays that differ from the last one sent to their team
    pub fn sonar_views(&mut self, tick: u64, displays: Vec<SonarDisplayState>) -> Vec<Outbound> {
        let mut out = Vec::new();
        for display in displays {
            if self.sonar.get(&display.team) == Some(&display) {
                self.stats.suppressed += 1;
                continue;
            }
            self.sonar.insert(display.team, display.clone());
            self.stats.sent += 1;
            out.push(Outbound::team(display.team, ServerMsg::SonarDisplay { tick, display }));
        }
        out
    }

    /// Drop all memory so the next tick resends everything
    pub fn force_next(&mut self) {
        self.units.clear();
        self.sonar.clear();
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }
}
