//! Passive sonar: the per-team contact picture
//!
//! Friendly submarines are always shown exactly. Enemy submarines and
//! torpedoes are shown only when some live friendly submarine can hear
//! them, and then only coarsely: position snapped to the centre of the
//! terrain cell, heading rounded to the nearest 45 degrees.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::physics::PhysicsSystem;
use super::rules::Rules;
use super::state::{TeamId, TorpedoId, TorpedoState, UnitKey, UnitState};
use super::terrain::Terrain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContactKind {
    Friendly { unit: UnitKey },
    Submarine,
    Torpedo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SonarContact {
    #[serde(flatten)]
    pub kind: ContactKind,
    pub x: i64,
    pub y: i64,
    pub heading: i16,
}

/// Contact list shared by every submarine of one team
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SonarDisplayState {
    pub team: TeamId,
    pub contacts: Vec<SonarContact>,
}

pub struct SonarSystem;

impl SonarSystem {
    /// Build the display for `team` from the current tables
    pub fn display_for(
        team: TeamId,
        units: &BTreeMap<UnitKey, UnitState>,
        torpedoes: &BTreeMap<TorpedoId, TorpedoState>,
        terrain: &Terrain,
        rules: &Rules,
    ) -> SonarDisplayState {
        let listeners: Vec<&UnitState> = units
            .values()
            .filter(|u| u.team == team && !u.is_destroyed())
            .collect();

        let mut contacts: Vec<SonarContact> = listeners
            .iter()
            .map(|u| SonarContact {
                kind: ContactKind::Friendly { unit: u.key() },
                x: u.x,
                y: u.y,
                heading: u.heading,
            })
            .collect();

        let heard = |x: i64, y: i64, range: u32| {
            listeners
                .iter()
                .any(|l| PhysicsSystem::within_radius(l.x, l.y, x, y, range))
        };

        for enemy in units.values().filter(|u| u.team != team && !u.is_destroyed()) {
            if heard(enemy.x, enemy.y, Self::detection_range(enemy, rules)) {
                contacts.push(Self::obscure(ContactKind::Submarine, enemy.x, enemy.y, enemy.heading, terrain));
            }
        }

        let sonar_range = u32::from(rules.sonar_range);
        for torpedo in torpedoes.values().filter(|t| t.owner.team != team) {
            if heard(torpedo.x, torpedo.y, sonar_range) {
                contacts.push(Self::obscure(
                    ContactKind::Torpedo,
                    torpedo.x,
                    torpedo.y,
                    torpedo.heading,
                    terrain,
                ));
            }
        }

        SonarDisplayState { team, contacts }
    }

    /// Boats above the noise floor are heard at full range, quiet ones at
    /// half. Stealth only quiets a boat once it has slowed to the stealth
    /// speed limit.
    pub fn detection_range(unit: &UnitState, rules: &Rules) -> u32 {
        let noisy = unit.speed > rules.passive_sonar_noise_floor;
        let loud = noisy && (!unit.stealth || unit.speed > rules.stealth_speed_limit);
        if loud {
            u32::from(rules.sonar_range)
        } else {
            u32::from(rules.sonar_range) / 2
        }
    }

    fn obscure(kind: ContactKind, x: i64, y: i64, heading: i16, terrain: &Terrain) -> SonarContact {
        let (x, y) = terrain.snap_to_cell(x, y);
        SonarContact {
            kind,
            x,
            y,
            heading: Self::coarse_heading(heading),
        }
    }

    /// Nearest multiple of 45 degrees
    pub fn coarse_heading(heading: i16) -> i16 {
        PhysicsSystem::normalize_heading((i32::from(heading) + 22) / 45 * 45)
    }
}
