//! Authoritative per-entity state: submarines, torpedoes and mines

use serde::{Deserialize, Serialize};

use super::rules::Rules;

pub type TeamId = u32;
pub type UnitId = u32;

/// A submarine's identity within the match
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitKey {
    pub team: TeamId,
    pub unit: UnitId,
}

impl UnitKey {
    pub const fn new(team: TeamId, unit: UnitId) -> Self {
        Self { team, unit }
    }
}

impl std::fmt::Display for UnitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.team, self.unit)
    }
}

/// Match-unique torpedo identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TorpedoId(pub u64);

/// Match-unique mine identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MineId(pub u64);

/// What a tube is armed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaponKind {
    Torpedo,
    Mine,
}

/// Load-state machine of one weapon tube:
/// EMPTY -> LOADING -> LOADED <-> ARMED, and ARMED -> EMPTY on fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TubeState {
    Empty,
    Loading { remaining: u16 },
    Loaded,
    Armed { weapon: WeaponKind },
}

/// Authoritative submarine state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitState {
    pub team: TeamId,
    pub unit: UnitId,

    // Kinematics
    pub x: i64,
    pub y: i64,
    /// Degrees in [0, 360), 0 = +x, counter-clockwise
    pub heading: i16,
    pub speed: u16,

    // Helm intent, consumed by the tick loop
    pub target_speed: u16,
    pub target_heading: i16,

    // Condition
    pub health: u16,
    pub stealth: bool,
    pub stealth_cooldown: u16,
    pub respawn_cooldown: u16,

    pub tubes: Vec<TubeState>,
}

impl UnitState {
    /// Fresh submarine at rest at `position`
    pub fn spawn(key: UnitKey, position: (i64, i64), rules: &Rules) -> Self {
        Self {
            team: key.team,
            unit: key.unit,
            x: position.0,
            y: position.1,
            heading: 0,
            speed: 0,
            target_speed: 0,
            target_heading: 0,
            health: rules.max_health,
            stealth: false,
            stealth_cooldown: 0,
            respawn_cooldown: 0,
            tubes: vec![TubeState::Empty; usize::from(rules.tubes_per_unit)],
        }
    }

    #[inline]
    pub fn key(&self) -> UnitKey {
        UnitKey::new(self.team, self.unit)
    }

    /// At zero health the unit sits out its respawn cooldown
    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.health == 0
    }

    /// Number of tubes armed with `kind`
    pub fn armed_count(&self, kind: WeaponKind) -> u16 {
        self.tubes
            .iter()
            .filter(|t| matches!(t, TubeState::Armed { weapon } if *weapon == kind))
            .count() as u16
    }

    /// Bit `i` set when tube `i` is armed
    pub fn armed_mask(&self) -> u16 {
        self.tubes
            .iter()
            .enumerate()
            .filter(|(_, t)| matches!(t, TubeState::Armed { .. }))
            .fold(0, |mask, (i, _)| mask | (1 << i))
    }

    /// Drop all tube state and stealth, used on destruction and respawn
    pub fn clear_weapons(&mut self) {
        for tube in &mut self.tubes {
            *tube = TubeState::Empty;
        }
        self.stealth = false;
    }
}

/// A torpedo in the water
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorpedoState {
    pub id: TorpedoId,
    pub owner: UnitKey,
    pub x: i64,
    pub y: i64,
    pub heading: i16,
    /// Units per tick
    pub speed: u16,
    /// Ticks left before the torpedo is lost
    pub lifetime: u16,
}

/// A laid or map-placed mine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MineState {
    pub id: MineId,
    /// `None` for mines placed by the map
    pub owner: Option<UnitKey>,
    pub x: i64,
    pub y: i64,
    pub armed: bool,
}
