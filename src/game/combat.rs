//! Combat system - torpedo runs, mine triggers, damage bookkeeping

use std::collections::BTreeMap;

use super::physics::PhysicsSystem;
use super::rules::Rules;
use super::state::{MineId, MineState, TorpedoState, UnitKey, UnitState};
use super::terrain::Terrain;

/// How a torpedo's tick ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorpedoOutcome {
    /// Still running
    Running,
    /// Ran out of lifetime
    Expired,
    /// Struck a submarine
    Hit(UnitKey),
    /// Struck a mine, setting it off
    MineStrike(MineId),
    /// Ran into a wall or off the map
    Grounded,
}

impl TorpedoState {
    /// Move one tick along the heading and burn one tick of lifetime.
    /// Returns false once the lifetime is spent.
    pub fn advance(&mut self) -> bool {
        let (x, y) = PhysicsSystem::advance(self.x, self.y, self.heading, f64::from(self.speed));
        self.x = x;
        self.y = y;
        self.lifetime = self.lifetime.saturating_sub(1);
        self.lifetime > 0
    }
}

/// Combat system for weapons and damage
pub struct CombatSystem;

impl CombatSystem {
    /// Headings for a salvo of `count` torpedoes fanned symmetrically
    /// around `heading`, `spread` degrees apart
    pub fn salvo_headings(heading: i16, count: usize, spread: u16) -> Vec<i16> {
        let spread = i32::from(spread);
        let last = count as i32 - 1;
        (0..count as i32)
            .map(|i| {
                let offset = spread * (2 * i - last) / 2;
                PhysicsSystem::normalize_heading(i32::from(heading) + offset)
            })
            .collect()
    }

    /// Resolve a torpedo that has just advanced. Units are checked before
    /// mines, mines before terrain; destroyed units and the firer are
    /// ignored. Iteration follows the tables' key order.
    pub fn resolve_torpedo(
        torpedo: &TorpedoState,
        still_running: bool,
        units: &BTreeMap<UnitKey, UnitState>,
        mines: &BTreeMap<MineId, MineState>,
        terrain: &Terrain,
        rules: &Rules,
    ) -> TorpedoOutcome {
        if !still_running {
            return TorpedoOutcome::Expired;
        }

        let radius = u32::from(rules.collision_radius);

        let struck = units.values().find(|u| {
            u.key() != torpedo.owner
                && !u.is_destroyed()
                && PhysicsSystem::within_radius(torpedo.x, torpedo.y, u.x, u.y, radius)
        });
        if let Some(unit) = struck {
            return TorpedoOutcome::Hit(unit.key());
        }

        let mine = mines
            .values()
            .find(|m| PhysicsSystem::within_radius(torpedo.x, torpedo.y, m.x, m.y, radius));
        if let Some(mine) = mine {
            return TorpedoOutcome::MineStrike(mine.id);
        }

        if terrain.is_blocked(torpedo.x, torpedo.y) {
            return TorpedoOutcome::Grounded;
        }

        TorpedoOutcome::Running
    }

    /// Live units close enough to set off an armed mine
    pub fn mine_victims(
        mine: &MineState,
        units: &BTreeMap<UnitKey, UnitState>,
        rules: &Rules,
    ) -> Vec<UnitKey> {
        if !mine.armed {
            return Vec::new();
        }
        let radius = u32::from(rules.mine_exclusion_radius);
        units
            .values()
            .filter(|u| !u.is_destroyed() && PhysicsSystem::within_radius(mine.x, mine.y, u.x, u.y, radius))
            .map(UnitState::key)
            .collect()
    }

    /// Whether a laid mine may arm: its layer is clear of the exclusion
    /// radius, gone, or destroyed
    pub fn mine_ready_to_arm(mine: &MineState, units: &BTreeMap<UnitKey, UnitState>, rules: &Rules) -> bool {
        let Some(owner) = mine.owner else {
            return true;
        };
        match units.get(&owner) {
            Some(layer) if !layer.is_destroyed() => !PhysicsSystem::within_radius(
                mine.x,
                mine.y,
                layer.x,
                layer.y,
                u32::from(rules.mine_exclusion_radius),
            ),
            _ => true,
        }
    }
}

/// Damage accumulated over one tick. Every hit counts; health is clamped
/// once, when the ledger is applied.
#[derive(Debug, Default)]
pub struct DamageLedger {
    pending: BTreeMap<UnitKey, i32>,
}

impl DamageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, target: UnitKey, amount: u16) {
        *self.pending.entry(target).or_insert(0) += i32::from(amount);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Apply all pending damage; returns the units destroyed by it
    pub fn apply(self, units: &mut BTreeMap<UnitKey, UnitState>) -> Vec<UnitKey> {
        let mut destroyed = Vec::new();
        for (key, amount) in self.pending {
            let Some(unit) = units.get_mut(&key) else {
                continue;
            };
            if unit.is_destroyed() {
                continue;
            }
            let remaining = i32::from(unit.health) - amount;
            unit.health = remaining.max(0) as u16;
            if unit.is_destroyed() {
                destroyed.push(key);
            }
        }
        destroyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::TorpedoId;

    fn rules() -> Rules {
        Rules {
            collision_radius: 100,
            mine_exclusion_radius: 300,
            ..Rules::default()
        }
    }

    fn units_at(positions: &[(UnitKey, i64, i64)]) -> BTreeMap<UnitKey, UnitState> {
        positions
            .iter()
            .map(|&(key, x, y)| (key, UnitState::spawn(key, (x, y), &rules())))
            .collect()
    }

    fn torpedo(owner: UnitKey, x: i64, y: i64) -> TorpedoState {
        TorpedoState {
            id: TorpedoId(1),
            owner,
            x,
            y,
            heading: 0,
            speed: 50,
            lifetime: 10,
        }
    }

    #[test]
    fn salvo_fans_symmetrically() {
        assert_eq!(CombatSystem::salvo_headings(90, 1, 10), vec![90]);
        assert_eq!(CombatSystem::salvo_headings(90, 3, 10), vec![80, 90, 100]);
        assert_eq!(CombatSystem::salvo_headings(0, 2, 10), vec![355, 5]);
    }

    #[test]
    fn torpedo_advance_burns_lifetime() {
        let mut t = torpedo(UnitKey::new(0, 0), 0, 0);
        t.lifetime = 2;
        assert!(t.advance());
        assert_eq!((t.x, t.y), (50, 0));
        assert!(!t.advance());
    }

    #[test]
    fn torpedo_ignores_its_firer() {
        let firer = UnitKey::new(0, 0);
        let terrain = Terrain::open(10, 10, 1000).unwrap();
        let units = units_at(&[(firer, 500, 500)]);
        let outcome = CombatSystem::resolve_torpedo(
            &torpedo(firer, 500, 500),
            true,
            &units,
            &BTreeMap::new(),
            &terrain,
            &rules(),
        );
        assert_eq!(outcome, TorpedoOutcome::Running);
    }

    #[test]
    fn torpedo_hits_unit_before_mine() {
        let firer = UnitKey::new(0, 0);
        let target = UnitKey::new(1, 0);
        let terrain = Terrain::open(10, 10, 1000).unwrap();
        let units = units_at(&[(firer, 0, 0), (target, 550, 500)]);
        let mut mines = BTreeMap::new();
        mines.insert(
            MineId(4),
            MineState {
                id: MineId(4),
                owner: None,
                x: 500,
                y: 520,
                armed: true,
            },
        );

        let outcome =
            CombatSystem::resolve_torpedo(&torpedo(firer, 500, 500), true, &units, &mines, &terrain, &rules());
        assert_eq!(outcome, TorpedoOutcome::Hit(target));

        let no_units = units_at(&[(firer, 0, 0)]);
        let outcome =
            CombatSystem::resolve_torpedo(&torpedo(firer, 500, 500), true, &no_units, &mines, &terrain, &rules());
        assert_eq!(outcome, TorpedoOutcome::MineStrike(MineId(4)));
    }

    #[test]
    fn torpedo_grounds_off_the_map() {
        let firer = UnitKey::new(0, 0);
        let terrain = Terrain::open(2, 2, 1000).unwrap();
        let units = units_at(&[(firer, 0, 0)]);
        let outcome = CombatSystem::resolve_torpedo(
            &torpedo(firer, 2500, 500),
            true,
            &units,
            &BTreeMap::new(),
            &terrain,
            &rules(),
        );
        assert_eq!(outcome, TorpedoOutcome::Grounded);
    }

    #[test]
    fn destroyed_units_are_not_targets() {
        let firer = UnitKey::new(0, 0);
        let target = UnitKey::new(1, 0);
        let terrain = Terrain::open(10, 10, 1000).unwrap();
        let mut units = units_at(&[(firer, 0, 0), (target, 500, 500)]);
        units.get_mut(&target).unwrap().health = 0;
        let outcome = CombatSystem::resolve_torpedo(
            &torpedo(firer, 500, 500),
            true,
            &units,
            &BTreeMap::new(),
            &terrain,
            &rules(),
        );
        assert_eq!(outcome, TorpedoOutcome::Running);
    }

    #[test]
    fn laid_mine_waits_for_layer_to_clear() {
        let layer = UnitKey::new(0, 0);
        let mut units = units_at(&[(layer, 0, 0)]);
        let mine = MineState {
            id: MineId(1),
            owner: Some(layer),
            x: 0,
            y: 0,
            armed: false,
        };
        assert!(!CombatSystem::mine_ready_to_arm(&mine, &units, &rules()));
        units.get_mut(&layer).unwrap().x = 301;
        assert!(CombatSystem::mine_ready_to_arm(&mine, &units, &rules()));
        assert!(CombatSystem::mine_victims(&mine, &units, &rules()).is_empty());
    }

    #[test]
    fn ledger_accumulates_then_clamps() {
        let target = UnitKey::new(1, 0);
        let mut units = units_at(&[(target, 0, 0)]);
        let mut ledger = DamageLedger::new();
        ledger.record(target, 60);
        ledger.record(target, 60);

        let destroyed = ledger.apply(&mut units);
        assert_eq!(destroyed, vec![target]);
        assert_eq!(units[&target].health, 0);
    }
}
