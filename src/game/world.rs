//! Match state and authoritative tick step
//!
//! Everything here runs under the engine's state lock. Command methods
//! change intent or tube state only; positions move in [`World::step`].

use std::collections::{BTreeMap, BTreeSet};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::bus::Outbound;
use crate::ws::protocol::{FlagMarker, ServerMsg, TorpedoEnd};

use super::combat::{CombatSystem, DamageLedger, TorpedoOutcome};
use super::ids::IdCounter;
use super::physics::PhysicsSystem;
use super::rules::Rules;
use super::snapshot::{ChangeTracker, TrackerStats};
use super::sonar::SonarSystem;
use super::state::{
    MineId, MineState, TeamId, TorpedoId, TorpedoState, TubeState, UnitKey, UnitState, WeaponKind,
};
use super::terrain::GameConfig;

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Lobby handed off, waiting for the start signal
    AwaitingStart,
    /// Tick loop is advancing the world
    Running,
}

/// Why a command was refused. Refusals never mutate state.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    #[error("sender does not crew this unit")]
    NotOwner,

    #[error("sender holds no seat in this match")]
    NotSeated,

    #[error("simulation is not running")]
    NotRunning,

    #[error("simulation is already running")]
    AlreadyRunning,

    #[error("unit {0} is not in play")]
    UnknownUnit(UnitKey),

    #[error("no free start location for unit {0}")]
    NoStartLocation(UnitKey),

    #[error("unit is destroyed")]
    UnitDestroyed,

    #[error("no tube {0}")]
    InvalidTube(u8),

    #[error("tube {0} is not empty")]
    TubeNotEmpty(u8),

    #[error("tube {0} is not loaded")]
    TubeNotLoaded(u8),

    #[error("tube {0} is not armed")]
    TubeNotArmed(u8),

    #[error("{0:?} capacity reached")]
    CapacityExceeded(WeaponKind),

    #[error("no selected tube is armed")]
    NothingArmed,

    #[error("stealth is cooling down")]
    StealthCooldown,
}

/// Authoritative simulation tables for one match
pub struct World {
    phase: MatchPhase,
    tick: u64,
    units: BTreeMap<UnitKey, UnitState>,
    torpedoes: BTreeMap<TorpedoId, TorpedoState>,
    mines: BTreeMap<MineId, MineState>,
    torpedo_ids: IdCounter,
    mine_ids: IdCounter,
    rng: ChaCha8Rng,
    tracker: ChangeTracker,
}

impl World {
    pub fn new(seed: u64) -> Self {
        Self {
            phase: MatchPhase::AwaitingStart,
            tick: 0,
            units: BTreeMap::new(),
            torpedoes: BTreeMap::new(),
            mines: BTreeMap::new(),
            torpedo_ids: IdCounter::new(),
            mine_ids: IdCounter::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            tracker: ChangeTracker::new(),
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn unit(&self, key: UnitKey) -> Option<&UnitState> {
        self.units.get(&key)
    }

    pub fn units(&self) -> &BTreeMap<UnitKey, UnitState> {
        &self.units
    }

    pub fn torpedoes(&self) -> &BTreeMap<TorpedoId, TorpedoState> {
        &self.torpedoes
    }

    pub fn mines(&self) -> &BTreeMap<MineId, MineState> {
        &self.mines
    }

    pub fn torpedo_ids_issued(&self) -> u64 {
        self.torpedo_ids.issued()
    }

    pub fn mine_ids_issued(&self) -> u64 {
        self.mine_ids.issued()
    }

    pub fn tracker_stats(&self) -> TrackerStats {
        self.tracker.stats()
    }

    /// Spawn every rostered unit at its start location, lay the map's
    /// mines and begin running
    pub fn start(&mut self, config: &GameConfig, roster: &BTreeSet<UnitKey>) -> Result<Vec<Outbound>, Rejection> {
        if self.phase == MatchPhase::Running {
            return Err(Rejection::AlreadyRunning);
        }

        // Unit `u` prefers start `u % n`; a taken start passes it on to the
        // next free one, so no two units share a spawn point
        let mut taken: BTreeSet<(i64, i64)> = BTreeSet::new();
        let mut placements = Vec::with_capacity(roster.len());
        for key in roster {
            let starts = config
                .start_locations
                .get(&key.team)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let preferred = key.unit as usize;
            let position = (0..starts.len())
                .map(|i| starts[(preferred + i) % starts.len()])
                .find(|pos| !taken.contains(pos))
                .ok_or(Rejection::NoStartLocation(*key))?;
            taken.insert(position);
            placements.push((*key, position));
        }

        for (key, position) in placements {
            self.units.insert(key, UnitState::spawn(key, position, &config.rules));
        }

        let mut out = Vec::new();
        let flags = config
            .flags
            .iter()
            .flat_map(|(team, spots)| spots.iter().map(move |&(x, y)| FlagMarker { team: *team, x, y }))
            .collect();
        out.push(Outbound::all(ServerMsg::SimulationStarted {
            tick: self.tick,
            flags,
        }));

        for &(x, y) in &config.mines {
            let id = MineId(self.mine_ids.allocate());
            let mine = MineState {
                id,
                owner: None,
                x,
                y,
                armed: true,
            };
            out.push(Outbound::all(ServerMsg::MineState {
                tick: self.tick,
                mine: mine.clone(),
            }));
            self.mines.insert(id, mine);
        }

        self.phase = MatchPhase::Running;
        self.tracker.force_next();
        out.extend(self.publish_views(config));

        info!(
            units = self.units.len(),
            mines = self.mines.len(),
            "Simulation started"
        );
        Ok(out)
    }

    fn live_unit(&mut self, key: UnitKey) -> Result<&mut UnitState, Rejection> {
        if self.phase != MatchPhase::Running {
            return Err(Rejection::NotRunning);
        }
        let unit = self.units.get_mut(&key).ok_or(Rejection::UnknownUnit(key))?;
        if unit.is_destroyed() {
            return Err(Rejection::UnitDestroyed);
        }
        Ok(unit)
    }

    /// Store a clamped speed target for the next acceleration step
    pub fn set_throttle(&mut self, key: UnitKey, requested: i32, rules: &Rules) -> Result<(), Rejection> {
        let unit = self.live_unit(key)?;
        let limit = rules.speed_limit(unit.stealth);
        unit.target_speed = requested.clamp(0, i32::from(limit)) as u16;
        trace!(team = key.team, unit = key.unit, target_speed = unit.target_speed, "Throttle set");
        Ok(())
    }

    /// Add a heading change (clamped to half a turn) to the steering target
    pub fn steer(&mut self, key: UnitKey, direction: i32) -> Result<(), Rejection> {
        let unit = self.live_unit(key)?;
        let delta = direction.clamp(-180, 180);
        unit.target_heading = PhysicsSystem::normalize_heading(i32::from(unit.target_heading) + delta);
        trace!(team = key.team, unit = key.unit, target_heading = unit.target_heading, "Steering set");
        Ok(())
    }

    pub fn set_stealth(&mut self, key: UnitKey, engaged: bool, rules: &Rules) -> Result<(), Rejection> {
        let unit = self.live_unit(key)?;
        if engaged {
            if unit.stealth_cooldown > 0 {
                return Err(Rejection::StealthCooldown);
            }
            unit.stealth = true;
            unit.target_speed = unit.target_speed.min(rules.speed_limit(true));
        } else {
            unit.stealth = false;
        }
        debug!(team = key.team, unit = key.unit, engaged, "Stealth toggled");
        Ok(())
    }

    /// EMPTY -> LOADING
    pub fn tube_load(&mut self, key: UnitKey, tube: u8, rules: &Rules) -> Result<(), Rejection> {
        let unit = self.live_unit(key)?;
        let slot = unit
            .tubes
            .get_mut(usize::from(tube))
            .ok_or(Rejection::InvalidTube(tube))?;
        if *slot != TubeState::Empty {
            return Err(Rejection::TubeNotEmpty(tube));
        }
        *slot = TubeState::Loading {
            remaining: rules.tube_load_ticks,
        };
        debug!(team = key.team, unit = key.unit, tube, "Tube loading");
        Ok(())
    }

    /// LOADED -> ARMED when `armed`, ARMED -> LOADED otherwise
    pub fn tube_arm(
        &mut self,
        key: UnitKey,
        tube: u8,
        weapon: WeaponKind,
        armed: bool,
        rules: &Rules,
    ) -> Result<(), Rejection> {
        let unit = self.live_unit(key)?;
        let idx = usize::from(tube);
        let current = *unit.tubes.get(idx).ok_or(Rejection::InvalidTube(tube))?;

        if armed {
            if current != TubeState::Loaded {
                return Err(Rejection::TubeNotLoaded(tube));
            }
            if unit.armed_count(weapon) >= rules.arm_capacity(weapon) {
                return Err(Rejection::CapacityExceeded(weapon));
            }
            unit.tubes[idx] = TubeState::Armed { weapon };
        } else {
            if !matches!(current, TubeState::Armed { .. }) {
                return Err(Rejection::TubeNotArmed(tube));
            }
            unit.tubes[idx] = TubeState::Loaded;
        }
        debug!(team = key.team, unit = key.unit, tube, ?weapon, armed, "Tube arm state changed");
        Ok(())
    }

    /// Launch every armed tube selected by `mask`
    pub fn fire(&mut self, key: UnitKey, mask: u16, rules: &Rules) -> Result<Vec<Outbound>, Rejection> {
        let (x, y, heading, selected) = {
            let unit = self.live_unit(key)?;
            let selected: Vec<(usize, WeaponKind)> = unit
                .tubes
                .iter()
                .enumerate()
                .filter_map(|(i, tube)| match tube {
                    TubeState::Armed { weapon } if mask & (1u16 << i) != 0 => Some((i, *weapon)),
                    _ => None,
                })
                .collect();
            if selected.is_empty() {
                return Err(Rejection::NothingArmed);
            }
            for (i, _) in &selected {
                unit.tubes[*i] = TubeState::Empty;
            }
            unit.stealth = false;
            unit.stealth_cooldown = rules.stealth_cooldown;
            (unit.x, unit.y, unit.heading, selected)
        };

        let torpedo_count = selected
            .iter()
            .filter(|(_, w)| *w == WeaponKind::Torpedo)
            .count();
        let mut headings =
            CombatSystem::salvo_headings(heading, torpedo_count, rules.torpedo_spread).into_iter();

        let mut out = Vec::new();
        for (tube, weapon) in selected {
            match weapon {
                WeaponKind::Torpedo => {
                    let id = TorpedoId(self.torpedo_ids.allocate());
                    let torpedo = TorpedoState {
                        id,
                        owner: key,
                        x,
                        y,
                        heading: headings.next().unwrap_or(heading),
                        speed: rules.torpedo_speed,
                        lifetime: rules.torpedo_lifetime,
                    };
                    info!(team = key.team, unit = key.unit, tube, torpedo_id = id.0, "Torpedo launched");
                    out.push(Outbound::all(ServerMsg::TorpedoLaunched {
                        id,
                        owner: key,
                        x,
                        y,
                        heading: torpedo.heading,
                    }));
                    out.push(Outbound::team(
                        key.team,
                        ServerMsg::TorpedoState {
                            tick: self.tick,
                            torpedo: torpedo.clone(),
                        },
                    ));
                    self.torpedoes.insert(id, torpedo);
                }
                WeaponKind::Mine => {
                    let id = MineId(self.mine_ids.allocate());
                    let mine = MineState {
                        id,
                        owner: Some(key),
                        x,
                        y,
                        armed: false,
                    };
                    info!(team = key.team, unit = key.unit, tube, mine_id = id.0, "Mine laid");
                    out.push(Outbound::all(ServerMsg::MineLaid { id, owner: key, x, y }));
                    out.push(Outbound::team(
                        key.team,
                        ServerMsg::MineState {
                            tick: self.tick,
                            mine: mine.clone(),
                        },
                    ));
                    self.mines.insert(id, mine);
                }
            }
        }
        Ok(out)
    }

    /// Advance the world one tick and return what changed
    pub fn step(&mut self, config: &GameConfig) -> Vec<Outbound> {
        if self.phase != MatchPhase::Running {
            return Vec::new();
        }
        self.tick += 1;

        let mut out = Vec::new();
        let mut ledger = DamageLedger::new();

        self.update_timers(config, &mut out);
        self.update_movement(config, &mut ledger);
        self.update_torpedoes(config, &mut ledger, &mut out);
        self.update_mines(&config.rules, &mut ledger, &mut out);
        self.apply_damage(ledger, &config.rules, &mut out);
        out.extend(self.publish_views(config));

        trace!(tick = self.tick, outbound = out.len(), "Tick complete");
        out
    }

    /// Respawn countdowns, stealth cooldowns and tube loading
    fn update_timers(&mut self, config: &GameConfig, out: &mut Vec<Outbound>) {
        let mut due = Vec::new();
        for unit in self.units.values_mut() {
            if unit.is_destroyed() {
                if unit.respawn_cooldown > 1 {
                    unit.respawn_cooldown -= 1;
                } else {
                    due.push(unit.key());
                }
                continue;
            }

            unit.stealth_cooldown = unit.stealth_cooldown.saturating_sub(1);
            for tube in &mut unit.tubes {
                if let TubeState::Loading { remaining } = *tube {
                    *tube = if remaining <= 1 {
                        TubeState::Loaded
                    } else {
                        TubeState::Loading {
                            remaining: remaining - 1,
                        }
                    };
                }
            }
        }

        for key in due {
            self.respawn(key, config, out);
        }
    }

    /// Bring a destroyed unit back at a random start location of its team
    /// that no live unit overlaps. With every start covered the unit waits
    /// and tries again next tick.
    fn respawn(&mut self, key: UnitKey, config: &GameConfig, out: &mut Vec<Outbound>) {
        let radius = u32::from(config.rules.collision_radius);
        let free: Vec<(i64, i64)> = config
            .start_locations
            .get(&key.team)
            .into_iter()
            .flatten()
            .copied()
            .filter(|&(x, y)| {
                !self.units.values().any(|u| {
                    u.key() != key && !u.is_destroyed() && PhysicsSystem::within_radius(x, y, u.x, u.y, radius)
                })
            })
            .collect();

        if free.is_empty() {
            debug!(team = key.team, unit = key.unit, "Every start location occupied, respawn deferred");
            return;
        }
        let position = free[self.rng.gen_range(0..free.len())];

        self.units.insert(key, UnitState::spawn(key, position, &config.rules));
        info!(team = key.team, unit = key.unit, x = position.0, y = position.1, "Unit respawned");
        out.push(Outbound::all(ServerMsg::UnitRespawned {
            unit: key,
            x: position.0,
            y: position.1,
        }));
    }

    /// Integrate heading, speed and position, then resolve groundings and
    /// unit-on-unit collisions
    fn update_movement(&mut self, config: &GameConfig, ledger: &mut DamageLedger) {
        let rules = &config.rules;
        let mut previous: BTreeMap<UnitKey, (i64, i64)> = BTreeMap::new();

        for unit in self.units.values_mut().filter(|u| !u.is_destroyed()) {
            unit.heading = PhysicsSystem::turn_toward(unit.heading, unit.target_heading, rules.sub_turning_speed);
            unit.speed = PhysicsSystem::approach_speed(unit.speed, unit.target_speed, rules.sub_acceleration);

            let distance = PhysicsSystem::frame_distance(unit.speed, rules.frame_milliseconds);
            let (x, y) = PhysicsSystem::advance(unit.x, unit.y, unit.heading, distance);
            if (x, y) == (unit.x, unit.y) {
                continue;
            }

            if config.terrain.is_blocked(x, y) {
                unit.speed = 0;
                unit.target_speed = 0;
                ledger.record(unit.key(), rules.collision_damage);
                debug!(team = unit.team, unit = unit.unit, x, y, "Unit ran aground");
                continue;
            }

            previous.insert(unit.key(), (unit.x, unit.y));
            unit.x = x;
            unit.y = y;
        }

        let live: Vec<(UnitKey, i64, i64)> = self
            .units
            .values()
            .filter(|u| !u.is_destroyed())
            .map(|u| (u.key(), u.x, u.y))
            .collect();
        let radius = u32::from(rules.collision_radius);

        let mut rammed = BTreeSet::new();
        for (i, &(a, ax, ay)) in live.iter().enumerate() {
            for &(b, bx, by) in &live[i + 1..] {
                let (pax, pay) = previous.get(&a).copied().unwrap_or((ax, ay));
                let (pbx, pby) = previous.get(&b).copied().unwrap_or((bx, by));
                // Only a closing move inside the radius is a collision, so
                // overlapping units can still back away from each other
                let closing =
                    PhysicsSystem::distance_sq(ax, ay, bx, by) < PhysicsSystem::distance_sq(pax, pay, pbx, pby);
                if closing && PhysicsSystem::within_radius(ax, ay, bx, by, radius) {
                    ledger.record(a, rules.collision_damage);
                    ledger.record(b, rules.collision_damage);
                    rammed.insert(a);
                    rammed.insert(b);
                    debug!(first = %a, second = %b, "Units collided");
                }
            }
        }

        for key in rammed {
            if let Some(unit) = self.units.get_mut(&key) {
                if let Some(&(x, y)) = previous.get(&key) {
                    unit.x = x;
                    unit.y = y;
                }
                unit.speed = 0;
                unit.target_speed = 0;
            }
        }
    }

    fn update_torpedoes(&mut self, config: &GameConfig, ledger: &mut DamageLedger, out: &mut Vec<Outbound>) {
        let rules = &config.rules;
        let ids: Vec<TorpedoId> = self.torpedoes.keys().copied().collect();

        for id in ids {
            let Some(torpedo) = self.torpedoes.get_mut(&id) else {
                continue;
            };
            let running = torpedo.advance();
            let outcome =
                CombatSystem::resolve_torpedo(torpedo, running, &self.units, &self.mines, &config.terrain, rules);

            let (cause, target) = match outcome {
                TorpedoOutcome::Running => {
                    out.push(Outbound::team(
                        torpedo.owner.team,
                        ServerMsg::TorpedoState {
                            tick: self.tick,
                            torpedo: torpedo.clone(),
                        },
                    ));
                    continue;
                }
                TorpedoOutcome::Expired => (TorpedoEnd::Expired, None),
                TorpedoOutcome::Grounded => (TorpedoEnd::Grounded, None),
                TorpedoOutcome::Hit(target) => {
                    ledger.record(target, rules.torpedo_damage);
                    (TorpedoEnd::Hit, Some(target))
                }
                TorpedoOutcome::MineStrike(mine_id) => {
                    if let Some(mine) = self.mines.remove(&mine_id) {
                        info!(mine_id = mine_id.0, torpedo_id = id.0, "Mine detonated by torpedo");
                        out.push(Outbound::all(ServerMsg::MineDetonated {
                            id: mine_id,
                            x: mine.x,
                            y: mine.y,
                        }));
                    }
                    (TorpedoEnd::MineStrike, None)
                }
            };

            let (x, y) = (torpedo.x, torpedo.y);
            self.torpedoes.remove(&id);
            debug!(torpedo_id = id.0, ?cause, "Torpedo removed");
            out.push(Outbound::all(ServerMsg::TorpedoRemoved {
                id,
                x,
                y,
                cause,
                target,
            }));
        }
    }

    /// Arm laid mines whose layer has cleared, then set off armed mines
    fn update_mines(&mut self, rules: &Rules, ledger: &mut DamageLedger, out: &mut Vec<Outbound>) {
        let ids: Vec<MineId> = self.mines.keys().copied().collect();

        for id in ids {
            let Some(mine) = self.mines.get_mut(&id) else {
                continue;
            };

            if !mine.armed && CombatSystem::mine_ready_to_arm(mine, &self.units, rules) {
                mine.armed = true;
                debug!(mine_id = id.0, "Mine armed");
                if let Some(owner) = mine.owner {
                    out.push(Outbound::team(
                        owner.team,
                        ServerMsg::MineState {
                            tick: self.tick,
                            mine: mine.clone(),
                        },
                    ));
                }
            }

            let victims = CombatSystem::mine_victims(mine, &self.units, rules);
            if victims.is_empty() {
                continue;
            }
            for victim in &victims {
                ledger.record(*victim, rules.mine_damage);
            }
            let (x, y) = (mine.x, mine.y);
            self.mines.remove(&id);
            info!(mine_id = id.0, victims = victims.len(), "Mine detonated");
            out.push(Outbound::all(ServerMsg::MineDetonated { id, x, y }));
        }
    }

    fn apply_damage(&mut self, ledger: DamageLedger, rules: &Rules, out: &mut Vec<Outbound>) {
        if ledger.is_empty() {
            return;
        }
        for key in ledger.apply(&mut self.units) {
            if let Some(unit) = self.units.get_mut(&key) {
                unit.speed = 0;
                unit.target_speed = 0;
                unit.stealth_cooldown = 0;
                unit.clear_weapons();
                unit.respawn_cooldown = rules.respawn_cooldown;
            }
            info!(team = key.team, unit = key.unit, "Unit destroyed");
            out.push(Outbound::all(ServerMsg::UnitDestroyed { unit: key }));
        }
    }

    fn publish_views(&mut self, config: &GameConfig) -> Vec<Outbound> {
        let mut out = self.tracker.unit_views(self.tick, &self.units);
        let teams: BTreeSet<TeamId> = self.units.values().map(|u| u.team).collect();
        let displays = teams
            .into_iter()
            .map(|team| SonarSystem::display_for(team, &self.units, &self.torpedoes, &config.terrain, &config.rules))
            .collect();
        out.extend(self.tracker.sonar_views(self.tick, displays));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::terrain::{Cell, Terrain};

    const A: UnitKey = UnitKey::new(0, 0);
    const B: UnitKey = UnitKey::new(1, 0);

    fn rules() -> Rules {
        Rules {
            tube_load_ticks: 2,
            ..Rules::default()
        }
    }

    /// A starts at (5500, 5500), B at the centre of cell (`b_tx`, 5)
    fn config(rules: Rules, b_tx: i64, extra: &[(i64, i64, Cell)]) -> GameConfig {
        let mut terrain = Terrain::open(40, 40, 1000)
            .unwrap()
            .with_cell(5, 5, Cell::Start(0))
            .with_cell(b_tx, 5, Cell::Start(1));
        for &(tx, ty, cell) in extra {
            terrain = terrain.with_cell(tx, ty, cell);
        }
        GameConfig::new(terrain, rules)
    }

    fn running(config: &GameConfig) -> World {
        let mut world = World::new(7);
        world.start(config, &[A, B].into_iter().collect()).unwrap();
        world
    }

    fn arm(world: &mut World, config: &GameConfig, key: UnitKey, tube: u8, weapon: WeaponKind) {
        world.tube_load(key, tube, &config.rules).unwrap();
        for _ in 0..config.rules.tube_load_ticks {
            world.step(config);
        }
        world.tube_arm(key, tube, weapon, true, &config.rules).unwrap();
    }

    fn full_ahead(world: &mut World, config: &GameConfig, key: UnitKey) {
        world
            .set_throttle(key, i32::from(config.rules.sub_max_speed), &config.rules)
            .unwrap();
    }

    #[test]
    fn commands_need_a_running_match() {
        let config = config(rules(), 30, &[]);
        let mut world = World::new(1);
        assert_eq!(world.set_throttle(A, 100, &config.rules), Err(Rejection::NotRunning));
        assert!(world.step(&config).is_empty());
        assert_eq!(world.tick(), 0);

        let mut world = running(&config);
        let before = world.units().clone();
        assert_eq!(
            world.start(&config, &[A, B].into_iter().collect()).unwrap_err(),
            Rejection::AlreadyRunning
        );
        assert_eq!(world.units(), &before);
    }

    #[test]
    fn start_spawns_at_start_cells() {
        let config = config(rules(), 30, &[(20, 20, Cell::Mine)]);
        let world = running(&config);
        let a = world.unit(A).unwrap();
        assert_eq!((a.x, a.y, a.heading, a.speed), (5500, 5500, 0, 0));
        assert_eq!(world.unit(B).unwrap().x, 30500);
        assert_eq!(world.mines().len(), 1);
        assert!(world.mines().values().all(|m| m.armed && m.owner.is_none()));
    }

    #[test]
    fn throttle_is_clamped_to_the_mode_limit() {
        let config = config(rules(), 30, &[]);
        let mut world = running(&config);

        world.set_throttle(A, 99_999, &config.rules).unwrap();
        assert_eq!(world.unit(A).unwrap().target_speed, config.rules.sub_max_speed);
        world.set_throttle(A, -5, &config.rules).unwrap();
        assert_eq!(world.unit(A).unwrap().target_speed, 0);

        world.set_stealth(A, true, &config.rules).unwrap();
        world.set_throttle(A, 99_999, &config.rules).unwrap();
        assert_eq!(world.unit(A).unwrap().target_speed, config.rules.stealth_speed_limit);
        // throttle never moves speed synchronously
        assert_eq!(world.unit(A).unwrap().speed, 0);
    }

    #[test]
    fn steering_accumulates_and_turns_gradually() {
        let config = config(rules(), 30, &[]);
        let mut world = running(&config);

        world.steer(A, 10).unwrap();
        world.steer(A, 500).unwrap();
        assert_eq!(world.unit(A).unwrap().target_heading, 190);

        world.step(&config);
        assert_eq!(world.unit(A).unwrap().heading, 360 - config.rules.sub_turning_speed as i16);
    }

    #[test]
    fn tube_cycle_respects_capacity() {
        let config = config(rules(), 30, &[]);
        let mut world = running(&config);
        let r = &config.rules;

        assert_eq!(world.tube_arm(A, 0, WeaponKind::Torpedo, true, r), Err(Rejection::TubeNotLoaded(0)));
        world.tube_load(A, 0, r).unwrap();
        assert_eq!(world.tube_load(A, 0, r), Err(Rejection::TubeNotEmpty(0)));
        assert_eq!(world.tube_load(A, 9, r), Err(Rejection::InvalidTube(9)));
        assert_eq!(world.tube_arm(A, 0, WeaponKind::Torpedo, true, r), Err(Rejection::TubeNotLoaded(0)));

        for _ in 0..r.tube_load_ticks {
            world.step(&config);
        }
        world.tube_arm(A, 0, WeaponKind::Torpedo, true, r).unwrap();
        assert_eq!(world.tube_arm(A, 0, WeaponKind::Torpedo, true, r), Err(Rejection::TubeNotLoaded(0)));

        arm(&mut world, &config, A, 1, WeaponKind::Torpedo);
        world.tube_load(A, 2, r).unwrap();
        for _ in 0..r.tube_load_ticks {
            world.step(&config);
        }
        assert_eq!(
            world.tube_arm(A, 2, WeaponKind::Torpedo, true, r),
            Err(Rejection::CapacityExceeded(WeaponKind::Torpedo))
        );
        world.tube_arm(A, 2, WeaponKind::Mine, true, r).unwrap();
        assert_eq!(world.unit(A).unwrap().armed_count(WeaponKind::Torpedo), 2);

        world.tube_arm(A, 1, WeaponKind::Torpedo, false, r).unwrap();
        assert_eq!(world.unit(A).unwrap().tubes[1], TubeState::Loaded);
        assert_eq!(world.tube_arm(A, 1, WeaponKind::Torpedo, false, r), Err(Rejection::TubeNotArmed(1)));
    }

    #[test]
    fn fire_without_armed_tubes_changes_nothing() {
        let config = config(rules(), 30, &[]);
        let mut world = running(&config);
        world.tube_load(A, 0, &config.rules).unwrap();
        let before = world.unit(A).unwrap().clone();

        assert_eq!(world.fire(A, 0b1111, &config.rules).unwrap_err(), Rejection::NothingArmed);
        assert_eq!(world.unit(A).unwrap(), &before);
        assert_eq!(world.torpedo_ids_issued(), 0);
    }

    #[test]
    fn salvo_allocates_ids_and_empties_tubes() {
        let config = config(rules(), 30, &[]);
        let mut world = running(&config);
        arm(&mut world, &config, A, 0, WeaponKind::Torpedo);
        arm(&mut world, &config, A, 1, WeaponKind::Torpedo);
        arm(&mut world, &config, A, 3, WeaponKind::Mine);

        let out = world.fire(A, 0b1011, &config.rules).unwrap();
        let launched = out
            .iter()
            .filter(|o| matches!(o.msg, ServerMsg::TorpedoLaunched { .. }))
            .count();
        assert_eq!(launched, 2);

        let ids: Vec<TorpedoId> = world.torpedoes().keys().copied().collect();
        assert_eq!(ids, vec![TorpedoId(1), TorpedoId(2)]);
        let headings: BTreeSet<i16> = world.torpedoes().values().map(|t| t.heading).collect();
        assert_eq!(headings.len(), 2);

        let a = world.unit(A).unwrap();
        assert_eq!(a.armed_mask(), 0);
        assert_eq!(a.tubes[0], TubeState::Empty);
        assert_eq!(a.tubes[3], TubeState::Empty);
        assert_eq!(world.mines().len(), 1);
        assert!(!world.mines().values().all(|m| m.armed));
    }

    #[test]
    fn firing_breaks_stealth_and_starts_cooldown() {
        let config = config(rules(), 30, &[]);
        let mut world = running(&config);
        arm(&mut world, &config, A, 0, WeaponKind::Torpedo);
        world.set_stealth(A, true, &config.rules).unwrap();

        world.fire(A, 0b1, &config.rules).unwrap();
        let a = world.unit(A).unwrap();
        assert!(!a.stealth);
        assert_eq!(a.stealth_cooldown, config.rules.stealth_cooldown);
        assert_eq!(world.set_stealth(A, true, &config.rules), Err(Rejection::StealthCooldown));
    }

    #[test]
    fn laid_mine_arms_once_the_layer_is_clear() {
        let config = config(rules(), 30, &[]);
        let mut world = running(&config);
        arm(&mut world, &config, A, 0, WeaponKind::Mine);
        world.fire(A, 0b1, &config.rules).unwrap();
        full_ahead(&mut world, &config, A);

        let mut armed_at = None;
        for _ in 0..100 {
            world.step(&config);
            if world.mines().values().all(|m| m.armed) {
                armed_at = Some(world.unit(A).unwrap().x);
                break;
            }
        }
        let x = armed_at.expect("mine never armed");
        assert!(x - 5500 > i64::from(config.rules.mine_exclusion_radius));
        assert_eq!(world.unit(A).unwrap().health, config.rules.max_health);
    }

    #[test]
    fn map_mine_detonates_on_approach() {
        let config = config(rules(), 30, &[(7, 5, Cell::Mine)]);
        let mut world = running(&config);
        full_ahead(&mut world, &config, A);

        for _ in 0..100 {
            world.step(&config);
            if world.mines().is_empty() {
                break;
            }
        }
        assert!(world.mines().is_empty());
        assert_eq!(
            world.unit(A).unwrap().health,
            config.rules.max_health - config.rules.mine_damage
        );
    }

    #[test]
    fn running_into_a_wall_stops_and_damages() {
        let config = config(rules(), 30, &[(6, 5, Cell::Wall)]);
        let mut world = running(&config);
        full_ahead(&mut world, &config, A);

        for _ in 0..100 {
            world.step(&config);
            if world.unit(A).unwrap().health < config.rules.max_health {
                break;
            }
        }
        let a = world.unit(A).unwrap();
        assert_eq!(a.health, config.rules.max_health - config.rules.collision_damage);
        assert_eq!(a.speed, 0);
        assert!(a.x < 6000);
    }

    #[test]
    fn colliding_units_both_take_damage_and_stop() {
        let config = config(rules(), 6, &[]);
        let mut world = running(&config);
        full_ahead(&mut world, &config, A);

        for _ in 0..100 {
            world.step(&config);
            if world.unit(B).unwrap().health < config.rules.max_health {
                break;
            }
        }
        let expected = config.rules.max_health - config.rules.collision_damage;
        let (a, b) = (world.unit(A).unwrap(), world.unit(B).unwrap());
        assert_eq!(a.health, expected);
        assert_eq!(b.health, expected);
        assert_eq!(a.speed, 0);
        assert!(b.x - a.x > i64::from(config.rules.collision_radius));
    }

    #[test]
    fn destroyed_unit_is_inert_until_respawn() {
        let rules = Rules {
            max_health: 10,
            collision_damage: 10,
            respawn_cooldown: 3,
            ..rules()
        };
        let config = config(rules, 30, &[(6, 5, Cell::Wall)]);
        let mut world = running(&config);
        full_ahead(&mut world, &config, A);

        let mut destroyed = false;
        for _ in 0..100 {
            let out = world.step(&config);
            if out.iter().any(|o| o.msg == ServerMsg::UnitDestroyed { unit: A }) {
                destroyed = true;
                break;
            }
        }
        assert!(destroyed);
        let a = world.unit(A).unwrap().clone();
        assert_eq!((a.health, a.speed), (0, 0));
        assert_eq!(world.set_throttle(A, 100, &config.rules), Err(Rejection::UnitDestroyed));
        assert_eq!(world.steer(A, 10), Err(Rejection::UnitDestroyed));
        assert_eq!(world.fire(A, 1, &config.rules), Err(Rejection::UnitDestroyed));

        world.step(&config);
        world.step(&config);
        assert_eq!(world.unit(A).unwrap().health, 0);
        assert_eq!((world.unit(A).unwrap().x, world.unit(A).unwrap().y), (a.x, a.y));

        let out = world.step(&config);
        assert!(out
            .iter()
            .any(|o| matches!(o.msg, ServerMsg::UnitRespawned { unit: A, x: 5500, y: 5500 })));
        let a = world.unit(A).unwrap();
        assert_eq!(a.health, config.rules.max_health);
        world.set_throttle(A, 100, &config.rules).unwrap();
    }

    const C: UnitKey = UnitKey::new(0, 1);

    fn start_with(config: &GameConfig, seed: u64, roster: &[UnitKey]) -> World {
        let mut world = World::new(seed);
        world.start(config, &roster.iter().copied().collect()).unwrap();
        world
    }

    #[test]
    fn start_never_stacks_units_on_one_spawn() {
        let config = config(rules(), 30, &[(5, 8, Cell::Start(0))]);
        let world = start_with(&config, 1, &[A, UnitKey::new(0, 2)]);
        let (a, other) = (world.unit(A).unwrap(), world.unit(UnitKey::new(0, 2)).unwrap());
        assert_ne!((a.x, a.y), (other.x, other.y));

        let crowded = UnitKey::new(0, 2);
        let mut world = World::new(1);
        let result = world.start(&config, &[A, C, crowded].into_iter().collect());
        assert_eq!(result.unwrap_err(), Rejection::NoStartLocation(crowded));
        assert!(world.units().is_empty());
        assert_eq!(world.phase(), MatchPhase::AwaitingStart);
    }

    #[test]
    fn overlapping_units_can_back_away() {
        let rules = Rules {
            collision_radius: 1500,
            ..rules()
        };
        let config = config(rules, 30, &[(6, 5, Cell::Start(0))]);
        let mut world = start_with(&config, 1, &[A, C]);
        let (east, west) = if world.unit(A).unwrap().x > world.unit(C).unwrap().x {
            (A, C)
        } else {
            (C, A)
        };
        let gap = world.unit(east).unwrap().x - world.unit(west).unwrap().x;
        assert!(gap < 1500);

        // heading 0 points east, away from the other boat
        full_ahead(&mut world, &config, east);
        for _ in 0..60 {
            world.step(&config);
        }
        let (e, w) = (world.unit(east).unwrap(), world.unit(west).unwrap());
        assert!(e.x - w.x > 1500);
        assert_eq!(e.health, config.rules.max_health);
        assert_eq!(w.health, config.rules.max_health);
    }

    #[test]
    fn overlapping_units_still_collide_when_closing() {
        let rules = Rules {
            collision_radius: 1500,
            ..rules()
        };
        let config = config(rules, 30, &[(6, 5, Cell::Start(0))]);
        let mut world = start_with(&config, 1, &[A, C]);
        let west = if world.unit(A).unwrap().x < world.unit(C).unwrap().x { A } else { C };
        let start_x = world.unit(west).unwrap().x;

        full_ahead(&mut world, &config, west);
        for _ in 0..20 {
            world.step(&config);
        }
        let w = world.unit(west).unwrap();
        assert!(w.health < config.rules.max_health);
        assert_eq!(w.x, start_x);
    }

    #[test]
    fn respawn_skips_starts_covered_by_live_units() {
        let rules = Rules {
            max_health: 10,
            collision_damage: 10,
            respawn_cooldown: 2,
            ..rules()
        };
        let extra = [(5, 20, Cell::Start(0)), (6, 5, Cell::Wall), (6, 20, Cell::Wall)];
        let config = config(rules, 30, &extra);

        for seed in 0..12 {
            let mut world = start_with(&config, seed, &[A, C]);
            let home = (world.unit(A).unwrap().x, world.unit(A).unwrap().y);
            let parked = (world.unit(C).unwrap().x, world.unit(C).unwrap().y);
            full_ahead(&mut world, &config, A);

            let mut respawned_at = None;
            for _ in 0..200 {
                let out = world.step(&config);
                respawned_at = out.iter().find_map(|o| match o.msg {
                    ServerMsg::UnitRespawned { unit, x, y } if unit == A => Some((x, y)),
                    _ => None,
                });
                if respawned_at.is_some() {
                    break;
                }
            }
            assert_eq!(respawned_at, Some(home), "seed {seed}");
            assert_ne!(respawned_at, Some(parked));
            assert_eq!(world.unit(C).unwrap().health, config.rules.max_health);
        }
    }
}
