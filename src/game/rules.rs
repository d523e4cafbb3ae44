//! Tunable physics and weapon constants for a match

use super::state::WeaponKind;
use crate::config::{env_or, ConfigError};

/// Every numeric constant consumed by the tick loop and command handlers.
///
/// Speeds of submarines are in world units per second, everything the
/// tick loop counts down is in ticks, and all radii are world units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rules {
    /// Degrees of heading change per tick
    pub sub_turning_speed: u16,
    /// Speed gained or shed per tick
    pub sub_acceleration: u16,
    /// Top speed (units per second)
    pub sub_max_speed: u16,
    /// Top speed while in stealth mode
    pub stealth_speed_limit: u16,

    /// Max tubes armed with torpedoes at once
    pub max_torpedos: u16,
    /// Max tubes armed with mines at once
    pub max_mines: u16,

    /// Passive sonar detection range
    pub sonar_range: u16,
    /// Contacts at or below this speed are quiet
    pub passive_sonar_noise_floor: u16,

    /// Degrees between torpedoes of one salvo
    pub torpedo_spread: u16,
    /// Torpedo travel per tick
    pub torpedo_speed: u16,
    pub collision_radius: u16,

    pub torpedo_damage: u16,
    pub mine_damage: u16,
    pub collision_damage: u16,

    /// Mine trigger radius, also the distance a layer must open before its mine arms
    pub mine_exclusion_radius: u16,

    /// Tick interval
    pub frame_milliseconds: u16,

    /// Ticks after firing before stealth can be engaged again
    pub stealth_cooldown: u16,
    /// Ticks a destroyed submarine stays inert
    pub respawn_cooldown: u16,

    pub max_health: u16,
    pub tubes_per_unit: u8,
    /// Ticks a tube spends LOADING
    pub tube_load_ticks: u16,
    /// Ticks a torpedo runs before it is lost
    pub torpedo_lifetime: u16,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            sub_turning_speed: 3,
            sub_acceleration: 50,
            sub_max_speed: 2000,
            stealth_speed_limit: 600,
            max_torpedos: 2,
            max_mines: 1,
            sonar_range: 12000,
            passive_sonar_noise_floor: 400,
            torpedo_spread: 5,
            torpedo_speed: 300,
            collision_radius: 500,
            torpedo_damage: 35,
            mine_damage: 50,
            collision_damage: 10,
            mine_exclusion_radius: 1500,
            frame_milliseconds: 50,
            stealth_cooldown: 200,
            respawn_cooldown: 200,
            max_health: 100,
            tubes_per_unit: 4,
            tube_load_ticks: 60,
            torpedo_lifetime: 200,
        }
    }
}

impl Rules {
    /// Defaults, overridden one constant at a time by `SUBSIM_*` variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        let rules = Self {
            sub_turning_speed: env_or("SUBSIM_SUB_TURNING_SPEED", d.sub_turning_speed)?,
            sub_acceleration: env_or("SUBSIM_SUB_ACCELERATION", d.sub_acceleration)?,
            sub_max_speed: env_or("SUBSIM_SUB_MAX_SPEED", d.sub_max_speed)?,
            stealth_speed_limit: env_or("SUBSIM_STEALTH_SPEED_LIMIT", d.stealth_speed_limit)?,
            max_torpedos: env_or("SUBSIM_MAX_TORPEDOS", d.max_torpedos)?,
            max_mines: env_or("SUBSIM_MAX_MINES", d.max_mines)?,
            sonar_range: env_or("SUBSIM_SONAR_RANGE", d.sonar_range)?,
            passive_sonar_noise_floor: env_or(
                "SUBSIM_PASSIVE_SONAR_NOISE_FLOOR",
                d.passive_sonar_noise_floor,
            )?,
            torpedo_spread: env_or("SUBSIM_TORPEDO_SPREAD", d.torpedo_spread)?,
            torpedo_speed: env_or("SUBSIM_TORPEDO_SPEED", d.torpedo_speed)?,
            collision_radius: env_or("SUBSIM_COLLISION_RADIUS", d.collision_radius)?,
            torpedo_damage: env_or("SUBSIM_TORPEDO_DAMAGE", d.torpedo_damage)?,
            mine_damage: env_or("SUBSIM_MINE_DAMAGE", d.mine_damage)?,
            collision_damage: env_or("SUBSIM_COLLISION_DAMAGE", d.collision_damage)?,
            mine_exclusion_radius: env_or("SUBSIM_MINE_EXCLUSION_RADIUS", d.mine_exclusion_radius)?,
            frame_milliseconds: env_or("SUBSIM_FRAME_MILLISECONDS", d.frame_milliseconds)?,
            stealth_cooldown: env_or("SUBSIM_STEALTH_COOLDOWN", d.stealth_cooldown)?,
            respawn_cooldown: env_or("SUBSIM_RESPAWN_COOLDOWN", d.respawn_cooldown)?,
            max_health: env_or("SUBSIM_MAX_HEALTH", d.max_health)?,
            tubes_per_unit: env_or("SUBSIM_TUBES_PER_UNIT", d.tubes_per_unit)?,
            tube_load_ticks: env_or("SUBSIM_TUBE_LOAD_TICKS", d.tube_load_ticks)?,
            torpedo_lifetime: env_or("SUBSIM_TORPEDO_LIFETIME", d.torpedo_lifetime)?,
        };
        rules.validate()?;
        Ok(rules)
    }

    /// Reject constant sets the tick loop cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_milliseconds == 0 {
            return Err(ConfigError::OutOfRange("SUBSIM_FRAME_MILLISECONDS"));
        }
        if self.tubes_per_unit == 0 || self.tubes_per_unit > 16 {
            return Err(ConfigError::OutOfRange("SUBSIM_TUBES_PER_UNIT"));
        }
        if self.max_health == 0 {
            return Err(ConfigError::OutOfRange("SUBSIM_MAX_HEALTH"));
        }
        Ok(())
    }

    /// Speed cap for a submarine in the given mode
    #[inline]
    pub fn speed_limit(&self, stealth: bool) -> u16 {
        if stealth {
            self.stealth_speed_limit.min(self.sub_max_speed)
        } else {
            self.sub_max_speed
        }
    }

    /// Capacity for tubes armed with `kind`
    #[inline]
    pub fn arm_capacity(&self, kind: WeaponKind) -> u16 {
        match kind {
            WeaponKind::Torpedo => self.max_torpedos,
            WeaponKind::Mine => self.max_mines,
        }
    }
}
