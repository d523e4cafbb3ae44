//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,

    /// Number of teams in a match
    pub teams: u32,
    /// Submarines per team
    pub units_per_team: u32,
    /// Crew stations per submarine (1 = helm only, 2 = helm + tactical)
    pub stations_per_unit: u32,

    /// Arena width in cells
    pub map_width: u32,
    /// Arena height in cells
    pub map_height: u32,
    /// World units per cell
    pub map_scale: u32,

    /// Seed for the match RNG (respawn placement)
    pub match_seed: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            teams: env_or("TEAMS", 2)?,
            units_per_team: env_or("UNITS_PER_TEAM", 1)?,
            stations_per_unit: env_or("STATIONS_PER_UNIT", 2)?,

            map_width: env_or("MAP_WIDTH", 32)?,
            map_height: env_or("MAP_HEIGHT", 24)?,
            map_scale: env_or("MAP_SCALE", 1000)?,

            match_seed: match env::var("MATCH_SEED") {
                Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid("MATCH_SEED"))?,
                Err(_) => rand::random(),
            },
        };

        if config.teams == 0 || config.teams > 2 {
            return Err(ConfigError::OutOfRange("TEAMS"));
        }
        if config.units_per_team == 0 {
            return Err(ConfigError::OutOfRange("UNITS_PER_TEAM"));
        }
        if config.stations_per_unit == 0 || config.stations_per_unit > 2 {
            return Err(ConfigError::OutOfRange("STATIONS_PER_UNIT"));
        }

        Ok(config)
    }
}

/// Read `name` from the environment, falling back to `default` when unset
pub fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Value out of range: {0}")]
    OutOfRange(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
