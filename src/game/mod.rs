//! Simulation core: world state, the per-tick systems, and the engine that
//! drives them

pub mod combat;
pub mod engine;
pub mod ids;
pub mod physics;
pub mod rules;
pub mod snapshot;
pub mod sonar;
pub mod state;
pub mod terrain;
pub mod world;

pub use engine::{EngineError, SimulationEngine, TickMode};
pub use rules::Rules;
pub use state::{MineState, TeamId, TorpedoState, UnitId, UnitKey, UnitState, WeaponKind};
pub use terrain::{GameConfig, Terrain};
pub use world::{MatchPhase, Rejection, World};
