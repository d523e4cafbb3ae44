//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::sonar::SonarDisplayState;
use crate::game::state::{MineId, MineState, TeamId, TorpedoId, TorpedoState, UnitId, UnitKey, UnitState, WeaponKind};
use crate::lobby::Station;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Take the next free seat in the lobby
    JoinLobby,

    /// Lobby is complete, start the simulation
    SimulationStart,

    /// Requested speed, clamped by the server
    Throttle {
        team: TeamId,
        unit: UnitId,
        throttle: i32,
    },

    /// Heading change in degrees, positive turns counter-clockwise
    Steering {
        team: TeamId,
        unit: UnitId,
        direction: i32,
    },

    /// Fire every armed tube whose bit is set in `tubes`
    Fire {
        team: TeamId,
        unit: UnitId,
        tubes: u16,
    },

    /// Arm a loaded tube with `weapon`, or stand it down with `armed: false`
    TubeArm {
        team: TeamId,
        unit: UnitId,
        tube: u8,
        weapon: WeaponKind,
        #[serde(default = "default_armed")]
        armed: bool,
    },

    /// Start loading an empty tube
    TubeLoad {
        team: TeamId,
        unit: UnitId,
        tube: u8,
    },

    Stealth {
        team: TeamId,
        unit: UnitId,
        engaged: bool,
    },

    /// Relayed verbatim to the sender's team
    TextMessage {
        team: TeamId,
        unit: UnitId,
        text: String,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

fn default_armed() -> bool {
    true
}

/// Dispatch key of a [`ClientMsg`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    JoinLobby,
    SimulationStart,
    Throttle,
    Steering,
    Fire,
    TubeArm,
    TubeLoad,
    Stealth,
    TextMessage,
    Ping,
}

impl ClientMsg {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::JoinLobby => MessageKind::JoinLobby,
            Self::SimulationStart => MessageKind::SimulationStart,
            Self::Throttle { .. } => MessageKind::Throttle,
            Self::Steering { .. } => MessageKind::Steering,
            Self::Fire { .. } => MessageKind::Fire,
            Self::TubeArm { .. } => MessageKind::TubeArm,
            Self::TubeLoad { .. } => MessageKind::TubeLoad,
            Self::Stealth { .. } => MessageKind::Stealth,
            Self::TextMessage { .. } => MessageKind::TextMessage,
            Self::Ping { .. } => MessageKind::Ping,
        }
    }
}

/// Why a torpedo left the water
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorpedoEnd {
    Hit,
    MineStrike,
    Grounded,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagMarker {
    pub team: TeamId,
    pub x: i64,
    pub y: i64,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        connection_id: Uuid,
        server_time: u64,
    },

    /// Lobby seat granted to this connection
    Assigned {
        team: TeamId,
        unit: UnitId,
        station: Station,
    },

    /// Lobby fill status
    LobbyStatus {
        joined: u32,
        capacity: u32,
    },

    /// Simulation is running
    SimulationStarted {
        tick: u64,
        flags: Vec<FlagMarker>,
    },

    /// Full-fidelity submarine view, team only
    UnitState {
        tick: u64,
        state: UnitState,
    },

    /// Own torpedo track, firing team only
    TorpedoState {
        tick: u64,
        torpedo: TorpedoState,
    },

    /// Own mine track, laying team only
    MineState {
        tick: u64,
        mine: MineState,
    },

    SonarDisplay {
        tick: u64,
        display: SonarDisplayState,
    },

    TorpedoLaunched {
        id: TorpedoId,
        owner: UnitKey,
        x: i64,
        y: i64,
        heading: i16,
    },

    TorpedoRemoved {
        id: TorpedoId,
        x: i64,
        y: i64,
        cause: TorpedoEnd,
        target: Option<UnitKey>,
    },

    MineLaid {
        id: MineId,
        owner: UnitKey,
        x: i64,
        y: i64,
    },

    MineDetonated {
        id: MineId,
        x: i64,
        y: i64,
    },

    UnitDestroyed {
        unit: UnitKey,
    },

    UnitRespawned {
        unit: UnitKey,
        x: i64,
        y: i64,
    },

    /// Relayed team chat
    TextMessage {
        team: TeamId,
        unit: UnitId,
        text: String,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}
