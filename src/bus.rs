//! Message bus port
//!
//! The simulation never talks to sockets. It produces [`Outbound`] messages
//! addressed to a [`Recipient`] and hands them to whatever [`MessageBus`]
//! the process wired in: the WebSocket registry in production, a recording
//! bus in tests.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use crate::game::state::TeamId;
use crate::lobby::AssignmentTable;
use crate::ws::protocol::ServerMsg;

/// Identity of one client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who an outbound message is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    All,
    Team(TeamId),
}

/// A message produced under the state lock, delivered after it is released
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Recipient,
    pub msg: ServerMsg,
}

impl Outbound {
    pub fn all(msg: ServerMsg) -> Self {
        Self { to: Recipient::All, msg }
    }

    pub fn team(team: TeamId, msg: ServerMsg) -> Self {
        Self {
            to: Recipient::Team(team),
            msg,
        }
    }
}

/// Transport the engine publishes through. Implementations must not call
/// back into the engine.
pub trait MessageBus: Send + Sync {
    /// Queue a message for one connection; unknown connections are ignored
    fn send(&self, conn: ConnectionId, msg: &ServerMsg);

    /// Queue a message for every open connection
    fn broadcast(&self, msg: &ServerMsg);

    /// Tear down a connection
    fn disconnect(&self, conn: ConnectionId);
}

/// Resolve recipients against the assignment table and hand every message
/// to the bus. Call this only with the state lock released.
pub fn deliver(bus: &dyn MessageBus, assignments: &AssignmentTable, outbound: Vec<Outbound>) {
    for Outbound { to, msg } in outbound {
        match to {
            Recipient::All => bus.broadcast(&msg),
            Recipient::Team(team) => {
                for conn in assignments.team_connections(team) {
                    bus.send(conn, &msg);
                }
            }
        }
    }
    trace!("Outbound batch delivered");
}
