//! First-come lobby and the assignment table it produces

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bus::ConnectionId;
use crate::game::state::{TeamId, UnitId, UnitKey};

/// Crew positions aboard one submarine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Station {
    /// Throttle, steering, stealth
    Helm,
    /// Tubes and firing
    Tactical,
}

impl Station {
    pub const ALL: [Station; 2] = [Station::Helm, Station::Tactical];
}

/// One (team, unit, station) slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Seat {
    pub team: TeamId,
    pub unit: UnitId,
    pub station: Station,
}

impl Seat {
    pub const fn new(team: TeamId, unit: UnitId, station: Station) -> Self {
        Self { team, unit, station }
    }

    pub fn unit_key(&self) -> UnitKey {
        UnitKey::new(self.team, self.unit)
    }
}

/// Which connection sits in which seat. Read-only once the match starts.
#[derive(Debug, Clone, Default)]
pub struct AssignmentTable {
    seats: BTreeMap<Seat, ConnectionId>,
}

impl AssignmentTable {
    pub fn assign(&mut self, seat: Seat, conn: ConnectionId) {
        self.seats.insert(seat, conn);
    }

    /// Whether `conn` sits at any station of `key`
    pub fn owns(&self, conn: ConnectionId, key: UnitKey) -> bool {
        self.seats
            .iter()
            .any(|(seat, c)| *c == conn && seat.unit_key() == key)
    }

    pub fn seat_of(&self, conn: ConnectionId) -> Option<Seat> {
        self.seats
            .iter()
            .find(|(_, c)| **c == conn)
            .map(|(seat, _)| *seat)
    }

    pub fn contains(&self, conn: ConnectionId) -> bool {
        self.seat_of(conn).is_some()
    }

    /// Connections seated on `team`, each once
    pub fn team_connections(&self, team: TeamId) -> Vec<ConnectionId> {
        let conns: BTreeSet<ConnectionId> = self
            .seats
            .iter()
            .filter(|(seat, _)| seat.team == team)
            .map(|(_, c)| *c)
            .collect();
        conns.into_iter().collect()
    }

    /// Every unit with at least one seated station
    pub fn units(&self) -> BTreeSet<UnitKey> {
        self.seats.keys().map(Seat::unit_key).collect()
    }

    pub fn teams(&self) -> BTreeSet<TeamId> {
        self.seats.keys().map(|s| s.team).collect()
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    fn release(&mut self, conn: ConnectionId) -> Option<Seat> {
        let seat = self.seat_of(conn)?;
        self.seats.remove(&seat);
        Some(seat)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LobbyError {
    #[error("lobby is full")]
    Full,

    #[error("connection already holds a seat")]
    AlreadySeated,

    #[error("match already formed")]
    Closed,
}

/// Seats connections first come, first served, alternating teams so the
/// sides fill evenly
pub struct Lobby {
    order: Vec<Seat>,
    table: AssignmentTable,
    closed: bool,
}

impl Lobby {
    pub fn new(teams: u32, units_per_team: u32, stations_per_unit: usize) -> Self {
        let stations = &Station::ALL[..stations_per_unit.min(Station::ALL.len())];
        let mut order = Vec::new();
        for unit in 0..units_per_team {
            for station in stations {
                for team in 0..teams {
                    order.push(Seat::new(team, unit, *station));
                }
            }
        }
        Self {
            order,
            table: AssignmentTable::default(),
            closed: false,
        }
    }

    /// Seat `conn` in the first free slot
    pub fn join(&mut self, conn: ConnectionId) -> Result<Seat, LobbyError> {
        if self.closed {
            return Err(LobbyError::Closed);
        }
        if self.table.contains(conn) {
            return Err(LobbyError::AlreadySeated);
        }
        let seat = self
            .order
            .iter()
            .find(|seat| !self.table.seats.contains_key(seat))
            .copied()
            .ok_or(LobbyError::Full)?;
        self.table.assign(seat, conn);
        Ok(seat)
    }

    /// Free the seat held by `conn`, if any. Seats are fixed once the
    /// match has formed.
    pub fn leave(&mut self, conn: ConnectionId) -> Option<Seat> {
        if self.closed {
            return None;
        }
        self.table.release(conn)
    }

    pub fn joined(&self) -> usize {
        self.table.len()
    }

    pub fn capacity(&self) -> usize {
        self.order.len()
    }

    pub fn is_full(&self) -> bool {
        self.joined() == self.capacity()
    }

    /// Close the lobby and hand a copy of the table to the match
    pub fn freeze(&mut self) -> AssignmentTable {
        self.closed = true;
        self.table.clone()
    }
}
