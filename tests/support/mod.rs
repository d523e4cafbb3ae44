//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use subsim_server::bus::{ConnectionId, MessageBus};
use subsim_server::game::terrain::Cell;
use subsim_server::game::{GameConfig, Rules, SimulationEngine, Terrain, TickMode, UnitKey, UnitState};
use subsim_server::lobby::{AssignmentTable, Seat, Station};
use subsim_server::ws::protocol::ServerMsg;

pub const A: UnitKey = UnitKey::new(0, 0);
pub const B: UnitKey = UnitKey::new(1, 0);

/// What a bus was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent(ConnectionId, ServerMsg),
    Broadcast(ServerMsg),
    Disconnected(ConnectionId),
}

/// Bus that records every delivery in order
#[derive(Default)]
pub struct RecordingBus {
    log: Mutex<Vec<Delivery>>,
}

impl RecordingBus {
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.log.lock().clone()
    }

    pub fn broadcasts(&self) -> Vec<ServerMsg> {
        self.log
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Broadcast(msg) => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sent_to(&self, conn: ConnectionId) -> Vec<ServerMsg> {
        self.log
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Sent(c, msg) if *c == conn => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn disconnected(&self) -> Vec<ConnectionId> {
        self.log
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Disconnected(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }
}

impl MessageBus for RecordingBus {
    fn send(&self, conn: ConnectionId, msg: &ServerMsg) {
        self.log.lock().push(Delivery::Sent(conn, msg.clone()));
    }

    fn broadcast(&self, msg: &ServerMsg) {
        self.log.lock().push(Delivery::Broadcast(msg.clone()));
    }

    fn disconnect(&self, conn: ConnectionId) {
        self.log.lock().push(Delivery::Disconnected(conn));
    }
}

/// Rules with short tube reloads so weapons are ready in a couple of ticks
pub fn quick_rules() -> Rules {
    Rules {
        tube_load_ticks: 2,
        ..Rules::default()
    }
}

/// 40x40 open water at 1000 units per cell. A starts at the centre of
/// cell (5, 5), that is (5500, 5500); B at the centre of (`b_tx`, 5).
pub fn duel(rules: Rules, b_tx: i64) -> GameConfig {
    let terrain = Terrain::open(40, 40, 1000)
        .expect("terrain")
        .with_cell(5, 5, Cell::Start(0))
        .with_cell(b_tx, 5, Cell::Start(1));
    GameConfig::new(terrain, rules)
}

/// A lockstep engine with one helm seat per team, already started
pub struct Duel {
    pub engine: Arc<SimulationEngine>,
    pub bus: Arc<RecordingBus>,
    pub a: ConnectionId,
    pub b: ConnectionId,
}

impl Duel {
    pub fn start(config: GameConfig) -> Self {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let mut table = AssignmentTable::default();
        table.assign(Seat::new(A.team, A.unit, Station::Helm), a);
        table.assign(Seat::new(B.team, B.unit, Station::Helm), b);

        let bus = Arc::new(RecordingBus::default());
        let engine = SimulationEngine::new(
            Arc::new(config),
            Arc::new(table),
            bus.clone(),
            TickMode::Lockstep,
            11,
        )
        .expect("engine");
        engine.start().expect("start");

        Self {
            engine: Arc::new(engine),
            bus,
            a,
            b,
        }
    }

    pub fn unit(&self, key: UnitKey) -> UnitState {
        self.engine
            .with_world(|world| world.unit(key).cloned())
            .expect("unit in play")
    }

    pub fn steps(&self, n: u32) {
        for _ in 0..n {
            self.engine.step();
        }
    }
}
