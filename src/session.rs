//! Match session - lobby hand-off, engine lifecycle and message routing

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info};

use crate::bus::{ConnectionId, MessageBus};
use crate::config::Config;
use crate::dispatch::{Dispatcher, Disposition};
use crate::game::engine::{EngineError, SimulationEngine, TickMode};
use crate::game::snapshot::TrackerStats;
use crate::game::terrain::GameConfig;
use crate::game::world::MatchPhase;
use crate::lobby::{AssignmentTable, Lobby, LobbyError};
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Coarse session state for health reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Lobby,
    AwaitingStart,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub tick: u64,
    pub seated: usize,
    pub capacity: usize,
    /// Unit views published and skipped as unchanged
    pub views_sent: u64,
    pub views_suppressed: u64,
}

/// One match from lobby to shutdown
pub struct MatchSession {
    game: Arc<GameConfig>,
    bus: Arc<dyn MessageBus>,
    mode: TickMode,
    seed: u64,
    lobby: Mutex<Lobby>,
    dispatcher: RwLock<Dispatcher>,
    engine: RwLock<Option<Arc<SimulationEngine>>>,
    failures: UnboundedSender<EngineError>,
}

impl MatchSession {
    /// Returns the session and the receiver on which process-fatal engine
    /// failures arrive
    pub fn new(
        config: &Config,
        game: Arc<GameConfig>,
        bus: Arc<dyn MessageBus>,
        mode: TickMode,
    ) -> (Arc<Self>, UnboundedReceiver<EngineError>) {
        let (failures, failures_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            game,
            bus: bus.clone(),
            mode,
            seed: config.match_seed,
            lobby: Mutex::new(Lobby::new(
                config.teams,
                config.units_per_team,
                config.stations_per_unit as usize,
            )),
            dispatcher: RwLock::new(Dispatcher::new(bus)),
            engine: RwLock::new(None),
            failures,
        });
        (session, failures_rx)
    }

    /// Route one inbound message from `sender`
    pub fn handle_message(&self, sender: ConnectionId, msg: &ClientMsg) -> Disposition {
        match msg {
            ClientMsg::JoinLobby => self.join(sender),
            _ => self.dispatcher.read().dispatch(sender, msg),
        }
    }

    /// Seat `sender`; the joiner that fills the lobby launches the match
    pub fn join(&self, sender: ConnectionId) -> Disposition {
        let (seat, status, table) = {
            let mut lobby = self.lobby.lock();
            let seat = match lobby.join(sender) {
                Ok(seat) => seat,
                Err(LobbyError::AlreadySeated) => {
                    debug!(connection = %sender, "Already seated");
                    return Disposition::Handled;
                }
                Err(err) => {
                    debug!(connection = %sender, error = %err, "Join refused");
                    let code = match err {
                        LobbyError::Full => "lobby_full",
                        _ => "match_in_progress",
                    };
                    self.bus.send(
                        sender,
                        &ServerMsg::Error {
                            code: code.to_string(),
                            message: err.to_string(),
                        },
                    );
                    return Disposition::Handled;
                }
            };
            let status = ServerMsg::LobbyStatus {
                joined: lobby.joined() as u32,
                capacity: lobby.capacity() as u32,
            };
            let table = lobby.is_full().then(|| lobby.freeze());
            (seat, status, table)
        };

        info!(
            connection = %sender,
            team = seat.team,
            unit = seat.unit,
            station = ?seat.station,
            "Seat assigned"
        );
        self.bus.send(
            sender,
            &ServerMsg::Assigned {
                team: seat.team,
                unit: seat.unit,
                station: seat.station,
            },
        );
        self.bus.broadcast(&status);

        if let Some(table) = table {
            if let Err(err) = self.launch(table) {
                error!(error = %err, "Match failed to launch");
                let _ = self.failures.send(err);
            }
        }
        Disposition::Handled
    }

    /// Build the engine over the frozen table, register its handlers and
    /// issue the start
    fn launch(&self, table: AssignmentTable) -> Result<(), EngineError> {
        let seated = table.len();
        let engine = Arc::new(
            SimulationEngine::new(
                self.game.clone(),
                Arc::new(table),
                self.bus.clone(),
                self.mode,
                self.seed,
            )?
            .with_failure_sink(self.failures.clone()),
        );

        engine.register(&mut self.dispatcher.write());
        *self.engine.write() = Some(engine.clone());
        info!(seated, seed = self.seed, "Match formed");

        engine.start()
    }

    /// Connection closed. Before the match forms its seat is freed; after,
    /// its unit stays in play.
    pub fn leave(&self, conn: ConnectionId) {
        let status = {
            let mut lobby = self.lobby.lock();
            lobby.leave(conn).map(|seat| {
                info!(connection = %conn, team = seat.team, unit = seat.unit, "Seat released");
                ServerMsg::LobbyStatus {
                    joined: lobby.joined() as u32,
                    capacity: lobby.capacity() as u32,
                }
            })
        };
        if let Some(status) = status {
            self.bus.broadcast(&status);
        }
    }

    pub fn engine(&self) -> Option<Arc<SimulationEngine>> {
        self.engine.read().clone()
    }

    pub fn status(&self) -> SessionStatus {
        let (seated, capacity) = {
            let lobby = self.lobby.lock();
            (lobby.joined(), lobby.capacity())
        };
        let (phase, tick, views) = match self.engine() {
            None => (SessionPhase::Lobby, 0, TrackerStats::default()),
            Some(engine) => engine.with_world(|world| {
                let phase = match world.phase() {
                    MatchPhase::AwaitingStart => SessionPhase::AwaitingStart,
                    MatchPhase::Running => SessionPhase::Running,
                };
                (phase, world.tick(), world.tracker_stats())
            }),
        };
        SessionStatus {
            phase,
            tick,
            seated,
            capacity,
            views_sent: views.sent,
            views_suppressed: views.suppressed,
        }
    }

    /// Stop the tick thread, if any
    pub fn shutdown(&self) {
        if let Some(engine) = self.engine() {
            engine.shutdown();
        }
    }
}
