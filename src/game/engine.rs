//! Simulation engine: one state lock, the tick thread, and the command
//! handlers the dispatcher routes control messages to

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, trace, warn};

use crate::bus::{deliver, ConnectionId, MessageBus, Outbound};
use crate::config::ConfigError;
use crate::dispatch::{Dispatcher, Disposition};
use crate::lobby::AssignmentTable;
use crate::util::time::{FrameClock, Timer};
use crate::ws::protocol::{ClientMsg, MessageKind, ServerMsg};

use super::state::{TeamId, UnitKey};
use super::terrain::GameConfig;
use super::world::{Rejection, World};

/// How ticks are driven
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickMode {
    /// A dedicated thread ticks every `frame_milliseconds`
    Realtime,
    /// The owner calls [`SimulationEngine::step`]
    Lockstep,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to spawn tick thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    #[error("invalid rules: {0}")]
    InvalidRules(#[source] ConfigError),

    #[error("team {0} has no start location")]
    MissingStartLocation(TeamId),

    #[error("team {team} seats {units} units but has only {starts} start locations")]
    TooFewStartLocations { team: TeamId, units: usize, starts: usize },

    #[error("command rejected: {0}")]
    Rejected(#[from] Rejection),
}

/// State reachable from both the handlers and the tick thread
struct Shared {
    config: Arc<GameConfig>,
    assignments: Arc<AssignmentTable>,
    world: Mutex<World>,
    bus: Arc<dyn MessageBus>,
}

impl Shared {
    fn step(&self) -> u64 {
        let (tick, outbound) = {
            let mut world = self.world.lock();
            let outbound = world.step(&self.config);
            (world.tick(), outbound)
        };
        self.publish(outbound);
        tick
    }

    fn publish(&self, outbound: Vec<Outbound>) {
        if !outbound.is_empty() {
            deliver(self.bus.as_ref(), &self.assignments, outbound);
        }
    }
}

/// Authoritative simulation for one match
pub struct SimulationEngine {
    shared: Arc<Shared>,
    mode: TickMode,
    shutdown: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
    failures: Option<UnboundedSender<EngineError>>,
}

impl SimulationEngine {
    /// Build an engine over a frozen assignment table. The rules must
    /// validate and every seated unit needs a start location of its own.
    pub fn new(
        config: Arc<GameConfig>,
        assignments: Arc<AssignmentTable>,
        bus: Arc<dyn MessageBus>,
        mode: TickMode,
        seed: u64,
    ) -> Result<Self, EngineError> {
        config.rules.validate().map_err(EngineError::InvalidRules)?;

        let roster = assignments.units();
        for team in assignments.teams() {
            let starts = config.start_count(team);
            if starts == 0 {
                return Err(EngineError::MissingStartLocation(team));
            }
            let units = roster.iter().filter(|key| key.team == team).count();
            if units > starts {
                return Err(EngineError::TooFewStartLocations { team, units, starts });
            }
        }

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                assignments,
                world: Mutex::new(World::new(seed)),
                bus,
            }),
            mode,
            shutdown: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
            failures: None,
        })
    }

    /// Report start failures that arrive through the dispatcher to the
    /// process owner
    pub fn with_failure_sink(mut self, sink: UnboundedSender<EngineError>) -> Self {
        self.failures = Some(sink);
        self
    }

    pub fn tick(&self) -> u64 {
        self.shared.world.lock().tick()
    }

    pub fn assignments(&self) -> &AssignmentTable {
        &self.shared.assignments
    }

    pub fn config(&self) -> &GameConfig {
        &self.shared.config
    }

    /// Read the world under the lock
    pub fn with_world<R>(&self, read: impl FnOnce(&World) -> R) -> R {
        let world = self.shared.world.lock();
        read(&world)
    }

    /// Spawn every seated unit and begin ticking. A second start is
    /// rejected and leaves the running match untouched.
    pub fn start(&self) -> Result<(), EngineError> {
        let outbound = {
            let mut world = self.shared.world.lock();
            world.start(&self.shared.config, &self.shared.assignments.units())?
        };

        if self.mode == TickMode::Realtime {
            self.spawn_tick_thread()?;
        }
        self.shared.publish(outbound);
        Ok(())
    }

    fn spawn_tick_thread(&self) -> Result<(), EngineError> {
        let shared = Arc::clone(&self.shared);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = Duration::from_millis(u64::from(shared.config.rules.frame_milliseconds));

        let handle = thread::Builder::new()
            .name("subsim-tick".into())
            .spawn(move || run_ticks(&shared, &shutdown, interval))
            .map_err(EngineError::ThreadSpawn)?;
        *self.thread.lock() = Some(handle);

        info!(frame_ms = interval.as_millis() as u64, "Tick thread started");
        Ok(())
    }

    /// Advance one tick on the caller's thread
    pub fn step(&self) -> u64 {
        self.shared.step()
    }

    /// Stop the tick thread and wait for it
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Tick thread panicked");
            } else {
                info!(tick = self.tick(), "Tick thread stopped");
            }
        }
    }

    /// Route every control message type to this engine
    pub fn register(self: &Arc<Self>, dispatcher: &mut Dispatcher) {
        const KINDS: [MessageKind; 8] = [
            MessageKind::SimulationStart,
            MessageKind::Throttle,
            MessageKind::Steering,
            MessageKind::Fire,
            MessageKind::TubeArm,
            MessageKind::TubeLoad,
            MessageKind::Stealth,
            MessageKind::TextMessage,
        ];
        for kind in KINDS {
            let engine = Arc::clone(self);
            dispatcher.register(kind, move |sender, msg| engine.handle(sender, msg));
        }
    }

    /// Validate and apply one control message
    pub fn handle(&self, sender: ConnectionId, msg: &ClientMsg) -> Disposition {
        match *msg {
            ClientMsg::SimulationStart => self.on_start(sender),
            ClientMsg::Throttle { team, unit, throttle } => {
                self.command(sender, UnitKey::new(team, unit), "throttle", |world, config| {
                    world
                        .set_throttle(UnitKey::new(team, unit), throttle, &config.rules)
                        .map(|()| Vec::new())
                })
            }
            ClientMsg::Steering { team, unit, direction } => {
                self.command(sender, UnitKey::new(team, unit), "steering", |world, _| {
                    world.steer(UnitKey::new(team, unit), direction).map(|()| Vec::new())
                })
            }
            ClientMsg::Fire { team, unit, tubes } => {
                self.command(sender, UnitKey::new(team, unit), "fire", |world, config| {
                    world.fire(UnitKey::new(team, unit), tubes, &config.rules)
                })
            }
            ClientMsg::TubeArm {
                team,
                unit,
                tube,
                weapon,
                armed,
            } => self.command(sender, UnitKey::new(team, unit), "tube_arm", |world, config| {
                world
                    .tube_arm(UnitKey::new(team, unit), tube, weapon, armed, &config.rules)
                    .map(|()| Vec::new())
            }),
            ClientMsg::TubeLoad { team, unit, tube } => {
                self.command(sender, UnitKey::new(team, unit), "tube_load", |world, config| {
                    world
                        .tube_load(UnitKey::new(team, unit), tube, &config.rules)
                        .map(|()| Vec::new())
                })
            }
            ClientMsg::Stealth { team, unit, engaged } => {
                self.command(sender, UnitKey::new(team, unit), "stealth", |world, config| {
                    world
                        .set_stealth(UnitKey::new(team, unit), engaged, &config.rules)
                        .map(|()| Vec::new())
                })
            }
            ClientMsg::TextMessage { team, unit, ref text } => {
                self.on_text(sender, UnitKey::new(team, unit), text)
            }
            ClientMsg::JoinLobby | ClientMsg::Ping { .. } => Disposition::NotHandled,
        }
    }

    fn on_start(&self, sender: ConnectionId) -> Disposition {
        if !self.shared.assignments.contains(sender) {
            warn!(connection = %sender, reason = %Rejection::NotSeated, "Start rejected");
            return Disposition::Handled;
        }
        match self.start() {
            Ok(()) => {}
            Err(EngineError::Rejected(rejection)) => {
                debug!(connection = %sender, reason = %rejection, "Start rejected");
            }
            Err(err) => self.report(err),
        }
        Disposition::Handled
    }

    fn on_text(&self, sender: ConnectionId, key: UnitKey, text: &str) -> Disposition {
        if !self.shared.assignments.owns(sender, key) {
            warn!(connection = %sender, team = key.team, unit = key.unit, reason = %Rejection::NotOwner, "Text rejected");
            return Disposition::Handled;
        }
        self.shared.publish(vec![Outbound::team(
            key.team,
            ServerMsg::TextMessage {
                team: key.team,
                unit: key.unit,
                text: text.to_owned(),
            },
        )]);
        Disposition::Handled
    }

    /// Ownership check, then `apply` under the lock, then delivery with
    /// the lock released
    fn command<F>(&self, sender: ConnectionId, key: UnitKey, action: &'static str, apply: F) -> Disposition
    where
        F: FnOnce(&mut World, &GameConfig) -> Result<Vec<Outbound>, Rejection>,
    {
        if !self.shared.assignments.owns(sender, key) {
            warn!(
                connection = %sender,
                team = key.team,
                unit = key.unit,
                action,
                reason = %Rejection::NotOwner,
                "Command rejected"
            );
            return Disposition::Handled;
        }

        let result = {
            let mut world = self.shared.world.lock();
            apply(&mut world, &self.shared.config)
        };

        match result {
            Ok(outbound) => {
                trace!(connection = %sender, team = key.team, unit = key.unit, action, "Command applied");
                self.shared.publish(outbound);
                Disposition::Handled
            }
            Err(Rejection::UnknownUnit(missing)) => {
                error!(connection = %sender, unit = %missing, action, "Seated unit missing from the world");
                Disposition::Fatal
            }
            Err(rejection) => {
                warn!(
                    connection = %sender,
                    team = key.team,
                    unit = key.unit,
                    action,
                    reason = %rejection,
                    "Command rejected"
                );
                Disposition::Handled
            }
        }
    }

    fn report(&self, err: EngineError) {
        error!(error = %err, "Simulation failed to start");
        if let Some(sink) = &self.failures {
            let _ = sink.send(err);
        }
    }
}

impl Drop for SimulationEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_ticks(shared: &Shared, shutdown: &AtomicBool, interval: Duration) {
    let mut clock = FrameClock::new(interval);
    while !shutdown.load(Ordering::Acquire) {
        let missed = clock.wait();
        if missed > 0 {
            warn!(missed, "Tick loop running behind");
        }
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        let timer = Timer::new();
        let tick = shared.step();
        trace!(tick, elapsed_us = timer.elapsed_micros(), "Tick");
    }
    debug!("Tick loop exiting");
}
