//! Application state shared across routes

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::bus::MessageBus;
use crate::config::Config;
use crate::game::engine::{EngineError, TickMode};
use crate::game::terrain::GameConfig;
use crate::session::MatchSession;
use crate::ws::WsBus;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub bus: Arc<WsBus>,
    pub session: Arc<MatchSession>,
}

impl AppState {
    /// Wire the socket bus to a fresh match session. The receiver yields
    /// engine failures the process cannot recover from.
    pub fn new(
        config: Config,
        game: GameConfig,
        mode: TickMode,
    ) -> (Self, UnboundedReceiver<EngineError>) {
        let config = Arc::new(config);
        let bus = Arc::new(WsBus::new());
        let dyn_bus: Arc<dyn MessageBus> = bus.clone();
        let (session, failures) = MatchSession::new(&config, Arc::new(game), dyn_bus, mode);

        (
            Self {
                config,
                bus,
                session,
            },
            failures,
        )
    }
}
