//! Routes inbound client messages to the handler registered for their type

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, trace};

use crate::bus::{ConnectionId, MessageBus};
use crate::ws::protocol::{ClientMsg, MessageKind};

/// What a handler made of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed, including validated-and-refused commands
    Handled,
    /// No handler for this message type
    NotHandled,
    /// The sender broke an invariant; its connection is torn down
    Fatal,
}

pub type Handler = Box<dyn Fn(ConnectionId, &ClientMsg) -> Disposition + Send + Sync>;

/// Handler table keyed by message type
pub struct Dispatcher {
    handlers: HashMap<MessageKind, Handler>,
    bus: Arc<dyn MessageBus>,
}

impl Dispatcher {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            handlers: HashMap::new(),
            bus,
        }
    }

    /// Register `handler` for `kind`, replacing any earlier one
    pub fn register<F>(&mut self, kind: MessageKind, handler: F)
    where
        F: Fn(ConnectionId, &ClientMsg) -> Disposition + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Box::new(handler));
    }

    pub fn handles(&self, kind: MessageKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Invoke the handler for `msg`. Unregistered types are ignored;
    /// a fatal disposition disconnects the sender.
    pub fn dispatch(&self, sender: ConnectionId, msg: &ClientMsg) -> Disposition {
        let kind = msg.kind();
        let Some(handler) = self.handlers.get(&kind) else {
            trace!(connection = %sender, ?kind, "No handler registered, ignoring");
            return Disposition::NotHandled;
        };

        let disposition = handler(sender, msg);
        if disposition == Disposition::Fatal {
            error!(connection = %sender, ?kind, "Fatal handler disposition, disconnecting sender");
            self.bus.disconnect(sender);
        }
        disposition
    }
}
