//! WebSocket-backed message bus: one unbounded outbound queue per socket

use dashmap::DashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error};

use crate::bus::{ConnectionId, MessageBus};
use crate::ws::protocol::ServerMsg;

/// Frame queued for a socket's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    Close,
}

/// Registry of open sockets
#[derive(Default)]
pub struct WsBus {
    connections: DashMap<ConnectionId, UnboundedSender<Outgoing>>,
}

impl WsBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a queue for `conn`; the socket's writer drains the receiver
    pub fn register(&self, conn: ConnectionId) -> UnboundedReceiver<Outgoing> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(conn, tx);
        rx
    }

    pub fn unregister(&self, conn: ConnectionId) {
        self.connections.remove(&conn);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn encode(msg: &ServerMsg) -> Option<String> {
        serde_json::to_string(msg)
            .map_err(|e| error!(error = %e, "Failed to encode server message"))
            .ok()
    }
}

impl MessageBus for WsBus {
    fn send(&self, conn: ConnectionId, msg: &ServerMsg) {
        let Some(tx) = self.connections.get(&conn) else {
            return;
        };
        if let Some(json) = Self::encode(msg) {
            if tx.send(Outgoing::Text(json)).is_err() {
                debug!(connection = %conn, "Outbound queue closed");
            }
        }
    }

    fn broadcast(&self, msg: &ServerMsg) {
        let Some(json) = Self::encode(msg) else {
            return;
        };
        for entry in self.connections.iter() {
            if entry.value().send(Outgoing::Text(json.clone())).is_err() {
                debug!(connection = %entry.key(), "Outbound queue closed");
            }
        }
    }

    fn disconnect(&self, conn: ConnectionId) {
        if let Some((_, tx)) = self.connections.remove(&conn) {
            let _ = tx.send(Outgoing::Close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_reaches_only_the_addressed_socket() {
        let bus = WsBus::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let mut rx_a = bus.register(a);
        let mut rx_b = bus.register(b);

        bus.send(a, &ServerMsg::Pong { t: 7 });
        assert_eq!(
            rx_a.try_recv().unwrap(),
            Outgoing::Text(r#"{"type":"pong","t":7}"#.to_string())
        );
        assert!(rx_b.try_recv().is_err());

        bus.broadcast(&ServerMsg::Pong { t: 8 });
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn disconnect_closes_and_forgets_the_socket() {
        let bus = WsBus::new();
        let a = ConnectionId::new();
        let mut rx = bus.register(a);

        bus.disconnect(a);
        assert_eq!(rx.try_recv().unwrap(), Outgoing::Close);
        assert_eq!(bus.connection_count(), 0);

        bus.send(a, &ServerMsg::Pong { t: 1 });
        assert!(rx.try_recv().is_err());
    }
}
