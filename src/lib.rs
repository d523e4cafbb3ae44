//! Authoritative simulation server for multiplayer submarine combat.
//!
//! Crews connect over WebSocket, are seated by a first-come lobby, and
//! drive their submarines through helm and tactical commands. The engine
//! ticks the world on its own thread and publishes per-team views.

pub mod app;
pub mod bus;
pub mod config;
pub mod dispatch;
pub mod game;
pub mod http;
pub mod lobby;
pub mod session;
pub mod util;
pub mod ws;
