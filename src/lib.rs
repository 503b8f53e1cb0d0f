//! Chat relay: upstream chat feed, simulated chat and websocket fan-out

pub mod api;
pub mod auth;
pub mod backoff;
pub mod config;
pub mod hub;
pub mod protocol;
pub mod simulation;
pub mod types;
pub mod upstream;
pub mod ws;
