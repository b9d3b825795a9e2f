//! The relay server: demultiplexes tunnelled TCP sessions arriving over an
//! HTTP long-poll channel and pumps them against real origin connections.
//!
//! Exposed as a library for integration tests and embedding; the `spac-relay`
//! binary wires it to configuration and signal handling.

pub mod error;
pub mod mux;
pub mod server;
pub mod session;

pub use error::RelayError;
pub use mux::SessionMux;
pub use server::{router, serve};
