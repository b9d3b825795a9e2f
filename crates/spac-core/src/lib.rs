//! Shared building blocks for the spac proxy.
//!
//! This crate holds the types every other member needs: the per-request
//! fingerprint the rule engine classifies, the tunnel event model spoken
//! between the local agent and the relay server, and the default constants
//! used across crates.

pub mod defaults;
pub mod event;
pub mod request;

pub use event::{
    CodecError, ConnStatus, Event, EventCodec, FrameCodec, HttpRequestEvent, SessionEvent,
    Wrapping,
};
pub use request::RequestFingerprint;
