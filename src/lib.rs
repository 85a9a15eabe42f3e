//! pppoec - PPPoE discovery client
//!
//! Client-side implementation of the PPPoE (RFC 2516) discovery
//! handshake: broadcast a PADI, pick an access concentrator from the
//! PADOs it offers, request a session with PADR and hand the PADS
//! session id off to PPP.

pub mod config;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod telemetry;
pub mod transport;

pub use error::{Error, Result};
