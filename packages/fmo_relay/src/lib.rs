//! Store-and-forward repeater for FMO packets over MQTT.
//!
//! Packets heard on the subscribe topic are buffered until the channel has
//! been quiet for the configured period, then republished in arrival order
//! with the relay's UID and a prefixed callsign. Packets carrying the relay's
//! own UID are never buffered, so the relay cannot echo itself.

pub mod buffer;
pub mod cli;
pub mod config;
pub mod guard;
pub mod logging;
pub mod metrics;
pub mod replay;
pub mod service;
pub mod transport;

#[cfg(test)]
mod test_helpers;
