//! RTP relay towards the local recorder

pub mod builder;
pub mod port;

pub use builder::{NegotiatedAudio, Relay, RelayBuilder};
pub use port::PortReservation;
