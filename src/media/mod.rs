//! Media router boundary
//!
//! Traits and types describing the external media routing service. The
//! recorder never negotiates ICE/DTLS itself; everything goes through
//! `MediaRouter`.

pub mod router;
pub mod types;

pub use router::{MediaError, MediaResult, MediaRouter, PlainTransport, RelayConsumer};
pub use types::{
    MediaKind, PlainTransportOptions, ProducerId, ProducerInfo, RouterEvent, RtcpParameters,
    RtpCapabilities, RtpCodecCapability, RtpCodecParameters, RtpEncodingParameters, RtpParameters,
    WebRtcTransportParams,
};
