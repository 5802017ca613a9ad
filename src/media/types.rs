//! Media routing types
//!
//! Plain data exchanged with the media router: producers, RTP
//! capabilities/parameters and the events it publishes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Unique identifier of a producer, assigned by the media router
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProducerId(pub String);

impl ProducerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProducerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProducerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProducerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Media kind of a producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// An inbound stream as seen by the recorder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerInfo {
    pub id: ProducerId,
    pub peer_id: String,
    pub kind: MediaKind,
    /// Arbitrary application metadata attached by the producing client
    #[serde(default)]
    pub app_data: serde_json::Value,
}

/// A codec the router can route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    pub preferred_payload_type: Option<u8>,
    pub clock_rate: u32,
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// Router-level capability set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    pub codecs: Vec<RtpCodecCapability>,
}

impl RtpCapabilities {
    /// Opus, stereo, 48 kHz: the codec browsers produce for audio
    pub fn opus_only() -> Self {
        Self {
            codecs: vec![RtpCodecCapability {
                kind: MediaKind::Audio,
                mime_type: "audio/opus".to_string(),
                preferred_payload_type: Some(100),
                clock_rate: 48000,
                channels: Some(2),
                parameters: BTreeMap::new(),
            }],
        }
    }
}

/// A negotiated codec on a consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecParameters {
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtpEncodingParameters {
    pub ssrc: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtcpParameters {
    pub cname: Option<String>,
}

/// Negotiated RTP parameters of a consumer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    pub codecs: Vec<RtpCodecParameters>,
    pub encodings: Vec<RtpEncodingParameters>,
    #[serde(default)]
    pub rtcp: RtcpParameters,
}

/// Options for a plain (non-WebRTC) relay transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlainTransportOptions {
    pub listen_ip: IpAddr,
    /// RTP and RTCP share one port
    pub rtcp_mux: bool,
    /// Learn the remote address from the first inbound packet
    pub comedia: bool,
}

/// Parameters a client needs to connect a WebRTC transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebRtcTransportParams {
    pub id: String,
    pub ice_parameters: serde_json::Value,
    pub ice_candidates: serde_json::Value,
    pub dtls_parameters: serde_json::Value,
}

/// Close signals published by the media router
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// A producer went away (client closed it, or its peer left)
    ProducerClosed { producer_id: ProducerId },
    /// A transport closed; lists the producers that were carried on it
    TransportClosed {
        transport_id: String,
        producer_ids: Vec<ProducerId>,
    },
}
