//! Media router boundary
//!
//! The router negotiates the real-time transport with clients and owns the
//! producers. The recorder only needs it to build a plain relay towards a
//! local port and to hear about closures.

use super::types::*;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors reported by the media router
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("producer error: {0}")]
    Producer(String),

    #[error("consumer error: {0}")]
    Consumer(String),

    #[error("closed: {0}")]
    Closed(String),
}

pub type MediaResult<T> = Result<T, MediaError>;

/// The media router: negotiation, producers and relay transports
#[async_trait]
pub trait MediaRouter: Send + Sync {
    /// Router-level capability set
    fn rtp_capabilities(&self) -> RtpCapabilities;

    /// Whether `producer_id` can be consumed with `capabilities`
    fn can_consume(&self, producer_id: &ProducerId, capabilities: &RtpCapabilities) -> bool;

    /// Create a plain transport used to relay RTP to a local socket
    async fn create_plain_transport(
        &self,
        options: PlainTransportOptions,
    ) -> MediaResult<Arc<dyn PlainTransport>>;

    /// Create a WebRTC transport for a peer
    async fn create_webrtc_transport(&self, peer_id: &str) -> MediaResult<WebRtcTransportParams>;

    /// Complete the DTLS handshake parameters of a WebRTC transport
    async fn connect_webrtc_transport(
        &self,
        transport_id: &str,
        dtls_parameters: serde_json::Value,
    ) -> MediaResult<()>;

    /// Start receiving a stream from a peer
    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
        app_data: serde_json::Value,
    ) -> MediaResult<ProducerInfo>;

    /// Producers currently alive on the router
    fn producers(&self) -> Vec<ProducerInfo>;

    /// Subscribe to close signals
    fn subscribe(&self) -> broadcast::Receiver<RouterEvent>;
}

/// Transport forwarding RTP to a plain UDP destination
#[async_trait]
pub trait PlainTransport: Send + Sync {
    fn id(&self) -> &str;

    /// Point the transport at the recorder's receive address
    async fn connect(&self, ip: IpAddr, port: u16) -> MediaResult<()>;

    /// Consume a producer on this transport
    async fn consume(
        &self,
        producer_id: &ProducerId,
        capabilities: &RtpCapabilities,
        paused: bool,
    ) -> MediaResult<Arc<dyn RelayConsumer>>;

    /// Close the transport. Closing twice is a no-op.
    async fn close(&self);
}

/// Delivery of one producer's media through a relay transport
#[async_trait]
pub trait RelayConsumer: Send + Sync {
    fn id(&self) -> &str;

    fn rtp_parameters(&self) -> RtpParameters;

    async fn resume(&self) -> MediaResult<()>;

    /// Close the consumer. Closing twice is a no-op.
    async fn close(&self);
}
