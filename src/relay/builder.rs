//! Relay builder
//!
//! Builds the path that copies a producer's RTP to a local UDP port:
//! capability check, port reservation, plain transport, paused consumer.

use super::port::PortReservation;
use crate::media::{
    MediaKind, MediaRouter, PlainTransport, PlainTransportOptions, ProducerInfo, RelayConsumer,
    RtpCapabilities, RtpParameters,
};
use crate::utils::{RecorderError, RecorderResult};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Codec parameters negotiated on the relay consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedAudio {
    /// Codec name without the `audio/` prefix, e.g. `opus`
    pub codec: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub channels: u8,
    pub format_parameters: BTreeMap<String, String>,
    pub ssrc: u32,
    pub cname: Option<String>,
}

impl NegotiatedAudio {
    /// Extract the first audio codec and the SSRC from consumer parameters
    pub fn from_parameters(producer: &ProducerInfo, params: &RtpParameters) -> RecorderResult<Self> {
        let codec = params.codecs.first().ok_or_else(|| RecorderError::CapabilityMismatch {
            producer_id: producer.id.to_string(),
            reason: "consumer negotiated no codec".to_string(),
        })?;

        let (kind, name) = codec
            .mime_type
            .split_once('/')
            .unwrap_or(("", codec.mime_type.as_str()));
        if !kind.eq_ignore_ascii_case("audio") {
            return Err(RecorderError::CapabilityMismatch {
                producer_id: producer.id.to_string(),
                reason: format!("negotiated codec {} is not audio", codec.mime_type),
            });
        }

        let ssrc = params
            .encodings
            .first()
            .and_then(|e| e.ssrc)
            .ok_or_else(|| {
                RecorderError::RelayTransport(format!(
                    "consumer for producer {} has no SSRC",
                    producer.id
                ))
            })?;

        Ok(Self {
            codec: name.to_string(),
            payload_type: codec.payload_type,
            clock_rate: codec.clock_rate,
            channels: codec.channels.unwrap_or(1),
            format_parameters: codec.parameters.clone(),
            ssrc,
            cname: params.rtcp.cname.clone(),
        })
    }
}

/// A relay transport with its paused consumer
pub struct Relay {
    pub transport: Arc<dyn PlainTransport>,
    pub consumer: Arc<dyn RelayConsumer>,
    pub reservation: PortReservation,
    pub audio: NegotiatedAudio,
}

impl Relay {
    /// Where the relay sends RTP (and where the recorder listens)
    pub fn destination(&self) -> SocketAddr {
        self.reservation.addr()
    }

    /// Close consumer, then transport, and drop the port if still held
    pub async fn close(&mut self) {
        self.consumer.close().await;
        self.transport.close().await;
        self.reservation.release();
    }
}

/// Builds relays on a media router
pub struct RelayBuilder {
    router: Arc<dyn MediaRouter>,
    listen_ip: IpAddr,
}

impl RelayBuilder {
    pub fn new(router: Arc<dyn MediaRouter>, listen_ip: IpAddr) -> Self {
        Self { router, listen_ip }
    }

    /// Check that `producer` can be consumed under the router capabilities
    ///
    /// Allocates nothing. Returns the capabilities to consume with.
    pub fn check(&self, producer: &ProducerInfo) -> RecorderResult<RtpCapabilities> {
        if producer.kind != MediaKind::Audio {
            return Err(RecorderError::CapabilityMismatch {
                producer_id: producer.id.to_string(),
                reason: "only audio producers are recorded".to_string(),
            });
        }

        let capabilities = self.router.rtp_capabilities();
        if !self.router.can_consume(&producer.id, &capabilities) {
            return Err(RecorderError::CapabilityMismatch {
                producer_id: producer.id.to_string(),
                reason: "router cannot consume producer with its capabilities".to_string(),
            });
        }
        Ok(capabilities)
    }

    /// Build a relay for a producer that passed `check`
    ///
    /// Anything allocated before a failure is closed before returning.
    pub async fn build(
        &self,
        producer: &ProducerInfo,
        capabilities: &RtpCapabilities,
    ) -> RecorderResult<Relay> {
        let reservation = PortReservation::reserve(self.listen_ip)
            .await
            .map_err(|e| RecorderError::RelayTransport(format!("failed to reserve port: {}", e)))?;

        let transport = self
            .router
            .create_plain_transport(PlainTransportOptions {
                listen_ip: self.listen_ip,
                rtcp_mux: true,
                comedia: false,
            })
            .await?;

        if let Err(e) = transport.connect(self.listen_ip, reservation.port()).await {
            transport.close().await;
            return Err(e.into());
        }

        let consumer = match transport.consume(&producer.id, capabilities, true).await {
            Ok(consumer) => consumer,
            Err(e) => {
                transport.close().await;
                return Err(e.into());
            }
        };

        let audio = match NegotiatedAudio::from_parameters(producer, &consumer.rtp_parameters()) {
            Ok(audio) => audio,
            Err(e) => {
                consumer.close().await;
                transport.close().await;
                return Err(e);
            }
        };

        tracing::info!(
            "Relay ready for producer {}: transport={} consumer={} -> {} ({} pt={} ssrc={})",
            producer.id,
            transport.id(),
            consumer.id(),
            reservation.addr(),
            audio.codec,
            audio.payload_type,
            audio.ssrc
        );

        Ok(Relay {
            transport,
            consumer,
            reservation,
            audio,
        })
    }
}
