//! Media negotiation commands

use super::ControlPlane;
use crate::media::{MediaKind, RtpCapabilities, WebRtcTransportParams};
use crate::utils::ErrorResponse;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportRequest {
    pub transport_id: String,
    pub dtls_parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    pub transport_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: serde_json::Value,
    #[serde(default)]
    pub app_data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProduceResponse {
    pub id: String,
}

impl ControlPlane {
    /// Router capabilities a client loads its device with
    pub fn rtp_capabilities(&self) -> RtpCapabilities {
        self.router.rtp_capabilities()
    }

    /// Create a WebRTC transport for a peer
    pub async fn create_transport(&self, peer_id: &str) -> Result<WebRtcTransportParams, ErrorResponse> {
        let params = self.router.create_webrtc_transport(peer_id).await?;
        tracing::info!("Created transport {} for peer {}", params.id, peer_id);
        Ok(params)
    }

    /// Connect a transport with the client's DTLS parameters
    pub async fn connect_transport(&self, request: ConnectTransportRequest) -> Result<(), ErrorResponse> {
        self.router
            .connect_webrtc_transport(&request.transport_id, request.dtls_parameters)
            .await?;
        tracing::debug!("Connected transport {}", request.transport_id);
        Ok(())
    }

    /// Start producing a stream and record it in the background
    ///
    /// Recording failures never fail this call.
    pub async fn produce(&self, request: ProduceRequest) -> Result<ProduceResponse, ErrorResponse> {
        let producer = self
            .router
            .produce(
                &request.transport_id,
                request.kind,
                request.rtp_parameters,
                request.app_data,
            )
            .await?;

        tracing::info!(
            "Peer {} produced {:?} as {}",
            producer.peer_id,
            producer.kind,
            producer.id
        );

        let response = ProduceResponse {
            id: producer.id.to_string(),
        };
        if producer.kind == MediaKind::Audio {
            let manager = self.manager.clone();
            tokio::spawn(async move {
                manager.start_session(producer).await;
            });
        }
        Ok(response)
    }
}
