//! Recording commands

use super::ControlPlane;
use crate::media::{MediaKind, ProducerId};
use crate::recorder::SessionState;
use crate::utils::{AppError, ErrorResponse};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A live producer and its recording, if any
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerListing {
    pub producer_id: ProducerId,
    pub peer_id: String,
    pub kind: MediaKind,
    pub recording_path: Option<PathBuf>,
    pub recording_state: Option<SessionState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRecordingResponse {
    pub stopped: bool,
}

impl ControlPlane {
    /// Live producers joined with their recording sessions
    pub fn list_producers(&self) -> Vec<ProducerListing> {
        self.router
            .producers()
            .into_iter()
            .map(|producer| {
                let session = self.manager.session(&producer.id);
                ProducerListing {
                    recording_path: session.as_ref().map(|s| s.output_path.clone()),
                    recording_state: session.map(|s| s.state),
                    producer_id: producer.id,
                    peer_id: producer.peer_id,
                    kind: producer.kind,
                }
            })
            .collect()
    }

    /// Stop recording a producer
    ///
    /// Unknown producers are an error; a producer that isn't being
    /// recorded is not.
    pub fn stop_recording(&self, producer_id: &str) -> Result<StopRecordingResponse, ErrorResponse> {
        let producer_id = ProducerId::from(producer_id);
        let known = self.manager.contains(&producer_id)
            || self.router.producers().iter().any(|p| p.id == producer_id);
        if !known {
            return Err(AppError::NotFound(format!("producer {}", producer_id)).into());
        }

        Ok(StopRecordingResponse {
            stopped: self.manager.stop_session(&producer_id),
        })
    }
}
