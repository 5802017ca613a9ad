//! Control-plane command handlers
//!
//! The operations browser clients use to join the media session and to
//! inspect/stop recordings. Transport-agnostic: an HTTP layer maps its
//! routes onto these methods and serializes the results or
//! `ErrorResponse`s.

pub mod media;
pub mod recording;

pub use media::{ConnectTransportRequest, ProduceRequest, ProduceResponse};
pub use recording::{ProducerListing, StopRecordingResponse};

use crate::media::MediaRouter;
use crate::recorder::RecordingSessionManager;
use std::sync::Arc;

/// Shared state behind every command
#[derive(Clone)]
pub struct ControlPlane {
    router: Arc<dyn MediaRouter>,
    manager: Arc<RecordingSessionManager>,
}

impl ControlPlane {
    pub fn new(router: Arc<dyn MediaRouter>, manager: Arc<RecordingSessionManager>) -> Self {
        Self { router, manager }
    }
}
