//! Recording state management
//!
//! Defines the per-session state machine and the snapshots exposed for
//! observability.

use crate::media::ProducerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Lifecycle state of one recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Registered, nothing allocated yet
    Created,
    /// Relay transport and paused consumer exist
    RelayReady,
    /// Session descriptor is on disk
    DescriptorWritten,
    /// Recorder process spawned, consumer still paused
    ProcessStarted,
    /// Consumer resumed, media flowing
    Streaming,
    /// Relay closed, waiting for the recorder to exit
    Stopping,
    /// Converting the raw capture
    PostProcessing,
    /// All resources released
    Closed,
    /// Aborted; all resources released
    Failed,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Created
    }
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Legal transitions
    ///
    /// `Stopping` is reachable from `ProcessStarted` when a stop arrives
    /// during the settling delay, and `Closed` from `Stopping` when no
    /// conversion runs. `Failed` is reachable from any state that has not
    /// spawned a recorder yet.
    pub fn can_advance_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Created, RelayReady)
            | (RelayReady, DescriptorWritten)
            | (DescriptorWritten, ProcessStarted)
            | (ProcessStarted, Streaming)
            | (ProcessStarted, Stopping)
            | (Streaming, Stopping)
            | (Stopping, PostProcessing)
            | (Stopping, Closed)
            | (PostProcessing, Closed) => true,
            (Created | RelayReady | DescriptorWritten, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::RelayReady => "relay_ready",
            Self::DescriptorWritten => "descriptor_written",
            Self::ProcessStarted => "process_started",
            Self::Streaming => "streaming",
            Self::Stopping => "stopping",
            Self::PostProcessing => "post_processing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Read-only view of an active session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub producer_id: ProducerId,
    pub peer_id: String,
    pub state: SessionState,
    /// Raw capture path
    pub output_path: PathBuf,
    /// Converted artifact, once produced
    pub derived_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
}

/// Events emitted by the session manager
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Session registered
    Started {
        producer_id: ProducerId,
        output_path: PathBuf,
    },
    /// Session moved to a new state
    StateChanged {
        producer_id: ProducerId,
        state: SessionState,
    },
    /// Session removed from the registry after a normal close
    Closed {
        producer_id: ProducerId,
        raw_path: Option<PathBuf>,
        derived_path: Option<PathBuf>,
    },
    /// Session removed from the registry after an abort
    Failed {
        producer_id: ProducerId,
        reason: String,
    },
}

impl SessionEvent {
    pub fn producer_id(&self) -> &ProducerId {
        match self {
            Self::Started { producer_id, .. }
            | Self::StateChanged { producer_id, .. }
            | Self::Closed { producer_id, .. }
            | Self::Failed { producer_id, .. } => producer_id,
        }
    }

    /// Whether the session has left the registry
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Failed { .. })
    }
}
