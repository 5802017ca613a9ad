//! Recording session lifecycle
//!
//! One `RecordingSession` drives one producer through the state machine in
//! `state.rs`. Each transition is its own method; the manager calls
//! `establish` (everything up to a running recorder) and then `run` on a
//! dedicated task (streaming, stop, post-processing, close).

use super::paths::SessionPaths;
use super::postprocess::PostProcessor;
use super::process::{CaptureJob, CaptureVerdict, ProcessLauncher, RecorderSupervisor, SettleOutcome};
use super::state::{SessionEvent, SessionSnapshot, SessionState};
use crate::config::RecordingConfig;
use crate::media::{MediaRouter, ProducerInfo, RtpCapabilities};
use crate::relay::{Relay, RelayBuilder};
use crate::sdp::SessionDescriptor;
use crate::utils::{RecorderError, RecorderResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

/// Collaborators shared by all sessions
#[derive(Clone)]
pub struct SessionContext {
    pub router: Arc<dyn MediaRouter>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub config: Arc<RecordingConfig>,
}

impl SessionContext {
    pub fn relay_builder(&self) -> RelayBuilder {
        RelayBuilder::new(self.router.clone(), self.config.relay_listen_ip)
    }
}

/// Registry-side view of a session, shared with its task
pub struct SessionHandle {
    pub session_id: Uuid,
    pub producer: ProducerInfo,
    pub paths: SessionPaths,
    pub started_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    stop_tx: watch::Sender<bool>,
    relay_transport_id: Mutex<Option<String>>,
    derived_path: Mutex<Option<PathBuf>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    pub fn new(
        producer: ProducerInfo,
        recordings_dir: &std::path::Path,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let started_at = Utc::now();
        let (stop_tx, _) = watch::channel(false);
        Self {
            session_id: Uuid::new_v4(),
            paths: SessionPaths::new(recordings_dir, &producer, started_at),
            producer,
            started_at,
            state: Mutex::new(SessionState::Created),
            stop_tx,
            relay_transport_id: Mutex::new(None),
            derived_path: Mutex::new(None),
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn relay_transport_id(&self) -> Option<String> {
        self.relay_transport_id.lock().clone()
    }

    /// Ask the session to stop. Returns false if a stop was already requested.
    pub fn request_stop(&self) -> bool {
        self.stop_tx.send_if_modified(|stop| {
            if *stop {
                false
            } else {
                *stop = true;
                true
            }
        })
    }

    pub fn stop_requested(&self) -> bool {
        *self.stop_tx.borrow()
    }

    fn stop_receiver(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// Move to `next`, logging illegal transitions instead of panicking
    fn advance(&self, next: SessionState) {
        {
            let mut state = self.state.lock();
            if !state.can_advance_to(next) {
                tracing::warn!(
                    "Producer {}: unexpected transition {} -> {}",
                    self.producer.id,
                    *state,
                    next
                );
            }
            tracing::debug!("Producer {}: {} -> {}", self.producer.id, *state, next);
            *state = next;
        }
        let _ = self.events.send(SessionEvent::StateChanged {
            producer_id: self.producer.id.clone(),
            state: next,
        });
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            producer_id: self.producer.id.clone(),
            peer_id: self.producer.peer_id.clone(),
            state: self.state(),
            output_path: self.paths.raw.clone(),
            derived_path: self.derived_path.lock().clone(),
            started_at: self.started_at,
        }
    }
}

/// The task-side state of a session
pub struct RecordingSession {
    handle: Arc<SessionHandle>,
    ctx: SessionContext,
    capabilities: RtpCapabilities,
    stop_rx: watch::Receiver<bool>,
    relay: Option<Relay>,
    supervisor: Option<RecorderSupervisor>,
    descriptor_written: bool,
}

impl RecordingSession {
    /// `capabilities` must already have passed `RelayBuilder::check`
    pub fn new(handle: Arc<SessionHandle>, ctx: SessionContext, capabilities: RtpCapabilities) -> Self {
        let stop_rx = handle.stop_receiver();
        Self {
            handle,
            ctx,
            capabilities,
            stop_rx,
            relay: None,
            supervisor: None,
            descriptor_written: false,
        }
    }

    fn producer(&self) -> &ProducerInfo {
        &self.handle.producer
    }

    fn check_stop(&self) -> RecorderResult<()> {
        if self.handle.stop_requested() {
            Err(RecorderError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// CREATED -> RELAY_READY -> DESCRIPTOR_WRITTEN -> PROCESS_STARTED
    pub async fn establish(&mut self) -> RecorderResult<()> {
        self.build_relay().await?;
        self.check_stop()?;
        self.write_descriptor()?;
        self.check_stop()?;
        self.spawn_recorder().await
    }

    /// CREATED -> RELAY_READY
    async fn build_relay(&mut self) -> RecorderResult<()> {
        let relay = self
            .ctx
            .relay_builder()
            .build(&self.handle.producer, &self.capabilities)
            .await?;
        *self.handle.relay_transport_id.lock() = Some(relay.transport.id().to_string());
        self.relay = Some(relay);
        self.handle.advance(SessionState::RelayReady);
        Ok(())
    }

    /// RELAY_READY -> DESCRIPTOR_WRITTEN
    fn write_descriptor(&mut self) -> RecorderResult<()> {
        let relay = self
            .relay
            .as_ref()
            .ok_or_else(|| RecorderError::RelayTransport("relay not built".to_string()))?;
        let fallback_cname = self.handle.session_id.simple().to_string();
        SessionDescriptor::for_relay(relay, &fallback_cname).write_to(&self.handle.paths.descriptor)?;
        self.descriptor_written = true;
        self.handle.advance(SessionState::DescriptorWritten);
        Ok(())
    }

    /// DESCRIPTOR_WRITTEN -> PROCESS_STARTED
    async fn spawn_recorder(&mut self) -> RecorderResult<()> {
        // Hand the port over as late as possible
        if let Some(relay) = self.relay.as_mut() {
            relay.reservation.release();
        }

        let job = CaptureJob {
            producer_id: self.producer().id.clone(),
            descriptor_path: self.handle.paths.descriptor.clone(),
            output_path: self.handle.paths.raw.clone(),
        };
        let process = self.ctx.launcher.spawn_capture(&job).await?;
        let supervisor = RecorderSupervisor::new(process);
        tracing::info!(
            "Recorder started for producer {} (pid {:?}) -> {:?}",
            self.producer().id,
            supervisor.pid(),
            self.handle.paths.raw
        );
        self.supervisor = Some(supervisor);
        self.handle.advance(SessionState::ProcessStarted);
        Ok(())
    }

    /// Release whatever `establish` allocated and move to FAILED
    pub async fn abort(mut self, error: &RecorderError) -> SessionEvent {
        if let Some(relay) = self.relay.as_mut() {
            relay.close().await;
        }
        self.remove_descriptor().await;
        self.handle.advance(SessionState::Failed);

        SessionEvent::Failed {
            producer_id: self.producer().id.clone(),
            reason: error.to_string(),
        }
    }

    /// Drive a started session to CLOSED
    pub async fn run(mut self) -> SessionEvent {
        self.begin_streaming().await;

        if self.handle.state() == SessionState::Streaming {
            if let Some(supervisor) = self.supervisor.as_mut() {
                match supervisor.run_until_stop(&mut self.stop_rx).await {
                    Ok(Some(outcome)) => tracing::info!(
                        "Recorder for producer {} exited on its own ({})",
                        self.handle.producer.id,
                        outcome
                    ),
                    Ok(None) => tracing::info!("Stop requested for producer {}", self.handle.producer.id),
                    Err(e) => tracing::error!("Producer {}: {}", self.handle.producer.id, e),
                }
            }
        }

        self.stop().await;
        let derived_path = self.post_process().await;
        self.handle.advance(SessionState::Closed);

        let raw = self.handle.paths.raw.clone();
        let raw_path = match tokio::fs::try_exists(&raw).await {
            Ok(true) => Some(raw),
            _ => None,
        };
        tracing::info!(
            "Recording closed for producer {}: raw={:?} derived={:?}",
            self.handle.producer.id,
            raw_path,
            derived_path
        );

        SessionEvent::Closed {
            producer_id: self.producer().id.clone(),
            raw_path,
            derived_path,
        }
    }

    /// PROCESS_STARTED -> STREAMING, after the settling delay
    ///
    /// Leaves the state at PROCESS_STARTED when a stop arrives, the
    /// recorder exits, or the consumer can't be resumed; `run` then goes
    /// straight to STOPPING.
    async fn begin_streaming(&mut self) {
        let Some(supervisor) = self.supervisor.as_mut() else {
            return;
        };

        match supervisor.settle(self.ctx.config.settle_delay, &mut self.stop_rx).await {
            Ok(SettleOutcome::Settled) => {}
            Ok(SettleOutcome::StopRequested) => {
                tracing::info!(
                    "Stop requested for producer {} before media started",
                    self.handle.producer.id
                );
                return;
            }
            Ok(SettleOutcome::Exited(outcome)) => {
                let error = RecorderError::spawn(
                    "recorder",
                    format!("exited during settling ({}), receive port may be taken", outcome),
                );
                tracing::error!("Producer {}: {}", self.handle.producer.id, error);
                return;
            }
            Err(e) => {
                tracing::error!("Producer {}: {}", self.handle.producer.id, e);
                return;
            }
        }

        let Some(relay) = self.relay.as_ref() else {
            return;
        };
        match relay.consumer.resume().await {
            Ok(()) => {
                tracing::info!("Media flowing for producer {}", self.handle.producer.id);
                self.handle.advance(SessionState::Streaming);
            }
            Err(e) => tracing::error!(
                "Failed to resume consumer for producer {}: {}",
                self.handle.producer.id,
                e
            ),
        }
    }

    /// -> STOPPING: close the relay, then interrupt the recorder
    async fn stop(&mut self) {
        self.handle.advance(SessionState::Stopping);

        if let Some(relay) = self.relay.as_mut() {
            relay.close().await;
        }

        if let Some(supervisor) = self.supervisor.as_mut() {
            match supervisor.stop(self.ctx.config.stop_grace).await {
                Ok(outcome) => tracing::info!(
                    "Recorder for producer {} exited ({})",
                    self.handle.producer.id,
                    outcome
                ),
                Err(e) => tracing::error!(
                    "Failed to stop recorder for producer {}: {}",
                    self.handle.producer.id,
                    e
                ),
            }
        }

        self.remove_descriptor().await;
    }

    /// STOPPING -> POST_PROCESSING, when the capture deserves it
    async fn post_process(&mut self) -> Option<PathBuf> {
        let supervisor = self.supervisor.as_ref()?;
        let config = &self.ctx.config;
        let raw = &self.handle.paths.raw;

        let (verdict, size) = supervisor.verify(raw, config.min_capture_bytes).await;
        match &verdict {
            CaptureVerdict::Usable(reason) => tracing::info!(
                "Capture for producer {} usable ({:?}, {} bytes)",
                self.handle.producer.id,
                reason,
                size
            ),
            CaptureVerdict::Unusable(why) => tracing::warn!(
                "Capture for producer {} unusable: {}",
                self.handle.producer.id,
                why
            ),
        }

        if !config.post_conversion_enabled() || !verdict.is_usable() || size < config.min_capture_bytes {
            return None;
        }

        self.handle.advance(SessionState::PostProcessing);
        let processor = PostProcessor::from_config(self.ctx.launcher.clone(), config);
        match processor.run(raw, &self.handle.paths.derived).await {
            Ok(path) => {
                *self.handle.derived_path.lock() = Some(path.clone());
                Some(path)
            }
            Err(e) => {
                tracing::warn!(
                    "Producer {}: {}; keeping raw capture {:?}",
                    self.handle.producer.id,
                    e,
                    raw
                );
                None
            }
        }
    }

    async fn remove_descriptor(&mut self) {
        if !self.descriptor_written {
            return;
        }
        let path = &self.handle.paths.descriptor;
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::debug!("Removed descriptor {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove descriptor {:?}: {}", path, e),
        }
        self.descriptor_written = false;
    }
}
