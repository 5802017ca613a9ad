//! Recording session manager
//!
//! Owns the registry of active sessions keyed by producer id. Insertion and
//! removal go through the map's entry API, so two sessions can never exist
//! for one producer. Recording is a side channel of the media session:
//! nothing here returns an error to the caller.

use super::process::ProcessLauncher;
use super::session::{RecordingSession, SessionContext, SessionHandle};
use super::state::{SessionEvent, SessionSnapshot};
use crate::config::RecordingConfig;
use crate::media::{MediaRouter, ProducerId, ProducerInfo};
use crate::utils::RecorderError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Registry and entry point for recording sessions
pub struct RecordingSessionManager {
    ctx: SessionContext,
    sessions: DashMap<ProducerId, Arc<SessionHandle>>,
    event_tx: broadcast::Sender<SessionEvent>,
    closing: AtomicBool,
}

impl RecordingSessionManager {
    pub fn new(
        router: Arc<dyn MediaRouter>,
        launcher: Arc<dyn ProcessLauncher>,
        config: RecordingConfig,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            ctx: SessionContext {
                router,
                launcher,
                config: Arc::new(config),
            },
            sessions: DashMap::new(),
            event_tx,
            closing: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &RecordingConfig {
        &self.ctx.config
    }

    /// Refuse new sessions from now on. Running sessions are not touched.
    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Start recording `producer`
    ///
    /// No-op if a session already exists for this producer. Returns true
    /// once the recorder is running; every failure is logged and the
    /// session's resources released.
    pub async fn start_session(self: &Arc<Self>, producer: ProducerInfo) -> bool {
        let producer_id = producer.id.clone();
        if self.is_closing() {
            tracing::debug!("Shutting down, not recording producer {}", producer_id);
            return false;
        }
        if self.sessions.contains_key(&producer_id) {
            tracing::debug!("Producer {} is already being recorded", producer_id);
            return false;
        }

        let capabilities = match self.ctx.relay_builder().check(&producer) {
            Ok(capabilities) => capabilities,
            Err(e) => {
                tracing::warn!("Not recording producer {}: {}", producer_id, e);
                self.emit(SessionEvent::Failed {
                    producer_id,
                    reason: e.to_string(),
                });
                return false;
            }
        };

        let handle = Arc::new(SessionHandle::new(
            producer,
            &self.ctx.config.recordings_dir,
            self.event_tx.clone(),
        ));
        match self.sessions.entry(producer_id.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!("Producer {} is already being recorded", producer_id);
                return false;
            }
            Entry::Vacant(entry) => {
                entry.insert(handle.clone());
            }
        }
        // Registered after a shutdown snapshot: `stop_all` would never see it
        if self.is_closing() {
            self.sessions.remove(&producer_id);
            tracing::debug!("Shutting down, not recording producer {}", producer_id);
            return false;
        }

        tracing::info!(
            "Recording session {} started for producer {} (peer {})",
            handle.session_id,
            producer_id,
            handle.producer.peer_id
        );
        self.emit(SessionEvent::Started {
            producer_id: producer_id.clone(),
            output_path: handle.paths.raw.clone(),
        });

        let mut session = RecordingSession::new(handle, self.ctx.clone(), capabilities);
        if let Err(e) = session.establish().await {
            match &e {
                RecorderError::Cancelled => tracing::info!("Producer {}: {}", producer_id, e),
                _ => tracing::error!("Recording failed for producer {}: {}", producer_id, e),
            }
            let event = session.abort(&e).await;
            self.sessions.remove(&producer_id);
            self.emit(event);
            return false;
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let event = session.run().await;
            manager.sessions.remove(&producer_id);
            manager.emit(event);
        });
        true
    }

    /// Stop recording `producer_id`
    ///
    /// No-op if there is no session or it is already stopping. Returns
    /// true if this call requested the stop.
    pub fn stop_session(&self, producer_id: &ProducerId) -> bool {
        let Some(handle) = self.sessions.get(producer_id).map(|h| Arc::clone(h.value())) else {
            tracing::debug!("No recording session for producer {}", producer_id);
            return false;
        };
        let requested = handle.request_stop();
        if requested {
            tracing::info!(
                "Stopping recording for producer {} (state {})",
                producer_id,
                handle.state()
            );
        }
        requested
    }

    /// Snapshot of all active sessions
    pub fn list_sessions(&self) -> Vec<SessionSnapshot> {
        let mut sessions: Vec<SessionSnapshot> =
            self.sessions.iter().map(|entry| entry.value().snapshot()).collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        sessions
    }

    pub fn session(&self, producer_id: &ProducerId) -> Option<SessionSnapshot> {
        self.sessions.get(producer_id).map(|h| h.snapshot())
    }

    pub fn contains(&self, producer_id: &ProducerId) -> bool {
        self.sessions.contains_key(producer_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Producer whose relay runs over `transport_id`
    pub fn producer_for_relay(&self, transport_id: &str) -> Option<ProducerId> {
        self.sessions
            .iter()
            .find(|entry| entry.value().relay_transport_id().as_deref() == Some(transport_id))
            .map(|entry| entry.key().clone())
    }

    /// Wait until `producer_id` has left the registry
    ///
    /// Returns the final event, or `None` if there was no session.
    pub async fn wait_closed(&self, producer_id: &ProducerId) -> Option<SessionEvent> {
        let mut events = self.subscribe();
        if !self.contains(producer_id) {
            return None;
        }
        loop {
            match events.recv().await {
                Ok(event) if event.is_final() && event.producer_id() == producer_id => {
                    return Some(event);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if !self.contains(producer_id) {
                        return None;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Stop every session and wait for all of them to close
    ///
    /// Call `close` first to keep new sessions from starting meanwhile.
    pub async fn stop_all(&self) {
        let ids: Vec<ProducerId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in &ids {
            self.stop_session(id);
        }
        for id in &ids {
            self.wait_closed(id).await;
        }
    }
}
