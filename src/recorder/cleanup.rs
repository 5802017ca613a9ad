//! Cleanup coordinator
//!
//! Turns close signals from the media router into stop requests. A
//! producer usually gets both a producer-closed and a transport-closed
//! signal; it is stopped once, and forgotten when its session closes.

use super::manager::RecordingSessionManager;
use super::state::SessionEvent;
use crate::media::{ProducerId, RouterEvent};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub struct CleanupCoordinator {
    manager: Arc<RecordingSessionManager>,
    signalled: HashSet<ProducerId>,
}

impl CleanupCoordinator {
    pub fn new(manager: Arc<RecordingSessionManager>) -> Self {
        Self {
            manager,
            signalled: HashSet::new(),
        }
    }

    /// Subscribe to both event sources and run until the router goes away
    pub fn spawn(
        manager: Arc<RecordingSessionManager>,
        router_events: broadcast::Receiver<RouterEvent>,
    ) -> JoinHandle<()> {
        let session_events = manager.subscribe();
        let coordinator = Self::new(manager);
        tokio::spawn(coordinator.run(router_events, session_events))
    }

    /// Handle one router signal; returns the producers stopped by it
    pub fn handle_router_event(&mut self, event: RouterEvent) -> Vec<ProducerId> {
        let candidates = match event {
            RouterEvent::ProducerClosed { producer_id } => vec![producer_id],
            RouterEvent::TransportClosed {
                transport_id,
                mut producer_ids,
            } => {
                // The closed transport may be one of our relays
                if let Some(id) = self.manager.producer_for_relay(&transport_id) {
                    if !producer_ids.contains(&id) {
                        producer_ids.push(id);
                    }
                }
                producer_ids
            }
        };

        candidates
            .into_iter()
            .filter(|id| self.signal(id))
            .collect()
    }

    fn signal(&mut self, producer_id: &ProducerId) -> bool {
        if self.signalled.contains(producer_id) {
            tracing::debug!("Producer {} already signalled", producer_id);
            return false;
        }
        if !self.manager.stop_session(producer_id) {
            return false;
        }
        self.signalled.insert(producer_id.clone());
        true
    }

    /// Forget producers whose session has closed
    pub fn handle_session_event(&mut self, event: &SessionEvent) {
        if event.is_final() {
            self.signalled.remove(event.producer_id());
        }
    }

    pub async fn run(
        mut self,
        mut router_events: broadcast::Receiver<RouterEvent>,
        mut session_events: broadcast::Receiver<SessionEvent>,
    ) {
        tracing::debug!("Cleanup coordinator running");
        loop {
            tokio::select! {
                event = router_events.recv() => match event {
                    Ok(event) => {
                        for id in self.handle_router_event(event) {
                            tracing::info!("Producer {} closed, recording stopped", id);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Cleanup coordinator missed {} router events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                event = session_events.recv() => match event {
                    Ok(event) => self.handle_session_event(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Cleanup coordinator missed {} session events", n);
                        let manager = &self.manager;
                        self.signalled.retain(|id| manager.contains(id));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        tracing::debug!("Cleanup coordinator stopped");
    }
}
