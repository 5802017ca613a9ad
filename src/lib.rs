//! Stream Recorder - record live audio producers to disk.
//!
//! Every audio producer published to the media router gets a recording
//! session: a plain relay transport forwards its RTP to a local port, an
//! ffmpeg process captures it via a session descriptor, and the capture is
//! optionally transcoded to MP3 once the producer goes away.

pub mod commands;
pub mod config;
pub mod media;
pub mod recorder;
pub mod relay;
pub mod sdp;
pub mod utils;

use commands::ControlPlane;
use config::ServiceConfig;
use media::MediaRouter;
use recorder::{CleanupCoordinator, FfmpegLauncher, ProcessLauncher, RecordingSessionManager};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utils::{AppError, AppResult};

/// Initialize tracing/logging
///
/// `RUST_LOG` overrides the default filter. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stream_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// A running recorder attached to one media router
pub struct RecorderService {
    config: ServiceConfig,
    router: Arc<dyn MediaRouter>,
    manager: Arc<RecordingSessionManager>,
    cleanup: JoinHandle<()>,
}

impl RecorderService {
    /// Prepare the recordings directory and start watching the router
    pub async fn start(
        config: ServiceConfig,
        router: Arc<dyn MediaRouter>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> AppResult<Self> {
        let dir = &config.recording.recordings_dir;
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            tracing::error!("Failed to create recordings directory {}: {}", dir.display(), e);
            AppError::Io(e)
        })?;

        tracing::info!(
            "Starting Stream Recorder v{} (recordings in {}, output {:?})",
            env!("CARGO_PKG_VERSION"),
            dir.display(),
            config.recording.output_format
        );

        let manager =
            RecordingSessionManager::new(router.clone(), launcher, config.recording.clone());
        let cleanup = CleanupCoordinator::spawn(manager.clone(), router.subscribe());

        Ok(Self {
            config,
            router,
            manager,
            cleanup,
        })
    }

    /// Start with the production ffmpeg launcher from `FFMPEG_PATH`
    pub async fn start_with_ffmpeg(
        config: ServiceConfig,
        router: Arc<dyn MediaRouter>,
    ) -> AppResult<Self> {
        let launcher = FfmpegLauncher::from_config(&config.recording);
        tracing::debug!("Using ffmpeg at {}", launcher.program().display());
        Self::start(config, router, Arc::new(launcher)).await
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<RecordingSessionManager> {
        &self.manager
    }

    pub fn control_plane(&self) -> ControlPlane {
        ControlPlane::new(self.router.clone(), self.manager.clone())
    }

    /// Stop every recording, wait for post-processing, then detach
    pub async fn shutdown(self) {
        tracing::info!("Shutting down, {} active recordings", self.manager.session_count());
        self.manager.close();
        self.manager.stop_all().await;
        self.cleanup.abort();
        tracing::info!("Shutdown complete");
    }
}
