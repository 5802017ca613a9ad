//! Post-processing pipeline
//!
//! Converts a raw capture to MP3 once the recorder has exited. Failures
//! leave the raw capture in place.

use super::process::{file_size, ProcessLauncher, TranscodeJob};
use crate::config::{Bitrate, RecordingConfig};
use crate::utils::{RecorderError, RecorderResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Output sample rate, chosen for player compatibility
pub const TARGET_SAMPLE_RATE: u32 = 44100;

/// Output channel count
pub const TARGET_CHANNELS: u8 = 2;

/// Converts raw captures
pub struct PostProcessor {
    launcher: Arc<dyn ProcessLauncher>,
    bitrate: Bitrate,
    keep_raw: bool,
}

impl PostProcessor {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, bitrate: Bitrate, keep_raw: bool) -> Self {
        Self {
            launcher,
            bitrate,
            keep_raw,
        }
    }

    pub fn from_config(launcher: Arc<dyn ProcessLauncher>, config: &RecordingConfig) -> Self {
        Self::new(launcher, config.mp3_bitrate, config.keep_raw)
    }

    pub fn job(&self, raw_path: &Path, derived_path: &Path) -> TranscodeJob {
        TranscodeJob {
            input_path: raw_path.to_path_buf(),
            output_path: derived_path.to_path_buf(),
            bitrate: self.bitrate,
            sample_rate: TARGET_SAMPLE_RATE,
            channels: TARGET_CHANNELS,
        }
    }

    /// Convert `raw_path` into `derived_path`
    ///
    /// On success the raw file is removed unless configured to keep it. On
    /// failure a partial derived file is removed and the error returned.
    pub async fn run(&self, raw_path: &Path, derived_path: &Path) -> RecorderResult<PathBuf> {
        let job = self.job(raw_path, derived_path);
        let result = self.launcher.transcode(&job).await;

        let failure = match result {
            Ok(outcome) if outcome.is_success() => {
                if file_size(derived_path).await > 0 {
                    None
                } else {
                    Some(RecorderError::PostConversion(format!(
                        "converter exited cleanly but {:?} is empty",
                        derived_path
                    )))
                }
            }
            Ok(outcome) => Some(RecorderError::PostConversion(format!(
                "converter {}",
                outcome
            ))),
            Err(e) => Some(e),
        };

        if let Some(error) = failure {
            if let Err(e) = tokio::fs::remove_file(derived_path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove partial {:?}: {}", derived_path, e);
                }
            }
            return Err(error);
        }

        tracing::info!("Converted {:?} -> {:?} at {}", raw_path, derived_path, self.bitrate);

        if !self.keep_raw {
            match tokio::fs::remove_file(raw_path).await {
                Ok(()) => tracing::debug!("Removed raw capture {:?}", raw_path),
                Err(e) => tracing::warn!("Failed to remove raw capture {:?}: {}", raw_path, e),
            }
        }

        Ok(derived_path.to_path_buf())
    }
}
