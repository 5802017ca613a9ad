//! Recording system module
//!
//! One recording session per audio producer:
//! - RecordingSessionManager owns the registry and starts/stops sessions
//! - RecordingSession drives the relay, descriptor, recorder and conversion
//! - CleanupCoordinator stops sessions when the router closes their media

pub mod cleanup;
pub mod manager;
pub mod paths;
pub mod postprocess;
pub mod process;
pub mod session;
pub mod state;

pub use cleanup::CleanupCoordinator;
pub use manager::RecordingSessionManager;
pub use paths::SessionPaths;
pub use postprocess::PostProcessor;
pub use process::{
    classify_capture, CaptureJob, CaptureProcess, CaptureVerdict, ExitOutcome, FfmpegLauncher,
    ProcessLauncher, TranscodeJob, UsableReason,
};
pub use state::{SessionEvent, SessionSnapshot, SessionState};
