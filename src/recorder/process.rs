//! Recorder process supervision
//!
//! The capture itself is done by an external tool (ffmpeg) reading the
//! session descriptor and copying the audio payload into the raw file.
//! `ProcessLauncher` is the seam between the session lifecycle and the
//! operating system; `FfmpegLauncher` is the production implementation.

use crate::config::{Bitrate, RecordingConfig};
use crate::media::ProducerId;
use crate::utils::{RecorderError, RecorderResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::watch;

/// SIGINT. ffmpeg finalizes the container when it receives it.
pub const INTERRUPT_SIGNAL: i32 = 2;

/// ffmpeg's exit code after handling SIGINT
pub const FFMPEG_INTERRUPTED_CODE: i32 = 255;

/// How a process terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitOutcome {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitOutcome {
    pub fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn from_signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit caused by our own interrupt
    pub fn is_interrupt(&self) -> bool {
        self.signal == Some(INTERRUPT_SIGNAL) || self.code == Some(FFMPEG_INTERRUPTED_CODE)
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => f.write_str("unknown exit"),
        }
    }
}

/// Why a capture was accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsableReason {
    /// Recorder exited with its success code
    CleanExit,
    /// Recorder stopped on our interrupt with enough data
    GracefulStop,
    /// Ambiguous exit, but the file holds enough data
    SizeEvidence,
}

/// Result of validating a raw capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureVerdict {
    Usable(UsableReason),
    Unusable(String),
}

impl CaptureVerdict {
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Usable(_))
    }
}

/// Classify a finished capture
///
/// An empty or missing file is never usable. A clean exit is always
/// usable. Any other exit, including the one caused by our own interrupt,
/// needs at least `min_bytes` of data.
pub fn classify_capture(
    outcome: &ExitOutcome,
    interrupted: bool,
    raw_size: u64,
    min_bytes: u64,
) -> CaptureVerdict {
    if raw_size == 0 {
        return CaptureVerdict::Unusable(format!("no data captured ({})", outcome));
    }
    if outcome.is_success() {
        return CaptureVerdict::Usable(UsableReason::CleanExit);
    }
    if raw_size < min_bytes {
        return CaptureVerdict::Unusable(format!(
            "{} with only {} bytes (< {})",
            outcome, raw_size, min_bytes
        ));
    }
    if interrupted && outcome.is_interrupt() {
        CaptureVerdict::Usable(UsableReason::GracefulStop)
    } else {
        CaptureVerdict::Usable(UsableReason::SizeEvidence)
    }
}

/// Size of a file, 0 if it does not exist
pub async fn file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

/// What the recorder should capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureJob {
    pub producer_id: ProducerId,
    pub descriptor_path: PathBuf,
    pub output_path: PathBuf,
}

/// What the transcoder should produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeJob {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub bitrate: Bitrate,
    pub sample_rate: u32,
    pub channels: u8,
}

/// A running capture process
#[async_trait]
pub trait CaptureProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Ask the process to finalize and exit
    fn interrupt(&mut self) -> RecorderResult<()>;

    /// Terminate the process immediately
    fn kill(&mut self) -> RecorderResult<()>;

    /// Wait for the process to exit. Must be cancel-safe.
    async fn wait(&mut self) -> RecorderResult<ExitOutcome>;
}

/// Starts the external processes used by a session
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn spawn_capture(&self, job: &CaptureJob) -> RecorderResult<Box<dyn CaptureProcess>>;

    /// Run a transcode to completion
    async fn transcode(&self, job: &TranscodeJob) -> RecorderResult<ExitOutcome>;
}

/// Launches ffmpeg for capture and conversion
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    program: PathBuf,
}

impl FfmpegLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Launcher for the program configured as `FFMPEG_PATH`
    pub fn from_config(config: &RecordingConfig) -> Self {
        Self::new(config.ffmpeg_path.clone())
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn program_name(&self) -> String {
        self.program.to_string_lossy().to_string()
    }

    /// Arguments for a codec-copy capture from the descriptor
    pub fn capture_args(job: &CaptureJob) -> Vec<String> {
        vec![
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            "warning".to_string(),
            "-protocol_whitelist".to_string(),
            "file,udp,rtp".to_string(),
            "-fflags".to_string(),
            "+genpts".to_string(),
            "-i".to_string(),
            job.descriptor_path.to_string_lossy().to_string(),
            "-map".to_string(),
            "0:a:0".to_string(),
            "-c:a".to_string(),
            "copy".to_string(),
            "-y".to_string(),
            job.output_path.to_string_lossy().to_string(),
        ]
    }

    /// Arguments for the MP3 conversion
    pub fn transcode_args(job: &TranscodeJob) -> Vec<String> {
        vec![
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            job.input_path.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-c:a".to_string(),
            "libmp3lame".to_string(),
            "-b:a".to_string(),
            job.bitrate.as_ffmpeg_arg(),
            "-ar".to_string(),
            job.sample_rate.to_string(),
            "-ac".to_string(),
            job.channels.to_string(),
            job.output_path.to_string_lossy().to_string(),
        ]
    }
}

impl Default for FfmpegLauncher {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl ProcessLauncher for FfmpegLauncher {
    async fn spawn_capture(&self, job: &CaptureJob) -> RecorderResult<Box<dyn CaptureProcess>> {
        let args = Self::capture_args(job);
        tracing::info!("Starting recorder for producer {}: {:?}", job.producer_id, args);

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RecorderError::spawn(self.program_name(), e))?;

        Ok(Box::new(FfmpegCapture { child }))
    }

    async fn transcode(&self, job: &TranscodeJob) -> RecorderResult<ExitOutcome> {
        let args = Self::transcode_args(job);
        tracing::info!("Starting conversion: {:?}", args);

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RecorderError::spawn(self.program_name(), e))?;

        let outcome = ExitOutcome::from_status(output.status);
        if !outcome.is_success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!("Conversion exited with {}: {}", outcome, stderr.trim());
        }
        Ok(outcome)
    }
}

/// An ffmpeg capture child
struct FfmpegCapture {
    child: Child,
}

#[async_trait]
impl CaptureProcess for FfmpegCapture {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    #[cfg(unix)]
    fn interrupt(&mut self) -> RecorderResult<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        // No pid: the child has already been reaped
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        match kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(RecorderError::Process(format!(
                "failed to interrupt pid {}: {}",
                pid, e
            ))),
        }
    }

    #[cfg(not(unix))]
    fn interrupt(&mut self) -> RecorderResult<()> {
        self.kill()
    }

    fn kill(&mut self) -> RecorderResult<()> {
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(RecorderError::Process(format!("failed to kill recorder: {}", e))),
        }
    }

    async fn wait(&mut self) -> RecorderResult<ExitOutcome> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| RecorderError::Process(format!("failed to wait for recorder: {}", e)))?;
        Ok(ExitOutcome::from_status(status))
    }
}

/// How the settling interval ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The recorder is still running after the delay
    Settled,
    /// A stop was requested during the delay
    StopRequested,
    /// The recorder exited during the delay
    Exited(ExitOutcome),
}

/// Supervises one capture process from spawn to exit
pub struct RecorderSupervisor {
    process: Box<dyn CaptureProcess>,
    interrupted: bool,
    exit: Option<ExitOutcome>,
}

impl RecorderSupervisor {
    pub fn new(process: Box<dyn CaptureProcess>) -> Self {
        Self {
            process,
            interrupted: false,
            exit: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Whether we sent the interrupt
    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    /// Exit already observed, if any
    pub fn exit(&self) -> Option<ExitOutcome> {
        self.exit
    }

    async fn wait_once(&mut self) -> RecorderResult<ExitOutcome> {
        if let Some(outcome) = self.exit {
            return Ok(outcome);
        }
        let outcome = self.process.wait().await?;
        self.exit = Some(outcome);
        Ok(outcome)
    }

    /// Give the recorder `delay` to bind its socket
    ///
    /// There is no readiness signal from the recorder, so this is a plain
    /// delay raced against early exit and stop requests.
    pub async fn settle(
        &mut self,
        delay: Duration,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> RecorderResult<SettleOutcome> {
        if *stop_rx.borrow() {
            return Ok(SettleOutcome::StopRequested);
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(SettleOutcome::Settled),
            _ = stop_rx.wait_for(|stop| *stop) => Ok(SettleOutcome::StopRequested),
            outcome = self.wait_once() => outcome.map(SettleOutcome::Exited),
        }
    }

    /// Wait until a stop is requested or the recorder exits on its own
    ///
    /// Returns `None` when a stop was requested.
    pub async fn run_until_stop(
        &mut self,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> RecorderResult<Option<ExitOutcome>> {
        if *stop_rx.borrow() {
            return Ok(None);
        }
        tokio::select! {
            stop = async { stop_rx.wait_for(|stop| *stop).await.map(|_| ()) } => match stop {
                Ok(()) => Ok(None),
                // Stop handle dropped: nobody can stop us, wait for exit
                Err(_) => self.wait_once().await.map(Some),
            },
            outcome = self.wait_once() => outcome.map(Some),
        }
    }

    /// Interrupt the recorder and wait for it to exit
    ///
    /// If it is still running after `grace` it is killed.
    pub async fn stop(&mut self, grace: Duration) -> RecorderResult<ExitOutcome> {
        if let Some(outcome) = self.exit {
            return Ok(outcome);
        }

        self.interrupted = true;
        if let Err(e) = self.process.interrupt() {
            tracing::warn!("{}", e);
        }

        match tokio::time::timeout(grace, self.wait_once()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    "Recorder pid {:?} ignored interrupt for {:?}, killing it",
                    self.pid(),
                    grace
                );
                // Still wait: the session must not close while the recorder may be alive
                if let Err(e) = self.process.kill() {
                    tracing::error!("{}", e);
                }
                self.wait_once().await
            }
        }
    }

    /// Validate the raw capture after exit
    pub async fn verify(&self, raw_path: &Path, min_bytes: u64) -> (CaptureVerdict, u64) {
        let outcome = self.exit.unwrap_or_default();
        let interrupted = self.interrupted;
        let size = file_size(raw_path).await;
        (
            classify_capture(&outcome, interrupted, size, min_bytes),
            size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[test]
    fn test_clean_exit_is_usable_even_when_small() {
        let verdict = classify_capture(&ExitOutcome::from_code(0), false, 100, 4096);
        assert_eq!(verdict, CaptureVerdict::Usable(UsableReason::CleanExit));
    }

    #[test]
    fn test_empty_capture_is_never_usable() {
        let verdict = classify_capture(&ExitOutcome::from_code(0), false, 0, 4096);
        assert!(!verdict.is_usable());
    }

    #[test]
    fn test_interrupt_with_small_file_is_unusable() {
        let verdict = classify_capture(&ExitOutcome::from_signal(INTERRUPT_SIGNAL), true, 2048, 4096);
        assert!(!verdict.is_usable());
    }

    #[test]
    fn test_interrupt_with_enough_data_is_graceful() {
        let verdict = classify_capture(
            &ExitOutcome::from_code(FFMPEG_INTERRUPTED_CODE),
            true,
            50_000,
            4096,
        );
        assert_eq!(verdict, CaptureVerdict::Usable(UsableReason::GracefulStop));
    }

    #[test]
    fn test_ambiguous_exit_uses_size() {
        let outcome = ExitOutcome::from_code(1);
        assert_eq!(
            classify_capture(&outcome, false, 10_000, 4096),
            CaptureVerdict::Usable(UsableReason::SizeEvidence)
        );
        assert!(!classify_capture(&outcome, false, 1000, 4096).is_usable());
    }

    #[test]
    fn test_capture_args_copy_codec() {
        let job = CaptureJob {
            producer_id: ProducerId::from("p"),
            descriptor_path: PathBuf::from("/r/a.sdp"),
            output_path: PathBuf::from("/r/a.ogg"),
        };
        let args = FfmpegLauncher::capture_args(&job);
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1], "/r/a.sdp");
        assert!(args.windows(2).any(|w| w[0] == "-c:a" && w[1] == "copy"));
        assert_eq!(args.last().unwrap(), "/r/a.ogg");
    }

    #[test]
    fn test_transcode_args() {
        let job = TranscodeJob {
            input_path: PathBuf::from("in.ogg"),
            output_path: PathBuf::from("out.mp3"),
            bitrate: Bitrate(160),
            sample_rate: 44100,
            channels: 2,
        };
        let args = FfmpegLauncher::transcode_args(&job);
        assert!(args.windows(2).any(|w| w[0] == "-b:a" && w[1] == "160k"));
        assert!(args.windows(2).any(|w| w[0] == "-ar" && w[1] == "44100"));
        assert!(args.windows(2).any(|w| w[0] == "-ac" && w[1] == "2"));
    }

    /// Process that exits when interrupted, unless told to ignore it
    struct StubProcess {
        exited: Arc<Notify>,
        ignore_interrupt: bool,
        kill_fails: bool,
        killed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl CaptureProcess for StubProcess {
        fn pid(&self) -> Option<u32> {
            Some(42)
        }

        fn interrupt(&mut self) -> RecorderResult<()> {
            if !self.ignore_interrupt {
                self.exited.notify_one();
            }
            Ok(())
        }

        fn kill(&mut self) -> RecorderResult<()> {
            self.killed.store(true, Ordering::SeqCst);
            self.exited.notify_one();
            if self.kill_fails {
                Err(RecorderError::Process("kill: operation not permitted".to_string()))
            } else {
                Ok(())
            }
        }

        async fn wait(&mut self) -> RecorderResult<ExitOutcome> {
            self.exited.notified().await;
            if self.killed.load(Ordering::SeqCst) {
                Ok(ExitOutcome::from_signal(9))
            } else {
                Ok(ExitOutcome::from_code(FFMPEG_INTERRUPTED_CODE))
            }
        }
    }

    fn stub(ignore_interrupt: bool) -> (RecorderSupervisor, Arc<AtomicBool>) {
        stub_with(ignore_interrupt, false)
    }

    fn stub_with(ignore_interrupt: bool, kill_fails: bool) -> (RecorderSupervisor, Arc<AtomicBool>) {
        let killed = Arc::new(AtomicBool::new(false));
        let process = StubProcess {
            exited: Arc::new(Notify::new()),
            ignore_interrupt,
            kill_fails,
            killed: killed.clone(),
        };
        (RecorderSupervisor::new(Box::new(process)), killed)
    }

    #[tokio::test]
    async fn test_stop_interrupts_gracefully() {
        let (mut supervisor, killed) = stub(false);
        let outcome = supervisor.stop(Duration::from_secs(5)).await.unwrap();
        assert!(outcome.is_interrupt());
        assert!(supervisor.interrupted());
        assert!(!killed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_escalates_to_kill_after_grace() {
        let (mut supervisor, killed) = stub(true);
        let outcome = supervisor.stop(Duration::from_millis(100)).await.unwrap();
        assert!(killed.load(Ordering::SeqCst));
        assert_eq!(outcome.signal, Some(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_exit_when_kill_fails() {
        let (mut supervisor, killed) = stub_with(true, true);
        let outcome = supervisor.stop(Duration::from_millis(100)).await.unwrap();
        assert!(killed.load(Ordering::SeqCst));
        assert_eq!(outcome.signal, Some(9));
        assert_eq!(supervisor.exit(), Some(outcome));
    }

    #[test]
    fn test_launcher_program_from_config() {
        let config = crate::config::ServiceConfig::from_lookup(|key| match key {
            "FFMPEG_PATH" => Some("/opt/ffmpeg/bin/ffmpeg".to_string()),
            _ => None,
        })
        .unwrap();
        let launcher = FfmpegLauncher::from_config(&config.recording);
        assert_eq!(launcher.program(), Path::new("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(FfmpegLauncher::default().program(), Path::new("ffmpeg"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_interrupt_terminates_real_child() {
        let child = Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let mut capture = FfmpegCapture { child };
        assert!(capture.pid().is_some());

        capture.interrupt().unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), capture.wait())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.signal, Some(INTERRUPT_SIGNAL));
        assert_eq!(outcome.code, None);
        assert!(outcome.is_interrupt());
        // Reaped: interrupting again is harmless
        capture.interrupt().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_returns_on_stop_request() {
        let (mut supervisor, _) = stub(false);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        stop_tx.send(true).unwrap();
        let outcome = supervisor
            .settle(Duration::from_secs(60), &mut stop_rx)
            .await
            .unwrap();
        assert_eq!(outcome, SettleOutcome::StopRequested);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_elapses() {
        let (mut supervisor, _) = stub(false);
        let (_stop_tx, mut stop_rx) = watch::channel(false);
        let outcome = supervisor
            .settle(Duration::from_millis(50), &mut stop_rx)
            .await
            .unwrap();
        assert_eq!(outcome, SettleOutcome::Settled);
    }
}
