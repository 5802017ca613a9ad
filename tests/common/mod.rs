//! In-memory router and process launcher used by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stream_recorder::config::{Bitrate, RecordingConfig};
use stream_recorder::media::*;
use stream_recorder::recorder::{
    CaptureJob, CaptureProcess, ExitOutcome, ProcessLauncher, SessionEvent, SessionState,
    TranscodeJob,
};
use stream_recorder::utils::{RecorderError, RecorderResult};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_config(dir: &Path) -> RecordingConfig {
    RecordingConfig {
        recordings_dir: dir.to_path_buf(),
        settle_delay: Duration::from_millis(10),
        stop_grace: Duration::from_secs(1),
        ..Default::default()
    }
}

pub fn mp3_config(dir: &Path, bitrate: u32, keep_raw: bool) -> RecordingConfig {
    RecordingConfig {
        convert_to_mp3: true,
        mp3_bitrate: Bitrate(bitrate),
        keep_raw,
        ..test_config(dir)
    }
}

pub fn audio_producer(id: &str, peer: &str) -> ProducerInfo {
    ProducerInfo {
        id: ProducerId::from(id),
        peer_id: peer.to_string(),
        kind: MediaKind::Audio,
        app_data: serde_json::Value::Null,
    }
}

/// Files currently in `dir`, sorted
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    files.sort();
    files
}

pub fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    files_in(dir)
        .into_iter()
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(ext))
        .collect()
}

/// Wait for the closing event of `producer_id`
pub async fn next_final(
    events: &mut broadcast::Receiver<SessionEvent>,
    producer_id: &ProducerId,
) -> SessionEvent {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("event stream ended");
            if event.is_final() && event.producer_id() == producer_id {
                return event;
            }
        }
    })
    .await
    .expect("session did not finish in time")
}

/// Wait until `producer_id` reaches `state`
pub async fn wait_for_state(
    events: &mut broadcast::Receiver<SessionEvent>,
    producer_id: &ProducerId,
    state: SessionState,
) {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match events.recv().await.expect("event stream ended") {
                SessionEvent::StateChanged {
                    producer_id: id,
                    state: s,
                } if &id == producer_id && s == state => return,
                _ => {}
            }
        }
    })
    .await
    .expect("state not reached in time")
}

// -- Media router --

pub struct FakeConsumer {
    id: String,
    params: RtpParameters,
    pub resumed: AtomicBool,
    pub closed: AtomicBool,
}

#[async_trait]
impl RelayConsumer for FakeConsumer {
    fn id(&self) -> &str {
        &self.id
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.params.clone()
    }

    async fn resume(&self) -> MediaResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MediaError::Closed(self.id.clone()));
        }
        self.resumed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct FakeTransport {
    id: String,
    ssrc: u32,
    pub connected_to: Mutex<Option<(IpAddr, u16)>>,
    pub consumers: Mutex<Vec<Arc<FakeConsumer>>>,
    pub closed: AtomicBool,
}

impl FakeTransport {
    pub fn consumer(&self) -> Option<Arc<FakeConsumer>> {
        self.consumers.lock().first().cloned()
    }
}

#[async_trait]
impl PlainTransport for FakeTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn connect(&self, ip: IpAddr, port: u16) -> MediaResult<()> {
        *self.connected_to.lock() = Some((ip, port));
        Ok(())
    }

    async fn consume(
        &self,
        producer_id: &ProducerId,
        _capabilities: &RtpCapabilities,
        paused: bool,
    ) -> MediaResult<Arc<dyn RelayConsumer>> {
        let consumer = Arc::new(FakeConsumer {
            id: format!("consumer-{}-{}", self.id, producer_id),
            params: RtpParameters {
                codecs: vec![RtpCodecParameters {
                    mime_type: "audio/opus".to_string(),
                    payload_type: 100,
                    clock_rate: 48000,
                    channels: Some(2),
                    parameters: BTreeMap::from([("useinbandfec".to_string(), "1".to_string())]),
                }],
                encodings: vec![RtpEncodingParameters {
                    ssrc: Some(self.ssrc),
                }],
                rtcp: RtcpParameters {
                    cname: Some("fake-cname".to_string()),
                },
            },
            resumed: AtomicBool::new(!paused),
            closed: AtomicBool::new(false),
        });
        self.consumers.lock().push(consumer.clone());
        Ok(consumer)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct FakeRouter {
    next_id: AtomicU32,
    rejected: Mutex<HashSet<ProducerId>>,
    pub transports: Mutex<Vec<Arc<FakeTransport>>>,
    webrtc_transports: Mutex<HashSet<String>>,
    producers: Mutex<Vec<ProducerInfo>>,
    events: broadcast::Sender<RouterEvent>,
}

impl FakeRouter {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            next_id: AtomicU32::new(1),
            rejected: Mutex::new(HashSet::new()),
            transports: Mutex::new(Vec::new()),
            webrtc_transports: Mutex::new(HashSet::new()),
            producers: Mutex::new(Vec::new()),
            events,
        })
    }

    fn next(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Make `can_consume` fail for a producer
    pub fn reject(&self, producer_id: &str) {
        self.rejected.lock().insert(ProducerId::from(producer_id));
    }

    pub fn transport_count(&self) -> usize {
        self.transports.lock().len()
    }

    pub fn consumer_count(&self) -> usize {
        self.transports.lock().iter().map(|t| t.consumers.lock().len()).sum()
    }

    pub fn transport(&self, index: usize) -> Arc<FakeTransport> {
        self.transports.lock()[index].clone()
    }

    /// Remove a producer and publish the close signal
    pub fn close_producer(&self, producer_id: &ProducerId) {
        self.producers.lock().retain(|p| &p.id != producer_id);
        let _ = self.events.send(RouterEvent::ProducerClosed {
            producer_id: producer_id.clone(),
        });
    }

    pub fn emit(&self, event: RouterEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl MediaRouter for FakeRouter {
    fn rtp_capabilities(&self) -> RtpCapabilities {
        RtpCapabilities::opus_only()
    }

    fn can_consume(&self, producer_id: &ProducerId, _capabilities: &RtpCapabilities) -> bool {
        !self.rejected.lock().contains(producer_id)
    }

    async fn create_plain_transport(
        &self,
        _options: PlainTransportOptions,
    ) -> MediaResult<Arc<dyn PlainTransport>> {
        let n = self.next();
        let transport = Arc::new(FakeTransport {
            id: format!("plain-{}", n),
            ssrc: 1000 + n,
            connected_to: Mutex::new(None),
            consumers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.transports.lock().push(transport.clone());
        Ok(transport)
    }

    async fn create_webrtc_transport(&self, peer_id: &str) -> MediaResult<WebRtcTransportParams> {
        let id = format!("webrtc-{}-{}", peer_id, self.next());
        self.webrtc_transports.lock().insert(id.clone());
        Ok(WebRtcTransportParams {
            id,
            ice_parameters: serde_json::json!({ "usernameFragment": "frag" }),
            ice_candidates: serde_json::json!([]),
            dtls_parameters: serde_json::json!({ "role": "auto" }),
        })
    }

    async fn connect_webrtc_transport(
        &self,
        transport_id: &str,
        _dtls_parameters: serde_json::Value,
    ) -> MediaResult<()> {
        if self.webrtc_transports.lock().contains(transport_id) {
            Ok(())
        } else {
            Err(MediaError::NotFound(format!("transport {}", transport_id)))
        }
    }

    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        _rtp_parameters: serde_json::Value,
        app_data: serde_json::Value,
    ) -> MediaResult<ProducerInfo> {
        if !self.webrtc_transports.lock().contains(transport_id) {
            return Err(MediaError::NotFound(format!("transport {}", transport_id)));
        }
        let peer_id = transport_id
            .strip_prefix("webrtc-")
            .and_then(|rest| rest.rsplit_once('-'))
            .map(|(peer, _)| peer.to_string())
            .unwrap_or_default();
        let producer = ProducerInfo {
            id: ProducerId(format!("producer-{}", self.next())),
            peer_id,
            kind,
            app_data,
        };
        self.producers.lock().push(producer.clone());
        Ok(producer)
    }

    fn producers(&self) -> Vec<ProducerInfo> {
        self.producers.lock().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.events.subscribe()
    }
}

// -- Process launcher --

/// How fake capture processes behave
#[derive(Debug, Clone)]
pub struct CaptureScript {
    /// Bytes written to the raw file at spawn
    pub bytes: usize,
    /// Exit on its own after this long
    pub exit_after: Option<Duration>,
    pub natural_exit: ExitOutcome,
    pub interrupt_exit: ExitOutcome,
    pub ignore_interrupt: bool,
    pub fail_spawn: bool,
}

impl Default for CaptureScript {
    fn default() -> Self {
        Self {
            bytes: 50_000,
            exit_after: None,
            natural_exit: ExitOutcome::from_code(0),
            interrupt_exit: ExitOutcome::from_code(255),
            ignore_interrupt: false,
            fail_spawn: false,
        }
    }
}

pub struct FakeLauncher {
    pub script: Mutex<CaptureScript>,
    pub transcode_exit: Mutex<ExitOutcome>,
    pub captures: Mutex<Vec<CaptureJob>>,
    /// Descriptor contents seen at spawn time
    pub descriptors: Mutex<Vec<String>>,
    pub transcodes: Mutex<Vec<TranscodeJob>>,
    pub kills: Arc<AtomicU32>,
}

impl FakeLauncher {
    pub fn new(script: CaptureScript) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            transcode_exit: Mutex::new(ExitOutcome::from_code(0)),
            captures: Mutex::new(Vec::new()),
            descriptors: Mutex::new(Vec::new()),
            transcodes: Mutex::new(Vec::new()),
            kills: Arc::new(AtomicU32::new(0)),
        })
    }

    pub fn capture_count(&self) -> usize {
        self.captures.lock().len()
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn spawn_capture(&self, job: &CaptureJob) -> RecorderResult<Box<dyn CaptureProcess>> {
        let script = self.script.lock().clone();
        if script.fail_spawn {
            return Err(RecorderError::spawn("fake-ffmpeg", "no such file"));
        }

        let descriptor = tokio::fs::read_to_string(&job.descriptor_path)
            .await
            .unwrap_or_default();
        self.descriptors.lock().push(descriptor);
        self.captures.lock().push(job.clone());
        if script.bytes > 0 {
            tokio::fs::write(&job.output_path, vec![0u8; script.bytes])
                .await
                .map_err(|e| RecorderError::filesystem(&job.output_path, e))?;
        }

        let (interrupt_tx, interrupt_rx) = watch::channel(false);
        Ok(Box::new(FakeCapture {
            exit_at: script.exit_after.map(|d| Instant::now() + d),
            script,
            interrupt_tx,
            interrupt_rx,
            killed: false,
            kills: self.kills.clone(),
        }))
    }

    async fn transcode(&self, job: &TranscodeJob) -> RecorderResult<ExitOutcome> {
        self.transcodes.lock().push(job.clone());
        let outcome = *self.transcode_exit.lock();
        let bytes = if outcome.is_success() { 4_000 } else { 16 };
        tokio::fs::write(&job.output_path, vec![1u8; bytes])
            .await
            .map_err(|e| RecorderError::filesystem(&job.output_path, e))?;
        Ok(outcome)
    }
}

struct FakeCapture {
    script: CaptureScript,
    exit_at: Option<Instant>,
    interrupt_tx: watch::Sender<bool>,
    interrupt_rx: watch::Receiver<bool>,
    killed: bool,
    kills: Arc<AtomicU32>,
}

#[async_trait]
impl CaptureProcess for FakeCapture {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn interrupt(&mut self) -> RecorderResult<()> {
        if !self.script.ignore_interrupt {
            self.interrupt_tx.send_replace(true);
        }
        Ok(())
    }

    fn kill(&mut self) -> RecorderResult<()> {
        self.killed = true;
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.interrupt_tx.send_replace(true);
        Ok(())
    }

    async fn wait(&mut self) -> RecorderResult<ExitOutcome> {
        let exit_at = self.exit_at;
        let natural = async move {
            match exit_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = natural => Ok(self.script.natural_exit),
            _ = self.interrupt_rx.wait_for(|stop| *stop) => {
                if self.killed {
                    Ok(ExitOutcome::from_signal(9))
                } else {
                    Ok(self.script.interrupt_exit)
                }
            }
        }
    }
}
