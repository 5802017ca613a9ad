//! Session descriptor for the recorder's RTP input
//!
//! A minimal receive-only SDP describing one audio stream on a single
//! (rtcp-muxed) port. The recorder opens this file as its input.

use crate::relay::{NegotiatedAudio, Relay};
use crate::utils::{RecorderError, RecorderResult};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

/// Session name written to the `s=` line
const SESSION_NAME: &str = "stream-recorder";

/// Everything the descriptor needs to know about one relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub destination: SocketAddr,
    pub payload_type: u8,
    pub codec: String,
    pub clock_rate: u32,
    pub channels: u8,
    pub format_parameters: BTreeMap<String, String>,
    pub ssrc: u32,
    pub cname: String,
}

impl SessionDescriptor {
    pub fn new(destination: SocketAddr, audio: &NegotiatedAudio, fallback_cname: &str) -> Self {
        Self {
            destination,
            payload_type: audio.payload_type,
            codec: audio.codec.clone(),
            clock_rate: audio.clock_rate,
            channels: audio.channels,
            format_parameters: audio.format_parameters.clone(),
            ssrc: audio.ssrc,
            cname: audio
                .cname
                .clone()
                .unwrap_or_else(|| fallback_cname.to_string()),
        }
    }

    pub fn for_relay(relay: &Relay, fallback_cname: &str) -> Self {
        Self::new(relay.destination(), &relay.audio, fallback_cname)
    }

    /// Format parameters, with opus defaults filled in
    fn fmtp(&self) -> BTreeMap<String, String> {
        let mut fmtp = BTreeMap::new();
        if self.codec.eq_ignore_ascii_case("opus") {
            fmtp.insert("minptime".to_string(), "10".to_string());
            fmtp.insert("useinbandfec".to_string(), "1".to_string());
            if self.channels == 2 {
                fmtp.insert("stereo".to_string(), "1".to_string());
                fmtp.insert("sprop-stereo".to_string(), "1".to_string());
            }
        }
        fmtp.extend(self.format_parameters.clone());
        fmtp
    }

    /// Render the descriptor text
    pub fn render(&self) -> String {
        let ip = self.destination.ip();
        let family = match ip {
            IpAddr::V4(_) => "IP4",
            IpAddr::V6(_) => "IP6",
        };
        let pt = self.payload_type;

        let mut rtpmap = format!("a=rtpmap:{} {}/{}", pt, self.codec, self.clock_rate);
        if self.channels > 1 {
            rtpmap.push_str(&format!("/{}", self.channels));
        }

        let mut lines = vec![
            "v=0".to_string(),
            format!("o=- 0 0 IN {} {}", family, ip),
            format!("s={}", SESSION_NAME),
            format!("c=IN {} {}", family, ip),
            "t=0 0".to_string(),
            format!("m=audio {} RTP/AVP {}", self.destination.port(), pt),
            rtpmap,
        ];

        let fmtp = self.fmtp();
        if !fmtp.is_empty() {
            let params: Vec<String> = fmtp.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            lines.push(format!("a=fmtp:{} {}", pt, params.join(";")));
        }

        lines.push("a=rtcp-mux".to_string());
        lines.push("a=recvonly".to_string());
        lines.push(format!("a=ssrc:{} cname:{}", self.ssrc, self.cname));

        let mut sdp = lines.join("\r\n");
        sdp.push_str("\r\n");
        sdp
    }

    /// Write the descriptor to `path`
    pub fn write_to(&self, path: &Path) -> RecorderResult<()> {
        std::fs::write(path, self.render()).map_err(|e| RecorderError::filesystem(path, e))?;
        tracing::debug!("Wrote session descriptor {:?}", path);
        Ok(())
    }
}
