//! Per-session file naming
//!
//! `<timestamp>_<peer>_<producer>.<ext>` under the recordings directory.
//! Ids are percent-encoded so they can't escape the directory.

use crate::media::ProducerInfo;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

pub const DESCRIPTOR_EXTENSION: &str = "sdp";
pub const RAW_EXTENSION: &str = "ogg";
pub const DERIVED_EXTENSION: &str = "mp3";

/// Files owned by one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub descriptor: PathBuf,
    pub raw: PathBuf,
    pub derived: PathBuf,
}

impl SessionPaths {
    pub fn new(dir: &Path, producer: &ProducerInfo, started_at: DateTime<Utc>) -> Self {
        let stem = file_stem(producer, started_at);
        Self {
            descriptor: dir.join(format!("{}.{}", stem, DESCRIPTOR_EXTENSION)),
            raw: dir.join(format!("{}.{}", stem, RAW_EXTENSION)),
            derived: dir.join(format!("{}.{}", stem, DERIVED_EXTENSION)),
        }
    }
}

fn file_stem(producer: &ProducerInfo, started_at: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}",
        started_at.format("%Y%m%dT%H%M%S%3fZ"),
        urlencoding::encode(&producer.peer_id),
        urlencoding::encode(producer.id.as_str())
    )
}
