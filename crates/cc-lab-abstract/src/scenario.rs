use crate::config::NetworkProfile;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// An experiment as written in a TOML file.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Experiment {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub network: NetworkProfileOverride,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub senders: Vec<SenderSection>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct NetworkProfileOverride {
    pub delay_ms: Option<u64>,
    pub queue_size_bytes: Option<u64>,
    pub trace_file: Option<PathBuf>,
    pub loss_rate: Option<f64>,
}

impl NetworkProfileOverride {
    pub fn apply_to(&self, profile: &mut NetworkProfile) {
        if let Some(v) = self.delay_ms {
            profile.delay_ms = v;
        }
        if let Some(v) = self.queue_size_bytes {
            profile.queue_size_bytes = v;
        }
        if let Some(v) = &self.trace_file {
            profile.trace_file = v.clone();
        }
        if let Some(v) = self.loss_rate {
            profile.loss_rate = Some(v);
        }
    }
}

/// How the receiver is placed behind the emulated link.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShaperKind {
    /// Wrap the receiver in a Mahimahi shell.
    #[default]
    Mahimahi,
    /// Run the receiver directly, without shaping.
    Direct,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SessionSection {
    pub duration_secs: Option<f64>,
    /// Address the receiver greets senders on. Unset, the receiver uses
    /// `MAHIMAHI_BASE` inside a shaped shell and loopback otherwise.
    pub sender_host: Option<IpAddr>,
    #[serde(default)]
    pub shaper: ShaperKind,
    /// Receiver executable; defaults to `cc-lab-receiver` on PATH.
    pub receiver_program: Option<PathBuf>,
    #[serde(default)]
    pub receiver_args: Vec<String>,
    pub handshake_attempts: Option<u32>,
    pub handshake_timeout_ms: Option<u64>,
    pub ack_timeout_ms: Option<u64>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SenderSection {
    /// Strategy descriptor, e.g. `fixed:1000` or `aimd:ssthresh=32`.
    pub strategy: String,
    pub filler_len: Option<usize>,
}
