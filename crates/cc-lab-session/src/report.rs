use anyhow::{Context, Result};
use cc_lab_abstract::{NetworkProfile, Performance, ShaperKind, StrategyState};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::info;

use crate::sender::Sender;

/// Everything one sender produced, with its timeline relative to session start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderReport {
    pub sender: usize,
    pub port: u16,
    pub strategy: String,
    pub packets_sent: u64,
    #[serde(with = "duration_ms")]
    pub handshake_completed: Duration,
    #[serde(with = "duration_ms")]
    pub run_started: Duration,
    #[serde(with = "duration_ms")]
    pub run_finished: Duration,
    pub metrics: StrategyState,
}

impl SenderReport {
    pub(crate) fn new(sender: &Sender, metrics: StrategyState, epoch: Instant) -> Self {
        let marks = sender.marks();
        let since = |mark: Option<Instant>| {
            mark.map_or(Duration::ZERO, |t| t.saturating_duration_since(epoch))
        };
        Self {
            sender: sender.id(),
            port: sender.port(),
            strategy: sender.strategy_name().to_string(),
            packets_sent: sender.sent_packets(),
            handshake_completed: since(marks.handshake_completed),
            run_started: since(marks.run_started),
            run_finished: since(marks.run_finished),
            metrics,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub profile: NetworkProfile,
    pub shaper: ShaperKind,
    /// Requested run length; throughput is computed against it.
    pub duration_secs: f64,
    pub senders: Vec<SenderReport>,
}

impl SessionReport {
    pub fn performance(&self) -> impl Iterator<Item = (&SenderReport, Performance)> {
        self.senders
            .iter()
            .map(|s| (s, s.metrics.performance(self.duration_secs)))
    }

    pub fn log_summary(&self) {
        for (sender, perf) in self.performance() {
            info!("Sender {} [{}] {perf}", sender.sender, sender.strategy);
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create report {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        info!("Wrote session report to {}", path.display());
        Ok(())
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open report {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse report {}", path.display()))
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_nanos() as f64 / 1e6)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(d)?;
        if !ms.is_finite() || ms < 0.0 {
            return Err(serde::de::Error::custom(format!("invalid duration {ms} ms")));
        }
        Ok(Duration::from_nanos((ms * 1e6).round() as u64))
    }
}
