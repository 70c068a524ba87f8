use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::interface::Acknowledgement;

/// Segment size used when converting acknowledged packets into bytes.
pub const AVERAGE_SEGMENT_SIZE: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    New,
    Duplicate,
}

/// Per-sender congestion-control bookkeeping.
///
/// Doubles as the metrics export record handed to plotting tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyState {
    pub cwnd: u64,
    pub ssthresh: u64,
    /// Round-trip samples in milliseconds, in arrival order.
    pub rtts: Vec<f64>,
    pub total_acks: u64,
    pub num_duplicate_acks: u64,
    pub ack_count: u64,
    /// (seconds since the sender's epoch, acknowledged seq)
    pub times_of_acknowledgements: Vec<(f64, u64)>,
    pub cwnds: Vec<u64>,
    pub slow_start_thresholds: Vec<u64>,
    #[serde(default)]
    pub highest_acked: Option<u64>,
}

impl StrategyState {
    pub fn new(cwnd: u64, ssthresh: u64) -> Self {
        Self {
            cwnd: cwnd.max(1),
            ssthresh: ssthresh.max(1),
            rtts: Vec::new(),
            total_acks: 0,
            num_duplicate_acks: 0,
            ack_count: 0,
            times_of_acknowledgements: Vec::new(),
            cwnds: Vec::new(),
            slow_start_thresholds: Vec::new(),
            highest_acked: None,
        }
    }

    /// Bookkeeping shared by every strategy.
    ///
    /// An ack that does not move past the highest sequence acknowledged so
    /// far is a duplicate.
    pub fn record_ack(&mut self, ack: &Acknowledgement, sent_at: Option<Duration>) -> AckKind {
        self.times_of_acknowledgements
            .push((ack.received_at.as_secs_f64(), ack.seq));

        let kind = match self.highest_acked {
            Some(highest) if ack.seq <= highest => AckKind::Duplicate,
            _ => {
                self.highest_acked = Some(ack.seq);
                AckKind::New
            }
        };
        match kind {
            AckKind::Duplicate => self.num_duplicate_acks += 1,
            AckKind::New => self.ack_count += 1,
        }
        self.total_acks += 1;

        if let Some(sent_at) = sent_at {
            let rtt = ack.received_at.saturating_sub(sent_at);
            self.rtts.push(rtt.as_secs_f64() * 1000.0);
        }
        kind
    }

    /// Update the window (never below one packet) and record it.
    pub fn set_cwnd(&mut self, cwnd: u64) {
        self.cwnd = cwnd.max(1);
        self.cwnds.push(self.cwnd);
    }

    /// Record the current window without changing it.
    pub fn record_cwnd(&mut self) {
        self.cwnds.push(self.cwnd);
    }

    pub fn set_ssthresh(&mut self, ssthresh: u64) {
        self.ssthresh = ssthresh.max(1);
        self.slow_start_thresholds.push(self.ssthresh);
    }

    pub fn average_rtt_ms(&self) -> Option<f64> {
        if self.rtts.is_empty() {
            return None;
        }
        Some(self.rtts.iter().sum::<f64>() / self.rtts.len() as f64)
    }

    pub fn duplicate_ack_percent(&self) -> Option<f64> {
        if self.total_acks == 0 {
            return None;
        }
        Some(self.num_duplicate_acks as f64 * 100.0 / self.total_acks as f64)
    }

    pub fn throughput_bytes_per_sec(&self, segment_size: usize, seconds: f64) -> Option<f64> {
        if !(seconds > 0.0) {
            return None;
        }
        Some(segment_size as f64 * (self.ack_count as f64 / seconds))
    }

    pub fn performance(&self, seconds: f64) -> Performance {
        Performance {
            total_acks: self.total_acks,
            num_duplicate_acks: self.num_duplicate_acks,
            duplicate_ack_percent: self.duplicate_ack_percent(),
            throughput_bytes_per_sec: self.throughput_bytes_per_sec(AVERAGE_SEGMENT_SIZE, seconds),
            average_rtt_ms: self.average_rtt_ms(),
        }
    }
}

/// Headline numbers derived from a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Performance {
    pub total_acks: u64,
    pub num_duplicate_acks: u64,
    pub duplicate_ack_percent: Option<f64>,
    pub throughput_bytes_per_sec: Option<f64>,
    pub average_rtt_ms: Option<f64>,
}

struct OrNa(Option<f64>);

impl fmt::Display for OrNa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{v:.3}"),
            None => f.write_str("n/a"),
        }
    }
}

impl fmt::Display for Performance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total acks: {} | duplicate acks: {} ({}%) | throughput: {} B/s | avg RTT: {} ms",
            self.total_acks,
            self.num_duplicate_acks,
            OrNa(self.duplicate_ack_percent),
            OrNa(self.throughput_bytes_per_sec),
            OrNa(self.average_rtt_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(seq: u64, at_ms: u64) -> Acknowledgement {
        Acknowledgement {
            seq,
            echoed_timestamp_us: 0,
            received_at: Duration::from_millis(at_ms),
        }
    }

    #[test]
    fn classifies_duplicates_against_highest_acked() {
        let mut state = StrategyState::new(1, 64);
        let kinds: Vec<_> = [1, 2, 2, 3, 2]
            .iter()
            .enumerate()
            .map(|(i, seq)| state.record_ack(&ack(*seq, i as u64), None))
            .collect();

        assert_eq!(
            kinds,
            vec![
                AckKind::New,
                AckKind::New,
                AckKind::Duplicate,
                AckKind::New,
                AckKind::Duplicate
            ]
        );
        assert_eq!(state.num_duplicate_acks, 2);
        assert_eq!(state.total_acks, 5);
        assert_eq!(state.ack_count, 3);
        assert_eq!(state.times_of_acknowledgements.len(), 5);
        assert_eq!(state.times_of_acknowledgements[3], (0.003, 3));
    }

    #[test]
    fn rtts_only_for_matched_sends() {
        let mut state = StrategyState::new(1, 64);
        state.record_ack(&ack(0, 100), Some(Duration::from_millis(40)));
        state.record_ack(&ack(1, 120), None);
        state.record_ack(&ack(2, 150), Some(Duration::from_millis(130)));

        assert_eq!(state.rtts.len(), 2);
        assert!((state.rtts[0] - 60.0).abs() < 1e-9);
        assert!((state.average_rtt_ms().unwrap() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn no_acks_reports_no_data() {
        let state = StrategyState::new(1, 64);
        assert_eq!(state.average_rtt_ms(), None);
        assert_eq!(state.duplicate_ack_percent(), None);

        let perf = state.performance(10.0);
        assert_eq!(perf.throughput_bytes_per_sec, Some(0.0));
        assert!(perf.to_string().contains("avg RTT: n/a ms"));
        assert_eq!(state.throughput_bytes_per_sec(AVERAGE_SEGMENT_SIZE, 0.0), None);
    }

    #[test]
    fn window_never_drops_below_one() {
        let mut state = StrategyState::new(0, 0);
        assert_eq!(state.cwnd, 1);
        assert_eq!(state.ssthresh, 1);
        state.set_cwnd(0);
        assert_eq!(state.cwnd, 1);
        assert_eq!(state.cwnds, vec![1]);
    }
}
