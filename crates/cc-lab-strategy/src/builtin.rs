use std::time::Duration;

use cc_lab_abstract::{AckKind, Acknowledgement, CongestionStrategy, StrategyState};
use tracing::debug;

use crate::{AimdParams, LossResponse};

/// Keeps exactly `window_size` packets in flight, whatever the feedback.
pub struct FixedWindow {
    window_size: u64,
    state: StrategyState,
}

impl FixedWindow {
    pub fn new(window_size: u64) -> Self {
        let window_size = window_size.max(1);
        Self {
            window_size,
            state: StrategyState::new(window_size, window_size),
        }
    }

    pub fn window_size(&self) -> u64 {
        self.window_size
    }
}

impl CongestionStrategy for FixedWindow {
    fn name(&self) -> &str {
        "fixed"
    }

    fn on_handshake(&mut self) {
        self.state.record_cwnd();
    }

    fn send_budget(&self, in_flight: usize) -> usize {
        usize::try_from(self.window_size)
            .unwrap_or(usize::MAX)
            .saturating_sub(in_flight)
    }

    fn on_ack(&mut self, ack: &Acknowledgement, sent_at: Option<Duration>) {
        self.state.record_ack(ack, sent_at);
        self.state.record_cwnd();
    }

    fn state(&self) -> &StrategyState {
        &self.state
    }
}

/// Slow start followed by additive increase, backing off on duplicate acks
/// and timeouts.
pub struct SlowStartAimd {
    params: AimdParams,
    state: StrategyState,
    /// New acks counted towards the next additive increase.
    acks_in_window: u64,
    consecutive_duplicates: u32,
}

impl SlowStartAimd {
    pub fn new(params: AimdParams) -> Self {
        Self {
            state: StrategyState::new(params.initial_cwnd, params.initial_ssthresh),
            params,
            acks_in_window: 0,
            consecutive_duplicates: 0,
        }
    }

    pub fn in_slow_start(&self) -> bool {
        self.state.cwnd < self.state.ssthresh
    }

    fn on_new_data(&mut self) {
        self.consecutive_duplicates = 0;
        if self.in_slow_start() {
            self.state.set_cwnd(self.state.cwnd + 1);
            return;
        }
        self.acks_in_window += 1;
        if self.acks_in_window >= self.state.cwnd {
            self.acks_in_window = 0;
            self.state.set_cwnd(self.state.cwnd + 1);
        } else {
            self.state.record_cwnd();
        }
    }

    fn on_duplicate(&mut self) {
        self.consecutive_duplicates += 1;
        if self.consecutive_duplicates < self.params.dup_ack_threshold {
            self.state.record_cwnd();
            return;
        }
        self.consecutive_duplicates = 0;
        self.acks_in_window = 0;
        self.state.set_ssthresh(self.state.ssthresh / 2);
        let cwnd = match self.params.loss_response {
            // the window jumps to the halved threshold, so a window still
            // below it grows here
            LossResponse::ResetToThreshold => self.state.ssthresh,
            LossResponse::ResetToOne => 1,
        };
        self.state.set_cwnd(cwnd);
        debug!(
            cwnd = self.state.cwnd,
            ssthresh = self.state.ssthresh,
            "duplicate ack backoff"
        );
    }
}

impl CongestionStrategy for SlowStartAimd {
    fn name(&self) -> &str {
        "aimd"
    }

    fn on_handshake(&mut self) {
        self.state.record_cwnd();
    }

    fn send_budget(&self, in_flight: usize) -> usize {
        usize::try_from(self.state.cwnd)
            .unwrap_or(usize::MAX)
            .saturating_sub(in_flight)
    }

    fn on_ack(&mut self, ack: &Acknowledgement, sent_at: Option<Duration>) {
        match self.state.record_ack(ack, sent_at) {
            AckKind::New => self.on_new_data(),
            AckKind::Duplicate => self.on_duplicate(),
        }
    }

    fn on_timeout(&mut self) {
        self.consecutive_duplicates = 0;
        self.acks_in_window = 0;
        self.state.set_ssthresh(self.state.cwnd / 2);
        self.state.set_cwnd(1);
        debug!(ssthresh = self.state.ssthresh, "timeout, window collapsed");
    }

    fn state(&self) -> &StrategyState {
        &self.state
    }
}
