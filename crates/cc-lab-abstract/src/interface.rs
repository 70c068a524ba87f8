use std::time::Duration;

use crate::metrics::StrategyState;

/// An acknowledgement as seen by the sender that receives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgement {
    /// Sequence number the receiver acknowledged.
    pub seq: u64,
    /// Send timestamp echoed back by the receiver (µs since the sender's epoch).
    pub echoed_timestamp_us: u64,
    /// When the sender received it, relative to the sender's epoch.
    pub received_at: Duration,
}

/// Window-control policy plugged into a sender.
///
/// The sender's loop is the only caller: it asks for a send budget before
/// every transmission and forwards every acknowledgement and every ack-wait
/// timeout. Implementations keep their bookkeeping in a [`StrategyState`],
/// which becomes the sender's metrics snapshot once the run ends.
pub trait CongestionStrategy: Send {
    /// Short identifier used in logs and reports.
    fn name(&self) -> &str;

    /// Called once the sender has a valid sequence base.
    fn on_handshake(&mut self) {}

    /// How many packets may be sent right now given `in_flight` outstanding ones.
    fn send_budget(&self, in_flight: usize) -> usize;

    /// Called for every acknowledgement. `sent_at` is the send time of the
    /// matching outstanding packet, if the sender still had one.
    fn on_ack(&mut self, ack: &Acknowledgement, sent_at: Option<Duration>);

    /// Called when waiting for an acknowledgement timed out.
    fn on_timeout(&mut self) {}

    fn state(&self) -> &StrategyState;
}
