mod builtin;
pub mod spec;

use cc_lab_abstract::{CongestionStrategy, ConfigError};
use std::fmt;
use std::str::FromStr;

pub use builtin::{FixedWindow, SlowStartAimd};

/// What an AIMD sender does to its window after a duplicate-ack loss signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LossResponse {
    /// Restart from the halved slow-start threshold.
    #[default]
    ResetToThreshold,
    /// Restart slow start from a single packet.
    ResetToOne,
}

/// Tunables for [`SlowStartAimd`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AimdParams {
    pub initial_cwnd: u64,
    pub initial_ssthresh: u64,
    /// Consecutive duplicate acks that count as one loss signal.
    pub dup_ack_threshold: u32,
    pub loss_response: LossResponse,
}

impl Default for AimdParams {
    fn default() -> Self {
        Self {
            initial_cwnd: 1,
            initial_ssthresh: 64,
            dup_ack_threshold: 1,
            loss_response: LossResponse::ResetToThreshold,
        }
    }
}

/// Describes which built-in strategy a sender runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyDescriptor {
    Fixed { window: u64 },
    Aimd(AimdParams),
}

impl StrategyDescriptor {
    pub fn build(&self) -> Box<dyn CongestionStrategy> {
        match *self {
            StrategyDescriptor::Fixed { window } => Box::new(FixedWindow::new(window)),
            StrategyDescriptor::Aimd(params) => Box::new(SlowStartAimd::new(params)),
        }
    }
}

impl FromStr for StrategyDescriptor {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        spec::parse_strategy(s)
    }
}

impl fmt::Display for StrategyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyDescriptor::Fixed { window } => write!(f, "fixed:{window}"),
            StrategyDescriptor::Aimd(p) => {
                let reset = match p.loss_response {
                    LossResponse::ResetToThreshold => "threshold",
                    LossResponse::ResetToOne => "one",
                };
                write!(
                    f,
                    "aimd:cwnd={},ssthresh={},dup={},reset={reset}",
                    p.initial_cwnd, p.initial_ssthresh, p.dup_ack_threshold
                )
            }
        }
    }
}
