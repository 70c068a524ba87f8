pub mod config;
pub mod interface;
pub mod metrics;
pub mod packet;
pub mod scenario;

pub use interface::{Acknowledgement, CongestionStrategy};
pub use metrics::{AVERAGE_SEGMENT_SIZE, AckKind, Performance, StrategyState};
pub use packet::{Message, WireError};
// Re-export opcode module so users can match on raw datagrams
pub use packet::opcode;

pub use config::{ConfigError, NetworkProfile};
pub use scenario::{Experiment, NetworkProfileOverride, SenderSection, SessionSection, ShaperKind};
