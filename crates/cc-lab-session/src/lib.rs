pub mod error;
pub mod port;
pub mod receiver;
pub mod report;
pub mod sender;
pub mod session;
pub mod shaping;
pub mod trace;

pub use error::SessionError;
pub use receiver::{EchoReceiver, ReceiverConfig};
pub use report::{SenderReport, SessionReport};
pub use sender::{Sender, SenderConfig};
pub use session::{Session, SessionConfig};
pub use shaping::{ReceiverCommand, ShapingDirective};
pub use trace::{PRESETS, TracePreset};
