use cc_lab_abstract::ConfigError;
use std::io;
use std::process::ExitStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to launch receiver `{command}`: {source}")]
    ReceiverLaunch {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("receiver `{command}` exited during startup ({status})")]
    ReceiverExited { command: String, status: ExitStatus },
    #[error("sender {sender} got no handshake reply after {attempts} attempts")]
    Handshake { sender: usize, attempts: u32 },
    #[error("sender {0} has not completed its handshake")]
    NotHandshaken(usize),
    #[error("sender {sender} task failed: {source}")]
    Join {
        sender: usize,
        #[source]
        source: tokio::task::JoinError,
    },
    #[error("session has no senders")]
    NoSenders,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
}
