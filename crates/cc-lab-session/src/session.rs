use cc_lab_abstract::{NetworkProfile, ShaperKind};
use std::time::{Duration, Instant};
use tokio::process::Child;
use tracing::{info, warn};

use crate::error::SessionError;
use crate::report::{SenderReport, SessionReport};
use crate::sender::Sender;
use crate::shaping::{ReceiverCommand, ShapingDirective};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub profile: NetworkProfile,
    pub shaper: ShaperKind,
    pub receiver: ReceiverCommand,
    /// Wall-clock length of every sender's run.
    pub duration: Duration,
    /// Pause after launching the receiver before the first handshake.
    pub startup_delay: Duration,
}

impl SessionConfig {
    pub fn new(receiver: ReceiverCommand, duration: Duration) -> Self {
        Self {
            profile: NetworkProfile::default(),
            shaper: ShaperKind::default(),
            receiver,
            duration,
            startup_delay: Duration::from_millis(200),
        }
    }
}

/// Runs one experiment: receiver behind the shaper, then all senders.
///
/// The receiver is told every sender's port and greets them in order; the
/// senders wait for those greetings one at a time. Only once every sender
/// holds a sequence base do the runs start, concurrently. The receiver is
/// terminated whether the session succeeds or not.
pub struct Session {
    config: SessionConfig,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn directive(&self) -> ShapingDirective {
        ShapingDirective::new(self.config.shaper, &self.config.profile)
    }

    /// The configured receiver command plus the ports it must greet.
    pub fn receiver_command(&self, sender_ports: &[u16]) -> ReceiverCommand {
        self.config
            .receiver
            .clone()
            .sender_ports(sender_ports.iter().copied())
    }

    pub async fn run(&self, senders: Vec<Sender>) -> Result<SessionReport, SessionError> {
        if senders.is_empty() {
            return Err(SessionError::NoSenders);
        }
        self.config.profile.validate()?;

        let ports: Vec<u16> = senders.iter().map(Sender::port).collect();
        let command = self.receiver_command(&ports);

        let epoch = Instant::now();
        let mut receiver = self.launch_receiver(&command).await?;
        let result = self.drive(senders, epoch, &command, &mut receiver).await;

        match receiver.kill().await {
            Ok(()) => info!("Receiver stopped"),
            Err(e) => warn!("Failed to stop receiver: {e}"),
        }

        let senders = result?;
        Ok(SessionReport {
            profile: self.config.profile.clone(),
            shaper: self.config.shaper,
            duration_secs: self.config.duration.as_secs_f64(),
            senders,
        })
    }

    async fn launch_receiver(&self, receiver: &ReceiverCommand) -> Result<Child, SessionError> {
        let directive = self.directive();
        let command = directive.describe(receiver);
        info!("Launching receiver: {command}");

        let mut child = directive
            .command(receiver)
            .spawn()
            .map_err(|source| SessionError::ReceiverLaunch {
                command: command.clone(),
                source,
            })?;

        if !self.config.startup_delay.is_zero() {
            tokio::time::sleep(self.config.startup_delay).await;
        }
        if let Some(status) = child.try_wait()? {
            return Err(SessionError::ReceiverExited { command, status });
        }
        Ok(child)
    }

    async fn drive(
        &self,
        mut senders: Vec<Sender>,
        epoch: Instant,
        command: &ReceiverCommand,
        receiver: &mut Child,
    ) -> Result<Vec<SenderReport>, SessionError> {
        for sender in senders.iter_mut() {
            if let Some(status) = receiver.try_wait()? {
                return Err(SessionError::ReceiverExited {
                    command: self.directive().describe(command),
                    status,
                });
            }
            sender.handshake().await?;
        }
        info!(
            "All {} senders completed handshakes, starting runs",
            senders.len()
        );

        let duration = self.config.duration;
        let handles: Vec<_> = senders
            .into_iter()
            .map(|mut sender| {
                let id = sender.id();
                let handle = tokio::spawn(async move {
                    let result = sender.run(duration).await;
                    (sender, result)
                });
                (id, handle)
            })
            .collect();

        // every task is awaited before any failure is reported
        let mut reports = Vec::with_capacity(handles.len());
        let mut first_error = None;
        for (id, handle) in handles {
            match handle.await {
                Ok((sender, Ok(metrics))) => reports.push(SenderReport::new(&sender, metrics, epoch)),
                Ok((_, Err(e))) => {
                    warn!("Sender {id} failed: {e}");
                    first_error.get_or_insert(e);
                }
                Err(source) => {
                    warn!("Sender {id} task did not complete: {source}");
                    first_error.get_or_insert(SessionError::Join { sender: id, source });
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }
}
