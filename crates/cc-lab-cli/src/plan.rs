use anyhow::{Context, Result, bail};
use cc_lab_abstract::{ConfigError, Experiment, NetworkProfile, ShaperKind};
use cc_lab_session::{ReceiverCommand, SenderConfig, SessionConfig};
use cc_lab_strategy::StrategyDescriptor;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DURATION_SECS: f64 = 10.0;
pub const DEFAULT_RECEIVER_PROGRAM: &str = "cc-lab-receiver";

/// Command-line values that take precedence over the experiment file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub strategies: Vec<StrategyDescriptor>,
    pub duration_secs: Option<f64>,
    pub sender_host: Option<IpAddr>,
    pub shaper: Option<ShaperKind>,
    pub delay_ms: Option<u64>,
    pub queue_size_bytes: Option<u64>,
    pub trace_file: Option<PathBuf>,
    pub loss_rate: Option<f64>,
    pub receiver_program: Option<PathBuf>,
    pub inherit_receiver_output: bool,
}

#[derive(Debug, Clone)]
pub struct PlannedSender {
    pub strategy: StrategyDescriptor,
    pub config: SenderConfig,
}

/// A fully resolved experiment, ready to bind sockets and launch.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub name: String,
    pub session: SessionConfig,
    pub senders: Vec<PlannedSender>,
}

pub fn load_experiment(path: &Path) -> Result<Experiment> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read experiment file {}", path.display()))?;
    let experiment: Experiment =
        toml::from_str(&content).context("Failed to parse experiment file")?;
    Ok(experiment)
}

impl RunPlan {
    pub fn resolve(experiment: Experiment, overrides: Overrides) -> Result<Self> {
        let mut profile = NetworkProfile::default();
        experiment.network.apply_to(&mut profile);
        if let Some(v) = overrides.delay_ms {
            profile.delay_ms = v;
        }
        if let Some(v) = overrides.queue_size_bytes {
            profile.queue_size_bytes = v;
        }
        if let Some(v) = overrides.trace_file {
            profile.trace_file = v;
        }
        if let Some(v) = overrides.loss_rate {
            profile.loss_rate = Some(v);
        }
        profile.validate()?;

        let section = experiment.session;
        let duration_secs = overrides
            .duration_secs
            .or(section.duration_secs)
            .unwrap_or(DEFAULT_DURATION_SECS);
        let duration = checked_duration(duration_secs)?;

        let program = overrides
            .receiver_program
            .or(section.receiver_program)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RECEIVER_PROGRAM));
        // sender ports are appended by the session once the senders are bound
        let mut receiver = ReceiverCommand::new(program)
            .args(section.receiver_args)
            .inherit_output(overrides.inherit_receiver_output);
        if let Some(host) = overrides.sender_host.or(section.sender_host) {
            receiver = receiver.args(["--sender-host".to_string(), host.to_string()]);
        }

        let session = SessionConfig {
            profile,
            shaper: overrides.shaper.unwrap_or(section.shaper),
            ..SessionConfig::new(receiver, duration)
        };

        let mut base = SenderConfig::default();
        if let Some(v) = section.handshake_attempts {
            base.handshake_attempts = v;
        }
        if let Some(ms) = section.handshake_timeout_ms {
            base.handshake_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = section.ack_timeout_ms {
            base.ack_timeout = Duration::from_millis(ms);
            base.packet_lifetime = base.ack_timeout * 2;
        }

        let senders = if overrides.strategies.is_empty() {
            experiment
                .senders
                .into_iter()
                .map(|entry| {
                    let strategy: StrategyDescriptor = entry.strategy.parse()?;
                    let mut config = base.clone();
                    if let Some(len) = entry.filler_len {
                        config.filler_len = len;
                    }
                    Ok(PlannedSender { strategy, config })
                })
                .collect::<Result<Vec<_>, ConfigError>>()?
        } else {
            overrides
                .strategies
                .into_iter()
                .map(|strategy| PlannedSender {
                    strategy,
                    config: base.clone(),
                })
                .collect()
        };
        if senders.is_empty() {
            bail!("No senders configured: add [[senders]] to the experiment or pass --strategy");
        }

        Ok(Self {
            name: experiment.name.unwrap_or_else(|| "experiment".to_string()),
            session,
            senders,
        })
    }
}

fn checked_duration(secs: f64) -> Result<Duration, ConfigError> {
    if !secs.is_finite() {
        return Err(ConfigError::NotFinite {
            field: "duration_secs",
            value: secs,
        });
    }
    if secs <= 0.0 {
        return Err(ConfigError::NonPositiveDuration(secs));
    }
    Ok(Duration::from_secs_f64(secs))
}
