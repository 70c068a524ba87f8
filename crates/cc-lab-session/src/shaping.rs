use cc_lab_abstract::{NetworkProfile, ShaperKind};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Program and arguments used to start the receiver collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Keep the receiver's stdout/stderr attached instead of discarding them.
    pub inherit_output: bool,
}

impl ReceiverCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            inherit_output: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append one `--sender-port <port>` pair per sender, in order.
    pub fn sender_ports(self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.args(
            ports
                .into_iter()
                .flat_map(|port| ["--sender-port".to_string(), port.to_string()]),
        )
    }

    pub fn inherit_output(mut self, inherit: bool) -> Self {
        self.inherit_output = inherit;
        self
    }
}

/// The shaper invocation wrapped around the receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapingDirective {
    shaper: ShaperKind,
    /// Everything before the receiver command, empty for `Direct`.
    prefix: Vec<OsString>,
}

impl ShapingDirective {
    pub fn new(shaper: ShaperKind, profile: &NetworkProfile) -> Self {
        let prefix = match shaper {
            ShaperKind::Direct => Vec::new(),
            ShaperKind::Mahimahi => mahimahi_prefix(profile),
        };
        Self { shaper, prefix }
    }

    pub fn shaper(&self) -> ShaperKind {
        self.shaper
    }

    /// Full argv: shaper prefix, `--`, then the receiver command.
    pub fn argv(&self, receiver: &ReceiverCommand) -> Vec<OsString> {
        let mut argv = self.prefix.clone();
        if !argv.is_empty() {
            argv.push("--".into());
        }
        argv.push(receiver.program.clone().into_os_string());
        argv.extend(receiver.args.iter().map(OsString::from));
        argv
    }

    pub fn command(&self, receiver: &ReceiverCommand) -> Command {
        let argv = self.argv(receiver);
        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]).kill_on_drop(true).stdin(Stdio::null());
        if !receiver.inherit_output {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        command
    }

    /// Human-readable form for logs.
    pub fn describe(&self, receiver: &ReceiverCommand) -> String {
        self.argv(receiver)
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn mahimahi_prefix(profile: &NetworkProfile) -> Vec<OsString> {
    let mut prefix: Vec<OsString> = vec!["mm-delay".into(), profile.delay_ms.to_string().into()];
    if let Some(loss) = profile.loss_rate
        && loss > 0.0
    {
        prefix.extend(["mm-loss".into(), "downlink".into(), format!("{loss:.6}").into()]);
    }
    let trace = profile.trace_file.clone().into_os_string();
    prefix.extend([
        "mm-link".into(),
        trace.clone(),
        trace,
        "--downlink-queue=droptail".into(),
        format!("--downlink-queue-args=bytes={}", profile.queue_size_bytes).into(),
    ]);
    prefix
}
