mod plan;

use anyhow::{Context, Result};
use cc_lab_abstract::ShaperKind;
use cc_lab_session::{Sender, Session, SessionReport, trace};
use cc_lab_strategy::StrategyDescriptor;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{Level, info};

use plan::{Overrides, RunPlan};

#[derive(Parser, Debug)]
#[command(author, version, about = "Congestion-control testbed over a shaped link")]
struct Cli {
    /// Log at debug level.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a Mahimahi packet-delivery trace for a constant bandwidth.
    Trace {
        #[arg(long)]
        bandwidth_mbps: f64,
        #[arg(long, default_value_t = 60.0)]
        duration_secs: f64,
        #[arg(long)]
        out: PathBuf,
    },
    /// Write the preset traces (10, 30 and 100 Mbps) into a directory.
    Presets {
        #[arg(long, default_value = "traces")]
        dir: PathBuf,
    },
    /// Run senders against a receiver behind the shaped link.
    Run(RunArgs),
    /// Print the performance summary of a saved session report.
    Summarize { report: PathBuf },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Experiment file (TOML).
    #[arg(long)]
    experiment: Option<PathBuf>,

    /// Strategy for one sender, repeatable; replaces the file's senders.
    #[arg(long = "strategy")]
    strategies: Vec<StrategyDescriptor>,

    #[arg(long)]
    duration_secs: Option<f64>,
    /// Host the receiver greets senders on; defaults to the shaper's base
    /// address, or loopback without a shaper.
    #[arg(long)]
    sender_host: Option<IpAddr>,
    #[arg(long, value_enum)]
    shaper: Option<Shaper>,

    #[arg(long)]
    delay_ms: Option<u64>,
    #[arg(long)]
    queue_size_bytes: Option<u64>,
    #[arg(long)]
    trace_file: Option<PathBuf>,
    #[arg(long)]
    loss_rate: Option<f64>,

    /// Receiver executable started behind the shaper.
    #[arg(long)]
    receiver_program: Option<PathBuf>,
    /// Keep the receiver's output on the terminal.
    #[arg(long, default_value_t = false)]
    receiver_output: bool,

    /// Write the JSON session report here.
    #[arg(long)]
    report_out: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Shaper {
    Mahimahi,
    Direct,
}

impl From<Shaper> for ShaperKind {
    fn from(shaper: Shaper) -> Self {
        match shaper {
            Shaper::Mahimahi => ShaperKind::Mahimahi,
            Shaper::Direct => ShaperKind::Direct,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Trace {
            bandwidth_mbps,
            duration_secs,
            out,
        } => {
            trace::write_trace_file(&out, bandwidth_mbps, duration_secs)?;
        }
        Command::Presets { dir } => {
            let written = trace::write_presets(&dir)?;
            info!("Wrote {} preset traces to {}", written.len(), dir.display());
        }
        Command::Run(args) => run(args).await?,
        Command::Summarize { report } => {
            let report = SessionReport::read_json(&report)?;
            print_summary(&report);
        }
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();
}

async fn run(args: RunArgs) -> Result<()> {
    let experiment = match &args.experiment {
        Some(path) => plan::load_experiment(path)?,
        None => Default::default(),
    };
    let overrides = Overrides {
        strategies: args.strategies,
        duration_secs: args.duration_secs,
        sender_host: args.sender_host,
        shaper: args.shaper.map(Into::into),
        delay_ms: args.delay_ms,
        queue_size_bytes: args.queue_size_bytes,
        trace_file: args.trace_file,
        loss_rate: args.loss_rate,
        receiver_program: args.receiver_program,
        inherit_receiver_output: args.receiver_output,
    };
    let plan = RunPlan::resolve(experiment, overrides)?;
    info!(
        "cc-lab running '{}' with {} sender(s) for {:.1}s",
        plan.name,
        plan.senders.len(),
        plan.session.duration.as_secs_f64()
    );

    let mut senders = Vec::with_capacity(plan.senders.len());
    for (id, planned) in plan.senders.iter().enumerate() {
        let sender = Sender::bind(id, planned.strategy.build(), planned.config.clone())
            .await
            .with_context(|| format!("Failed to set up sender {id} ({})", planned.strategy))?;
        senders.push(sender);
    }

    let report = Session::new(plan.session).run(senders).await?;
    report.log_summary();

    if let Some(path) = &args.report_out {
        report.write_json(path)?;
    }
    Ok(())
}

fn print_summary(report: &SessionReport) {
    println!(
        "{} sender(s), {:.1}s, delay {} ms, trace {}",
        report.senders.len(),
        report.duration_secs,
        report.profile.delay_ms,
        report.profile.trace_file.display()
    );
    for (sender, perf) in report.performance() {
        println!("sender {} ({}, port {})", sender.sender, sender.strategy, sender.port);
        println!("  {perf}");
        println!(
            "  sent {} packets, final cwnd {}, ssthresh {}",
            sender.packets_sent, sender.metrics.cwnd, sender.metrics.ssthresh
        );
    }
}
