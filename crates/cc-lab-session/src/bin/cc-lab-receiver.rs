use anyhow::{Result, bail};
use cc_lab_session::receiver::sender_host_from_env;
use cc_lab_session::{EchoReceiver, ReceiverConfig};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Cumulative-ack echo receiver for cc-lab sessions")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:0")]
    listen: SocketAddr,

    /// Port of a sender to greet, repeatable; senders are greeted in order.
    #[arg(long = "sender-port")]
    sender_ports: Vec<u16>,

    /// Host the senders live on. Defaults to $MAHIMAHI_BASE, then 127.0.0.1.
    #[arg(long)]
    sender_host: Option<IpAddr>,

    /// Pause between greetings of a sender that has not answered.
    #[arg(long, default_value_t = 100)]
    greeting_interval_ms: u64,

    /// Fraction of data packets to drop on arrival.
    #[arg(long, default_value_t = 0.0)]
    loss_rate: f64,

    /// Seed for the loss draw.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();

    if !(0.0..=1.0).contains(&args.loss_rate) {
        bail!("--loss-rate must be within [0, 1], got {}", args.loss_rate);
    }

    let host = args.sender_host.unwrap_or_else(sender_host_from_env);
    let config = ReceiverConfig {
        senders: args
            .sender_ports
            .iter()
            .map(|port| SocketAddr::new(host, *port))
            .collect(),
        greeting_interval: Duration::from_millis(args.greeting_interval_ms),
        loss_rate: args.loss_rate,
        seed: args.seed,
        ..ReceiverConfig::new(args.listen)
    };
    let receiver = EchoReceiver::bind(&config).await?;
    info!(
        "cc-lab-receiver starting on {}, greeting {} sender(s) on {host}",
        receiver.local_addr()?,
        config.senders.len()
    );
    receiver.run().await?;
    Ok(())
}
