use cc_lab_abstract::Message;
use cc_lab_abstract::packet::MAX_DATAGRAM_LEN;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Distance between sequence bases handed to consecutive senders.
pub const SEQ_BASE_STRIDE: u64 = 1 << 32;

/// Environment variable a Mahimahi shell sets to the address of the host
/// side of its link.
pub const MAHIMAHI_BASE_ENV: &str = "MAHIMAHI_BASE";

/// Where the senders are reachable from the receiver's side of the link:
/// `MAHIMAHI_BASE` inside a shaped shell, loopback otherwise.
pub fn sender_host_from_env() -> IpAddr {
    std::env::var(MAHIMAHI_BASE_ENV)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub listen: SocketAddr,
    /// Senders to greet, in handshake order.
    pub senders: Vec<SocketAddr>,
    /// Pause between repeated greetings of a silent sender.
    pub greeting_interval: Duration,
    /// Greetings sent to one sender before moving on to the next.
    pub greeting_attempts: u32,
    /// Fraction of data packets dropped on arrival, for unshaped runs.
    pub loss_rate: f64,
    pub seed: u64,
}

impl ReceiverConfig {
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            senders: Vec::new(),
            greeting_interval: Duration::from_millis(100),
            greeting_attempts: 50,
            loss_rate: 0.0,
            seed: 0,
        }
    }
}

#[derive(Debug)]
struct PeerState {
    base: u64,
    expected: u64,
    last_in_order: Option<u64>,
}

/// Cumulative-ack echo endpoint the senders talk to.
///
/// The receiver opens every exchange: it greets each configured sender with
/// a handshake carrying that sender's sequence base and waits for the sender
/// to echo it back. In-order data is acknowledged with its own sequence number. A packet that
/// arrives after a gap, or late, re-acknowledges the last in-order packet,
/// which the sender sees as a duplicate ack; after a gap the receiver moves
/// on to the newer packet. Every ack echoes the timestamp of the packet that
/// caused it.
pub struct EchoReceiver {
    socket: UdpSocket,
    peers: HashMap<SocketAddr, PeerState>,
    next_base: u64,
    senders: Vec<SocketAddr>,
    greeting_interval: Duration,
    greeting_attempts: u32,
    loss_rate: f64,
    rng: StdRng,
}

impl EchoReceiver {
    pub async fn bind(config: &ReceiverConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(config.listen).await?;
        Ok(Self {
            socket,
            peers: HashMap::new(),
            next_base: 0,
            senders: config.senders.clone(),
            greeting_interval: config.greeting_interval,
            greeting_attempts: config.greeting_attempts.max(1),
            loss_rate: config.loss_rate,
            rng: StdRng::seed_from_u64(config.seed),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn run(mut self) -> io::Result<()> {
        info!("Receiver listening on {}", self.local_addr()?);
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

        for sender in std::mem::take(&mut self.senders) {
            self.greet(sender, &mut buf).await?;
        }
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            self.dispatch(&buf[..len], from).await;
        }
    }

    /// Hand `sender` its sequence base, repeating the greeting until the
    /// sender echoes it or the attempts run out.
    async fn greet(&mut self, sender: SocketAddr, buf: &mut [u8]) -> io::Result<bool> {
        let base = self.register(sender);
        let greeting = Message::handshake(base).encode();

        for attempt in 1..=self.greeting_attempts {
            self.socket.send_to(&greeting, sender).await?;
            let deadline = Instant::now() + self.greeting_interval;

            while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
                let (len, from) = match timeout(remaining, self.socket.recv_from(buf)).await {
                    Err(_) => break,
                    Ok(Err(e)) => {
                        warn!("Receive failed while greeting {sender}: {e}");
                        break;
                    }
                    Ok(Ok(received)) => received,
                };
                if from == sender
                    && let Ok(Message::Handshake { seq_base }) = Message::decode(&buf[..len])
                    && seq_base == base
                {
                    info!("Sender {sender} confirmed sequence base {base} after {attempt} greeting(s)");
                    return Ok(true);
                }
                self.dispatch(&buf[..len], from).await;
            }
        }

        warn!(
            "Sender {sender} never confirmed its handshake after {} greetings",
            self.greeting_attempts
        );
        Ok(false)
    }

    async fn dispatch(&mut self, datagram: &[u8], from: SocketAddr) {
        let reply = match Message::decode(datagram) {
            Ok(message) => self.handle(message, from),
            Err(e) => {
                warn!("Ignoring datagram from {from}: {e}");
                return;
            }
        };
        if let Some(reply) = reply
            && let Err(e) = self.socket.send_to(&reply.encode(), from).await
        {
            warn!("Failed to reply to {from}: {e}");
        }
    }

    /// Sequence base for `peer`, assigned on first sight.
    fn register(&mut self, peer: SocketAddr) -> u64 {
        if let Some(state) = self.peers.get(&peer) {
            return state.base;
        }
        let base = self.next_base;
        self.next_base += SEQ_BASE_STRIDE;
        self.peers.insert(
            peer,
            PeerState {
                base,
                expected: base,
                last_in_order: None,
            },
        );
        info!("Assigned sequence base {base} to {peer}");
        base
    }

    fn handle(&mut self, message: Message, from: SocketAddr) -> Option<Message> {
        match message {
            // late or repeated confirmations
            Message::Handshake { .. } => None,
            Message::Data {
                seq, timestamp_us, ..
            } => {
                if self.loss_rate > 0.0 && self.rng.random::<f64>() < self.loss_rate {
                    debug!("Dropping seq={seq} from {from}");
                    return None;
                }
                let Some(peer) = self.peers.get_mut(&from) else {
                    debug!("Data from {from} before handshake");
                    return None;
                };
                if seq == peer.expected {
                    peer.expected += 1;
                    peer.last_in_order = Some(seq);
                    return Some(Message::ack(seq, timestamp_us));
                }
                let reply = peer
                    .last_in_order
                    .map(|last| Message::ack(last, timestamp_us));
                if seq > peer.expected {
                    // senders never retransmit: report the gap once, then resync
                    debug!("Gap from {from}: expected {}, got {seq}", peer.expected);
                    peer.expected = seq + 1;
                    peer.last_in_order = Some(seq);
                }
                reply
            }
            Message::Ack { .. } => None,
        }
    }
}
