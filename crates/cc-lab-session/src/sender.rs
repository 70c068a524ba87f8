use cc_lab_abstract::packet::{DATA_HEADER_LEN, MAX_DATAGRAM_LEN};
use cc_lab_abstract::{
    AVERAGE_SEGMENT_SIZE, Acknowledgement, CongestionStrategy, Message, StrategyState,
};
use std::collections::BTreeMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::port::free_udp_port;

#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Local address the sender binds on.
    pub bind_ip: IpAddr,
    /// Handshake waits before giving up.
    pub handshake_attempts: u32,
    /// How long each handshake wait lasts for the receiver's greeting.
    pub handshake_timeout: Duration,
    /// How long the loop waits for an ack once the window is full.
    pub ack_timeout: Duration,
    /// Unacknowledged packets older than this no longer count as in flight.
    pub packet_lifetime: Duration,
    /// Zero bytes appended to every data packet.
    pub filler_len: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            handshake_attempts: 5,
            handshake_timeout: Duration::from_millis(500),
            ack_timeout: Duration::from_secs(1),
            packet_lifetime: Duration::from_secs(2),
            filler_len: AVERAGE_SEGMENT_SIZE - DATA_HEADER_LEN,
        }
    }
}

/// Wall-clock marks of one sender's life, used to check session ordering.
#[derive(Debug, Clone, Copy, Default)]
pub struct SenderMarks {
    pub handshake_completed: Option<Instant>,
    pub run_started: Option<Instant>,
    pub run_finished: Option<Instant>,
}

/// One traffic stream: a UDP endpoint driven by a congestion strategy.
pub struct Sender {
    id: usize,
    socket: UdpSocket,
    /// Learned from the receiver's greeting.
    receiver: Option<SocketAddr>,
    strategy: Box<dyn CongestionStrategy>,
    config: SenderConfig,

    seq_base: u64,
    next_seq: u64,
    /// seq -> send instant, ordered oldest first
    outstanding: BTreeMap<u64, Instant>,
    /// Origin for data timestamps and ack times; reset when the run starts.
    epoch: Instant,
    marks: SenderMarks,
}

impl Sender {
    pub async fn bind(
        id: usize,
        strategy: Box<dyn CongestionStrategy>,
        config: SenderConfig,
    ) -> Result<Self, SessionError> {
        let port = free_udp_port(config.bind_ip)?;
        let socket = UdpSocket::bind(SocketAddr::new(config.bind_ip, port)).await?;
        debug!("Sender {id} bound to port {port} ({})", strategy.name());

        Ok(Self {
            id,
            socket,
            receiver: None,
            strategy,
            config,
            seq_base: 0,
            next_seq: 0,
            outstanding: BTreeMap::new(),
            epoch: Instant::now(),
            marks: SenderMarks::default(),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn port(&self) -> u16 {
        self.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// The receiver's address as seen from here, once greeted.
    pub fn receiver_addr(&self) -> Option<SocketAddr> {
        self.receiver
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn in_flight(&self) -> usize {
        self.outstanding.len()
    }

    pub fn marks(&self) -> SenderMarks {
        self.marks
    }

    /// Snapshot of the strategy's bookkeeping.
    pub fn metrics(&self) -> StrategyState {
        self.strategy.state().clone()
    }

    /// Obtain a sequence base from the receiver.
    ///
    /// The receiver greets this sender's port with a handshake carrying the
    /// base; the sender adopts the greeting's source as the receiver address
    /// and echoes the handshake back. Each of the `handshake_attempts` waits
    /// lasts `handshake_timeout`.
    pub async fn handshake(&mut self) -> Result<u64, SessionError> {
        let attempts = self.config.handshake_attempts.max(1);
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

        for attempt in 1..=attempts {
            let deadline = Instant::now() + self.config.handshake_timeout;

            while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
                let (len, from) = match timeout(remaining, self.socket.recv_from(&mut buf)).await {
                    Err(_) => break,
                    Ok(Err(e)) => {
                        warn!("Sender {} handshake receive failed: {e}", self.id);
                        break;
                    }
                    Ok(Ok(received)) => received,
                };
                let Ok(Message::Handshake { seq_base }) = Message::decode(&buf[..len]) else {
                    debug!("Sender {} ignoring datagram from {from} before handshake", self.id);
                    continue;
                };
                self.socket
                    .send_to(&Message::handshake(seq_base).encode(), from)
                    .await?;
                self.receiver = Some(from);
                self.seq_base = seq_base;
                self.next_seq = seq_base;
                self.strategy.on_handshake();
                self.marks.handshake_completed = Some(Instant::now());
                info!(
                    "Sender {} greeted by {from} during wait {attempt}, sequence base {seq_base}",
                    self.id
                );
                return Ok(seq_base);
            }
            warn!(
                "Sender {} handshake wait {attempt}/{attempts} timed out",
                self.id
            );
        }

        Err(SessionError::Handshake {
            sender: self.id,
            attempts,
        })
    }

    /// Run the send/ack loop until `duration` of wall-clock time has passed.
    ///
    /// Packets still unacknowledged at the deadline are abandoned.
    pub async fn run(&mut self, duration: Duration) -> Result<StrategyState, SessionError> {
        let Some(receiver) = self.receiver else {
            return Err(SessionError::NotHandshaken(self.id));
        };

        let started = Instant::now();
        let deadline = started + duration;
        self.epoch = started;
        self.marks.run_started = Some(started);
        info!(
            "Sender {} running {} for {:.1}s",
            self.id,
            self.strategy.name(),
            duration.as_secs_f64()
        );

        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.expire_outstanding(now);

            if self.strategy.send_budget(self.outstanding.len()) > 0 {
                match self.transmit(receiver).await {
                    Ok(()) => continue,
                    Err(e) => warn!("Sender {} failed to send seq={}: {e}", self.id, self.next_seq),
                }
            }

            let wait = self.config.ack_timeout.min(deadline - now);
            match timeout(wait, self.socket.recv_from(&mut buf)).await {
                Ok(Ok((len, from))) => self.on_datagram(&buf[..len], from, receiver).await,
                Ok(Err(e)) => warn!("Sender {} receive failed: {e}", self.id),
                Err(_) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    debug!("Sender {} ack wait timed out", self.id);
                    self.strategy.on_timeout();
                }
            }
        }

        let abandoned = self.outstanding.len();
        self.outstanding.clear();
        self.marks.run_finished = Some(Instant::now());
        let state = self.strategy.state();
        info!(
            "Sender {} finished: {} packets sent, {} acks ({} duplicate), {abandoned} abandoned in flight",
            self.id,
            self.sent_packets(),
            state.total_acks,
            state.num_duplicate_acks
        );
        Ok(state.clone())
    }

    /// Data packets put on the wire since the handshake.
    pub fn sent_packets(&self) -> u64 {
        self.next_seq - self.seq_base
    }

    async fn transmit(&mut self, receiver: SocketAddr) -> io::Result<()> {
        let seq = self.next_seq;
        let sent_at = Instant::now();
        let timestamp_us = sent_at.duration_since(self.epoch).as_micros() as u64;
        let packet = Message::data(seq, timestamp_us, self.config.filler_len).encode();
        self.socket.send_to(&packet, receiver).await?;
        self.outstanding.insert(seq, sent_at);
        self.next_seq += 1;
        Ok(())
    }

    fn expire_outstanding(&mut self, now: Instant) {
        while let Some(entry) = self.outstanding.first_entry() {
            if now.duration_since(*entry.get()) < self.config.packet_lifetime {
                break;
            }
            entry.remove();
        }
    }

    async fn on_datagram(&mut self, datagram: &[u8], from: SocketAddr, receiver: SocketAddr) {
        if from != receiver {
            debug!("Sender {} ignoring datagram from {from}", self.id);
            return;
        }
        match Message::decode(datagram) {
            Ok(Message::Ack {
                seq,
                echoed_timestamp_us,
            }) => {
                let ack = Acknowledgement {
                    seq,
                    echoed_timestamp_us,
                    received_at: Instant::now().duration_since(self.epoch),
                };
                let sent_at = self
                    .outstanding
                    .remove(&seq)
                    .map(|sent| sent.saturating_duration_since(self.epoch));
                // anything older than an acked packet is delivered or lost
                self.outstanding = self.outstanding.split_off(&seq);
                self.strategy.on_ack(&ack, sent_at);
            }
            Ok(Message::Handshake { seq_base }) => {
                // the receiver repeats its greeting until an echo gets through
                if let Err(e) = self
                    .socket
                    .send_to(&Message::handshake(seq_base).encode(), receiver)
                    .await
                {
                    warn!("Sender {} failed to echo a repeated greeting: {e}", self.id);
                }
            }
            Ok(other) => debug!("Sender {} ignoring {other:?}", self.id),
            Err(e) => warn!("Sender {} received malformed datagram: {e}", self.id),
        }
    }
}
