use cc_lab_abstract::{Acknowledgement, CongestionStrategy, Message, ShaperKind, StrategyState};
use cc_lab_session::receiver::SEQ_BASE_STRIDE;
use cc_lab_session::{
    EchoReceiver, ReceiverCommand, ReceiverConfig, Sender, SenderConfig, Session, SessionConfig,
    SessionError,
};
use cc_lab_strategy::{AimdParams, FixedWindow, SlowStartAimd};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn fast_config() -> SenderConfig {
    SenderConfig {
        bind_ip: LOCALHOST,
        handshake_attempts: 3,
        handshake_timeout: Duration::from_millis(100),
        ack_timeout: Duration::from_millis(50),
        packet_lifetime: Duration::from_millis(50),
        ..Default::default()
    }
}

/// In-process receiver that greets `senders` in order.
async fn spawn_receiver(loss_rate: f64, senders: &[&Sender]) -> SocketAddr {
    let config = ReceiverConfig {
        senders: senders.iter().map(|s| s.local_addr().unwrap()).collect(),
        greeting_interval: Duration::from_millis(20),
        loss_rate,
        seed: 7,
        ..ReceiverConfig::new(SocketAddr::new(LOCALHOST, 0))
    };
    let receiver = EchoReceiver::bind(&config).await.unwrap();
    let addr = receiver.local_addr().unwrap();
    tokio::spawn(receiver.run());
    addr
}

fn receiver_binary() -> ReceiverCommand {
    ReceiverCommand::new(env!("CARGO_BIN_EXE_cc-lab-receiver"))
        .args(["--listen", "127.0.0.1:0", "--greeting-interval-ms", "20"])
}

async fn fixed(id: usize, window: u64) -> Sender {
    Sender::bind(id, Box::new(FixedWindow::new(window)), fast_config())
        .await
        .unwrap()
}

async fn aimd(id: usize) -> Sender {
    Sender::bind(
        id,
        Box::new(SlowStartAimd::new(AimdParams::default())),
        fast_config(),
    )
    .await
    .unwrap()
}

/// Sends whenever the window is empty and dies on the first ack.
struct PanicOnAck {
    state: StrategyState,
}

impl CongestionStrategy for PanicOnAck {
    fn name(&self) -> &str {
        "panic-on-ack"
    }

    fn send_budget(&self, in_flight: usize) -> usize {
        usize::from(in_flight == 0)
    }

    fn on_ack(&mut self, ack: &Acknowledgement, _sent_at: Option<Duration>) {
        panic!("ack for seq {} arrived", ack.seq);
    }

    fn state(&self) -> &StrategyState {
        &self.state
    }
}

#[tokio::test]
async fn handshake_gives_up_after_configured_attempts() {
    let mut sender = fixed(0, 4).await;
    let started = Instant::now();
    let err = sender.handshake().await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, SessionError::Handshake { sender: 0, attempts: 3 }));
    assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(800), "{elapsed:?}");
    assert_eq!(sender.receiver_addr(), None);
}

#[tokio::test]
async fn handshake_echoes_the_greeting() {
    let mut sender = fixed(0, 4).await;
    let receiver = tokio::net::UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    receiver
        .send_to(&Message::data(9, 0, 0).encode(), sender.local_addr().unwrap())
        .await
        .unwrap();
    receiver
        .send_to(&Message::handshake(77).encode(), sender.local_addr().unwrap())
        .await
        .unwrap();

    assert_eq!(sender.handshake().await.unwrap(), 77);
    assert_eq!(sender.next_seq(), 77);
    assert_eq!(sender.receiver_addr(), Some(receiver.local_addr().unwrap()));

    let mut buf = [0u8; 64];
    let (len, from) = receiver.recv_from(&mut buf).await.unwrap();
    assert_eq!(from, sender.local_addr().unwrap());
    assert_eq!(Message::decode(&buf[..len]).unwrap(), Message::handshake(77));
}

#[tokio::test]
async fn run_requires_handshake() {
    let mut sender = fixed(3, 4).await;
    let err = sender.run(Duration::from_millis(50)).await.unwrap_err();
    assert!(matches!(err, SessionError::NotHandshaken(3)));
}

#[tokio::test]
async fn senders_get_distinct_sequence_bases() {
    let mut first = fixed(0, 4).await;
    let mut second = fixed(1, 4).await;
    let receiver = spawn_receiver(0.0, &[&first, &second]).await;

    assert_eq!(first.handshake().await.unwrap(), 0);
    assert_eq!(second.handshake().await.unwrap(), SEQ_BASE_STRIDE);
    assert_eq!(second.next_seq(), SEQ_BASE_STRIDE);
    assert_ne!(first.port(), second.port());
    assert_eq!(first.receiver_addr(), Some(receiver));
    assert_eq!(second.receiver_addr(), Some(receiver));
}

#[tokio::test]
async fn fixed_window_run_collects_rtts() {
    let mut sender = fixed(0, 4).await;
    spawn_receiver(0.0, &[&sender]).await;
    sender.handshake().await.unwrap();

    let metrics = sender.run(Duration::from_millis(300)).await.unwrap();

    assert!(metrics.total_acks > 0);
    assert!(!metrics.rtts.is_empty());
    assert!(metrics.rtts.iter().all(|rtt| *rtt >= 0.0));
    assert!(metrics.cwnds.iter().all(|cwnd| *cwnd == 4));
    assert!(sender.sent_packets() >= metrics.total_acks);
    assert_eq!(sender.in_flight(), 0);
    assert_eq!(sender.metrics(), metrics);
}

#[tokio::test]
async fn lossy_link_makes_aimd_back_off() {
    let mut sender = aimd(0).await;
    spawn_receiver(0.3, &[&sender]).await;
    sender.handshake().await.unwrap();

    let metrics = sender.run(Duration::from_millis(500)).await.unwrap();

    assert!(metrics.total_acks > 0);
    assert!(!metrics.slow_start_thresholds.is_empty());
    assert!(metrics.ssthresh < AimdParams::default().initial_ssthresh);
}

#[tokio::test]
async fn silent_receiver_times_out_until_the_deadline() {
    let mut sender = aimd(0).await;
    let receiver = tokio::net::UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    receiver
        .send_to(&Message::handshake(0).encode(), sender.local_addr().unwrap())
        .await
        .unwrap();
    sender.handshake().await.unwrap();

    // the receiver never answers again
    let duration = Duration::from_millis(300);
    let metrics = sender.run(duration).await.unwrap();

    let marks = sender.marks();
    let ran = marks
        .run_finished
        .unwrap()
        .duration_since(marks.run_started.unwrap());
    assert!(ran >= duration, "{ran:?}");
    assert_eq!(metrics.total_acks, 0);
    assert_eq!(metrics.cwnd, 1);
    assert!(!metrics.slow_start_thresholds.is_empty());
    assert!(sender.sent_packets() >= 2);
}

#[tokio::test]
async fn session_handshakes_everyone_before_running() {
    let senders = vec![fixed(0, 4).await, aimd(1).await];

    let config = SessionConfig {
        shaper: ShaperKind::Direct,
        ..SessionConfig::new(receiver_binary(), Duration::from_millis(300))
    };
    let report = Session::new(config).run(senders).await.unwrap();

    assert_eq!(report.senders.len(), 2);
    assert_eq!(report.shaper, ShaperKind::Direct);
    let last_handshake = report
        .senders
        .iter()
        .map(|s| s.handshake_completed)
        .max()
        .unwrap();
    for sender in &report.senders {
        assert!(sender.run_started > last_handshake);
        assert!(sender.run_finished >= sender.run_started + Duration::from_millis(300));
        assert!(sender.metrics.total_acks > 0, "sender {}", sender.sender);
    }
    assert!(report.senders[0].handshake_completed < report.senders[1].handshake_completed);
    assert_eq!(report.senders[1].strategy, "aimd");
}

#[tokio::test]
async fn session_aborts_when_a_handshake_fails() {
    let senders = vec![fixed(0, 4).await, fixed(1, 4).await];
    // stays up but never greets anyone; appended ports land in $0 and $1
    let silent = ReceiverCommand::new("sh").args(["-c", "exec sleep 5"]);

    let config = SessionConfig {
        shaper: ShaperKind::Direct,
        ..SessionConfig::new(silent, Duration::from_millis(300))
    };
    let err = Session::new(config).run(senders).await.unwrap_err();
    assert!(matches!(err, SessionError::Handshake { sender: 0, attempts: 3 }));
}

#[tokio::test]
async fn session_joins_every_sender_before_reporting_a_failure() {
    let crashing = Sender::bind(
        0,
        Box::new(PanicOnAck {
            state: StrategyState::new(1, 1),
        }),
        fast_config(),
    )
    .await
    .unwrap();
    let senders = vec![crashing, fixed(1, 4).await];

    let duration = Duration::from_millis(400);
    let config = SessionConfig {
        shaper: ShaperKind::Direct,
        ..SessionConfig::new(receiver_binary(), duration)
    };
    let startup = config.startup_delay;
    let started = Instant::now();
    let err = Session::new(config).run(senders).await.unwrap_err();

    assert!(matches!(err, SessionError::Join { sender: 0, .. }));
    // sender 1 ran to its deadline before the error came back
    assert!(started.elapsed() >= startup + duration, "{:?}", started.elapsed());
}

#[tokio::test]
async fn missing_receiver_program_is_a_launch_error() {
    let sender = fixed(0, 1).await;
    let config = SessionConfig {
        shaper: ShaperKind::Direct,
        ..SessionConfig::new(
            ReceiverCommand::new("/nonexistent/cc-lab-receiver"),
            Duration::from_millis(100),
        )
    };
    let err = Session::new(config).run(vec![sender]).await.unwrap_err();
    assert!(matches!(err, SessionError::ReceiverLaunch { .. }));
}

#[tokio::test]
async fn receiver_that_exits_early_is_reported() {
    let sender = fixed(0, 1).await;
    let config = SessionConfig {
        shaper: ShaperKind::Direct,
        startup_delay: Duration::from_secs(2),
        ..SessionConfig::new(
            receiver_binary().args(["--loss-rate", "5"]),
            Duration::from_millis(100),
        )
    };
    let err = Session::new(config).run(vec![sender]).await.unwrap_err();
    assert!(matches!(err, SessionError::ReceiverExited { .. }));
}

#[tokio::test]
async fn empty_session_is_rejected() {
    let config = SessionConfig::new(ReceiverCommand::new("true"), Duration::from_millis(10));
    let err = Session::new(config).run(Vec::new()).await.unwrap_err();
    assert!(matches!(err, SessionError::NoSenders));
}
