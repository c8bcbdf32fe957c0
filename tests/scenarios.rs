//! End-to-end scenarios against an in-process FIX acceptor on a real
//! TCP socket: logon authentication, gap/resend handling, quoting and
//! fill flow, confidence gating, and the emergency policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use truex_mm::config::{
    AppConfig, HedgeConfig, InventoryConfig, PnlConfig, QuoteConfig, SessionConfig,
};
use truex_mm::engine::hedge::{AddOrderRequest, HedgeOrderInfo, HedgeOrderStatus, HedgeVenue};
use truex_mm::engine::orchestrator::{EngineEvent, Orchestrator};
use truex_mm::fix::message::{self as fix, msg_type, tag, FixMessage};
use truex_mm::fix::session::{logon_signature, FixSession, SessionEvent};
use truex_mm::models::{PriceUpdate, Side};

const SENDER: &str = "CLI_CLIENT";
const TARGET: &str = "TRUEX_UAT_OE";
const API_KEY: &str = "test_api_key";
const API_SECRET: &str = "test-api-secret";

/// Minimal FIX counterparty for tests.
struct Acceptor {
    stream: TcpStream,
    buf: Vec<u8>,
    seq_out: u64,
}

impl Acceptor {
    async fn accept(listener: TcpListener) -> Self {
        let (stream, _) = listener.accept().await.expect("accept");
        Self { stream, buf: Vec::new(), seq_out: 0 }
    }

    async fn read_message(&mut self) -> FixMessage {
        loop {
            if let Some(frame) = fix::next_frame(&mut self.buf) {
                return fix::decode(&frame).expect("inbound frame decodes");
            }
            let mut chunk = [0u8; 4096];
            let n = timeout(Duration::from_secs(5), self.stream.read(&mut chunk))
                .await
                .expect("read timeout")
                .expect("read");
            assert!(n > 0, "initiator closed the socket");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Reads until a message of the wanted type arrives, skipping
    /// heartbeats and other admin chatter.
    async fn read_message_of_type(&mut self, wanted: &str) -> FixMessage {
        loop {
            let msg = self.read_message().await;
            if msg.msg_type() == Some(wanted) {
                return msg;
            }
        }
    }

    async fn send_with_seq(&mut self, mt: &str, seq: u64, extra: &[(u32, String)]) {
        let mut fields = vec![
            (tag::MSG_TYPE, mt.to_string()),
            (tag::SENDER_COMP_ID, TARGET.to_string()),
            (tag::TARGET_COMP_ID, SENDER.to_string()),
            (tag::MSG_SEQ_NUM, seq.to_string()),
            (tag::SENDING_TIME, fix::now_timestamp()),
        ];
        fields.extend(extra.iter().cloned());
        self.stream
            .write_all(&fix::encode_fields(&fields))
            .await
            .expect("acceptor write");
    }

    async fn send(&mut self, mt: &str, extra: &[(u32, String)]) {
        self.seq_out += 1;
        let seq = self.seq_out;
        self.send_with_seq(mt, seq, extra).await;
    }

    /// Validates the logon HMAC against the shared credentials and
    /// accepts the session.
    async fn expect_logon_and_accept(&mut self) -> FixMessage {
        let logon = self.read_message().await;
        assert_eq!(logon.msg_type(), Some("A"));
        assert_eq!(logon.get(tag::RESET_SEQ_NUM_FLAG), Some("Y"));
        assert_eq!(logon.get(tag::ENCRYPT_METHOD), Some("0"));
        assert_eq!(logon.get(tag::USERNAME), Some(API_KEY));
        assert_eq!(logon.get(tag::DEFAULT_APPL_VER_ID), Some("FIX.5.0SP2"));
        let expected = logon_signature(
            logon.get(tag::SENDING_TIME).expect("52 present"),
            "A",
            logon.seq_num().expect("34 present"),
            SENDER,
            TARGET,
            API_KEY,
            API_SECRET,
        );
        assert_eq!(logon.get(tag::PASSWORD), Some(expected.as_str()), "logon MAC mismatch");
        self.send(msg_type::LOGON, &[(tag::RESET_SEQ_NUM_FLAG, "Y".into())]).await;
        logon
    }
}

fn session_config(port: u16) -> SessionConfig {
    SessionConfig {
        host: "127.0.0.1".to_string(),
        port,
        sender_comp_id: SENDER.to_string(),
        target_comp_id: TARGET.to_string(),
        api_key: API_KEY.to_string(),
        api_secret: API_SECRET.to_string(),
        connect_timeout_ms: 2_000,
        logon_timeout_ms: 2_000,
        ..SessionConfig::default()
    }
}

async fn bound_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    (listener, port)
}

/// Hedge venue stub that fills everything immediately.
struct InstantFillVenue {
    orders: Mutex<Vec<AddOrderRequest>>,
}

impl InstantFillVenue {
    fn new() -> Arc<Self> {
        Arc::new(Self { orders: Mutex::new(Vec::new()) })
    }
}

#[async_trait]
impl HedgeVenue for InstantFillVenue {
    async fn add_order(&self, request: AddOrderRequest) -> anyhow::Result<String> {
        self.orders.lock().push(request);
        Ok("HTX1".to_string())
    }

    async fn query_order(&self, _txid: &str) -> anyhow::Result<HedgeOrderInfo> {
        Ok(HedgeOrderInfo { status: HedgeOrderStatus::Closed, vol_exec: 1.0, price: 100_000.0 })
    }

    async fn cancel_order(&self, _txid: &str) -> anyhow::Result<u32> {
        Ok(1)
    }
}

fn app_config(oe_port: u16, md_port: u16) -> AppConfig {
    AppConfig {
        session: session_config(oe_port),
        market_data: SessionConfig {
            connect_timeout_ms: 200,
            logon_timeout_ms: 200,
            ..session_config(md_port)
        },
        inventory: InventoryConfig {
            max_position_base: 10.0,
            hedge_threshold_base: 8.0,
            emergency_limit_base: 12.0,
            max_skew_ticks: 10.0,
            skew_exponent: 2.0,
            tick_size: 0.5,
            limit_warning_pct: 0.8,
        },
        quote: QuoteConfig {
            symbol: "BTC-USD".to_string(),
            client_id: String::new(),
            levels: 1,
            base_spread_bps: 50.0,
            level_spacing_ticks: 1.0,
            reprice_threshold_ticks: 2.0,
            base_size: 0.01,
            size_decay_factor: 0.8,
            tick_size: 0.5,
            max_orders_per_second: 50,
            dup_guard_ms: 500,
            min_notional: 10.0,
            price_band_pct: 2.5,
            confidence_threshold: 0.5,
        },
        hedge: HedgeConfig {
            hedge_symbol: "XBTUSD".to_string(),
            // High minimum keeps shutdown flatten out of these tests
            min_hedge_size: 100.0,
            max_hedge_size: 200.0,
            limit_timeout_ms: 500,
            poll_interval_ms: 20,
            limit_price_offset_bps: 2.0,
        },
        pnl: PnlConfig::default(),
        kraken: Default::default(),
        drain_interval_ms: 50,
        price_from_book: false,
        hedge_dry_run: true,
    }
}

fn price(mid: f64, confidence: f64) -> PriceUpdate {
    PriceUpdate {
        mid,
        best_bid: mid - 5.0,
        best_ask: mid + 5.0,
        confidence,
        timestamp: chrono::Utc::now(),
    }
}

async fn next_engine_event(rx: &mut mpsc::UnboundedReceiver<EngineEvent>) -> EngineEvent {
    timeout(Duration::from_secs(5), rx.recv()).await.expect("engine event timeout").expect("open")
}

/// Gap and resend, session level: outbound seqs 1..5, then a resend
/// request for 2..4 is served from the store with PossDupFlag.
#[tokio::test]
async fn scenario_gap_resend_serves_stored_messages() {
    let (listener, port) = bound_listener().await;
    let acceptor_task = tokio::spawn(async move {
        let mut acc = Acceptor::accept(listener).await;
        acc.expect_logon_and_accept().await;

        // Initiator sends seqs 2..5
        for expected_seq in 2..=5u64 {
            let msg = acc.read_message().await;
            assert_eq!(msg.seq_num(), Some(expected_seq));
        }

        // Request seqs 2..4 again
        acc.send(
            msg_type::RESEND_REQUEST,
            &[(tag::BEGIN_SEQ_NO, "2".into()), (tag::END_SEQ_NO, "4".into())],
        )
        .await;

        let mut resent_seqs = Vec::new();
        for _ in 0..3 {
            let msg = acc.read_message().await;
            assert_eq!(msg.get(tag::POSS_DUP_FLAG), Some("Y"), "resent message needs 43=Y");
            assert!(msg.get(tag::SENDING_TIME).is_some());
            assert!(msg.get(tag::ORIG_SENDING_TIME).is_none(), "122 must be omitted");
            resent_seqs.push(msg.seq_num().unwrap());
        }
        assert_eq!(resent_seqs, vec![2, 3, 4]);
    });

    let (session, mut events) = FixSession::new(session_config(port));
    session.connect().await.expect("logon");

    for i in 0..4 {
        let mut msg = FixMessage::new(msg_type::NEW_ORDER_SINGLE);
        msg.set(tag::CL_ORD_ID, format!("Q{:016}", i)).set(tag::SYMBOL, "BTC-USD");
        session.send_app_message(msg).await.expect("send");
    }
    assert_eq!(session.last_seq_out(), 5);

    acceptor_task.await.expect("acceptor");

    let mut completed = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while completed.is_none() && tokio::time::Instant::now() < deadline {
        match timeout(Duration::from_millis(200), events.recv()).await {
            Ok(Some(SessionEvent::ResendCompleted { begin, end, resent, skipped, requested })) => {
                completed = Some((begin, end, resent, skipped, requested));
            }
            Ok(Some(_)) => {}
            _ => {}
        }
    }
    assert_eq!(completed, Some((2, 4, 3, 0, 3)));
    session.disconnect().await;
}

/// EndSeqNo 0 means "through the last sent seq".
#[tokio::test]
async fn scenario_resend_to_end_zero() {
    let (listener, port) = bound_listener().await;
    let acceptor_task = tokio::spawn(async move {
        let mut acc = Acceptor::accept(listener).await;
        acc.expect_logon_and_accept().await;
        for _ in 2..=3u64 {
            acc.read_message().await;
        }
        acc.send(
            msg_type::RESEND_REQUEST,
            &[(tag::BEGIN_SEQ_NO, "2".into()), (tag::END_SEQ_NO, "0".into())],
        )
        .await;
        let mut seqs = Vec::new();
        for _ in 0..2 {
            let msg = acc.read_message().await;
            assert_eq!(msg.get(tag::POSS_DUP_FLAG), Some("Y"));
            seqs.push(msg.seq_num().unwrap());
        }
        assert_eq!(seqs, vec![2, 3]);
    });

    let (session, _events) = FixSession::new(session_config(port));
    session.connect().await.expect("logon");
    for i in 0..2 {
        let mut msg = FixMessage::new(msg_type::NEW_ORDER_SINGLE);
        msg.set(tag::CL_ORD_ID, format!("Qz{:015}", i)).set(tag::SYMBOL, "BTC-USD");
        session.send_app_message(msg).await.expect("send");
    }
    acceptor_task.await.expect("acceptor");
    session.disconnect().await;
}

/// Full engine flow: logon, quote both sides, ack, fill the bid, then
/// shut down cleanly.
#[tokio::test]
async fn scenario_quote_fill_and_shutdown() {
    let (listener, oe_port) = bound_listener().await;
    let (_md_listener_none, md_port) = {
        // Bind then drop so the market-data connect fails fast
        let (l, p) = bound_listener().await;
        drop(l);
        ((), p)
    };

    let acceptor_task = tokio::spawn(async move {
        let mut acc = Acceptor::accept(listener).await;
        acc.expect_logon_and_accept().await;

        // Two quotes arrive: bid first, then ask
        let bid = acc.read_message_of_type(msg_type::NEW_ORDER_SINGLE).await;
        assert_eq!(bid.get(tag::SIDE), Some("1"));
        assert_eq!(bid.get(tag::ORD_TYPE), Some("2"));
        assert_eq!(bid.get(tag::TIME_IN_FORCE), Some("1"));
        assert_eq!(bid.get(tag::PRICE), Some("99749.5"));
        let ask = acc.read_message_of_type(msg_type::NEW_ORDER_SINGLE).await;
        assert_eq!(ask.get(tag::SIDE), Some("2"));
        assert_eq!(ask.get(tag::PRICE), Some("100250.5"));

        let bid_id = bid.get(tag::CL_ORD_ID).unwrap().to_string();
        let ask_id = ask.get(tag::CL_ORD_ID).unwrap().to_string();

        // Ack both, then fill the bid
        acc.send(
            msg_type::EXECUTION_REPORT,
            &[(tag::CL_ORD_ID, bid_id.clone()), (tag::ORD_STATUS, "0".into())],
        )
        .await;
        acc.send(
            msg_type::EXECUTION_REPORT,
            &[(tag::CL_ORD_ID, ask_id.clone()), (tag::ORD_STATUS, "0".into())],
        )
        .await;
        acc.send(
            msg_type::EXECUTION_REPORT,
            &[
                (tag::CL_ORD_ID, bid_id.clone()),
                (tag::ORD_STATUS, "2".into()),
                (tag::SIDE, "1".into()),
                (tag::LAST_PX, "99749.5".into()),
                (tag::LAST_QTY, "0.01".into()),
                (tag::EXEC_ID, "EXEC-1".into()),
            ],
        )
        .await;

        // Shutdown pulls the surviving ask and logs out
        let cancel = acc.read_message_of_type(msg_type::ORDER_CANCEL_REQUEST).await;
        assert_eq!(cancel.get(tag::ORIG_CL_ORD_ID), Some(ask_id.as_str()));
        let _ = acc.read_message_of_type(msg_type::LOGOUT).await;
    });

    let venue = InstantFillVenue::new();
    let (mut orchestrator, mut engine_events) =
        Orchestrator::new(app_config(oe_port, md_port), venue.clone());
    let price_tx = orchestrator.price_sender();

    orchestrator.start().await.expect("start");
    assert!(matches!(next_engine_event(&mut engine_events).await, EngineEvent::Started));

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let run_task = tokio::spawn(async move {
        orchestrator.run(shutdown_rx).await;
    });

    price_tx.send(price(100_000.0, 1.0)).expect("price channel open");

    // The bid fill propagates through inventory and P&L to the audit
    // stream
    let fill = loop {
        match next_engine_event(&mut engine_events).await {
            EngineEvent::Fill(fill) => break fill,
            _ => {}
        }
    };
    assert_eq!(fill.exec_id, "EXEC-1");
    assert_eq!(fill.side, Side::Buy);
    assert_eq!(fill.price, 99_749.5);
    assert_eq!(fill.quantity, 0.01);

    shutdown_tx.send(()).await.expect("shutdown");
    let summary = loop {
        match next_engine_event(&mut engine_events).await {
            EngineEvent::Stopped { summary } => break summary,
            _ => {}
        }
    };
    assert_eq!(summary.fill_count, 1);
    assert!((summary.open_net_position - 0.01).abs() < 1e-12);
    assert!(venue.orders.lock().is_empty(), "no hedge should have run");

    run_task.await.expect("run task");
    acceptor_task.await.expect("acceptor");
}

/// Confidence below threshold pulls every resting quote.
#[tokio::test]
async fn scenario_low_confidence_cancels_all() {
    let (listener, oe_port) = bound_listener().await;
    let (_unused, md_port) = {
        let (l, p) = bound_listener().await;
        drop(l);
        ((), p)
    };

    let acceptor_task = tokio::spawn(async move {
        let mut acc = Acceptor::accept(listener).await;
        acc.expect_logon_and_accept().await;

        let bid = acc.read_message_of_type(msg_type::NEW_ORDER_SINGLE).await;
        let ask = acc.read_message_of_type(msg_type::NEW_ORDER_SINGLE).await;
        for msg in [&bid, &ask] {
            let id = msg.get(tag::CL_ORD_ID).unwrap().to_string();
            acc.send(
                msg_type::EXECUTION_REPORT,
                &[(tag::CL_ORD_ID, id), (tag::ORD_STATUS, "0".into())],
            )
            .await;
        }

        let mut cancelled = std::collections::HashSet::new();
        for _ in 0..2 {
            let cancel = acc.read_message_of_type(msg_type::ORDER_CANCEL_REQUEST).await;
            cancelled.insert(cancel.get(tag::ORIG_CL_ORD_ID).unwrap().to_string());
        }
        assert!(cancelled.contains(bid.get(tag::CL_ORD_ID).unwrap()));
        assert!(cancelled.contains(ask.get(tag::CL_ORD_ID).unwrap()));
    });

    let venue = InstantFillVenue::new();
    let (mut orchestrator, _engine_events) =
        Orchestrator::new(app_config(oe_port, md_port), venue);
    let price_tx = orchestrator.price_sender();
    orchestrator.start().await.expect("start");

    let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        orchestrator.run(shutdown_rx).await;
    });

    price_tx.send(price(100_000.0, 1.0)).expect("send");
    tokio::time::sleep(Duration::from_millis(300)).await;
    price_tx.send(price(100_000.0, 0.1)).expect("send");

    timeout(Duration::from_secs(5), acceptor_task).await.expect("scenario timeout").expect("acceptor");
}

/// Emergency: a fill beyond the emergency limit halts quoting, cancels
/// the surviving orders and never hedges.
#[tokio::test]
async fn scenario_emergency_halts_quoting() {
    let (listener, oe_port) = bound_listener().await;
    let (_unused, md_port) = {
        let (l, p) = bound_listener().await;
        drop(l);
        ((), p)
    };

    let mut config = app_config(oe_port, md_port);
    config.inventory.max_position_base = 1.0;
    config.inventory.hedge_threshold_base = 0.5;
    config.inventory.emergency_limit_base = 1.2;

    let acceptor_task = tokio::spawn(async move {
        let mut acc = Acceptor::accept(listener).await;
        acc.expect_logon_and_accept().await;

        let bid = acc.read_message_of_type(msg_type::NEW_ORDER_SINGLE).await;
        let ask = acc.read_message_of_type(msg_type::NEW_ORDER_SINGLE).await;
        let bid_id = bid.get(tag::CL_ORD_ID).unwrap().to_string();
        let ask_id = ask.get(tag::CL_ORD_ID).unwrap().to_string();

        // Overfill the bid far beyond the emergency limit
        acc.send(
            msg_type::EXECUTION_REPORT,
            &[
                (tag::CL_ORD_ID, bid_id),
                (tag::ORD_STATUS, "2".into()),
                (tag::SIDE, "1".into()),
                (tag::LAST_PX, "100000".into()),
                (tag::LAST_QTY, "1.2".into()),
                (tag::EXEC_ID, "EXEC-EMG".into()),
            ],
        )
        .await;

        // The surviving ask is cancelled by the emergency policy
        let cancel = acc.read_message_of_type(msg_type::ORDER_CANCEL_REQUEST).await;
        assert_eq!(cancel.get(tag::ORIG_CL_ORD_ID), Some(ask_id.as_str()));
    });

    let venue = InstantFillVenue::new();
    let (mut orchestrator, mut engine_events) = Orchestrator::new(config, venue.clone());
    let price_tx = orchestrator.price_sender();
    orchestrator.start().await.expect("start");

    let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        orchestrator.run(shutdown_rx).await;
    });

    price_tx.send(price(100_000.0, 1.0)).expect("send");

    let mut saw_emergency = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !saw_emergency && tokio::time::Instant::now() < deadline {
        if let Ok(Some(event)) = timeout(Duration::from_millis(200), engine_events.recv()).await {
            if let EngineEvent::Emergency { net_position, .. } = event {
                assert!((net_position - 1.2).abs() < 1e-9);
                saw_emergency = true;
            }
        }
    }
    assert!(saw_emergency, "emergency event expected");
    acceptor_task.await.expect("acceptor");

    // Emergency must not trigger a hedge
    assert!(venue.orders.lock().is_empty());

    // Quoting stays halted: further price updates place no orders
    price_tx.send(price(100_000.0, 1.0)).expect("send");
    tokio::time::sleep(Duration::from_millis(300)).await;
}
