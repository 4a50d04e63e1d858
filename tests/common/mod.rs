// Shared test support: an in-memory transport that hands the server side of
// every opened connection to the test.

#![allow(dead_code)]

use async_trait::async_trait;
use loqa_live::live::messages::Setup;
use loqa_live::live::{
    ClientMessage, ClientSettings, InboundFrame, LiveEvent, LiveError, LiveSessionClient,
    ResumptionToken, Transport, TransportConnection,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Server end of one mock connection
pub struct ServerSide {
    pub outbound: mpsc::Receiver<ClientMessage>,
    pub inbound: mpsc::Sender<InboundFrame>,
}

impl ServerSide {
    /// Next message the client sent
    pub async fn next_message(&mut self) -> ClientMessage {
        tokio::time::timeout(Duration::from_secs(60), self.outbound.recv())
            .await
            .expect("timed out waiting for a client message")
            .expect("client dropped the connection")
    }

    pub async fn expect_setup(&mut self) -> Setup {
        match self.next_message().await {
            ClientMessage::Setup(setup) => setup,
            other => panic!("expected setup, got {:?}", other),
        }
    }

    pub async fn send_json(&self, value: Value) {
        self.inbound
            .send(InboundFrame::Text(value.to_string()))
            .await
            .expect("client stopped reading");
    }

    pub async fn ack(&self) {
        self.send_json(json!({ "setupComplete": {} })).await;
    }

    pub async fn resumption_update(&self, handle: Option<&str>, resumable: bool) {
        self.send_json(json!({
            "sessionResumptionUpdate": { "newHandle": handle, "resumable": resumable }
        }))
        .await;
    }

    pub async fn turn_complete(&self) {
        self.send_json(json!({ "serverContent": { "turnComplete": true } }))
            .await;
    }

    pub async fn go_away(&self, time_left: &str) {
        self.send_json(json!({ "goAway": { "timeLeft": time_left } }))
            .await;
    }

    pub async fn close(&self, reason: &str) {
        let _ = self
            .inbound
            .send(InboundFrame::Closed {
                code: Some(1011),
                reason: reason.to_string(),
            })
            .await;
    }
}

/// Transport double; every `open` succeeds unless failures are queued
pub struct MockTransport {
    opens: AtomicUsize,
    fail_next: AtomicUsize,
    servers: mpsc::UnboundedSender<ServerSide>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            opens: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            servers,
        });
        (transport, rx)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Make the next `count` opens fail
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self) -> Result<TransportConnection, LiveError> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LiveError::Transport("connection refused".to_string()));
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let _ = self.servers.send(ServerSide {
            outbound: outbound_rx,
            inbound: inbound_tx,
        });

        Ok(TransportConnection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub fn test_settings() -> ClientSettings {
    ClientSettings {
        auto_reconnect: false,
        ..ClientSettings::default()
    }
}

pub fn client_with(settings: ClientSettings) -> (LiveSessionClient, Arc<MockTransport>, mpsc::UnboundedReceiver<ServerSide>) {
    let (transport, servers) = MockTransport::new();
    let client = LiveSessionClient::new(transport.clone(), settings);
    (client, transport, servers)
}

pub async fn next_server(servers: &mut mpsc::UnboundedReceiver<ServerSide>) -> ServerSide {
    tokio::time::timeout(Duration::from_secs(60), servers.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("transport dropped")
}

/// Wait for the first event matching `pred`
pub async fn wait_for<F>(events: &mut broadcast::Receiver<LiveEvent>, mut pred: F) -> LiveEvent
where
    F: FnMut(&LiveEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(e) => panic!("event stream ended: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll `check` until it holds
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

/// Connect `client` and acknowledge setup; returns the live server side and
/// the setup the client sent.
pub async fn connect_ready(
    client: &LiveSessionClient,
    servers: &mut mpsc::UnboundedReceiver<ServerSide>,
    token: Option<&str>,
) -> (ServerSide, Setup) {
    connect_ready_with(client, servers, token.map(ResumptionToken::fresh)).await
}

pub async fn connect_ready_with(
    client: &LiveSessionClient,
    servers: &mut mpsc::UnboundedReceiver<ServerSide>,
    resumption: Option<ResumptionToken>,
) -> (ServerSide, Setup) {
    let connecting = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .connect("gemini-live-2.5-flash-preview", &Default::default(), resumption)
                .await
        })
    };

    let mut server = next_server(servers).await;
    let setup = server.expect_setup().await;
    server.ack().await;

    let connected = connecting
        .await
        .expect("connect task panicked")
        .expect("connect failed");
    assert!(connected);
    (server, setup)
}
