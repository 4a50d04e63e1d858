//! Live session client: owns one transport connection at a time, runs the
//! setup handshake, demultiplexes inbound frames into [`LiveEvent`]s and
//! keeps the session alive across expiry and transport failures.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::budget::{
    estimate_chunk_tokens, estimate_content_tokens, estimate_part_tokens, estimate_text_tokens,
    ContextBudget, TurnRole, AUDIO_CHUNK_TOKENS,
};
use super::config::{ClientSettings, LiveConfig};
use super::error::{looks_like_session_error, LiveError};
use super::events::{ConnectionState, LiveEvent, UpdateKind};
use super::messages::{
    demux, ClientContent, ClientMessage, Content, FunctionResponse, MediaChunk, RealtimeInput,
    ServerMessage, Setup, ToolResponse,
};
use super::reconnect::RetryState;
use super::transport::{InboundFrame, Transport, TransportConnection};

/// Model and configuration of the last `connect`, reused on reconnect
#[derive(Debug, Clone)]
struct SessionTarget {
    model_id: String,
    config: LiveConfig,
}

/// Resumption handle together with the time the service issued it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumptionToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
}

impl ResumptionToken {
    pub fn new(token: impl Into<String>, issued_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            issued_at,
        }
    }

    /// A token issued just now
    pub fn fresh(token: impl Into<String>) -> Self {
        Self::new(token, Utc::now())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Initial,
    Reconnect,
}

type SetupAck = oneshot::Sender<Result<(), String>>;

struct Inner {
    state: ConnectionState,
    /// Bumped on every teardown; callbacks from older connections are ignored
    generation: u64,
    outbound: Option<mpsc::Sender<ClientMessage>>,
    cancel: Option<CancellationToken>,
    setup_ack: Option<SetupAck>,
    reader_task: Option<JoinHandle<()>>,
    expiry_task: Option<JoinHandle<()>>,
    expiry_deadline: Option<Instant>,
    reconnect_task: Option<JoinHandle<()>>,
    target: Option<SessionTarget>,
    resumption: Option<ResumptionToken>,
    budget: ContextBudget,
    retry: RetryState,
}

impl Inner {
    /// Release the current connection and its timers.
    fn teardown(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        for task in [self.reader_task.take(), self.expiry_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
        self.expiry_deadline = None;
        self.outbound = None;
        self.setup_ack = None;
    }

    fn includes_video(&self) -> bool {
        self.target
            .as_ref()
            .is_some_and(|t| t.config.includes_video())
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    settings: ClientSettings,
    events: broadcast::Sender<LiveEvent>,
    inner: Mutex<Inner>,
}

/// Client for one bidirectional live session.
///
/// Cloning is cheap; clones share the same connection.
#[derive(Clone)]
pub struct LiveSessionClient {
    shared: Arc<Shared>,
}

impl LiveSessionClient {
    pub fn new(transport: Arc<dyn Transport>, settings: ClientSettings) -> Self {
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));
        let inner = Inner {
            state: ConnectionState::Disconnected,
            generation: 0,
            outbound: None,
            cancel: None,
            setup_ack: None,
            reader_task: None,
            expiry_task: None,
            expiry_deadline: None,
            reconnect_task: None,
            target: None,
            resumption: None,
            budget: ContextBudget::new(settings.policy.default_context_tokens),
            retry: settings.retry_state(),
        };

        Self {
            shared: Arc::new(Shared {
                transport,
                settings,
                events,
                inner: Mutex::new(inner),
            }),
        }
    }

    /// Subscribe to demultiplexed events
    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.shared.settings
    }

    /// Snapshot of the context budget
    pub fn context_budget(&self) -> ContextBudget {
        self.shared.inner.lock().budget.clone()
    }

    /// Time left on the session-expiry countdown, if one is running
    pub fn session_time_remaining(&self) -> Option<Duration> {
        self.shared
            .inner
            .lock()
            .expiry_deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Last resumption handle seen on this client, if still within its max age
    pub fn resumption(&self) -> Option<ResumptionToken> {
        let inner = self.shared.inner.lock();
        self.shared.valid_resumption(&inner)
    }

    pub fn resumption_token(&self) -> Option<String> {
        self.resumption().map(|r| r.token)
    }

    /// Open a session.
    ///
    /// Returns `Ok(false)` without touching the transport unless the client is
    /// `Disconnected`. Resumption is always negotiated; without a token the
    /// service starts a fresh session. The token's issue time bounds how long
    /// automatic reconnects keep offering it.
    pub async fn connect(
        &self,
        model_id: &str,
        config: &LiveConfig,
        resumption: Option<ResumptionToken>,
    ) -> Result<bool, LiveError> {
        let token = resumption.as_ref().map(|r| r.token.clone());
        let generation = {
            let mut inner = self.shared.inner.lock();
            if inner.state != ConnectionState::Disconnected {
                debug!("Ignoring connect while {:?}", inner.state);
                return Ok(false);
            }
            inner.state = ConnectionState::Connecting;
            inner.generation += 1;
            inner.target = Some(SessionTarget {
                model_id: model_id.to_string(),
                config: config.clone(),
            });
            inner.resumption = resumption;
            inner.generation
        };

        info!(
            "Connecting to {} via {} (resuming: {})",
            model_id,
            self.shared.transport.name(),
            token.is_some()
        );

        self.shared
            .establish(generation, token, Attempt::Initial)
            .await?;
        Ok(true)
    }

    /// Close the session and cancel every pending wait and timer.
    ///
    /// Returns `false` if there was nothing to close.
    pub fn disconnect(&self) -> bool {
        let was = {
            let mut inner = self.shared.inner.lock();
            let was = inner.state;
            inner.generation += 1;
            inner.teardown();
            if let Some(task) = inner.reconnect_task.take() {
                task.abort();
            }
            inner.state = ConnectionState::Disconnected;
            was
        };

        if was == ConnectionState::Disconnected {
            return false;
        }

        info!("Disconnected (was {:?})", was);
        self.shared.emit(LiveEvent::Close {
            reason: "client disconnect".to_string(),
        });
        true
    }

    /// Send turn content. Dropped (returns `Ok(false)`) unless `Ready`.
    pub async fn send(&self, content: Content, turn_complete: bool) -> Result<bool, LiveError> {
        let outbound = {
            let mut inner = self.shared.inner.lock();
            if inner.state != ConnectionState::Ready {
                debug!("Dropping content while {:?}", inner.state);
                return Ok(false);
            }

            let role = match content.role.as_deref() {
                Some("model") => TurnRole::Model,
                _ => TurnRole::User,
            };
            inner.budget.record(role, estimate_content_tokens(&content));
            if turn_complete {
                inner.budget.close_turn();
            }
            inner.budget.compress();
            inner.outbound.clone()
        };

        let Some(outbound) = outbound else {
            return Ok(false);
        };

        let message = ClientMessage::ClientContent(ClientContent {
            turns: vec![content],
            turn_complete,
        });
        outbound
            .send(message)
            .await
            .map_err(|_| LiveError::Transport("connection closed".to_string()))?;
        Ok(true)
    }

    /// Send realtime audio/video frames.
    ///
    /// Frames are dropped, never queued, unless `Ready` or when the outbound
    /// queue is full.
    pub fn send_realtime_input(&self, chunks: Vec<MediaChunk>) -> bool {
        if chunks.is_empty() {
            return false;
        }

        let mut inner = self.shared.inner.lock();
        if inner.state != ConnectionState::Ready {
            return false;
        }
        let Some(outbound) = inner.outbound.clone() else {
            return false;
        };

        let message = ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: chunks.iter().map(MediaChunk::to_blob).collect(),
        });
        if let Err(e) = outbound.try_send(message) {
            debug!("Dropping realtime input: {}", e);
            return false;
        }

        let tokens = chunks.iter().map(estimate_chunk_tokens).sum();
        inner.budget.record(TurnRole::User, tokens);
        inner.budget.compress();
        true
    }

    /// Answer a tool call. Dropped (returns `Ok(false)`) unless `Ready`.
    pub async fn send_tool_response(
        &self,
        responses: Vec<FunctionResponse>,
    ) -> Result<bool, LiveError> {
        let outbound = {
            let inner = self.shared.inner.lock();
            if inner.state != ConnectionState::Ready {
                return Ok(false);
            }
            inner.outbound.clone()
        };
        let Some(outbound) = outbound else {
            return Ok(false);
        };

        outbound
            .send(ClientMessage::ToolResponse(ToolResponse {
                function_responses: responses,
            }))
            .await
            .map_err(|_| LiveError::Transport("connection closed".to_string()))?;
        Ok(true)
    }
}

impl Shared {
    fn emit(&self, event: LiveEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn valid_resumption(&self, inner: &Inner) -> Option<ResumptionToken> {
        let resumption = inner.resumption.as_ref()?;
        let max_age = self.settings.policy.handle_max_age(inner.includes_video());
        (Utc::now() - resumption.issued_at <= max_age).then(|| resumption.clone())
    }

    /// Open the transport, send setup and wait for the acknowledgment.
    async fn establish(
        self: &Arc<Self>,
        generation: u64,
        token: Option<String>,
        attempt: Attempt,
    ) -> Result<(), LiveError> {
        let (target, cancel) = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return Err(LiveError::Cancelled);
            }
            let target = inner.target.clone().ok_or(LiveError::Cancelled)?;

            // New session: start the budget over
            let max = self.settings.policy.max_context_tokens(&target.model_id);
            inner.budget.reset(max);
            if let Some(instruction) = &target.config.system_instruction {
                inner.budget.reserve_system(estimate_text_tokens(instruction));
            }

            let cancel = CancellationToken::new();
            inner.cancel = Some(cancel.clone());
            (target, cancel)
        };

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LiveError::Cancelled),
            result = self.transport.open() => result,
        };
        let TransportConnection { outbound, inbound } = match opened {
            Ok(connection) => connection,
            Err(e) => {
                self.fail_attempt(generation, attempt, &e);
                return Err(e);
            }
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return Err(LiveError::Cancelled);
            }
            inner.state = ConnectionState::Connected;
            inner.outbound = Some(outbound.clone());
            inner.setup_ack = Some(ack_tx);
            let shared = Arc::clone(self);
            inner.reader_task = Some(tokio::spawn(async move {
                shared.read_loop(generation, inbound).await;
            }));
        }
        self.emit(LiveEvent::Open);

        let setup = ClientMessage::Setup(Setup::new(&target.model_id, &target.config, token.clone()));
        if outbound.send(setup).await.is_err() {
            let e = LiveError::Transport("connection closed before setup".to_string());
            self.fail_attempt(generation, attempt, &e);
            return Err(e);
        }
        drop(outbound);

        let setup_timeout = self.settings.setup_timeout();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LiveError::Cancelled),
            result = tokio::time::timeout(setup_timeout, ack_rx) => result,
        };

        let error = match outcome {
            Ok(Ok(Ok(()))) => {
                info!("Session ready ({})", target.model_id);
                return Ok(());
            }
            Ok(Ok(Err(reason))) => {
                if token.is_some() && looks_like_session_error(&reason) {
                    LiveError::ResumptionRejected(reason)
                } else {
                    LiveError::Transport(reason)
                }
            }
            Ok(Err(_)) => LiveError::Transport("connection dropped before setup".to_string()),
            Err(_) => {
                // The acknowledgment may have landed right at the deadline
                if self.is_ready(generation) {
                    return Ok(());
                }
                warn!("Setup acknowledgment not received within {:?}", setup_timeout);
                LiveError::SetupTimeout(setup_timeout)
            }
        };

        self.fail_attempt(generation, attempt, &error);
        Err(error)
    }

    fn is_ready(&self, generation: u64) -> bool {
        let inner = self.inner.lock();
        inner.generation == generation && inner.state == ConnectionState::Ready
    }

    fn fail_attempt(&self, generation: u64, attempt: Attempt, error: &LiveError) {
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            inner.teardown();
            inner.state = match attempt {
                Attempt::Initial => ConnectionState::Disconnected,
                Attempt::Reconnect => ConnectionState::Reconnecting,
            };
        }
        warn!("Connection attempt failed: {}", error);
        self.emit(LiveEvent::Error {
            message: error.to_string(),
            terminal: false,
        });
    }

    async fn read_loop(self: Arc<Self>, generation: u64, mut inbound: mpsc::Receiver<InboundFrame>) {
        while let Some(frame) = inbound.recv().await {
            match frame {
                InboundFrame::Text(text) => {
                    let message = match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!("Ignoring malformed server frame: {}", e);
                            continue;
                        }
                    };
                    for event in demux(message) {
                        if !self.observe(generation, &event) {
                            return;
                        }
                        self.emit(event);
                    }
                }
                InboundFrame::Closed { code, reason } => {
                    self.handle_closed(generation, code, reason);
                    return;
                }
            }
        }
        self.handle_closed(generation, None, "transport channel closed".to_string());
    }

    /// Apply the client-side effects of an inbound event. Returns `false`
    /// once the connection is stale.
    fn observe(self: &Arc<Self>, generation: u64, event: &LiveEvent) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }

        match event {
            LiveEvent::SetupAcknowledged => {
                if inner.state == ConnectionState::Connected {
                    self.become_ready(&mut inner, generation);
                }
            }
            LiveEvent::Audio { .. } => {
                inner.budget.record(TurnRole::Model, AUDIO_CHUNK_TOKENS);
                inner.budget.compress();
            }
            LiveEvent::Content(part) => {
                inner.budget.record(TurnRole::Model, estimate_part_tokens(part));
                inner.budget.compress();
            }
            LiveEvent::TurnComplete | LiveEvent::Interrupted => inner.budget.close_turn(),
            LiveEvent::SessionResumptionUpdate(update) => match update.kind() {
                UpdateKind::Renewed(token) => {
                    debug!("Resumption handle renewed");
                    inner.resumption = Some(ResumptionToken::fresh(token));
                }
                UpdateKind::NotResumable => inner.resumption = None,
                UpdateKind::Ambiguous | UpdateKind::KeepCurrent => {}
            },
            LiveEvent::ForcedTermination { time_left, .. } => {
                let time_left = time_left.unwrap_or(Duration::ZERO);
                info!("Server going away in {:?}", time_left);
                self.arm_expiry(&mut inner, generation, time_left);
            }
            _ => {}
        }
        true
    }

    fn become_ready(self: &Arc<Self>, inner: &mut Inner, generation: u64) {
        inner.state = ConnectionState::Ready;
        inner.retry.reset();
        inner.cancel = None;
        let duration = self
            .settings
            .policy
            .max_session_duration(inner.includes_video());
        self.arm_expiry(inner, generation, duration);
        if let Some(ack) = inner.setup_ack.take() {
            let _ = ack.send(Ok(()));
        }
    }

    /// (Re)start the session-expiry countdown, replacing any running one.
    fn arm_expiry(self: &Arc<Self>, inner: &mut Inner, generation: u64, duration: Duration) {
        if let Some(task) = inner.expiry_task.take() {
            task.abort();
        }
        inner.expiry_deadline = Some(Instant::now() + duration);

        let lead = Duration::from_secs(self.settings.policy.timeout_warning_secs);
        let shared = Arc::clone(self);
        inner.expiry_task = Some(tokio::spawn(async move {
            let warn_in = duration.saturating_sub(lead);
            tokio::time::sleep(warn_in).await;
            shared.emit_if_current(
                generation,
                LiveEvent::SessionTimeoutWarning {
                    time_left: duration - warn_in,
                },
            );
            tokio::time::sleep(duration - warn_in).await;
            shared.handle_expiry(generation);
        }));
    }

    fn emit_if_current(&self, generation: u64, event: LiveEvent) {
        if self.inner.lock().generation == generation {
            self.emit(event);
        }
    }

    fn handle_expiry(self: &Arc<Self>, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.state != ConnectionState::Ready {
            return;
        }
        // This task is the expiry timer itself
        inner.expiry_task = None;
        inner.expiry_deadline = None;

        if self.settings.auto_reconnect {
            info!("Session expired, reconnecting");
            self.start_reconnect(&mut inner, "session expired");
        } else {
            warn!("Session expired and auto-reconnect is disabled");
            drop(inner);
            self.emit(LiveEvent::SessionTimeoutWarning {
                time_left: Duration::ZERO,
            });
        }
    }

    fn handle_closed(self: &Arc<Self>, generation: u64, code: Option<u16>, reason: String) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }

        // Still waiting for setup: the pending connect reports the failure
        if let Some(ack) = inner.setup_ack.take() {
            let _ = ack.send(Err(reason));
            return;
        }

        info!("Connection closed (code {:?}): {}", code, reason);
        self.emit(LiveEvent::Close {
            reason: reason.clone(),
        });

        if self.settings.auto_reconnect {
            self.start_reconnect(&mut inner, &reason);
        } else {
            inner.generation += 1;
            inner.teardown();
            inner.state = ConnectionState::Disconnected;
        }
    }

    fn start_reconnect(self: &Arc<Self>, inner: &mut Inner, reason: &str) {
        if inner.state == ConnectionState::Reconnecting {
            return;
        }
        info!("Starting reconnection: {}", reason);

        inner.generation += 1;
        let generation = inner.generation;
        inner.teardown();
        inner.state = ConnectionState::Reconnecting;

        let shared = Arc::clone(self);
        inner.reconnect_task = Some(tokio::spawn(async move {
            shared.reconnect_loop(generation).await;
        }));
    }

    async fn reconnect_loop(self: Arc<Self>, generation: u64) {
        loop {
            let (delay, attempt, token) = {
                let inner = self.inner.lock();
                if inner.generation != generation {
                    return;
                }
                if inner.retry.exhausted() {
                    drop(inner);
                    self.give_up(generation);
                    return;
                }
                let token = self.valid_resumption(&inner).map(|r| r.token);
                (inner.retry.delay(), inner.retry.attempts() + 1, token)
            };
            let resuming = token.is_some();

            info!(
                "Reconnect attempt {} in {:?} (resuming: {})",
                attempt, delay, resuming
            );
            self.emit(LiveEvent::Reconnecting {
                attempt,
                delay,
                resuming,
            });
            tokio::time::sleep(delay).await;

            match self.establish(generation, token, Attempt::Reconnect).await {
                Ok(()) => {
                    info!("Reconnected after {} attempt(s)", attempt);
                    self.emit(LiveEvent::Reconnected);
                    return;
                }
                Err(LiveError::Cancelled) => return,
                Err(e) => {
                    {
                        let mut inner = self.inner.lock();
                        if inner.generation != generation {
                            return;
                        }
                        inner.retry.record_failure();
                        if !(resuming && e.is_resumption_related()) {
                            continue;
                        }
                        inner.resumption = None;
                    }
                    warn!("Dropping resumption handle after: {}", e);
                    self.emit(LiveEvent::ResumptionRejected {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn give_up(&self, generation: u64) {
        let attempts = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            inner.teardown();
            inner.reconnect_task = None;
            inner.state = ConnectionState::Disconnected;
            inner.retry.attempts()
        };

        let error = LiveError::ReconnectExhausted(attempts);
        warn!("{}", error);
        self.emit(LiveEvent::Error {
            message: error.to_string(),
            terminal: true,
        });
    }
}
