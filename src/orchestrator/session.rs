use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::OrchestratorError;
use crate::handles::HandleStore;
use crate::live::{
    ConnectionState, Content, LiveConfig, LiveEvent, LiveSessionClient, ResumptionToken,
    ResumptionUpdate, UpdateKind,
};

/// What the orchestrator negotiates for every conversation
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Model identifier, e.g. "gemini-live-2.5-flash-preview"
    pub model_id: String,

    /// Negotiated session configuration
    pub live_config: LiveConfig,

    /// How long a conversation switch waits for an in-flight handle update
    pub switch_wait: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            model_id: "gemini-live-2.5-flash-preview".to_string(),
            live_config: LiveConfig::default(),
            switch_wait: Duration::from_secs(3),
        }
    }
}

/// Which conversation events belong to
#[derive(Debug, Default)]
struct Activity {
    /// Conversation bound to the current session
    active: Option<String>,

    /// Conversation being connected; set before the handle lookup so early
    /// resumption updates are attributed correctly
    becoming_active: Option<String>,

    /// Conversation currently being resumed, by `connect_with_resumption`
    /// or by the client's own reconnect
    resuming: Option<String>,
}

impl Activity {
    fn target(&self) -> Option<String> {
        self.becoming_active.clone().or_else(|| self.active.clone())
    }

    fn is_current(&self, conversation_id: &str) -> bool {
        self.becoming_active.as_deref() == Some(conversation_id)
            || self.active.as_deref() == Some(conversation_id)
    }
}

/// Binds conversations to the live client's lifecycle
pub struct SessionOrchestrator {
    client: LiveSessionClient,
    handles: Arc<HandleStore>,
    settings: OrchestratorSettings,
    activity: Arc<Mutex<Activity>>,
    /// Bumped after every handle write
    stored: Arc<watch::Sender<u64>>,
    connect_lock: tokio::sync::Mutex<()>,
    pump_task: JoinHandle<()>,
}

impl SessionOrchestrator {
    pub fn new(
        client: LiveSessionClient,
        handles: Arc<HandleStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        let activity = Arc::new(Mutex::new(Activity::default()));
        let (stored, _) = watch::channel(0u64);
        let stored = Arc::new(stored);

        let pump = UpdatePump {
            handles: Arc::clone(&handles),
            activity: Arc::clone(&activity),
            stored: Arc::clone(&stored),
            video: settings.live_config.includes_video(),
        };
        let events = client.subscribe();
        let pump_task = tokio::spawn(pump.run(events));

        Self {
            client,
            handles,
            settings,
            activity,
            stored,
            connect_lock: tokio::sync::Mutex::new(()),
            pump_task,
        }
    }

    pub fn client(&self) -> &LiveSessionClient {
        &self.client
    }

    pub fn handles(&self) -> &Arc<HandleStore> {
        &self.handles
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.client.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }

    pub fn active_conversation(&self) -> Option<String> {
        self.activity.lock().active.clone()
    }

    /// Connect the client for `conversation_id`, resuming its stored session
    /// when possible.
    ///
    /// Returns `Ok(false)` without side effects while another connection
    /// attempt is in flight or the client is already connected.
    pub async fn connect_with_resumption(&self, conversation_id: &str) -> Result<bool, OrchestratorError> {
        let Ok(_guard) = self.connect_lock.try_lock() else {
            debug!("Connect for {} ignored: another attempt in flight", conversation_id);
            return Ok(false);
        };
        self.connect_locked(conversation_id).await
    }

    /// Move the session to `conversation_id`, giving the current
    /// conversation a moment to receive its latest resumption handle.
    pub async fn switch_conversation(&self, conversation_id: &str) -> Result<bool, OrchestratorError> {
        let Ok(_guard) = self.connect_lock.try_lock() else {
            debug!("Switch to {} ignored: another attempt in flight", conversation_id);
            return Ok(false);
        };

        let state = self.client.state();
        if state.is_pending() {
            return Ok(false);
        }

        let current = self.activity.lock().active.clone();
        if current.as_deref() == Some(conversation_id) && state == ConnectionState::Ready {
            return Ok(true);
        }

        if let Some(previous) = current {
            if matches!(state, ConnectionState::Connected | ConnectionState::Ready) {
                self.wait_for_handle_update().await;
            }
            self.client.disconnect();
            self.release();
            info!("Switched away from conversation {}", previous);
        }

        self.connect_locked(conversation_id).await
    }

    /// Disconnect the active conversation. Its handle is kept for later.
    pub fn disconnect(&self) -> bool {
        let closed = self.client.disconnect();
        self.release();
        closed
    }

    /// Drop everything the session layer holds for a conversation.
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), OrchestratorError> {
        if self.activity.lock().is_current(conversation_id) {
            self.disconnect();
        }
        self.handles.clear_handle(conversation_id).await?;
        info!("Cleared session state for conversation {}", conversation_id);
        Ok(())
    }

    /// Send one complete user text turn
    pub async fn send_text(&self, text: &str) -> Result<bool, OrchestratorError> {
        Ok(self.client.send(Content::user_text(text), true).await?)
    }

    async fn connect_locked(&self, conversation_id: &str) -> Result<bool, OrchestratorError> {
        if self.client.state() != ConnectionState::Disconnected {
            debug!(
                "Connect for {} ignored in state {:?}",
                conversation_id,
                self.client.state()
            );
            return Ok(false);
        }

        {
            let mut activity = self.activity.lock();
            activity.becoming_active = Some(conversation_id.to_string());
        }

        let handle = match self.handles.valid_handle(conversation_id).await {
            Ok(handle) => handle,
            Err(e) => {
                self.abandon(conversation_id);
                return Err(e.into());
            }
        };
        let resumption =
            handle.and_then(|h| Some(ResumptionToken::new(h.token?, h.issued_at?)));
        if resumption.is_some() {
            self.activity.lock().resuming = Some(conversation_id.to_string());
        }

        let model_id = &self.settings.model_id;
        let config = &self.settings.live_config;
        info!(
            "Connecting conversation {} ({})",
            conversation_id,
            if resumption.is_some() { "resuming" } else { "fresh session" }
        );

        let resuming = resumption.is_some();
        let result = match self.client.connect(model_id, config, resumption).await {
            Err(e) if resuming && e.is_resumption_related() => {
                warn!(
                    "Resuming conversation {} failed ({}), starting a fresh session",
                    conversation_id, e
                );
                self.activity.lock().resuming = None;
                if let Err(e) = self.handles.clear_handle(conversation_id).await {
                    self.abandon(conversation_id);
                    return Err(e.into());
                }
                self.client.connect(model_id, config, None).await
            }
            other => other,
        };

        match result {
            Ok(true) => {
                let mut activity = self.activity.lock();
                activity.active = Some(conversation_id.to_string());
                activity.becoming_active = None;
                info!("Conversation {} is live", conversation_id);
                Ok(true)
            }
            Ok(false) => {
                self.abandon(conversation_id);
                Ok(false)
            }
            Err(e) => {
                self.abandon(conversation_id);
                Err(e.into())
            }
        }
    }

    /// Wait (bounded) for the next handle write for the active conversation.
    async fn wait_for_handle_update(&self) {
        // Only writes after this point count
        let mut stored = self.stored.subscribe();
        if tokio::time::timeout(self.settings.switch_wait, stored.changed())
            .await
            .is_err()
        {
            warn!(
                "No resumption handle arrived within {:?}, switching anyway",
                self.settings.switch_wait
            );
        }
    }

    fn abandon(&self, conversation_id: &str) {
        let mut activity = self.activity.lock();
        if activity.becoming_active.as_deref() == Some(conversation_id) {
            activity.becoming_active = None;
        }
        if activity.resuming.as_deref() == Some(conversation_id) {
            activity.resuming = None;
        }
    }

    fn release(&self) {
        let mut activity = self.activity.lock();
        activity.active = None;
        activity.becoming_active = None;
        activity.resuming = None;
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        self.pump_task.abort();
    }
}

/// Writes resumption updates from the client back to the handle store
struct UpdatePump {
    handles: Arc<HandleStore>,
    activity: Arc<Mutex<Activity>>,
    stored: Arc<watch::Sender<u64>>,
    video: bool,
}

impl UpdatePump {
    async fn run(self, mut events: broadcast::Receiver<LiveEvent>) {
        loop {
            match events.recv().await {
                Ok(LiveEvent::SessionResumptionUpdate(update)) => self.apply(update).await,
                // A full turn has passed: the resumption phase is over
                Ok(LiveEvent::TurnComplete) => self.activity.lock().resuming = None,
                Ok(LiveEvent::Reconnecting { resuming, .. }) => {
                    let mut activity = self.activity.lock();
                    let active = activity.active.clone();
                    activity.resuming = active.filter(|_| resuming);
                }
                Ok(LiveEvent::ResumptionRejected { reason }) => self.rejected(&reason).await,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Session event pump lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Session event pump stopped");
    }

    async fn apply(&self, update: ResumptionUpdate) {
        let (target, resuming) = {
            let activity = self.activity.lock();
            (activity.target(), activity.resuming.clone())
        };
        let Some(conversation_id) = target else {
            debug!("Resumption update with no active conversation");
            return;
        };

        match update.kind() {
            UpdateKind::Renewed(token) => {
                if let Err(e) = self.handles.store_handle(&conversation_id, &token, self.video).await {
                    error!("Lost resumption handle for {}: {}", conversation_id, e);
                    return;
                }
                {
                    let mut activity = self.activity.lock();
                    if activity.resuming.as_deref() == Some(conversation_id.as_str()) {
                        activity.resuming = None;
                    }
                }
                self.stored.send_modify(|n| *n += 1);
            }
            UpdateKind::KeepCurrent => {}
            UpdateKind::Ambiguous if resuming.as_deref() == Some(conversation_id.as_str()) => {
                debug!(
                    "Ignoring non-resumable update without handle while resuming {}",
                    conversation_id
                );
            }
            UpdateKind::Ambiguous | UpdateKind::NotResumable => {
                info!("Session for {} is no longer resumable", conversation_id);
                if let Err(e) = self.handles.clear_handle(&conversation_id).await {
                    error!("Failed to clear handle for {}: {}", conversation_id, e);
                }
            }
        }
    }

    /// The client's reconnect offered the stored handle and it was refused.
    async fn rejected(&self, reason: &str) {
        let target = {
            let mut activity = self.activity.lock();
            activity.resuming = None;
            activity.target()
        };
        let Some(conversation_id) = target else {
            return;
        };

        warn!(
            "Stored handle for {} refused on reconnect ({}), clearing it",
            conversation_id, reason
        );
        if let Err(e) = self.handles.clear_handle(&conversation_id).await {
            error!("Failed to clear handle for {}: {}", conversation_id, e);
        }
    }
}
