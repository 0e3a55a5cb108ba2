//! Tokio runtime that drives the chat session lifecycle against a laddrs
//! server: action requests over HTTP, a push transport, and the heartbeat and
//! reconnect timers.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use chat_core::{
    ActionOutcome, ChatChannelError, ChatChannels, ChatCommand, ChatError, ChatEvent, ChatStatus,
    Effect, EventStream, IssuedAction, ReadyState, SessionId, SessionLifecycle, SessionTuning,
};
use chat_platform::{PushTransport, TransportEvent, TransportHandle, TransportSignal};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use url::Url;

pub mod action;
pub mod timer;

pub use action::ActionClient;
pub use timer::{TimerFired, TimerKind, TimerSlot};

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 512;

#[derive(Debug, Clone)]
pub struct LaddrsConfig {
    pub base_url: Url,
    pub tuning: SessionTuning,
    pub request_timeout: Duration,
}

impl LaddrsConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            tuning: SessionTuning::default(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LaddrsRuntimeHandle {
    channels: ChatChannels,
}

impl LaddrsRuntimeHandle {
    pub async fn send(&self, command: ChatCommand) -> Result<(), ChatChannelError> {
        self.channels.send_command(command).await
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    pub fn status(&self) -> ChatStatus {
        self.channels.status()
    }
}

/// Spawn the runtime task. It stops after a reload request or once every
/// handle is dropped.
pub fn spawn_runtime(
    config: LaddrsConfig,
    transport: Arc<dyn PushTransport>,
) -> LaddrsRuntimeHandle {
    let (channels, command_rx) = ChatChannels::new(COMMAND_BUFFER, EVENT_BUFFER);
    let runtime = LaddrsRuntime::new(config, transport, channels.clone(), command_rx);
    tokio::spawn(async move {
        runtime.run().await;
    });

    LaddrsRuntimeHandle { channels }
}

struct LaddrsRuntime {
    config: LaddrsConfig,
    channels: ChatChannels,
    command_rx: mpsc::Receiver<ChatCommand>,
    lifecycle: SessionLifecycle,
    transport: Arc<dyn PushTransport>,
    handle: Option<Box<dyn TransportHandle>>,
    actions: Option<Arc<ActionClient>>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    completed_tx: mpsc::UnboundedSender<(IssuedAction, ActionOutcome)>,
    completed_rx: mpsc::UnboundedReceiver<(IssuedAction, ActionOutcome)>,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    heartbeat: TimerSlot,
    reconnect: TimerSlot,
    stopped: bool,
}

impl LaddrsRuntime {
    fn new(
        config: LaddrsConfig,
        transport: Arc<dyn PushTransport>,
        channels: ChatChannels,
        command_rx: mpsc::Receiver<ChatCommand>,
    ) -> Self {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        Self {
            lifecycle: SessionLifecycle::new(config.tuning.clone()),
            config,
            channels,
            command_rx,
            transport,
            handle: None,
            actions: None,
            transport_tx,
            transport_rx,
            completed_tx,
            completed_rx,
            timer_rx,
            heartbeat: TimerSlot::new(TimerKind::Heartbeat, timer_tx.clone()),
            reconnect: TimerSlot::new(TimerKind::Reconnect, timer_tx),
            stopped: false,
        }
    }

    async fn run(mut self) {
        while !self.stopped {
            let effects = tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = self.transport_rx.recv() => self.handle_transport_event(event),
                Some((issued, outcome)) = self.completed_rx.recv() => {
                    self.handle_action_completed(issued, outcome)
                }
                Some(fired) = self.timer_rx.recv() => self.handle_timer(fired),
            };
            self.apply(effects);
        }

        self.heartbeat.cancel();
        self.reconnect.cancel();
        if let Some(handle) = self.handle.take() {
            handle.close();
        }
        debug!(state = ?self.lifecycle.state(), "chat runtime stopped");
    }

    fn handle_command(&mut self, command: ChatCommand) -> Vec<Effect> {
        match command {
            ChatCommand::Start {
                ladder_name,
                user_id,
            } => {
                debug!(ladder = %ladder_name, "start requested");
                self.handle_start(ladder_name, user_id)
                    .unwrap_or_else(|err| self.reject(err))
            }
            ChatCommand::SendChat { text } => {
                debug!(chars = text.chars().count(), "send chat requested");
                self.lifecycle
                    .send_chat(&text)
                    .unwrap_or_else(|err| self.reject(err))
            }
            ChatCommand::SetAttention {
                focused,
                transcript_visible,
            } => {
                trace!(focused, transcript_visible, "attention changed");
                self.lifecycle.set_attention(focused, transcript_visible);
                Vec::new()
            }
        }
    }

    fn handle_start(
        &mut self,
        ladder_name: String,
        user_id: String,
    ) -> Result<Vec<Effect>, ChatError> {
        let actions = ActionClient::new(
            self.config.base_url.clone(),
            ladder_name.clone(),
            user_id.clone(),
            self.config.request_timeout,
        )?;
        let effects = self.lifecycle.start(ladder_name, user_id)?;
        self.actions = Some(Arc::new(actions));
        Ok(effects)
    }

    fn handle_transport_event(&mut self, event: TransportEvent) -> Vec<Effect> {
        let session = event.session;
        let reported = self.reported_state();
        match event.signal {
            TransportSignal::Opened => {
                info!(%session, "push transport open");
                self.lifecycle.on_transport_opened(session)
            }
            TransportSignal::Message(raw) => {
                trace!(%session, bytes = raw.len(), "push message");
                self.lifecycle
                    .on_transport_message(session, &raw)
                    .unwrap_or_else(|err| {
                        warn!(
                            %session,
                            category = ?err.category,
                            code = %err.code,
                            error = %err.message,
                            "dropping undecodable push message"
                        );
                        Vec::new()
                    })
            }
            TransportSignal::Error { code, description } => {
                warn!(%session, code, %description, "push transport error");
                self.lifecycle
                    .on_transport_error(session, code, &description, reported)
            }
            TransportSignal::Closed => {
                info!(%session, "push transport closed");
                self.lifecycle.on_transport_closed(session, reported)
            }
        }
    }

    fn handle_action_completed(
        &mut self,
        issued: IssuedAction,
        outcome: ActionOutcome,
    ) -> Vec<Effect> {
        if outcome.is_success() {
            debug!(
                action = issued.action.name(),
                request_id = issued.request_id,
                "action response"
            );
        } else {
            let err = ChatError::from_status(outcome.status, issued.action.name());
            warn!(
                action = issued.action.name(),
                request_id = issued.request_id,
                status = outcome.status,
                category = ?err.category,
                "action failed"
            );
        }
        let reported = self.reported_state();
        self.lifecycle
            .on_action_response(&issued, outcome, reported)
            .unwrap_or_else(|err| {
                warn!(
                    action = issued.action.name(),
                    code = %err.code,
                    error = %err.message,
                    "dropping undecodable action response"
                );
                Vec::new()
            })
    }

    fn handle_timer(&mut self, fired: TimerFired) -> Vec<Effect> {
        let slot = match fired.kind {
            TimerKind::Heartbeat => &mut self.heartbeat,
            TimerKind::Reconnect => &mut self.reconnect,
        };
        if !slot.accept(fired) {
            trace!(kind = ?fired.kind, generation = fired.generation, "stale timer fire");
            return Vec::new();
        }

        match fired.kind {
            TimerKind::Heartbeat => {
                let reported = self.reported_state();
                self.lifecycle.on_heartbeat(reported)
            }
            TimerKind::Reconnect => {
                info!(
                    attempt = self.lifecycle.connection_attempt(),
                    "reconnecting chat"
                );
                self.lifecycle.request_token()
            }
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        let mut queue = VecDeque::from(effects);
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Emit(event) => {
                    trace!(?event, "chat event");
                    self.channels.emit(event);
                }
                Effect::Issue(issued) => self.perform(issued),
                Effect::OpenTransport { session, token } => {
                    let follow_up = self.open_transport(session, &token);
                    queue.extend(follow_up);
                }
                Effect::CloseTransport { session } => {
                    match self.handle.as_ref().filter(|handle| handle.session() == session) {
                        Some(handle) => {
                            debug!(%session, "closing push transport");
                            handle.close();
                        }
                        None => trace!(%session, "close for unknown transport session"),
                    }
                }
                Effect::ScheduleHeartbeat(delay) => self.heartbeat.schedule(delay),
                Effect::CancelHeartbeat => self.heartbeat.cancel(),
                Effect::ScheduleReconnect(delay) => {
                    info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                    self.reconnect.schedule(delay);
                }
                Effect::CancelReconnect => self.reconnect.cancel(),
                Effect::CheckHeartbeatNow => {
                    self.heartbeat.cancel();
                    let reported = self.reported_state();
                    let checked = self.lifecycle.on_heartbeat(reported);
                    for effect in checked.into_iter().rev() {
                        queue.push_front(effect);
                    }
                }
                Effect::Reload => {
                    info!("server requested a client reload");
                    self.stopped = true;
                }
            }
        }
    }

    fn perform(&self, issued: IssuedAction) {
        let Some(actions) = self.actions.clone() else {
            warn!(action = issued.action.name(), "action issued before start");
            return;
        };
        let completed_tx = self.completed_tx.clone();
        trace!(
            action = issued.action.name(),
            request_id = issued.request_id,
            "issuing action"
        );
        tokio::spawn(async move {
            let outcome = actions.perform(&issued.action).await;
            let _ = completed_tx.send((issued, outcome));
        });
    }

    fn open_transport(&mut self, session: SessionId, token: &str) -> Vec<Effect> {
        match self.transport.open(session, token, self.transport_tx.clone()) {
            Ok(handle) => {
                debug!(%session, "opening push transport");
                self.handle = Some(handle);
                Vec::new()
            }
            Err(err) => {
                warn!(%session, error = %err, "push transport failed to open");
                self.handle = None;
                self.lifecycle
                    .on_transport_error(session, 0, &err.to_string(), ReadyState::Closed)
            }
        }
    }

    fn reported_state(&self) -> ReadyState {
        self.handle
            .as_ref()
            .map_or(ReadyState::Closed, |handle| handle.ready_state())
    }

    fn reject(&self, err: ChatError) -> Vec<Effect> {
        warn!(code = %err.code, error = %err.message, "command rejected");
        vec![Effect::Emit(ChatEvent::CommandRejected {
            code: err.code,
            message: err.message,
        })]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::{ConnectionState, Notice};
    use chat_platform::{InMemoryPushTransport, InMemorySession};
    use tokio::time::timeout;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, method, path},
    };

    async fn mock_action(server: &MockServer, action: &str, status: u16, body: &str) {
        Mock::given(method("POST"))
            .and(path(format!("/channel/ladder-one/{action}")))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(server)
            .await;
    }

    fn spawn(server: &MockServer, transport: &InMemoryPushTransport) -> LaddrsRuntimeHandle {
        let config = LaddrsConfig::new(Url::parse(&server.uri()).expect("mock server uri"));
        spawn_runtime(config, Arc::new(transport.clone()))
    }

    async fn start(handle: &LaddrsRuntimeHandle) {
        handle
            .send(ChatCommand::Start {
                ladder_name: "ladder-one".into(),
                user_id: "u1".into(),
            })
            .await
            .expect("command should enqueue");
    }

    async fn next_matching(
        events: &mut EventStream,
        mut wanted: impl FnMut(&ChatEvent) -> bool,
    ) -> ChatEvent {
        timeout(Duration::from_secs(3), async {
            loop {
                let event = events.recv().await.expect("event receive");
                if wanted(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event timeout")
    }

    async fn wait_for_session(transport: &InMemoryPushTransport) -> InMemorySession {
        timeout(Duration::from_secs(3), async {
            loop {
                if let Some(session) = transport.latest() {
                    return session;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("transport should be opened")
    }

    #[tokio::test]
    async fn rejects_send_before_start() {
        let server = MockServer::start().await;
        let handle = spawn(&server, &InMemoryPushTransport::default());
        let mut events = handle.subscribe();

        handle
            .send(ChatCommand::SendChat {
                text: "hello".into(),
            })
            .await
            .expect("command should enqueue");

        let event = next_matching(&mut events, |_| true).await;
        match event {
            ChatEvent::CommandRejected { code, .. } => {
                assert_eq!(code, "invalid_state_transition")
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fresh_start_reveals_chat() {
        let server = MockServer::start().await;
        mock_action(&server, "get-token", 200, "tok1").await;
        mock_action(&server, "get-chat-history", 200, "").await;
        let transport = InMemoryPushTransport::default();
        let handle = spawn(&server, &transport);
        let mut events = handle.subscribe();

        start(&handle).await;
        let session = wait_for_session(&transport).await;
        assert_eq!(session.token(), "tok1");

        session.open();
        next_matching(&mut events, |event| matches!(event, ChatEvent::ChatRevealed)).await;
        next_matching(&mut events, |event| {
            matches!(event, ChatEvent::SendingEnabled { enabled: true })
        })
        .await;
        assert_eq!(transport.open_count(), 1);
        assert_eq!(
            handle.status(),
            ChatStatus {
                state: ConnectionState::Connected,
                sending_enabled: true,
            }
        );
    }

    #[tokio::test]
    async fn pushed_chat_reaches_subscribers_and_send_posts_form() {
        let server = MockServer::start().await;
        mock_action(&server, "get-token", 200, "tok1").await;
        mock_action(&server, "get-chat-history", 200, "").await;
        Mock::given(method("POST"))
            .and(path("/channel/ladder-one/send-chat"))
            .and(body_string_contains("m=hello"))
            .and(body_string_contains("user_id=u1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let transport = InMemoryPushTransport::default();
        let handle = spawn(&server, &transport);
        let mut events = handle.subscribe();

        start(&handle).await;
        let session = wait_for_session(&transport).await;
        session.open();
        next_matching(&mut events, |event| matches!(event, ChatEvent::ChatRevealed)).await;

        session.push(r#"{"chat":[{"t":100,"n":"A","m":"hi"}]}"#);
        let appended = next_matching(&mut events, |event| {
            matches!(event, ChatEvent::ChatAppended { .. })
        })
        .await;
        let ChatEvent::ChatAppended { entries } = appended else {
            unreachable!("filtered above");
        };
        assert_eq!(entries[0].name, "A");

        handle
            .send(ChatCommand::SendChat {
                text: "hello".into(),
            })
            .await
            .expect("command should enqueue");

        timeout(Duration::from_secs(3), async {
            loop {
                let sent = server
                    .received_requests()
                    .await
                    .unwrap_or_default()
                    .iter()
                    .any(|request| request.url.path().ends_with("/send-chat"));
                if sent {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("send-chat should be posted");
    }

    #[tokio::test]
    async fn reload_sentinel_stops_without_opening() {
        let server = MockServer::start().await;
        mock_action(&server, "get-token", 200, "RELOAD").await;
        let transport = InMemoryPushTransport::default();
        let handle = spawn(&server, &transport);
        let mut events = handle.subscribe();

        start(&handle).await;
        next_matching(&mut events, |event| matches!(event, ChatEvent::ReloadRequested)).await;
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test]
    async fn failed_token_fetch_waits_to_reconnect() {
        let server = MockServer::start().await;
        mock_action(&server, "get-token", 503, "").await;
        let transport = InMemoryPushTransport::default();
        let handle = spawn(&server, &transport);
        let mut events = handle.subscribe();

        start(&handle).await;
        let notice = next_matching(&mut events, |event| matches!(event, ChatEvent::Notice(_))).await;
        assert_eq!(
            notice,
            ChatEvent::Notice(Notice::Error {
                code: 503,
                description: "Chat connection failed".into()
            })
        );
        next_matching(&mut events, |event| {
            matches!(
                event,
                ChatEvent::StateChanged {
                    state: ConnectionState::ReconnectWait
                }
            )
        })
        .await;
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test]
    async fn server_drop_schedules_reconnect_notice() {
        let server = MockServer::start().await;
        mock_action(&server, "get-token", 200, "tok1").await;
        mock_action(&server, "get-chat-history", 200, "").await;
        let transport = InMemoryPushTransport::default();
        let handle = spawn(&server, &transport);
        let mut events = handle.subscribe();

        start(&handle).await;
        let session = wait_for_session(&transport).await;
        session.open();
        next_matching(&mut events, |event| matches!(event, ChatEvent::ChatRevealed)).await;

        session.drop_connection();
        let notice = next_matching(&mut events, |event| matches!(event, ChatEvent::Notice(_))).await;
        assert_eq!(
            notice,
            ChatEvent::Notice(Notice::Disconnected { retry_in_ms: 5_000 })
        );
        assert_eq!(transport.live_count(), 0);
    }
}
