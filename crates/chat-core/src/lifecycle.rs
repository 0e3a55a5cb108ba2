//! Connection lifecycle state machine.
//!
//! `SessionLifecycle` performs no I/O. Every input (command, transport
//! callback, action response, timer fire) returns the ordered list of
//! [`Effect`]s the runtime must carry out. Timer effects replace any pending
//! timer of the same kind, so at most one heartbeat and one reconnect timer
//! are ever outstanding.

use std::time::Duration;

use crate::{
    backoff::BackoffPolicy,
    error::{ChatError, is_token_expiry},
    heartbeat::{
        DEGRADED_RETRY_MS, HeartbeatMonitor, HeartbeatVerdict, UNCONFIRMED_CLOSE_RETRY_MS,
    },
    payload::{InboundPayload, parse_inbound},
    router::{Dispatch, MessageRouter},
    types::{
        Action, ActionOutcome, ChatEvent, ConnectionState, IssuedAction, Notice, ReadyState,
        SessionId, SessionTuning,
    },
    watermark::Watermark,
};

/// `get-token` body that asks the client to reload instead of connecting.
pub const RELOAD_SENTINEL: &str = "RELOAD";
/// Body of a healthy `ping` response.
pub const PING_OK: &str = "OK";

/// Instruction for the runtime driving the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Publish an event to the UI sink.
    Emit(ChatEvent),
    /// Perform an action request and feed the outcome back.
    Issue(IssuedAction),
    /// Open the push transport. Only emitted while no session is live.
    OpenTransport { session: SessionId, token: String },
    /// Force-close the given transport session.
    CloseTransport { session: SessionId },
    /// Cancel any pending heartbeat check and arm a new one.
    ScheduleHeartbeat(Duration),
    CancelHeartbeat,
    /// Cancel any pending reconnect and arm a new one.
    ScheduleReconnect(Duration),
    CancelReconnect,
    /// Cancel the pending heartbeat and run a check right away.
    CheckHeartbeatNow,
    /// Stop the runtime; the client must be restarted from scratch.
    Reload,
}

/// Reconnect bookkeeping shared by the close, error and open paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectState {
    /// A reconnect timer is pending; further closes are no-ops.
    pub reconnecting: bool,
    /// Failures since the last successful open; drives the backoff delay.
    pub consecutive_failures: u32,
    /// No open has succeeded yet; disconnect notices are suppressed.
    pub is_first_open: bool,
    /// A 401 cleared the token; the next handshake is a silent refresh.
    pub token_refresh_pending: bool,
    /// The handshake in progress was started by a token refresh.
    pub token_refreshed: bool,
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self {
            reconnecting: false,
            consecutive_failures: 0,
            is_first_open: true,
            token_refresh_pending: false,
            token_refreshed: false,
        }
    }
}

/// Whether the user is currently looking at the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attention {
    pub focused: bool,
    pub transcript_visible: bool,
}

impl Attention {
    fn is_watching(&self) -> bool {
        self.focused && self.transcript_visible
    }
}

impl Default for Attention {
    fn default() -> Self {
        Self {
            focused: false,
            transcript_visible: true,
        }
    }
}

/// Ladder and member the session was started for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub ladder_name: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Copy)]
struct TransportSlot {
    session: Option<SessionId>,
    state: ReadyState,
    /// Close handling already ran; later callbacks for the session are dropped.
    retired: bool,
}

impl TransportSlot {
    fn live_session(&self) -> Option<SessionId> {
        self.session.filter(|_| self.state.is_live())
    }
}

#[derive(Debug, Clone)]
pub struct SessionLifecycle {
    client_version: u32,
    backoff: BackoffPolicy,
    identity: Option<SessionIdentity>,
    state: ConnectionState,
    token: Option<String>,
    transport: TransportSlot,
    next_session: u64,
    next_request: u64,
    pending_token_request: Option<u64>,
    opened_at_request: u64,
    connection_attempt: u32,
    reconnect: ReconnectState,
    heartbeat: HeartbeatMonitor,
    sending_enabled: bool,
    last_ping_time: String,
    attention: Attention,
    router: MessageRouter,
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new(SessionTuning::default())
    }
}

impl SessionLifecycle {
    pub fn new(tuning: SessionTuning) -> Self {
        Self {
            client_version: tuning.client_version,
            backoff: tuning.backoff,
            identity: None,
            state: ConnectionState::Idle,
            token: None,
            transport: TransportSlot {
                session: None,
                state: ReadyState::Closed,
                retired: false,
            },
            next_session: 0,
            next_request: 0,
            pending_token_request: None,
            opened_at_request: 0,
            connection_attempt: 1,
            reconnect: ReconnectState::default(),
            heartbeat: HeartbeatMonitor::new(tuning.heartbeat),
            sending_enabled: false,
            last_ping_time: "0".to_owned(),
            attention: Attention::default(),
            router: MessageRouter::new(tuning.transcript_max_items),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn sending_enabled(&self) -> bool {
        self.sending_enabled
    }

    pub fn connection_attempt(&self) -> u32 {
        self.connection_attempt
    }

    pub fn reconnect_state(&self) -> ReconnectState {
        self.reconnect
    }

    pub fn live_session(&self) -> Option<SessionId> {
        self.transport.live_session()
    }

    pub fn watermark(&self) -> Watermark {
        self.router.watermark()
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Begin the session. Only valid once, from `Idle`.
    pub fn start(
        &mut self,
        ladder_name: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<Vec<Effect>, ChatError> {
        if self.state != ConnectionState::Idle {
            return Err(ChatError::invalid_state(self.state, "start"));
        }
        self.identity = Some(SessionIdentity {
            ladder_name: ladder_name.into(),
            user_id: user_id.into(),
        });
        Ok(self.request_token())
    }

    /// Fetch a fresh token and open the transport with it.
    ///
    /// This is the reconnect timer target; fires outside `ReconnectWait` are
    /// stale and ignored.
    pub fn request_token(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.identity.is_none()
            || !matches!(
                self.state,
                ConnectionState::Idle | ConnectionState::ReconnectWait
            )
        {
            return effects;
        }

        self.reconnect.reconnecting = false;
        effects.push(Effect::CancelHeartbeat);
        if self.token.is_some() {
            effects.push(Effect::Emit(ChatEvent::Notice(Notice::Reconnecting)));
        }
        self.reconnect.token_refreshed = std::mem::take(&mut self.reconnect.token_refresh_pending);
        self.transition(ConnectionState::TokenRequested, &mut effects);

        // watchdog for a token request or open that never completes
        self.heartbeat.check();
        self.heartbeat.reset();
        effects.push(Effect::ScheduleHeartbeat(self.heartbeat.next_delay()));

        let request_id = self.issue(
            Action::GetToken {
                version: self.client_version,
            },
            &mut effects,
        );
        self.pending_token_request = Some(request_id);
        effects
    }

    pub fn on_transport_opened(&mut self, session: SessionId) -> Vec<Effect> {
        let mut effects = Vec::new();
        if !self.is_current_session(session) || self.transport.state == ReadyState::Closed {
            return effects;
        }

        self.transport.state = ReadyState::Open;
        self.transition(ConnectionState::Connected, &mut effects);
        self.connection_attempt = 1;
        self.reconnect.consecutive_failures = 0;
        self.reconnect.reconnecting = false;
        effects.push(Effect::CancelReconnect);

        self.heartbeat.reset();
        self.heartbeat.mark_alive();
        effects.push(Effect::ScheduleHeartbeat(self.heartbeat.next_delay()));
        self.set_sending(true, &mut effects);

        if self.reconnect.is_first_open {
            self.reconnect.is_first_open = false;
            effects.push(Effect::Emit(ChatEvent::ChatRevealed));
        } else if !self.reconnect.token_refreshed {
            effects.push(Effect::Emit(ChatEvent::Notice(Notice::Reconnected)));
        }
        self.reconnect.token_refreshed = false;

        self.opened_at_request = self.next_request;
        let last_chat_msg = self.router.watermark().value();
        self.issue(Action::GetChatHistory { last_chat_msg }, &mut effects);
        effects
    }

    /// Handle one pushed message. Any traffic on the live session counts as liveness.
    pub fn on_transport_message(
        &mut self,
        session: SessionId,
        raw: &str,
    ) -> Result<Vec<Effect>, ChatError> {
        if !self.is_current_session(session) {
            return Ok(Vec::new());
        }
        self.heartbeat.mark_alive();
        let payload = parse_inbound(raw)?;
        Ok(self.route(payload))
    }

    pub fn on_transport_error(
        &mut self,
        session: SessionId,
        code: u16,
        description: &str,
        reported: ReadyState,
    ) -> Vec<Effect> {
        if !self.is_current_session(session) {
            return Vec::new();
        }
        self.handle_error(code, description, reported)
    }

    /// Close callback. Safe to call repeatedly for the same session.
    pub fn on_transport_closed(&mut self, session: SessionId, reported: ReadyState) -> Vec<Effect> {
        let mut effects = Vec::new();
        if !self.is_current_session(session) {
            return effects;
        }
        self.handle_closed(reported, &mut effects);
        effects
    }

    /// Feed back the result of an action issued through [`Effect::Issue`].
    ///
    /// `reported` is the current transport handle state (or `Closed` when
    /// there is no handle).
    pub fn on_action_response(
        &mut self,
        issued: &IssuedAction,
        outcome: ActionOutcome,
        reported: ReadyState,
    ) -> Result<Vec<Effect>, ChatError> {
        if self.state == ConnectionState::Reloading {
            return Ok(Vec::new());
        }

        if matches!(issued.action, Action::GetToken { .. }) {
            return Ok(self.on_token_response(issued.request_id, outcome, reported));
        }

        let stale = self.is_stale_request(issued.request_id);
        if !outcome.is_success() {
            // failures of requests made for an earlier connection must not
            // tear down the current one
            if stale {
                return Ok(Vec::new());
            }
            let mut effects = Vec::new();
            let description = match &issued.action {
                Action::GetChatHistory { .. } => "Error getting chat history",
                Action::Ping { .. } => "Error pinging chat server",
                Action::SendChat { text } => {
                    effects.push(Effect::Emit(ChatEvent::SendFailed { text: text.clone() }));
                    "Error sending chat message"
                }
                Action::GetLadderData => return Ok(effects),
                Action::GetToken { .. } => "Chat connection failed",
            };
            effects.extend(self.handle_error(outcome.status, description, reported));
            return Ok(effects);
        }

        match &issued.action {
            Action::GetChatHistory { .. } | Action::GetLadderData => {
                if outcome.body.trim().is_empty() {
                    return Ok(Vec::new());
                }
                let payload = parse_inbound(&outcome.body)?;
                Ok(self.route(payload))
            }
            Action::Ping { .. } if !stale && outcome.body.trim() != PING_OK => {
                Ok(vec![Effect::CheckHeartbeatNow])
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Heartbeat timer fired (or an immediate check was requested).
    pub fn on_heartbeat(&mut self, reported: ReadyState) -> Vec<Effect> {
        let mut effects = Vec::new();
        if matches!(
            self.state,
            ConnectionState::Idle | ConnectionState::ReconnectWait | ConnectionState::Reloading
        ) {
            return effects;
        }

        match self.heartbeat.check() {
            HeartbeatVerdict::Alive { restore_sending } => {
                if self.transport.state == ReadyState::Open {
                    if restore_sending {
                        self.transition(ConnectionState::Connected, &mut effects);
                        self.set_sending(true, &mut effects);
                    }
                    let last_ping_time = self.last_ping_time.clone();
                    self.issue(Action::Ping { last_ping_time }, &mut effects);
                }
            }
            HeartbeatVerdict::Stalled => {
                if reported.is_live() {
                    if !self.reconnect.is_first_open && self.token.is_some() {
                        effects.push(Effect::Emit(ChatEvent::Notice(Notice::Stalled)));
                    }
                    self.set_sending(false, &mut effects);
                    if let Some(session) = self.transport.session {
                        self.transport.state = ReadyState::Closed;
                        effects.push(Effect::CloseTransport { session });
                    }
                } else {
                    self.handle_closed(reported, &mut effects);
                }
            }
        }

        if !matches!(
            self.state,
            ConnectionState::ReconnectWait | ConnectionState::Reloading
        ) {
            effects.push(Effect::ScheduleHeartbeat(self.heartbeat.next_delay()));
        }
        effects
    }

    /// Send a chat line. No local echo; the server pushes it back.
    pub fn send_chat(&mut self, text: &str) -> Result<Vec<Effect>, ChatError> {
        let mut effects = Vec::new();
        if text.trim().is_empty() {
            return Ok(effects);
        }
        if self.state != ConnectionState::Connected || !self.sending_enabled {
            return Err(ChatError::invalid_state(self.state, "send_chat"));
        }
        self.issue(
            Action::SendChat {
                text: text.to_owned(),
            },
            &mut effects,
        );
        effects.push(Effect::ScheduleHeartbeat(self.heartbeat.base()));
        Ok(effects)
    }

    pub fn set_attention(&mut self, focused: bool, transcript_visible: bool) {
        self.attention = Attention {
            focused,
            transcript_visible,
        };
    }

    fn on_token_response(
        &mut self,
        request_id: u64,
        outcome: ActionOutcome,
        reported: ReadyState,
    ) -> Vec<Effect> {
        if self.pending_token_request != Some(request_id) {
            return Vec::new();
        }
        self.pending_token_request = None;

        if !outcome.is_success() {
            return self.handle_error(outcome.status, "Chat connection failed", reported);
        }

        let body = outcome.body.trim();
        if body == RELOAD_SENTINEL {
            return self.reload();
        }
        self.token = Some(body.to_owned());
        self.open_transport(body.to_owned())
    }

    fn open_transport(&mut self, token: String) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.transport.live_session().is_some() {
            effects.push(Effect::ScheduleHeartbeat(self.heartbeat.base()));
            return effects;
        }

        self.next_session += 1;
        let session = SessionId(self.next_session);
        self.transport = TransportSlot {
            session: Some(session),
            state: ReadyState::Connecting,
            retired: false,
        };
        self.transition(ConnectionState::Opening, &mut effects);
        effects.push(Effect::OpenTransport { session, token });
        self.heartbeat.reset();
        effects.push(Effect::ScheduleHeartbeat(self.heartbeat.next_delay()));
        effects
    }

    fn reload(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.set_sending(false, &mut effects);
        self.transition(ConnectionState::Reloading, &mut effects);
        effects.push(Effect::CancelHeartbeat);
        effects.push(Effect::CancelReconnect);
        if let Some(session) = self.transport.live_session() {
            self.transport.state = ReadyState::Closed;
            effects.push(Effect::CloseTransport { session });
        }
        effects.push(Effect::Emit(ChatEvent::ReloadRequested));
        effects.push(Effect::Reload);
        effects
    }

    fn handle_error(&mut self, code: u16, description: &str, reported: ReadyState) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.set_sending(false, &mut effects);

        if is_token_expiry(code) {
            self.token = None;
            self.reconnect.token_refresh_pending = true;
            if let Some(session) = self.transport.live_session() {
                self.transport.state = ReadyState::Closed;
                effects.push(Effect::CloseTransport { session });
            }
            self.handle_closed(ReadyState::Closed, &mut effects);
            return effects;
        }

        effects.push(Effect::Emit(ChatEvent::Notice(Notice::Error {
            code,
            description: description.to_owned(),
        })));

        if reported.is_live() {
            self.transition(ConnectionState::Errored, &mut effects);
            self.heartbeat.degrade();
            effects.push(Effect::ScheduleHeartbeat(Duration::from_millis(
                DEGRADED_RETRY_MS,
            )));
        } else {
            self.handle_closed(reported, &mut effects);
        }
        effects
    }

    fn handle_closed(&mut self, reported: ReadyState, effects: &mut Vec<Effect>) {
        self.set_sending(false, effects);

        if reported.is_live() {
            // the close did not take; check again shortly
            let retry = Duration::from_millis(UNCONFIRMED_CLOSE_RETRY_MS);
            self.heartbeat.set_interval(retry);
            effects.push(Effect::ScheduleHeartbeat(retry));
            return;
        }

        self.transport.state = ReadyState::Closed;
        self.transport.retired = true;
        if self.reconnect.reconnecting || self.state == ConnectionState::Reloading {
            return;
        }

        self.reconnect.reconnecting = true;
        self.pending_token_request = None;
        self.transition(ConnectionState::ReconnectWait, effects);

        let delay = self
            .backoff
            .delay_for_attempt(self.reconnect.consecutive_failures);
        self.reconnect.consecutive_failures = self.reconnect.consecutive_failures.saturating_add(1);
        self.connection_attempt = self.connection_attempt.saturating_add(1);

        if !self.reconnect.is_first_open && !self.reconnect.token_refresh_pending {
            effects.push(Effect::Emit(ChatEvent::Notice(Notice::Disconnected {
                retry_in_ms: delay.as_millis() as u64,
            })));
        }
        effects.push(Effect::CancelHeartbeat);
        effects.push(Effect::ScheduleReconnect(delay));
    }

    fn route(&mut self, payload: InboundPayload) -> Vec<Effect> {
        let mut effects = Vec::new();
        for step in self.router.route(payload) {
            match step {
                Dispatch::PingAck { stamp } => self.last_ping_time = stamp,
                Dispatch::ChatAppended { entries } => {
                    effects.push(Effect::Emit(ChatEvent::ChatAppended { entries }));
                    if !self.attention.is_watching() {
                        effects.push(Effect::Emit(ChatEvent::FlashHeader));
                    }
                }
                Dispatch::PresenceReplaced { participants } => {
                    effects.push(Effect::Emit(ChatEvent::PresenceReplaced { participants }));
                }
                Dispatch::LadderRefresh => {
                    self.issue(Action::GetLadderData, &mut effects);
                }
                Dispatch::PlayersHtml { html } => {
                    effects.push(Effect::Emit(ChatEvent::PlayersHtml { html }));
                }
                Dispatch::MatchHistoryHtml { html } => {
                    effects.push(Effect::Emit(ChatEvent::MatchHistoryHtml { html }));
                }
                Dispatch::HistoryRequested {
                    since,
                    refresh_ladder,
                } => {
                    self.issue(
                        Action::GetChatHistory {
                            last_chat_msg: since,
                        },
                        &mut effects,
                    );
                    if refresh_ladder {
                        self.issue(Action::GetLadderData, &mut effects);
                    }
                }
                Dispatch::PingRequested { stamp } => {
                    self.last_ping_time = stamp;
                    self.heartbeat.reset();
                    effects.push(Effect::CheckHeartbeatNow);
                }
            }
        }
        effects
    }

    fn issue(&mut self, action: Action, effects: &mut Vec<Effect>) -> u64 {
        self.next_request += 1;
        effects.push(Effect::Issue(IssuedAction {
            request_id: self.next_request,
            action,
        }));
        self.next_request
    }

    fn transition(&mut self, next: ConnectionState, effects: &mut Vec<Effect>) {
        if self.state != next {
            self.state = next;
            effects.push(Effect::Emit(ChatEvent::StateChanged { state: next }));
        }
    }

    fn set_sending(&mut self, enabled: bool, effects: &mut Vec<Effect>) {
        if self.sending_enabled != enabled {
            self.sending_enabled = enabled;
            effects.push(Effect::Emit(ChatEvent::SendingEnabled { enabled }));
        }
    }

    fn is_current_session(&self, session: SessionId) -> bool {
        self.state != ConnectionState::Reloading
            && !self.transport.retired
            && self.transport.session == Some(session)
    }

    /// Responses to requests made before the current open, or while no
    /// transport is up, belong to a connection that is already gone.
    fn is_stale_request(&self, request_id: u64) -> bool {
        request_id <= self.opened_at_request
            || !matches!(
                self.state,
                ConnectionState::Connected | ConnectionState::Errored
            )
    }
}
