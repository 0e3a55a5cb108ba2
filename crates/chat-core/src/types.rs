use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{backoff::BackoffPolicy, heartbeat::HeartbeatPolicy};

/// Lifecycle state of the chat session reported to the UI sink.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    /// `start` has not been called yet.
    Idle,
    /// A `get-token` request is in flight.
    TokenRequested,
    /// The push transport was asked to open with a fresh token.
    Opening,
    /// The push transport is open and chat can be sent.
    Connected,
    /// A non-fatal error left the transport degraded but not closed.
    Errored,
    /// The transport closed; a reconnect timer is pending.
    ReconnectWait,
    /// The server asked for a full client reload. Terminal.
    Reloading,
}

/// Transport readiness as reported by the push transport handle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closed,
}

impl ReadyState {
    /// `true` for the states in which a handle still counts as live.
    pub fn is_live(self) -> bool {
        matches!(self, ReadyState::Connecting | ReadyState::Open)
    }
}

/// Identifier of one transport session opened by the lifecycle manager.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Content of a single chat record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChatBody {
    /// Regular participant message (`m`).
    Message(String),
    /// System line attributed to the participant, e.g. "joined" (`s`).
    System(String),
}

/// Chat record as delivered by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRecord {
    /// Unix seconds.
    pub timestamp: i64,
    /// Participant name.
    pub name: String,
    /// `None` when the record carried neither `m` nor `s`.
    pub body: Option<ChatBody>,
}

/// Chat line ready for rendering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub timestamp: i64,
    pub name: String,
    pub body: ChatBody,
    pub color: String,
}

/// Online participant with its display color.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub name: String,
    pub color: String,
}

/// System notices shown inline in the transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Notice {
    Reconnecting,
    Reconnected,
    Disconnected { retry_in_ms: u64 },
    Stalled,
    Error { code: u16, description: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Reconnecting => f.write_str("Reconnecting..."),
            Notice::Reconnected => f.write_str("Chat reconnected."),
            Notice::Disconnected { retry_in_ms } => write!(
                f,
                "Chat disconnected. Will retry in {} seconds.",
                retry_in_ms / 1_000
            ),
            Notice::Stalled => f.write_str("Chat stalled."),
            Notice::Error { code, description } => {
                write!(f, "Error occured: {code} {description}")
            }
        }
    }
}

/// Named server actions reachable through the action endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Action {
    GetToken { version: u32 },
    GetChatHistory { last_chat_msg: i64 },
    SendChat { text: String },
    Ping { last_ping_time: String },
    GetLadderData,
}

impl Action {
    /// Path segment used in `/channel/{ladder}/{action}`.
    pub fn name(&self) -> &'static str {
        match self {
            Action::GetToken { .. } => "get-token",
            Action::GetChatHistory { .. } => "get-chat-history",
            Action::SendChat { .. } => "send-chat",
            Action::Ping { .. } => "ping",
            Action::GetLadderData => "get-ladder-data",
        }
    }

    /// Form parameters, excluding `user_id` which the client always adds.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        match self {
            Action::GetToken { version } => vec![("version", version.to_string())],
            Action::GetChatHistory { last_chat_msg } => {
                vec![("last_chat_msg", last_chat_msg.to_string())]
            }
            Action::SendChat { text } => vec![("m", text.clone())],
            Action::Ping { last_ping_time } => vec![("lpt", last_ping_time.clone())],
            Action::GetLadderData => Vec::new(),
        }
    }
}

/// An action together with the request sequence number it was issued under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuedAction {
    pub request_id: u64,
    pub action: Action,
}

/// Raw result of an action request. `status == 0` means no HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionOutcome {
    pub status: u16,
    pub body: String,
}

impl ActionOutcome {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn failed(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Tuning values for a session, supplied when the runtime is spawned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionTuning {
    /// Sent as `version` with every `get-token` request.
    pub client_version: u32,
    pub backoff: BackoffPolicy,
    pub heartbeat: HeartbeatPolicy,
    /// Transcript retention cap.
    pub transcript_max_items: usize,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            client_version: 0,
            backoff: BackoffPolicy::default(),
            heartbeat: HeartbeatPolicy::default(),
            transcript_max_items: 1_000,
        }
    }
}

/// Command channel input accepted by the chat runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatCommand {
    /// Begin the session for a ladder member. Valid once.
    Start {
        ladder_name: String,
        user_id: String,
    },
    /// Send a chat line. Rendered only once the server echoes it back.
    SendChat { text: String },
    /// Report whether the user is looking at the transcript.
    SetAttention {
        focused: bool,
        transcript_visible: bool,
    },
}

/// Event channel output consumed by the UI sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatEvent {
    /// Session lifecycle transition.
    StateChanged { state: ConnectionState },
    /// Inline system notice.
    Notice(Notice),
    /// First successful open; the chat UI should become visible.
    ChatRevealed,
    /// New transcript lines in arrival order.
    ChatAppended { entries: Vec<TranscriptEntry> },
    /// Full presence list replacement.
    PresenceReplaced { participants: Vec<Participant> },
    /// Server-rendered players table.
    PlayersHtml { html: String },
    /// Server-rendered match history.
    MatchHistoryHtml { html: String },
    /// New chat arrived while the user was not looking.
    FlashHeader,
    /// Chat input enabled/disabled.
    SendingEnabled { enabled: bool },
    /// A chat line could not be delivered; the UI should restore it.
    SendFailed { text: String },
    /// The server asked for a full client reload.
    ReloadRequested,
    /// A command was rejected without changing state.
    CommandRejected { code: String, message: String },
}
