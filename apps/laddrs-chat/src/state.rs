//! Terminal view state fed by chat runtime events.

use chat_core::{ChatBody, ChatEvent, ConnectionState, Participant, TranscriptEntry};
use tracing::{debug, trace};

const DEFAULT_STATUS: &str = "Idle";
const SECONDS_PER_DAY: i64 = 86_400;

/// Snapshot of everything the prompt line needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub status_text: String,
    pub revealed: bool,
    pub can_send: bool,
    pub online: Vec<String>,
    pub unseen: usize,
}

/// Reducer turning runtime events into printable lines.
#[derive(Debug, Clone)]
pub struct ChatView {
    status_text: String,
    revealed: bool,
    can_send: bool,
    presence: Vec<Participant>,
    unseen: usize,
    restored_draft: Option<String>,
    reload_requested: bool,
}

impl Default for ChatView {
    fn default() -> Self {
        Self {
            status_text: DEFAULT_STATUS.to_owned(),
            revealed: false,
            can_send: false,
            presence: Vec::new(),
            unseen: 0,
            restored_draft: None,
            reload_requested: false,
        }
    }
}

impl ChatView {
    pub fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            status_text: self.status_text.clone(),
            revealed: self.revealed,
            can_send: self.can_send,
            online: self.presence.iter().map(|p| p.name.clone()).collect(),
            unseen: self.unseen,
        }
    }

    pub fn reload_requested(&self) -> bool {
        self.reload_requested
    }

    /// Text of the last failed send, handed back once.
    pub fn take_restored_draft(&mut self) -> Option<String> {
        self.restored_draft.take()
    }

    pub fn mark_seen(&mut self) {
        self.unseen = 0;
    }

    /// Apply one event and return the lines to print.
    pub fn handle_event(&mut self, event: ChatEvent) -> Vec<String> {
        trace!(?event, "view event");
        match event {
            ChatEvent::StateChanged { state } => {
                self.status_text = status_label(state).to_owned();
                debug!(status = %self.status_text, "chat status");
                Vec::new()
            }
            ChatEvent::Notice(notice) => vec![format!("-- {notice}")],
            ChatEvent::ChatRevealed => {
                self.revealed = true;
                vec!["-- Chat ready.".to_owned()]
            }
            ChatEvent::ChatAppended { entries } => entries.iter().map(render_entry).collect(),
            ChatEvent::PresenceReplaced { participants } => {
                self.presence = participants;
                let names: Vec<&str> = self.presence.iter().map(|p| p.name.as_str()).collect();
                if names.is_empty() {
                    vec!["-- Nobody else is here.".to_owned()]
                } else {
                    vec![format!("-- Online: {}", names.join(", "))]
                }
            }
            ChatEvent::PlayersHtml { html } => {
                vec![format!("-- Standings updated ({} rows).", count_rows(&html))]
            }
            ChatEvent::MatchHistoryHtml { html } => {
                vec![format!("-- Match history updated ({} rows).", count_rows(&html))]
            }
            ChatEvent::FlashHeader => {
                self.unseen += 1;
                Vec::new()
            }
            ChatEvent::SendingEnabled { enabled } => {
                self.can_send = enabled;
                Vec::new()
            }
            ChatEvent::SendFailed { text } => {
                let line = format!("-- Not sent: {text}");
                self.restored_draft = Some(text);
                vec![line]
            }
            ChatEvent::ReloadRequested => {
                self.reload_requested = true;
                vec!["-- Server asked for a reload; restarting.".to_owned()]
            }
            ChatEvent::CommandRejected { code, message } => {
                vec![format!("-- {message} ({code})")]
            }
        }
    }
}

fn status_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Idle => "Idle",
        ConnectionState::TokenRequested => "Connecting",
        ConnectionState::Opening => "Opening",
        ConnectionState::Connected => "Connected",
        ConnectionState::Errored => "Degraded",
        ConnectionState::ReconnectWait => "Reconnecting",
        ConnectionState::Reloading => "Reloading",
    }
}

fn render_entry(entry: &TranscriptEntry) -> String {
    let clock = clock(entry.timestamp);
    match &entry.body {
        ChatBody::Message(text) => format!("[{clock}] {}: {text}", entry.name),
        ChatBody::System(text) => format!("[{clock}] * {} {text}", entry.name),
    }
}

/// `HH:MM` in UTC.
fn clock(timestamp: i64) -> String {
    let seconds = timestamp.rem_euclid(SECONDS_PER_DAY);
    format!("{:02}:{:02}", seconds / 3_600, (seconds % 3_600) / 60)
}

fn count_rows(html: &str) -> usize {
    html.matches("<tr").count()
}
