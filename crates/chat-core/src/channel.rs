use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};

use crate::types::{ChatCommand, ChatEvent, ConnectionState};

/// Broadcast event stream handed to UI subscribers.
pub type EventStream = broadcast::Receiver<ChatEvent>;

#[derive(Debug, Error)]
pub enum ChatChannelError {
    /// The runtime stopped (reload or shutdown) and dropped its command receiver.
    #[error("chat runtime is no longer accepting commands")]
    CommandChannelClosed,
}

/// Latest connection state and input availability, folded from emitted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatStatus {
    pub state: ConnectionState,
    pub sending_enabled: bool,
}

impl Default for ChatStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            sending_enabled: false,
        }
    }
}

impl ChatStatus {
    /// Returns `true` when the event changed the status.
    fn absorb(&mut self, event: &ChatEvent) -> bool {
        match *event {
            ChatEvent::StateChanged { state } if self.state != state => {
                self.state = state;
                true
            }
            ChatEvent::SendingEnabled { enabled } if self.sending_enabled != enabled => {
                self.sending_enabled = enabled;
                true
            }
            _ => false,
        }
    }
}

/// Wiring between the chat runtime and its UI: commands in, events out, and
/// a status snapshot late subscribers can read without replaying events.
#[derive(Clone, Debug)]
pub struct ChatChannels {
    command_tx: mpsc::Sender<ChatCommand>,
    event_tx: broadcast::Sender<ChatEvent>,
    status_tx: watch::Sender<ChatStatus>,
}

impl ChatChannels {
    pub fn new(command_buffer: usize, event_buffer: usize) -> (Self, mpsc::Receiver<ChatCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));
        let (status_tx, _) = watch::channel(ChatStatus::default());

        (
            Self {
                command_tx,
                event_tx,
                status_tx,
            },
            command_rx,
        )
    }

    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    pub fn status(&self) -> ChatStatus {
        *self.status_tx.borrow()
    }

    pub async fn send_command(&self, command: ChatCommand) -> Result<(), ChatChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ChatChannelError::CommandChannelClosed)
    }

    /// Publish an event. The status snapshot is updated before subscribers
    /// see the event; with no subscribers the event itself is dropped.
    pub fn emit(&self, event: ChatEvent) {
        self.status_tx.send_if_modified(|status| status.absorb(&event));
        let _ = self.event_tx.send(event);
    }
}
