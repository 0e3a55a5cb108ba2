//! Push transport capability used by the chat runtime.
//!
//! A transport delivers server-pushed messages for one session and reports
//! its lifecycle through [`TransportEvent`]s. Every event carries the
//! [`SessionId`] it belongs to so the runtime can drop callbacks from
//! sessions it already replaced.

use std::{
    fmt,
    sync::{Arc, Mutex, RwLock},
};

use chat_core::{ReadyState, SessionId};
use thiserror::Error;
use tokio::sync::mpsc;

#[cfg(feature = "websocket")]
mod websocket;

#[cfg(feature = "websocket")]
pub use websocket::WebSocketPushTransport;

/// Lifecycle callback raised by a transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    Opened,
    Message(String),
    /// `code` is an HTTP-style status; 0 when no status is known.
    Error { code: u16, description: String },
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub session: SessionId,
    pub signal: TransportSignal,
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid transport endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("transport backend failure: {0}")]
    Backend(String),
}

pub trait PushTransport: Send + Sync {
    /// Start opening a session. Returns immediately; progress is reported
    /// through `events`.
    fn open(
        &self,
        session: SessionId,
        token: &str,
        events: TransportEventSender,
    ) -> Result<Box<dyn TransportHandle>, TransportError>;
}

pub trait TransportHandle: Send + Sync + fmt::Debug {
    fn session(&self) -> SessionId;

    fn ready_state(&self) -> ReadyState;

    /// Request a close. A `Closed` event follows once the session is down.
    fn close(&self);
}

/// Ready state shared between a handle and the task driving it.
#[derive(Debug, Clone)]
pub struct SharedReadyState(Arc<RwLock<ReadyState>>);

impl SharedReadyState {
    pub fn new(state: ReadyState) -> Self {
        Self(Arc::new(RwLock::new(state)))
    }

    pub fn get(&self) -> ReadyState {
        // a poisoned lock means the driver panicked; nothing is live anymore
        self.0.read().map(|state| *state).unwrap_or(ReadyState::Closed)
    }

    /// Store `next` and return the previous state.
    pub fn set(&self, next: ReadyState) -> ReadyState {
        match self.0.write() {
            Ok(mut state) => std::mem::replace(&mut *state, next),
            Err(_) => ReadyState::Closed,
        }
    }
}

/// Transport driven by hand, for tests and offline runs.
///
/// `open` only records the session; the test then plays the server side
/// through [`InMemorySession`].
#[derive(Clone, Default)]
pub struct InMemoryPushTransport {
    sessions: Arc<Mutex<Vec<InMemorySession>>>,
}

impl InMemoryPushTransport {
    pub fn sessions(&self) -> Vec<InMemorySession> {
        self.sessions
            .lock()
            .map(|sessions| sessions.clone())
            .unwrap_or_default()
    }

    pub fn latest(&self) -> Option<InMemorySession> {
        self.sessions().pop()
    }

    pub fn open_count(&self) -> usize {
        self.sessions().len()
    }

    pub fn live_count(&self) -> usize {
        self.sessions()
            .iter()
            .filter(|session| session.ready_state().is_live())
            .count()
    }
}

impl PushTransport for InMemoryPushTransport {
    fn open(
        &self,
        session: SessionId,
        token: &str,
        events: TransportEventSender,
    ) -> Result<Box<dyn TransportHandle>, TransportError> {
        let opened = InMemorySession {
            session,
            token: token.to_owned(),
            state: SharedReadyState::new(ReadyState::Connecting),
            events,
        };
        self.sessions
            .lock()
            .map_err(|_| TransportError::Backend("poisoned lock".to_owned()))?
            .push(opened.clone());
        Ok(Box::new(opened))
    }
}

/// Server side of one in-memory session.
#[derive(Debug, Clone)]
pub struct InMemorySession {
    session: SessionId,
    token: String,
    state: SharedReadyState,
    events: TransportEventSender,
}

impl InMemorySession {
    pub fn id(&self) -> SessionId {
        self.session
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    /// Complete the handshake.
    pub fn open(&self) {
        self.state.set(ReadyState::Open);
        self.signal(TransportSignal::Opened);
    }

    pub fn push(&self, raw: impl Into<String>) {
        self.signal(TransportSignal::Message(raw.into()));
    }

    /// Report an error without changing the ready state.
    pub fn error(&self, code: u16, description: impl Into<String>) {
        self.signal(TransportSignal::Error {
            code,
            description: description.into(),
        });
    }

    /// Drop the session from the server side.
    pub fn drop_connection(&self) {
        if self.state.set(ReadyState::Closed) != ReadyState::Closed {
            self.signal(TransportSignal::Closed);
        }
    }

    fn signal(&self, signal: TransportSignal) {
        let _ = self.events.send(TransportEvent {
            session: self.session,
            signal,
        });
    }
}

impl TransportHandle for InMemorySession {
    fn session(&self) -> SessionId {
        self.session
    }

    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    fn close(&self) {
        self.drop_connection();
    }
}
