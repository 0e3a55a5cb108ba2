//! Core of the laddrs chat client shared by the runtime and frontends.
//!
//! This crate holds the sans-IO connection lifecycle, the inbound payload
//! router with its transcript, watermark and color state, and the reconnect
//! and heartbeat policies. Nothing here performs I/O or owns a timer.

/// Reconnect delay policies.
pub mod backoff;
/// Async command/event channel primitives.
pub mod channel;
/// Per-name color assignment.
pub mod colors;
/// Stable error types and HTTP status classification.
pub mod error;
/// Liveness tracking and heartbeat interval schedule.
pub mod heartbeat;
/// Connection lifecycle state machine.
pub mod lifecycle;
/// Inbound JSON payload decoding.
pub mod payload;
/// Payload routing into chat state and UI events.
pub mod router;
/// Bounded, de-duplicated chat transcript.
pub mod transcript;
/// Frontend-facing protocol types (commands, events, actions).
pub mod types;
/// Chat history high-water mark.
pub mod watermark;

pub use backoff::BackoffPolicy;
pub use channel::{ChatChannelError, ChatChannels, ChatStatus, EventStream};
pub use colors::{ColorAssigner, PALETTE};
pub use error::{ChatError, ChatErrorCategory, classify_http_status, is_token_expiry};
pub use heartbeat::{HeartbeatMonitor, HeartbeatPolicy, HeartbeatVerdict};
pub use lifecycle::{Effect, ReconnectState, SessionIdentity, SessionLifecycle};
pub use payload::{InboundPayload, parse_inbound};
pub use router::{Dispatch, MessageRouter};
pub use transcript::Transcript;
pub use types::{
    Action, ActionOutcome, ChatBody, ChatCommand, ChatEvent, ChatRecord, ConnectionState,
    IssuedAction, Notice, Participant, ReadyState, SessionId, SessionTuning, TranscriptEntry,
};
pub use watermark::Watermark;
