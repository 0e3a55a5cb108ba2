/// Timestamp (unix seconds) of the newest chat message rendered so far.
///
/// Used as the lower bound of `get-chat-history` requests. Never decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermark {
    last_chat_timestamp: i64,
}

impl Watermark {
    pub fn value(&self) -> i64 {
        self.last_chat_timestamp
    }

    pub fn is_set(&self) -> bool {
        self.last_chat_timestamp > 0
    }

    /// Move the watermark forward to `timestamp` if it is newer.
    pub fn advance(&mut self, timestamp: i64) {
        self.last_chat_timestamp = self.last_chat_timestamp.max(timestamp);
    }
}
