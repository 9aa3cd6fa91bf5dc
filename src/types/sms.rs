//! SMS message type.

use chrono::NaiveDateTime;

/// A short message, either received from the mailbox or queued for sending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sms {
    /// Originating number (empty for outgoing messages).
    pub sender: String,
    /// Destination number (empty for received messages).
    pub receiver: String,
    /// Message body.
    pub message: String,
    /// Service-center timestamp of a received message.
    pub date: Option<NaiveDateTime>,
}

impl Sms {
    /// Creates an outgoing message.
    #[must_use]
    pub fn outgoing(receiver: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            receiver: receiver.into(),
            message: message.into(),
            ..Self::default()
        }
    }
}
