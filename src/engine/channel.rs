//! The command channel: single-outstanding-command discipline.
//!
//! The modem is half-duplex at the command level. `send` refuses to transmit
//! while a command is outstanding; the lock is released when the response
//! handling sees an acknowledgement (or an error that carries one). A
//! deadline armed at send time drives timeout detection through `poll`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Result;
use crate::protocol::Command;
use crate::transport::Transport;

/// Outcome of polling the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelStatus {
    /// No command outstanding; the next one may be sent.
    Ready,
    /// A command is outstanding and within its deadline.
    Busy,
    /// A command is outstanding and its deadline has elapsed.
    TimedOut,
}

pub(crate) struct CommandChannel<T> {
    transport: Arc<Mutex<T>>,
    locked: bool,
    deadline: Option<Instant>,
    timeout: Duration,
    last_command: String,
}

impl<T: Transport> CommandChannel<T> {
    pub fn new(transport: Arc<Mutex<T>>, timeout: Duration) -> Self {
        Self {
            transport,
            locked: false,
            deadline: None,
            timeout,
            last_command: String::new(),
        }
    }

    /// Transmits a command if the channel is free.
    ///
    /// Returns `Ok(false)` without writing while a command is outstanding;
    /// otherwise writes exactly once, raises the lock and arms the deadline.
    pub async fn send(&mut self, command: &Command) -> Result<bool> {
        if self.locked {
            tracing::debug!("waiting for lock, holding back {command}");
            return Ok(false);
        }

        {
            let mut transport = self.transport.lock().await;
            transport.send(Bytes::from(command.wire_bytes())).await?;
        }

        self.last_command = command.text();
        self.locked = true;
        self.deadline = Some(Instant::now() + self.timeout);
        tracing::debug!("sent: {}", self.last_command);
        Ok(true)
    }

    /// Reports whether the channel is free, still busy, or timed out.
    ///
    /// The armed deadline is cleared once the channel reports ready.
    pub fn poll(&mut self) -> ChannelStatus {
        if self.locked {
            if let Some(deadline) = self.deadline {
                if Instant::now() > deadline {
                    return ChannelStatus::TimedOut;
                }
            }
            return ChannelStatus::Busy;
        }
        self.deadline = None;
        ChannelStatus::Ready
    }

    /// Releases the lock after an acknowledgement.
    pub fn release(&mut self) {
        self.locked = false;
    }

    /// Clears lock and deadline during timeout recovery.
    pub fn force_clear(&mut self) {
        self.locked = false;
        self.deadline = None;
    }

    /// Returns true while a command is outstanding.
    #[cfg(test)]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Changes the deadline used for subsequent sends.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// The text of the most recently transmitted command.
    pub fn last_command(&self) -> &str {
        &self.last_command
    }
}
