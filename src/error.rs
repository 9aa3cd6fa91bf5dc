//! Error types for the gsm-hat library.

use thiserror::Error;

/// The main error type for gsm-hat operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection is not established.
    #[error("not connected")]
    NotConnected,

    /// The background worker did not stop within the shutdown deadline.
    #[error("worker did not stop within {timeout_ms}ms")]
    ShutdownTimeout { timeout_ms: u64 },

    /// The background worker stopped because of a fatal fault.
    #[error("engine fault: {0}")]
    Fault(#[from] Fault),
}

/// Fatal engine faults.
///
/// Everything recoverable (modem errors, command timeouts with a defined
/// recovery) is handled inside the engine and never surfaces here. A `Fault`
/// means the command lock may be desynchronized and the worker has stopped;
/// it is up to the caller to decide whether to reopen the device.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Fault {
    /// A command timed out in a workflow state with no defined recovery.
    #[error("unhandled timeout in state {state} after sending {command:?}")]
    UnhandledTimeout { state: String, command: String },
}

/// Result type alias for gsm-hat operations.
pub type Result<T> = std::result::Result<T, Error>;
