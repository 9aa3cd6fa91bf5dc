//! Protocol definitions for the AT-command link.
//!
//! This module contains the low-level protocol pieces:
//! - Line framing and raw-capture assembly
//! - AT command rendering
//! - Response classification and field parsing

pub mod command;
pub mod line;
pub mod response;

pub use command::Command;
pub use line::{CaptureMode, Chunk, LineAssembler};
pub use response::{Response, classify};
