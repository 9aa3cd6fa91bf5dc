//! # gsm-hat
//!
//! A Rust driver for SIM868-style GSM/GNSS hats attached over a serial UART.
//!
//! The hat is driven through AT commands; this library hides the command
//! traffic behind a background worker and exposes message queues and the
//! current GNSS fix through a thread-safe handle.
//!
//! ## Features
//!
//! - SMS: periodic mailbox scans, unsolicited-delivery handling, queued
//!   sending in text mode
//! - Voice calls with an automatic hang-up deadline
//! - GNSS fixes with a replacement policy that keeps the last good position
//! - GPRS bearer bring-up and queued HTTP GET requests
//! - Automatic recovery: the modem is power-cycled (when the board exposes
//!   the power key) if it stops answering
//!
//! ## Quick Start
//!
//! ```no_run
//! use gsm_hat::GsmHat;
//!
//! #[tokio::main]
//! async fn main() -> gsm_hat::Result<()> {
//!     let hat = GsmHat::open("/dev/ttyS0", 115_200).await?;
//!
//!     hat.sms_write("+491234567", "hello from rust");
//!
//!     if let Some(sms) = hat.sms_read() {
//!         println!("{}: {}", sms.sender, sms.message);
//!     }
//!
//!     let fix = hat.gps_fix();
//!     println!("position: {} {}", fix.latitude, fix.longitude);
//!
//!     hat.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Line framing, AT command rendering, response parsing
//! - [`types`] - Data structures (messages, fixes, calls, bearer credentials)
//! - [`transport`] - Transport implementations (currently UART/serial)
//! - [`power`] - Power-key control for unresponsive modems
//! - [`client`] - High-level [`GsmHat`] handle
//!
//! The protocol engine itself (command channel, state machine, worker) is
//! internal; callers only ever touch [`GsmHat`].

pub mod client;
pub mod config;
pub mod error;
pub mod power;
pub mod protocol;
pub mod transport;
pub mod types;

mod engine;

// Re-exports for convenience
pub use client::GsmHat;
pub use config::{EngineConfig, FixPolicy};
pub use error::{Error, Fault, Result};
pub use power::{NoPowerControl, PowerControl};
pub use transport::{SerialConfig, SerialTransport};
pub use types::{CallRequest, GprsConfig, GpsFix, Sms};
