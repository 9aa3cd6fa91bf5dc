//! Data types for GSM/GNSS entities.
//!
//! This module contains the core data structures used throughout the library:
//! - SMS messages
//! - GNSS fixes
//! - Voice call requests
//! - GPRS bearer credentials

pub mod call;
pub mod gprs;
pub mod gps;
pub mod sms;

pub use call::CallRequest;
pub use gprs::GprsConfig;
pub use gps::GpsFix;
pub use sms::Sms;
