//! State shared between the public handle and the background worker.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::Fault;
use crate::types::{CallRequest, GprsConfig, GpsFix, Sms};

/// The mutex-guarded state block shared by caller threads and the worker.
///
/// Critical sections are append/pop only and never cross an await, so a
/// plain std mutex is enough and caller-facing operations never block beyond
/// queue-access latency.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    /// Received, unread messages (FIFO, consumed by the caller).
    pub inbox: VecDeque<Sms>,
    /// Messages queued for sending (FIFO, consumed by the worker).
    pub outbox: VecDeque<Sms>,
    /// Pending voice call, present from request until hang-up completes.
    pub call_request: Option<CallRequest>,
    /// Hang-up requested, either by the caller or by the call deadline.
    pub hang_up: bool,
    /// Most recent GNSS fix accepted by the replacement policy.
    pub gps_fix: GpsFix,
    /// One-shot GNSS poll requested by the caller.
    pub gps_poll_requested: bool,
    /// NMEA streaming to the serial link requested by the caller.
    pub gps_stream_start_requested: bool,
    /// Stop of NMEA streaming requested by the caller.
    pub gps_stream_stop_requested: bool,
    /// Bearer credentials; first set wins.
    pub gprs: Option<GprsConfig>,
    /// Queued HTTP GET requests (FIFO, consumed by the worker).
    pub url_queue: VecDeque<String>,
    /// Completed HTTP bodies (FIFO, consumed by the caller).
    pub url_responses: VecDeque<String>,
    /// Fatal fault that stopped the worker, if any.
    pub fault: Option<Fault>,
}

impl Shared {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a call request unless one is already pending.
    ///
    /// Returns false without touching the pending call otherwise.
    pub fn request_call(&mut self, request: CallRequest) -> bool {
        if self.call_request.is_some() {
            return false;
        }
        self.call_request = Some(request);
        true
    }

    /// Stores bearer credentials; repeated calls are ignored.
    pub fn set_gprs(&mut self, config: GprsConfig) {
        if self.gprs.is_some() {
            tracing::warn!("GPRS credentials already set, ignoring");
            return;
        }
        self.gprs = Some(config);
    }
}

pub(crate) type SharedHandle = Arc<Mutex<Shared>>;

/// Locks the shared block, recovering from a poisoned mutex.
pub(crate) fn lock(shared: &SharedHandle) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}
