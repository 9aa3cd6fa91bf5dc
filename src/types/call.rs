//! Voice call request.

use std::time::Duration;

/// A pending outgoing voice call.
///
/// At most one call may be pending at a time; the request stays in shared
/// state from [`call`](crate::GsmHat::call) until the hang-up workflow
/// completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    /// Number to dial.
    pub number: String,
    /// Call duration before the engine hangs up on its own.
    pub timeout: Duration,
}
