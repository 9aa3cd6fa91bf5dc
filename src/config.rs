//! Engine configuration.

use std::time::Duration;

/// Policy for replacing the held GNSS fix with a freshly parsed record.
///
/// The SIM868 keeps reporting `+CGNSINF` records while the receiver is still
/// converging; with [`FixPolicy::RequireGoodFix`] those interim records never
/// overwrite a previously good position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FixPolicy {
    /// Replace the held fix only when fix status, latitude, longitude,
    /// altitude and PDOP are all nonzero.
    #[default]
    RequireGoodFix,
    /// Replace the held fix with every parsed record.
    Always,
}

/// Configuration for the protocol engine.
///
/// All intervals have defaults matching the SIM868's observed timing; they
/// rarely need changing except in tests.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker tick period. Input is drained and one state-machine step runs
    /// per tick.
    pub tick_interval: Duration,
    /// Deadline for a command acknowledgement.
    pub command_timeout: Duration,
    /// Deadline override for the SMS-submission exchange. The modem echoes a
    /// prompt and waits for the message body before replying, which takes far
    /// longer than a plain command.
    pub sms_send_timeout: Duration,
    /// Call duration used when the caller does not specify one.
    pub default_call_timeout: Duration,
    /// Interval between single-shot GNSS polls while nothing else is pending.
    pub gnss_poll_interval: Duration,
    /// Interval between periodic mailbox scans.
    pub sms_poll_interval: Duration,
    /// Interval between periodic bearer status queries.
    pub gprs_poll_interval: Duration,
    /// Interval between liveness `AT` pings when the engine is otherwise idle.
    pub liveness_interval: Duration,
    /// Retries of the mailbox-capacity query before the modem is power-cycled.
    pub mailbox_retry_limit: u32,
    /// Bounded wait for the worker to exit during `close`.
    pub shutdown_timeout: Duration,
    /// GNSS fix replacement policy.
    pub fix_policy: FixPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            command_timeout: Duration::from_secs(5),
            sms_send_timeout: Duration::from_secs(30),
            default_call_timeout: Duration::from_secs(15),
            gnss_poll_interval: Duration::from_secs(5),
            sms_poll_interval: Duration::from_millis(2500),
            gprs_poll_interval: Duration::from_secs(5),
            liveness_interval: Duration::from_secs(5),
            mailbox_retry_limit: 3,
            shutdown_timeout: Duration::from_secs(10),
            fix_policy: FixPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Sets the GNSS fix replacement policy.
    #[must_use]
    pub const fn fix_policy(mut self, policy: FixPolicy) -> Self {
        self.fix_policy = policy;
        self
    }

    /// Sets the idle GNSS poll interval.
    #[must_use]
    pub const fn gnss_poll_interval(mut self, interval: Duration) -> Self {
        self.gnss_poll_interval = interval;
        self
    }

    /// Sets the command acknowledgement timeout.
    #[must_use]
    pub const fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert_eq!(config.command_timeout, Duration::from_secs(5));
        assert_eq!(config.mailbox_retry_limit, 3);
        assert_eq!(config.fix_policy, FixPolicy::RequireGoodFix);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::default()
            .fix_policy(FixPolicy::Always)
            .gnss_poll_interval(Duration::from_secs(2000));
        assert_eq!(config.fix_policy, FixPolicy::Always);
        assert_eq!(config.gnss_poll_interval, Duration::from_secs(2000));
    }
}
