//! GPRS bearer credentials.

/// Credentials for opening the GPRS bearer.
///
/// The bearer bring-up workflow only runs once all three values are set and
/// the modem is not already reporting a non-null IP address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GprsConfig {
    /// Access point name.
    pub apn: String,
    /// Username.
    pub user: String,
    /// Password.
    pub password: String,
}

impl GprsConfig {
    /// Creates a new credential set.
    #[must_use]
    pub fn new(
        apn: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            apn: apn.into(),
            user: user.into(),
            password: password.into(),
        }
    }
}
