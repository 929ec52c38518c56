use std::fmt;

use serde::Deserialize;

use crate::domain::{DataResolution, Device, DeviceUsage, UsageChannels};

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("auth token rejected")]
    InvalidToken,
    #[error("unsupported request: {0}")]
    Unsupported(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Partner account credentials.
///
/// `Debug` never prints the password.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub partner_email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(partner_email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            partner_email: partner_email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("partner_email", &self.partner_email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsageRequest {
    pub start_epoch_seconds: i64,
    pub end_epoch_seconds: i64,
    pub scale: DataResolution,
    pub channels: UsageChannels,
    /// Empty means every device on the account.
    pub manufacturer_device_ids: Vec<String>,
}

/// Calls the partner API exposes for inventory and usage reads.
#[async_trait::async_trait]
pub trait PartnerApi: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthToken, ApiError>;

    async fn devices(&self, token: &AuthToken) -> Result<Vec<Device>, ApiError>;

    async fn usage(
        &self,
        token: &AuthToken,
        request: &UsageRequest,
    ) -> Result<Vec<DeviceUsage>, ApiError>;
}
