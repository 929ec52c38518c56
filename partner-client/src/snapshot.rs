use std::path::Path;

use serde::Deserialize;

use crate::api::{ApiError, AuthToken, Credentials, PartnerApi, UsageRequest};
use crate::domain::{DataResolution, Device, DeviceUsage, UsageChannels};

const TOKEN_PREFIX: &str = "snapshot:";

/// Recorded partner account state: the device inventory plus usage for each
/// device at a single resolution.
#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    /// When set, only this partner email authenticates.
    #[serde(default)]
    pub partner_email: Option<String>,
    pub resolution: DataResolution,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub usages: Vec<DeviceUsage>,
}

/// [`PartnerApi`] served from a [`Snapshot`] instead of the live service.
pub struct SnapshotApi {
    snapshot: Snapshot,
}

impl SnapshotApi {
    pub fn new(snapshot: Snapshot) -> Self {
        Self { snapshot }
    }

    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, ApiError> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            ApiError::Transport(format!("failed to read snapshot {}: {e}", path.display()))
        })?;
        let snapshot: Snapshot = serde_json::from_str(&contents)
            .map_err(|e| ApiError::Transport(format!("invalid snapshot json: {e}")))?;

        tracing::debug!(
            path = %path.display(),
            devices = snapshot.devices.len(),
            usages = snapshot.usages.len(),
            "partner snapshot loaded"
        );

        Ok(Self::new(snapshot))
    }

    fn check_token(&self, token: &AuthToken) -> Result<(), ApiError> {
        if token.as_str().starts_with(TOKEN_PREFIX) {
            Ok(())
        } else {
            Err(ApiError::InvalidToken)
        }
    }
}

#[async_trait::async_trait]
impl PartnerApi for SnapshotApi {
    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthToken, ApiError> {
        if credentials.partner_email.trim().is_empty() {
            return Err(ApiError::Authentication("partner email is empty".to_string()));
        }
        if let Some(expected) = &self.snapshot.partner_email {
            if !expected.eq_ignore_ascii_case(credentials.partner_email.trim()) {
                return Err(ApiError::Authentication(format!(
                    "unknown partner '{}'",
                    credentials.partner_email
                )));
            }
        }

        Ok(AuthToken::new(format!("{TOKEN_PREFIX}{}", credentials.partner_email)))
    }

    async fn devices(&self, token: &AuthToken) -> Result<Vec<Device>, ApiError> {
        self.check_token(token)?;
        Ok(self.snapshot.devices.clone())
    }

    async fn usage(
        &self,
        token: &AuthToken,
        request: &UsageRequest,
    ) -> Result<Vec<DeviceUsage>, ApiError> {
        self.check_token(token)?;

        if request.scale != self.snapshot.resolution {
            return Err(ApiError::Unsupported(format!(
                "snapshot holds {:?} buckets, requested {:?}",
                self.snapshot.resolution, request.scale
            )));
        }

        let usages = self
            .snapshot
            .usages
            .iter()
            .filter(|u| {
                request.manufacturer_device_ids.is_empty()
                    || request.manufacturer_device_ids.contains(&u.manufacturer_device_id)
            })
            .map(|u| {
                let mut u = u.clone();
                u.retain_window(request.start_epoch_seconds, request.end_epoch_seconds);
                if request.channels == UsageChannels::Mains {
                    u.channel_usages.retain(|c| (1..=3).contains(&c.channel));
                }
                u
            })
            .collect();

        Ok(usages)
    }
}
