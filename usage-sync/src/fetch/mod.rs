pub mod partner;

pub use partner::PartnerUsageFetcher;

use partner_client::ApiError;

use crate::{table::UsageTable, window::SyncWindow};

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("partner api error: {0}")]
    Api(#[from] ApiError),
    #[error("malformed usage response: {0}")]
    Malformed(String),
}

/// Result of one fetch: the device the client resolved to, if any, and its
/// usage over the window. An empty table means no data, not failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedUsage {
    pub device_name: Option<String>,
    pub table: UsageTable,
}

impl FetchedUsage {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Source of daily usage for a client over a time window.
#[async_trait::async_trait]
pub trait UsageFetcher: Send + Sync {
    async fn fetch_usage(&self, client: &str, window: SyncWindow)
        -> Result<FetchedUsage, FetchError>;
}
