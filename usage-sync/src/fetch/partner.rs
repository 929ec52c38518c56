use partner_client::{
    domain::{DataResolution, Device, DeviceUsage, UsageChannels},
    Credentials, PartnerApi, UsageRequest,
};

use super::{FetchError, FetchedUsage, UsageFetcher};
use crate::{
    table::{Schema, UsageRow, UsageTable},
    window::SyncWindow,
};

/// Multiplier applied to raw channel usages unless configured otherwise.
pub const DEFAULT_VALUE_SCALE: f64 = 0.001;

const MAINS: [(u32, &str); 3] = [(1, "Mains_A"), (2, "Mains_B"), (3, "Mains_C")];

/// [`UsageFetcher`] backed by the partner API: authenticate, resolve the
/// client to a device by name, then read its daily usage.
pub struct PartnerUsageFetcher<A> {
    api: A,
    credentials: Credentials,
    value_scale: f64,
}

impl<A: PartnerApi> PartnerUsageFetcher<A> {
    pub fn new(api: A, credentials: Credentials) -> Self {
        Self {
            api,
            credentials,
            value_scale: DEFAULT_VALUE_SCALE,
        }
    }

    pub fn with_value_scale(mut self, value_scale: f64) -> Self {
        self.value_scale = value_scale;
        self
    }
}

#[async_trait::async_trait]
impl<A: PartnerApi> UsageFetcher for PartnerUsageFetcher<A> {
    async fn fetch_usage(
        &self,
        client: &str,
        window: SyncWindow,
    ) -> Result<FetchedUsage, FetchError> {
        let token = self.api.authenticate(&self.credentials).await?;
        let devices = self.api.devices(&token).await?;

        let Some(device) = devices.into_iter().find(|d| d.matches_client(client)) else {
            tracing::debug!(client, "no partner device matches client");
            return Ok(FetchedUsage::empty());
        };

        let request = UsageRequest {
            start_epoch_seconds: window.start_epoch_seconds(),
            end_epoch_seconds: window.end_epoch_seconds(),
            scale: DataResolution::Days,
            channels: UsageChannels::All,
            manufacturer_device_ids: vec![device.manufacturer_device_id.clone()],
        };
        let usages = self.api.usage(&token, &request).await?;

        let table = match usages
            .iter()
            .find(|u| u.manufacturer_device_id == device.manufacturer_device_id)
        {
            Some(usage) => build_table(&device, usage, self.value_scale)?,
            None => UsageTable::default(),
        };

        tracing::debug!(
            client,
            device = %device.device_name,
            %window,
            rows = table.len(),
            "partner usage fetched"
        );

        Ok(FetchedUsage {
            device_name: Some(device.device_name),
            table,
        })
    }
}

/// A repeated column keeps its position and takes the later values.
fn set_column<'a>(
    names: &mut Vec<String>,
    series: &mut Vec<&'a [f64]>,
    name: String,
    values: &'a [f64],
) {
    match names.iter().position(|n| *n == name) {
        Some(idx) => series[idx] = values,
        None => {
            names.push(name);
            series.push(values);
        }
    }
}

/// Pivot per-channel usage arrays into one row per bucket.
///
/// Named circuits get a `"{channel}-{sub_type}-{name}"` column and channels
/// 1..=3 always get a `"{channel}-Mains_X"` column, in channel-usage order.
pub fn build_table(
    device: &Device,
    usage: &DeviceUsage,
    value_scale: f64,
) -> Result<UsageTable, FetchError> {
    let buckets = usage
        .bucket_dates()
        .map_err(|e| FetchError::Malformed(format!("bucket timestamp out of range: {e}")))?;

    let mut names: Vec<String> = Vec::new();
    let mut series: Vec<&[f64]> = Vec::new();
    for ch in &usage.channel_usages {
        if ch.usages.len() != buckets.len() {
            return Err(FetchError::Malformed(format!(
                "channel {} has {} usages for {} buckets",
                ch.channel,
                ch.usages.len(),
                buckets.len()
            )));
        }

        let circuit_label = device
            .circuit_infos
            .iter()
            .find(|c| c.channel_number == ch.channel)
            .and_then(|c| c.label());
        if let Some(label) = circuit_label {
            set_column(&mut names, &mut series, format!("{}-{label}", ch.channel), &ch.usages);
        }
        if let Some((_, mains)) = MAINS.iter().find(|(n, _)| *n == ch.channel) {
            set_column(&mut names, &mut series, format!("{}-{mains}", ch.channel), &ch.usages);
        }
    }

    let rows = buckets
        .into_iter()
        .enumerate()
        .map(|(i, bucket)| {
            let values = series
                .iter()
                .map(|s| {
                    let v = s[i];
                    if v.is_nan() {
                        None
                    } else {
                        Some(v * value_scale)
                    }
                })
                .collect();
            UsageRow::new(bucket, values)
        })
        .collect();

    UsageTable::from_rows(Schema::new(names), rows)
        .map_err(|e| FetchError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use partner_client::{
        domain::{ChannelUsage, CircuitInfo, CircuitType, DeviceModel, EnergyDirection},
        ApiError, AuthToken,
    };
    use std::sync::Mutex;
    use time::macros::{date, datetime};

    struct FakeApi {
        devices: Vec<Device>,
        usages: Vec<DeviceUsage>,
        requests: Mutex<Vec<UsageRequest>>,
    }

    #[async_trait::async_trait]
    impl PartnerApi for FakeApi {
        async fn authenticate(&self, credentials: &Credentials) -> Result<AuthToken, ApiError> {
            if credentials.password == "secret" {
                Ok(AuthToken::new("t"))
            } else {
                Err(ApiError::Authentication("bad password".to_string()))
            }
        }

        async fn devices(&self, _token: &AuthToken) -> Result<Vec<Device>, ApiError> {
            Ok(self.devices.clone())
        }

        async fn usage(
            &self,
            _token: &AuthToken,
            request: &UsageRequest,
        ) -> Result<Vec<DeviceUsage>, ApiError> {
            self.requests.lock().expect("lock").push(request.clone());
            Ok(self.usages.clone())
        }
    }

    fn device() -> Device {
        Device {
            manufacturer_device_id: "dev-1".to_string(),
            device_name: "Casa Soto".to_string(),
            model: DeviceModel::Vue2,
            device_connected: true,
            circuit_infos: vec![
                CircuitInfo {
                    channel_number: 1,
                    circuit_type: CircuitType::Main,
                    energy_direction: EnergyDirection::Consumption,
                    sub_type: "Main".to_string(),
                    name: String::new(),
                },
                CircuitInfo {
                    channel_number: 4,
                    circuit_type: CircuitType::Circuit,
                    energy_direction: EnergyDirection::Consumption,
                    sub_type: "AC".to_string(),
                    name: "Kitchen".to_string(),
                },
            ],
        }
    }

    fn usage() -> DeviceUsage {
        DeviceUsage {
            manufacturer_device_id: "dev-1".to_string(),
            bucket_epoch_seconds: vec![1_719_705_600, 1_719_792_000],
            channel_usages: vec![
                ChannelUsage {
                    channel: 1,
                    usages: vec![1500.0, f64::NAN],
                },
                ChannelUsage {
                    channel: 4,
                    usages: vec![250.0, 500.0],
                },
                ChannelUsage {
                    channel: 7,
                    usages: vec![1.0, 1.0],
                },
            ],
        }
    }

    fn fetcher(usages: Vec<DeviceUsage>, password: &str) -> PartnerUsageFetcher<FakeApi> {
        PartnerUsageFetcher::new(
            FakeApi {
                devices: vec![device()],
                usages,
                requests: Mutex::new(Vec::new()),
            },
            Credentials::new("ops@example.com", password),
        )
    }

    fn window() -> SyncWindow {
        SyncWindow::new(
            datetime!(2024-06-30 00:00:00 UTC),
            datetime!(2024-07-02 00:00:00 UTC),
        )
    }

    #[test]
    fn build_table_names_mains_and_circuits() {
        let table = build_table(&device(), &usage(), DEFAULT_VALUE_SCALE).expect("table");

        assert_eq!(table.schema().channels(), &["1-Mains_A", "4-AC-Kitchen"]);
        assert_eq!(table.first_bucket(), Some(date!(2024 - 06 - 30)));
        assert_eq!(table.last_bucket(), Some(date!(2024 - 07 - 01)));
        assert_eq!(table.rows()[0].values, vec![Some(1.5), Some(0.25)]);
        assert_eq!(table.rows()[1].values, vec![None, Some(0.5)]);
    }

    #[test]
    fn named_mains_channel_gets_both_columns() {
        let mut d = device();
        d.circuit_infos[0].name = "Grid".to_string();
        let table = build_table(&d, &usage(), 1.0).expect("table");
        assert_eq!(
            table.schema().channels(),
            &["1-Main-Grid", "1-Mains_A", "4-AC-Kitchen"]
        );
    }

    #[test]
    fn repeated_channel_keeps_last_values() {
        let mut u = usage();
        u.channel_usages.push(ChannelUsage {
            channel: 1,
            usages: vec![3000.0, 4000.0],
        });
        let table = build_table(&device(), &u, DEFAULT_VALUE_SCALE).expect("table");

        assert_eq!(table.schema().channels(), &["1-Mains_A", "4-AC-Kitchen"]);
        assert_eq!(table.rows()[0].values, vec![Some(3.0), Some(0.25)]);
        assert_eq!(table.rows()[1].values, vec![Some(4.0), Some(0.5)]);
    }

    #[test]
    fn build_table_rejects_ragged_channels() {
        let mut u = usage();
        u.channel_usages[1].usages.pop();
        let res = build_table(&device(), &u, 1.0);
        assert!(matches!(res, Err(FetchError::Malformed(_))));
    }

    #[tokio::test]
    async fn fetch_requests_daily_usage_for_matching_device() {
        let f = fetcher(vec![usage()], "secret");
        let fetched = f.fetch_usage("soto", window()).await.expect("fetch");

        assert_eq!(fetched.device_name.as_deref(), Some("Casa Soto"));
        assert_eq!(fetched.table.len(), 2);

        let requests = f.api.requests.lock().expect("lock");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].scale, DataResolution::Days);
        assert_eq!(requests[0].manufacturer_device_ids, vec!["dev-1".to_string()]);
        assert_eq!(requests[0].start_epoch_seconds, 1_719_705_600);
        assert_eq!(requests[0].end_epoch_seconds, 1_719_878_400);
    }

    #[tokio::test]
    async fn unknown_client_yields_empty_result() {
        let f = fetcher(vec![usage()], "secret");
        let fetched = f.fetch_usage("garage", window()).await.expect("fetch");
        assert_eq!(fetched, FetchedUsage::empty());
    }

    #[tokio::test]
    async fn device_without_usage_keeps_its_name() {
        let f = fetcher(Vec::new(), "secret");
        let fetched = f.fetch_usage("SOTO", window()).await.expect("fetch");
        assert_eq!(fetched.device_name.as_deref(), Some("Casa Soto"));
        assert!(fetched.table.is_empty());
    }

    #[tokio::test]
    async fn auth_failure_is_an_error() {
        let f = fetcher(vec![usage()], "wrong");
        let res = f.fetch_usage("soto", window()).await;
        assert!(matches!(res, Err(FetchError::Api(ApiError::Authentication(_)))));
    }
}
