use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataResolution {
    FifteenMinutes,
    Hours,
    Days,
    Weeks,
    Months,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UsageChannels {
    #[default]
    All,
    Mains,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelUsage {
    pub channel: u32,
    pub usages: Vec<f64>,
}

/// Usage of one device, bucketed at the requested resolution.
///
/// `channel_usages[n].usages[i]` belongs to the bucket starting at
/// `bucket_epoch_seconds[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceUsage {
    pub manufacturer_device_id: String,
    pub bucket_epoch_seconds: Vec<i64>,
    #[serde(default)]
    pub channel_usages: Vec<ChannelUsage>,
}

impl DeviceUsage {
    /// UTC calendar date of each bucket start.
    pub fn bucket_dates(&self) -> Result<Vec<Date>, time::error::ComponentRange> {
        self.bucket_epoch_seconds
            .iter()
            .map(|&s| OffsetDateTime::from_unix_timestamp(s).map(|t| t.date()))
            .collect()
    }

    /// Keep only the buckets starting inside `[start, end)`.
    pub fn retain_window(&mut self, start: i64, end: i64) {
        let keep: Vec<bool> = self
            .bucket_epoch_seconds
            .iter()
            .map(|&s| s >= start && s < end)
            .collect();

        let mut idx = 0;
        self.bucket_epoch_seconds.retain(|_| {
            idx += 1;
            keep[idx - 1]
        });
        for ch in &mut self.channel_usages {
            let mut idx = 0;
            ch.usages.retain(|_| {
                idx += 1;
                keep.get(idx - 1).copied().unwrap_or(false)
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn sample() -> DeviceUsage {
        DeviceUsage {
            manufacturer_device_id: "dev-1".to_string(),
            // 2024-06-29, 2024-06-30, 2024-07-01 at 00:00 UTC
            bucket_epoch_seconds: vec![1_719_619_200, 1_719_705_600, 1_719_792_000],
            channel_usages: vec![ChannelUsage {
                channel: 1,
                usages: vec![1.0, 2.0, 3.0],
            }],
        }
    }

    #[test]
    fn bucket_dates_are_utc_days() {
        let dates = sample().bucket_dates().expect("dates");
        assert_eq!(dates, vec![date!(2024 - 06 - 29), date!(2024 - 06 - 30), date!(2024 - 07 - 01)]);
    }

    #[test]
    fn retain_window_is_half_open() {
        let mut u = sample();
        u.retain_window(1_719_705_600, 1_719_792_000);
        assert_eq!(u.bucket_epoch_seconds, vec![1_719_705_600]);
        assert_eq!(u.channel_usages[0].usages, vec![2.0]);
    }
}
