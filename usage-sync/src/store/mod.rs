pub mod csv_file;
pub mod sqlite;

pub use csv_file::CsvDirStore;
pub use sqlite::SqliteDirStore;

use std::path::{Path, PathBuf};

use crate::table::UsageTable;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("persisted table '{name}' is corrupt: {reason}")]
    Corrupt { name: String, reason: String },
    #[error("invalid table name '{0}'")]
    InvalidName(String),
}

/// Named usage tables kept on the local filesystem, one per device.
#[async_trait::async_trait]
pub trait UsageStore: Send + Sync {
    /// Name of the persisted table whose name contains `client`
    /// (case-insensitive), if any.
    async fn find(&self, client: &str) -> Result<Option<String>, StoreError>;

    async fn load(&self, name: &str) -> Result<UsageTable, StoreError>;

    /// Replace the table stored under `name`.
    async fn save(&self, name: &str, table: &UsageTable) -> Result<(), StoreError>;

    async fn remove(&self, name: &str) -> Result<(), StoreError>;
}

/// Storage key for a device: its lowercased name.
pub fn table_name(device_name: &str) -> String {
    device_name.trim().to_lowercase()
}

fn checked_name(name: &str) -> Result<&str, StoreError> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        Err(StoreError::InvalidName(name.to_string()))
    } else {
        Ok(name)
    }
}

fn table_path(dir: &Path, name: &str, extension: &str) -> Result<PathBuf, StoreError> {
    Ok(dir.join(format!("{}.{extension}", checked_name(name)?)))
}

/// Scan `dir` for `*.{extension}` files whose stem contains `client`.
///
/// A missing directory means nothing is persisted yet.
async fn find_in_dir(
    dir: &Path,
    extension: &str,
    client: &str,
) -> Result<Option<String>, StoreError> {
    let needle = client.to_lowercase();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut matches = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem.to_lowercase().contains(&needle) {
            matches.push(stem.to_string());
        }
    }

    matches.sort();
    if matches.len() > 1 {
        tracing::warn!(
            client,
            candidates = ?matches,
            "several persisted tables match client, using the first"
        );
    }

    Ok(matches.into_iter().next())
}

async fn remove_file(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
