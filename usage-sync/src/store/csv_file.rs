use std::path::{Path, PathBuf};

use csv::StringRecord;
use time::{format_description::FormatItem, macros::format_description, Date};

use super::{find_in_dir, remove_file, table_path, StoreError, UsageStore};
use crate::table::{Schema, UsageRow, UsageTable, TIME_BUCKET};

pub(crate) const BUCKET_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

const EXTENSION: &str = "csv";

/// One CSV file per device under a directory: `{dir}/{name}.csv`.
///
/// Layout:
/// - header `Time Bucket,<channel>,...`
/// - bucket dates as `YYYY-MM-DD`
/// - missing values as empty cells
pub struct CsvDirStore {
    dir: PathBuf,
}

impl CsvDirStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        table_path(&self.dir, name, EXTENSION)
    }
}

pub(crate) fn parse_bucket(s: &str) -> Result<Date, String> {
    Date::parse(s.trim(), BUCKET_FORMAT).map_err(|e| format!("invalid bucket '{s}': {e}"))
}

fn parse_optional_f64(s: &str) -> Result<Option<f64>, String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        trimmed
            .parse()
            .map(Some)
            .map_err(|e| format!("invalid value '{trimmed}': {e}"))
    }
}

fn record_to_row(record: &StringRecord, width: usize) -> Result<UsageRow, String> {
    let bucket = parse_bucket(record.get(0).unwrap_or(""))?;
    if record.len() != width + 1 {
        return Err(format!(
            "row {bucket} has {} cells, header has {}",
            record.len(),
            width + 1
        ));
    }
    let values = record
        .iter()
        .skip(1)
        .map(parse_optional_f64)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(UsageRow::new(bucket, values))
}

fn read_table(path: &Path, name: &str) -> Result<UsageTable, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        name: name.to_string(),
        reason,
    };

    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = match rdr.headers() {
        Ok(headers) => headers.clone(),
        Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => return Err(e.into()),
        Err(e) => return Err(corrupt(e.to_string())),
    };
    if headers.get(0) != Some(TIME_BUCKET) {
        return Err(corrupt(format!(
            "first column is {:?}, expected '{TIME_BUCKET}'",
            headers.get(0)
        )));
    }

    let schema = Schema::new(headers.iter().skip(1));
    if let Some(dup) = schema.first_duplicate() {
        return Err(corrupt(format!("column '{dup}' appears more than once")));
    }
    let width = schema.width();
    let mut table = UsageTable::new(schema);
    for result in rdr.records() {
        let record = result.map_err(|e| corrupt(e.to_string()))?;
        let row = record_to_row(&record, width).map_err(corrupt)?;
        table.push(row).map_err(|e| corrupt(e.to_string()))?;
    }

    Ok(table)
}

fn write_table(path: &Path, table: &UsageTable) -> Result<(), StoreError> {
    let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
    let res = write_records(&tmp, table).and_then(|()| Ok(std::fs::rename(&tmp, path)?));
    if res.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    res
}

fn write_records(tmp: &Path, table: &UsageTable) -> Result<(), StoreError> {
    {
        let mut wtr = csv::Writer::from_path(&tmp)?;
        wtr.write_record(table.schema().header())?;
        for row in table.rows() {
            let mut record = Vec::with_capacity(row.values.len() + 1);
            record.push(
                row.bucket
                    .format(BUCKET_FORMAT)
                    .map_err(|e| StoreError::Io(std::io::Error::other(e)))?,
            );
            record.extend(
                row.values
                    .iter()
                    .map(|v| v.map(|x| x.to_string()).unwrap_or_default()),
            );
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl UsageStore for CsvDirStore {
    async fn find(&self, client: &str) -> Result<Option<String>, StoreError> {
        find_in_dir(&self.dir, EXTENSION, client).await
    }

    async fn load(&self, name: &str) -> Result<UsageTable, StoreError> {
        let path = self.path_for(name)?;
        read_table(&path, name)
    }

    async fn save(&self, name: &str, table: &UsageTable) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        write_table(&path, table)?;
        tracing::debug!(path = %path.display(), rows = table.len(), "usage table written");
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), StoreError> {
        remove_file(&self.path_for(name)?).await
    }
}
