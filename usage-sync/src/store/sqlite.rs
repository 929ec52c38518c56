use std::path::PathBuf;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    QueryBuilder, Row, Sqlite, SqlitePool,
};

use super::{
    csv_file::{parse_bucket, BUCKET_FORMAT},
    find_in_dir, remove_file, table_path, StoreError, UsageStore,
};
use crate::table::{Schema, UsageRow, UsageTable, TIME_BUCKET};

const EXTENSION: &str = "db";

// SQLite's default SQLITE_MAX_VARIABLE_NUMBER on older builds.
const MAX_BINDS_PER_STATEMENT: usize = 999;

/// One SQLite database per device, `{dir}/{name}.db`, holding a single table
/// also called `{name}`.
pub struct SqliteDirStore {
    dir: PathBuf,
}

impl SqliteDirStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        table_path(&self.dir, name, EXTENSION)
    }

    async fn open(&self, name: &str, create: bool) -> Result<SqlitePool, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(self.path_for(name)?)
            .create_if_missing(create);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(pool)
    }
}

// Primary result codes SQLITE_CORRUPT and SQLITE_NOTADB.
const SQLITE_CORRUPT: i32 = 11;
const SQLITE_NOTADB: i32 = 26;

/// Reclassify sqlite errors that mean the file itself is unusable.
fn classify_load_error(name: &str, e: StoreError) -> StoreError {
    let StoreError::Sqlx(sqlx::Error::Database(db)) = &e else {
        return e;
    };
    let primary = db
        .code()
        .and_then(|c| c.parse::<i32>().ok())
        .map(|c| c & 0xff);
    if matches!(primary, Some(SQLITE_CORRUPT | SQLITE_NOTADB)) {
        StoreError::Corrupt {
            name: name.to_string(),
            reason: db.message().to_string(),
        }
    } else {
        e
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn read_value(row: &SqliteRow, idx: usize) -> Result<Option<f64>, sqlx::Error> {
    match row.try_get::<Option<f64>, _>(idx) {
        Ok(v) => Ok(v),
        // Integer-typed columns written by other tools.
        Err(_) => row
            .try_get::<Option<i64>, _>(idx)
            .map(|v| v.map(|i| i as f64)),
    }
}

async fn read_table(pool: &SqlitePool, name: &str) -> Result<UsageTable, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        name: name.to_string(),
        reason,
    };

    let columns: Vec<String> =
        sqlx::query("SELECT name FROM pragma_table_info(?) ORDER BY cid")
            .bind(name)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(|row| row.get::<String, _>("name"))
            .collect();

    match columns.first() {
        None => return Err(corrupt(format!("table '{name}' not found"))),
        Some(first) if first != TIME_BUCKET => {
            return Err(corrupt(format!(
                "first column is '{first}', expected '{TIME_BUCKET}'"
            )))
        }
        Some(_) => {}
    }

    let schema = Schema::new(columns.iter().skip(1).cloned());
    let width = schema.width();
    let rows = sqlx::query(&format!(
        "SELECT * FROM {} ORDER BY rowid",
        quote_ident(name)
    ))
    .fetch_all(pool)
    .await?;

    let mut table = UsageTable::new(schema);
    for row in rows {
        let bucket: String = row.try_get(0).map_err(|e| corrupt(e.to_string()))?;
        let bucket = parse_bucket(&bucket).map_err(corrupt)?;
        let values = (1..=width)
            .map(|idx| read_value(&row, idx))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| corrupt(e.to_string()))?;
        table
            .push(UsageRow::new(bucket, values))
            .map_err(|e| corrupt(e.to_string()))?;
    }

    Ok(table)
}

async fn write_table(pool: &SqlitePool, name: &str, table: &UsageTable) -> Result<(), StoreError> {
    let ident = quote_ident(name);
    let header = table.schema().header();
    let column_list = header
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let column_defs = std::iter::once(format!("{} TEXT NOT NULL", quote_ident(TIME_BUCKET)))
        .chain(
            table
                .schema()
                .channels()
                .iter()
                .map(|c| format!("{} REAL", quote_ident(c))),
        )
        .collect::<Vec<_>>()
        .join(", ");

    let mut tx = pool.begin().await?;

    sqlx::query(&format!("DROP TABLE IF EXISTS {ident}"))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&format!("CREATE TABLE {ident} ({column_defs})"))
        .execute(&mut *tx)
        .await?;

    let rows_per_statement = (MAX_BINDS_PER_STATEMENT / header.len()).max(1);
    for chunk in table.rows().chunks(rows_per_statement) {
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("INSERT INTO {ident} ({column_list}) "));
        let mut format_error = None;
        builder.push_values(chunk, |mut b, row| {
            let bucket = match row.bucket.format(BUCKET_FORMAT) {
                Ok(s) => s,
                Err(e) => {
                    format_error = Some(e);
                    String::new()
                }
            };
            b.push_bind(bucket);
            for v in &row.values {
                b.push_bind(*v);
            }
        });
        if let Some(e) = format_error {
            return Err(StoreError::Io(std::io::Error::other(e)));
        }
        builder.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(())
}

#[async_trait::async_trait]
impl UsageStore for SqliteDirStore {
    async fn find(&self, client: &str) -> Result<Option<String>, StoreError> {
        find_in_dir(&self.dir, EXTENSION, client).await
    }

    async fn load(&self, name: &str) -> Result<UsageTable, StoreError> {
        if !tokio::fs::try_exists(self.path_for(name)?).await? {
            return Err(StoreError::Corrupt {
                name: name.to_string(),
                reason: "database file missing".to_string(),
            });
        }
        let pool = self
            .open(name, false)
            .await
            .map_err(|e| classify_load_error(name, e))?;
        let res = read_table(&pool, name).await;
        pool.close().await;
        res.map_err(|e| classify_load_error(name, e))
    }

    async fn save(&self, name: &str, table: &UsageTable) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let pool = self.open(name, true).await?;
        let res = write_table(&pool, name, table).await;
        pool.close().await;
        if res.is_ok() {
            tracing::debug!(table = name, rows = table.len(), "usage table written to sqlite");
        }
        res
    }

    async fn remove(&self, name: &str) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        remove_file(&path).await?;
        for suffix in ["-wal", "-shm", "-journal"] {
            remove_file(&PathBuf::from(format!("{}{suffix}", path.display()))).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn table(days: u8) -> UsageTable {
        let rows = (1..=days)
            .map(|d| {
                let bucket = time::Date::from_calendar_date(2024, time::Month::March, d)
                    .expect("date");
                UsageRow::new(bucket, vec![Some(f64::from(d) * 0.5), None, Some(1.0)])
            })
            .collect();
        UsageTable::from_rows(
            Schema::new(["1-Mains_A", "2-Mains_B", "4-AC-\"Kitchen\""]),
            rows,
        )
        .expect("table")
    }

    #[tokio::test]
    async fn save_then_load_preserves_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteDirStore::new(dir.path().join("db"));

        store.save("casa soto", &table(31)).await.expect("save");
        let loaded = store.load("casa soto").await.expect("load");

        assert_eq!(loaded, table(31));
        assert_eq!(loaded.first_bucket(), Some(date!(2024 - 03 - 01)));
        assert!(dir.path().join("db/casa soto.db").exists());
    }

    #[tokio::test]
    async fn save_replaces_previous_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteDirStore::new(dir.path());

        store.save("bodega", &table(10)).await.expect("save");
        store.save("bodega", &table(3)).await.expect("save again");

        let loaded = store.load("bodega").await.expect("load");
        assert_eq!(loaded.len(), 3);
    }

    #[tokio::test]
    async fn wide_tables_are_inserted_in_chunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteDirStore::new(dir.path());
        let channels: Vec<String> = (0..200).map(|i| format!("{i}-ch")).collect();
        let rows = (1..=28)
            .map(|d| {
                UsageRow::new(
                    time::Date::from_calendar_date(2024, time::Month::February, d).expect("date"),
                    vec![Some(1.0); 200],
                )
            })
            .collect();
        let wide = UsageTable::from_rows(Schema::new(channels), rows).expect("table");

        store.save("wide", &wide).await.expect("save");
        assert_eq!(store.load("wide").await.expect("load"), wide);
    }

    #[tokio::test]
    async fn missing_database_is_corrupt_and_remove_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteDirStore::new(dir.path());

        let res = store.load("ghost").await;
        assert!(matches!(res, Err(StoreError::Corrupt { .. })));

        store.remove("ghost").await.expect("remove");
    }

    #[tokio::test]
    async fn non_database_file_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("casa soto.db"),
            b"this is certainly not a sqlite database file, just some bytes",
        )
        .expect("write");
        let store = SqliteDirStore::new(dir.path());

        let res = store.load("casa soto").await;
        assert!(matches!(res, Err(StoreError::Corrupt { .. })), "{res:?}");
    }

    #[tokio::test]
    async fn find_matches_database_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteDirStore::new(dir.path());
        store.save("casa soto", &table(2)).await.expect("save");

        assert_eq!(store.find("SOTO").await.expect("find").as_deref(), Some("casa soto"));
        store.remove("casa soto").await.expect("remove");
        assert!(store.find("soto").await.expect("find").is_none());
    }
}
