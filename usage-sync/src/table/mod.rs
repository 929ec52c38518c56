use time::Date;

/// Name of the leading date column in every persisted usage table.
pub const TIME_BUCKET: &str = "Time Bucket";

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("schema mismatch: expected {expected:?}, found {found:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("row {bucket} has {found} values, schema has {expected} channels")]
    RowWidth {
        bucket: Date,
        expected: usize,
        found: usize,
    },
    #[error("bucket {next} does not follow {previous}")]
    OutOfOrder { previous: Date, next: Date },
    #[error("column '{0}' appears more than once")]
    DuplicateColumn(String),
}

/// Ordered channel columns of a usage table. The `Time Bucket` date column is
/// implicit and always comes first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    channels: Vec<String>,
}

impl Schema {
    pub fn new<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: channels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn width(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// First column name that is repeated, counting `Time Bucket`.
    pub fn first_duplicate(&self) -> Option<&str> {
        let header = self.header();
        header
            .iter()
            .enumerate()
            .find(|&(i, name)| header[..i].contains(name))
            .map(|(_, name)| *name)
    }

    /// Full header including the leading `Time Bucket` column.
    pub fn header(&self) -> Vec<&str> {
        std::iter::once(TIME_BUCKET)
            .chain(self.channels.iter().map(String::as_str))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsageRow {
    pub bucket: Date,
    pub values: Vec<Option<f64>>,
}

impl UsageRow {
    pub fn new(bucket: Date, values: Vec<Option<f64>>) -> Self {
        Self { bucket, values }
    }
}

/// Usage history for one device: rows strictly ascending by bucket, each as
/// wide as the schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageTable {
    schema: Schema,
    rows: Vec<UsageRow>,
}

impl UsageTable {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(schema: Schema, rows: Vec<UsageRow>) -> Result<Self, TableError> {
        if let Some(dup) = schema.first_duplicate() {
            return Err(TableError::DuplicateColumn(dup.to_string()));
        }
        let mut table = Self::new(schema);
        table.rows.reserve(rows.len());
        for row in rows {
            table.push(row)?;
        }
        Ok(table)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[UsageRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first_bucket(&self) -> Option<Date> {
        self.rows.first().map(|r| r.bucket)
    }

    pub fn last_bucket(&self) -> Option<Date> {
        self.rows.last().map(|r| r.bucket)
    }

    /// Append one row after the current last bucket.
    pub fn push(&mut self, row: UsageRow) -> Result<(), TableError> {
        if row.values.len() != self.schema.width() {
            return Err(TableError::RowWidth {
                bucket: row.bucket,
                expected: self.schema.width(),
                found: row.values.len(),
            });
        }
        if let Some(previous) = self.last_bucket() {
            if row.bucket <= previous {
                return Err(TableError::OutOfOrder {
                    previous,
                    next: row.bucket,
                });
            }
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn drop_last(&mut self) -> Option<UsageRow> {
        self.rows.pop()
    }

    /// Append `other`, replacing any rows at or after its first bucket.
    ///
    /// An empty table without channels adopts `other`'s schema; otherwise the
    /// schemas must be identical. Returns the number of rows taken from
    /// `other`.
    pub fn merge_tail(&mut self, other: UsageTable) -> Result<usize, TableError> {
        let Some(first) = other.first_bucket() else {
            return Ok(0);
        };

        if self.rows.is_empty() && self.schema.is_empty() {
            self.schema = other.schema;
        } else if self.schema != other.schema {
            return Err(TableError::SchemaMismatch {
                expected: self.schema.channels.clone(),
                found: other.schema.channels,
            });
        }

        self.rows.retain(|r| r.bucket < first);
        let appended = other.rows.len();
        self.rows.extend(other.rows);
        Ok(appended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn schema() -> Schema {
        Schema::new(["1-Mains_A", "2-Mains_B"])
    }

    fn row(bucket: Date, v: f64) -> UsageRow {
        UsageRow::new(bucket, vec![Some(v), None])
    }

    #[test]
    fn header_starts_with_time_bucket() {
        assert_eq!(schema().header(), vec![TIME_BUCKET, "1-Mains_A", "2-Mains_B"]);
    }

    #[test]
    fn push_rejects_out_of_order_and_duplicate_buckets() {
        let mut t = UsageTable::new(schema());
        t.push(row(date!(2024 - 01 - 02), 1.0)).expect("first row");

        let dup = t.push(row(date!(2024 - 01 - 02), 2.0));
        assert!(matches!(dup, Err(TableError::OutOfOrder { .. })));

        let earlier = t.push(row(date!(2024 - 01 - 01), 2.0));
        assert!(matches!(earlier, Err(TableError::OutOfOrder { .. })));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn from_rows_rejects_repeated_columns() {
        let res = UsageTable::from_rows(Schema::new(["1-Mains_A", "1-Mains_A"]), Vec::new());
        assert_eq!(res, Err(TableError::DuplicateColumn("1-Mains_A".to_string())));

        let res = UsageTable::from_rows(Schema::new([TIME_BUCKET]), Vec::new());
        assert!(matches!(res, Err(TableError::DuplicateColumn(_))));
    }

    #[test]
    fn push_rejects_wrong_width() {
        let mut t = UsageTable::new(schema());
        let res = t.push(UsageRow::new(date!(2024 - 01 - 01), vec![Some(1.0)]));
        assert!(matches!(
            res,
            Err(TableError::RowWidth {
                expected: 2,
                found: 1,
                ..
            })
        ));
    }

    #[test]
    fn merge_tail_replaces_overlapping_buckets() {
        let mut cached = UsageTable::from_rows(
            schema(),
            vec![
                row(date!(2024 - 06 - 28), 1.0),
                row(date!(2024 - 06 - 29), 1.0),
                row(date!(2024 - 06 - 30), 1.0),
            ],
        )
        .expect("cached");
        let fetched = UsageTable::from_rows(
            schema(),
            vec![row(date!(2024 - 06 - 29), 5.0), row(date!(2024 - 06 - 30), 6.0)],
        )
        .expect("fetched");

        let appended = cached.merge_tail(fetched).expect("merge");
        assert_eq!(appended, 2);
        assert_eq!(cached.len(), 3);
        assert_eq!(cached.rows()[1].values[0], Some(5.0));
        assert_eq!(cached.last_bucket(), Some(date!(2024 - 06 - 30)));
    }

    #[test]
    fn merge_tail_into_blank_table_adopts_schema() {
        let mut t = UsageTable::default();
        let fetched =
            UsageTable::from_rows(schema(), vec![row(date!(2024 - 01 - 01), 1.0)]).expect("fetched");
        t.merge_tail(fetched).expect("merge");
        assert_eq!(t.schema(), &schema());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn merge_tail_rejects_schema_change() {
        let mut cached =
            UsageTable::from_rows(schema(), vec![row(date!(2024 - 01 - 01), 1.0)]).expect("cached");
        let other = UsageTable::from_rows(
            Schema::new(["1-Mains_A", "4-AC-Kitchen"]),
            vec![row(date!(2024 - 01 - 02), 1.0)],
        )
        .expect("other");

        let res = cached.merge_tail(other);
        assert!(matches!(res, Err(TableError::SchemaMismatch { .. })));
        assert_eq!(cached.len(), 1);
    }

    #[test]
    fn merge_tail_with_empty_table_is_noop() {
        let mut cached =
            UsageTable::from_rows(schema(), vec![row(date!(2024 - 01 - 01), 1.0)]).expect("cached");
        let appended = cached
            .merge_tail(UsageTable::new(Schema::new(["other"])))
            .expect("merge");
        assert_eq!(appended, 0);
        assert_eq!(cached.len(), 1);
    }
}
