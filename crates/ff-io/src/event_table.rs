//! Column-oriented event tables.
//!
//! Every numeric column is materialized as `Vec<f64>`, regardless of its
//! on-disk Arrow type. Columns that cannot be read as numbers (strings,
//! nulls) are kept aside by name and only fail a lookup that asks for them.
//! A friend table is joined purely by row position: it must have the same
//! number of rows, and columns of the primary table take precedence over
//! same-named friend columns.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Float64Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Schema};
use arrow::record_batch::RecordBatch;

use ff_core::{Error, Result};

use crate::parquet_io::{read_parquet, write_parquet};

/// An in-memory event table.
#[derive(Debug, Clone)]
pub struct EventTable {
    source: String,
    n_rows: usize,
    columns: Vec<(String, Vec<f64>)>,
    index: HashMap<String, usize>,
    unreadable: BTreeMap<String, String>,
    metadata: BTreeMap<String, String>,
}

impl EventTable {
    /// Build a table from named columns of equal length.
    pub fn from_columns(
        source: impl Into<String>,
        columns: Vec<(String, Vec<f64>)>,
    ) -> Result<Self> {
        let source = source.into();
        let n_rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut index = HashMap::with_capacity(columns.len());
        for (i, (name, values)) in columns.iter().enumerate() {
            if values.len() != n_rows {
                return Err(Error::Validation(format!(
                    "{source}: column '{name}' has {} rows, expected {n_rows}",
                    values.len()
                )));
            }
            if index.insert(name.clone(), i).is_some() {
                return Err(Error::Validation(format!("{source}: duplicate column '{name}'")));
            }
        }
        Ok(Self {
            source,
            n_rows,
            columns,
            index,
            unreadable: BTreeMap::new(),
            metadata: BTreeMap::new(),
        })
    }

    /// Attach a key/value metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Read a Parquet file, converting every numeric column to `f64`.
    ///
    /// The column list comes from the file schema, so a file without rows
    /// still exposes its columns.
    pub fn read_parquet(path: &Path) -> Result<Self> {
        let source = path.display().to_string();
        let contents = read_parquet(path)?;
        let n_rows: usize = contents.batches.iter().map(RecordBatch::num_rows).sum();

        let mut columns: Vec<(String, Vec<f64>)> = Vec::new();
        let mut unreadable = BTreeMap::new();
        for field in contents.schema.fields() {
            let name = field.name();
            match read_f64_column(field.data_type(), name, &contents.batches, n_rows) {
                Ok(values) => columns.push((name.clone(), values)),
                Err(why) => {
                    tracing::debug!(table = %source, column = %name, reason = %why, "column not numeric");
                    unreadable.insert(name.clone(), why);
                }
            }
        }

        let mut table = Self::from_columns(source, columns)?;
        table.n_rows = n_rows;
        table.unreadable = unreadable;
        table.metadata = contents.metadata;
        Ok(table)
    }

    /// Write the table to Parquet as `Float64` columns in insertion order.
    pub fn write_parquet(&self, path: &Path) -> Result<()> {
        let fields: Vec<Field> =
            self.columns.iter().map(|(n, _)| Field::new(n, DataType::Float64, false)).collect();
        let schema = Arc::new(Schema::new(fields));
        let arrays: Vec<ArrayRef> = self
            .columns
            .iter()
            .map(|(_, v)| Arc::new(Float64Array::from(v.clone())) as ArrayRef)
            .collect();
        let batch = RecordBatch::try_new(schema, arrays)?;
        write_parquet(path, &[batch], &self.metadata)
    }

    /// Join `friend` by row position.
    pub fn join_friend(mut self, friend: EventTable) -> Result<Self> {
        if friend.n_rows != self.n_rows {
            return Err(Error::Validation(format!(
                "friend table {} has {} rows, primary {} has {}",
                friend.source, friend.n_rows, self.source, self.n_rows
            )));
        }
        for (name, values) in friend.columns {
            if self.index.contains_key(&name) || self.unreadable.contains_key(&name) {
                continue;
            }
            self.index.insert(name.clone(), self.columns.len());
            self.columns.push((name, values));
        }
        for (name, why) in friend.unreadable {
            if !self.index.contains_key(&name) {
                self.unreadable.entry(name).or_insert(why);
            }
        }
        for (k, v) in friend.metadata {
            self.metadata.entry(k).or_insert(v);
        }
        Ok(self)
    }

    /// Where the table came from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    /// A required column.
    ///
    /// A column present on disk but not readable as numbers is a malformed field.
    pub fn column(&self, name: &str) -> Result<&[f64]> {
        if let Some(&i) = self.index.get(name) {
            return Ok(self.columns[i].1.as_slice());
        }
        match self.unreadable.get(name) {
            Some(why) => Err(Error::Validation(format!(
                "{}: field '{name}' is malformed ({why})",
                self.source
            ))),
            None => Err(Error::MissingField { field: name.to_string(), table: self.source.clone() }),
        }
    }

    /// A metadata entry.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// Concatenate column `name` of every batch as `f64`, or say why it cannot be.
fn read_f64_column(
    data_type: &DataType,
    name: &str,
    batches: &[RecordBatch],
    n_rows: usize,
) -> std::result::Result<Vec<f64>, String> {
    if !data_type.is_numeric() && !matches!(data_type, DataType::Boolean) {
        return Err(format!("non-numeric type {data_type}"));
    }
    let mut out = Vec::with_capacity(n_rows);
    for batch in batches {
        let array: &ArrayRef =
            batch.column_by_name(name).ok_or_else(|| "absent from a record batch".to_string())?;
        if array.null_count() > 0 {
            return Err(format!("{} null values", array.null_count()));
        }
        let converted = cast(array, &DataType::Float64).map_err(|e| e.to_string())?;
        out.extend_from_slice(converted.as_primitive::<Float64Type>().values());
    }
    Ok(out)
}
