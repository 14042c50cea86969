//! Read-only histogram template store.
//!
//! The store is a Parquet table with one row per histogram:
//!
//! | Column        | Type            | Description                                   |
//! |---------------|-----------------|-----------------------------------------------|
//! | `key`         | `Utf8`          | composite key, see [`TemplateKey`]            |
//! | `bin_edges`   | `List<Float64>` | `n_bins + 1` edges                            |
//! | `bin_content` | `List<Float64>` | `n_bins + 2` cells (underflow, bins, overflow)|

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Float64Array, Float64Builder, ListBuilder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use ff_core::{Channel, Error, Histogram, Result};

use crate::parquet_io::{read_parquet, write_parquet};

/// Composite template key:
/// `#<ch>#<ch>_<category>#<process>#<analysis>#Run<era>#<expression>#<mass>#`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateKey<'a> {
    /// Channel.
    pub channel: Channel,
    /// Category name (without the channel prefix).
    pub category: &'a str,
    /// Process label, e.g. `data_obs` or `TTJ`.
    pub process: &'a str,
    /// Analysis tag.
    pub analysis: &'a str,
    /// Data-taking era, e.g. `2016`.
    pub era: &'a str,
    /// Observable expression the templates are binned in.
    pub expression: &'a str,
    /// Mass hypothesis.
    pub mass: &'a str,
}

impl<'a> TemplateKey<'a> {
    /// Key with the standard analysis tag and mass hypothesis.
    pub fn new(
        channel: Channel,
        category: &'a str,
        process: &'a str,
        era: &'a str,
        expression: &'a str,
    ) -> Self {
        Self { channel, category, process, analysis: "smhtt", era, expression, mass: "125" }
    }

    /// Render the key string.
    pub fn render(&self) -> String {
        format!(
            "#{ch}#{ch}_{cat}#{proc}#{ana}#Run{era}#{expr}#{mass}#",
            ch = self.channel.as_str(),
            cat = self.category,
            proc = self.process,
            ana = self.analysis,
            era = self.era,
            expr = self.expression,
            mass = self.mass,
        )
    }
}

/// In-memory histogram store loaded from one archive.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    histograms: HashMap<String, Histogram>,
}

impl TemplateStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every histogram of a Parquet archive.
    pub fn open(path: &Path) -> Result<Self> {
        let contents = read_parquet(path).map_err(|e| {
            Error::Config(format!("cannot open template archive {}: {e}", path.display()))
        })?;
        let mut store = Self::new();
        for batch in &contents.batches {
            store.extend_from_batch(batch)?;
        }
        tracing::debug!(path = %path.display(), histograms = store.len(), "template store loaded");
        Ok(store)
    }

    /// Insert (or replace) a histogram under `key`.
    pub fn insert(&mut self, key: impl Into<String>, histogram: Histogram) {
        self.histograms.insert(key.into(), histogram);
    }

    /// Look up a histogram; a missing key is an error.
    pub fn get(&self, key: &str) -> Result<&Histogram> {
        self.histograms.get(key).ok_or_else(|| Error::MissingHistogram(key.to_string()))
    }

    /// Number of histograms.
    pub fn len(&self) -> usize {
        self.histograms.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.histograms.is_empty()
    }

    /// Write the store as a Parquet archive, rows sorted by key.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut keys: Vec<&String> = self.histograms.keys().collect();
        keys.sort();

        let mut key_builder = StringBuilder::new();
        let mut edges_builder = ListBuilder::new(Float64Builder::new());
        let mut content_builder = ListBuilder::new(Float64Builder::new());
        for key in keys {
            let h = &self.histograms[key];
            key_builder.append_value(key);
            edges_builder.values().append_slice(&h.bin_edges);
            edges_builder.append(true);
            content_builder.values().append_slice(&h.bin_content);
            content_builder.append(true);
        }

        let list_f64 = DataType::List(Arc::new(Field::new_list_field(DataType::Float64, true)));
        let schema = Arc::new(Schema::new(vec![
            Field::new("key", DataType::Utf8, false),
            Field::new("bin_edges", list_f64.clone(), false),
            Field::new("bin_content", list_f64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(key_builder.finish()) as ArrayRef,
                Arc::new(edges_builder.finish()) as ArrayRef,
                Arc::new(content_builder.finish()) as ArrayRef,
            ],
        )?;
        write_parquet(path, &[batch], &BTreeMap::new())
    }

    fn extend_from_batch(&mut self, batch: &RecordBatch) -> Result<()> {
        let column = |name: &str| {
            batch.column_by_name(name).ok_or_else(|| Error::MissingField {
                field: name.to_string(),
                table: "template archive".into(),
            })
        };
        let keys = column("key")?;
        let edges = column("bin_edges")?;
        let contents = column("bin_content")?;
        if !matches!(keys.data_type(), DataType::Utf8)
            || !matches!(edges.data_type(), DataType::List(_))
            || !matches!(contents.data_type(), DataType::List(_))
        {
            return Err(Error::Validation(
                "template archive columns must be key: Utf8, bin_edges/bin_content: List<Float64>"
                    .into(),
            ));
        }
        let keys = keys.as_string::<i32>();
        let edges = edges.as_list::<i32>();
        let contents = contents.as_list::<i32>();

        for row in 0..batch.num_rows() {
            let key = keys.value(row).to_string();
            let h = Histogram::from_cells(
                key.clone(),
                list_values(&edges.value(row), &key)?,
                list_values(&contents.value(row), &key)?,
            )?;
            self.histograms.insert(key, h);
        }
        Ok(())
    }
}

fn list_values(values: &ArrayRef, key: &str) -> Result<Vec<f64>> {
    let arr = values.as_any().downcast_ref::<Float64Array>().ok_or_else(|| {
        Error::Validation(format!("histogram '{key}': expected Float64 values, got {}", values.data_type()))
    })?;
    if arr.null_count() > 0 {
        return Err(Error::Validation(format!("histogram '{key}': null bin values")));
    }
    Ok(arr.values().to_vec())
}
