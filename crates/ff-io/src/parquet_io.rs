//! Parquet file read/write for histogram and event tables.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;

use ff_core::Result;

/// Batches plus file-level key/value metadata of one Parquet file.
pub struct ParquetContents {
    /// Arrow schema of the file, present even when it holds no rows.
    pub schema: SchemaRef,
    /// Record batches in file order.
    pub batches: Vec<RecordBatch>,
    /// Key/value metadata (file footer and Arrow schema metadata merged).
    pub metadata: BTreeMap<String, String>,
}

/// Read a Parquet file into Arrow RecordBatches and its metadata.
pub fn read_parquet(path: &Path) -> Result<ParquetContents> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    let mut metadata: BTreeMap<String, String> = builder
        .schema()
        .metadata()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if let Some(kv) = builder.metadata().file_metadata().key_value_metadata() {
        for entry in kv {
            if entry.key == "ARROW:schema" {
                continue;
            }
            if let Some(v) = &entry.value {
                metadata.insert(entry.key.clone(), v.clone());
            }
        }
    }

    let schema = builder.schema().clone();
    let reader = builder.build()?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ParquetContents { schema, batches, metadata })
}

/// Write Arrow RecordBatches to a Parquet file with extra footer metadata.
pub fn write_parquet(
    path: &Path,
    batches: &[RecordBatch],
    metadata: &BTreeMap<String, String>,
) -> Result<()> {
    let Some(first) = batches.first() else {
        return Ok(());
    };

    let kv: Vec<KeyValue> =
        metadata.iter().map(|(k, v)| KeyValue::new(k.clone(), v.clone())).collect();
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_key_value_metadata(if kv.is_empty() { None } else { Some(kv) })
        .build();

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, first.schema(), Some(props))?;
    for batch in batches {
        writer.write(batch)?;
    }
    writer.close()?;
    Ok(())
}

/// A file written under a temporary `.partial` name and moved into place on commit.
///
/// Dropping an uncommitted `PartialFile` removes the temporary file, so a
/// failing writer never leaves a truncated output behind.
pub struct PartialFile {
    target: PathBuf,
    temp: PathBuf,
    committed: bool,
}

impl PartialFile {
    /// Reserve `target`; nothing is created until the caller writes to [`Self::path`].
    pub fn new(target: impl Into<PathBuf>) -> Self {
        let target = target.into();
        let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".partial");
        let temp = target.with_file_name(name);
        Self { target, temp, committed: false }
    }

    /// Path to write to.
    pub fn path(&self) -> &Path {
        &self.temp
    }

    /// Final location.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Move the temporary file to its final location.
    pub fn commit(mut self) -> Result<PathBuf> {
        std::fs::rename(&self.temp, &self.target)?;
        self.committed = true;
        Ok(self.target.clone())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed && self.temp.exists() {
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}
