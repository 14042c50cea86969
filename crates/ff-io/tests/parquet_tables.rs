//! Integration tests: template archives and event tables on disk.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use approx::assert_relative_eq;
use arrow::array::{ArrayRef, Float32Array, Float64Array, Int32Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use ff_core::{Channel, Error, Histogram};
use ff_io::parquet_io::write_parquet;
use ff_io::{EventTable, TemplateKey, TemplateStore};

fn tmp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let p = std::env::temp_dir().join(format!("ff_io_it_{}_{}_{}", std::process::id(), nanos, name));
    std::fs::create_dir_all(&p).unwrap();
    p
}

#[test]
fn template_archive_keeps_flow_cells() {
    let dir = tmp_dir("templates");
    let path = dir.join("2016_ff_yields.parquet");

    let key = TemplateKey::new(Channel::Et, "w", "data_obs", "2016", "m_vis").render();
    let h = Histogram::from_cells("data", vec![0.0, 50.0, 100.0], vec![1.0, 10.0, 20.0, 3.0])
        .unwrap();
    let mut store = TemplateStore::new();
    store.insert(key.clone(), h);
    store.write(&path).unwrap();

    let loaded = TemplateStore::open(&path).unwrap();
    assert_eq!(loaded.len(), 1);
    let got = loaded.get(&key).unwrap();
    assert_eq!(got.bin_edges, vec![0.0, 50.0, 100.0]);
    assert_eq!(got.bin_content, vec![1.0, 10.0, 20.0, 3.0]);
    assert!(matches!(loaded.get("#et#et_w#W#smhtt#Run2016#m_vis#125#"), Err(Error::MissingHistogram(_))));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn unopenable_template_archive_is_error() {
    let dir = tmp_dir("templates_missing");
    let err = TemplateStore::open(&dir.join("nope.parquet")).unwrap_err();
    assert!(err.to_string().contains("cannot open template archive"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn event_table_casts_numeric_columns_and_keeps_metadata() {
    let dir = tmp_dir("events");
    let path = dir.join("events.parquet");

    let schema = Arc::new(Schema::new(vec![
        Field::new("njets", DataType::Int32, false),
        Field::new("pt_2", DataType::Float32, false),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int32Array::from(vec![0, 2, 1])) as ArrayRef,
            Arc::new(Float32Array::from(vec![25.5f32, 40.25, 61.0])) as ArrayRef,
        ],
    )
    .unwrap();
    let mut meta = BTreeMap::new();
    meta.insert("mt_max_index.classes".to_string(), "ggh,qqh".to_string());
    write_parquet(&path, &[batch], &meta).unwrap();

    let t = EventTable::read_parquet(&path).unwrap();
    assert_eq!(t.n_rows(), 3);
    assert_eq!(t.column("njets").unwrap(), &[0.0, 2.0, 1.0]);
    assert_relative_eq!(t.column("pt_2").unwrap()[1], 40.25);
    assert_eq!(t.metadata("mt_max_index.classes"), Some("ggh,qqh"));
    assert_eq!(t.column_names().collect::<Vec<_>>(), ["njets", "pt_2"]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn written_table_reads_back_in_row_order() {
    let dir = tmp_dir("events_out");
    let path = dir.join("out.parquet");
    let values: Vec<f64> = (0..1000).map(|i| i as f64 * 0.5).collect();
    let t = EventTable::from_columns("mem", vec![("ff2_nom".into(), values.clone())])
        .unwrap()
        .with_metadata("tree", "mt_nominal/ntuple");
    t.write_parquet(&path).unwrap();

    let back = EventTable::read_parquet(&path).unwrap();
    assert_eq!(back.column("ff2_nom").unwrap(), values.as_slice());
    assert_eq!(back.metadata("tree"), Some("mt_nominal/ntuple"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn zero_row_table_keeps_schema_columns() {
    let dir = tmp_dir("events_empty");
    let path = dir.join("empty.parquet");
    EventTable::from_columns(
        "mem",
        vec![("pt_2".into(), Vec::new()), ("mt_max_index".into(), Vec::new())],
    )
    .unwrap()
    .write_parquet(&path)
    .unwrap();

    let t = EventTable::read_parquet(&path).unwrap();
    assert_eq!(t.n_rows(), 0);
    assert_eq!(t.column_names().collect::<Vec<_>>(), ["pt_2", "mt_max_index"]);
    assert!(t.column("pt_2").unwrap().is_empty());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn text_column_only_fails_when_requested() {
    let dir = tmp_dir("events_text");
    let path = dir.join("labelled.parquet");
    let schema = Arc::new(Schema::new(vec![
        Field::new("pt_2", DataType::Float64, false),
        Field::new("sample", DataType::Utf8, false),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Float64Array::from(vec![30.0, 45.0])) as ArrayRef,
            Arc::new(StringArray::from(vec!["SingleMuon", "SingleMuon"])) as ArrayRef,
        ],
    )
    .unwrap();
    write_parquet(&path, &[batch], &BTreeMap::new()).unwrap();

    let t = EventTable::read_parquet(&path).unwrap();
    assert_eq!(t.n_rows(), 2);
    assert_eq!(t.column("pt_2").unwrap(), &[30.0, 45.0]);
    assert_eq!(t.column_names().collect::<Vec<_>>(), ["pt_2"]);
    let err = t.column("sample").unwrap_err();
    assert!(err.to_string().contains("field 'sample' is malformed"), "{err}");

    // The text column rides along through a friend join without failing it.
    let primary = EventTable::from_columns("p", vec![("njets".into(), vec![0.0, 1.0])]).unwrap();
    let joined = primary.join_friend(t).unwrap();
    assert_eq!(joined.column("pt_2").unwrap(), &[30.0, 45.0]);
    assert!(joined.column("sample").unwrap_err().to_string().contains("malformed"));
    assert!(matches!(joined.column("m_vis"), Err(Error::MissingField { .. })));

    let _ = std::fs::remove_dir_all(&dir);
}
