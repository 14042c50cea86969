//! Integration test: templates, archives and event tables on disk through
//! discovery, fraction computation and the worker pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use approx::assert_abs_diff_eq;
use serde_json::json;

use ff_compute::{
    AugmentationWorker, Dispatcher, FakeFactorFunction, FractionEngine, RunPaths, TracingSink,
    discover_inputs, load_analysis_config, prepare_output_dir,
};
use ff_core::{
    CategoryScheme, Channel, FeatureSchema, FractionGroup, Histogram, ProcessGroups,
    SystematicSource,
};
use ff_io::{EventTable, TemplateKey, TemplateStore};

fn tmp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let p = std::env::temp_dir().join(format!("ff_e2e_{}_{}_{}", std::process::id(), nanos, name));
    std::fs::create_dir_all(&p).unwrap();
    p
}

/// Every cell: data 100, W 20, TTJ 10, ZJ 10, ZTT 20, everything else 0.
fn write_templates(path: &Path) {
    let mut store = TemplateStore::new();
    for channel in [Channel::Mt, Channel::Tt] {
        let scheme = CategoryScheme::default_for(channel);
        let groups = ProcessGroups::default_for(channel);
        for (_, category) in scheme.iter() {
            for (group, processes) in groups.iter() {
                if group == FractionGroup::Qcd {
                    continue;
                }
                for process in processes {
                    let content = match process.as_str() {
                        "data_obs" => 100.0,
                        "W" | "ZTT" => 20.0,
                        "TTJ" | "ZJ" => 10.0,
                        _ => 0.0,
                    };
                    let h = Histogram::from_cells(
                        process.as_str(),
                        vec![0.0, 0.5, 1.0],
                        vec![content; 4],
                    )
                    .unwrap();
                    let key = TemplateKey::new(channel, category, process, "2016", "score");
                    store.insert(key.render(), h);
                }
            }
        }
    }
    store.write(path).unwrap();
}

/// Flat components; the mt QCD component explodes above m_vis = 200.
fn write_archive(path: &Path, channel: Channel) {
    let processes: Vec<(&str, f64)> = if channel.is_lepton_tau() {
        vec![("qcd", 0.2), ("w", 0.1), ("tt", 0.05)]
    } else {
        vec![("qcd", 0.2), ("w", 0.1), ("tt", 0.05), ("dy", 0.1)]
    };
    let components: Vec<serde_json::Value> = processes
        .iter()
        .map(|&(p, base)| {
            let bins: Vec<serde_json::Value> = [(0, 0), (0, 1), (1, 0), (1, 1)]
                .iter()
                .map(|&(dm, nj)| {
                    json!({"decay_mode": dm, "njets": nj, "values": [base], "stat_errors": [0.1 * base]})
                })
                .collect();
            let corrections = if p == "qcd" && channel.is_lepton_tau() {
                json!([{"input": "mvis", "edges": [0.0, 200.0, 1000.0], "values": [1.0, 1e5]}])
            } else {
                json!([])
            };
            json!({"process": p, "syst": 0.1, "pt_edges": [20.0, 200.0], "bins": bins, "corrections": corrections})
        })
        .collect();
    let shifts: Vec<String> =
        SystematicSource::for_channel(channel).iter().map(|s| s.name()).collect();
    let doc = json!({
        "name": "ff_comb",
        "channel": channel,
        "inputs": FeatureSchema::archive_inputs(channel),
        "shifts": shifts,
        "components": components,
        "frac_syst": {"w": 0.1, "tt": 0.1, "dy": 0.1},
    });
    std::fs::write(path, serde_json::to_string_pretty(&doc).unwrap()).unwrap();
}

fn write_table(root: &Path, entry: &str, columns: Vec<(&str, Vec<f64>)>) {
    let dir = root.join(entry);
    std::fs::create_dir_all(&dir).unwrap();
    EventTable::from_columns(entry, columns.into_iter().map(|(n, v)| (n.to_string(), v)).collect())
        .unwrap()
        .write_parquet(&dir.join(format!("{entry}.parquet")))
        .unwrap();
}

#[test]
fn full_run_writes_bounded_friend_tables() {
    let root = tmp_dir("full");
    let templates = root.join("2016_ff_yields.parquet");
    write_templates(&templates);
    write_archive(&root.join("ff_mt.json"), Channel::Mt);
    write_archive(&root.join("ff_tt.json"), Channel::Tt);
    let outputdir = root.join("friends_out");
    std::fs::write(
        root.join("config.yaml"),
        format!(
            "smhtt2016:\n  outputdir: {}\n  mt: {{ expression: score }}\n  tt: {{ expression: score }}\n",
            outputdir.display()
        ),
    )
    .unwrap();

    let mut paths = RunPaths { directory: root.join("ntuples"), ..RunPaths::default() };
    for ch in [Channel::Mt, Channel::Tt] {
        paths.friend_directories.insert(ch, root.join(format!("friends_{ch}")));
        paths.fake_factor_files.insert(ch, root.join(format!("ff_{ch}.json")));
    }

    write_table(
        &paths.directory,
        "SingleMuon_Run2016B",
        vec![
            ("pt_2", vec![30.0, 45.0, 60.0]),
            ("decayMode_2", vec![0.0, 1.0, 10.0]),
            ("njets", vec![0.0, 1.0, 2.0]),
            ("m_vis", vec![80.0, 500.0, 90.0]),
            ("mt_1", vec![10.0, 20.0, 30.0]),
            ("iso_1", vec![0.01, 0.02, 0.03]),
            ("score", vec![0.2, 0.7, 1.5]),
        ],
    );
    write_table(&paths.friend_directories[&Channel::Mt], "SingleMuon_Run2016B", vec![
        ("mt_max_index", vec![0.0, 4.0, 7.0]),
    ]);
    write_table(
        &paths.directory,
        "Tau_Run2016B",
        vec![
            ("pt_1", vec![50.0, 60.0]),
            ("pt_2", vec![40.0, 45.0]),
            ("decayMode_1", vec![0.0, 1.0]),
            ("decayMode_2", vec![1.0, 0.0]),
            ("njets", vec![0.0, 3.0]),
            ("m_vis", vec![100.0, 120.0]),
            ("score", vec![0.3, 0.9]),
        ],
    );
    write_table(&paths.friend_directories[&Channel::Tt], "Tau_Run2016B", vec![
        ("tt_max_index", vec![0.0, 4.0]),
    ]);

    let config = load_analysis_config(&root.join("config.yaml"), "smhtt2016").unwrap();
    paths.output_directory = config.outputdir.clone();
    let inputs = discover_inputs(&paths, "2016").unwrap();
    assert_eq!(inputs.len(), 2);

    let sink = Arc::new(TracingSink::new());
    let store = TemplateStore::open(&templates).unwrap();
    let specs = vec![
        config.channel_spec(Channel::Mt).unwrap(),
        config.channel_spec(Channel::Tt).unwrap(),
    ];
    let fractions = FractionEngine::new(&store, "2016", sink.as_ref()).compute(&specs).unwrap();
    assert_eq!(sink.rescaled(), 0);

    let mut worker = AugmentationWorker::new(Arc::new(fractions), paths.clone(), sink.clone());
    for ch in [Channel::Mt, Channel::Tt] {
        let f = FakeFactorFunction::load(paths.fake_factor_file(ch).unwrap(), ch).unwrap();
        worker = worker.with_channel(ch, "score", Arc::new(f));
    }
    prepare_output_dir(&paths.output_directory).unwrap();
    let summary = Dispatcher::new(4).run(&worker, &inputs).unwrap();
    assert_eq!(summary.rows(), 5);

    // mt: QCD 0.4, W 0.3, TT 0.1.
    let mt = EventTable::read_parquet(&outputdir.join("SingleMuon_Run2016B/SingleMuon_Run2016B.parquet"))
        .unwrap();
    assert_eq!(mt.metadata("tree"), Some("mt_nominal/ntuple"));
    assert_eq!(mt.n_rows(), 3);
    let nom = mt.column("ff2_nom").unwrap();
    assert_abs_diff_eq!(nom[0], 0.4 * 0.2 + 0.3 * 0.1 + 0.1 * 0.05, epsilon = 1e-12);
    assert_eq!(nom[1], 0.0);
    assert_abs_diff_eq!(nom[2], nom[0], epsilon = 1e-12);
    for name in mt.column_names() {
        assert_eq!(mt.column(name).unwrap()[1], 0.0, "{name}");
        assert!(mt.column(name).unwrap().iter().all(|v| (0.0..=999.0).contains(v)));
    }
    assert_eq!(summary.clamped(), 31);
    assert_eq!(sink.clamped(), 31);

    // tt: QCD 0.4, W 0.2, TT 0.1, DY 0.1.
    let tt = EventTable::read_parquet(&outputdir.join("Tau_Run2016B/Tau_Run2016B.parquet")).unwrap();
    assert_eq!(tt.column_names().count(), 42);
    let expected = 0.4 * 0.2 + 0.2 * 0.1 + 0.1 * 0.05 + 0.1 * 0.1;
    for leg in ["ff1_nom", "ff2_nom"] {
        for v in tt.column(leg).unwrap() {
            assert_abs_diff_eq!(*v, expected, epsilon = 1e-12);
        }
    }
    let w_frac_up = tt.column("ff1_ff_w_frac_syst_up").unwrap();
    assert_abs_diff_eq!(w_frac_up[0], expected + 0.02 * 0.1 - 0.02 * 0.2, epsilon = 1e-12);

    // A second run refuses to touch the existing output root.
    assert!(prepare_output_dir(&paths.output_directory).is_err());

    let _ = std::fs::remove_dir_all(&root);
}
