//! End-to-end round exercise: a client trains and exports, the server
//! aggregates, ingests, evaluates and broadcasts, and the client ingests the
//! broadcast. Single process, real checkpoints on disk.

use std::{
    collections::BTreeMap,
    num::NonZeroUsize,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;

use federation::{
    ClientUnit, Dataset, FederationErr, LogSink, NodeConfig, ServerUnit, SgdBackend,
    TelemetryErr, TelemetrySink, TrainerFactory,
};
use parameters::{Architecture, ParamErr, Placement, TensorValue};
use privacy::{PrivacyConfig, PrivacyContext};

const FEATURES: usize = 3;

fn scratch_dir(tag: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("e2e-{tag}-{}-{n}", std::process::id()))
}

fn config(rank: usize, tag: &str) -> NodeConfig {
    NodeConfig {
        rank,
        client_num_in_total: NonZeroUsize::new(2).unwrap(),
        dataset_path: "synthetic".into(),
        output_dir: scratch_dir(tag),
        comm_rounds: 2,
        local_epochs: 2,
        batch_size: NonZeroUsize::new(4).unwrap(),
        learning_rate: 0.05,
        seed: Some(11),
        privacy: PrivacyConfig::disabled(),
        extra: BTreeMap::new(),
    }
}

fn sgd_factory(config: &NodeConfig) -> TrainerFactory {
    let epochs = config.local_epochs;
    let batch_size = config.batch_size;
    let lr = config.learning_rate;
    let seed = config.seed;
    Box::new(move |dataset: &Dataset| {
        Box::new(SgdBackend::new(
            dataset.clone(),
            epochs,
            batch_size,
            lr,
            seed,
        ))
    })
}

fn client(rank: usize, tag: &str) -> ClientUnit {
    let config = config(rank, tag);
    let arch = Arc::new(Architecture::linear_adapter(FEATURES));
    let dataset = Dataset::synthetic(10, FEATURES, rank as u64).unwrap();
    let privacy = Arc::new(PrivacyContext::init(&PrivacyConfig::disabled()).unwrap());
    let factory = sgd_factory(&config);
    ClientUnit::new(config, arch, dataset, privacy, factory).unwrap()
}

fn server(tag: &str, telemetry: Box<dyn TelemetrySink>) -> ServerUnit {
    let config = config(0, tag);
    let arch = Arc::new(Architecture::linear_adapter(FEATURES));
    let privacy = Arc::new(PrivacyContext::init(&PrivacyConfig::disabled()).unwrap());
    let eval = Dataset::synthetic(24, FEATURES, 2).unwrap();
    let trainer = Box::new(SgdBackend::new(
        eval,
        1,
        NonZeroUsize::new(4).unwrap(),
        0.05,
        Some(11),
    ));
    ServerUnit::new(config, arch, privacy, trainer, telemetry).unwrap()
}

/// Records every report for later inspection.
#[derive(Default)]
struct RecordingSink {
    reports: Arc<Mutex<Vec<(usize, BTreeMap<String, f64>)>>>,
}

impl TelemetrySink for RecordingSink {
    fn report(
        &self,
        round: usize,
        metrics: &BTreeMap<String, f64>,
    ) -> Result<(), TelemetryErr> {
        self.reports.lock().push((round, metrics.clone()));
        Ok(())
    }
}

#[test]
fn one_round_through_clients_and_server() {
    let mut clients = vec![client(1, "round"), client(2, "round")];
    let mut server = server("round", Box::new(LogSink));

    let mut contributions = Vec::new();
    for unit in &mut clients {
        unit.on_before_local_training(1).unwrap();
        unit.train().unwrap();
        unit.on_after_local_training(1).unwrap();

        let exported = unit.get_model_params().unwrap();
        assert!(!exported.is_empty(), "client exported an empty mapping");
        contributions.push((10, exported));
    }

    let merged = server.aggregate(&contributions).unwrap();
    server.set_model_params(&merged).unwrap();
    server.test(1).unwrap();

    // Checkpoint persistence is bit-exact, so the export equals the ingest.
    let broadcast = server.get_model_params().unwrap();
    assert_eq!(broadcast, merged, "server broadcast differs from ingest");
    for (_, value) in broadcast.iter() {
        assert_eq!(value.placement(), Placement::Cpu);
    }

    let client = &mut clients[0];
    client.set_model_params(&broadcast).unwrap();
    client.on_after_local_training(1).unwrap();
    let re_exported = client.get_model_params().unwrap();
    assert_eq!(re_exported, broadcast, "client did not retain the broadcast");
}

#[test]
fn evaluation_metrics_carry_the_round_index() {
    let sink = RecordingSink::default();
    let reports = Arc::clone(&sink.reports);

    let mut client = client(1, "metrics");
    let mut server = server("metrics", Box::new(sink));

    client.on_before_local_training(1).unwrap();
    client.train().unwrap();
    client.on_after_local_training(1).unwrap();

    let merged = server
        .aggregate(&[(10, client.get_model_params().unwrap())])
        .unwrap();
    server.set_model_params(&merged).unwrap();
    server.test(1).unwrap();

    let reports = reports.lock();
    assert_eq!(reports.len(), 1);

    let (round, metrics) = &reports[0];
    assert_eq!(*round, 1);
    assert!(metrics.contains_key("eval_loss"));
    assert!(metrics["eval_loss"].is_finite());
}

#[test]
fn unknown_key_rejection_leaves_the_server_untouched() {
    let mut server = server("reject", Box::new(LogSink));
    let before = server.get_model_params().unwrap();

    let mut bad = before.clone();
    bad.insert("bogus.layer.weight", TensorValue::zeros(&[FEATURES]));

    let err = server.set_model_params(&bad).unwrap_err();
    assert!(matches!(
        err,
        FederationErr::Param(ParamErr::KeyMismatch { .. })
    ));

    assert_eq!(server.get_model_params().unwrap(), before);
    assert_eq!(server.ingests(), 0);
}

#[test]
fn two_rounds_record_two_server_ingests() {
    let mut client = client(1, "two-rounds");
    let mut server = server("two-rounds", Box::new(LogSink));

    for round in 1..=2 {
        client.on_before_local_training(round).unwrap();
        client.train().unwrap();
        client.on_after_local_training(round).unwrap();

        let merged = server
            .aggregate(&[(10, client.get_model_params().unwrap())])
            .unwrap();
        server.set_model_params(&merged).unwrap();
        server.test(round).unwrap();

        client.set_model_params(&server.get_model_params().unwrap()).unwrap();
    }

    assert_eq!(server.ingests(), 2);
}
