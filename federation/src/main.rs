//! Single-process demo: one server and N clients, round loop driven inline.
//! Pass a JSON config path to override the defaults for every node; a
//! `dataset_path` of `"synthetic"` generates data in-process, anything else
//! is resolved per node through the path template and loaded as CSV.

use std::{num::NonZeroUsize, process, sync::Arc};

use log::{error, info};

use federation::{
    ClientUnit, Dataset, FederationErr, LogSink, NodeConfig, Result, ServerUnit, SgdBackend,
    TrainerFactory,
};
use parameters::Architecture;
use privacy::PrivacyContext;

const FEATURES: usize = 4;
const ROWS_PER_CLIENT: usize = 48;
const SYNTHETIC: &str = "synthetic";

fn load_dataset(config: &NodeConfig, rows: usize, seed: u64) -> Result<Dataset> {
    let path = config.resolve_dataset_path();
    if path == SYNTHETIC {
        Dataset::synthetic(rows, FEATURES, seed)
    } else {
        Dataset::from_csv(&path)
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

fn node_config(base: &NodeConfig, rank: usize) -> NodeConfig {
    let mut config = base.clone();
    config.rank = rank;
    config
}

fn run() -> Result<()> {
    let base = match std::env::args().nth(1) {
        Some(path) => NodeConfig::load(&path)?,
        None => NodeConfig {
            rank: 0,
            client_num_in_total: NonZeroUsize::new(2)
                .ok_or_else(|| FederationErr::Config("zero clients".into()))?,
            dataset_path: SYNTHETIC.into(),
            output_dir: std::env::temp_dir().join(format!("fed-demo-{}", process::id())),
            comm_rounds: 3,
            local_epochs: 2,
            batch_size: NonZeroUsize::new(8)
                .ok_or_else(|| FederationErr::Config("zero batch size".into()))?,
            learning_rate: 0.05,
            seed: Some(7),
            privacy: Default::default(),
            extra: Default::default(),
        },
    };

    let clients_total = base.client_num_in_total.get();
    let arch = Arc::new(Architecture::linear_adapter(FEATURES));
    let privacy = Arc::new(PrivacyContext::init(&base.privacy)?);

    let server_config = node_config(&base, 0);
    let eval_set = load_dataset(&server_config, 64, 100)?;
    let mut server = ServerUnit::new(
        server_config,
        Arc::clone(&arch),
        Arc::clone(&privacy),
        Box::new(SgdBackend::new(
            eval_set,
            base.local_epochs,
            base.batch_size,
            base.learning_rate,
            base.seed,
        )),
        Box::new(LogSink),
    )?;

    let mut clients = Vec::with_capacity(clients_total);
    let mut client_sizes = Vec::with_capacity(clients_total);
    for rank in 1..=clients_total {
        let config = node_config(&base, rank);
        let dataset = load_dataset(&config, ROWS_PER_CLIENT, rank as u64)?;
        client_sizes.push(dataset.len());
        let factory = sgd_factory(&config);
        clients.push(ClientUnit::new(
            config,
            Arc::clone(&arch),
            dataset,
            Arc::clone(&privacy),
            factory,
        )?);
    }

    for round in 1..=base.comm_rounds {
        info!(round_idx = round; "round start");

        let mut contributions = Vec::with_capacity(clients.len());
        for (client, &samples) in clients.iter_mut().zip(&client_sizes) {
            client.on_before_local_training(round)?;
            client.train()?;
            client.on_after_local_training(round)?;
            contributions.push((samples, client.get_model_params()?));
        }

        let merged = server.aggregate(&contributions)?;
        server.set_model_params(&merged)?;
        server.test(round)?;

        let broadcast = server.get_model_params()?;
        for client in &mut clients {
            client.set_model_params(&broadcast)?;
        }
    }

    info!(rounds = base.comm_rounds; "run finished");
    Ok(())
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        error!("run aborted: {e}");
        process::exit(1);
    }
}
