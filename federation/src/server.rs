//! The server aggregation unit: rank 0, holds the global model and one
//! persistent trainer used for state and evaluation. Only the reduced
//! adapter set ever crosses the exchange path; base weights stay local.

use std::sync::Arc;

use log::{debug, info, warn};

use parameters::{
    Architecture, CheckpointStore, ParamErr, ParameterMapping, Placement, TensorValue, codec,
};
use privacy::PrivacyContext;

use crate::{
    config::{NodeConfig, NodeRole},
    error::{FederationErr, Result},
    model::Model,
    telemetry::TelemetrySink,
    trainer::TrainerBackend,
};

/// The global-model aggregation unit.
pub struct ServerUnit {
    config: NodeConfig,
    arch: Arc<Architecture>,
    model: Model,
    /// Persistent across rounds, unlike the client's per-round trainer.
    trainer: Box<dyn TrainerBackend>,
    store: CheckpointStore,
    privacy: Arc<PrivacyContext>,
    telemetry: Box<dyn TelemetrySink>,
    /// Count of successful ingests, used to tag the checkpoints written by
    /// `set_model_params`. Not the orchestrator's round index; that arrives
    /// as the `test` argument and is never mutated here.
    ingests: usize,
}

impl ServerUnit {
    /// Builds the unit and writes the round-0 checkpoint, mirroring the
    /// client's ready transition.
    ///
    /// # Errors
    /// Returns `FederationErr::Config` when invoked on a client-ranked node.
    pub fn new(
        config: NodeConfig,
        arch: Arc<Architecture>,
        privacy: Arc<PrivacyContext>,
        trainer: Box<dyn TrainerBackend>,
        telemetry: Box<dyn TelemetrySink>,
    ) -> Result<Self> {
        if config.role() != NodeRole::Server {
            return Err(FederationErr::Config("server unit requires rank 0".into()));
        }

        let store = CheckpointStore::new(&config.output_dir, config.rank)?;
        let model = Model::init(Arc::clone(&arch), config.seed);
        store.save(0, model.full_mapping())?;

        info!(rank = config.rank; "server unit ready");

        Ok(Self {
            config,
            arch,
            model,
            trainer,
            store,
            privacy,
            telemetry,
            ingests: 0,
        })
    }

    /// How many reduced mappings have been merged into the global model.
    pub fn ingests(&self) -> usize {
        self.ingests
    }

    /// Weighted average of per-client reduced mappings (weights are sample
    /// counts). Pure: does not touch the unit's model.
    ///
    /// # Errors
    /// Returns `ParamErr::KeyMismatch` / `ParamErr::ShapeMismatch` (wrapped)
    /// when the contributions disagree on keys or shapes.
    pub fn aggregate(
        &self,
        contributions: &[(usize, ParameterMapping)],
    ) -> Result<ParameterMapping> {
        let Some(((_, first), rest)) = contributions.split_first() else {
            return Err(FederationErr::Config(
                "aggregate requires at least one contribution".into(),
            ));
        };

        let total: usize = contributions.iter().map(|(n, _)| *n).sum();
        if total == 0 {
            return Err(FederationErr::Config(
                "aggregate requires a positive total sample count".into(),
            ));
        }

        for (_, mapping) in rest {
            for (key, value) in mapping.iter() {
                let reference = first.get(key).ok_or_else(|| ParamErr::KeyMismatch {
                    key: key.to_string(),
                })?;
                if reference.shape() != value.shape() {
                    return Err(ParamErr::ShapeMismatch {
                        key: key.to_string(),
                        got: value.shape().to_vec(),
                        expected: reference.shape().to_vec(),
                    }
                    .into());
                }
            }
            if mapping.len() != first.len() {
                let missing = first
                    .keys()
                    .find(|&k| !mapping.contains_key(k))
                    .unwrap_or_default();
                return Err(ParamErr::KeyMismatch {
                    key: missing.to_string(),
                }
                .into());
            }
        }

        let averaged = first
            .iter()
            .map(|(key, seed_value)| {
                let mut acc = seed_value.data() * (contributions[0].0 as f32 / total as f32);
                for (weight, mapping) in rest {
                    // Keys and shapes were validated above.
                    if let Some(value) = mapping.get(key) {
                        acc = acc + value.data() * (*weight as f32 / total as f32);
                    }
                }
                (
                    key.to_string(),
                    TensorValue::from_array(acc, seed_value.placement()),
                )
            })
            .collect();

        debug!(clients = contributions.len(), samples = total; "aggregated contributions");
        Ok(averaged)
    }

    /// Ingests a reduced mapping into the global model.
    ///
    /// The mapping is normalized to CPU placement, passed through central-DP
    /// noise when enabled, then merged against the current adapter-only set.
    /// Apply-or-reject: on any mismatch the global model is left unmodified.
    pub fn set_model_params(&mut self, mapping: &ParameterMapping) -> Result<()> {
        let normalized = codec::to_placement(mapping, Placement::Cpu);
        let normalized = if self.privacy.is_central() {
            self.privacy.apply_to_mapping(&normalized)
        } else {
            normalized
        };

        self.model.apply_reduced_adapter(&normalized)?;

        self.ingests += 1;
        self.store.save(self.ingests, self.model.full_mapping())?;

        debug!(seq = self.ingests, params = normalized.len(); "global model updated");
        Ok(())
    }

    /// Reads the latest checkpoint and extracts the reduced mapping,
    /// normalized to CPU placement for transit.
    ///
    /// # Errors
    /// Returns `ParamErr::CheckpointMissing` (wrapped) if no checkpoint
    /// exists at the node's path.
    pub fn get_model_params(&self) -> Result<ParameterMapping> {
        let (_, full) = self.store.load_latest()?;
        let reduced = codec::extract_reduced(&self.arch, &full)?;
        Ok(codec::to_placement(&reduced, Placement::Cpu))
    }

    /// Evaluates the global model over the held-out dataset and reports the
    /// metrics tagged with the round index.
    ///
    /// The trainer's epoch/step counters are pinned to the round for
    /// reporting continuity. Telemetry failures are logged and swallowed:
    /// they never fail the round.
    pub fn test(&mut self, round: usize) -> Result<()> {
        let state = self.trainer.state_mut();
        state.epoch = round;
        state.global_step = round;

        let metrics = self.trainer.evaluate(&self.model);
        self.store.save(round, self.model.full_mapping())?;

        if let Err(e) = self.telemetry.report(round, &metrics) {
            warn!(round_idx = round; "telemetry report failed: {e}");
        }

        info!(
            rank = self.config.rank,
            round_idx = round,
            eval_loss = metrics.get("eval_loss").copied().unwrap_or(f64::NAN);
            "evaluation finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        num::NonZeroUsize,
        path::PathBuf,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use privacy::{DpMode, MechanismKind, PrivacyConfig};

    use crate::{
        dataset::Dataset,
        telemetry::{TelemetryErr, TelemetrySink},
        trainer::SgdBackend,
    };

    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("server-{tag}-{}-{n}", std::process::id()))
    }

    struct FailingSink;

    impl TelemetrySink for FailingSink {
        fn report(&self, _: usize, _: &BTreeMap<String, f64>) -> std::result::Result<(), TelemetryErr> {
            Err(TelemetryErr("sink is down".into()))
        }
    }

    fn server_with(
        tag: &str,
        telemetry: Box<dyn TelemetrySink>,
        privacy_config: PrivacyConfig,
    ) -> ServerUnit {
        let config = NodeConfig {
            rank: 0,
            client_num_in_total: NonZeroUsize::new(2).unwrap(),
            dataset_path: "unused.csv".into(),
            output_dir: scratch_dir(tag),
            comm_rounds: 2,
            local_epochs: 1,
            batch_size: NonZeroUsize::new(4).unwrap(),
            learning_rate: 0.05,
            seed: Some(9),
            privacy: privacy_config.clone(),
            extra: BTreeMap::new(),
        };
        let arch = Arc::new(Architecture::linear_adapter(3));
        let privacy = Arc::new(PrivacyContext::init(&privacy_config).unwrap());
        let eval = Dataset::synthetic(16, 3, 21).unwrap();
        let trainer = Box::new(SgdBackend::new(
            eval,
            1,
            NonZeroUsize::new(4).unwrap(),
            0.05,
            Some(9),
        ));

        ServerUnit::new(config, arch, privacy, trainer, telemetry).unwrap()
    }

    fn server(tag: &str, telemetry: Box<dyn TelemetrySink>) -> ServerUnit {
        server_with(tag, telemetry, PrivacyConfig::disabled())
    }

    fn reduced(bias: f32, weight: f32) -> ParameterMapping {
        let mut mapping = ParameterMapping::new();
        mapping.insert(
            "head.adapter.weight",
            TensorValue::from_vec(&[3], vec![weight; 3]).unwrap(),
        );
        mapping.insert(
            "head.adapter.bias",
            TensorValue::from_vec(&[1], vec![bias]).unwrap(),
        );
        mapping
    }

    #[test]
    fn aggregate_is_a_weighted_average() {
        let unit = server("aggregate", Box::new(crate::telemetry::LogSink));

        let contributions = vec![(3, reduced(1.0, 2.0)), (1, reduced(5.0, 6.0))];
        let averaged = unit.aggregate(&contributions).unwrap();

        assert_eq!(averaged.get("head.adapter.bias").unwrap().contiguous()[0], 2.0);
        assert_eq!(
            averaged.get("head.adapter.weight").unwrap().contiguous()[0],
            3.0
        );
    }

    #[test]
    fn aggregate_rejects_key_skew() {
        let unit = server("aggregate-skew", Box::new(crate::telemetry::LogSink));

        let mut odd = reduced(1.0, 1.0);
        odd.insert("rogue", TensorValue::zeros(&[1]));

        let contributions = vec![(1, reduced(0.0, 0.0)), (1, odd)];
        assert!(unit.aggregate(&contributions).is_err());
    }

    #[test]
    fn ingest_then_export_round_trips() {
        let mut unit = server("round-trip", Box::new(crate::telemetry::LogSink));
        let incoming = reduced(0.5, -1.0);

        unit.set_model_params(&incoming).unwrap();
        let exported = unit.get_model_params().unwrap();

        assert_eq!(exported, incoming);
        for (_, value) in exported.iter() {
            assert_eq!(value.placement(), Placement::Cpu);
        }
    }

    #[test]
    fn unknown_key_leaves_the_model_unmodified() {
        let mut unit = server("atomic", Box::new(crate::telemetry::LogSink));
        let before = unit.model.full_mapping().clone();

        let mut bad = reduced(1.0, 1.0);
        bad.insert("encoder.weight", TensorValue::zeros(&[3, 3]));

        assert!(matches!(
            unit.set_model_params(&bad),
            Err(FederationErr::Param(ParamErr::KeyMismatch { .. }))
        ));
        assert_eq!(unit.model.full_mapping(), &before);
        assert_eq!(unit.ingests(), 0);
    }

    #[test]
    fn central_dp_perturbs_the_ingested_values() {
        let enabled = PrivacyConfig {
            enabled: true,
            mode: Some(DpMode::Central),
            mechanism: Some(MechanismKind::Laplace),
            ..PrivacyConfig::disabled()
        };
        let mut unit = server_with("cdp", Box::new(crate::telemetry::LogSink), enabled);

        let incoming = reduced(0.5, 1.0);
        unit.set_model_params(&incoming).unwrap();
        let exported = unit.get_model_params().unwrap();

        let expected: Vec<_> = incoming.keys().collect();
        let got: Vec<_> = exported.keys().collect();
        assert_eq!(got, expected);
        for (name, value) in exported.iter() {
            assert_eq!(value.shape(), incoming.get(name).unwrap().shape());
        }
        assert_ne!(exported, incoming, "central noise left the values untouched");
    }

    #[test]
    fn telemetry_failure_does_not_fail_the_round() {
        let mut unit = server("telemetry-down", Box::new(FailingSink));
        unit.set_model_params(&reduced(0.1, 0.1)).unwrap();

        assert!(unit.test(1).is_ok());
        assert_eq!(unit.trainer.state().epoch, 1);
        assert_eq!(unit.trainer.state().global_step, 1);
    }
}
