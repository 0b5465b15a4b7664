//! The client training unit: owns one node's model and trainer lifecycle
//! across rounds, driven by the external orchestrator in the order
//! `on_before_local_training` / `train` / `on_after_local_training` /
//! `get_model_params`, with `set_model_params` on broadcast.

use std::{fmt, sync::Arc};

use log::{debug, info};

use parameters::{Architecture, CheckpointStore, ParameterMapping, codec};
use privacy::PrivacyContext;

use crate::{
    barrier::FirstWriterBarrier,
    config::{NodeConfig, NodeRole},
    dataset::Dataset,
    error::{FederationErr, Result},
    model::Model,
    trainer::{TrainerBackend, TrainerFactory},
};

/// Lifecycle phase, tracked for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Constructed,
    Ready,
    Training,
    Exporting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Constructed => "constructed",
            Phase::Ready => "ready",
            Phase::Training => "training",
            Phase::Exporting => "exporting",
        };
        write!(f, "{s}")
    }
}

/// One client node's training unit.
pub struct ClientUnit {
    config: NodeConfig,
    arch: Arc<Architecture>,
    dataset: Dataset,
    model: Model,
    trainer: Box<dyn TrainerBackend>,
    make_trainer: TrainerFactory,
    store: CheckpointStore,
    privacy: Arc<PrivacyContext>,
    /// Set when cooperating sub-processes share this node's checkpoint path;
    /// the bool elects this unit as the writer.
    barrier: Option<(Arc<FirstWriterBarrier>, bool)>,
    round: usize,
    phase: Phase,
}

impl ClientUnit {
    /// Builds the unit and transitions it to `Ready`: the trainer is
    /// constructed and an initial checkpoint written, so a parameter export
    /// always has a checkpoint to read, even before the first round trains.
    ///
    /// # Errors
    /// Returns `FederationErr::Config` when invoked on a server-ranked node,
    /// checkpoint errors otherwise.
    pub fn new(
        config: NodeConfig,
        arch: Arc<Architecture>,
        dataset: Dataset,
        privacy: Arc<PrivacyContext>,
        make_trainer: TrainerFactory,
    ) -> Result<Self> {
        let NodeRole::Client { id } = config.role() else {
            return Err(FederationErr::Config(
                "client unit requires rank >= 1".into(),
            ));
        };

        let store = CheckpointStore::new(&config.output_dir, config.rank)?;
        let model = Model::init(Arc::clone(&arch), config.seed);
        let trainer = make_trainer(&dataset);

        store.save(0, model.full_mapping())?;

        info!(rank = config.rank, client_id = id, samples = dataset.len(); "client unit ready");

        Ok(Self {
            config,
            arch,
            dataset,
            model,
            trainer,
            make_trainer,
            store,
            privacy,
            barrier: None,
            round: 0,
            phase: Phase::Ready,
        })
    }

    /// Attaches the node-local first-writer barrier. `is_writer` elects this
    /// unit to perform the checkpoint write; everyone else waits on the
    /// barrier before reading.
    pub fn attach_barrier(&mut self, barrier: Arc<FirstWriterBarrier>, is_writer: bool) {
        self.barrier = Some((barrier, is_writer));
    }

    pub fn rank(&self) -> usize {
        self.config.rank
    }

    pub fn round(&self) -> usize {
        self.round
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Reads the latest checkpoint and extracts the reduced mapping.
    ///
    /// The unit is back in `Ready` afterwards whether the export succeeded
    /// or not.
    ///
    /// # Errors
    /// Returns `ParamErr::CheckpointMissing` (wrapped) if no checkpoint
    /// exists at the node's path.
    pub fn get_model_params(&mut self) -> Result<ParameterMapping> {
        self.phase = Phase::Exporting;
        let result = self.export_reduced();
        self.phase = Phase::Ready;
        result
    }

    fn export_reduced(&self) -> Result<ParameterMapping> {
        if let Some((barrier, is_writer)) = &self.barrier {
            if !is_writer {
                barrier.wait_written(self.round);
            }
        }

        let (round, full) = self.store.load_latest()?;
        let reduced = codec::extract_reduced(&self.arch, &full)?;

        debug!(rank = self.config.rank, round = round, params = reduced.len(); "exported reduced mapping");
        Ok(reduced)
    }

    /// Ingests the server's broadcast reduced mapping.
    ///
    /// The current model is discarded and a fresh instance rebuilt from the
    /// architecture before merging; backends may cache compiled or optimizer
    /// state keyed to the previous parameter tensors, so an in-place
    /// overwrite is not equivalent. The swap is all-or-nothing.
    pub fn set_model_params(&mut self, mapping: &ParameterMapping) -> Result<()> {
        let mut fresh = Model::init(Arc::clone(&self.arch), self.config.seed);
        fresh.apply_reduced(mapping)?;

        // Old model resources are released here, deterministically.
        self.model = fresh;

        debug!(rank = self.config.rank, params = mapping.len(); "ingested broadcast mapping");
        Ok(())
    }

    /// Round setup: records the round index and rebuilds the trainer bound
    /// to this round's partition. Optimizer state never survives a round.
    /// Under local DP the raw samples are noised before the trainer sees
    /// them.
    pub fn on_before_local_training(&mut self, round: usize) -> Result<()> {
        self.round = round;

        let partition = if self.privacy.is_local() {
            Dataset::from_records(&self.privacy.apply_to_samples(&self.dataset.records()))?
        } else {
            self.dataset.clone()
        };

        self.trainer = (self.make_trainer)(&partition);

        debug!(rank = self.config.rank, round = round; "trainer rebuilt for round");
        Ok(())
    }

    /// Runs local optimization to completion. Blocking.
    ///
    /// # Errors
    /// Returns `FederationErr::FatalTraining` on backend failure; retry
    /// policy belongs to the orchestrator.
    pub fn train(&mut self) -> Result<()> {
        self.phase = Phase::Training;

        let losses = self
            .trainer
            .train(&mut self.model)
            .map_err(|fault| FederationErr::FatalTraining {
                round: self.round,
                detail: fault.to_string(),
            })?;

        self.phase = Phase::Ready;
        info!(
            rank = self.config.rank,
            round = self.round,
            final_loss = losses.last().copied().unwrap_or(f32::NAN);
            "local training finished"
        );
        Ok(())
    }

    /// Round teardown: persists this round's checkpoint, which is what the
    /// next `get_model_params` reads. With a barrier attached, only the
    /// elected writer touches the path.
    pub fn on_after_local_training(&mut self, round: usize) -> Result<()> {
        match &self.barrier {
            Some((barrier, true)) => {
                self.store.save(round, self.model.full_mapping())?;
                barrier.publish(round);
            }
            Some((_, false)) => {
                debug!(rank = self.config.rank, round = round; "non-writer skips checkpoint write");
            }
            None => {
                self.store.save(round, self.model.full_mapping())?;
            }
        }

        Ok(())
    }
}
