//! Round-driven federated training engine.
//!
//! One server unit (rank 0) and N client units (ranks 1..=N) exchange
//! reduced, adapter-only parameter mappings through per-node checkpoint
//! stores. An external orchestrator drives the round hooks; this crate
//! supplies the units, the trainer seam, and the privacy wiring.

pub mod barrier;
pub mod client;
pub mod config;
pub mod dataset;
pub mod error;
pub mod model;
pub mod server;
pub mod telemetry;
pub mod trainer;

pub use barrier::FirstWriterBarrier;
pub use client::{ClientUnit, Phase};
pub use config::{NodeConfig, NodeRole};
pub use dataset::{Dataset, Sample};
pub use error::{FederationErr, Result};
pub use model::Model;
pub use server::ServerUnit;
pub use telemetry::{LogSink, TelemetryErr, TelemetrySink};
pub use trainer::{SgdBackend, TrainerBackend, TrainerFactory, TrainerState, TrainingFault};
