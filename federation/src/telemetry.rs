//! Fire-and-forget metric reporting. A failing sink must never fail a round;
//! the server unit logs and swallows errors from here.

use std::{collections::BTreeMap, error::Error, fmt};

use log::info;

/// A sink rejected or failed to deliver a report.
#[derive(Debug)]
pub struct TelemetryErr(pub String);

impl fmt::Display for TelemetryErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "telemetry error: {}", self.0)
    }
}

impl Error for TelemetryErr {}

/// Destination for round-tagged evaluation metrics.
pub trait TelemetrySink {
    /// Delivers a flat metric mapping tagged with the round index.
    fn report(
        &self,
        round: usize,
        metrics: &BTreeMap<String, f64>,
    ) -> Result<(), TelemetryErr>;
}

/// Reports metrics as structured log lines.
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn report(
        &self,
        round: usize,
        metrics: &BTreeMap<String, f64>,
    ) -> Result<(), TelemetryErr> {
        for (name, value) in metrics {
            info!(round_idx = round, metric = name.as_str(), value = value; "eval metric");
        }
        Ok(())
    }
}
