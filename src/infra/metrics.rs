// ============================================================
// Layer 6 — CSV Metric Sink
// ============================================================
// Appends every scalar the trainer emits to a CSV file in
// long format, one row per (step, key):
//
//   step,key,value
//   0,train_loss_recon,2.781234
//   0,train_vq_loss,0.000000
//   0,vq_enabled,0.000000
//   ...
//   500,eval_accuracy,87.500000
//
// Long format keeps the header fixed while the set of keys
// grows across phases. Re-running into the same directory
// appends to the existing file.

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::domain::traits::MetricSink;

const HEADER: &str = "step,key,value";

pub struct CsvMetricSink {
    csv_path: PathBuf,
}

impl CsvMetricSink {
    /// Open `{dir}/metrics.csv`, writing the header if the file is new.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create metrics directory '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

impl MetricSink for CsvMetricSink {
    fn record(&mut self, step: usize, scalars: &[(String, f64)]) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        for (key, value) in scalars {
            writeln!(f, "{},{},{:.6}", step, key, value)?;
        }
        Ok(())
    }
}
