//! Tabular artifacts
//!
//! **Purpose:** Serde-driven CSV reading/writing of output tables and the
//! file layout of every artifact under the output directory.

use equitag_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Write rows as CSV with a header (NaN is written as `NaN`)
///
/// Parent directories are created. An empty row set still produces a file
/// (header-less, since the header comes from the first row).
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!(path = %path.display(), rows = rows.len(), "Wrote table");
    Ok(())
}

/// Read a CSV table written by [`write_rows`]
///
/// # Errors
/// * `MissingInput` when the file is absent
/// * `Malformed` when a row does not match `T`
pub fn read_rows<T: DeserializeOwned>(path: &Path, artifact: &str) -> Result<Vec<T>> {
    if !path.is_file() {
        return Err(Error::missing(artifact, path));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for (line, record) in reader.deserialize::<T>().enumerate() {
        rows.push(record.map_err(|e| Error::malformed(artifact, format!("row {}: {}", line + 1, e)))?);
    }
    Ok(rows)
}

/// Write a text artifact, creating parent directories
pub fn write_text(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    info!(path = %path.display(), "Wrote file");
    Ok(())
}

/// Deserialize an `f64` that may be encoded as `null` (JSON) or an empty
/// field (CSV); both read back as NaN
pub fn nan_or_null<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Artifact paths under one output directory
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Group stats of one namespace
    pub fn details(&self, model: &str, namespace: &str) -> PathBuf {
        self.root.join(format!("details_{}_{}.csv", model, namespace))
    }

    /// Group stats of one namespace combination
    pub fn details_intersections(&self, model: &str, combo_key: &str) -> PathBuf {
        self.root
            .join(format!("details_intersections_{}_{}.csv", model, combo_key))
    }

    /// Worst gaps per (namespace, class)
    pub fn summary(&self, model: &str) -> PathBuf {
        self.root.join(format!("summary_{}.csv", model))
    }

    pub fn engagement(&self, model: &str, namespace: &str) -> PathBuf {
        self.root.join(format!("engagement_{}_{}.csv", model, namespace))
    }

    pub fn engagement_intersections(&self, model: &str, combo_key: &str) -> PathBuf {
        self.root
            .join(format!("engagement_intersections_{}_{}.csv", model, combo_key))
    }

    pub fn markdown_summary(&self, model: &str) -> PathBuf {
        self.root.join("markdown").join(format!("summary_{}.md", model))
    }

    /// Threshold audit of a mitigation run (`eo_thresholds_<tag>.csv`)
    pub fn thresholds(&self, objective: &str, tag: &str) -> PathBuf {
        self.root.join(format!("{}_thresholds_{}.csv", objective, tag))
    }

    /// Rebuilt predictions of a mitigation run
    pub fn predictions(&self, tag: &str) -> PathBuf {
        self.root.join(format!("predictions_test_{}.csv", tag))
    }

    pub fn comparison(&self, before: &str, after: &str) -> PathBuf {
        self.root.join(format!("compare_{}_vs_{}.csv", before, after))
    }

    /// JSON run report of one command
    pub fn report(&self, command: &str, name: &str) -> PathBuf {
        self.root.join(format!("report_{}_{}.json", command, name))
    }
}
