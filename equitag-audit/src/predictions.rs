//! Prediction Table Builder
//!
//! **Purpose:** Parse the compact per-video prediction listing, expand it
//! against the class vocabulary into a long-form table, and serialize rebuilt
//! listings back to the same CSV shape.
//!
//! The long form is class-major: every video for class 0, then every video
//! for class 1, and so on. Within a class, videos keep input order, so a
//! video's position is the same in every class slice.

use equitag_common::{Error, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Separator of the list-valued prediction columns
pub const LIST_SEPARATOR: &str = ";";

const PREDICTIONS: &str = "predictions";
const VOCABULARY: &str = "class vocabulary";

/// One row of the prediction source
#[derive(Debug, Clone, PartialEq)]
pub struct CompactPrediction {
    pub video_id: i64,
    /// True category labels
    pub true_labels: Vec<String>,
    /// Predicted labels with their scores, in rank order
    pub ranked: Vec<(String, f64)>,
}

#[derive(Debug, Deserialize)]
struct PredictionCsvRow {
    video_id: i64,
    true_labels: Option<String>,
    pred_topk: Option<String>,
    pred_topk_probs: Option<String>,
}

fn split_list(cell: Option<&str>) -> Vec<&str> {
    match cell.map(str::trim) {
        None | Some("") => Vec::new(),
        Some(s) => s.split(LIST_SEPARATOR).map(str::trim).collect(),
    }
}

impl CompactPrediction {
    /// Build a row from the three delimiter-joined cells
    ///
    /// # Errors
    /// `Malformed` when the label and score lists differ in length or a score
    /// is not a finite number within [0, 1]
    pub fn parse(
        video_id: i64,
        true_labels: Option<&str>,
        pred_topk: Option<&str>,
        pred_topk_probs: Option<&str>,
    ) -> Result<Self> {
        let labels = split_list(pred_topk);
        let probs = split_list(pred_topk_probs);
        if labels.len() != probs.len() {
            return Err(Error::malformed(
                PREDICTIONS,
                format!(
                    "video {}: {} predicted labels but {} scores",
                    video_id,
                    labels.len(),
                    probs.len()
                ),
            ));
        }

        let mut ranked = Vec::with_capacity(labels.len());
        for (label, raw) in labels.into_iter().zip(probs) {
            let score: f64 = raw.parse().map_err(|_| {
                Error::malformed(PREDICTIONS, format!("video {}: score '{}' is not a number", video_id, raw))
            })?;
            if !score.is_finite() || !(0.0..=1.0).contains(&score) {
                return Err(Error::malformed(
                    PREDICTIONS,
                    format!("video {}: score {} outside [0, 1]", video_id, score),
                ));
            }
            ranked.push((label.to_string(), score));
        }

        Ok(Self {
            video_id,
            true_labels: split_list(true_labels).into_iter().map(String::from).collect(),
            ranked,
        })
    }

    /// Score listed for `class`, if any
    pub fn score_of(&self, class: &str) -> Option<f64> {
        self.ranked.iter().find(|(label, _)| label == class).map(|(_, s)| *s)
    }
}

/// Read the prediction source CSV
///
/// # Errors
/// * `MissingInput` when the file is absent
/// * `Malformed` for missing columns, bad rows or duplicate video ids
pub fn read_predictions(path: &Path) -> Result<Vec<CompactPrediction>> {
    if !path.is_file() {
        return Err(Error::missing(PREDICTIONS, path));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut seen = HashSet::new();
    let mut rows = Vec::new();

    for (line, record) in reader.deserialize::<PredictionCsvRow>().enumerate() {
        let raw = record.map_err(|e| Error::malformed(PREDICTIONS, format!("row {}: {}", line + 1, e)))?;
        if !seen.insert(raw.video_id) {
            return Err(Error::malformed(
                PREDICTIONS,
                format!("duplicate video_id {}", raw.video_id),
            ));
        }
        rows.push(CompactPrediction::parse(
            raw.video_id,
            raw.true_labels.as_deref(),
            raw.pred_topk.as_deref(),
            raw.pred_topk_probs.as_deref(),
        )?);
    }

    debug!(path = %path.display(), videos = rows.len(), "Read prediction source");
    Ok(rows)
}

/// Write prediction rows in the prediction source CSV shape
///
/// Scores are written with six decimals.
pub fn write_predictions(path: &Path, rows: &[CompactPrediction]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["video_id", "true_labels", "pred_topk", "pred_topk_probs"])?;
    for row in rows {
        let labels: Vec<&str> = row.ranked.iter().map(|(l, _)| l.as_str()).collect();
        let scores: Vec<String> = row.ranked.iter().map(|(_, s)| format!("{:.6}", s)).collect();
        writer.write_record([
            row.video_id.to_string(),
            row.true_labels.join(LIST_SEPARATOR),
            labels.join(LIST_SEPARATOR),
            scores.join(LIST_SEPARATOR),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Read the ordered class vocabulary (`category` column)
///
/// # Errors
/// * `MissingInput` when the file is absent
/// * `Malformed` when the column is missing, a name is blank or repeated,
///   or the vocabulary is empty
pub fn read_vocabulary(path: &Path) -> Result<Vec<String>> {
    if !path.is_file() {
        return Err(Error::missing(VOCABULARY, path));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let column = reader
        .headers()?
        .iter()
        .position(|h| h.trim() == "category")
        .ok_or_else(|| Error::malformed(VOCABULARY, "missing 'category' column"))?;

    let mut classes: Vec<String> = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let name = record.get(column).map(str::trim).unwrap_or("");
        if name.is_empty() {
            return Err(Error::malformed(VOCABULARY, format!("row {}: blank category", line + 1)));
        }
        if classes.iter().any(|c| c == name) {
            return Err(Error::malformed(VOCABULARY, format!("duplicate category '{}'", name)));
        }
        classes.push(name.to_string());
    }

    if classes.is_empty() {
        return Err(Error::malformed(VOCABULARY, "no categories"));
    }
    Ok(classes)
}

/// Long-form record for one (video, class) pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionRecord {
    pub video_id: i64,
    /// Index into the table's class vocabulary
    pub class_index: usize,
    pub ground_truth: bool,
    pub predicted: bool,
    /// Listed score, or 0.0 when the class was not listed
    pub score: f64,
}

/// All records of one class, in video order
#[derive(Debug, Clone, Copy)]
pub struct ClassSlice<'a> {
    pub class: &'a str,
    pub records: &'a [PredictionRecord],
}

/// Immutable long-form prediction table
#[derive(Debug, Clone)]
pub struct PredictionTable {
    classes: Vec<String>,
    video_ids: Vec<i64>,
    records: Vec<PredictionRecord>,
    base_threshold: f64,
}

impl PredictionTable {
    /// Expand compact rows against the class vocabulary
    ///
    /// # Arguments
    /// * `rows` - Compact prediction rows, in output order
    /// * `classes` - Fixed label space
    /// * `base_threshold` - Cutoff deciding `predicted` (`score >= base_threshold`)
    pub fn expand(rows: &[CompactPrediction], classes: &[String], base_threshold: f64) -> Self {
        let known: HashSet<&str> = classes.iter().map(String::as_str).collect();
        let unknown = rows
            .iter()
            .flat_map(|r| r.true_labels.iter().chain(r.ranked.iter().map(|(l, _)| l)))
            .filter(|l| !known.contains(l.as_str()))
            .count();
        if unknown > 0 {
            debug!(unknown, "Ignoring labels outside the class vocabulary");
        }

        let mut records = Vec::with_capacity(rows.len() * classes.len());
        for (class_index, class) in classes.iter().enumerate() {
            for row in rows {
                let score = row.score_of(class).unwrap_or(0.0);
                records.push(PredictionRecord {
                    video_id: row.video_id,
                    class_index,
                    ground_truth: row.true_labels.iter().any(|l| l == class),
                    predicted: score >= base_threshold,
                    score,
                });
            }
        }

        Self {
            classes: classes.to_vec(),
            video_ids: rows.iter().map(|r| r.video_id).collect(),
            records,
            base_threshold,
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Video ids in table order (a video's position is shared by every class slice)
    pub fn video_ids(&self) -> &[i64] {
        &self.video_ids
    }

    pub fn n_videos(&self) -> usize {
        self.video_ids.len()
    }

    pub fn base_threshold(&self) -> f64 {
        self.base_threshold
    }

    pub fn records(&self) -> &[PredictionRecord] {
        &self.records
    }

    /// Contiguous records of the class at `class_index`
    pub fn slice_at(&self, class_index: usize) -> ClassSlice<'_> {
        let n = self.video_ids.len();
        let start = class_index * n;
        ClassSlice {
            class: &self.classes[class_index],
            records: &self.records[start..start + n],
        }
    }

    /// Contiguous records of `class`, if it is in the vocabulary
    pub fn class_slice(&self, class: &str) -> Option<ClassSlice<'_>> {
        self.classes
            .iter()
            .position(|c| c == class)
            .map(|i| self.slice_at(i))
    }

    /// Every class slice in vocabulary order
    pub fn slices(&self) -> impl Iterator<Item = ClassSlice<'_>> + '_ {
        (0..self.classes.len()).map(move |i| self.slice_at(i))
    }

    /// Record for the video at `position` and the class at `class_index`
    pub fn record(&self, class_index: usize, position: usize) -> &PredictionRecord {
        &self.records[class_index * self.video_ids.len() + position]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes() -> Vec<String> {
        vec!["amateur".to_string(), "pov".to_string(), "solo".to_string()]
    }

    #[test]
    fn test_parse_row() {
        let row = CompactPrediction::parse(7, Some("amateur;solo"), Some("pov;amateur"), Some("0.9;0.4")).unwrap();
        assert_eq!(row.true_labels, vec!["amateur", "solo"]);
        assert_eq!(row.ranked, vec![("pov".to_string(), 0.9), ("amateur".to_string(), 0.4)]);
    }

    #[test]
    fn test_parse_empty_cells() {
        let row = CompactPrediction::parse(1, None, Some(""), None).unwrap();
        assert!(row.true_labels.is_empty());
        assert!(row.ranked.is_empty());
    }

    #[test]
    fn test_parse_rejects_length_mismatch() {
        let err = CompactPrediction::parse(1, None, Some("a;b"), Some("0.5")).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }

    #[test]
    fn test_parse_rejects_bad_scores() {
        assert!(CompactPrediction::parse(1, None, Some("a"), Some("x")).is_err());
        assert!(CompactPrediction::parse(1, None, Some("a"), Some("1.5")).is_err());
        assert!(CompactPrediction::parse(1, None, Some("a"), Some("NaN")).is_err());
    }

    #[test]
    fn test_expand_is_class_major() {
        let rows = vec![
            CompactPrediction::parse(10, Some("amateur"), Some("amateur;pov"), Some("0.8;0.3")).unwrap(),
            CompactPrediction::parse(20, Some("pov;unknown"), Some("pov"), Some("0.5")).unwrap(),
        ];
        let table = PredictionTable::expand(&rows, &classes(), 0.5);

        assert_eq!(table.records().len(), 6);
        assert_eq!(table.video_ids(), &[10, 20]);

        let amateur = table.class_slice("amateur").unwrap();
        assert_eq!(amateur.records.len(), 2);
        assert!(amateur.records[0].ground_truth && amateur.records[0].predicted);
        assert!(!amateur.records[1].ground_truth && !amateur.records[1].predicted);
        assert_eq!(amateur.records[1].score, 0.0);

        let pov = table.slice_at(1);
        assert_eq!(pov.class, "pov");
        // score == threshold counts as positive
        assert!(pov.records[1].predicted);
        assert!(!pov.records[0].predicted);

        let solo = table.class_slice("solo").unwrap();
        assert!(solo.records.iter().all(|r| !r.ground_truth && r.score == 0.0));
        assert!(table.class_slice("missing").is_none());
        assert_eq!(table.record(2, 1).video_id, 20);
    }
}
