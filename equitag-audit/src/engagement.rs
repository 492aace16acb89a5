//! Engagement Comparator
//!
//! **Purpose:** Compare class-independent engagement outcomes between each
//! group and its complement among the evaluated videos: a Welch test on
//! `log1p(views)` (normal approximation) with Holm–Bonferroni correction
//! across the family, plus a plain mean difference of the rating.

use crate::membership::Grouping;
use crate::stats::{holm_bonferroni, mean, nan_mean, welch_test};
use equitag_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

const METADATA: &str = "engagement metadata";

/// Engagement outcomes of one video
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Engagement {
    /// View count, 0 when missing
    pub views: f64,
    /// Rating, NaN when missing
    pub rating: f64,
}

impl Default for Engagement {
    fn default() -> Self {
        Self {
            views: 0.0,
            rating: f64::NAN,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MetadataCsvRow {
    video_id: i64,
    views: Option<f64>,
    rating: Option<f64>,
}

/// Engagement metadata keyed by video id
#[derive(Debug, Clone, Default)]
pub struct EngagementMetadata {
    videos: BTreeMap<i64, Engagement>,
}

impl EngagementMetadata {
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (i64, Engagement)>,
    {
        Self {
            videos: entries.into_iter().collect(),
        }
    }

    /// Read the metadata CSV (`video_id,views,rating`)
    ///
    /// Empty view counts become 0 and empty ratings NaN.
    ///
    /// # Errors
    /// * `MissingInput` when the file is absent
    /// * `Malformed` on an unparseable row or a negative view count
    pub fn from_csv(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::missing(METADATA, path));
        }
        let mut reader = csv::Reader::from_path(path)?;
        let mut videos = BTreeMap::new();
        for (line, record) in reader.deserialize::<MetadataCsvRow>().enumerate() {
            let row = record.map_err(|e| Error::malformed(METADATA, format!("row {}: {}", line + 1, e)))?;
            let views = row.views.unwrap_or(0.0);
            if views.is_nan() || views < 0.0 {
                return Err(Error::malformed(
                    METADATA,
                    format!("video {}: invalid view count {}", row.video_id, views),
                ));
            }
            videos.insert(
                row.video_id,
                Engagement {
                    views,
                    rating: row.rating.unwrap_or(f64::NAN),
                },
            );
        }
        debug!(path = %path.display(), videos = videos.len(), "Read engagement metadata");
        Ok(Self { videos })
    }

    /// Outcomes of a video, defaults when it is not listed
    pub fn get(&self, video_id: i64) -> Engagement {
        self.videos.get(&video_id).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }
}

/// One output row of the comparator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementStat {
    pub namespace: String,
    pub subgroup: String,
    pub n_group: usize,
    pub n_comp: usize,
    pub mean_log_views_group: f64,
    pub mean_log_views_comp: f64,
    pub delta_mean_log_views: f64,
    pub t_log_views: f64,
    pub p_log_views: f64,
    pub p_log_views_adj: f64,
    pub mean_rating_group: f64,
    pub mean_rating_comp: f64,
    pub delta_mean_rating: f64,
}

/// Compare every group of `grouping` with its complement
///
/// # Arguments
/// * `grouping` - Groups over the evaluated videos
/// * `video_ids` - Evaluated videos, in the order `grouping` positions refer to
/// * `metadata` - Engagement outcomes
///
/// # Returns
/// One row per group label, in label order. Statistics of a partition that
/// is empty are NaN.
pub fn compare_engagement(grouping: &Grouping, video_ids: &[i64], metadata: &EngagementMetadata) -> Vec<EngagementStat> {
    let outcomes: Vec<Engagement> = video_ids.iter().map(|id| metadata.get(*id)).collect();
    let log_views: Vec<f64> = outcomes.iter().map(|e| e.views.ln_1p()).collect();

    let mut rows: Vec<EngagementStat> = Vec::with_capacity(grouping.len());
    let mut in_group = vec![false; video_ids.len()];

    for (label, members) in grouping.iter() {
        in_group.iter_mut().for_each(|flag| *flag = false);
        for &pos in members {
            in_group[pos] = true;
        }

        let (mut views_g, mut views_c) = (Vec::new(), Vec::new());
        let (mut rating_g, mut rating_c) = (Vec::new(), Vec::new());
        for (pos, member) in in_group.iter().enumerate() {
            if *member {
                views_g.push(log_views[pos]);
                rating_g.push(outcomes[pos].rating);
            } else {
                views_c.push(log_views[pos]);
                rating_c.push(outcomes[pos].rating);
            }
        }

        let welch = welch_test(&views_g, &views_c);
        let (mean_g, mean_c) = (mean(&views_g), mean(&views_c));
        let (rating_mean_g, rating_mean_c) = (nan_mean(&rating_g), nan_mean(&rating_c));

        rows.push(EngagementStat {
            namespace: grouping.family().to_string(),
            subgroup: label.to_string(),
            n_group: views_g.len(),
            n_comp: views_c.len(),
            mean_log_views_group: mean_g,
            mean_log_views_comp: mean_c,
            delta_mean_log_views: mean_g - mean_c,
            t_log_views: welch.t,
            p_log_views: welch.p,
            p_log_views_adj: welch.p,
            mean_rating_group: rating_mean_g,
            mean_rating_comp: rating_mean_c,
            delta_mean_rating: rating_mean_g - rating_mean_c,
        });
    }

    let adjusted = holm_bonferroni(&rows.iter().map(|r| r.p_log_views).collect::<Vec<_>>());
    for (row, p_adj) in rows.iter_mut().zip(adjusted) {
        row.p_log_views_adj = p_adj;
    }

    debug!(family = grouping.family(), rows = rows.len(), "Compared engagement");
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::{MembershipMap, VideoMembership};

    fn membership(ids: &[(i64, &str)]) -> MembershipMap {
        MembershipMap::from_entries(ids.iter().map(|(id, sg)| {
            let mut m = VideoMembership::new();
            m.insert("gender".to_string(), [sg.to_string()].into());
            (*id, m)
        }))
    }

    #[test]
    fn test_group_vs_complement() {
        let video_ids: Vec<i64> = (1..=6).collect();
        let map = membership(&[(1, "female"), (2, "female"), (3, "female")]);
        let metadata = EngagementMetadata::from_entries(vec![
            (1, Engagement { views: 99.0, rating: 80.0 }),
            (2, Engagement { views: 999.0, rating: f64::NAN }),
            (3, Engagement { views: 9999.0, rating: 60.0 }),
            (4, Engagement { views: 9.0, rating: 50.0 }),
            (5, Engagement { views: 0.0, rating: 40.0 }),
        ]);
        let grouping = Grouping::for_namespace(&map, "gender", &video_ids);
        let rows = compare_engagement(&grouping, &video_ids, &metadata);

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!((row.n_group, row.n_comp), (3, 3));
        // ln(100), ln(1000), ln(10000)
        assert!((row.mean_log_views_group - 1000f64.ln()).abs() < 1e-9);
        // video 6 is missing: views 0, rating NaN
        assert!((row.mean_log_views_comp - 10f64.ln() / 3.0).abs() < 1e-9);
        assert!(row.t_log_views > 0.0);
        assert!(row.p_log_views > 0.0 && row.p_log_views < 1.0);
        // a single test is left unchanged by the adjustment
        assert_eq!(row.p_log_views_adj, row.p_log_views);
        // rating means ignore undefined values
        assert!((row.mean_rating_group - 70.0).abs() < 1e-9);
        assert!((row.mean_rating_comp - 45.0).abs() < 1e-9);
        assert!((row.delta_mean_rating - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_complement_is_undefined() {
        let video_ids = vec![1, 2];
        let map = membership(&[(1, "male"), (2, "male")]);
        let grouping = Grouping::for_namespace(&map, "gender", &video_ids);
        let rows = compare_engagement(&grouping, &video_ids, &EngagementMetadata::default());

        assert_eq!(rows[0].n_comp, 0);
        assert!(rows[0].mean_log_views_comp.is_nan());
        assert!(rows[0].delta_mean_log_views.is_nan());
        assert!(rows[0].p_log_views.is_nan());
        assert_eq!(rows[0].p_log_views_adj, 1.0);
        assert!(rows[0].mean_rating_group.is_nan());
    }
}
