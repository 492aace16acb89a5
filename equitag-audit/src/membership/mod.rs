//! Protected-group membership
//!
//! **Purpose:** The immutable `video_id -> {namespace -> {subgroup}}` mapping
//! consumed by every fairness engine, the collaborators that produce it
//! (precomputed JSON, or lexicon matching over video texts), and the
//! [`Grouping`] view that turns it into label -> member positions.

pub mod grouping;
pub mod lexicon;

pub use grouping::Grouping;
pub use lexicon::{Boundary, CompiledLexicon, LexiconAudit, ProtectedLexicon, TermHit};

use equitag_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::debug;

const MEMBERSHIP: &str = "membership";
const TEXTS: &str = "video texts";

/// Subgroups of one namespace matched by a video
pub type Subgroups = BTreeSet<String>;

/// Namespace -> subgroups for one video
pub type VideoMembership = BTreeMap<String, Subgroups>;

/// Immutable membership of every evaluated video
///
/// Videos without any match are simply absent. Ordered maps keep iteration
/// (and therefore every derived table) deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MembershipMap {
    videos: BTreeMap<i64, VideoMembership>,
}

impl MembershipMap {
    /// Build from per-video entries, dropping empty namespaces
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (i64, VideoMembership)>,
    {
        let mut videos = BTreeMap::new();
        for (video_id, mut namespaces) in entries {
            namespaces.retain(|_, subgroups| !subgroups.is_empty());
            if !namespaces.is_empty() {
                videos.insert(video_id, namespaces);
            }
        }
        Self { videos }
    }

    /// Read a precomputed membership JSON
    /// (`{"<video_id>": {"<namespace>": ["<subgroup>", ...]}}`)
    ///
    /// # Errors
    /// * `MissingInput` when the file is absent
    /// * `Malformed` when the JSON does not have that shape
    pub fn from_json(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::missing(MEMBERSHIP, path));
        }
        let reader = BufReader::new(File::open(path)?);
        let parsed: BTreeMap<i64, VideoMembership> = serde_json::from_reader(reader)
            .map_err(|e| Error::malformed(MEMBERSHIP, e.to_string()))?;
        Ok(Self::from_entries(parsed))
    }

    /// Write the membership JSON (pretty-printed)
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Keep only the requested namespaces
    pub fn restricted_to(&self, namespaces: &[String]) -> Self {
        Self::from_entries(self.videos.iter().map(|(id, m)| {
            let kept: VideoMembership = m
                .iter()
                .filter(|(ns, _)| namespaces.contains(ns))
                .map(|(ns, sgs)| (ns.clone(), sgs.clone()))
                .collect();
            (*id, kept)
        }))
    }

    /// Every namespace membership of a video
    pub fn of(&self, video_id: i64) -> Option<&VideoMembership> {
        self.videos.get(&video_id)
    }

    /// Subgroups of `namespace` matched by a video
    pub fn subgroups(&self, video_id: i64, namespace: &str) -> Option<&Subgroups> {
        self.videos.get(&video_id).and_then(|m| m.get(namespace))
    }

    /// Whether any video belongs to a subgroup of `namespace`
    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.videos.values().any(|m| m.contains_key(namespace))
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&i64, &VideoMembership)> {
        self.videos.iter()
    }
}

/// Title and aggregated tag text of one video
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VideoText {
    pub video_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tags: String,
}

/// Read the texts CSV (`video_id,title,tags`)
///
/// # Errors
/// * `MissingInput` when the file is absent
/// * `Malformed` on a bad row
pub fn read_texts(path: &Path) -> Result<Vec<VideoText>> {
    if !path.is_file() {
        return Err(Error::missing(TEXTS, path));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut texts = Vec::new();
    for (line, record) in reader.deserialize::<VideoText>().enumerate() {
        texts.push(record.map_err(|e| Error::malformed(TEXTS, format!("row {}: {}", line + 1, e)))?);
    }
    debug!(path = %path.display(), videos = texts.len(), "Read video texts");
    Ok(texts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn membership(entries: &[(i64, &str, &[&str])]) -> MembershipMap {
        let mut videos: BTreeMap<i64, VideoMembership> = BTreeMap::new();
        for (id, ns, sgs) in entries {
            videos
                .entry(*id)
                .or_default()
                .insert(ns.to_string(), sgs.iter().map(|s| s.to_string()).collect());
        }
        MembershipMap::from_entries(videos)
    }

    #[test]
    fn test_empty_namespaces_dropped() {
        let map = membership(&[(1, "gender", &[]), (2, "gender", &["female"])]);
        assert_eq!(map.len(), 1);
        assert!(map.of(1).is_none());
        assert!(map.has_namespace("gender"));
        assert!(!map.has_namespace("age"));
    }

    #[test]
    fn test_restricted_to() {
        let map = membership(&[(1, "gender", &["female"]), (1, "age", &["teen"]), (2, "age", &["mature"])]);
        let only_gender = map.restricted_to(&["gender".to_string()]);
        assert_eq!(only_gender.len(), 1);
        assert!(only_gender.subgroups(1, "age").is_none());
        assert!(only_gender.subgroups(1, "gender").unwrap().contains("female"));
    }

    #[test]
    fn test_json_shape() {
        let map = membership(&[(42, "gender", &["male", "female"])]);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"42":{"gender":["female","male"]}}"#);
        let back: MembershipMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
