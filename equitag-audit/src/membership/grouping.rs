//! Group label -> member positions
//!
//! A [`Grouping`] is built once per namespace (labels are subgroups) or per
//! namespace combination (labels are `"ns1=sg1 & ns2=sg2"`). Members are
//! video positions in the prediction table, so the same grouping indexes
//! every class slice. Labels are sorted; member positions ascend.

use super::MembershipMap;
use equitag_common::params::combo_key;
use std::collections::BTreeMap;

/// Separator between the parts of an intersection label
pub const LABEL_JOIN: &str = " & ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grouping {
    family: String,
    labels: Vec<String>,
    members: Vec<Vec<usize>>,
}

impl Grouping {
    fn from_buckets(family: String, buckets: BTreeMap<String, Vec<usize>>) -> Self {
        let (labels, members) = buckets.into_iter().unzip();
        Self {
            family,
            labels,
            members,
        }
    }

    /// Subgroups of one namespace
    ///
    /// # Arguments
    /// * `membership` - Resolved membership
    /// * `namespace` - Namespace to group by
    /// * `video_ids` - Evaluated videos, in table order
    pub fn for_namespace(membership: &MembershipMap, namespace: &str, video_ids: &[i64]) -> Self {
        let mut buckets: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (position, video_id) in video_ids.iter().enumerate() {
            if let Some(subgroups) = membership.subgroups(*video_id, namespace) {
                for sg in subgroups {
                    buckets.entry(sg.clone()).or_default().push(position);
                }
            }
        }
        Self::from_buckets(namespace.to_string(), buckets)
    }

    /// Intersection labels of a namespace combination
    ///
    /// A video contributes to every label in the Cartesian product of its
    /// per-namespace subgroup sets, and to none when it misses any namespace.
    pub fn for_combination(membership: &MembershipMap, combo: &[String], video_ids: &[i64]) -> Self {
        let mut buckets: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (position, video_id) in video_ids.iter().enumerate() {
            for label in intersection_labels(membership, *video_id, combo) {
                buckets.entry(label).or_default().push(position);
            }
        }
        Self::from_buckets(combo_key(combo), buckets)
    }

    /// Namespace name or combination key
    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Member positions of the label at `index`
    pub fn members(&self, index: usize) -> &[usize] {
        &self.members[index]
    }

    /// (label, member positions) in label order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.labels
            .iter()
            .map(String::as_str)
            .zip(self.members.iter().map(Vec::as_slice))
    }
}

/// Every intersection label of one video for a namespace combination
pub fn intersection_labels(membership: &MembershipMap, video_id: i64, combo: &[String]) -> Vec<String> {
    if combo.is_empty() {
        return Vec::new();
    }
    let mut labels = vec![String::new()];
    for ns in combo {
        let Some(subgroups) = membership.subgroups(video_id, ns) else {
            return Vec::new();
        };
        let mut next = Vec::with_capacity(labels.len() * subgroups.len());
        for prefix in &labels {
            for sg in subgroups {
                if prefix.is_empty() {
                    next.push(format!("{}={}", ns, sg));
                } else {
                    next.push(format!("{}{}{}={}", prefix, LABEL_JOIN, ns, sg));
                }
            }
        }
        labels = next;
    }
    labels
}
