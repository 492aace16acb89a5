//! Protected-term lexicon
//!
//! **Purpose:** Load the namespace -> subgroup -> terms taxonomy, compile each
//! term to a boundary-guarded case-insensitive pattern, and match video texts
//! to produce a [`MembershipMap`].
//!
//! Term rules: trimmed and lowercased, de-duplicated in first-seen order,
//! whitespace runs match `\s+`, `*` matches `.*`, every other character is
//! literal.

use super::{MembershipMap, VideoMembership, VideoText};
use equitag_common::{Error, Result};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

const LEXICON: &str = "lexicon";

/// Maximum number of overlapping terms listed in an audit
const OVERLAP_EXAMPLES: usize = 50;

/// Raw lexicon: namespace -> subgroup -> terms
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectedLexicon {
    terms: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

/// How a term is guarded against substring matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Boundary {
    /// `\b` on both sides
    #[default]
    Word,
    /// Start/end of text or a non-word character on both sides
    Edge,
}

impl FromStr for Boundary {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "word" => Ok(Boundary::Word),
            "edge" => Ok(Boundary::Edge),
            other => Err(Error::InvalidInput(format!(
                "unknown boundary '{}' (expected word or edge)",
                other
            ))),
        }
    }
}

/// One compiled term
#[derive(Debug, Clone)]
pub struct CompiledTerm {
    pub raw: String,
    pub pattern: Regex,
}

/// Lexicon with every term compiled
#[derive(Debug, Clone)]
pub struct CompiledLexicon {
    groups: BTreeMap<String, BTreeMap<String, Vec<CompiledTerm>>>,
}

/// Terms of one (namespace, subgroup) found in a text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermHit {
    pub namespace: String,
    pub subgroup: String,
    pub terms: Vec<String>,
}

/// Structural summary of a lexicon
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LexiconAudit {
    pub namespaces: usize,
    pub subgroups: usize,
    pub terms: usize,
    /// (namespace, subgroup) pairs without terms
    pub empty_groups: Vec<(String, String)>,
    /// Number of normalized terms listed more than once
    pub overlap_terms_count: usize,
    /// Up to 50 overlapping terms with the pairs that list them
    pub overlap_examples: BTreeMap<String, Vec<(String, String)>>,
}

fn normalise_term(term: &str) -> String {
    term.trim().to_lowercase()
}

fn dedupe_preserve<'a, I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.iter().any(|seen| seen == item) {
            out.push(item.to_string());
        }
    }
    out
}

/// Regex source for a normalized term
pub fn term_pattern(term: &str, boundary: Boundary) -> String {
    let collapsed = term.split_whitespace().collect::<Vec<_>>().join(" ");
    let core = regex::escape(&collapsed)
        .replace(r"\*", ".*")
        .replace(' ', r"\s+");
    match boundary {
        Boundary::Word => format!(r"\b(?:{})\b", core),
        Boundary::Edge => format!(r"(?:^|\W)(?:{})(?:\W|$)", core),
    }
}

impl ProtectedLexicon {
    /// Parse a lexicon JSON document
    ///
    /// # Errors
    /// `Malformed` unless the document is an object of objects of string lists
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| Error::malformed(LEXICON, e.to_string()))?;
        let top = value
            .as_object()
            .ok_or_else(|| Error::malformed(LEXICON, "top level must be an object"))?;

        let mut terms = BTreeMap::new();
        for (ns, groups) in top {
            let groups = groups.as_object().ok_or_else(|| {
                Error::malformed(LEXICON, format!("namespace '{}' must map to an object of subgroups", ns))
            })?;
            let mut subgroups = BTreeMap::new();
            for (sg, list) in groups {
                let list = list
                    .as_array()
                    .and_then(|items| items.iter().map(|t| t.as_str().map(String::from)).collect::<Option<Vec<_>>>())
                    .ok_or_else(|| {
                        Error::malformed(LEXICON, format!("subgroup '{}.{}' must be a list of strings", ns, sg))
                    })?;
                subgroups.insert(sg.clone(), list);
            }
            terms.insert(ns.clone(), subgroups);
        }
        Ok(Self { terms })
    }

    /// Read a lexicon JSON file
    pub fn from_json(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::missing(LEXICON, path));
        }
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Namespaces in sorted order
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.terms.keys().map(String::as_str)
    }

    /// Compile every term
    ///
    /// Terms that are blank after trimming are skipped.
    pub fn compile(&self, boundary: Boundary) -> Result<CompiledLexicon> {
        let mut groups = BTreeMap::new();
        let mut compiled_count = 0usize;
        for (ns, subgroups) in &self.terms {
            let mut compiled_groups = BTreeMap::new();
            for (sg, terms) in subgroups {
                let normalised: Vec<String> = terms.iter().map(|t| normalise_term(t)).collect();
                let unique = dedupe_preserve(normalised.iter().map(String::as_str).filter(|t| !t.is_empty()));
                let mut compiled = Vec::with_capacity(unique.len());
                for raw in unique {
                    let pattern = RegexBuilder::new(&term_pattern(&raw, boundary))
                        .case_insensitive(true)
                        .build()?;
                    compiled.push(CompiledTerm { raw, pattern });
                }
                compiled_count += compiled.len();
                compiled_groups.insert(sg.clone(), compiled);
            }
            groups.insert(ns.clone(), compiled_groups);
        }
        debug!(terms = compiled_count, ?boundary, "Compiled lexicon");
        Ok(CompiledLexicon { groups })
    }

    /// Counts, empty subgroups and terms shared between subgroups
    pub fn audit(&self) -> LexiconAudit {
        let mut index: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
        let mut empty_groups = Vec::new();
        let mut total_terms = 0;

        for (ns, subgroups) in &self.terms {
            for (sg, terms) in subgroups {
                if terms.is_empty() {
                    empty_groups.push((ns.clone(), sg.clone()));
                }
                for term in terms {
                    index
                        .entry(normalise_term(term))
                        .or_default()
                        .push((ns.clone(), sg.clone()));
                    total_terms += 1;
                }
            }
        }

        let overlaps: Vec<(String, Vec<(String, String)>)> =
            index.into_iter().filter(|(_, pairs)| pairs.len() > 1).collect();

        LexiconAudit {
            namespaces: self.terms.len(),
            subgroups: self.terms.values().map(BTreeMap::len).sum(),
            terms: total_terms,
            empty_groups,
            overlap_terms_count: overlaps.len(),
            overlap_examples: overlaps.into_iter().take(OVERLAP_EXAMPLES).collect(),
        }
    }
}

impl CompiledLexicon {
    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.groups.contains_key(namespace)
    }

    /// Subgroups of `namespace` with at least one pattern matching `text`
    fn matching_subgroups<'a>(&'a self, namespace: &str, texts: &'a [&'a str]) -> Vec<&'a str> {
        self.groups
            .get(namespace)
            .map(|subgroups| {
                subgroups
                    .iter()
                    .filter(|(_, terms)| {
                        terms
                            .iter()
                            .any(|t| texts.iter().any(|text| t.pattern.is_match(text)))
                    })
                    .map(|(sg, _)| sg.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every (namespace, subgroup) with the terms matched in `text`
    pub fn match_text(&self, text: &str) -> Vec<TermHit> {
        let mut hits = Vec::new();
        if text.is_empty() {
            return hits;
        }
        for (ns, subgroups) in &self.groups {
            for (sg, terms) in subgroups {
                let matched = dedupe_preserve(
                    terms
                        .iter()
                        .filter(|t| t.pattern.is_match(text))
                        .map(|t| t.raw.as_str()),
                );
                if !matched.is_empty() {
                    hits.push(TermHit {
                        namespace: ns.clone(),
                        subgroup: sg.clone(),
                        terms: matched,
                    });
                }
            }
        }
        hits
    }

    /// Resolve membership for every video
    ///
    /// A video belongs to a subgroup when any of its terms matches the title
    /// or the tags. Requested namespaces missing from the lexicon are ignored.
    pub fn resolve(&self, texts: &[VideoText], namespaces: &[String]) -> MembershipMap {
        let usable: Vec<&String> = namespaces.iter().filter(|ns| self.has_namespace(ns)).collect();
        let map = MembershipMap::from_entries(texts.iter().map(|video| {
            let fields = [video.title.as_str(), video.tags.as_str()];
            let membership: VideoMembership = usable
                .iter()
                .map(|ns| {
                    let subgroups: super::Subgroups = self
                        .matching_subgroups(ns, &fields)
                        .into_iter()
                        .map(String::from)
                        .collect();
                    ((*ns).clone(), subgroups)
                })
                .collect();
            (video.video_id, membership)
        }));
        info!(
            videos = texts.len(),
            matched = map.len(),
            namespaces = usable.len(),
            "Resolved lexicon membership"
        );
        map
    }
}
