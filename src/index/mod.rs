//! Metric index: hierarchical tree lookup plus a tag→name inverted index.
//!
//! Six logical tables back the index: a tag dictionary, its reverse
//! mapping, a tag→name inverted index, a name→tags dense mapping, a
//! name-hash presence set, and the dotted-path tree those tags encode.
//! They live here as plain in-memory maps, rebuilt at startup by replaying
//! an append-only [`log::IndexLog`]. Tag-predicate intersection uses the
//! [`cursor`] k-way merge protocol.

pub mod cursor;
pub mod log;
pub mod names;
pub mod pattern;

#[cfg(test)]
mod tests;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use xxhash_rust::xxh64::xxh64;

use self::cursor::{PredicateCursor, intersect};
use self::log::{IndexEvent, IndexLog, IndexLogError};
use self::names::{join_name, split_name};
use self::pattern::{PatternError, ValueMatcher};

pub type TagId = u32;
pub type NameId = u32;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IndexError {
    #[error(transparent)]
    Log(#[from] IndexLogError),

    #[error(transparent)]
    Pattern(#[from] PatternError),
}

/// A single tag predicate: `tag <op> value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOp {
    Eq,
    Ne,
    Match,
    NotMatch,
}

pub struct MetricIndex {
    log: IndexLog,

    tag_to_id: HashMap<(Vec<u8>, Vec<u8>), TagId>,
    id_to_tag: HashMap<TagId, (Vec<u8>, Vec<u8>)>,
    tag_values: HashMap<Vec<u8>, BTreeSet<Vec<u8>>>,
    tag_id_to_name_ids: HashMap<TagId, BTreeSet<NameId>>,
    name_id_to_tag_ids: HashMap<NameId, Vec<TagId>>,
    name_hashes: BTreeSet<u64>,

    next_tag_id: TagId,
    next_name_id: NameId,
}

impl MetricIndex {
    /// Opens (or creates) the index log at `<data_dir>/index.log` and
    /// replays it into fresh in-memory tables.
    pub fn open(data_dir: &Path) -> Result<Self, IndexError> {
        let path = Self::log_path(data_dir);
        let events = IndexLog::replay(&path)?;
        let log = IndexLog::open(&path)?;

        let mut index = MetricIndex {
            log,
            tag_to_id: HashMap::new(),
            id_to_tag: HashMap::new(),
            tag_values: HashMap::new(),
            tag_id_to_name_ids: HashMap::new(),
            name_id_to_tag_ids: HashMap::new(),
            name_hashes: BTreeSet::new(),
            next_tag_id: 0,
            next_name_id: 0,
        };
        for event in events {
            index.apply(event);
        }
        debug!(
            tags = index.tag_to_id.len(),
            names = index.name_id_to_tag_ids.len(),
            "metric index replayed from log"
        );
        Ok(index)
    }

    fn log_path(data_dir: &Path) -> PathBuf {
        data_dir.join("index.log")
    }

    fn apply(&mut self, event: IndexEvent) {
        match event {
            IndexEvent::AddTag { tag_id, tag, value } => {
                self.tag_to_id.insert((tag.clone(), value.clone()), tag_id);
                self.id_to_tag.insert(tag_id, (tag.clone(), value.clone()));
                self.tag_values.entry(tag).or_default().insert(value);
                self.next_tag_id = self.next_tag_id.max(tag_id + 1);
            }
            IndexEvent::AddName {
                name_id,
                name_hash,
                tag_ids,
            } => {
                for &tag_id in &tag_ids {
                    self.tag_id_to_name_ids.entry(tag_id).or_default().insert(name_id);
                }
                self.name_id_to_tag_ids.insert(name_id, tag_ids);
                self.name_hashes.insert(name_hash);
                self.next_name_id = self.next_name_id.max(name_id + 1);
            }
        }
    }

    fn name_hash(name: &[u8]) -> u64 {
        xxh64(name, 0)
    }

    /// Filters `names` down to those not already present, by name hash.
    pub fn filter_existing(&self, names: &[Vec<u8>]) -> Vec<Vec<u8>> {
        names
            .iter()
            .filter(|n| !self.name_hashes.contains(&Self::name_hash(n)))
            .cloned()
            .collect()
    }

    fn intern_tag(&mut self, tag: &[u8], value: &[u8]) -> Result<TagId, IndexError> {
        if let Some(&id) = self.tag_to_id.get(&(tag.to_vec(), value.to_vec())) {
            return Ok(id);
        }
        let id = self.next_tag_id;
        self.next_tag_id += 1;
        self.log.append(&IndexEvent::AddTag {
            tag_id: id,
            tag: tag.to_vec(),
            value: value.to_vec(),
        })?;
        self.apply(IndexEvent::AddTag {
            tag_id: id,
            tag: tag.to_vec(),
            value: value.to_vec(),
        });
        Ok(id)
    }

    /// Indexes every name in `names` not already present (idempotent at the
    /// name-hash level — re-adding an already-known name is a no-op).
    pub fn add(&mut self, names: &[Vec<u8>]) -> Result<(), IndexError> {
        for name in self.filter_existing(names) {
            let pairs = split_name(&name);
            let mut tag_ids = Vec::with_capacity(pairs.len());
            for (tag, value) in &pairs {
                tag_ids.push(self.intern_tag(tag, value)?);
            }
            let name_id = self.next_name_id;
            self.next_name_id += 1;
            let name_hash = Self::name_hash(&name);
            self.log.append(&IndexEvent::AddName {
                name_id,
                name_hash,
                tag_ids: tag_ids.clone(),
            })?;
            self.apply(IndexEvent::AddName {
                name_id,
                name_hash,
                tag_ids,
            });
        }
        Ok(())
    }

    fn all_name_ids_for_tag(&self, tag: &[u8]) -> BTreeSet<NameId> {
        let mut out = BTreeSet::new();
        if let Some(values) = self.tag_values.get(tag) {
            for value in values {
                if let Some(&id) = self.tag_to_id.get(&(tag.to_vec(), value.clone())) {
                    if let Some(ids) = self.tag_id_to_name_ids.get(&id) {
                        out.extend(ids);
                    }
                }
            }
        }
        out
    }

    fn name_ids_matching(&self, tag: &[u8], matcher: &ValueMatcher) -> BTreeSet<NameId> {
        let mut out = BTreeSet::new();
        if let Some(values) = self.tag_values.get(tag) {
            for value in values {
                if matcher.matches(value) {
                    if let Some(&id) = self.tag_to_id.get(&(tag.to_vec(), value.clone())) {
                        if let Some(ids) = self.tag_id_to_name_ids.get(&id) {
                            out.extend(ids);
                        }
                    }
                }
            }
        }
        out
    }

    /// Resolves one predicate to its candidate name-id set.
    fn resolve_predicate(
        &self,
        tag: &[u8],
        op: TagOp,
        value: &str,
    ) -> Result<BTreeSet<NameId>, IndexError> {
        match op {
            TagOp::Eq => Ok(self.name_ids_matching(tag, &ValueMatcher::Set(vec![value.as_bytes().to_vec()]))),
            TagOp::Ne => {
                let all = self.all_name_ids_for_tag(tag);
                let matching =
                    self.name_ids_matching(tag, &ValueMatcher::Set(vec![value.as_bytes().to_vec()]));
                Ok(all.difference(&matching).copied().collect())
            }
            TagOp::Match => {
                let matcher = ValueMatcher::parse(value)?;
                Ok(self.name_ids_matching(tag, &matcher))
            }
            TagOp::NotMatch => {
                let all = self.all_name_ids_for_tag(tag);
                let matcher = ValueMatcher::parse(value)?;
                let matching = self.name_ids_matching(tag, &matcher);
                Ok(all.difference(&matching).copied().collect())
            }
        }
    }

    /// Intersects a set of `(tag, op, value)` predicates, returning matching
    /// names in an unspecified but deterministic order.
    pub fn match_by_tags(&self, predicates: &[(&[u8], TagOp, &str)]) -> Result<Vec<Vec<u8>>, IndexError> {
        let mut sets = Vec::with_capacity(predicates.len());
        for (tag, op, value) in predicates {
            sets.push(self.resolve_predicate(tag, *op, value)?);
        }
        let cursors: Vec<PredicateCursor> = sets.iter().map(PredicateCursor::new).collect();
        let ids = intersect(cursors);
        Ok(ids
            .into_iter()
            .filter_map(|id| self.name_id_to_tag_ids.get(&id))
            .map(|tag_ids| {
                let pairs: Vec<_> = tag_ids
                    .iter()
                    .filter_map(|id| self.id_to_tag.get(id).cloned())
                    .collect();
                join_name(&pairs)
            })
            .collect())
    }

    /// Dotted-path query: each segment may be a plain glob pattern
    /// (`*`, `?`); the query must match the exact segment count of the
    /// stored dotted name (no prefix/branch matching beyond that).
    pub fn find_metrics(&self, query: &str) -> Result<Vec<Vec<u8>>, IndexError> {
        let segments: Vec<&str> = query.split('.').collect();
        let mut predicates: Vec<(Vec<u8>, TagOp, String)> = Vec::with_capacity(segments.len() + 1);
        for (i, seg) in segments.iter().enumerate() {
            let tag = format!(".{i}").into_bytes();
            let value = if seg.contains('*') || seg.contains('?') {
                format!("!{seg}")
            } else {
                format!(":{seg}")
            };
            predicates.push((tag, TagOp::Match, value));
        }
        predicates.push((b".len".to_vec(), TagOp::Eq, segments.len().to_string()));
        let borrowed: Vec<(&[u8], TagOp, &str)> = predicates
            .iter()
            .map(|(t, op, v)| (t.as_slice(), *op, v.as_str()))
            .collect();
        self.match_by_tags(&borrowed)
    }

    pub fn tag_count(&self) -> usize {
        self.tag_to_id.len()
    }

    pub fn name_count(&self) -> usize {
        self.name_id_to_tag_ids.len()
    }
}
