//! Per-stream read positions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use streamfold_core::StreamId;

/// Mapping from stream to the next offset to read (0 = unread).
///
/// Backed by a `BTreeMap`, so iteration is in lexical stream order. The runner
/// relies on that to compose batches the same way across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionTable(BTreeMap<StreamId, u64>);

impl PositionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every given stream at offset 0.
    pub fn unread(streams: impl IntoIterator<Item = StreamId>) -> Self {
        Self(streams.into_iter().map(|s| (s, 0)).collect())
    }

    /// Next offset to read for `stream` (0 when the stream is not tracked).
    pub fn offset(&self, stream: &StreamId) -> u64 {
        self.0.get(stream).copied().unwrap_or(0)
    }

    pub fn get(&self, stream: &StreamId) -> Option<u64> {
        self.0.get(stream).copied()
    }

    pub fn contains(&self, stream: &StreamId) -> bool {
        self.0.contains_key(stream)
    }

    /// Move `stream` forward to `next`. Never moves a position backwards.
    pub fn advance(&mut self, stream: &StreamId, next: u64) {
        match self.0.get_mut(stream) {
            Some(current) => *current = (*current).max(next),
            None => {
                self.0.insert(stream.clone(), next);
            }
        }
    }

    /// Start tracking every stream of `other` that is not tracked yet.
    ///
    /// Existing positions win: used at start to layer a fresh selection over
    /// offsets restored from a checkpoint.
    pub fn track_missing(&mut self, other: &PositionTable) {
        for (stream, offset) in other.iter() {
            self.0.entry(stream.clone()).or_insert(offset);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StreamId, u64)> + '_ {
        self.0.iter().map(|(s, o)| (s, *o))
    }

    pub fn streams(&self) -> impl Iterator<Item = &StreamId> + '_ {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Sum of all offsets, i.e. number of events consumed across streams.
    pub fn total_consumed(&self) -> u64 {
        self.0.values().sum()
    }
}

impl FromIterator<(StreamId, u64)> for PositionTable {
    fn from_iter<T: IntoIterator<Item = (StreamId, u64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
