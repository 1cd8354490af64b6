//! Stream selection: which streams a projection reads.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use streamfold_core::{EngineError, EngineResult, StreamId};

use crate::PositionTable;

/// A declared interest in a set of streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Selection {
    /// Streams named `<prefix>-...`.
    Category(String),
    /// Streams in any of the categories.
    Categories(Vec<String>),
    /// Exactly these streams, whether or not they exist yet.
    Streams(Vec<StreamId>),
    /// Every non-internal stream.
    All,
}

impl Selection {
    /// Whether a catalog stream is selected. Explicit streams are matched by name.
    pub fn matches(&self, stream: &StreamId) -> bool {
        match self {
            Selection::Category(prefix) => stream.in_category(prefix),
            Selection::Categories(prefixes) => prefixes.iter().any(|p| stream.in_category(p)),
            Selection::Streams(names) => names.contains(stream),
            Selection::All => !stream.is_internal(),
        }
    }

    /// Resolve against a point-in-time catalog into a table of unread positions.
    pub fn resolve(&self, catalog: &BTreeSet<StreamId>) -> PositionTable {
        match self {
            // Named streams are tracked even if the catalog has never seen them.
            Selection::Streams(names) => PositionTable::unread(names.iter().cloned()),
            _ => PositionTable::unread(catalog.iter().filter(|s| self.matches(s)).cloned()),
        }
    }
}

/// Write-once holder of a projection's selection.
#[derive(Debug, Clone, Default)]
pub struct StreamSelector {
    declared: Option<Selection>,
}

impl StreamSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the selection. Fails if one was already declared.
    pub fn declare(&mut self, selection: Selection) -> EngineResult<()> {
        if self.declared.is_some() {
            return Err(EngineError::protocol("selection already declared"));
        }
        self.declared = Some(selection);
        Ok(())
    }

    pub fn select_category(&mut self, prefix: impl Into<String>) -> EngineResult<()> {
        self.declare(Selection::Category(prefix.into()))
    }

    pub fn select_categories<I, S>(&mut self, prefixes: I) -> EngineResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declare(Selection::Categories(prefixes.into_iter().map(Into::into).collect()))
    }

    pub fn select_streams<I, S>(&mut self, names: I) -> EngineResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<StreamId>,
    {
        self.declare(Selection::Streams(names.into_iter().map(Into::into).collect()))
    }

    pub fn select_all(&mut self) -> EngineResult<()> {
        self.declare(Selection::All)
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.declared.as_ref()
    }

    pub fn is_declared(&self) -> bool {
        self.declared.is_some()
    }

    /// Resolve the declared selection against a catalog.
    pub fn resolve(&self, catalog: &BTreeSet<StreamId>) -> EngineResult<PositionTable> {
        self.declared
            .as_ref()
            .map(|s| s.resolve(catalog))
            .ok_or_else(|| EngineError::protocol("no stream selection declared"))
    }
}
