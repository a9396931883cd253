//! Fetch results.
use std::collections::BTreeMap;

use compact_str::CompactString;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::{
    archive::{ArchiveWindow, RoundRobinArchive},
    database::DataSourceState,
    definition::ConsolidationFunction,
};
use crate::Timestamp;

/// Outcome of [super::Rrd::fetch]: an archive and a time window.
///
/// Nothing is read until a series is iterated, and every series can be iterated
/// as many times as needed.
#[derive(Clone, Copy, Debug)]
pub struct Fetch<'a> {
    archive: &'a RoundRobinArchive,
    sources: &'a [DataSourceState],
    start: Timestamp,
    end: Timestamp,
}

impl<'a> Fetch<'a> {
    pub(super) fn new(
        archive: &'a RoundRobinArchive,
        sources: &'a [DataSourceState],
        start: Timestamp,
        end: Timestamp,
    ) -> Self {
        Self {
            archive,
            sources,
            start,
            end,
        }
    }

    pub fn cf(&self) -> ConsolidationFunction {
        self.archive.spec().cf
    }

    /// Seconds between two rows of the result.
    pub fn span(&self) -> u64 {
        self.archive.span()
    }

    /// Data source names, in column order.
    pub fn names(&self) -> impl Iterator<Item = &'a str> {
        self.sources.iter().map(|source| source.spec.name.as_str())
    }

    /// Series of the data source `name`.
    pub fn series(&self, name: &str) -> Option<ArchiveWindow<'a>> {
        let column = self
            .sources
            .iter()
            .position(|source| source.spec.name == name)?;

        Some(self.archive.read_window(column, self.start, self.end))
    }

    /// Every data source with its series.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, ArchiveWindow<'a>)> {
        let Self {
            archive,
            sources,
            start,
            end,
        } = *self;

        sources.iter().enumerate().map(move |(column, source)| {
            (
                source.spec.name.as_str(),
                archive.read_window(column, start, end),
            )
        })
    }

    /// Rows of the result: a timestamp and one value per data source.
    pub fn rows(&self) -> impl Iterator<Item = (Timestamp, SmallVec<[Option<f64>; 4]>)> + 'a {
        let Self {
            archive,
            sources,
            start,
            end,
        } = *self;

        archive.read_window(0, start, end).map(move |(timestamp, _)| {
            let values = (0..sources.len())
                .map(|column| archive.value_at(timestamp, column))
                .collect();

            (timestamp, values)
        })
    }

    /// Read the whole result.
    pub fn to_result(&self) -> FetchResult {
        let timestamps: Vec<Timestamp> = self
            .archive
            .read_window(0, self.start, self.end)
            .map(|(timestamp, _)| timestamp)
            .collect();

        FetchResult {
            cf: self.cf(),
            step: self.span(),
            start: timestamps.first().copied().unwrap_or(self.start),
            end: timestamps.last().copied().unwrap_or(self.end),
            series: self
                .iter()
                .map(|(name, window)| (CompactString::from(name), window.collect()))
                .collect(),
        }
    }
}

/// Owned fetch result, series keyed by data source name.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct FetchResult {
    pub cf: ConsolidationFunction,
    pub step: u64,
    /// First row timestamp.
    pub start: Timestamp,
    /// Last row timestamp.
    pub end: Timestamp,
    pub series: IndexMap<CompactString, Vec<(Timestamp, Option<f64>)>>,
}

impl FetchResult {
    /// Same result indexed by time.
    pub fn by_time(&self) -> BTreeMap<Timestamp, IndexMap<&str, Option<f64>>> {
        let mut rows: BTreeMap<Timestamp, IndexMap<&str, Option<f64>>> = BTreeMap::new();

        for (name, series) in &self.series {
            for &(timestamp, value) in series {
                rows.entry(timestamp).or_default().insert(name.as_str(), value);
            }
        }

        rows
    }
}
