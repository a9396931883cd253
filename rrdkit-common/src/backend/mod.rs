//! Persistence of archive sets.
//!
//! A backend stores, per archive set name, the [RrdState] and the rows written
//! by every archive. Rows are only ever appended, and a backend never keeps more
//! rows per archive than the archive has.
mod file;
mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

use std::{collections::VecDeque, fmt, ops::RangeInclusive};

use serde::{Deserialize, Serialize};

use crate::{
    error::{BackendError, RrdError},
    rrd::{archive::ArchiveRow, RrdState},
    Timestamp,
};

pub trait Backend: fmt::Debug + Send + Sync {
    fn exists(&self, name: &str) -> Result<bool, RrdError>;

    /// Names of all stored archive sets.
    fn list(&self) -> Result<Vec<String>, RrdError>;

    /// Store a new archive set, fails with [RrdError::AlreadyExists] if `name` is taken.
    fn create(&self, name: &str, state: &RrdState) -> Result<(), RrdError>;

    fn store_state(&self, name: &str, state: &RrdState) -> Result<(), RrdError>;

    fn load_state(&self, name: &str) -> Result<RrdState, RrdError>;

    fn append_rows(&self, name: &str, archive: usize, rows: &[ArchiveRow])
        -> Result<(), RrdError>;

    /// Rows of `archive` whose timestamp are in `range`, oldest first.
    fn read_rows(
        &self,
        name: &str,
        archive: usize,
        range: RangeInclusive<Timestamp>,
    ) -> Result<Vec<ArchiveRow>, RrdError>;

    fn delete(&self, name: &str) -> Result<(), RrdError>;

    /// Persist the outcome of an update: rows written by each archive and the new state.
    fn commit(
        &self,
        name: &str,
        state: &RrdState,
        rows: &[Vec<ArchiveRow>],
    ) -> Result<(), RrdError> {
        rows.iter()
            .enumerate()
            .filter(|(_, rows)| !rows.is_empty())
            .try_for_each(|(archive, rows)| self.append_rows(name, archive, rows))?;

        self.store_state(name, state)
    }
}

/// Rows of an archive, bounded to its row count.
#[derive(Clone, Default, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct RowStore {
    capacity: usize,
    rows: VecDeque<ArchiveRow>,
}

impl RowStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            rows: VecDeque::with_capacity(capacity),
        }
    }

    /// Append rows in time order, replacing stored rows that aren't older.
    pub fn append(&mut self, rows: &[ArchiveRow]) {
        for row in rows {
            while self
                .rows
                .back()
                .is_some_and(|last| last.timestamp >= row.timestamp)
            {
                self.rows.pop_back();
            }

            self.rows.push_back(row.clone());
        }

        while self.rows.len() > self.capacity {
            self.rows.pop_front();
        }
    }

    pub fn read(&self, range: RangeInclusive<Timestamp>) -> Vec<ArchiveRow> {
        self.rows
            .iter()
            .filter(|row| range.contains(&row.timestamp))
            .cloned()
            .collect()
    }
}

/// Everything a backend keeps about an archive set.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct StoredRrd {
    pub state: RrdState,
    pub rows: Vec<RowStore>,
}

impl StoredRrd {
    pub fn new(state: &RrdState) -> Self {
        Self {
            rows: state
                .archives
                .iter()
                .map(|archive| RowStore::new(archive.spec.rows as usize))
                .collect(),
            state: state.clone(),
        }
    }

    pub fn archive(&mut self, index: usize) -> Result<&mut RowStore, BackendError> {
        self.rows
            .get_mut(index)
            .ok_or(BackendError::UnknownArchive(index))
    }
}

/// Names end up in paths, keep them to a single plain component.
pub(crate) fn check_name(name: &str) -> Result<(), RrdError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0']);

    if valid {
        Ok(())
    } else {
        Err(RrdError::invalid_spec(
            "name",
            format!("'{name}' is not a valid archive set name"),
        ))
    }
}
