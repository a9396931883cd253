//! In-memory backend.
use std::{
    collections::HashMap,
    ops::RangeInclusive,
    sync::{Mutex, MutexGuard, PoisonError},
};

use super::{Backend, StoredRrd};
use crate::{
    error::RrdError,
    rrd::{archive::ArchiveRow, RrdState},
    Timestamp,
};

/// Backend keeping everything in memory, lost on drop.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    sets: Mutex<HashMap<Box<str>, StoredRrd>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn sets(&self) -> MutexGuard<'_, HashMap<Box<str>, StoredRrd>> {
        self.sets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut StoredRrd) -> Result<R, RrdError>,
    ) -> Result<R, RrdError> {
        let mut sets = self.sets();
        let stored = sets
            .get_mut(name)
            .ok_or_else(|| RrdError::NotFound(name.into()))?;

        f(stored)
    }
}

impl Backend for MemoryBackend {
    fn exists(&self, name: &str) -> Result<bool, RrdError> {
        Ok(self.sets().contains_key(name))
    }

    fn list(&self) -> Result<Vec<String>, RrdError> {
        let mut names: Vec<String> = self.sets().keys().map(|name| name.to_string()).collect();
        names.sort_unstable();

        Ok(names)
    }

    fn create(&self, name: &str, state: &RrdState) -> Result<(), RrdError> {
        let mut sets = self.sets();

        if sets.contains_key(name) {
            return Err(RrdError::AlreadyExists(name.into()));
        }

        sets.insert(name.into(), StoredRrd::new(state));
        Ok(())
    }

    fn store_state(&self, name: &str, state: &RrdState) -> Result<(), RrdError> {
        self.with(name, |stored| {
            stored.state = state.clone();
            Ok(())
        })
    }

    fn load_state(&self, name: &str) -> Result<RrdState, RrdError> {
        self.with(name, |stored| Ok(stored.state.clone()))
    }

    fn append_rows(
        &self,
        name: &str,
        archive: usize,
        rows: &[ArchiveRow],
    ) -> Result<(), RrdError> {
        self.with(name, |stored| {
            stored.archive(archive)?.append(rows);
            Ok(())
        })
    }

    fn read_rows(
        &self,
        name: &str,
        archive: usize,
        range: RangeInclusive<Timestamp>,
    ) -> Result<Vec<ArchiveRow>, RrdError> {
        self.with(name, |stored| Ok(stored.archive(archive)?.read(range)))
    }

    fn delete(&self, name: &str) -> Result<(), RrdError> {
        self.sets()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RrdError::NotFound(name.into()))
    }
}
