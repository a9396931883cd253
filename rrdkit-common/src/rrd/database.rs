//! [Rrd] archive set coordinator.
use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use super::{
    archive::{ArchiveRow, ArchiveState, RoundRobinArchive},
    definition::{ArchiveSpec, ConsolidationFunction, DataSourceSpec},
    fetch::Fetch,
    pdp::{PdpState, StepSplit},
};
use crate::{
    backend::Backend,
    error::RrdError,
    sample::{Sample, SampleValue},
    Timestamp,
};

/// What an archive set is made of.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct RrdDefinition {
    /// Time of the (virtual) first update, samples must come after it.
    pub start: Timestamp,
    /// Seconds between primary data points.
    pub step: u64,
    pub data_sources: Vec<DataSourceSpec>,
    pub archives: Vec<ArchiveSpec>,
}

impl RrdDefinition {
    pub fn new(start: Timestamp, step: u64) -> Self {
        Self {
            start,
            step,
            data_sources: vec![],
            archives: vec![],
        }
    }

    pub fn data_source(mut self, spec: DataSourceSpec) -> Self {
        self.data_sources.push(spec);
        self
    }

    pub fn archive(mut self, spec: ArchiveSpec) -> Self {
        self.archives.push(spec);
        self
    }

    pub fn validate(&self) -> Result<(), RrdError> {
        if self.step == 0 {
            return Err(RrdError::invalid_spec("step", "must be at least 1 second"));
        }

        if self.data_sources.is_empty() {
            return Err(RrdError::invalid_spec(
                "ds",
                "at least one data source is needed",
            ));
        }

        for (index, spec) in self.data_sources.iter().enumerate() {
            spec.validate()?;

            if self.data_sources[..index]
                .iter()
                .any(|other| other.name == spec.name)
            {
                return Err(RrdError::invalid_spec(
                    format!("ds[{}]", spec.name),
                    "duplicate data source name",
                ));
            }
        }

        for spec in &self.archives {
            spec.validate()?;

            let span = u64::from(spec.steps)
                .checked_mul(self.step)
                .ok_or_else(|| {
                    RrdError::invalid_spec(
                        "rra.steps",
                        format!("{} steps of {}s overflow the row span", spec.steps, self.step),
                    )
                })?;

            if span.checked_mul(u64::from(spec.rows)).is_none() {
                return Err(RrdError::invalid_spec(
                    "rra.rows",
                    format!("{} rows of {span}s overflow the archive length", spec.rows),
                ));
            }
        }

        Ok(())
    }
}

/// A data source and its accumulation state.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct DataSourceState {
    pub spec: DataSourceSpec,
    pub pdp: PdpState,
}

/// Persisted state of an archive set, rows excluded.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct RrdState {
    pub step: u64,
    pub start: Timestamp,
    pub last_update: Timestamp,
    pub data_sources: Vec<DataSourceState>,
    pub archives: Vec<ArchiveState>,
}

/// Archive state with all its rows.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ArchiveDump {
    #[serde(flatten)]
    pub state: ArchiveState,
    /// Retained rows, oldest first.
    pub database: Vec<ArchiveRow>,
}

/// Whole content of an archive set.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct RrdDump {
    pub name: Box<str>,
    pub step: u64,
    pub start: Timestamp,
    pub last_update: Timestamp,
    pub data_sources: Vec<DataSourceState>,
    pub archives: Vec<ArchiveDump>,
}

impl RrdDump {
    /// Check that the dump describes an archive set [Rrd::open] can use.
    pub fn validate(&self) -> Result<(), RrdError> {
        let definition = RrdDefinition {
            start: self.start,
            step: self.step,
            data_sources: self.data_sources.iter().map(|ds| ds.spec.clone()).collect(),
            archives: self.archives.iter().map(|a| a.state.spec.clone()).collect(),
        };

        definition.validate()?;

        if self.last_update < self.start {
            return Err(RrdError::invalid_spec(
                "last_update",
                format!("{} is before the start {}", self.last_update, self.start),
            ));
        }

        let width = self.data_sources.len();

        for (index, ArchiveDump { state, database }) in self.archives.iter().enumerate() {
            if state.cdp.len() != width {
                return Err(RrdError::invalid_spec(
                    format!("rra[{index}].cdp"),
                    format!("{} entries for {width} data sources", state.cdp.len()),
                ));
            }

            if state.cursor >= state.spec.rows as usize {
                return Err(RrdError::invalid_spec(
                    format!("rra[{index}].cursor"),
                    format!("{} is out of {} rows", state.cursor, state.spec.rows),
                ));
            }

            if state.last_row % state.spec.span(self.step) != 0 {
                return Err(RrdError::invalid_spec(
                    format!("rra[{index}].last_row"),
                    format!("{} is not aligned on the row span", state.last_row),
                ));
            }

            if let Some(row) = database.iter().find(|row| row.values.len() != width) {
                return Err(RrdError::invalid_spec(
                    format!("rra[{index}].database"),
                    format!("row {} has {} values", row.timestamp, row.values.len()),
                ));
            }
        }

        Ok(())
    }
}

/// A value of [Rrd::info].
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InfoValue {
    Text(Box<str>),
    Count(u64),
    Value(Option<f64>),
}

impl fmt::Display for InfoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "\"{text}\""),
            Self::Count(count) => write!(f, "{count}"),
            Self::Value(Some(value)) => write!(f, "{value}"),
            Self::Value(None) => f.write_str("NaN"),
        }
    }
}

/// An archive set: data sources, their accumulation state, and the archives.
///
/// Updates need `&mut self` and fetches borrow `&self`, so a [Fetch] always sees
/// a consistent archive set.
#[derive(Debug)]
pub struct Rrd {
    name: Box<str>,
    step: u64,
    start: Timestamp,
    last_update: Timestamp,
    sources: Vec<DataSourceState>,
    archives: Vec<RoundRobinArchive>,
    backend: Arc<dyn Backend>,
}

impl Rrd {
    /// Create and persist a new archive set.
    pub fn create(
        name: &str,
        definition: RrdDefinition,
        backend: Arc<dyn Backend>,
    ) -> Result<Self, RrdError> {
        if name.is_empty() {
            return Err(RrdError::invalid_spec("name", "must not be empty"));
        }

        definition.validate()?;

        let RrdDefinition {
            start,
            step,
            data_sources,
            archives,
        } = definition;

        let width = data_sources.len();

        let rrd = Self {
            name: name.into(),
            step,
            start,
            last_update: start,
            sources: data_sources
                .into_iter()
                .map(|spec| DataSourceState {
                    spec,
                    pdp: PdpState::new(start % step),
                })
                .collect(),
            archives: archives
                .into_iter()
                .map(|spec| RoundRobinArchive::new(spec, step, width, start))
                .collect(),
            backend,
        };

        rrd.backend.create(name, &rrd.state())?;
        tracing::info!(
            "Created {name} (step {step}s, {} data sources, {} archives)",
            rrd.sources.len(),
            rrd.archives.len()
        );

        Ok(rrd)
    }

    /// Load a persisted archive set.
    pub fn open(name: &str, backend: Arc<dyn Backend>) -> Result<Self, RrdError> {
        let RrdState {
            step,
            start,
            last_update,
            data_sources,
            archives,
        } = backend.load_state(name)?;

        let archives = archives
            .into_iter()
            .enumerate()
            .map(|(index, state)| {
                let span = state.spec.span(step);
                let oldest = state
                    .last_row
                    .saturating_sub((state.spec.rows as u64).saturating_sub(1) * span);

                let rows = backend.read_rows(name, index, oldest..=state.last_row)?;
                Ok(RoundRobinArchive::restore(state, step, &rows))
            })
            .collect::<Result<Vec<_>, RrdError>>()?;

        tracing::debug!("Opened {name} (last update {last_update})");

        Ok(Self {
            name: name.into(),
            step,
            start,
            last_update,
            sources: data_sources,
            archives,
            backend,
        })
    }

    /// Create an archive set from a [Rrd::dump].
    ///
    /// The dump is checked the way [Rrd::create] checks a definition, along
    /// with the consolidation state of every archive.
    pub fn restore(
        name: &str,
        dump: RrdDump,
        backend: Arc<dyn Backend>,
    ) -> Result<Self, RrdError> {
        if name.is_empty() {
            return Err(RrdError::invalid_spec("name", "must not be empty"));
        }

        dump.validate()?;

        let rows: Vec<Vec<ArchiveRow>> = dump
            .archives
            .iter()
            .map(|archive| archive.database.clone())
            .collect();

        let state = RrdState {
            step: dump.step,
            start: dump.start,
            last_update: dump.last_update,
            data_sources: dump.data_sources,
            archives: dump.archives.into_iter().map(|a| a.state).collect(),
        };

        backend.create(name, &state)?;
        backend.commit(name, &state, &rows)?;

        Self::open(name, backend)
    }

    /// Remove the persisted archive set.
    pub fn delete(self) -> Result<(), RrdError> {
        self.backend.delete(&self.name)?;
        tracing::info!("Deleted {}", self.name);

        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn last_update(&self) -> Timestamp {
        self.last_update
    }

    pub fn data_sources(&self) -> impl Iterator<Item = &DataSourceSpec> {
        self.sources.iter().map(|source| &source.spec)
    }

    pub fn archives(&self) -> &[RoundRobinArchive] {
        &self.archives
    }

    pub fn state(&self) -> RrdState {
        RrdState {
            step: self.step,
            start: self.start,
            last_update: self.last_update,
            data_sources: self.sources.clone(),
            archives: self.archives.iter().map(RoundRobinArchive::state).collect(),
        }
    }

    /// Apply a batch of samples, values given in data source order (COMPUTE data sources excluded).
    ///
    /// The whole batch is checked before being applied: on error, nothing changes.
    pub fn update(&mut self, samples: &[Sample]) -> Result<(), RrdError> {
        let inputs: SmallVec<[usize; 8]> = self
            .sources
            .iter()
            .enumerate()
            .filter(|(_, source)| source.spec.takes_input())
            .map(|(index, _)| index)
            .collect();

        self.apply(samples, &inputs)
    }

    /// Apply a batch of samples whose values are given for the data sources named
    /// in `template`, in that order. Other data sources get unknown readings.
    pub fn update_with_template<S: AsRef<str>>(
        &mut self,
        template: &[S],
        samples: &[Sample],
    ) -> Result<(), RrdError> {
        let mut inputs: SmallVec<[usize; 8]> = SmallVec::with_capacity(template.len());

        for name in template.iter().map(AsRef::as_ref) {
            let index = self
                .sources
                .iter()
                .position(|source| source.spec.name == name && source.spec.takes_input())
                .ok_or_else(|| RrdError::UnknownDataSource(name.into()))?;

            if inputs.contains(&index) {
                return Err(RrdError::invalid_spec(
                    "template",
                    format!("'{name}' is listed twice"),
                ));
            }

            inputs.push(index);
        }

        self.apply(samples, &inputs)
    }

    fn apply(&mut self, samples: &[Sample], inputs: &[usize]) -> Result<(), RrdError> {
        let now = crate::now();
        let mut last = self.last_update;

        let timestamps = samples
            .iter()
            .map(|sample| {
                let timestamp = sample.time.resolve(now);

                if timestamp <= last {
                    return Err(RrdError::OutOfOrderUpdate {
                        attempted: timestamp,
                        last,
                    });
                }

                if sample.values.len() != inputs.len() {
                    return Err(RrdError::ArityMismatch {
                        timestamp,
                        expected: inputs.len(),
                        got: sample.values.len(),
                    });
                }

                last = timestamp;
                Ok(timestamp)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let snapshot = (self.sources.clone(), self.archives.clone(), self.last_update);
        let mut written = vec![Vec::new(); self.archives.len()];

        for (sample, timestamp) in samples.iter().zip(timestamps) {
            let mut readings: SmallVec<[SampleValue; 8]> =
                smallvec![SampleValue::Unknown; self.sources.len()];

            inputs
                .iter()
                .zip(&sample.values)
                .for_each(|(&index, &value)| readings[index] = value);

            self.process(timestamp, &readings, &mut written);
        }

        tracing::debug!(
            "{}: applied {} samples, last update {}",
            self.name,
            samples.len(),
            self.last_update
        );

        if let Err(e) = self.backend.commit(&self.name, &self.state(), &written) {
            tracing::warn!("{}: commit failed, batch discarded: {e}", self.name);
            (self.sources, self.archives, self.last_update) = snapshot;

            return Err(e);
        }

        Ok(())
    }

    /// Feed one reading per data source at `timestamp`.
    fn process(
        &mut self,
        timestamp: Timestamp,
        readings: &[SampleValue],
        written: &mut [Vec<ArchiveRow>],
    ) {
        let interval = timestamp - self.last_update;
        let split = StepSplit::new(self.last_update, timestamp, self.step);

        let rates: SmallVec<[Option<f64>; 8]> = self
            .sources
            .iter_mut()
            .zip(readings)
            .map(|(source, &reading)| {
                let rate = source.pdp.rate(&source.spec, reading, interval);
                source.pdp.accumulate(rate, split.pre_int);
                rate
            })
            .collect();

        let elapsed = split.elapsed_pdps(self.step);

        if elapsed > 0 {
            let span = split.occu_pdp_st - split.proc_pdp_st;

            let pdps: SmallVec<[Option<f64>; 8]> = self
                .sources
                .iter_mut()
                .zip(&rates)
                .map(|(source, &rate)| {
                    source.pdp.complete(&source.spec, span, rate, split.post_int)
                })
                .collect();

            self.archives
                .iter_mut()
                .zip(written.iter_mut())
                .for_each(|(archive, written)| {
                    archive.consume(&pdps, elapsed, split.occu_pdp_st, written)
                });
        }

        self.last_update = timestamp;
    }

    /// Query the archive consolidated with `cf` that best matches `resolution`
    /// (seconds per row): the finest one when not given, otherwise the finest one
    /// at least as coarse as asked (or the coarsest one if all are finer).
    pub fn fetch(
        &self,
        cf: ConsolidationFunction,
        start: Timestamp,
        end: Timestamp,
        resolution: Option<u64>,
    ) -> Result<Fetch<'_>, RrdError> {
        if start > end {
            return Err(RrdError::InvalidRange { start, end });
        }

        let candidates = || self.archives.iter().filter(move |archive| archive.spec().cf == cf);

        let archive = match resolution {
            None => candidates().min_by_key(|archive| archive.span()),
            Some(resolution) => candidates()
                .filter(|archive| archive.span() >= resolution)
                .min_by_key(|archive| archive.span())
                .or_else(|| candidates().max_by_key(|archive| archive.span())),
        }
        .ok_or(RrdError::NoMatchingArchive { cf, resolution })?;

        Ok(Fetch::new(archive, &self.sources, start, end))
    }

    /// Flat description of the archive set and its state.
    pub fn info(&self) -> IndexMap<String, InfoValue> {
        let mut info = IndexMap::new();

        info.insert("filename".into(), InfoValue::Text(self.name.clone()));
        info.insert("step".into(), InfoValue::Count(self.step));
        info.insert("last_update".into(), InfoValue::Count(self.last_update));

        for (index, source) in self.sources.iter().enumerate() {
            let (spec, pdp) = (&source.spec, &source.pdp);
            let prefix = format!("ds[{}]", spec.name);

            info.insert(format!("{prefix}.index"), InfoValue::Count(index as u64));
            info.insert(
                format!("{prefix}.type"),
                InfoValue::Text(spec.ds_type.to_string().into()),
            );

            if let Some(rpn) = &spec.rpn {
                info.insert(format!("{prefix}.cdef"), InfoValue::Text(rpn.clone()));
            } else {
                info.insert(
                    format!("{prefix}.minimal_heartbeat"),
                    InfoValue::Count(spec.heartbeat),
                );
                info.insert(format!("{prefix}.min"), InfoValue::Value(spec.min));
                info.insert(format!("{prefix}.max"), InfoValue::Value(spec.max));
            }

            info.insert(format!("{prefix}.last_ds"), InfoValue::Value(pdp.last_ds));
            info.insert(format!("{prefix}.value"), InfoValue::Value(Some(pdp.value)));
            info.insert(
                format!("{prefix}.unknown_sec"),
                InfoValue::Count(pdp.unknown_sec),
            );
        }

        for (index, archive) in self.archives.iter().enumerate() {
            let spec = archive.spec();
            let prefix = format!("rra[{index}]");

            info.insert(
                format!("{prefix}.cf"),
                InfoValue::Text(spec.cf.to_string().into()),
            );
            info.insert(format!("{prefix}.rows"), InfoValue::Count(spec.rows as u64));
            info.insert(
                format!("{prefix}.cur_row"),
                InfoValue::Count(archive.cursor() as u64),
            );
            info.insert(
                format!("{prefix}.pdp_per_row"),
                InfoValue::Count(spec.steps as u64),
            );
            info.insert(format!("{prefix}.xff"), InfoValue::Value(Some(spec.xff)));

            for (column, cdp) in archive.cdp().iter().enumerate() {
                let prefix = format!("{prefix}.cdp_prep[{column}]");

                info.insert(format!("{prefix}.value"), InfoValue::Value(cdp.value));
                info.insert(
                    format!("{prefix}.primary_value"),
                    InfoValue::Value(cdp.primary_value),
                );
                info.insert(
                    format!("{prefix}.secondary_value"),
                    InfoValue::Value(cdp.secondary_value),
                );
                info.insert(
                    format!("{prefix}.unknown_datapoints"),
                    InfoValue::Count(cdp.unknown_pdps as u64),
                );
            }
        }

        info
    }

    /// Snapshot of the whole archive set, rows included.
    pub fn dump(&self) -> RrdDump {
        RrdDump {
            name: self.name.clone(),
            step: self.step,
            start: self.start,
            last_update: self.last_update,
            data_sources: self.sources.clone(),
            archives: self
                .archives
                .iter()
                .map(|archive| ArchiveDump {
                    state: archive.state(),
                    database: archive.rows().collect(),
                })
                .collect(),
        }
    }
}
