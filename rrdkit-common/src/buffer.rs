//! Buffering of raw readings before they are applied to an archive set.
use compact_str::{CompactString, ToCompactString};
use smallvec::SmallVec;

use crate::{
    error::RrdError,
    rrd::Rrd,
    sample::{Sample, SampleValue},
};

/// A reading kept as given.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BufferedSample {
    pub time: CompactString,
    pub values: SmallVec<[CompactString; 4]>,
}

impl BufferedSample {
    pub fn parse(&self) -> Result<Sample, RrdError> {
        Ok(Sample {
            time: self.time.parse()?,
            values: self.values.iter().map(|value| SampleValue::parse(value)).collect(),
        })
    }
}

/// Pending readings, applied as a single batch with [ValueBuffer::flush].
#[derive(Clone, Default, Debug)]
pub struct ValueBuffer {
    entries: Vec<BufferedSample>,
}

impl ValueBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer readings at `time`.
    ///
    /// With no `values`, `time` is taken as a combined `time:value[:value...]` token.
    pub fn buffer_value<V, I>(&mut self, time: impl ToCompactString, values: I)
    where
        I: IntoIterator<Item = V>,
        V: ToCompactString,
    {
        let time = time.to_compact_string();
        let mut values: SmallVec<[CompactString; 4]> =
            values.into_iter().map(|v| v.to_compact_string()).collect();

        let time = if values.is_empty() {
            let mut parts = time.split(':');
            let head = parts.next().map(CompactString::from).unwrap_or_default();
            values.extend(parts.map(CompactString::from));
            head
        } else {
            time
        };

        self.entries.push(BufferedSample { time, values });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[BufferedSample] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Parsed pending samples.
    pub fn samples(&self) -> Result<Vec<Sample>, RrdError> {
        self.entries.iter().map(BufferedSample::parse).collect()
    }

    /// Apply pending readings to `rrd`, returning how many were applied.
    ///
    /// The buffer is only emptied if the update succeeds.
    pub fn flush(&mut self, rrd: &mut Rrd) -> Result<usize, RrdError> {
        let samples = self.samples()?;
        rrd.update(&samples)?;

        Ok(self.drain())
    }

    /// Same as [ValueBuffer::flush], with values given for data sources of `template`.
    pub fn flush_with_template<S: AsRef<str>>(
        &mut self,
        rrd: &mut Rrd,
        template: &[S],
    ) -> Result<usize, RrdError> {
        let samples = self.samples()?;
        rrd.update_with_template(template, &samples)?;

        Ok(self.drain())
    }

    fn drain(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();

        count
    }
}
