//! [RoundRobinArchive] definition
use serde::{Deserialize, Serialize};

use super::{
    consolidation::CdpState,
    definition::ArchiveSpec,
    round_robin::RoundRobinBuffer,
};
use crate::Timestamp;

/// A row of an archive, one value per data source.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ArchiveRow {
    pub timestamp: Timestamp,
    pub values: Box<[Option<f64>]>,
}

/// Persisted state of an archive, rows excluded.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ArchiveState {
    pub spec: ArchiveSpec,
    /// Consolidation state per data source.
    pub cdp: Vec<CdpState>,
    /// Index of the most recently written row.
    pub cursor: usize,
    /// Timestamp of the most recently written row.
    pub last_row: Timestamp,
}

/// A round-robin archive: consolidates primary data points of every data source
/// and keeps the last `rows` consolidated rows.
///
/// Rows are aligned on multiples of the archive span (`steps * step`), so row
/// `n` rows older than the last one is at `last_row - n * span`.
#[derive(Clone, Debug)]
pub struct RoundRobinArchive {
    spec: ArchiveSpec,
    step: u64,
    cdp: Box<[CdpState]>,
    rows: RoundRobinBuffer<f64>,
    last_row: Timestamp,
}

impl RoundRobinArchive {
    /// Archive of an archive set starting at `start`.
    pub fn new(spec: ArchiveSpec, step: u64, sources: usize, start: Timestamp) -> Self {
        let span = spec.span(step);
        let start_pdp = start - start % step;

        // Primary data points of the first interval before `start` are unknown.
        let unknown = ((start_pdp % span) / step) as u32;

        Self {
            cdp: vec![CdpState::with_unknown(unknown); sources].into_boxed_slice(),
            rows: RoundRobinBuffer::new(spec.rows as usize, sources, f64::NAN),
            last_row: start_pdp - start_pdp % span,
            spec,
            step,
        }
    }

    /// Rebuild an archive from its state and its persisted rows.
    pub fn restore(state: ArchiveState, step: u64, rows: &[ArchiveRow]) -> Self {
        let span = state.spec.span(step);
        let size = state.spec.rows as usize;
        let width = state.cdp.len();

        let by_time: std::collections::HashMap<Timestamp, &ArchiveRow> =
            rows.iter().map(|row| (row.timestamp, row)).collect();

        // Rows oldest first, unknown where nothing was persisted.
        let ordered: Vec<Box<[f64]>> = (0..size as u64)
            .rev()
            .map(|age| {
                state
                    .last_row
                    .checked_sub(age * span)
                    .and_then(|timestamp| by_time.get(&timestamp))
                    .filter(|row| row.values.len() == width)
                    .map_or_else(
                        || vec![f64::NAN; width].into_boxed_slice(),
                        |row| row.values.iter().map(|v| v.unwrap_or(f64::NAN)).collect(),
                    )
            })
            .collect();

        Self {
            rows: RoundRobinBuffer::restore(
                size,
                width,
                f64::NAN,
                state.cursor,
                ordered.iter().map(|row| &row[..]),
            ),
            cdp: state.cdp.into_boxed_slice(),
            last_row: state.last_row,
            spec: state.spec,
            step,
        }
    }

    pub fn spec(&self) -> &ArchiveSpec {
        &self.spec
    }

    /// Seconds covered by a row.
    pub fn span(&self) -> u64 {
        self.spec.span(self.step)
    }

    pub fn last_row(&self) -> Timestamp {
        self.last_row
    }

    pub fn cursor(&self) -> usize {
        self.rows.cursor()
    }

    pub fn cdp(&self) -> &[CdpState] {
        &self.cdp
    }

    pub fn state(&self) -> ArchiveState {
        ArchiveState {
            spec: self.spec.clone(),
            cdp: self.cdp.to_vec(),
            cursor: self.rows.cursor(),
            last_row: self.last_row,
        }
    }

    /// Consume `count` primary data points per data source, the last one ending at `last_end`.
    /// All of them have the same value (`pdps`, one per data source).
    ///
    /// Rows written are appended to `written`, which only keeps the last `rows` ones
    /// (older ones are overwritten anyway).
    pub fn consume(
        &mut self,
        pdps: &[Option<f64>],
        count: u64,
        last_end: Timestamp,
        written: &mut Vec<ArchiveRow>,
    ) {
        debug_assert_eq!(pdps.len(), self.cdp.len());

        let cf = self.spec.cf;
        let steps = self.spec.steps as u64;
        let mut remaining = count;
        // End of the last absorbed primary data point.
        let mut absorbed_end = last_end - count * self.step;

        while remaining > 0 {
            let consumed = self.cdp.first().map_or(0, |cdp| cdp.consumed as u64);
            let take = remaining.min(steps - consumed);

            self.cdp
                .iter_mut()
                .zip(pdps)
                .for_each(|(cdp, &pdp)| cdp.absorb(cf, pdp, take as u32));

            remaining -= take;
            absorbed_end += take * self.step;

            if consumed + take < steps {
                break;
            }

            self.write_row(absorbed_end, written);

            // Whole intervals made of the same primary data points.
            let whole = remaining / steps;
            if whole > 0 {
                self.cdp.iter_mut().zip(pdps).for_each(|(cdp, &pdp)| {
                    cdp.absorb(cf, pdp, steps as u32);
                });

                let row = self.finish_row();
                if whole > 1 {
                    self.cdp
                        .iter_mut()
                        .for_each(|cdp| cdp.secondary_value = cdp.primary_value);
                }

                self.rows.push_repeated(&row, whole);

                let span = self.span();
                let first_end = absorbed_end + span;
                absorbed_end += whole * span;
                remaining -= whole * steps;
                self.last_row = absorbed_end;

                let recorded = whole.min(self.spec.rows as u64);
                written.extend((whole - recorded..whole).map(|i| ArchiveRow {
                    timestamp: first_end + i * span,
                    values: row.iter().map(|&v| known(v)).collect(),
                }));
            }
        }

        let retained = self.spec.rows as usize;
        if written.len() > retained {
            written.drain(..written.len() - retained);
        }
    }

    fn finish_row(&mut self) -> Box<[f64]> {
        let (cf, xff, steps) = (self.spec.cf, self.spec.xff, self.spec.steps);

        self.cdp
            .iter_mut()
            .map(|cdp| cdp.finish(cf, xff, steps).unwrap_or(f64::NAN))
            .collect()
    }

    fn write_row(&mut self, timestamp: Timestamp, written: &mut Vec<ArchiveRow>) {
        let row = self.finish_row();

        self.rows.push(&row);
        self.last_row = timestamp;

        written.push(ArchiveRow {
            timestamp,
            values: row.iter().map(|&v| known(v)).collect(),
        });
    }

    /// Value of data source `column` at a row `timestamp`, if retained and known.
    pub fn value_at(&self, timestamp: Timestamp, column: usize) -> Option<f64> {
        let span = self.span();

        if timestamp > self.last_row || timestamp % span != 0 {
            return None;
        }

        let age = (self.last_row - timestamp) / span;
        let row = self.rows.get(usize::try_from(age).ok()?)?;

        row.get(column).copied().and_then(known)
    }

    /// All retained rows, oldest first (unknown values included).
    pub fn rows(&self) -> impl Iterator<Item = ArchiveRow> + '_ {
        let span = self.span();
        let size = self.rows.size() as u64;

        self.rows
            .iter()
            .zip(0..size)
            .filter_map(move |(row, index)| {
                let age = size - 1 - index;
                Some(ArchiveRow {
                    timestamp: self.last_row.checked_sub(age * span)?,
                    values: row.iter().map(|&v| known(v)).collect(),
                })
            })
    }

    /// Rows of data source `column` with timestamps in `[start, end]`.
    pub fn read_window(
        &self,
        column: usize,
        start: Timestamp,
        end: Timestamp,
    ) -> ArchiveWindow<'_> {
        let span = self.span();

        ArchiveWindow {
            archive: self,
            column,
            next: start.div_ceil(span).saturating_mul(span),
            end,
        }
    }
}

fn known(value: f64) -> Option<f64> {
    (!value.is_nan()).then_some(value)
}

/// Lazy sequence of `(timestamp, value)` of an archive column.
///
/// Timestamps are every row timestamp in the requested window, values are `None`
/// where the row is unknown or no longer (or not yet) retained.
#[derive(Clone, Debug)]
pub struct ArchiveWindow<'a> {
    archive: &'a RoundRobinArchive,
    column: usize,
    next: Timestamp,
    end: Timestamp,
}

impl<'a> ArchiveWindow<'a> {
    /// Timestamp of the first row of the window.
    pub fn first_timestamp(&self) -> Timestamp {
        self.next
    }
}

impl Iterator for ArchiveWindow<'_> {
    type Item = (Timestamp, Option<f64>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.end {
            return None;
        }

        let timestamp = self.next;
        self.next = self.next.saturating_add(self.archive.span());

        // Saturated at the end of time.
        if self.next == timestamp {
            self.end = timestamp.saturating_sub(1);
        }

        Some((timestamp, self.archive.value_at(timestamp, self.column)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.next > self.end {
            0
        } else {
            ((self.end - self.next) / self.archive.span() + 1) as usize
        };

        (remaining, Some(remaining))
    }
}
