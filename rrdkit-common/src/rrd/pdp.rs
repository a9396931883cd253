//! Primary data point accumulation.
//!
//! Readings arrive at arbitrary times and are turned into rates, which are
//! accumulated (weighted by duration) over the current step. Crossing a step
//! boundary closes the step into a primary data point (PDP).
//!
//! ```plain
//!   last update                      reading
//!        |                              |
//! ---+---L--------+-------------+-------R----+---> time
//!    |   <------ pre_int ------>|<-post->|   |
//!   proc                       occu
//! ```
//!
//! `proc` is the start of the step holding the last update, `occu` the start of
//! the step holding the new reading. `pre_int` goes to the PDPs being closed,
//! `post_int` is carried into the next step.
use serde::{Deserialize, Serialize};

use super::definition::{DataSourceSpec, DataSourceType};
use crate::{sample::SampleValue, Timestamp};

/// How an update interval splits over step boundaries.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct StepSplit {
    /// Seconds belonging to the step(s) being closed (or to the current one).
    pub pre_int: u64,
    /// Seconds after the last crossed boundary.
    pub post_int: u64,
    /// Start of the step holding the previous update.
    pub proc_pdp_st: Timestamp,
    /// Start of the step holding the new reading.
    pub occu_pdp_st: Timestamp,
}

impl StepSplit {
    pub fn new(last_update: Timestamp, timestamp: Timestamp, step: u64) -> Self {
        let proc_pdp_st = last_update - last_update % step;
        let occu_pdp_st = timestamp - timestamp % step;

        if occu_pdp_st > proc_pdp_st {
            Self {
                pre_int: occu_pdp_st - last_update,
                post_int: timestamp - occu_pdp_st,
                proc_pdp_st,
                occu_pdp_st,
            }
        } else {
            Self {
                pre_int: timestamp - last_update,
                post_int: 0,
                proc_pdp_st,
                occu_pdp_st,
            }
        }
    }

    /// Number of primary data points completed by this update.
    pub fn elapsed_pdps(&self, step: u64) -> u64 {
        (self.occu_pdp_st - self.proc_pdp_st) / step
    }
}

/// Per data source accumulation state.
#[derive(Clone, Default, PartialEq, Debug, Serialize, Deserialize)]
pub struct PdpState {
    /// Last raw reading (used by COUNTER, DERIVE).
    pub last_ds: Option<f64>,
    /// Sum of `rate * seconds` over the known part of the current step.
    pub value: f64,
    /// Unknown seconds in the current step.
    pub unknown_sec: u64,
}

impl PdpState {
    pub fn new(unknown_sec: u64) -> Self {
        Self {
            last_ds: None,
            value: 0.0,
            unknown_sec,
        }
    }

    /// Turn a reading into a rate over the `interval` seconds preceding it.
    pub fn rate(
        &mut self,
        spec: &DataSourceSpec,
        reading: SampleValue,
        interval: u64,
    ) -> Option<f64> {
        let reading = reading.known();
        let previous = std::mem::replace(&mut self.last_ds, reading);

        let rate = match spec.ds_type {
            DataSourceType::Compute => None,
            DataSourceType::Gauge => reading,
            DataSourceType::Absolute => reading.map(|value| value / interval as f64),
            DataSourceType::Counter | DataSourceType::Derive => {
                let delta = reading? - previous?;

                if spec.ds_type == DataSourceType::Counter && delta < 0.0 {
                    tracing::debug!(
                        "{}: counter went backward ({delta}), considered unknown",
                        spec.name
                    );
                    None
                } else {
                    Some(delta / interval as f64)
                }
            }
        };

        if interval > spec.heartbeat {
            return None;
        }

        rate.filter(|&rate| spec.in_bounds(rate))
    }

    /// Accumulate a rate over `seconds` of the current step.
    pub fn accumulate(&mut self, rate: Option<f64>, seconds: u64) {
        match rate {
            Some(rate) => self.value += rate * seconds as f64,
            None => self.unknown_sec += seconds,
        }
    }

    /// Close the step(s) spanning `span` seconds into a primary data point and
    /// start the next one with `post_int` seconds at `rate`.
    pub fn complete(
        &mut self,
        spec: &DataSourceSpec,
        span: u64,
        rate: Option<f64>,
        post_int: u64,
    ) -> Option<f64> {
        let known = span.saturating_sub(self.unknown_sec);

        let pdp = if self.unknown_sec > spec.heartbeat || known == 0 {
            None
        } else {
            Some(self.value / known as f64)
        };

        self.value = 0.0;
        self.unknown_sec = 0;
        self.accumulate(rate, post_int);

        pdp
    }
}
