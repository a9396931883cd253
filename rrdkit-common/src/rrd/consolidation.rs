//! Consolidation of primary data points into consolidated data points (CDP).
use serde::{Deserialize, Serialize};

use super::definition::ConsolidationFunction;

/// Whether `unknown` primary data points out of `steps` exceed the xfiles factor.
///
/// A ratio equal to `xff` is still tolerated.
pub fn exceeds_xff(unknown: u32, steps: u32, xff: f64) -> bool {
    steps > 1 && unknown as f64 / steps as f64 > xff
}

/// Consolidate a whole interval of primary data points (`None` being unknown).
pub fn consolidate(cf: ConsolidationFunction, xff: f64, pdps: &[Option<f64>]) -> Option<f64> {
    let mut state = CdpState::default();

    pdps.iter().for_each(|&pdp| state.absorb(cf, pdp, 1));
    state.finish(cf, xff, pdps.len() as u32)
}

/// Consolidation state of one data source in one archive.
#[derive(Clone, Default, PartialEq, Debug, Serialize, Deserialize)]
pub struct CdpState {
    /// Last written consolidated value.
    pub primary_value: Option<f64>,
    /// Consolidated value written before [Self::primary_value].
    pub secondary_value: Option<f64>,
    /// Running value of the current interval (a sum for AVERAGE).
    pub value: Option<f64>,
    pub unknown_pdps: u32,
    pub consumed: u32,
}

impl CdpState {
    /// State of an interval whose first `pdps` primary data points are unknown.
    pub fn with_unknown(pdps: u32) -> Self {
        Self {
            unknown_pdps: pdps,
            consumed: pdps,
            ..Default::default()
        }
    }

    /// Add `count` identical primary data points.
    pub fn absorb(&mut self, cf: ConsolidationFunction, pdp: Option<f64>, count: u32) {
        self.consumed += count;

        let Some(pdp) = pdp else {
            self.unknown_pdps += count;
            return;
        };

        self.value = Some(match (cf, self.value) {
            (ConsolidationFunction::Average, None) => pdp * count as f64,
            (ConsolidationFunction::Average, Some(sum)) => sum + pdp * count as f64,
            (_, None) => pdp,
            (ConsolidationFunction::Min, Some(min)) => min.min(pdp),
            (ConsolidationFunction::Max, Some(max)) => max.max(pdp),
            (ConsolidationFunction::First, Some(first)) => first,
            // LAST, and Holt-Winters values passed through.
            (_, Some(_)) => pdp,
        });
    }

    /// Close the interval, returning the consolidated value and resetting the state.
    pub fn finish(&mut self, cf: ConsolidationFunction, xff: f64, steps: u32) -> Option<f64> {
        let known = self.consumed.saturating_sub(self.unknown_pdps);

        let cdp = if exceeds_xff(self.unknown_pdps, steps, xff) || known == 0 {
            None
        } else {
            match cf {
                ConsolidationFunction::Average => self.value.map(|sum| sum / known as f64),
                _ => self.value,
            }
        };

        self.secondary_value = self.primary_value;
        self.primary_value = cdp;
        self.value = None;
        self.unknown_pdps = 0;
        self.consumed = 0;

        cdp
    }
}
