//! Data source and archive definitions.
//!
//! Both have a textual form matching the usual definition syntax:
//!
//! ```plain
//! DS:speed:COUNTER:600:U:U
//! DS:total:COMPUTE:speed,8,*
//! RRA:AVERAGE:0.5:1:24
//! RRA:HWPREDICT:1440:0.1:0.0035:288:U
//! ```
use std::{fmt, str::FromStr};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::error::RrdError;

/// Longest accepted data source name.
pub const MAX_DS_NAME_LENGTH: usize = 19;

/// Type of a data source.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum DataSourceType {
    Gauge,
    Counter,
    Derive,
    Absolute,
    Compute,
}

impl FromStr for DataSourceType {
    type Err = RrdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "GAUGE" => Ok(Self::Gauge),
            "COUNTER" => Ok(Self::Counter),
            "DERIVE" => Ok(Self::Derive),
            "ABSOLUTE" => Ok(Self::Absolute),
            "COMPUTE" => Ok(Self::Compute),
            _ => Err(RrdError::invalid_spec(
                "type",
                format!("'{value}' is not one of GAUGE COUNTER DERIVE ABSOLUTE COMPUTE"),
            )),
        }
    }
}

impl From<DataSourceType> for &'static str {
    fn from(val: DataSourceType) -> Self {
        match val {
            DataSourceType::Gauge => "GAUGE",
            DataSourceType::Counter => "COUNTER",
            DataSourceType::Derive => "DERIVE",
            DataSourceType::Absolute => "ABSOLUTE",
            DataSourceType::Compute => "COMPUTE",
        }
    }
}

impl fmt::Display for DataSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str((*self).into())
    }
}

/// Definition of a data source.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct DataSourceSpec {
    pub name: CompactString,
    pub ds_type: DataSourceType,
    /// Longest silence (in seconds) before the data source is considered unknown.
    pub heartbeat: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Only for [DataSourceType::Compute], never evaluated.
    pub rpn: Option<Box<str>>,
}

impl DataSourceSpec {
    pub fn new(name: &str, ds_type: DataSourceType, heartbeat: u64) -> Self {
        Self {
            name: name.into(),
            ds_type,
            heartbeat,
            min: None,
            max: None,
            rpn: None,
        }
    }

    pub fn compute(name: &str, rpn: &str) -> Self {
        Self {
            name: name.into(),
            ds_type: DataSourceType::Compute,
            heartbeat: 0,
            min: None,
            max: None,
            rpn: Some(rpn.into()),
        }
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Whether this data source consumes a value in updates.
    pub fn takes_input(&self) -> bool {
        self.ds_type != DataSourceType::Compute
    }

    pub fn validate(&self) -> Result<(), RrdError> {
        validate_ds_name(&self.name)?;

        if self.ds_type == DataSourceType::Compute {
            if self.rpn.as_deref().map_or(true, str::is_empty) {
                return Err(RrdError::invalid_spec(
                    format!("ds[{}].rpn", self.name),
                    "COMPUTE data sources need an RPN expression",
                ));
            }

            return Ok(());
        }

        if self.heartbeat == 0 {
            return Err(RrdError::invalid_spec(
                format!("ds[{}].heartbeat", self.name),
                "heartbeat must be greater than 0",
            ));
        }

        if self.min.is_some_and(f64::is_nan) || self.max.is_some_and(f64::is_nan) {
            return Err(RrdError::invalid_spec(
                format!("ds[{}].min", self.name),
                "bounds must be numbers or U",
            ));
        }

        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min >= max {
                return Err(RrdError::invalid_spec(
                    format!("ds[{}].min", self.name),
                    format!("min ({min}) must be less than max ({max})"),
                ));
            }
        }

        Ok(())
    }

    /// Check a rate against the data source bounds.
    pub(crate) fn in_bounds(&self, rate: f64) -> bool {
        self.min.map_or(true, |min| rate >= min) && self.max.map_or(true, |max| rate <= max)
    }
}

fn validate_ds_name(name: &str) -> Result<(), RrdError> {
    if name.is_empty() || name.len() > MAX_DS_NAME_LENGTH {
        return Err(RrdError::invalid_spec(
            "ds.name",
            format!("'{name}' must be 1 to {MAX_DS_NAME_LENGTH} characters long"),
        ));
    }

    if !name.bytes().all(|c| c.is_ascii_alphanumeric() || c == b'_') {
        return Err(RrdError::invalid_spec(
            "ds.name",
            format!("'{name}' must consist only of the characters A-Z, a-z, 0-9, _"),
        ));
    }

    Ok(())
}

fn parse_field<T: FromStr>(field: &'static str, value: &str) -> Result<T, RrdError> {
    value
        .parse()
        .map_err(|_| RrdError::invalid_spec(field, format!("unable to parse '{value}'")))
}

/// Parse a value where `U` means "none".
fn parse_optional<T: FromStr>(field: &'static str, value: &str) -> Result<Option<T>, RrdError> {
    if value.eq_ignore_ascii_case("u") {
        Ok(None)
    } else {
        parse_field(field, value).map(Some)
    }
}

struct OptionalField<'a, T>(&'a Option<T>);

impl<T: fmt::Display> fmt::Display for OptionalField<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(value) => write!(f, "{value}"),
            None => f.write_str("U"),
        }
    }
}

impl FromStr for DataSourceSpec {
    type Err = RrdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.splitn(4, ':').collect();

        let (Some(&"DS"), Some(name), Some(ds_type), Some(tail)) =
            (parts.first(), parts.get(1), parts.get(2), parts.get(3))
        else {
            return Err(RrdError::invalid_spec(
                "ds",
                format!("'{value}' is not a DS:name:TYPE:... definition"),
            ));
        };

        let ds_type: DataSourceType = ds_type.parse()?;

        if ds_type == DataSourceType::Compute {
            return Ok(Self::compute(name, tail));
        }

        let params: Vec<&str> = tail.split(':').collect();
        let [heartbeat, min, max] = params.as_slice() else {
            return Err(RrdError::invalid_spec(
                "ds",
                format!("'{value}' should end with :heartbeat:min:max"),
            ));
        };

        Ok(Self::new(name, ds_type, parse_field("ds.heartbeat", heartbeat)?).with_bounds(
            parse_optional("ds.min", min)?,
            parse_optional("ds.max", max)?,
        ))
    }
}

impl fmt::Display for DataSourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DS:{}:{}", self.name, self.ds_type)?;

        match self.ds_type {
            DataSourceType::Compute => {
                write!(f, ":{}", self.rpn.as_deref().unwrap_or_default())
            }
            _ => write!(
                f,
                ":{}:{}:{}",
                self.heartbeat,
                OptionalField(&self.min),
                OptionalField(&self.max)
            ),
        }
    }
}

/// Consolidation function of an archive.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum ConsolidationFunction {
    Average,
    Min,
    Max,
    Last,
    First,
    HwPredict,
    Seasonal,
    DevSeasonal,
    DevPredict,
    Failures,
}

impl ConsolidationFunction {
    /// Holt-Winters functions are stored, not computed: their archives keep every primary data point.
    pub const fn is_holt_winters(self) -> bool {
        matches!(
            self,
            Self::HwPredict | Self::Seasonal | Self::DevSeasonal | Self::DevPredict | Self::Failures
        )
    }
}

impl FromStr for ConsolidationFunction {
    type Err = RrdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "AVERAGE" => Ok(Self::Average),
            "MIN" => Ok(Self::Min),
            "MAX" => Ok(Self::Max),
            "LAST" => Ok(Self::Last),
            "FIRST" => Ok(Self::First),
            "HWPREDICT" => Ok(Self::HwPredict),
            "SEASONAL" => Ok(Self::Seasonal),
            "DEVSEASONAL" => Ok(Self::DevSeasonal),
            "DEVPREDICT" => Ok(Self::DevPredict),
            "FAILURES" => Ok(Self::Failures),
            _ => Err(RrdError::invalid_spec(
                "cf",
                format!("'{value}' is not one of AVERAGE MIN MAX LAST FIRST HWPREDICT SEASONAL DEVSEASONAL DEVPREDICT FAILURES"),
            )),
        }
    }
}

impl From<ConsolidationFunction> for &'static str {
    fn from(val: ConsolidationFunction) -> Self {
        match val {
            ConsolidationFunction::Average => "AVERAGE",
            ConsolidationFunction::Min => "MIN",
            ConsolidationFunction::Max => "MAX",
            ConsolidationFunction::Last => "LAST",
            ConsolidationFunction::First => "FIRST",
            ConsolidationFunction::HwPredict => "HWPREDICT",
            ConsolidationFunction::Seasonal => "SEASONAL",
            ConsolidationFunction::DevSeasonal => "DEVSEASONAL",
            ConsolidationFunction::DevPredict => "DEVPREDICT",
            ConsolidationFunction::Failures => "FAILURES",
        }
    }
}

impl fmt::Display for ConsolidationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str((*self).into())
    }
}

/// Holt-Winters parameters, kept as-is.
#[derive(Clone, Default, PartialEq, Debug, Serialize, Deserialize)]
pub struct HoltWintersParams {
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub gamma: Option<f64>,
    pub seasonal_period: Option<u32>,
    pub rra_num: Option<u32>,
    pub threshold: Option<u32>,
    pub window_length: Option<u32>,
}

/// Definition of a round-robin archive.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ArchiveSpec {
    pub cf: ConsolidationFunction,
    /// Largest tolerated ratio of unknown primary data points in a consolidated one.
    pub xff: f64,
    /// Primary data points per row.
    pub steps: u32,
    pub rows: u32,
    pub holt_winters: Option<HoltWintersParams>,
}

impl ArchiveSpec {
    pub fn new(cf: ConsolidationFunction, xff: f64, steps: u32, rows: u32) -> Self {
        Self {
            cf,
            xff,
            steps,
            rows,
            holt_winters: None,
        }
    }

    pub fn holt_winters(cf: ConsolidationFunction, rows: u32, params: HoltWintersParams) -> Self {
        Self {
            cf,
            xff: 0.0,
            steps: 1,
            rows,
            holt_winters: Some(params),
        }
    }

    /// Row span, in seconds, for a given archive set step.
    pub fn span(&self, step: u64) -> u64 {
        self.steps as u64 * step
    }

    pub fn validate(&self) -> Result<(), RrdError> {
        if !(0.0..1.0).contains(&self.xff) {
            return Err(RrdError::invalid_spec(
                "rra.xff",
                format!("{} is not in [0, 1)", self.xff),
            ));
        }

        if self.steps == 0 {
            return Err(RrdError::invalid_spec("rra.steps", "must be at least 1"));
        }

        if self.rows == 0 {
            return Err(RrdError::invalid_spec("rra.rows", "must be at least 1"));
        }

        if self.cf.is_holt_winters() && self.steps != 1 {
            return Err(RrdError::invalid_spec(
                "rra.steps",
                format!("{} archives have one primary data point per row", self.cf),
            ));
        }

        Ok(())
    }
}

impl FromStr for ArchiveSpec {
    type Err = RrdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.split(':').collect();

        let (Some(&"RRA"), Some(cf)) = (parts.first(), parts.get(1)) else {
            return Err(RrdError::invalid_spec(
                "rra",
                format!("'{value}' is not a RRA:CF:... definition"),
            ));
        };

        let cf: ConsolidationFunction = cf.parse()?;
        let params = &parts[2..];
        let malformed = || {
            RrdError::invalid_spec(
                "rra",
                format!("'{value}' has unexpected parameters for {cf}"),
            )
        };

        match cf {
            ConsolidationFunction::HwPredict => {
                let [rows, alpha, beta, period, rra_num] = params else {
                    return Err(malformed());
                };

                Ok(Self::holt_winters(
                    cf,
                    parse_field("rra.rows", rows)?,
                    HoltWintersParams {
                        alpha: parse_optional("rra.alpha", alpha)?,
                        beta: parse_optional("rra.beta", beta)?,
                        seasonal_period: parse_optional("rra.seasonal_period", period)?,
                        rra_num: parse_optional("rra.rra_num", rra_num)?,
                        ..Default::default()
                    },
                ))
            }
            ConsolidationFunction::Seasonal | ConsolidationFunction::DevSeasonal => {
                let [period, gamma, rra_num] = params else {
                    return Err(malformed());
                };

                let seasonal_period: u32 = parse_field("rra.seasonal_period", period)?;

                Ok(Self::holt_winters(
                    cf,
                    seasonal_period,
                    HoltWintersParams {
                        gamma: parse_optional("rra.gamma", gamma)?,
                        seasonal_period: Some(seasonal_period),
                        rra_num: parse_optional("rra.rra_num", rra_num)?,
                        ..Default::default()
                    },
                ))
            }
            ConsolidationFunction::DevPredict => {
                let [rows, rra_num] = params else {
                    return Err(malformed());
                };

                Ok(Self::holt_winters(
                    cf,
                    parse_field("rra.rows", rows)?,
                    HoltWintersParams {
                        rra_num: parse_optional("rra.rra_num", rra_num)?,
                        ..Default::default()
                    },
                ))
            }
            ConsolidationFunction::Failures => {
                let [rows, threshold, window_length, rra_num] = params else {
                    return Err(malformed());
                };

                Ok(Self::holt_winters(
                    cf,
                    parse_field("rra.rows", rows)?,
                    HoltWintersParams {
                        threshold: parse_optional("rra.threshold", threshold)?,
                        window_length: parse_optional("rra.window_length", window_length)?,
                        rra_num: parse_optional("rra.rra_num", rra_num)?,
                        ..Default::default()
                    },
                ))
            }
            _ => {
                let [xff, steps, rows] = params else {
                    return Err(malformed());
                };

                Ok(Self::new(
                    cf,
                    parse_field("rra.xff", xff)?,
                    parse_field("rra.steps", steps)?,
                    parse_field("rra.rows", rows)?,
                ))
            }
        }
    }
}

impl fmt::Display for ArchiveSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RRA:{}", self.cf)?;

        let default_params = HoltWintersParams::default();
        let hw = self.holt_winters.as_ref().unwrap_or(&default_params);

        match self.cf {
            ConsolidationFunction::HwPredict => write!(
                f,
                ":{}:{}:{}:{}:{}",
                self.rows,
                OptionalField(&hw.alpha),
                OptionalField(&hw.beta),
                OptionalField(&hw.seasonal_period),
                OptionalField(&hw.rra_num)
            ),
            ConsolidationFunction::Seasonal | ConsolidationFunction::DevSeasonal => write!(
                f,
                ":{}:{}:{}",
                self.rows,
                OptionalField(&hw.gamma),
                OptionalField(&hw.rra_num)
            ),
            ConsolidationFunction::DevPredict => {
                write!(f, ":{}:{}", self.rows, OptionalField(&hw.rra_num))
            }
            ConsolidationFunction::Failures => write!(
                f,
                ":{}:{}:{}:{}",
                self.rows,
                OptionalField(&hw.threshold),
                OptionalField(&hw.window_length),
                OptionalField(&hw.rra_num)
            ),
            _ => write!(f, ":{}:{}:{}", self.xff, self.steps, self.rows),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ds_name_validation() {
        assert!(DataSourceSpec::new("Zaphod_Bee_Brox", DataSourceType::Gauge, 600)
            .validate()
            .is_ok());
        assert!(DataSourceSpec::new(&"a".repeat(19), DataSourceType::Gauge, 600)
            .validate()
            .is_ok());

        for name in ["Zaphod Beeble-Brox!", "", &"a".repeat(20)] {
            let err = DataSourceSpec::new(name, DataSourceType::Gauge, 600)
                .validate()
                .unwrap_err();
            assert!(matches!(err, RrdError::InvalidSpec { .. }), "{name}: {err}");
        }
    }

    #[test]
    fn heartbeat_required_unless_compute() {
        assert!(DataSourceSpec::new("speed", DataSourceType::Counter, 0)
            .validate()
            .is_err());
        assert!(DataSourceSpec::compute("bits", "speed,8,*").validate().is_ok());
    }

    #[test]
    fn parse_types_case_insensitive() {
        assert_eq!(
            "counter".parse::<DataSourceType>().unwrap(),
            DataSourceType::Counter
        );
        assert_eq!(
            "Max".parse::<ConsolidationFunction>().unwrap(),
            ConsolidationFunction::Max
        );
        assert!("Maximum".parse::<ConsolidationFunction>().is_err());
        assert!("ford prefect".parse::<DataSourceType>().is_err());
    }

    #[test]
    fn ds_textual_form() {
        let ds: DataSourceSpec = "DS:speed:COUNTER:600:U:U".parse().unwrap();
        assert_eq!(ds, DataSourceSpec::new("speed", DataSourceType::Counter, 600));
        assert_eq!(ds.to_string(), "DS:speed:COUNTER:600:U:U");

        let ds: DataSourceSpec = "DS:temp:GAUGE:120:-40:85.5".parse().unwrap();
        assert_eq!(ds.min, Some(-40.0));
        assert_eq!(ds.max, Some(85.5));

        let ds: DataSourceSpec = "DS:bits:COMPUTE:speed,8,*".parse().unwrap();
        assert_eq!(ds.rpn.as_deref(), Some("speed,8,*"));
        assert_eq!(ds.to_string(), "DS:bits:COMPUTE:speed,8,*");

        assert!("DS:speed:COUNTER:600".parse::<DataSourceSpec>().is_err());
        assert!("RRA:speed:COUNTER:600:U:U".parse::<DataSourceSpec>().is_err());
    }

    #[test]
    fn rra_textual_form() {
        let rra: ArchiveSpec = "RRA:AVERAGE:0.5:6:10".parse().unwrap();
        assert_eq!(rra, ArchiveSpec::new(ConsolidationFunction::Average, 0.5, 6, 10));
        assert_eq!(rra.to_string(), "RRA:AVERAGE:0.5:6:10");

        let rra: ArchiveSpec = "RRA:HWPREDICT:1440:0.1:0.0035:288:U".parse().unwrap();
        assert_eq!(rra.rows, 1440);
        assert_eq!(rra.steps, 1);
        let hw = rra.holt_winters.as_ref().unwrap();
        assert_eq!(hw.seasonal_period, Some(288));
        assert_eq!(hw.rra_num, None);
        assert_eq!(rra.to_string(), "RRA:HWPREDICT:1440:0.1:0.0035:288:U");

        let rra: ArchiveSpec = "RRA:FAILURES:288:7:9:4".parse().unwrap();
        assert_eq!(rra.to_string(), "RRA:FAILURES:288:7:9:4");

        assert!("RRA:AVERAGE:0.5:6".parse::<ArchiveSpec>().is_err());
    }

    #[test]
    fn rra_validation() {
        use ConsolidationFunction::*;

        assert!(ArchiveSpec::new(Average, 0.5, 1, 24).validate().is_ok());
        assert!(ArchiveSpec::new(Average, 0.0, 1, 24).validate().is_ok());
        assert!(ArchiveSpec::new(Average, 1.0, 1, 24).validate().is_err());
        assert!(ArchiveSpec::new(Average, -0.1, 1, 24).validate().is_err());
        assert!(ArchiveSpec::new(Average, 0.5, 0, 24).validate().is_err());
        assert!(ArchiveSpec::new(Min, 0.5, 1, 0).validate().is_err());
    }
}
