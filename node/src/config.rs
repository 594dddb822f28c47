//! Simulation files run by the `drynx` binary.
//!
//! ```yaml
//! computing: 3
//! providers: 1
//! verifying: 3
//! survey:
//!   id: survey
//!   operation:
//!     name: sum
//!   ranges: [[16, 2]]
//! data:
//!   generated:
//!     rows: 10
//!     min: 0
//!     max: 25
//!     seed: 0
//! ```

use crate::{
    cluster::{self, Cluster},
    provider::{DataSource, Fixed, Generated},
    query::{DiffPrivacy, ProofMode, Query, Thresholds, ValueRange},
    Error,
};
use drynx_encoding::{Dataset, LogisticRegressionParameters, Operation};
use commonware_runtime::{Metrics, Spawner};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

fn one() -> usize {
    1
}

fn default_timeout() -> u64 {
    10_000
}

fn default_verification_timeout() -> u64 {
    30_000
}

fn default_survey_id() -> String {
    "survey".to_string()
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Simulation {
    pub computing: usize,
    #[serde(default = "one")]
    pub providers: usize,
    #[serde(default)]
    pub verifying: usize,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_verification_timeout")]
    pub verification_timeout_ms: u64,
    /// Directory of the runtime storage holding the verifying node stores, a
    /// temporary directory when absent.
    #[serde(default)]
    pub storage: Option<PathBuf>,
    pub survey: SurveyConfig,
    pub data: DataConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SurveyConfig {
    #[serde(default = "default_survey_id")]
    pub id: String,
    pub operation: OperationConfig,
    /// `(u, l)` per slot.
    #[serde(default)]
    pub ranges: Option<Vec<(u64, usize)>>,
    /// Defaults to `full` when the simulation has verifying nodes.
    #[serde(default)]
    pub proofs: Option<ProofModeConfig>,
    #[serde(default)]
    pub obfuscation: bool,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    #[serde(default)]
    pub diff_p: DiffPrivacyConfig,
    #[serde(default)]
    pub group_by: Vec<u32>,
    #[serde(default)]
    pub cutting_factor: usize,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProofModeConfig {
    None,
    Full,
    Optimized,
}

impl From<ProofModeConfig> for ProofMode {
    fn from(mode: ProofModeConfig) -> Self {
        match mode {
            ProofModeConfig::None => ProofMode::None,
            ProofModeConfig::Full => ProofMode::Full,
            ProofModeConfig::Optimized => ProofMode::Optimized,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Default)]
#[serde(deny_unknown_fields, default)]
pub struct ThresholdsConfig {
    pub general: f64,
    pub aggregation: f64,
    pub range: f64,
    pub obfuscation: f64,
    pub key_switch: f64,
}

impl From<ThresholdsConfig> for Thresholds {
    fn from(cfg: ThresholdsConfig) -> Self {
        Thresholds {
            general: cfg.general,
            aggregation: cfg.aggregation,
            range: cfg.range,
            obfuscation: cfg.obfuscation,
            key_switch: cfg.key_switch,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Default)]
#[serde(deny_unknown_fields, default)]
pub struct DiffPrivacyConfig {
    pub lap_mean: f64,
    pub lap_scale: f64,
    pub noise_list_size: usize,
    pub quanta: f64,
    pub scale: f64,
    pub limit: f64,
}

impl From<DiffPrivacyConfig> for DiffPrivacy {
    fn from(cfg: DiffPrivacyConfig) -> Self {
        DiffPrivacy {
            lap_mean: cfg.lap_mean,
            lap_scale: cfg.lap_scale,
            noise_list_size: cfg.noise_list_size,
            quanta: cfg.quanta,
            scale: cfg.scale,
            limit: cfg.limit,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LogRegConfig {
    pub features: usize,
    #[serde(default)]
    pub records: usize,
    pub k: Option<usize>,
    pub lambda: Option<f64>,
    pub step: Option<f64>,
    pub max_iterations: Option<usize>,
    pub precision: Option<f64>,
    #[serde(default)]
    pub initial_weights: Vec<f64>,
    #[serde(default)]
    pub means: Vec<f64>,
    #[serde(default)]
    pub standard_deviations: Vec<f64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum OperationConfig {
    Sum,
    Mean,
    Variance,
    Cosim,
    FrequencyCount { min: i64, max: i64 },
    BoolAnd,
    BoolOr,
    Min { min: i64, max: i64 },
    Max { min: i64, max: i64 },
    LinReg { dimensions: usize },
    Union { min: i64, max: i64 },
    Inter { min: i64, max: i64 },
    LogReg(LogRegConfig),
    MlEval,
}

impl From<OperationConfig> for Operation {
    fn from(cfg: OperationConfig) -> Self {
        match cfg {
            OperationConfig::Sum => Operation::Sum,
            OperationConfig::Mean => Operation::Mean,
            OperationConfig::Variance => Operation::Variance,
            OperationConfig::Cosim => Operation::Cosim,
            OperationConfig::FrequencyCount { min, max } => Operation::FrequencyCount { min, max },
            OperationConfig::BoolAnd => Operation::BoolAnd,
            OperationConfig::BoolOr => Operation::BoolOr,
            OperationConfig::Min { min, max } => Operation::Min { min, max },
            OperationConfig::Max { min, max } => Operation::Max { min, max },
            OperationConfig::LinReg { dimensions } => Operation::LinReg { dimensions },
            OperationConfig::Union { min, max } => Operation::Union { min, max },
            OperationConfig::Inter { min, max } => Operation::Inter { min, max },
            OperationConfig::LogReg(cfg) => {
                let defaults = LogisticRegressionParameters::default();
                Operation::LogReg(LogisticRegressionParameters {
                    k: cfg.k.unwrap_or(defaults.k),
                    lambda: cfg.lambda.unwrap_or(defaults.lambda),
                    step: cfg.step.unwrap_or(defaults.step),
                    max_iterations: cfg.max_iterations.unwrap_or(defaults.max_iterations),
                    initial_weights: cfg.initial_weights,
                    precision: cfg.precision.unwrap_or(defaults.precision),
                    means: cfg.means,
                    standard_deviations: cfg.standard_deviations,
                    records: cfg.records,
                    features: cfg.features,
                })
            }
            OperationConfig::MlEval => Operation::MlEval,
        }
    }
}

/// Records of the data providers.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum DataConfig {
    /// Random values drawn by every provider.
    Generated {
        rows: usize,
        min: i64,
        max: i64,
        #[serde(default)]
        seed: u64,
    },
    /// Integer columns of every provider, in roster order.
    Columns(Vec<Vec<Vec<i64>>>),
    /// Real-valued records of every provider, in roster order.
    Records(Vec<Vec<Vec<f64>>>),
}

impl Simulation {
    /// Parses a YAML simulation.
    pub fn parse(yaml: &str) -> Result<Self, Error> {
        let simulation: Self =
            serde_yaml::from_str(yaml).map_err(|err| Error::Config(err.to_string()))?;
        simulation.check()?;
        Ok(simulation)
    }

    /// Reads a YAML simulation from `path`.
    pub fn load(path: &std::path::Path) -> Result<Self, Error> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))?;
        Self::parse(&yaml)
    }

    fn check(&self) -> Result<(), Error> {
        if self.computing == 0 {
            return Err(Error::Config("computing must be positive".into()));
        }
        if self.providers == 0 {
            return Err(Error::Config("providers must be positive".into()));
        }
        let providers = self.computing * self.providers;
        let given = match &self.data {
            DataConfig::Generated { min, max, .. } if min > max => {
                return Err(Error::Config("data min exceeds max".into()));
            }
            DataConfig::Generated { .. } => providers,
            DataConfig::Columns(values) => values.len(),
            DataConfig::Records(values) => values.len(),
        };
        if given != providers {
            return Err(Error::Config(format!(
                "data given for {given} providers, expected {providers}"
            )));
        }
        Ok(())
    }

    /// Shape of the cluster running the simulation.
    pub fn cluster(&self) -> cluster::Config {
        let mut bases: Vec<u64> = self
            .survey
            .ranges
            .iter()
            .flatten()
            .filter(|(u, l)| *u != 0 || *l != 0)
            .map(|(u, _)| *u)
            .collect();
        bases.sort_unstable();
        bases.dedup();
        cluster::Config {
            computing: self.computing,
            providers: self.providers,
            verifying: self.verifying,
            bases,
            timeout: Duration::from_millis(self.timeout_ms),
            verification_timeout: Duration::from_millis(self.verification_timeout_ms),
            partition: "drynx".into(),
        }
    }

    /// Source of provider `j` of computing node `i`.
    pub fn source(&self, i: usize, j: usize) -> Box<dyn DataSource> {
        let index = i * self.providers + j;
        match &self.data {
            DataConfig::Generated {
                rows,
                min,
                max,
                seed,
            } => Box::new(Generated::new(*rows, *min, *max, seed + index as u64)),
            DataConfig::Columns(values) => Box::new(Fixed::single(Dataset::Columns(
                values.get(index).cloned().unwrap_or_default(),
            ))),
            DataConfig::Records(values) => Box::new(Fixed::single(Dataset::Records(
                values.get(index).cloned().unwrap_or_default(),
            ))),
        }
    }

    /// The query of the simulation over `cluster`.
    pub fn query<E: Spawner + Metrics>(&self, cluster: &Cluster<E>) -> Result<Query, Error> {
        let survey = &self.survey;
        let mut query = cluster.query(&survey.id, survey.operation.clone().into());
        if let Some(proofs) = survey.proofs {
            query.proofs = proofs.into();
        }
        query.obfuscation = survey.obfuscation;
        query.thresholds = survey.thresholds.into();
        query.diff_p = survey.diff_p.into();
        query.group_by = survey.group_by.clone();
        query.cutting_factor = survey.cutting_factor;
        if let Some(ranges) = &survey.ranges {
            let ranges = ranges.iter().map(|(u, l)| ValueRange::new(*u, *l)).collect();
            cluster.with_ranges(&mut query, ranges)?;
        }
        Ok(query)
    }
}
