//! Pipeline configuration
//!
//! Column layout, binning, normalization and generator options, loaded from
//! JSON. Every field has a default so partial files are accepted.

use std::path::Path;

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::data::batch::one_hot_categories;
use crate::data::collection::{GROUP_PLACEHOLDER, REFERENCE_GROUP};
use crate::data::manifest::FeatureManifest;
use crate::data::partition::{validate_fractions, Partition, DEFAULT_TEST_FRAC, DEFAULT_TRAIN_FRAC};
use crate::error::{JetfeedError, Result};
use crate::histogram::PT_WEIGHT_EDGES;

/// Default combined batch size across classes
pub const DEFAULT_BATCH: usize = 32;

/// Options recognized when opening a merged generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorOptions {
    /// Split to draw shards from
    pub partition: Partition,
    /// Combined batch size, divided evenly between classes
    pub batch: usize,
    /// Recompute partitions from scratch when the generator opens
    pub repartition: bool,
    /// Emit the mass decorrelation target
    pub decorr_mass: bool,
    /// Emit the pt decorrelation target
    pub decorr_pt: bool,
    /// Standardize input variables
    pub normalize: bool,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            partition: Partition::Train,
            batch: DEFAULT_BATCH,
            repartition: true,
            decorr_mass: false,
            decorr_pt: false,
            normalize: false,
        }
    }
}

impl GeneratorOptions {
    /// Whether the decorrelated merger layout is requested
    pub fn wants_decorrelation(&self) -> bool {
        self.decorr_mass || self.decorr_pt || self.normalize
    }
}

/// Fixed-width binning of a decorrelation variable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecorrBinning {
    pub min: f64,
    pub max: f64,
    pub n_bins: usize,
}

impl DecorrBinning {
    pub fn new(min: f64, max: f64, n_bins: usize) -> Self {
        Self { min, max, n_bins }
    }

    /// Clip to `[min, max]` and map linearly onto `0..n_bins`.
    ///
    /// The top category is reached only at `max`; NaN maps to 0.
    pub fn category(&self, x: f64) -> usize {
        if x.is_nan() {
            return 0;
        }
        let fraction = (x.clamp(self.min, self.max) - self.min) / (self.max - self.min);
        ((fraction * (self.n_bins - 1) as f64) as usize).min(self.n_bins - 1)
    }

    pub fn one_hot(&self, values: ArrayView1<'_, f64>) -> Array2<f64> {
        let categories: Vec<usize> = values.iter().map(|&x| self.category(x)).collect();
        one_hot_categories(&categories, self.n_bins)
    }

    fn validate(&self, what: &str) -> Result<()> {
        if !(self.max > self.min) || self.n_bins < 2 {
            return Err(JetfeedError::config(format!(
                "{what} binning needs max > min and at least 2 bins, got [{}, {}] with {} bins",
                self.min, self.max, self.n_bins
            )));
        }
        Ok(())
    }
}

/// Settings for the decorrelated merger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecorrelationConfig {
    /// Reference-group variables fed to the model, in order
    pub variables: Vec<String>,
    /// Per-variable means for standardization
    pub mus: Vec<f64>,
    /// Per-variable standard deviations for standardization
    pub sigmas: Vec<f64>,
    /// Binning of `msd` for the mass target
    pub mass: DecorrBinning,
    /// Binning of `pt` for the pt target
    pub pt: DecorrBinning,
    /// Number of truth (prong) categories
    pub n_truth: usize,
    /// Truth categories whose events feed the decorrelation losses
    pub adversary_mask: Vec<usize>,
}

impl Default for DecorrelationConfig {
    fn default() -> Self {
        Self {
            variables: vec!["msd".into(), "tau32".into(), "tau21".into()],
            mus: vec![0.0; 3],
            sigmas: vec![1.0; 3],
            mass: DecorrBinning::new(0.0, 300.0, 20),
            pt: DecorrBinning::new(250.0, 1000.0, 20),
            n_truth: 4,
            adversary_mask: vec![0],
        }
    }
}

impl DecorrelationConfig {
    pub fn validate(&self, manifest: &FeatureManifest) -> Result<()> {
        if self.variables.is_empty() {
            return Err(JetfeedError::config("no input variables configured"));
        }
        if self.mus.len() != self.variables.len() || self.sigmas.len() != self.variables.len() {
            return Err(JetfeedError::config(format!(
                "{} variables but {} mus and {} sigmas",
                self.variables.len(),
                self.mus.len(),
                self.sigmas.len()
            )));
        }
        if let Some(sigma) = self.sigmas.iter().find(|s| **s == 0.0 || !s.is_finite()) {
            return Err(JetfeedError::config(format!("invalid sigma {sigma}")));
        }
        manifest.columns(&self.variables)?;
        self.mass.validate("mass")?;
        self.pt.validate("pt")?;
        if self.n_truth == 0 {
            return Err(JetfeedError::config("n_truth must be positive"));
        }
        if let Some(bad) = self.adversary_mask.iter().find(|&&c| c >= self.n_truth) {
            return Err(JetfeedError::config(format!(
                "adversary mask category {bad} outside {} truth categories",
                self.n_truth
            )));
        }
        Ok(())
    }
}

/// One class to register
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSpec {
    pub name: String,
    /// Glob containing the group placeholder
    pub pattern: String,
    /// Feature groups to load besides the reference group
    #[serde(default)]
    pub groups: Vec<String>,
    /// Groups fed to the model, overriding the default selection
    #[serde(default)]
    pub input_groups: Option<Vec<String>>,
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Column layout of the reference group
    pub singletons: FeatureManifest,
    pub reference_group: String,
    pub placeholder: String,
    pub pt_edges: Vec<f64>,
    pub train_frac: f64,
    pub test_frac: f64,
    /// Seed for partition shuffles; entropy when unset
    pub seed: Option<u64>,
    pub decorrelation: DecorrelationConfig,
    pub generator: GeneratorOptions,
    pub classes: Vec<ClassSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            singletons: FeatureManifest::singletons(),
            reference_group: REFERENCE_GROUP.into(),
            placeholder: GROUP_PLACEHOLDER.into(),
            pt_edges: PT_WEIGHT_EDGES.to_vec(),
            train_frac: DEFAULT_TRAIN_FRAC,
            test_frac: DEFAULT_TEST_FRAC,
            seed: None,
            decorrelation: DecorrelationConfig::default(),
            generator: GeneratorOptions::default(),
            classes: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a JSON configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| JetfeedError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    /// Parse and validate a JSON configuration string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| JetfeedError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reference_group.is_empty() || self.placeholder.is_empty() {
            return Err(JetfeedError::config(
                "reference_group and placeholder must be non-empty",
            ));
        }
        for field in ["pt", "nProngs", "nbHadrons", "msd"] {
            self.singletons.column(field)?;
        }
        if self.pt_edges.is_empty() || self.pt_edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(JetfeedError::config(
                "pt_edges must be non-empty and strictly ascending",
            ));
        }
        validate_fractions(self.train_frac, self.test_frac)?;
        if self.generator.batch == 0 {
            return Err(JetfeedError::config("batch must be at least 1"));
        }
        self.decorrelation.validate(&self.singletons)?;

        for class in &self.classes {
            if !class.pattern.contains(&self.placeholder) {
                return Err(JetfeedError::config(format!(
                    "pattern for class {} lacks placeholder {}",
                    class.name, self.placeholder
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_defaults_validate() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.generator.batch, DEFAULT_BATCH);
        assert_eq!(config.pt_edges.last(), Some(&2000.0));
    }

    #[test]
    fn test_partial_json() {
        let config = PipelineConfig::from_json(
            r#"{
                "seed": 11,
                "generator": {"partition": "validate", "batch": 8, "decorr_mass": true},
                "classes": [
                    {"name": "top", "pattern": "/data/top_XXXX_*.npy", "groups": ["charged", "sv"]}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.seed, Some(11));
        assert_eq!(config.generator.partition, Partition::Validate);
        assert_eq!(config.generator.batch, 8);
        assert!(config.generator.repartition);
        assert!(config.generator.wants_decorrelation());
        assert_eq!(config.classes[0].groups, vec!["charged", "sv"]);
        assert_eq!(config.classes[0].input_groups, None);
    }

    #[test]
    fn test_rejects_bad_normalization() {
        let mut config = PipelineConfig::default();
        config.decorrelation.sigmas = vec![1.0, 0.0, 1.0];
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.decorrelation.mus.pop();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.decorrelation.variables[0] = "phi".into();
        assert!(matches!(
            config.validate(),
            Err(JetfeedError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_layout() {
        let mut config = PipelineConfig::default();
        config.pt_edges = vec![0.0, 40.0, 40.0];
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.decorrelation.adversary_mask = vec![4];
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.classes.push(ClassSpec {
            name: "qcd".into(),
            pattern: "/data/qcd_*.npy".into(),
            groups: vec![],
            input_groups: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_decorr_binning() {
        let binning = DecorrBinning::new(250.0, 1000.0, 4);
        assert_eq!(binning.category(100.0), 0);
        assert_eq!(binning.category(250.0), 0);
        assert_eq!(binning.category(500.0), 1);
        assert_eq!(binning.category(999.0), 2);
        assert_eq!(binning.category(1000.0), 3);
        assert_eq!(binning.category(5000.0), 3);

        let encoded = binning.one_hot(array![260.0, 2000.0].view());
        assert_eq!(encoded, array![[1.0, 0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0]]);
    }
}
