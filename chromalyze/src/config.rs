//! Tunables for the analysis engine.
//!
//! Every numeric knob the algorithms use lives here so that runs can be reproduced from a single
//! JSON document. Missing fields fall back to their defaults:
//!
//! ```
//! let config = chromalyze::AnalysisConfig::from_json_str(r#"{ "seed": 7, "kmeans": { "attempts": 3 } }"#)?;
//! assert_eq!(config.seed, Some(7));
//! assert_eq!(config.kmeans.attempts, 3);
//! assert_eq!(config.kmeans.max_iter, 20);
//! # Ok::<(), chromalyze::ConfigError>(())
//! ```

use crate::error::{ConfigError, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration shared by every analysis mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
	/// Seed for every randomized step. `None` draws a fresh seed from OS entropy for each call.
	pub seed: Option<u64>,
	/// Maximum number of pixels used to fit a Gaussian mixture
	pub sample_cap: usize,
	/// Hard clustering parameters
	pub kmeans: KmeansConfig,
	/// Gaussian mixture parameters
	pub gmm: GmmConfig,
	/// Target color detection parameters
	pub detection: DetectionConfig,
	/// Watershed segmentation parameters
	pub watershed: WatershedConfig,
}

impl Default for AnalysisConfig {
	fn default() -> Self {
		Self {
			seed: None,
			sample_cap: 50_000,
			kmeans: KmeansConfig::default(),
			gmm: GmmConfig::default(),
			detection: DetectionConfig::default(),
			watershed: WatershedConfig::default(),
		}
	}
}

/// Stopping criteria and restarts for k-means
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KmeansConfig {
	/// Maximum number of refinement iterations per attempt
	pub max_iter: u32,
	/// An attempt stops once the total centroid movement drops to this value or below
	pub epsilon: f32,
	/// Number of attempts from different initial centroids; the lowest inertia wins
	pub attempts: u32,
}

impl Default for KmeansConfig {
	fn default() -> Self {
		Self { max_iter: 20, epsilon: 1.0, attempts: 10 }
	}
}

/// Expectation-maximization settings for Gaussian mixtures
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GmmConfig {
	/// Maximum number of EM iterations
	pub max_iter: u32,
	/// EM stops once the per-sample lower bound improves by less than this
	pub tolerance: f64,
	/// Added to covariance diagonals to keep them positive definite
	pub reg_covar: f64,
	/// Seed used when [`AnalysisConfig::seed`] is `None`, so mixtures are reproducible by default
	pub default_seed: u64,
}

impl Default for GmmConfig {
	fn default() -> Self {
		Self { max_iter: 100, tolerance: 1e-3, reg_covar: 1e-6, default_seed: 42 }
	}
}

/// Target color detection settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
	/// Connected regions with fewer pixels than this are dropped as noise
	pub min_region_area: u32,
}

impl Default for DetectionConfig {
	fn default() -> Self {
		Self { min_region_area: 100 }
	}
}

/// Marker extraction settings for watershed segmentation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatershedConfig {
	/// Chebyshev radius of the opening that removes speckles (2 is two passes of a 3x3 kernel)
	pub open_radius: u8,
	/// Chebyshev radius of the dilation that estimates the background
	pub dilate_radius: u8,
	/// Fraction of the largest distance to the background above which pixels are confident foreground
	pub foreground_fraction: f64,
}

impl Default for WatershedConfig {
	fn default() -> Self {
		Self { open_radius: 2, dilate_radius: 3, foreground_fraction: 0.7 }
	}
}

impl AnalysisConfig {
	/// Parse a configuration from a JSON string and validate it
	///
	/// # Errors
	/// Returns an error if the JSON is malformed or holds unusable values.
	pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
		let config: Self = serde_json::from_str(json)?;
		config.validate()?;
		Ok(config)
	}

	/// Read, parse, and validate a JSON configuration file
	///
	/// # Errors
	/// Returns an error if the file cannot be read, is malformed, or holds unusable values.
	pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
		let json = std::fs::read_to_string(path)?;
		Self::from_json_str(&json)
	}

	/// Check that every tunable is usable
	///
	/// # Errors
	/// Returns the first unusable field found.
	pub fn validate(&self) -> Result<(), ValidationError> {
		/// Shorthand for building the error
		const fn invalid(field: &'static str, reason: &'static str) -> ValidationError {
			ValidationError::InvalidConfig { field, reason }
		}

		if self.sample_cap == 0 {
			return Err(invalid("sample_cap", "must be positive"));
		}
		if self.kmeans.max_iter == 0 {
			return Err(invalid("kmeans.max_iter", "must be positive"));
		}
		if self.kmeans.attempts == 0 {
			return Err(invalid("kmeans.attempts", "must be positive"));
		}
		if self.kmeans.epsilon.is_nan() || self.kmeans.epsilon < 0.0 {
			return Err(invalid("kmeans.epsilon", "must be a non-negative number"));
		}
		if self.gmm.max_iter == 0 {
			return Err(invalid("gmm.max_iter", "must be positive"));
		}
		if self.gmm.tolerance.is_nan() || self.gmm.tolerance < 0.0 {
			return Err(invalid("gmm.tolerance", "must be a non-negative number"));
		}
		if self.gmm.reg_covar.is_nan() || self.gmm.reg_covar < 0.0 {
			return Err(invalid("gmm.reg_covar", "must be a non-negative number"));
		}
		let fraction = self.watershed.foreground_fraction;
		if fraction.is_nan() || fraction <= 0.0 || fraction > 1.0 {
			return Err(invalid("watershed.foreground_fraction", "must be in (0, 1]"));
		}
		Ok(())
	}
}
