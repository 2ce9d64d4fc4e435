//! Error types for color analysis.
//!
//! Errors come in two classes that callers are expected to treat differently:
//! a [`ValidationError`] means the request itself was malformed and no numeric work was done,
//! while a [`ComputationError`] means a well-formed request hit an input the engine cannot handle.

use thiserror::Error;

/// A request or configuration parameter was missing or out of its domain
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
	/// A parameter required by the selected mode was not provided
	#[error("{field} is required for {mode} mode")]
	MissingField {
		/// Name of the missing parameter
		field: &'static str,
		/// Name of the mode that requires it
		mode: &'static str,
	},

	/// A numeric parameter fell outside its allowed range
	#[error("{field} must be between {min} and {max}, got {value}")]
	OutOfRange {
		/// Name of the parameter, including the channel index for ranges
		field: String,
		/// The rejected value
		value: i64,
		/// Smallest allowed value
		min: i64,
		/// Largest allowed value
		max: i64,
	},

	/// A color string was not of the form `#rrggbb`
	#[error("{value:?} is not a hex color in the form #rrggbb")]
	InvalidHex {
		/// The rejected string
		value: String,
	},

	/// A per-channel list did not have one entry per channel
	#[error("{field} must contain exactly {expected} values, got {actual}")]
	WrongLength {
		/// Name of the parameter
		field: &'static str,
		/// Number of values required
		expected: usize,
		/// Number of values provided
		actual: usize,
	},

	/// A range had a lower bound above its upper bound
	#[error("lower bound {lower} is above upper bound {upper} in channel {channel}")]
	InvertedRange {
		/// Index of the offending channel
		channel: usize,
		/// Lower bound for the channel
		lower: u8,
		/// Upper bound for the channel
		upper: u8,
	},

	/// The analysis mode name is not recognized
	#[error("unknown analysis mode {0:?}")]
	UnknownMode(String),

	/// The color space name is not recognized
	#[error("unknown color space {0:?}, expected HSV, RGB, or LAB")]
	UnknownColorSpace(String),

	/// The segmentation method name is not recognized
	#[error("unknown segmentation method {0:?}, expected kmeans or watershed")]
	UnknownMethod(String),

	/// The covariance type name is not recognized
	#[error("unknown covariance type {0:?}, expected full, tied, diag, or spherical")]
	UnknownCovarianceType(String),

	/// A tunable in [`AnalysisConfig`](crate::AnalysisConfig) does not make sense
	#[error("invalid configuration: {field} {reason}")]
	InvalidConfig {
		/// Path of the configuration field
		field: &'static str,
		/// What is wrong with it
		reason: &'static str,
	},
}

/// A well-formed request could not be computed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComputationError {
	/// The image has zero width or zero height
	#[error("image has no pixels")]
	EmptyImage,

	/// The image has more pixels than pixel counts can represent
	#[error("image has {pixels} pixels, more than the supported maximum of {max}")]
	ImageTooLarge {
		/// Number of pixels in the image
		pixels: u64,
		/// Largest supported number of pixels
		max: u64,
	},

	/// A pixel buffer does not match the stated image dimensions
	#[error("expected {expected} pixels for the given dimensions, got {actual}")]
	DimensionMismatch {
		/// Number of pixels implied by width and height
		expected: u64,
		/// Number of pixels provided
		actual: u64,
	},

	/// A clustering model was asked for zero clusters
	#[error("cannot fit a model with zero clusters")]
	NoClusters,

	/// Model fitting reached a numerically unusable state
	#[error("model fitting failed: {0}")]
	DegenerateModel(&'static str),
}

/// Any failure produced by [`analyze`](crate::analyze)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
	/// The request was rejected before any computation
	#[error(transparent)]
	Validation(#[from] ValidationError),

	/// The request was valid but could not be computed
	#[error(transparent)]
	Computation(#[from] ComputationError),
}

impl AnalysisError {
	/// Whether this error was caused by a malformed request rather than by the image
	#[must_use]
	pub const fn is_validation(&self) -> bool {
		matches!(self, Self::Validation(_))
	}
}

/// Loading an [`AnalysisConfig`](crate::AnalysisConfig) failed
#[derive(Debug, Error)]
pub enum ConfigError {
	/// The configuration file could not be read
	#[error("failed to read configuration: {0}")]
	Io(#[from] std::io::Error),

	/// The configuration was not valid JSON for the expected shape
	#[error("failed to parse configuration: {0}")]
	Parse(#[from] serde_json::Error),

	/// The configuration parsed but holds unusable values
	#[error(transparent)]
	Invalid(#[from] ValidationError),
}
