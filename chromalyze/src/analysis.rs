//! Validated analysis requests and the dispatcher that runs them.
//!
//! A request is built either directly through one constructor per mode or from loosely typed
//! [`RawParameters`], and is fully validated before [`analyze`] does any numeric work.

use crate::{
	color::{hex_to_rgb, ColorImage, ColorSpace, Pixel},
	config::AnalysisConfig,
	error::{AnalysisError, ComputationError, ValidationError},
	gmm::{gmm_quantize, CovarianceType},
	kmeans::{dominant_colors, quantize, PaletteEntry, Quantized},
	matcher::{detect_by_color, range_mask, ColorRange, Detection, RangeMask},
	names::{assign_names, NamedPaletteEntry},
	sample::resolve_seed,
	segment::{kmeans_segment, watershed_segment, Segment, SegmentationMethod},
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use tracing::{info, instrument};

/// The kind of analysis to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
	/// Most common colors with their occurrence percentages
	DominantColors,
	/// Regions close to a target color
	ColorDetection,
	/// Image reduced to a k-means palette
	ColorQuantization,
	/// Pixels inside a per-channel range
	ColorMask,
	/// Image split into regions
	MultiSegment,
	/// Image reduced to the means of a Gaussian mixture
	GmmQuantization,
	/// Quantization palette annotated with color names
	ColorNamePalette,
}

impl Mode {
	/// Every mode
	pub const ALL: [Self; 7] = [
		Self::DominantColors,
		Self::ColorDetection,
		Self::ColorQuantization,
		Self::ColorMask,
		Self::MultiSegment,
		Self::GmmQuantization,
		Self::ColorNamePalette,
	];

	/// The snake case name of the mode
	#[must_use]
	pub const fn name(self) -> &'static str {
		match self {
			Self::DominantColors => "dominant_colors",
			Self::ColorDetection => "color_detection",
			Self::ColorQuantization => "color_quantization",
			Self::ColorMask => "color_mask",
			Self::MultiSegment => "multi_segment",
			Self::GmmQuantization => "gmm_quantization",
			Self::ColorNamePalette => "color_name_palette",
		}
	}
}

impl fmt::Display for Mode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

impl FromStr for Mode {
	type Err = ValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|mode| mode.name() == s)
			.ok_or_else(|| ValidationError::UnknownMode(s.to_owned()))
	}
}

/// The allowed values and default of a bounded integer parameter
struct Bounds {
	/// Parameter name used in errors
	field: &'static str,
	/// Smallest allowed value
	min: u8,
	/// Largest allowed value
	max: u8,
	/// Value used when the parameter is not given
	default: u8,
}

impl Bounds {
	/// Check that `value` is allowed
	fn check(&self, value: i64) -> Result<u8, ValidationError> {
		u8::try_from(value)
			.ok()
			.filter(|v| (self.min..=self.max).contains(v))
			.ok_or_else(|| ValidationError::OutOfRange {
				field: self.field.to_owned(),
				value,
				min: i64::from(self.min),
				max: i64::from(self.max),
			})
	}

	/// Check an optional value, falling back to the default
	fn check_or_default(&self, value: Option<i64>) -> Result<u8, ValidationError> {
		self.check(value.unwrap_or(i64::from(self.default)))
	}
}

/// `numColors`
const NUM_COLORS: Bounds = Bounds { field: "numColors", min: 2, max: 20, default: 5 };
/// `tolerance`
const TOLERANCE: Bounds = Bounds { field: "tolerance", min: 1, max: 100, default: 30 };
/// `quantizationLevels`
const QUANTIZATION_LEVELS: Bounds = Bounds { field: "quantizationLevels", min: 2, max: 32, default: 8 };
/// `numSegments`
const NUM_SEGMENTS: Bounds = Bounds { field: "numSegments", min: 2, max: 15, default: 5 };
/// `nComponents`
const N_COMPONENTS: Bounds = Bounds { field: "nComponents", min: 1, max: 32, default: 8 };
/// `paletteSize`
const PALETTE_SIZE: Bounds = Bounds { field: "paletteSize", min: 2, max: 32, default: 8 };

/// Loosely typed parameters, e.g. from a JSON form.
///
/// Every field is optional; [`AnalysisRequest::from_raw`] decides which ones the mode needs.
/// Field names are camel case, with the snake case spelling accepted as an alias.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawParameters {
	/// Number of dominant colors
	#[serde(alias = "num_colors")]
	pub num_colors: Option<i64>,
	/// Target color as `#rrggbb`
	#[serde(alias = "target_color")]
	pub target_color: Option<String>,
	/// Per-channel tolerance around the target color
	pub tolerance: Option<i64>,
	/// Number of quantization colors
	#[serde(alias = "quantization_levels")]
	pub quantization_levels: Option<i64>,
	/// Color space of the mask range
	#[serde(alias = "color_space")]
	pub color_space: Option<String>,
	/// Lower bound of the mask range
	#[serde(alias = "lower_range")]
	pub lower_range: Option<Vec<i64>>,
	/// Upper bound of the mask range
	#[serde(alias = "upper_range")]
	pub upper_range: Option<Vec<i64>>,
	/// Number of k-means segments
	#[serde(alias = "num_segments")]
	pub num_segments: Option<i64>,
	/// Segmentation method
	#[serde(alias = "segmentation_method", alias = "segmentationMethod")]
	pub method: Option<String>,
	/// Number of mixture components
	#[serde(alias = "n_components")]
	pub n_components: Option<i64>,
	/// Mixture covariance type
	#[serde(alias = "covariance_type")]
	pub covariance_type: Option<String>,
	/// Number of named palette colors
	#[serde(alias = "palette_size")]
	pub palette_size: Option<i64>,
}

/// The validated parameters of each mode
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::missing_docs_in_private_items)]
enum Request {
	/// See [`AnalysisRequest::dominant_colors`]
	DominantColors { num_colors: u8 },
	/// See [`AnalysisRequest::color_detection`]
	ColorDetection { target: Pixel, tolerance: u8 },
	/// See [`AnalysisRequest::color_quantization`]
	ColorQuantization { levels: u8 },
	/// See [`AnalysisRequest::color_mask`]
	ColorMask { space: ColorSpace, range: ColorRange },
	/// See [`AnalysisRequest::multi_segment`]
	MultiSegment { num_segments: u8, method: SegmentationMethod },
	/// See [`AnalysisRequest::gmm_quantization`]
	GmmQuantization { n_components: u8, covariance_type: CovarianceType },
	/// See [`AnalysisRequest::color_name_palette`]
	ColorNamePalette { palette_size: u8 },
}

/// A mode together with its validated parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest(Request);

impl AnalysisRequest {
	/// Extract `num_colors` (2 to 20) dominant colors
	///
	/// # Errors
	/// Returns an error if `num_colors` is out of range.
	pub fn dominant_colors(num_colors: u8) -> Result<Self, ValidationError> {
		let num_colors = NUM_COLORS.check(num_colors.into())?;
		Ok(Self(Request::DominantColors { num_colors }))
	}

	/// Detect regions within `tolerance` (1 to 100) of a `#rrggbb` target color
	///
	/// # Errors
	/// Returns an error if the color is malformed or `tolerance` is out of range.
	pub fn color_detection(target_color: &str, tolerance: u8) -> Result<Self, ValidationError> {
		let target = hex_to_rgb(target_color)?;
		let tolerance = TOLERANCE.check(tolerance.into())?;
		Ok(Self(Request::ColorDetection { target, tolerance }))
	}

	/// Quantize to `levels` (2 to 32) colors
	///
	/// # Errors
	/// Returns an error if `levels` is out of range.
	pub fn color_quantization(levels: u8) -> Result<Self, ValidationError> {
		let levels = QUANTIZATION_LEVELS.check(levels.into())?;
		Ok(Self(Request::ColorQuantization { levels }))
	}

	/// Mask the pixels inside `lower..=upper` in `space`
	///
	/// # Errors
	/// See [`ColorRange::new`].
	pub fn color_mask(space: ColorSpace, lower: Pixel, upper: Pixel) -> Result<Self, ValidationError> {
		let range = ColorRange::new(space, lower, upper)?;
		Ok(Self(Request::ColorMask { space, range }))
	}

	/// Segment into regions. `num_segments` (2 to 15) is only used by k-means segmentation,
	/// but is validated for both methods.
	///
	/// # Errors
	/// Returns an error if `num_segments` is out of range.
	pub fn multi_segment(num_segments: u8, method: SegmentationMethod) -> Result<Self, ValidationError> {
		let num_segments = NUM_SEGMENTS.check(num_segments.into())?;
		Ok(Self(Request::MultiSegment { num_segments, method }))
	}

	/// Quantize to the means of a Gaussian mixture with `n_components` (1 to 32) components
	///
	/// # Errors
	/// Returns an error if `n_components` is out of range.
	pub fn gmm_quantization(n_components: u8, covariance_type: CovarianceType) -> Result<Self, ValidationError> {
		let n_components = N_COMPONENTS.check(n_components.into())?;
		Ok(Self(Request::GmmQuantization { n_components, covariance_type }))
	}

	/// Name the colors of a `palette_size` (2 to 32) color quantization palette
	///
	/// # Errors
	/// Returns an error if `palette_size` is out of range.
	pub fn color_name_palette(palette_size: u8) -> Result<Self, ValidationError> {
		let palette_size = PALETTE_SIZE.check(palette_size.into())?;
		Ok(Self(Request::ColorNamePalette { palette_size }))
	}

	/// Build a request from a mode name and loosely typed parameters.
	///
	/// Optional parameters the mode uses fall back to their defaults, while required ones
	/// (`targetColor`, `lowerRange`, `upperRange`) must be present.
	/// Parameters the mode does not use are ignored.
	///
	/// # Errors
	/// Returns an error for an unknown mode, a missing required parameter, or any invalid value.
	pub fn from_raw(mode: &str, raw: &RawParameters) -> Result<Self, ValidationError> {
		let mode = mode.parse::<Mode>()?;
		let missing = |field| ValidationError::MissingField { field, mode: mode.name() };

		let request = match mode {
			Mode::DominantColors => Request::DominantColors { num_colors: NUM_COLORS.check_or_default(raw.num_colors)? },
			Mode::ColorDetection => {
				let target_color = raw.target_color.as_deref().ok_or_else(|| missing("targetColor"))?;
				Request::ColorDetection {
					target: hex_to_rgb(target_color)?,
					tolerance: TOLERANCE.check_or_default(raw.tolerance)?,
				}
			},
			Mode::ColorQuantization => {
				Request::ColorQuantization { levels: QUANTIZATION_LEVELS.check_or_default(raw.quantization_levels)? }
			},
			Mode::ColorMask => {
				let space = raw.color_space.as_deref().map_or(Ok(ColorSpace::Hsv), str::parse)?;
				let lower = raw.lower_range.as_deref().ok_or_else(|| missing("lowerRange"))?;
				let upper = raw.upper_range.as_deref().ok_or_else(|| missing("upperRange"))?;
				Request::ColorMask { space, range: ColorRange::from_slices(space, lower, upper)? }
			},
			Mode::MultiSegment => Request::MultiSegment {
				num_segments: NUM_SEGMENTS.check_or_default(raw.num_segments)?,
				method: raw.method.as_deref().map_or(Ok(SegmentationMethod::default()), str::parse)?,
			},
			Mode::GmmQuantization => Request::GmmQuantization {
				n_components: N_COMPONENTS.check_or_default(raw.n_components)?,
				covariance_type: raw.covariance_type.as_deref().map_or(Ok(CovarianceType::default()), str::parse)?,
			},
			Mode::ColorNamePalette => {
				Request::ColorNamePalette { palette_size: PALETTE_SIZE.check_or_default(raw.palette_size)? }
			},
		};

		Ok(Self(request))
	}

	/// The mode this request runs
	#[must_use]
	pub const fn mode(&self) -> Mode {
		match self.0 {
			Request::DominantColors { .. } => Mode::DominantColors,
			Request::ColorDetection { .. } => Mode::ColorDetection,
			Request::ColorQuantization { .. } => Mode::ColorQuantization,
			Request::ColorMask { .. } => Mode::ColorMask,
			Request::MultiSegment { .. } => Mode::MultiSegment,
			Request::GmmQuantization { .. } => Mode::GmmQuantization,
			Request::ColorNamePalette { .. } => Mode::ColorNamePalette,
		}
	}
}

/// The result of one analysis, tagged with its mode when serialized
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AnalysisOutput {
	/// Palette sorted by descending occurrence percentage
	DominantColors {
		/// The dominant colors
		#[serde(rename = "dominant_colors")]
		palette: Vec<PaletteEntry>,
	},
	/// Target color mask and region boxes
	ColorDetection(Detection),
	/// Quantized image and its palette in cluster order
	ColorQuantization(Quantized),
	/// Range mask and its coverage
	ColorMask(RangeMask),
	/// Segments of the image
	MultiSegment {
		/// How the segments were found
		#[serde(rename = "segmentation_method")]
		method: SegmentationMethod,
		/// The segments, numbered from 1
		segments: Vec<Segment>,
	},
	/// Quantized image and its palette sorted by descending mixture weight
	GmmQuantization {
		/// Shape of the mixture covariances
		covariance_type: CovarianceType,
		/// The rendered image and palette
		#[serde(flatten)]
		quantized: Quantized,
	},
	/// Quantization palette with color names, in cluster order
	ColorNamePalette {
		/// The named palette
		palette: Vec<NamedPaletteEntry>,
	},
}

impl AnalysisOutput {
	/// The mode that produced this output
	#[must_use]
	pub const fn mode(&self) -> Mode {
		match self {
			Self::DominantColors { .. } => Mode::DominantColors,
			Self::ColorDetection(_) => Mode::ColorDetection,
			Self::ColorQuantization(_) => Mode::ColorQuantization,
			Self::ColorMask(_) => Mode::ColorMask,
			Self::MultiSegment { .. } => Mode::MultiSegment,
			Self::GmmQuantization { .. } => Mode::GmmQuantization,
			Self::ColorNamePalette { .. } => Mode::ColorNamePalette,
		}
	}
}

/// Run one analysis on an image.
///
/// Requests are validated when they are built, so the only validation left here is of `config`.
///
/// # Errors
/// Returns a validation error for an unusable `config`, and a computation error if the image is
/// empty or a model cannot be fitted.
#[instrument(skip_all, fields(mode = %request.mode()))]
pub fn analyze(
	image: &ColorImage,
	request: &AnalysisRequest,
	config: &AnalysisConfig,
) -> Result<AnalysisOutput, AnalysisError> {
	config.validate()?;
	if image.is_empty() {
		return Err(ComputationError::EmptyImage.into());
	}

	let seed = resolve_seed(config.seed);
	info!(width = image.width(), height = image.height(), space = %image.space(), seed, "running analysis");

	let output = match request.0 {
		Request::DominantColors { num_colors } => {
			AnalysisOutput::DominantColors { palette: dominant_colors(image, num_colors, &config.kmeans, seed)? }
		},
		Request::ColorDetection { target, tolerance } => {
			AnalysisOutput::ColorDetection(detect_by_color(image, target, tolerance, &config.detection))
		},
		Request::ColorQuantization { levels } => {
			AnalysisOutput::ColorQuantization(quantize(image, levels, &config.kmeans, seed)?)
		},
		Request::ColorMask { space, range } => AnalysisOutput::ColorMask(range_mask(image, space, &range)),
		Request::MultiSegment { num_segments, method } => {
			let segments = match method {
				SegmentationMethod::KMeans => kmeans_segment(image, num_segments, &config.kmeans, seed)?,
				SegmentationMethod::Watershed => watershed_segment(image, &config.watershed)?,
			};
			AnalysisOutput::MultiSegment { method, segments }
		},
		Request::GmmQuantization { n_components, covariance_type } => AnalysisOutput::GmmQuantization {
			covariance_type,
			quantized: gmm_quantize(image, n_components, covariance_type, config)?,
		},
		Request::ColorNamePalette { palette_size } => {
			let quantized = quantize(image, palette_size, &config.kmeans, seed)?;
			AnalysisOutput::ColorNamePalette { palette: assign_names(quantized.palette) }
		},
	};

	Ok(output)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	fn raw(json: &str) -> RawParameters {
		serde_json::from_str(json).unwrap()
	}

	#[test]
	fn mode_names_round_trip() {
		for mode in Mode::ALL {
			assert_eq!(mode.name().parse::<Mode>().unwrap(), mode);
		}
		assert_eq!("sepia".parse::<Mode>(), Err(ValidationError::UnknownMode("sepia".to_owned())));
	}

	#[test]
	fn raw_defaults() {
		let none = RawParameters::default();
		assert_eq!(
			AnalysisRequest::from_raw("dominant_colors", &none).unwrap(),
			AnalysisRequest::dominant_colors(5).unwrap()
		);
		assert_eq!(
			AnalysisRequest::from_raw("color_quantization", &none).unwrap(),
			AnalysisRequest::color_quantization(8).unwrap()
		);
		assert_eq!(
			AnalysisRequest::from_raw("multi_segment", &none).unwrap(),
			AnalysisRequest::multi_segment(5, SegmentationMethod::KMeans).unwrap()
		);
		assert_eq!(
			AnalysisRequest::from_raw("gmm_quantization", &none).unwrap(),
			AnalysisRequest::gmm_quantization(8, CovarianceType::Tied).unwrap()
		);
		assert_eq!(
			AnalysisRequest::from_raw("color_name_palette", &none).unwrap(),
			AnalysisRequest::color_name_palette(8).unwrap()
		);
	}

	#[test]
	fn required_fields_are_never_defaulted() {
		let none = RawParameters::default();
		assert_eq!(
			AnalysisRequest::from_raw("color_detection", &none),
			Err(ValidationError::MissingField { field: "targetColor", mode: "color_detection" })
		);
		assert_eq!(
			AnalysisRequest::from_raw("color_mask", &raw(r#"{ "upperRange": [1, 2, 3] }"#)),
			Err(ValidationError::MissingField { field: "lowerRange", mode: "color_mask" })
		);
		assert_eq!(
			AnalysisRequest::from_raw("color_mask", &raw(r#"{ "lowerRange": [1, 2, 3] }"#)),
			Err(ValidationError::MissingField { field: "upperRange", mode: "color_mask" })
		);
	}

	#[test]
	fn detection_parameters() {
		let request = AnalysisRequest::from_raw("color_detection", &raw(r##"{ "targetColor": "#FF0000" }"##)).unwrap();
		assert_eq!(request, AnalysisRequest::color_detection("#ff0000", 30).unwrap());
		assert_eq!(request.mode(), Mode::ColorDetection);

		assert!(matches!(
			AnalysisRequest::from_raw("color_detection", &raw(r#"{ "targetColor": "red" }"#)),
			Err(ValidationError::InvalidHex { .. })
		));
		assert!(matches!(
			AnalysisRequest::color_detection("#ff0000", 0),
			Err(ValidationError::OutOfRange { min: 1, max: 100, .. })
		));
		assert!(matches!(
			AnalysisRequest::from_raw("color_detection", &raw(r##"{ "target_color": "#00ff00", "tolerance": 101 }"##)),
			Err(ValidationError::OutOfRange { value: 101, .. })
		));
	}

	#[test]
	fn bounded_parameters() {
		assert!(AnalysisRequest::dominant_colors(1).is_err());
		assert!(AnalysisRequest::dominant_colors(21).is_err());
		assert!(AnalysisRequest::dominant_colors(20).is_ok());
		assert!(AnalysisRequest::color_quantization(33).is_err());
		assert!(AnalysisRequest::multi_segment(16, SegmentationMethod::Watershed).is_err());
		assert!(AnalysisRequest::gmm_quantization(0, CovarianceType::Full).is_err());
		assert!(AnalysisRequest::color_name_palette(1).is_err());

		let err = AnalysisRequest::from_raw("dominant_colors", &raw(r#"{ "numColors": -4 }"#)).unwrap_err();
		assert_eq!(err.to_string(), "numColors must be between 2 and 20, got -4");
	}

	#[test]
	fn mask_parameters() {
		let request = AnalysisRequest::from_raw(
			"color_mask",
			&raw(r#"{ "lowerRange": [0, 50, 50], "upperRange": [10, 255, 255] }"#),
		)
		.unwrap();
		assert_eq!(request, AnalysisRequest::color_mask(ColorSpace::Hsv, [0, 50, 50], [10, 255, 255]).unwrap());

		assert!(matches!(
			AnalysisRequest::from_raw("color_mask", &raw(r#"{ "lowerRange": [0, 50], "upperRange": [10, 255, 255] }"#)),
			Err(ValidationError::WrongLength { actual: 2, .. })
		));
		assert!(matches!(
			AnalysisRequest::from_raw("color_mask", &raw(r#"{ "lowerRange": [0, 0, 0], "upperRange": [180, 255, 255] }"#)),
			Err(ValidationError::OutOfRange { value: 180, max: 179, .. })
		));
		assert!(AnalysisRequest::from_raw(
			"color_mask",
			&raw(r#"{ "colorSpace": "RGB", "lowerRange": [0, 0, 0], "upperRange": [180, 255, 255] }"#),
		)
		.is_ok());
		assert!(matches!(
			AnalysisRequest::from_raw(
				"color_mask",
				&raw(r#"{ "colorSpace": "CMYK", "lowerRange": [0, 0, 0], "upperRange": [1, 1, 1] }"#),
			),
			Err(ValidationError::UnknownColorSpace(_))
		));
	}

	#[test]
	fn unknown_names_are_rejected() {
		assert!(matches!(
			AnalysisRequest::from_raw("multi_segment", &raw(r#"{ "method": "slic" }"#)),
			Err(ValidationError::UnknownMethod(_))
		));
		assert!(matches!(
			AnalysisRequest::from_raw("gmm_quantization", &raw(r#"{ "covarianceType": "banded" }"#)),
			Err(ValidationError::UnknownCovarianceType(_))
		));
	}

	#[test]
	fn empty_image_is_a_computation_error() {
		let empty = ColorImage::filled(0, 4, ColorSpace::Rgb, [0; 3]);
		let err = analyze(&empty, &AnalysisRequest::dominant_colors(3).unwrap(), &AnalysisConfig::default()).unwrap_err();

		assert_eq!(err, AnalysisError::Computation(ComputationError::EmptyImage));
		assert!(!err.is_validation());
	}

	#[test]
	fn unusable_config_is_a_validation_error() {
		let image = ColorImage::filled(4, 4, ColorSpace::Rgb, [0; 3]);
		let config = AnalysisConfig { sample_cap: 0, ..AnalysisConfig::default() };
		let err = analyze(&image, &AnalysisRequest::dominant_colors(3).unwrap(), &config).unwrap_err();
		assert!(err.is_validation());
	}

	#[test]
	fn output_is_tagged_with_mode() {
		let image = ColorImage::filled(4, 4, ColorSpace::Rgb, [10, 20, 30]);
		let config = AnalysisConfig { seed: Some(1), ..AnalysisConfig::default() };
		let output = analyze(&image, &AnalysisRequest::dominant_colors(2).unwrap(), &config).unwrap();

		assert_eq!(output.mode(), Mode::DominantColors);

		let json = serde_json::to_value(&output).unwrap();
		assert_eq!(json["mode"], "dominant_colors");
		assert_eq!(json["dominant_colors"][0]["color_hex"], "#0a141e");
	}
}
