//! Extract structured color information from images.
//!
//! Given an image as a [`ColorImage`], `chromalyze` can find its dominant colors,
//! detect regions near a target color, reduce it to a small palette with k-means or a
//! Gaussian mixture, mask pixels inside a color range, split it into segments,
//! and name palette colors.
//!
//! Image decoding is left to the caller; a [`ColorImage`] is just a grid of 8-bit pixels
//! tagged with the color space they are in.
//!
//! # Examples
//!
//! ## Get the 5 dominant colors of an image.
//!
//! ```no_run
//! let pixels = image::open("some image").unwrap().into_rgb8();
//! let image = chromalyze::ColorImage::from(&pixels);
//!
//! let request = chromalyze::AnalysisRequest::dominant_colors(5)?;
//! let output = chromalyze::analyze(&image, &request, &chromalyze::AnalysisConfig::default())?;
//! # Ok::<(), chromalyze::AnalysisError>(())
//! ```
//!
//! ## Build a request from loosely typed parameters.
//!
//! ```
//! use chromalyze::{analyze, AnalysisConfig, AnalysisOutput, AnalysisRequest, ColorImage, ColorSpace, RawParameters};
//!
//! let image = ColorImage::filled(8, 8, ColorSpace::Rgb, [200, 30, 30]);
//! let raw: RawParameters = serde_json::from_str(r##"{ "targetColor": "#c81e1e", "tolerance": 5 }"##).unwrap();
//! let request = AnalysisRequest::from_raw("color_detection", &raw)?;
//!
//! let config = AnalysisConfig { seed: Some(0), ..AnalysisConfig::default() };
//! let AnalysisOutput::ColorDetection(detection) = analyze(&image, &request, &config)? else {
//!     unreachable!()
//! };
//! assert_eq!(detection.mask.count(), 64);
//! # Ok::<(), chromalyze::AnalysisError>(())
//! ```
//!
//! ## Use the building blocks directly.
//!
//! ```
//! use chromalyze::{dominant_colors, nearest_name, ColorImage, ColorSpace, KmeansConfig};
//!
//! let image = ColorImage::filled(4, 4, ColorSpace::Rgb, [0, 0, 128]);
//! let palette = dominant_colors(&image, 2, &KmeansConfig::default(), 42)?;
//! assert_eq!(nearest_name(palette[0].rgb).name, "navy");
//! # Ok::<(), chromalyze::ComputationError>(())
//! ```
//!
//! # Randomness
//!
//! k-means initialization, Gaussian mixture initialization, and pixel sampling are randomized.
//! Set [`AnalysisConfig::seed`] for reproducible results; otherwise each call draws a fresh seed,
//! except for Gaussian mixtures which fall back to [`GmmConfig::default_seed`].

#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::cargo)]
#![warn(clippy::use_debug, clippy::dbg_macro, clippy::todo, clippy::unimplemented)]
#![warn(clippy::unwrap_used, clippy::unwrap_in_result)]
#![warn(clippy::unneeded_field_pattern, clippy::rest_pat_in_fully_bound_structs)]
#![warn(clippy::unnecessary_self_imports)]
#![warn(clippy::str_to_string, clippy::string_to_string, clippy::string_slice)]
#![warn(missing_docs, clippy::missing_docs_in_private_items, rustdoc::all)]
#![warn(clippy::float_cmp_const, clippy::lossy_float_literal)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::enum_glob_use)]
#![allow(clippy::unreadable_literal)]

mod analysis;
mod color;
mod config;
mod error;
mod gmm;
mod kmeans;
mod matcher;
mod names;
mod sample;
mod segment;

pub use analysis::{analyze, AnalysisOutput, AnalysisRequest, Mode, RawParameters};
pub use color::{
	convert_pixel, hex_to_rgb, hsv_to_rgb, lab_to_rgb, rgb_to_hex, rgb_to_hsv, rgb_to_lab, srgb_to_lab, ColorImage,
	ColorSpace, Mask, Pixel, HUE_MAX,
};
pub use config::{AnalysisConfig, DetectionConfig, GmmConfig, KmeansConfig, WatershedConfig};
pub use error::{AnalysisError, ComputationError, ConfigError, ValidationError};
pub use gmm::{fit_gmm, gmm_quantize, CovarianceType, GaussianMixture};
pub use kmeans::{dominant_colors, fit_kmeans, quantize, Clustering, PaletteEntry, Quantized};
pub use matcher::{detect_by_color, hsv_range_around, range_mask, BoundingBox, ColorRange, Detection, RangeMask};
pub use names::{assign_names, nearest_name, ColorName, NamedPaletteEntry, NAMED_COLORS};
pub use sample::{resolve_seed, sample, seeded_rng, AnalysisRng};
pub use segment::{kmeans_segment, watershed_segment, Segment, SegmentationMethod};
