//! Specifies the CLI and handles arg parsing

use chromalyze::{Mode, RawParameters};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Supported output formats for the analysis result
#[derive(Copy, Clone, ValueEnum)]
pub enum FormatOutput {
	/// The full result as pretty printed JSON
	Json,
	/// A human readable summary with true color swatches
	Swatch,
}

/// Extract colors, masks, and segments from an image.
///
/// The result is printed to stdout; logs go to stderr.
#[derive(Parser)]
#[command(version)]
pub struct Options {
	/// The path to the input image
	pub image: PathBuf,

	/// The analysis to run
	#[command(subcommand)]
	pub command: Command,

	/// The format to print the result in
	#[arg(short, long, default_value = "json", global = true)]
	pub output: FormatOutput,

	/// A JSON file with engine tunables, see `AnalysisConfig`
	#[arg(long, global = true)]
	pub config: Option<PathBuf>,

	/// The seed value used for the random number generator, overriding the config file
	///
	/// Without a seed, k-means results may differ between runs.
	#[arg(long, global = true)]
	pub seed: Option<u64>,

	/// A directory to write the produced images to (masks, quantized image, segments)
	#[arg(short = 'd', long, global = true)]
	pub out_dir: Option<PathBuf>,

	/// Also write the hue, saturation, and value planes of the input to the output directory
	#[arg(long, global = true, requires = "out_dir")]
	pub channels: bool,

	/// The maximum image size, in number of pixels, before a thumbnail is created
	///
	/// This trades accuracy for speed on very large images,
	/// as multiple pixels in the original image are interpolated to form a pixel in the thumbnail.
	#[arg(short = 'p', long, default_value_t = u32::MAX, global = true)]
	pub max_pixels: u32,

	/// The number of threads to use for per-pixel work
	///
	/// A value of 0 indicates to automatically choose the number of threads.
	#[cfg(feature = "threads")]
	#[arg(short, long, default_value_t = 0, global = true)]
	pub threads: u8,

	/// Log debug information, such as stage timings and iteration counts, to stderr
	#[arg(long, global = true)]
	pub verbose: bool,
}

/// One subcommand per analysis mode
#[derive(Subcommand)]
pub enum Command {
	/// Find the most common colors and their percentages
	DominantColors {
		/// The number of colors to find, 2 to 20
		#[arg(short = 'k', long, default_value_t = 5)]
		num_colors: i64,
	},

	/// Find and box the regions close to a target color
	Detect {
		/// The target color as #rrggbb
		target: String,

		/// The per-channel tolerance around the target, 1 to 100
		#[arg(short = 'e', long, default_value_t = 30)]
		tolerance: i64,
	},

	/// Reduce the image to a k-means palette
	Quantize {
		/// The number of colors, 2 to 32
		#[arg(short = 'k', long, default_value_t = 8)]
		levels: i64,
	},

	/// Mask the pixels inside a per-channel range
	Mask {
		/// The color space the range is given in: HSV, RGB, or LAB
		#[arg(short, long, default_value = "HSV")]
		space: String,

		/// A comma separated lower bound, one value per channel
		#[arg(short, long, value_delimiter = ',', allow_negative_numbers = true, required = true)]
		lower: Vec<i64>,

		/// A comma separated upper bound, one value per channel
		#[arg(short, long, value_delimiter = ',', allow_negative_numbers = true, required = true)]
		upper: Vec<i64>,
	},

	/// Split the image into regions
	Segment {
		/// The number of segments for k-means segmentation, 2 to 15
		#[arg(short = 'n', long, default_value_t = 5)]
		num_segments: i64,

		/// The segmentation method: kmeans or watershed
		#[arg(short, long, default_value = "kmeans")]
		method: String,
	},

	/// Reduce the image to the means of a Gaussian mixture
	Gmm {
		/// The number of mixture components, 1 to 32
		#[arg(short = 'n', long, default_value_t = 8)]
		components: i64,

		/// The covariance type: full, tied, diag, or spherical
		#[arg(short, long, default_value = "tied")]
		covariance: String,
	},

	/// Name the colors of a quantization palette
	Names {
		/// The number of palette colors, 2 to 32
		#[arg(short = 'k', long, default_value_t = 8)]
		size: i64,
	},
}

impl Command {
	/// The analysis mode and loosely typed parameters this subcommand stands for
	pub fn to_raw(&self) -> (Mode, RawParameters) {
		let mut raw = RawParameters::default();

		let mode = match self {
			Self::DominantColors { num_colors } => {
				raw.num_colors = Some(*num_colors);
				Mode::DominantColors
			},
			Self::Detect { target, tolerance } => {
				raw.target_color = Some(target.clone());
				raw.tolerance = Some(*tolerance);
				Mode::ColorDetection
			},
			Self::Quantize { levels } => {
				raw.quantization_levels = Some(*levels);
				Mode::ColorQuantization
			},
			Self::Mask { space, lower, upper } => {
				raw.color_space = Some(space.clone());
				raw.lower_range = Some(lower.clone());
				raw.upper_range = Some(upper.clone());
				Mode::ColorMask
			},
			Self::Segment { num_segments, method } => {
				raw.num_segments = Some(*num_segments);
				raw.method = Some(method.clone());
				Mode::MultiSegment
			},
			Self::Gmm { components, covariance } => {
				raw.n_components = Some(*components);
				raw.covariance_type = Some(covariance.clone());
				Mode::GmmQuantization
			},
			Self::Names { size } => {
				raw.palette_size = Some(*size);
				Mode::ColorNamePalette
			},
		};

		(mode, raw)
	}
}
