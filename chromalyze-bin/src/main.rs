//! Extract dominant colors, palettes, color masks, and segments from an image file.

#![deny(unsafe_code, unsafe_op_in_unsafe_fn)]
#![warn(
	clippy::pedantic,
	clippy::cargo,
	clippy::use_debug,
	clippy::dbg_macro,
	clippy::todo,
	clippy::unimplemented,
	clippy::unwrap_used,
	clippy::unwrap_in_result,
	clippy::unneeded_field_pattern,
	clippy::rest_pat_in_fully_bound_structs,
	clippy::unnecessary_self_imports,
	clippy::str_to_string,
	clippy::string_to_string,
	clippy::string_slice,
	missing_docs,
	clippy::missing_docs_in_private_items,
	rustdoc::all,
	clippy::float_cmp_const,
	clippy::lossy_float_literal
)]
#![allow(clippy::doc_markdown, clippy::module_name_repetitions, clippy::unreadable_literal)]

mod cli;

#[allow(clippy::wildcard_imports)]
use cli::*;

use chromalyze::{
	analyze, AnalysisConfig, AnalysisError, AnalysisOutput, AnalysisRequest, ColorImage, ColorSpace, ConfigError,
	PaletteEntry, Pixel,
};
use clap::Parser;
use colored::Colorize;
use image::{DynamicImage, GenericImageView};
use std::{
	fmt::{self, Display},
	path::{Path, PathBuf},
	process::ExitCode,
	time::Instant,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Record the running time of an expression and log the elapsed time
macro_rules! time {
	($name: literal, $func_call: expr) => {{
		let start = Instant::now();
		let result = $func_call;
		debug!(stage = $name, elapsed_ms = start.elapsed().as_secs_f64() * 1000.0, "stage finished");
		result
	}};
}

/// Error cases for a CLI run
#[derive(Debug)]
enum CliError {
	/// Failed to read or decode the image file
	ImageLoad(image::ImageError),
	/// Failed to encode or write an output image
	ImageSave {
		/// The file that could not be written
		path: PathBuf,
		/// The underlying error
		source: image::ImageError,
	},
	/// Failed to create the output directory
	OutDir(std::io::Error),
	/// Failed to load the configuration file
	Config(ConfigError),
	/// The request was invalid or could not be computed
	Analysis(AnalysisError),
	/// Failed to encode the result as JSON
	Json(serde_json::Error),
	/// Failed to build the thread pool
	#[cfg(feature = "threads")]
	ThreadPool(rayon::ThreadPoolBuildError),
}

impl Display for CliError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			CliError::ImageLoad(e) => write!(f, "Failed to load the image file: {e}"),
			CliError::ImageSave { path, source } => write!(f, "Failed to write {}: {source}", path.display()),
			CliError::OutDir(e) => write!(f, "Failed to create the output directory: {e}"),
			CliError::Config(e) => write!(f, "{e}"),
			CliError::Analysis(AnalysisError::Validation(e)) => write!(f, "Invalid request: {e}"),
			CliError::Analysis(AnalysisError::Computation(e)) => write!(f, "Analysis failed: {e}"),
			CliError::Json(e) => write!(f, "Failed to encode the result: {e}"),
			#[cfg(feature = "threads")]
			CliError::ThreadPool(e) => write!(f, "Failed to start worker threads: {e}"),
		}
	}
}

impl From<AnalysisError> for CliError {
	fn from(e: AnalysisError) -> Self {
		Self::Analysis(e)
	}
}

fn main() -> ExitCode {
	let options = Options::parse();
	init_logging(options.verbose);

	let result = run_analysis(&options);

	// Returning Result<_> uses Debug printing instead of Display
	if let Err(e) = result {
		eprintln!("{e}");
		ExitCode::FAILURE
	} else {
		ExitCode::SUCCESS
	}
}

/// Install a stderr subscriber, using `RUST_LOG` unless `--verbose` was given
fn init_logging(verbose: bool) {
	let filter = if verbose {
		EnvFilter::new("debug")
	} else {
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
	};

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Builds a thread pool and then runs `analyze_and_print`
#[cfg(feature = "threads")]
fn run_analysis(options: &Options) -> Result<(), CliError> {
	let pool = rayon::ThreadPoolBuilder::new()
		.num_threads(usize::from(options.threads))
		.build()
		.map_err(CliError::ThreadPool)?;

	pool.install(|| analyze_and_print(options))
}

/// Runs `analyze_and_print` on a single thread
#[cfg(not(feature = "threads"))]
fn run_analysis(options: &Options) -> Result<(), CliError> {
	analyze_and_print(options)
}

/// Load an image, analyze it, print the result, and write any produced images
fn analyze_and_print(options: &Options) -> Result<(), CliError> {
	let (mode, raw) = options.command.to_raw();
	let request = AnalysisRequest::from_raw(mode.name(), &raw).map_err(AnalysisError::from)?;
	let config = load_config(options)?;

	// Input
	let img = time!("image loading", image::open(&options.image).map_err(CliError::ImageLoad))?;
	let img = generate_thumbnail(img, options.max_pixels);
	let image = ColorImage::from(&img.into_rgb8());

	// Processing
	let output = time!("analysis", analyze(&image, &request, &config))?;

	// Output
	match options.output {
		FormatOutput::Json => println!("{}", serde_json::to_string_pretty(&output).map_err(CliError::Json)?),
		FormatOutput::Swatch => print_swatches(&output),
	}

	if let Some(dir) = &options.out_dir {
		let written = write_images(&output, &image, options.channels, dir)?;
		info!(files = written.len(), dir = %dir.display(), "wrote output images");
	}

	Ok(())
}

/// Read the configuration file if given, then apply `--seed`
fn load_config(options: &Options) -> Result<AnalysisConfig, CliError> {
	let mut config = match &options.config {
		Some(path) => AnalysisConfig::from_json_file(path).map_err(CliError::Config)?,
		None => AnalysisConfig::default(),
	};

	if options.seed.is_some() {
		config.seed = options.seed;
	}

	Ok(config)
}

/// Downscale `image` to at most `max_pixels` pixels, keeping its aspect ratio
fn generate_thumbnail(image: DynamicImage, max_pixels: u32) -> DynamicImage {
	let (width, height) = image.dimensions();
	let pixels = u64::from(width) * u64::from(height);
	if pixels <= u64::from(max_pixels) {
		debug!(pixels, max_pixels, "image is small enough, skipping thumbnail");
		return image;
	}

	// exact below 2^53 pixels
	#[allow(clippy::cast_precision_loss)]
	let scale = (f64::from(max_pixels) / pixels as f64).sqrt();

	// scale is in [0, 1)
	#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
	let (thumb_width, thumb_height) = (
		((f64::from(width) * scale) as u32).max(1),
		((f64::from(height) * scale) as u32).max(1),
	);

	debug!(thumb_width, thumb_height, "creating thumbnail");

	time!("thumbnail", image.thumbnail(thumb_width, thumb_height))
}

/// A true color block for a color
fn swatch([r, g, b]: Pixel) -> String {
	"   ".on_truecolor(r, g, b).to_string()
}

/// Format one palette entry as a swatch, hex code, and percentage
fn palette_line(entry: &PaletteEntry) -> String {
	format!("{} {} {:>6.2}%", swatch(entry.rgb), entry.hex, entry.prevalence)
}

/// Print a human readable summary of an analysis result
fn print_swatches(output: &AnalysisOutput) {
	match output {
		AnalysisOutput::DominantColors { palette } => {
			for entry in palette {
				println!("{}", palette_line(entry));
			}
		},
		AnalysisOutput::ColorQuantization(quantized) | AnalysisOutput::GmmQuantization { quantized, .. } => {
			for entry in &quantized.palette {
				println!("{}", palette_line(entry));
			}
		},
		AnalysisOutput::ColorNamePalette { palette } => {
			for named in palette {
				println!("{} {} ({:.2})", palette_line(&named.entry), named.nearest_name, named.name_distance);
			}
		},
		AnalysisOutput::ColorDetection(detection) => {
			println!(
				"{} {} ±{}: {} pixels in {} regions",
				swatch(detection.target),
				detection.target_hex,
				detection.tolerance,
				detection.mask.count(),
				detection.bounding_boxes.len(),
			);
			for b in &detection.bounding_boxes {
				println!("  {}x{} at ({}, {}), {} pixels", b.width, b.height, b.x, b.y, b.area);
			}
		},
		AnalysisOutput::ColorMask(mask) => {
			let [l0, l1, l2] = mask.range.lower();
			let [u0, u1, u2] = mask.range.upper();
			println!(
				"{} [{l0}, {l1}, {l2}]..=[{u0}, {u1}, {u2}]: {} of {} pixels ({:.2}%)",
				mask.space, mask.masked_pixels, mask.total_pixels, mask.coverage_percentage,
			);
		},
		AnalysisOutput::MultiSegment { method, segments } => {
			println!("{method}: {} segments", segments.len());
			for segment in segments {
				let center = segment.center.map_or_else(|| "   ".to_owned(), swatch);
				println!(
					"{center} #{:<3} {:>8} pixels {:>6.2}%",
					segment.id, segment.pixel_count, segment.coverage_percentage,
				);
			}
		},
	}
}

/// Save an image to `dir/name`, returning the path written
fn save(dir: &Path, name: &str, image: &DynamicImage) -> Result<PathBuf, CliError> {
	let path = dir.join(name);
	image.save(&path).map_err(|source| CliError::ImageSave { path: path.clone(), source })?;
	debug!(path = %path.display(), "wrote image");
	Ok(path)
}

/// Write the images an analysis produced, and optionally the HSV planes of the input, to `dir`
fn write_images(
	output: &AnalysisOutput,
	image: &ColorImage,
	channels: bool,
	dir: &Path,
) -> Result<Vec<PathBuf>, CliError> {
	std::fs::create_dir_all(dir).map_err(CliError::OutDir)?;

	let mut written = Vec::new();
	match output {
		AnalysisOutput::ColorDetection(detection) => {
			written.push(save(dir, "mask.png", &detection.mask.as_image().clone().into())?);
		},
		AnalysisOutput::ColorMask(mask) => {
			written.push(save(dir, "mask.png", &mask.mask.as_image().clone().into())?);
		},
		AnalysisOutput::ColorQuantization(quantized) | AnalysisOutput::GmmQuantization { quantized, .. } => {
			written.push(save(dir, "quantized.png", &quantized.image.to_rgb_image().into())?);
		},
		AnalysisOutput::MultiSegment { segments, .. } => {
			for segment in segments {
				let name = format!("segment_{}.png", segment.id);
				written.push(save(dir, &name, &segment.mask.as_image().clone().into())?);
			}
		},
		AnalysisOutput::DominantColors { .. } | AnalysisOutput::ColorNamePalette { .. } => {},
	}

	if channels {
		let planes = image.convert(ColorSpace::Hsv).split_channels();
		for (plane, name) in planes.into_iter().zip(["hsv_h.png", "hsv_s.png", "hsv_v.png"]) {
			written.push(save(dir, name, &plane.into())?);
		}
	}

	Ok(written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;
	use image::RgbImage;

	/// A 40x30 image with a red square on a dark background
	fn test_image() -> RgbImage {
		RgbImage::from_fn(40, 30, |x, y| {
			if (10..22).contains(&x) && (5..17).contains(&y) {
				image::Rgb([220, 30, 30])
			} else {
				image::Rgb([20, 20, 20])
			}
		})
	}

	fn parse(args: &[&str]) -> Options {
		Options::try_parse_from(std::iter::once("chromalyze").chain(args.iter().copied())).unwrap()
	}

	#[test]
	fn thumbnail_has_at_most_max_pixels() {
		let img = DynamicImage::ImageRgb8(RgbImage::new(200, 100));

		let same = generate_thumbnail(img.clone(), 20_000);
		assert_eq!(same.dimensions(), (200, 100));

		for max_pixels in [19_999, 5000, 1234, 50] {
			let thumb = generate_thumbnail(img.clone(), max_pixels);
			let (width, height) = thumb.dimensions();
			assert!(width * height <= max_pixels, "{width}x{height} > {max_pixels}");
		}
	}

	#[test]
	fn thumbnail_keeps_aspect_ratio() {
		for (width, height) in [(300, 100), (90, 360)] {
			let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
			let at_limit = generate_thumbnail(img.clone(), width * height);
			assert_eq!(at_limit.dimensions(), (width, height));

			for max_pixels in [width * height / 4, 2000, 300] {
				let (w, h) = generate_thumbnail(img.clone(), max_pixels).dimensions();
				assert!(w * h <= max_pixels && w > 0 && h > 0, "{w}x{h} for {max_pixels}");
				// integer truncation can shift the short side by a pixel
				let (long, short) = if width > height { (w, h) } else { (h, w) };
				let ratio = width.max(height) / width.min(height);
				assert!(long.abs_diff(short * ratio) <= ratio, "{w}x{h} from {width}x{height}");
			}
		}
	}

	#[test]
	fn subcommands_map_to_modes() {
		let options = parse(&["in.png", "detect", "#ff0000", "-e", "12"]);
		let (mode, raw) = options.command.to_raw();
		assert_eq!(mode, chromalyze::Mode::ColorDetection);
		assert_eq!(raw.target_color.as_deref(), Some("#ff0000"));
		assert_eq!(raw.tolerance, Some(12));

		let options = parse(&["in.png", "mask", "-s", "RGB", "-l", "0,0,0", "-u", "10,20,30"]);
		let (mode, raw) = options.command.to_raw();
		assert_eq!(mode, chromalyze::Mode::ColorMask);
		assert_eq!(raw.lower_range, Some(vec![0, 0, 0]));
		assert_eq!(raw.upper_range, Some(vec![10, 20, 30]));

		let options = parse(&["in.png", "gmm"]);
		let (mode, raw) = options.command.to_raw();
		assert_eq!(mode, chromalyze::Mode::GmmQuantization);
		assert_eq!(raw.n_components, Some(8));
		assert_eq!(raw.covariance_type.as_deref(), Some("tied"));
	}

	#[test]
	fn channels_require_an_output_directory() {
		let args = ["chromalyze", "in.png", "--channels", "quantize"];
		assert!(Options::try_parse_from(args).is_err());
	}

	#[test]
	fn seed_overrides_config_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.json");
		std::fs::write(&path, r#"{ "seed": 1, "kmeans": { "attempts": 2 } }"#).unwrap();
		let path = path.to_str().unwrap();

		let config = load_config(&parse(&["in.png", "--config", path, "quantize"])).unwrap();
		assert_eq!((config.seed, config.kmeans.attempts), (Some(1), 2));

		let config = load_config(&parse(&["in.png", "--config", path, "--seed", "9", "quantize"])).unwrap();
		assert_eq!((config.seed, config.kmeans.attempts), (Some(9), 2));

		std::fs::write(dir.path().join("bad.json"), r#"{ "sample_cap": 0 }"#).unwrap();
		let bad = dir.path().join("bad.json");
		let options = parse(&["in.png", "--config", bad.to_str().unwrap(), "quantize"]);
		assert!(matches!(load_config(&options), Err(CliError::Config(_))));
	}

	#[test]
	fn writes_produced_images() {
		let dir = tempfile::tempdir().unwrap();
		let image = ColorImage::from(&test_image());
		let config = AnalysisConfig { seed: Some(0), ..AnalysisConfig::default() };

		let request = AnalysisRequest::color_mask(ColorSpace::Rgb, [200, 0, 0], [255, 50, 50]).unwrap();
		let output = analyze(&image, &request, &config).unwrap();
		let written = write_images(&output, &image, true, dir.path()).unwrap();
		let names = written.iter().map(|p| p.file_name().unwrap().to_str().unwrap()).collect::<Vec<_>>();
		assert_eq!(names, ["mask.png", "hsv_h.png", "hsv_s.png", "hsv_v.png"]);

		let mask = image::open(dir.path().join("mask.png")).unwrap().into_luma8();
		assert_eq!(mask.dimensions(), (40, 30));
		assert_eq!(mask.pixels().filter(|p| p[0] == 255).count(), 144);

		let request = AnalysisRequest::multi_segment(3, chromalyze::SegmentationMethod::KMeans).unwrap();
		let output = analyze(&image, &request, &config).unwrap();
		let written = write_images(&output, &image, false, &dir.path().join("segments")).unwrap();
		assert_eq!(written.len(), 3);
		assert!(written.iter().all(|p| p.exists()));
	}

	#[test]
	fn runs_end_to_end() {
		let dir = tempfile::tempdir().unwrap();
		let input = dir.path().join("input.png");
		test_image().save(&input).unwrap();
		let out = dir.path().join("out");

		let options = parse(&[
			input.to_str().unwrap(),
			"--seed",
			"3",
			"--output",
			"swatch",
			"--out-dir",
			out.to_str().unwrap(),
			"quantize",
			"-k",
			"2",
		]);
		analyze_and_print(&options).unwrap();

		let quantized = image::open(out.join("quantized.png")).unwrap().into_rgb8();
		assert_eq!(quantized, test_image());
	}

	#[test]
	fn invalid_requests_are_reported() {
		let options = parse(&["missing.png", "dominant-colors", "-k", "50"]);
		let err = analyze_and_print(&options).unwrap_err();
		assert!(matches!(err, CliError::Analysis(AnalysisError::Validation(_))));
		assert!(err.to_string().starts_with("Invalid request: numColors"));

		let options = parse(&["missing.png", "quantize"]);
		assert!(matches!(analyze_and_print(&options), Err(CliError::ImageLoad(_))));
	}
}
