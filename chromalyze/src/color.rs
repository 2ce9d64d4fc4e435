//! Pixel buffers and conversions between the RGB, HSV, and Lab color spaces.
//!
//! All three spaces are stored as 8-bit triples:
//! - RGB is standard sRGB.
//! - HSV packs hue into `0..=179` (half degrees) and saturation/value into `0..=255`.
//! - Lab packs L* into `0..=255` (scaled from `0..=100`) and offsets a*, b* by 128.

use crate::error::{ComputationError, ValidationError};
use image::{GrayImage, Luma, Rgb, RgbImage};
use palette::{FromColor, Hsv, Lab, Srgb};
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt, str::FromStr};

/// An 8-bit, three channel pixel in some [`ColorSpace`]
pub type Pixel = [u8; 3];

/// The largest packed hue value
pub const HUE_MAX: u8 = 179;

/// The color space a [`ColorImage`] or [`ColorRange`](crate::ColorRange) is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColorSpace {
	/// sRGB
	Rgb,
	/// Hue, saturation, value with packed hue
	Hsv,
	/// CIELAB (D65) packed into 8 bits per channel
	Lab,
}

impl ColorSpace {
	/// The largest valid value for each channel
	#[must_use]
	pub const fn channel_max(self) -> Pixel {
		match self {
			Self::Hsv => [HUE_MAX, u8::MAX, u8::MAX],
			Self::Rgb | Self::Lab => [u8::MAX; 3],
		}
	}

	/// The canonical upper case name of the space
	#[must_use]
	pub const fn name(self) -> &'static str {
		match self {
			Self::Rgb => "RGB",
			Self::Hsv => "HSV",
			Self::Lab => "LAB",
		}
	}
}

impl fmt::Display for ColorSpace {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

impl FromStr for ColorSpace {
	type Err = ValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_uppercase().as_str() {
			"RGB" => Ok(Self::Rgb),
			"HSV" => Ok(Self::Hsv),
			"LAB" => Ok(Self::Lab),
			_ => Err(ValidationError::UnknownColorSpace(s.to_owned())),
		}
	}
}

/// Round and clamp a float channel into `0..=255`
pub(crate) fn to_channel(value: f32) -> u8 {
	// clamped into range first
	#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
	{
		value.round().clamp(0.0, 255.0) as u8
	}
}

/// Convert an sRGB pixel to packed HSV
#[must_use]
pub fn rgb_to_hsv([r, g, b]: Pixel) -> Pixel {
	let hsv: Hsv = Hsv::from_color(Srgb::new(r, g, b).into_format::<f32>());

	// into_positive_degrees is in [0, 360), but rounding the half can still land on 180
	let hue = (hsv.hue.into_positive_degrees() / 2.0).round();
	let hue = if hue >= 180.0 { 0 } else { to_channel(hue) };

	[hue, to_channel(hsv.saturation * 255.0), to_channel(hsv.value * 255.0)]
}

/// Convert a packed HSV pixel to sRGB
#[must_use]
pub fn hsv_to_rgb([h, s, v]: Pixel) -> Pixel {
	let hsv: Hsv = Hsv::new(f32::from(h) * 2.0, f32::from(s) / 255.0, f32::from(v) / 255.0);
	let rgb = Srgb::from_color(hsv).into_format::<u8>();
	[rgb.red, rgb.green, rgb.blue]
}

/// Convert an sRGB pixel to unpacked CIELAB (D65)
#[must_use]
pub fn srgb_to_lab([r, g, b]: Pixel) -> Lab {
	Lab::from_color(Srgb::new(r, g, b).into_format::<f32>())
}

/// Convert an sRGB pixel to packed Lab
#[must_use]
pub fn rgb_to_lab(rgb: Pixel) -> Pixel {
	let lab = srgb_to_lab(rgb);
	[to_channel(lab.l * 255.0 / 100.0), to_channel(lab.a + 128.0), to_channel(lab.b + 128.0)]
}

/// Convert a packed Lab pixel to sRGB
#[must_use]
pub fn lab_to_rgb([l, a, b]: Pixel) -> Pixel {
	let lab = Lab::new(f32::from(l) * 100.0 / 255.0, f32::from(a) - 128.0, f32::from(b) - 128.0);
	let rgb = Srgb::from_color(lab).into_format::<u8>();
	[rgb.red, rgb.green, rgb.blue]
}

/// Convert a single pixel between two spaces, going through sRGB when neither side is sRGB
#[must_use]
pub fn convert_pixel(pixel: Pixel, from: ColorSpace, to: ColorSpace) -> Pixel {
	if from == to {
		return pixel;
	}

	let rgb = match from {
		ColorSpace::Rgb => pixel,
		ColorSpace::Hsv => hsv_to_rgb(pixel),
		ColorSpace::Lab => lab_to_rgb(pixel),
	};

	match to {
		ColorSpace::Rgb => rgb,
		ColorSpace::Hsv => rgb_to_hsv(rgb),
		ColorSpace::Lab => rgb_to_lab(rgb),
	}
}

/// Format an sRGB pixel as a lower case `#rrggbb` string
#[must_use]
pub fn rgb_to_hex([r, g, b]: Pixel) -> String {
	format!("#{r:02x}{g:02x}{b:02x}")
}

/// Parse a `#rrggbb` string (either case) into an sRGB pixel
///
/// # Errors
/// Returns [`ValidationError::InvalidHex`] unless the string is exactly `#` followed by six hex digits.
pub fn hex_to_rgb(hex: &str) -> Result<Pixel, ValidationError> {
	let invalid = || ValidationError::InvalidHex { value: hex.to_owned() };

	let digits = hex.strip_prefix('#').filter(|d| d.len() == 6).ok_or_else(invalid)?;
	if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
		return Err(invalid());
	}

	let channel = |i: usize| {
		digits
			.get(i..i + 2)
			.and_then(|pair| u8::from_str_radix(pair, 16).ok())
			.ok_or_else(invalid)
	};

	Ok([channel(0)?, channel(2)?, channel(4)?])
}

/// Apply `f` to every item, in parallel when the `threads` feature is enabled
#[cfg(feature = "threads")]
pub(crate) fn map_items<T: Sync, U: Send>(items: &[T], f: impl Fn(&T) -> U + Sync + Send) -> Vec<U> {
	use rayon::prelude::*;
	items.par_iter().map(f).collect()
}

/// Apply `f` to every item, in parallel when the `threads` feature is enabled
#[cfg(not(feature = "threads"))]
pub(crate) fn map_items<T, U>(items: &[T], f: impl Fn(&T) -> U) -> Vec<U> {
	items.iter().map(f).collect()
}

/// An immutable grid of pixels that always knows which color space it is in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorImage {
	/// Number of columns
	width: u32,
	/// Number of rows
	height: u32,
	/// Color space of `pixels`
	space: ColorSpace,
	/// Pixels in row-major order
	pixels: Vec<Pixel>,
}

impl ColorImage {
	/// Create an image from row-major pixels in the given space
	///
	/// # Errors
	/// Returns [`ComputationError::DimensionMismatch`] if `pixels` does not hold `width * height` pixels.
	pub fn from_pixels(
		width: u32,
		height: u32,
		space: ColorSpace,
		pixels: Vec<Pixel>,
	) -> Result<Self, ComputationError> {
		let expected = u64::from(width) * u64::from(height);
		let actual = pixels.len() as u64;
		if expected == actual {
			Ok(Self { width, height, space, pixels })
		} else {
			Err(ComputationError::DimensionMismatch { expected, actual })
		}
	}

	/// Create an image where every pixel has the same value
	#[must_use]
	pub fn filled(width: u32, height: u32, space: ColorSpace, pixel: Pixel) -> Self {
		let len = width as usize * height as usize;
		Self { width, height, space, pixels: vec![pixel; len] }
	}

	/// Create an sRGB image from an [`RgbImage`]
	#[must_use]
	pub fn from_rgb_image(image: &RgbImage) -> Self {
		Self {
			width: image.width(),
			height: image.height(),
			space: ColorSpace::Rgb,
			pixels: image.pixels().map(|p| p.0).collect(),
		}
	}

	/// Number of columns
	#[must_use]
	pub const fn width(&self) -> u32 {
		self.width
	}

	/// Number of rows
	#[must_use]
	pub const fn height(&self) -> u32 {
		self.height
	}

	/// The color space of the pixels
	#[must_use]
	pub const fn space(&self) -> ColorSpace {
		self.space
	}

	/// Pixels in row-major order
	#[must_use]
	pub fn pixels(&self) -> &[Pixel] {
		&self.pixels
	}

	/// Number of pixels
	#[must_use]
	pub fn len(&self) -> usize {
		self.pixels.len()
	}

	/// Whether the image has no pixels
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.pixels.is_empty()
	}

	/// Get the pixel at the given column and row
	#[must_use]
	pub fn get(&self, x: u32, y: u32) -> Option<Pixel> {
		if x < self.width && y < self.height {
			Some(self.pixels[y as usize * self.width as usize + x as usize])
		} else {
			None
		}
	}

	/// Create a new image holding the same colors in another space
	#[must_use]
	pub fn convert(&self, space: ColorSpace) -> Self {
		let from = self.space;
		let pixels = if from == space {
			self.pixels.clone()
		} else {
			map_items(&self.pixels, |&pixel| convert_pixel(pixel, from, space))
		};

		Self { width: self.width, height: self.height, space, pixels }
	}

	/// Borrow this image if it is already in `space`, otherwise convert it
	#[must_use]
	pub fn in_space(&self, space: ColorSpace) -> Cow<'_, Self> {
		if self.space == space {
			Cow::Borrowed(self)
		} else {
			Cow::Owned(self.convert(space))
		}
	}

	/// Render the image as an sRGB [`RgbImage`]
	#[must_use]
	pub fn to_rgb_image(&self) -> RgbImage {
		let rgb = self.in_space(ColorSpace::Rgb);
		let width = rgb.width as usize;
		RgbImage::from_fn(self.width, self.height, |x, y| Rgb(rgb.pixels[y as usize * width + x as usize]))
	}

	/// Split the image into one grayscale plane per channel
	#[must_use]
	pub fn split_channels(&self) -> [GrayImage; 3] {
		let width = self.width as usize;
		let plane = |c: usize| {
			GrayImage::from_fn(self.width, self.height, |x, y| {
				Luma([self.pixels[y as usize * width + x as usize][c]])
			})
		};
		[plane(0), plane(1), plane(2)]
	}
}

impl From<&RgbImage> for ColorImage {
	fn from(image: &RgbImage) -> Self {
		Self::from_rgb_image(image)
	}
}

/// A single channel grid aligned with a source image where each cell is 255 (match) or 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask(GrayImage);

impl Mask {
	/// The value of a matching cell
	pub const ON: u8 = u8::MAX;

	/// Build a mask by testing each row-major pixel index
	#[must_use]
	pub fn from_fn(width: u32, height: u32, mut matches: impl FnMut(usize) -> bool) -> Self {
		let w = width as usize;
		Self(GrayImage::from_fn(width, height, |x, y| {
			Luma([if matches(y as usize * w + x as usize) { Self::ON } else { 0 }])
		}))
	}

	/// Wrap a grayscale image, treating any non-zero cell as a match
	#[must_use]
	pub fn from_gray(image: &GrayImage) -> Self {
		Self(GrayImage::from_fn(image.width(), image.height(), |x, y| {
			Luma([if image.get_pixel(x, y)[0] == 0 { 0 } else { Self::ON }])
		}))
	}

	/// Number of columns
	#[must_use]
	pub fn width(&self) -> u32 {
		self.0.width()
	}

	/// Number of rows
	#[must_use]
	pub fn height(&self) -> u32 {
		self.0.height()
	}

	/// Whether the cell at the given column and row is a match
	#[must_use]
	pub fn is_set(&self, x: u32, y: u32) -> bool {
		x < self.width() && y < self.height() && self.0.get_pixel(x, y)[0] == Self::ON
	}

	/// Number of matching cells
	#[must_use]
	pub fn count(&self) -> usize {
		self.0.as_raw().iter().filter(|&&v| v == Self::ON).count()
	}

	/// Number of cells
	#[must_use]
	pub fn total(&self) -> usize {
		self.0.as_raw().len()
	}

	/// Percentage of matching cells, or `0.0` for an empty mask
	#[must_use]
	pub fn coverage(&self) -> f64 {
		let total = self.total();
		if total == 0 {
			0.0
		} else {
			// precision loss only matters for images with more than 2^52 pixels
			#[allow(clippy::cast_precision_loss)]
			{
				self.count() as f64 / total as f64 * 100.0
			}
		}
	}

	/// Borrow the underlying grayscale image
	#[must_use]
	pub const fn as_image(&self) -> &GrayImage {
		&self.0
	}

	/// Take the underlying grayscale image
	#[must_use]
	pub fn into_image(self) -> GrayImage {
		self.0
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	fn test_colors() -> Vec<Pixel> {
		let range = (0..=u8::MAX).step_by(15);
		let mut colors = Vec::new();

		for r in range.clone() {
			for g in range.clone() {
				for b in range.clone() {
					colors.push([r, g, b]);
				}
			}
		}

		colors
	}

	fn assert_close(x: Pixel, y: Pixel, eps: u8) {
		for (a, b) in x.into_iter().zip(y) {
			assert!(a.abs_diff(b) <= eps, "{x:?} vs {y:?}");
		}
	}

	#[test]
	fn hsv_uses_half_degree_hue() {
		assert_eq!(rgb_to_hsv([255, 0, 0]), [0, 255, 255]);
		assert_eq!(rgb_to_hsv([0, 255, 0]), [60, 255, 255]);
		assert_eq!(rgb_to_hsv([0, 0, 255]), [120, 255, 255]);
		assert_eq!(rgb_to_hsv([255, 255, 255]), [0, 0, 255]);
		assert_eq!(rgb_to_hsv([0, 0, 0]), [0, 0, 0]);
	}

	#[test]
	fn hsv_stays_in_domain() {
		for color in test_colors() {
			assert!(rgb_to_hsv(color)[0] <= HUE_MAX);
		}
	}

	#[test]
	fn hsv_round_trip() {
		for color in test_colors() {
			// two degree hue steps lose a little precision on saturated colors
			assert_close(hsv_to_rgb(rgb_to_hsv(color)), color, 5);
		}
	}

	#[test]
	fn lab_packing() {
		assert_close(rgb_to_lab([255, 255, 255]), [255, 128, 128], 1);
		assert_eq!(rgb_to_lab([0, 0, 0]), [0, 128, 128]);
	}

	#[test]
	fn lab_round_trip() {
		for color in test_colors() {
			let back = lab_to_rgb(rgb_to_lab(color));
			// near the gamut edge one step of 8-bit Lab packing can move a dark sRGB channel by up to 18,
			// but the color stays about one unit away in Lab
			let (x, y) = (srgb_to_lab(color), srgb_to_lab(back));
			let distance = ((x.l - y.l).powi(2) + (x.a - y.a).powi(2) + (x.b - y.b).powi(2)).sqrt();
			assert!(distance < 2.0, "{color:?} -> {back:?} is {distance} apart");
		}
	}

	#[test]
	fn lab_round_trip_keeps_grays() {
		for v in 0..=u8::MAX {
			assert_close(lab_to_rgb(rgb_to_lab([v; 3])), [v; 3], 1);
		}
	}

	#[test]
	fn hex_round_trip() {
		assert_eq!(rgb_to_hex([255, 0, 16]), "#ff0010");
		assert_eq!(hex_to_rgb("#FF0010").unwrap(), [255, 0, 16]);
		assert_eq!(hex_to_rgb(&rgb_to_hex([1, 2, 3])).unwrap(), [1, 2, 3]);
	}

	#[test]
	fn hex_rejects_malformed() {
		for bad in ["ff0000", "#ff000", "#ff00000", "#gg0000", "#+f0000", "", "#ÿÿÿ"] {
			assert!(hex_to_rgb(bad).is_err(), "{bad}");
		}
	}

	#[test]
	fn color_space_names() {
		assert_eq!("hsv".parse::<ColorSpace>().unwrap(), ColorSpace::Hsv);
		assert_eq!("RGB".parse::<ColorSpace>().unwrap(), ColorSpace::Rgb);
		assert!("xyz".parse::<ColorSpace>().is_err());
	}

	#[test]
	fn from_pixels_checks_dimensions() {
		assert!(ColorImage::from_pixels(2, 2, ColorSpace::Rgb, vec![[0; 3]; 4]).is_ok());
		assert_eq!(
			ColorImage::from_pixels(2, 2, ColorSpace::Rgb, vec![[0; 3]; 3]),
			Err(ComputationError::DimensionMismatch { expected: 4, actual: 3 })
		);
	}

	#[test]
	fn convert_tracks_space_and_keeps_source() {
		let image = ColorImage::filled(3, 2, ColorSpace::Rgb, [0, 255, 0]);
		let hsv = image.convert(ColorSpace::Hsv);

		assert_eq!(hsv.space(), ColorSpace::Hsv);
		assert_eq!(hsv.get(2, 1), Some([60, 255, 255]));
		assert_eq!(image.get(2, 1), Some([0, 255, 0]));
		assert_eq!(hsv.to_rgb_image().get_pixel(0, 0).0, [0, 255, 0]);
	}

	#[test]
	fn split_channels_extracts_planes() {
		let image = ColorImage::filled(2, 2, ColorSpace::Rgb, [10, 20, 30]);
		let [r, g, b] = image.split_channels();
		assert_eq!(r.get_pixel(1, 1)[0], 10);
		assert_eq!(g.get_pixel(1, 1)[0], 20);
		assert_eq!(b.get_pixel(1, 1)[0], 30);
	}

	#[test]
	fn mask_coverage() {
		let mask = Mask::from_fn(4, 5, |i| i % 4 == 0);
		assert_eq!(mask.count(), 5);
		assert_eq!(mask.total(), 20);
		assert!((mask.coverage() - 25.0).abs() < 1e-9);
		assert!(mask.is_set(0, 3));
		assert!(!mask.is_set(1, 3));
		assert!(!mask.is_set(9, 9));
	}
}
