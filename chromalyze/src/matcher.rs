//! Masks of pixels near a target color or inside a per-channel range

use crate::{
	color::{rgb_to_hex, rgb_to_hsv, ColorImage, ColorSpace, Mask, Pixel, HUE_MAX},
	config::DetectionConfig,
	error::ValidationError,
};
use image::Luma;
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::Serialize;
use tracing::debug;

/// Smallest saturation and value used by [`ColorRange::hsv_around`]
const MIN_SATURATION_VALUE: u8 = 50;

/// Inclusive per-channel bounds in some color space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColorRange {
	/// Lower bound for each channel
	lower: Pixel,
	/// Upper bound for each channel
	upper: Pixel,
}

impl ColorRange {
	/// Create a range, checking that every bound is valid for `space` and that no lower bound is above its upper bound
	///
	/// # Errors
	/// Returns [`ValidationError::OutOfRange`] for a bound outside the space's domain
	/// (e.g. a hue above 179) or [`ValidationError::InvertedRange`].
	pub fn new(space: ColorSpace, lower: Pixel, upper: Pixel) -> Result<Self, ValidationError> {
		let max = space.channel_max();
		for (name, bounds) in [("lowerRange", lower), ("upperRange", upper)] {
			for (c, (&value, &max)) in bounds.iter().zip(&max).enumerate() {
				if value > max {
					return Err(ValidationError::OutOfRange {
						field: format!("{name}[{c}]"),
						value: i64::from(value),
						min: 0,
						max: i64::from(max),
					});
				}
			}
		}

		for (channel, (&lower, &upper)) in lower.iter().zip(&upper).enumerate() {
			if lower > upper {
				return Err(ValidationError::InvertedRange { channel, lower, upper });
			}
		}

		Ok(Self { lower, upper })
	}

	/// Create a range from loosely typed bounds such as parsed JSON lists
	///
	/// # Errors
	/// Returns [`ValidationError::WrongLength`] unless both lists have three values,
	/// and otherwise the same errors as [`ColorRange::new`].
	pub fn from_slices(space: ColorSpace, lower: &[i64], upper: &[i64]) -> Result<Self, ValidationError> {
		let max = space.channel_max();
		let channels = |field: &'static str, values: &[i64]| -> Result<Pixel, ValidationError> {
			if values.len() != 3 {
				return Err(ValidationError::WrongLength { field, expected: 3, actual: values.len() });
			}

			let mut pixel = [0; 3];
			for (c, (out, &value)) in pixel.iter_mut().zip(values).enumerate() {
				*out = u8::try_from(value)
					.ok()
					.filter(|&v| v <= max[c])
					.ok_or_else(|| ValidationError::OutOfRange {
						field: format!("{field}[{c}]"),
						value,
						min: 0,
						max: i64::from(max[c]),
					})?;
			}
			Ok(pixel)
		};

		Self::new(space, channels("lowerRange", lower)?, channels("upperRange", upper)?)
	}

	/// A symmetric range of `tolerance` around a color, clamped to `0..=255` in every channel
	#[must_use]
	pub const fn around([r, g, b]: Pixel, tolerance: u8) -> Self {
		Self {
			lower: [r.saturating_sub(tolerance), g.saturating_sub(tolerance), b.saturating_sub(tolerance)],
			upper: [r.saturating_add(tolerance), g.saturating_add(tolerance), b.saturating_add(tolerance)],
		}
	}

	/// An HSV range of `tolerance` around an sRGB color.
	///
	/// Hue is clamped to `0..=179`, and saturation and value never go below 50,
	/// so the range ignores washed out and dark pixels.
	#[must_use]
	pub fn hsv_around(rgb: Pixel, tolerance: u8) -> Self {
		let hsv = rgb_to_hsv(rgb);
		let low = [0, MIN_SATURATION_VALUE, MIN_SATURATION_VALUE];
		let high = [HUE_MAX, u8::MAX, u8::MAX];

		let mut lower = [0; 3];
		let mut upper = [0; 3];
		for c in 0..3 {
			lower[c] = hsv[c].saturating_sub(tolerance).clamp(low[c], high[c]);
			upper[c] = hsv[c].saturating_add(tolerance).clamp(low[c], high[c]);
		}

		Self { lower, upper }
	}

	/// Lower bound for each channel
	#[must_use]
	pub const fn lower(&self) -> Pixel {
		self.lower
	}

	/// Upper bound for each channel
	#[must_use]
	pub const fn upper(&self) -> Pixel {
		self.upper
	}

	/// Whether every channel of `pixel` lies within its bounds
	#[must_use]
	pub fn contains(&self, pixel: Pixel) -> bool {
		(0..3).all(|c| self.lower[c] <= pixel[c] && pixel[c] <= self.upper[c])
	}

	/// Mark every pixel of an image (assumed to already be in the range's space) that falls in the range
	fn mask(&self, image: &ColorImage) -> Mask {
		let pixels = image.pixels();
		Mask::from_fn(image.width(), image.height(), |i| self.contains(pixels[i]))
	}
}

/// Build the HSV range of `tolerance` around an sRGB color, see [`ColorRange::hsv_around`]
#[must_use]
pub fn hsv_range_around(rgb: Pixel, tolerance: u8) -> ColorRange {
	ColorRange::hsv_around(rgb, tolerance)
}

/// The bounds of a connected region in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
	/// Leftmost column
	pub x: u32,
	/// Topmost row
	pub y: u32,
	/// Number of columns spanned
	pub width: u32,
	/// Number of rows spanned
	pub height: u32,
	/// Number of pixels in the region
	pub area: u32,
}

/// Pixels matching a target color and the regions they form
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
	/// The target color as `#rrggbb`
	#[serde(rename = "target_color")]
	pub target_hex: String,
	/// The target sRGB color
	#[serde(rename = "target_color_rgb")]
	pub target: Pixel,
	/// Per-channel tolerance around the target
	pub tolerance: u8,
	/// Matching pixels
	#[serde(skip)]
	pub mask: Mask,
	/// One box per sufficiently large region, in discovery order
	pub bounding_boxes: Vec<BoundingBox>,
}

/// Find the pixels within `tolerance` of `target` in every sRGB channel and box their connected regions.
///
/// Regions are 8-connected; those with fewer than [`DetectionConfig::min_region_area`] pixels are dropped.
/// An image with no matching region yields an empty list of boxes, not an error.
#[must_use]
pub fn detect_by_color(image: &ColorImage, target: Pixel, tolerance: u8, config: &DetectionConfig) -> Detection {
	let rgb = image.in_space(ColorSpace::Rgb);
	let mask = ColorRange::around(target, tolerance).mask(&rgb);
	let bounding_boxes = regions(&mask, config.min_region_area);

	debug!(matched = mask.count(), regions = bounding_boxes.len(), "detected target color");

	Detection { target_hex: rgb_to_hex(target), target, tolerance, mask, bounding_boxes }
}

/// Bounding boxes of the 8-connected regions of a mask with at least `min_area` pixels
fn regions(mask: &Mask, min_area: u32) -> Vec<BoundingBox> {
	let labels = connected_components(mask.as_image(), Connectivity::Eight, Luma([0u8]));

	// labels are consecutive in discovery order, starting from 1
	let mut boxes: Vec<BoundingBox> = Vec::new();
	for (x, y, &Luma([label])) in labels.enumerate_pixels() {
		if label == 0 {
			continue;
		}

		let i = label as usize - 1;
		if i == boxes.len() {
			boxes.push(BoundingBox { x, y, width: 1, height: 1, area: 0 });
		}

		let b = &mut boxes[i];
		let right = u32::max(b.x + b.width, x + 1);
		let bottom = u32::max(b.y + b.height, y + 1);
		b.x = b.x.min(x);
		b.y = b.y.min(y);
		b.width = right - b.x;
		b.height = bottom - b.y;
		b.area += 1;
	}

	boxes.retain(|b| b.area >= min_area);
	boxes
}

/// Round a percentage to two decimals
pub(crate) fn round_percentage(value: f64) -> f64 {
	(value * 100.0).round() / 100.0
}

/// Pixels inside a per-channel range and how much of the image they cover
#[derive(Debug, Clone, Serialize)]
pub struct RangeMask {
	/// The space the range was tested in
	#[serde(rename = "color_space")]
	pub space: ColorSpace,
	/// The tested range
	#[serde(rename = "color_range")]
	pub range: ColorRange,
	/// Matching pixels
	#[serde(skip)]
	pub mask: Mask,
	/// Number of matching pixels
	pub masked_pixels: usize,
	/// Number of pixels in the image
	pub total_pixels: usize,
	/// Percentage of matching pixels rounded to two decimals
	pub coverage_percentage: f64,
}

/// Mark every pixel whose channels, in `space`, fall inclusively within `range`
#[must_use]
pub fn range_mask(image: &ColorImage, space: ColorSpace, range: &ColorRange) -> RangeMask {
	let converted = image.in_space(space);
	let mask = range.mask(&converted);

	let masked_pixels = mask.count();
	let total_pixels = mask.total();
	let coverage_percentage = round_percentage(mask.coverage());

	debug!(%space, masked_pixels, total_pixels, "built range mask");

	RangeMask { space, range: *range, mask, masked_pixels, total_pixels, coverage_percentage }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	/// A dark image with a red square and a single red speck
	fn squares() -> ColorImage {
		let mut pixels = vec![[20, 20, 20]; 40 * 30];
		for y in 5..17 {
			for x in 10..22 {
				pixels[y * 40 + x] = [220, 30, 30];
			}
		}
		pixels[25 * 40 + 35] = [220, 30, 30];
		ColorImage::from_pixels(40, 30, ColorSpace::Rgb, pixels).unwrap()
	}

	#[test]
	fn range_validation() {
		assert!(ColorRange::new(ColorSpace::Hsv, [0, 0, 0], [179, 255, 255]).is_ok());
		assert!(matches!(
			ColorRange::new(ColorSpace::Hsv, [0, 0, 0], [180, 255, 255]),
			Err(ValidationError::OutOfRange { value: 180, max: 179, .. })
		));
		assert!(ColorRange::new(ColorSpace::Rgb, [0, 0, 0], [180, 255, 255]).is_ok());
		assert_eq!(
			ColorRange::new(ColorSpace::Rgb, [0, 10, 0], [255, 5, 255]),
			Err(ValidationError::InvertedRange { channel: 1, lower: 10, upper: 5 })
		);
	}

	#[test]
	fn range_from_slices() {
		assert_eq!(
			ColorRange::from_slices(ColorSpace::Rgb, &[1, 2], &[3, 4, 5]),
			Err(ValidationError::WrongLength { field: "lowerRange", expected: 3, actual: 2 })
		);
		assert!(matches!(
			ColorRange::from_slices(ColorSpace::Rgb, &[0, 0, -1], &[3, 4, 5]),
			Err(ValidationError::OutOfRange { value: -1, .. })
		));
		assert!(matches!(
			ColorRange::from_slices(ColorSpace::Rgb, &[0, 0, 0], &[3, 4, 256]),
			Err(ValidationError::OutOfRange { value: 256, .. })
		));
		let range = ColorRange::from_slices(ColorSpace::Hsv, &[10, 50, 50], &[20, 255, 255]).unwrap();
		assert_eq!(range.lower(), [10, 50, 50]);
	}

	#[test]
	fn around_saturates() {
		let range = ColorRange::around([250, 5, 100], 10);
		assert_eq!(range.lower(), [240, 0, 90]);
		assert_eq!(range.upper(), [255, 15, 110]);
	}

	#[test]
	fn hsv_around_clamps() {
		// pure red is hue 0, saturation 255, value 255
		let range = hsv_range_around([255, 0, 0], 10);
		assert_eq!(range.lower(), [0, 245, 245]);
		assert_eq!(range.upper(), [10, 255, 255]);

		// black has no saturation or value
		let range = hsv_range_around([0, 0, 0], 10);
		assert_eq!(range.lower(), [0, 50, 50]);
		assert_eq!(range.upper(), [10, 50, 50]);
	}

	#[test]
	fn exact_target_covers_uniform_image() {
		let image = ColorImage::filled(16, 16, ColorSpace::Rgb, [12, 34, 56]);
		let detection = detect_by_color(&image, [12, 34, 56], 0, &DetectionConfig::default());

		assert!((detection.mask.coverage() - 100.0).abs() < 1e-9);
		assert_eq!(detection.bounding_boxes, vec![BoundingBox { x: 0, y: 0, width: 16, height: 16, area: 256 }]);
	}

	#[test]
	fn small_regions_are_dropped() {
		let detection = detect_by_color(&squares(), [210, 40, 40], 15, &DetectionConfig::default());

		assert_eq!(detection.mask.count(), 12 * 12 + 1);
		assert_eq!(detection.bounding_boxes, vec![BoundingBox { x: 10, y: 5, width: 12, height: 12, area: 144 }]);
		assert_eq!(detection.target_hex, "#d22828");

		let detection = detect_by_color(&squares(), [210, 40, 40], 15, &DetectionConfig { min_region_area: 1 });
		assert_eq!(detection.bounding_boxes.len(), 2);
		assert_eq!(detection.bounding_boxes[1], BoundingBox { x: 35, y: 25, width: 1, height: 1, area: 1 });
	}

	#[test]
	fn no_match_is_not_an_error() {
		let detection = detect_by_color(&squares(), [0, 255, 0], 10, &DetectionConfig::default());
		assert_eq!(detection.mask.count(), 0);
		assert!(detection.bounding_boxes.is_empty());
	}

	#[test]
	fn diagonal_pixels_form_one_region() {
		let pixels = (0..25).map(|i| if i % 6 == 0 { [255; 3] } else { [0; 3] }).collect();
		let image = ColorImage::from_pixels(5, 5, ColorSpace::Rgb, pixels).unwrap();
		let detection = detect_by_color(&image, [255; 3], 0, &DetectionConfig { min_region_area: 1 });

		assert_eq!(detection.bounding_boxes, vec![BoundingBox { x: 0, y: 0, width: 5, height: 5, area: 5 }]);
	}

	#[test]
	fn range_mask_statistics() {
		let range = ColorRange::new(ColorSpace::Rgb, [200, 0, 0], [255, 50, 50]).unwrap();
		let result = range_mask(&squares(), ColorSpace::Rgb, &range);

		assert_eq!(result.masked_pixels, 145);
		assert_eq!(result.total_pixels, 1200);
		assert!((result.coverage_percentage - 12.08).abs() < 1e-9);
	}

	#[test]
	fn range_mask_in_hsv() {
		let range = ColorRange::new(ColorSpace::Hsv, [0, 100, 100], [10, 255, 255]).unwrap();
		let result = range_mask(&squares(), ColorSpace::Hsv, &range);
		assert_eq!(result.masked_pixels, 145);
	}

	#[test]
	fn equal_bounds_match_exact_values() {
		let range = ColorRange::new(ColorSpace::Rgb, [220, 30, 30], [220, 30, 30]).unwrap();
		assert_eq!(range_mask(&squares(), ColorSpace::Rgb, &range).masked_pixels, 145);

		let range = ColorRange::new(ColorSpace::Rgb, [221, 30, 30], [221, 30, 30]).unwrap();
		assert_eq!(range_mask(&squares(), ColorSpace::Rgb, &range).masked_pixels, 0);
	}

	#[test]
	fn widening_never_lowers_coverage() {
		let image = squares();
		let mut previous = 0.0;
		for widen in [0, 10, 50, 100, 200, 255] {
			let lower = [220u8.saturating_sub(widen), 30u8.saturating_sub(widen), 30u8.saturating_sub(widen)];
			let upper = [220u8.saturating_add(widen), 30u8.saturating_add(widen), 30u8.saturating_add(widen)];
			let range = ColorRange::new(ColorSpace::Rgb, lower, upper).unwrap();
			let coverage = range_mask(&image, ColorSpace::Rgb, &range).coverage_percentage;
			assert!(coverage >= previous);
			previous = coverage;
		}
		assert!((previous - 100.0).abs() < 1e-9);
	}
}
