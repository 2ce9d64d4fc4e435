//! Splitting an image into regions, either by color clusters or by flooding from confident seeds.
//!
//! Clustering segmentation always partitions the image into exactly `n` segments.
//! Watershed segmentation finds as many segments as there are confident foreground seeds,
//! and leaves background and boundary pixels out of every segment.

use crate::{
	color::{rgb_to_hex, ColorImage, ColorSpace, Mask, Pixel},
	config::{KmeansConfig, WatershedConfig},
	error::{ComputationError, ValidationError},
	kmeans::fit_kmeans,
	matcher::round_percentage,
};
use image::{imageops::grayscale, GrayImage, Luma};
use imageproc::{
	contrast::otsu_level,
	distance_transform::{euclidean_squared_distance_transform, Norm},
	morphology::{dilate, open},
	region_labelling::{connected_components, Connectivity},
};
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, fmt, str::FromStr};
use tracing::{debug, warn};

/// How to segment an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentationMethod {
	/// One segment per k-means color cluster
	#[default]
	KMeans,
	/// One segment per confident foreground seed, grown by marker-based watershed
	Watershed,
}

impl SegmentationMethod {
	/// The lower case name of the method
	#[must_use]
	pub const fn name(self) -> &'static str {
		match self {
			Self::KMeans => "kmeans",
			Self::Watershed => "watershed",
		}
	}
}

impl fmt::Display for SegmentationMethod {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

impl FromStr for SegmentationMethod {
	type Err = ValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"kmeans" => Ok(Self::KMeans),
			"watershed" => Ok(Self::Watershed),
			_ => Err(ValidationError::UnknownMethod(s.to_owned())),
		}
	}
}

/// One region of a segmented image
#[derive(Debug, Clone, Serialize)]
pub struct Segment {
	/// Position of the segment in its list, starting from 1
	#[serde(rename = "segment_id")]
	pub id: u32,
	/// Pixels belonging to the segment
	#[serde(skip)]
	pub mask: Mask,
	/// Number of pixels in the segment
	pub pixel_count: usize,
	/// Percentage of the image covered by the segment, rounded to two decimals
	pub coverage_percentage: f64,
	/// Cluster center for clustering segmentation
	#[serde(rename = "center_color_rgb", skip_serializing_if = "Option::is_none")]
	pub center: Option<Pixel>,
	/// Cluster center as `#rrggbb`
	#[serde(rename = "center_color_hex", skip_serializing_if = "Option::is_none")]
	pub center_hex: Option<String>,
}

impl Segment {
	/// Create a segment, deriving its statistics from the mask
	fn new(id: u32, mask: Mask, center: Option<Pixel>) -> Self {
		Self {
			id,
			pixel_count: mask.count(),
			coverage_percentage: round_percentage(mask.coverage()),
			center,
			center_hex: center.map(rgb_to_hex),
			mask,
		}
	}
}

/// Split an image into exactly `n` segments, one per k-means cluster of its sRGB colors.
///
/// Every pixel belongs to exactly one segment. Segments are in cluster index order.
///
/// # Errors
/// See [`fit_kmeans`].
pub fn kmeans_segment(
	image: &ColorImage,
	n: u8,
	config: &KmeansConfig,
	seed: u64,
) -> Result<Vec<Segment>, ComputationError> {
	let rgb = image.in_space(ColorSpace::Rgb);
	let clustering = fit_kmeans(rgb.pixels(), n, config, seed)?;

	let segments = (0..n)
		.zip(clustering.center_pixels())
		.map(|(label, center)| {
			let mask = Mask::from_fn(rgb.width(), rgb.height(), |i| clustering.labels[i] == label);
			Segment::new(u32::from(label) + 1, mask, Some(center))
		})
		.collect();

	Ok(segments)
}

/// The state of a pixel during flooding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
	/// Not yet reached by any region
	Unknown,
	/// Waiting in the flood queue
	Queued,
	/// Owned by a region; 0 is the background
	Region(u32),
	/// Between two regions, or on the image frame
	Boundary,
}

/// Largest per-channel difference between two pixels
fn channel_difference(a: Pixel, b: Pixel) -> usize {
	usize::from(a[0].abs_diff(b[0]).max(a[1].abs_diff(b[1])).max(a[2].abs_diff(b[2])))
}

/// Grow the labeled regions in `markers` into the unknown pixels, lowest color difference first.
///
/// A pixel reached by two different regions becomes a boundary.
/// The one pixel frame of the image is always boundary.
fn flood(pixels: &[Pixel], width: usize, height: usize, markers: &mut [Marker]) {
	if width == 0 || height == 0 {
		return;
	}

	for x in 0..width {
		markers[x] = Marker::Boundary;
		markers[(height - 1) * width + x] = Marker::Boundary;
	}
	for y in 0..height {
		markers[y * width] = Marker::Boundary;
		markers[y * width + width - 1] = Marker::Boundary;
	}

	// only ever called on interior pixels
	let neighbors = |i: usize| [i - 1, i + 1, i - width, i + width];

	let mut queues = vec![VecDeque::new(); usize::from(u8::MAX) + 1];
	let mut active = queues.len();

	for y in 1..(height - 1) {
		for x in 1..(width - 1) {
			let i = y * width + x;
			if markers[i] != Marker::Unknown {
				continue;
			}

			let priority = neighbors(i)
				.into_iter()
				.filter(|&j| matches!(markers[j], Marker::Region(_)))
				.map(|j| channel_difference(pixels[i], pixels[j]))
				.min();

			if let Some(priority) = priority {
				queues[priority].push_back(i);
				markers[i] = Marker::Queued;
				active = active.min(priority);
			}
		}
	}

	while let Some(priority) = (active..queues.len()).find(|&p| !queues[p].is_empty()) {
		active = priority;
		let Some(i) = queues[priority].pop_front() else {
			break;
		};

		let mut label = None;
		let mut boundary = false;
		for j in neighbors(i) {
			if let Marker::Region(l) = markers[j] {
				match label {
					None => label = Some(l),
					Some(prev) if prev != l => boundary = true,
					Some(_) => {},
				}
			}
		}

		let Some(label) = label.filter(|_| !boundary) else {
			markers[i] = Marker::Boundary;
			continue;
		};
		markers[i] = Marker::Region(label);

		for j in neighbors(i) {
			if markers[j] == Marker::Unknown {
				let priority = channel_difference(pixels[i], pixels[j]);
				queues[priority].push_back(j);
				markers[j] = Marker::Queued;
				active = active.min(priority);
			}
		}
	}
}

/// Pixels of `opening` far enough from the background to be confident foreground
fn confident_foreground(opening: &GrayImage, fraction: f64) -> GrayImage {
	let inverted = GrayImage::from_fn(opening.width(), opening.height(), |x, y| {
		Luma([if opening.get_pixel(x, y)[0] == 0 { Mask::ON } else { 0 }])
	});

	if inverted.pixels().all(|p| p[0] == 0) {
		// everything is foreground, so every pixel is equally far from the background
		return opening.clone();
	}

	let distances = euclidean_squared_distance_transform(&inverted);
	let max = distances.pixels().map(|p| p[0]).fold(0.0, f64::max);
	let threshold = fraction * fraction * max;

	GrayImage::from_fn(opening.width(), opening.height(), |x, y| {
		Luma([if distances.get_pixel(x, y)[0] > threshold { Mask::ON } else { 0 }])
	})
}

/// Split an image into regions grown from confident foreground seeds.
///
/// Dark pixels (at or below the Otsu level of the grayscale image) are foreground.
/// After removing speckles, the pixels furthest from the background become seeds,
/// and each 8-connected group of seeds is flooded outward until regions meet.
/// Returns one segment per seed group that kept at least one pixel, numbered from 1,
/// which may be none at all. Background and boundary pixels belong to no segment.
///
/// # Errors
/// Returns [`ComputationError::EmptyImage`] if the image has no pixels.
pub fn watershed_segment(image: &ColorImage, config: &WatershedConfig) -> Result<Vec<Segment>, ComputationError> {
	if image.is_empty() {
		return Err(ComputationError::EmptyImage);
	}

	let rgb = image.in_space(ColorSpace::Rgb);
	let (width, height) = (rgb.width(), rgb.height());

	let gray = grayscale(&rgb.to_rgb_image());
	let level = otsu_level(&gray);
	let binary = GrayImage::from_fn(width, height, |x, y| {
		Luma([if gray.get_pixel(x, y)[0] <= level { Mask::ON } else { 0 }])
	});

	let opening = open(&binary, Norm::LInf, config.open_radius);
	let background = dilate(&opening, Norm::LInf, config.dilate_radius);
	let seeds = confident_foreground(&opening, config.foreground_fraction);

	let labels = connected_components(&seeds, Connectivity::Eight, Luma([0u8]));
	let num_seeds = labels.pixels().map(|p| p[0]).max().unwrap_or(0);

	debug!(level, num_seeds, "extracted watershed markers");

	if num_seeds == 0 {
		warn!("watershed found no foreground seeds");
		return Ok(Vec::new());
	}

	let mut markers = labels
		.as_raw()
		.iter()
		.zip(background.as_raw())
		.map(|(&label, &bg)| {
			if label > 0 {
				Marker::Region(label)
			} else if bg == Mask::ON {
				Marker::Unknown
			} else {
				Marker::Region(0)
			}
		})
		.collect::<Vec<_>>();

	flood(rgb.pixels(), width as usize, height as usize, &mut markers);

	let segments = (1..=num_seeds)
		.map(|label| Mask::from_fn(width, height, |i| markers[i] == Marker::Region(label)))
		.filter(|mask| mask.count() > 0)
		.zip(1..)
		.map(|(mask, id)| Segment::new(id, mask, None))
		.collect::<Vec<_>>();

	debug!(segments = segments.len(), "watershed finished");

	Ok(segments)
}
