//! Hard clustering of pixel colors with restarted k-means.
//!
//! Identical pixels are merged before clustering, so the cost of each iteration depends on the number
//! of distinct colors rather than the number of pixels. Assignment uses the sorted center distances
//! of "sort k-means" to skip centers that cannot be closer than the current one.

use crate::{
	color::{map_items, rgb_to_hex, to_channel, ColorImage, ColorSpace, Pixel},
	config::KmeansConfig,
	error::ComputationError,
	sample::seeded_rng,
};
use rand::Rng;
use serde::Serialize;
use std::{cmp::Reverse, collections::HashMap};
use tracing::debug;

/// A color in floating point sRGB, each channel in `0.0..=255.0`
type Point = [f32; 3];

/// A weighted vector sum of colors
type Sum = [f64; 3];

/// Squared euclidean distance between two colors
fn squared_distance(x: Point, y: Point) -> f32 {
	let dr = x[0] - y[0];
	let dg = x[1] - y[1];
	let db = x[2] - y[2];
	dr * dr + dg * dg + db * db
}

/// Round a floating point color back to a pixel
fn to_pixel(point: Point) -> Pixel {
	point.map(to_channel)
}

/// Deduplicated pixel colors along with the mapping from each pixel back to its color
#[derive(Debug, Clone)]
pub(crate) struct ColorCounts {
	/// Distinct colors
	colors: Vec<Point>,
	/// The number of pixels for each distinct color
	counts: Vec<u32>,
	/// Index into `colors` for each pixel
	indices: Vec<u32>,
}

impl ColorCounts {
	/// Merge duplicate pixels, failing if there are too many pixels to count with a `u32`
	pub(crate) fn try_from_pixels(pixels: &[Pixel]) -> Result<Self, ComputationError> {
		let max = u64::from(u32::MAX);
		let len = pixels.len() as u64;
		if len > max {
			return Err(ComputationError::ImageTooLarge { pixels: len, max });
		}

		let mut data = Self { colors: Vec::new(), counts: Vec::new(), indices: Vec::with_capacity(pixels.len()) };

		// Packed pixel -> data index
		let mut memo: HashMap<u32, u32> = HashMap::new();

		for &[r, g, b] in pixels {
			let key = u32::from_be_bytes([0, r, g, b]);
			let index = *memo.entry(key).or_insert_with(|| {
				// there are only 2^24 possible pixels
				#[allow(clippy::cast_possible_truncation)]
				let index = data.colors.len() as u32;

				data.colors.push([f32::from(r), f32::from(g), f32::from(b)]);
				data.counts.push(0);
				index
			});

			data.counts[index as usize] += 1;
			data.indices.push(index);
		}

		Ok(data)
	}

	/// Number of distinct colors
	pub(crate) fn num_colors(&self) -> u32 {
		// there are only 2^24 possible pixels
		#[allow(clippy::cast_possible_truncation)]
		{
			self.colors.len() as u32
		}
	}

	/// The distinct colors
	pub(crate) fn colors(&self) -> &[Point] {
		&self.colors
	}

	/// Index of the distinct color of each pixel
	pub(crate) fn indices(&self) -> &[u32] {
		&self.indices
	}

	/// Iterate over each distinct color and its pixel count
	pub(crate) fn pairs(&self) -> impl Iterator<Item = (Point, u32)> + '_ {
		self.colors.iter().copied().zip(self.counts.iter().copied())
	}
}

/// Bookkeeping for each distinct color
struct PointData {
	/// Center assignment for this color
	assignment: Vec<u8>,
	/// Weight of each color used to randomly select starting centroids in k-means++
	weight: Vec<f32>,
}

impl PointData {
	/// Create a [`PointData`] with the given number of colors
	fn new(n: u32) -> Self {
		let n = n as usize;
		Self { assignment: vec![0; n], weight: vec![f32::INFINITY; n] }
	}

	/// Reset data for the next attempt
	fn reset(&mut self) {
		self.assignment.fill(0);
		self.weight.fill(f32::INFINITY);
	}
}

/// Data for each center/centroid
struct CenterData {
	/// The centroid point
	centroid: Vec<Point>,
	/// Vector sum for all colors in this center
	sum: Vec<Sum>,
	/// Number of pixels in this center
	count: Vec<u32>,
}

impl CenterData {
	/// Create a [`CenterData`] with the given number of centers
	fn new(k: u8) -> Self {
		let k = usize::from(k);
		Self { centroid: Vec::new(), sum: vec![[0.0; 3]; k], count: vec![0; k] }
	}

	/// Reset data for the next attempt
	fn reset(&mut self) {
		self.centroid.clear();
		self.sum.fill([0.0; 3]);
		self.count.fill(0);
	}
}

/// Holds all the state used by k-means
struct KmeansState {
	/// Data for each center
	centers: CenterData,
	/// One fourth of the squared distance between each pair of centers
	distances: Vec<(u8, f32)>,
	/// Data for each distinct color
	points: PointData,
}

impl KmeansState {
	/// Initialize a new [`KmeansState`] with `k` centers and `n` distinct colors
	fn new(k: u8, n: u32) -> Self {
		Self {
			centers: CenterData::new(k),
			distances: vec![(0, 0.0); usize::from(k) * usize::from(k)],
			points: PointData::new(n),
		}
	}
}

/// Outcome of a single k-means attempt
struct Attempt {
	/// Final centroids
	centroids: Vec<Point>,
	/// Pixels per centroid
	counts: Vec<u32>,
	/// Center of each distinct color
	assignment: Vec<u8>,
	/// Sum of squared distances from each pixel to its center
	inertia: f64,
	/// Number of refinement iterations run
	iterations: u32,
}

/// Result of hard clustering
#[derive(Debug, Clone)]
pub struct Clustering {
	/// Center color of each cluster, always `k` of them, in cluster index order
	pub centers: Vec<[f32; 3]>,
	/// Number of pixels in each cluster
	pub counts: Vec<u32>,
	/// Cluster index of each pixel in row-major order
	pub labels: Vec<u8>,
	/// Sum of squared distances from each pixel to its center
	///
	/// A lower inertia indicates a tighter fit.
	pub inertia: f64,
	/// Number of iterations taken by the winning attempt
	pub iterations: u32,
}

impl Clustering {
	/// Center colors rounded to pixels, in cluster index order
	#[must_use]
	pub fn center_pixels(&self) -> Vec<Pixel> {
		self.centers.iter().copied().map(to_pixel).collect()
	}

	/// One palette entry per cluster in cluster index order, with occurrence percentages
	#[must_use]
	pub fn palette(&self) -> Vec<PaletteEntry> {
		let total = f64::from(self.counts.iter().sum::<u32>());
		self.center_pixels()
			.into_iter()
			.zip(&self.counts)
			.map(|(rgb, &n)| {
				let percentage = if total == 0.0 { 0.0 } else { f64::from(n) / total * 100.0 };
				PaletteEntry::new(rgb, percentage)
			})
			.collect()
	}
}

/// A palette color together with how much of the image it represents
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaletteEntry {
	/// sRGB color
	#[serde(rename = "color_rgb")]
	pub rgb: Pixel,
	/// The color as `#rrggbb`
	#[serde(rename = "color_hex")]
	pub hex: String,
	/// Percentage of pixels for k-means palettes, or mixture weight in percent for GMM palettes.
	///
	/// The prevalences of a palette sum to 100.
	pub prevalence: f64,
}

impl PaletteEntry {
	/// Create an entry, deriving the hex string from the color
	#[must_use]
	pub fn new(rgb: Pixel, prevalence: f64) -> Self {
		Self { rgb, hex: rgb_to_hex(rgb), prevalence }
	}
}

/// A reduced-palette image and the palette used to render it
#[derive(Debug, Clone, Serialize)]
pub struct Quantized {
	/// sRGB image where each pixel was replaced by its palette color
	#[serde(skip)]
	pub image: ColorImage,
	/// The palette, in model component order
	pub palette: Vec<PaletteEntry>,
}

/// Choose the starting centroids using the k-means++ algorithm
///
/// If there are fewer distinct colors than `k`, the remaining centroids duplicate the first one.
/// Assignment never moves a color to an equally distant center, so such duplicates stay empty.
fn kmeans_plus_plus(k: u8, rng: &mut impl Rng, colors: &[Point], centroids: &mut Vec<Point>, weights: &mut [f32]) {
	use rand::{
		distributions::{WeightedError::*, WeightedIndex},
		prelude::Distribution,
	};

	// Pick any random first centroid
	let first = colors[rng.gen_range(0..colors.len())];
	centroids.push(first);

	// Pick each next centroid with a weighted probability based off the squared distance to its closest centroid
	for i in 1..usize::from(k) {
		let centroid = centroids[i - 1];
		for (weight, &color) in weights.iter_mut().zip(colors) {
			*weight = f32::min(*weight, squared_distance(color, centroid));
		}

		match WeightedIndex::new(&*weights) {
			Ok(sampler) => centroids.push(colors[sampler.sample(rng)]),
			Err(AllWeightsZero) => break, // all colors exactly match a centroid
			Err(InvalidWeight | NoItem | TooMany) => {
				unreachable!("distances are >= 0 and colors.len() is in 1..=2.pow(24)")
			},
		}
	}

	centroids.resize(usize::from(k), first);
}

/// Initializes the center sums and counts based off the initial assignment
fn compute_initial_sums(data: &ColorCounts, centers: &mut CenterData, assignment: &[u8]) {
	for ((color, n), &center) in data.pairs().zip(assignment) {
		let i = usize::from(center);
		let nf = f64::from(n);
		for (sum, &c) in centers.sum[i].iter_mut().zip(&color) {
			*sum += nf * f64::from(c);
		}
		centers.count[i] += n;
	}
}

/// For each pair of centers, update their distances and sort each center's row by increasing distance
// i and j are < centroids.len() <= u8::MAX
#[allow(clippy::cast_possible_truncation)]
fn update_distances(centroids: &[Point], distances: &mut [(u8, f32)]) {
	let k = centroids.len();
	for i in 0..k {
		let ci = centroids[i];
		distances[i * k + i] = (i as u8, 0.0);
		for j in (i + 1)..k {
			let cj = centroids[j];
			let dist = squared_distance(ci, cj) / 4.0;
			distances[j * k + i] = (i as u8, dist);
			distances[i * k + j] = (j as u8, dist);
		}
	}

	for row in distances.chunks_exact_mut(k) {
		row.sort_by(|(_, x), (_, y)| f32::total_cmp(x, y));
	}
}

/// For each distinct color, update its assigned center
fn update_assignments(data: &ColorCounts, centers: &mut CenterData, distances: &[(u8, f32)], points: &mut PointData) {
	let k = centers.centroid.len();
	for ((color, n), center) in data.pairs().zip(&mut points.assignment) {
		let ci = usize::from(*center);
		let dist = squared_distance(color, centers.centroid[ci]);

		// Find the closest center
		let mut min_dist = dist;
		let mut min_center = *center;
		for &(other_center, quarter_dist) in &distances[(ci * k + 1)..((ci + 1) * k)] {
			if dist < quarter_dist {
				break;
			}

			let other_dist = squared_distance(color, centers.centroid[usize::from(other_center)]);
			if other_dist < min_dist {
				min_dist = other_dist;
				min_center = other_center;
			}
		}

		// Move this color to its new center
		if min_center != *center {
			let nf = f64::from(n);
			let cj = usize::from(min_center);

			for c in 0..3 {
				let weighted = nf * f64::from(color[c]);
				centers.sum[ci][c] -= weighted;
				centers.sum[cj][c] += weighted;
			}
			centers.count[ci] -= n;
			centers.count[cj] += n;

			*center = min_center;
		}
	}
}

/// For each center, update its centroid using the vector sums and return the total movement
///
/// Empty centers keep their previous centroid.
fn update_centroids(centers: &mut CenterData) -> f32 {
	let mut total_delta = 0.0;
	for ((centroid, &n), sum) in centers.centroid.iter_mut().zip(&centers.count).zip(&centers.sum) {
		if n == 0 {
			continue;
		}

		let n = f64::from(n);
		// Sums may need greater precision, but the average can fall back down to a reduced precision
		#[allow(clippy::cast_possible_truncation)]
		let new_centroid = sum.map(|s| (s / n) as f32);

		total_delta += squared_distance(*centroid, new_centroid).sqrt();
		*centroid = new_centroid;
	}

	total_delta
}

/// Run one attempt of k-means from a k-means++ initialization
fn kmeans(data: &ColorCounts, state: &mut KmeansState, k: u8, config: &KmeansConfig, seed: u64) -> Attempt {
	let KmeansState { centers, distances, points } = state;

	let mut rng = seeded_rng(seed);
	kmeans_plus_plus(k, &mut rng, &data.colors, &mut centers.centroid, &mut points.weight);
	compute_initial_sums(data, centers, &points.assignment);

	let mut iterations = 0;
	let mut total_delta = f32::INFINITY;
	while iterations < config.max_iter && total_delta > config.epsilon {
		update_distances(&centers.centroid, distances);
		update_assignments(data, centers, distances, points);
		total_delta = update_centroids(centers);
		iterations += 1;
	}

	// Labels and counts must agree with the centroids that are reported
	update_distances(&centers.centroid, distances);
	update_assignments(data, centers, distances, points);

	let inertia = data
		.pairs()
		.zip(&points.assignment)
		.map(|((color, n), &center)| {
			f64::from(n) * f64::from(squared_distance(color, centers.centroid[usize::from(center)]))
		})
		.sum();

	let attempt = Attempt {
		centroids: centers.centroid.clone(),
		counts: centers.count.clone(),
		assignment: points.assignment.clone(),
		inertia,
		iterations,
	};

	centers.reset();
	points.reset();

	attempt
}

/// Run multiple attempts of k-means, keeping the earliest attempt with the lowest inertia
fn run_attempts(data: &ColorCounts, k: u8, config: &KmeansConfig, seed: u64) -> Attempt {
	let mut state = KmeansState::new(k, data.num_colors());

	let mut best = kmeans(data, &mut state, k, config, seed);
	for i in 1..config.attempts {
		let attempt = kmeans(data, &mut state, k, config, seed ^ u64::from(i));
		if attempt.inertia < best.inertia {
			best = attempt;
		}
	}

	best
}

/// Partition pixel colors into `k` clusters.
///
/// The result always has exactly `k` centers, even if the pixels have fewer distinct colors;
/// surplus clusters then have a count of zero.
///
/// # Errors
/// Returns an error if `k` is zero, `pixels` is empty, or there are more than `u32::MAX` pixels.
pub fn fit_kmeans(pixels: &[Pixel], k: u8, config: &KmeansConfig, seed: u64) -> Result<Clustering, ComputationError> {
	if k == 0 {
		return Err(ComputationError::NoClusters);
	}
	if pixels.is_empty() {
		return Err(ComputationError::EmptyImage);
	}

	let data = ColorCounts::try_from_pixels(pixels)?;
	let best = run_attempts(&data, k, config, seed);

	debug!(
		k,
		distinct_colors = data.num_colors(),
		inertia = best.inertia,
		iterations = best.iterations,
		"k-means finished"
	);

	let labels = map_items(data.indices(), |&i| best.assignment[i as usize]);

	Ok(Clustering {
		centers: best.centroids,
		counts: best.counts,
		labels,
		inertia: best.inertia,
		iterations: best.iterations,
	})
}

/// Find the `k` dominant colors of an image, sorted by descending occurrence percentage.
///
/// Ties are ordered by ascending cluster index.
///
/// # Errors
/// See [`fit_kmeans`].
pub fn dominant_colors(
	image: &ColorImage,
	k: u8,
	config: &KmeansConfig,
	seed: u64,
) -> Result<Vec<PaletteEntry>, ComputationError> {
	let rgb = image.in_space(ColorSpace::Rgb);
	let clustering = fit_kmeans(rgb.pixels(), k, config, seed)?;

	let mut pairs = clustering.palette().into_iter().zip(clustering.counts).collect::<Vec<_>>();
	pairs.sort_by_key(|&(_, n)| Reverse(n));

	Ok(pairs.into_iter().map(|(entry, _)| entry).collect())
}

/// Reduce an image to `k` colors by replacing every pixel with its cluster center.
///
/// The palette is in cluster index order.
///
/// # Errors
/// See [`fit_kmeans`].
pub fn quantize(image: &ColorImage, k: u8, config: &KmeansConfig, seed: u64) -> Result<Quantized, ComputationError> {
	let rgb = image.in_space(ColorSpace::Rgb);
	let clustering = fit_kmeans(rgb.pixels(), k, config, seed)?;

	let centers = clustering.center_pixels();
	let pixels = map_items(&clustering.labels, |&label| centers[usize::from(label)]);
	let image = ColorImage::from_pixels(rgb.width(), rgb.height(), ColorSpace::Rgb, pixels)?;

	Ok(Quantized { image, palette: clustering.palette() })
}
