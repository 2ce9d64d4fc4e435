//! Soft clustering of pixel colors with a Gaussian mixture fitted by expectation-maximization.
//!
//! The mixture is initialized from a k-means partition of the sampled pixels and then refined until
//! the average log-likelihood stops improving. Rendering still uses a hard assignment: every pixel
//! takes the mean color of its most likely component.

use crate::{
	color::{map_items, to_channel, ColorImage, ColorSpace, Pixel},
	config::{AnalysisConfig, GmmConfig, KmeansConfig},
	error::{ComputationError, ValidationError},
	kmeans::{fit_kmeans, ColorCounts, PaletteEntry, Quantized},
	sample::{sample, seeded_rng},
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use tracing::{debug, warn};

/// `ln(2π)`
const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// A color with `f64` channels
type Vector = [f64; 3];

/// A symmetric or lower triangular 3x3 matrix
type Matrix = [[f64; 3]; 3];

/// The shape of the covariance matrices of a mixture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CovarianceType {
	/// Each component has its own general covariance matrix
	Full,
	/// All components share one general covariance matrix
	#[default]
	Tied,
	/// Each component has its own diagonal covariance matrix
	Diag,
	/// Each component has its own single variance
	Spherical,
}

impl CovarianceType {
	/// The lower case name of the covariance type
	#[must_use]
	pub const fn name(self) -> &'static str {
		match self {
			Self::Full => "full",
			Self::Tied => "tied",
			Self::Diag => "diag",
			Self::Spherical => "spherical",
		}
	}
}

impl fmt::Display for CovarianceType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

impl FromStr for CovarianceType {
	type Err = ValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"full" => Ok(Self::Full),
			"tied" => Ok(Self::Tied),
			"diag" => Ok(Self::Diag),
			"spherical" => Ok(Self::Spherical),
			_ => Err(ValidationError::UnknownCovarianceType(s.to_owned())),
		}
	}
}

/// Lower triangular `l` such that `l * l^T == m`, or `None` if `m` is not positive definite
fn cholesky(m: &Matrix) -> Option<Matrix> {
	let mut l = [[0.0; 3]; 3];
	for i in 0..3 {
		for j in 0..=i {
			let mut sum = m[i][j];
			for k in 0..j {
				sum -= l[i][k] * l[j][k];
			}

			if i == j {
				if !sum.is_finite() || sum <= 0.0 {
					return None;
				}
				l[i][i] = sum.sqrt();
			} else {
				l[i][j] = sum / l[j][j];
			}
		}
	}
	Some(l)
}

/// Log density of `x` under a normal distribution with the given mean and covariance Cholesky factor
fn log_density(x: Vector, mean: Vector, l: &Matrix) -> f64 {
	let d = [x[0] - mean[0], x[1] - mean[1], x[2] - mean[2]];

	// forward substitution for l * z = d
	let z0 = d[0] / l[0][0];
	let z1 = (d[1] - l[1][0] * z0) / l[1][1];
	let z2 = (d[2] - l[2][0] * z0 - l[2][1] * z1) / l[2][2];

	let half_log_det = l[0][0].ln() + l[1][1].ln() + l[2][2].ln();

	-0.5 * (3.0 * LN_2PI + z0 * z0 + z1 * z1 + z2 * z2) - half_log_det
}

/// `ln(sum(exp(values)))` without overflow
fn log_sum_exp(values: &[f64]) -> f64 {
	let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
	if max.is_infinite() {
		return max;
	}
	max + values.iter().map(|&v| (v - max).exp()).sum::<f64>().ln()
}

/// Add `value` to the diagonal of a matrix
fn add_diagonal(mut m: Matrix, value: f64) -> Matrix {
	for (i, row) in m.iter_mut().enumerate() {
		row[i] += value;
	}
	m
}

/// Factor a covariance matrix, adding extra regularization if it is not positive definite
fn factorize(covariance: &Matrix, reg_covar: f64) -> Result<Matrix, ComputationError> {
	if let Some(l) = cholesky(covariance) {
		return Ok(l);
	}

	let base = reg_covar.max(f64::EPSILON);
	for power in 1..=6 {
		let jitter = base * 10f64.powi(power);
		if let Some(l) = cholesky(&add_diagonal(*covariance, jitter)) {
			warn!(jitter, "covariance needed extra regularization");
			return Ok(l);
		}
	}

	Err(ComputationError::DegenerateModel("covariance is not positive definite even after regularization"))
}

/// Distinct sampled colors and how often each occurred
struct Samples {
	/// Distinct colors
	points: Vec<Vector>,
	/// Occurrences of each color
	counts: Vec<f64>,
}

impl Samples {
	/// Iterate over each color and its count
	fn pairs(&self) -> impl Iterator<Item = (Vector, f64)> + '_ {
		self.points.iter().copied().zip(self.counts.iter().copied())
	}
}

/// The parameters of each mixture component
#[derive(Debug, Clone)]
struct Components {
	/// Mixture weights, summing to 1
	weights: Vec<f64>,
	/// Component means
	means: Vec<Vector>,
	/// Cholesky factor of each component's covariance (repeated for tied covariances)
	factors: Vec<Matrix>,
}

impl Components {
	/// `ln(weight) + ln(density)` for one component
	fn weighted_log_prob(&self, x: Vector, j: usize) -> f64 {
		self.weights[j].ln() + log_density(x, self.means[j], &self.factors[j])
	}

	/// Index of the most likely component for `x`, lowest index on ties
	// there are at most u8::MAX components
	#[allow(clippy::cast_possible_truncation)]
	fn most_likely(&self, x: Vector) -> u8 {
		let mut best = 0;
		let mut best_prob = f64::NEG_INFINITY;
		for j in 0..self.weights.len() {
			let prob = self.weighted_log_prob(x, j);
			if prob > best_prob {
				best = j;
				best_prob = prob;
			}
		}
		best as u8
	}

	/// Fill `resp` with the responsibilities of each component for each sample and
	/// return the average log-likelihood per sample
	fn expectation(&self, samples: &Samples, resp: &mut [f64]) -> f64 {
		let k = self.weights.len();
		let mut total = 0.0;
		let mut count = 0.0;

		for ((x, n), row) in samples.pairs().zip(resp.chunks_exact_mut(k)) {
			for (j, r) in row.iter_mut().enumerate() {
				*r = self.weighted_log_prob(x, j);
			}

			let norm = log_sum_exp(row);
			for r in row.iter_mut() {
				*r = (*r - norm).exp();
			}

			total += n * norm;
			count += n;
		}

		total / count
	}

	/// Estimate the component parameters from the responsibilities
	fn maximization(
		samples: &Samples,
		resp: &[f64],
		k: usize,
		covariance_type: CovarianceType,
		reg_covar: f64,
	) -> Result<Self, ComputationError> {
		let mut nk = vec![0.0; k];
		let mut sums = vec![[0.0; 3]; k];
		for ((x, n), row) in samples.pairs().zip(resp.chunks_exact(k)) {
			for (j, &r) in row.iter().enumerate() {
				let w = n * r;
				nk[j] += w;
				for c in 0..3 {
					sums[j][c] += w * x[c];
				}
			}
		}

		// keeps empty components from dividing by zero
		for n in &mut nk {
			*n += 10.0 * f64::EPSILON;
		}

		let means = sums.iter().zip(&nk).map(|(sum, &n)| sum.map(|s| s / n)).collect::<Vec<_>>();

		let mut scatter = vec![[[0.0; 3]; 3]; k];
		for ((x, n), row) in samples.pairs().zip(resp.chunks_exact(k)) {
			for (j, &r) in row.iter().enumerate() {
				let w = n * r;
				let mean = means[j];
				let d = [x[0] - mean[0], x[1] - mean[1], x[2] - mean[2]];
				for a in 0..3 {
					for b in 0..3 {
						scatter[j][a][b] += w * d[a] * d[b];
					}
				}
			}
		}

		let total = nk.iter().sum::<f64>();
		let scaled = |m: &Matrix, n: f64| m.map(|row| row.map(|v| v / n));

		let covariances: Vec<Matrix> = match covariance_type {
			CovarianceType::Full => scatter.iter().zip(&nk).map(|(s, &n)| scaled(s, n)).collect(),
			CovarianceType::Tied => {
				let mut shared = [[0.0; 3]; 3];
				for s in &scatter {
					for a in 0..3 {
						for b in 0..3 {
							shared[a][b] += s[a][b];
						}
					}
				}
				vec![scaled(&shared, total); k]
			},
			CovarianceType::Diag => scatter
				.iter()
				.zip(&nk)
				.map(|(s, &n)| {
					let mut m = [[0.0; 3]; 3];
					for c in 0..3 {
						m[c][c] = s[c][c] / n;
					}
					m
				})
				.collect(),
			CovarianceType::Spherical => scatter
				.iter()
				.zip(&nk)
				.map(|(s, &n)| {
					let variance = (s[0][0] + s[1][1] + s[2][2]) / (3.0 * n);
					add_diagonal([[0.0; 3]; 3], variance)
				})
				.collect(),
		};

		let factors = if covariance_type == CovarianceType::Tied {
			let l = factorize(&add_diagonal(covariances[0], reg_covar), reg_covar)?;
			vec![l; k]
		} else {
			covariances
				.iter()
				.map(|cov| factorize(&add_diagonal(*cov, reg_covar), reg_covar))
				.collect::<Result<_, _>>()?
		};

		let weights = nk.iter().map(|&n| n / total).collect();

		Ok(Self { weights, means, factors })
	}
}

/// A fitted Gaussian mixture over sRGB colors
#[derive(Debug, Clone)]
pub struct GaussianMixture {
	/// Shape of the covariance matrices
	covariance_type: CovarianceType,
	/// Component parameters
	components: Components,
	/// Number of EM iterations run
	iterations: u32,
	/// Whether the lower bound settled before the iteration cap
	converged: bool,
	/// Final average log-likelihood per sample
	lower_bound: f64,
}

impl GaussianMixture {
	/// Shape of the covariance matrices
	#[must_use]
	pub const fn covariance_type(&self) -> CovarianceType {
		self.covariance_type
	}

	/// Number of components
	#[must_use]
	pub fn n_components(&self) -> usize {
		self.components.weights.len()
	}

	/// Mixture weights in component order, summing to 1
	#[must_use]
	pub fn weights(&self) -> &[f64] {
		&self.components.weights
	}

	/// Component means in component order
	#[must_use]
	pub fn means(&self) -> &[[f64; 3]] {
		&self.components.means
	}

	/// Number of EM iterations run
	#[must_use]
	pub const fn iterations(&self) -> u32 {
		self.iterations
	}

	/// Whether EM stopped because the likelihood settled
	#[must_use]
	pub const fn converged(&self) -> bool {
		self.converged
	}

	/// Average log-likelihood per sample at the end of fitting
	#[must_use]
	pub const fn lower_bound(&self) -> f64 {
		self.lower_bound
	}

	/// Component means rounded to pixels
	// rounded and clamped by to_channel
	#[must_use]
	#[allow(clippy::cast_possible_truncation)]
	pub fn mean_pixels(&self) -> Vec<Pixel> {
		self.components.means.iter().map(|mean| mean.map(|c| to_channel(c as f32))).collect()
	}

	/// One entry per component with its weight in percent, sorted by descending weight
	#[must_use]
	pub fn palette(&self) -> Vec<PaletteEntry> {
		let mut palette = self
			.mean_pixels()
			.into_iter()
			.zip(&self.components.weights)
			.map(|(rgb, &w)| PaletteEntry::new(rgb, w * 100.0))
			.collect::<Vec<_>>();

		palette.sort_by(|x, y| f64::total_cmp(&y.prevalence, &x.prevalence));
		palette
	}

	/// Assign each pixel to its most likely component
	///
	/// # Errors
	/// Returns an error if there are more than `u32::MAX` pixels.
	pub fn predict(&self, pixels: &[Pixel]) -> Result<Vec<u8>, ComputationError> {
		let data = ColorCounts::try_from_pixels(pixels)?;
		let components = &self.components;
		let labels = map_items(data.colors(), |color| components.most_likely(color.map(f64::from)));
		Ok(data.indices().iter().map(|&i| labels[i as usize]).collect())
	}
}

/// Fit a Gaussian mixture with `n_components` components to sampled sRGB pixels.
///
/// The components are initialized from a k-means partition of `sample` using `seed`.
///
/// # Errors
/// Returns an error if `n_components` is zero, `sample` is empty, or a covariance stays singular.
pub fn fit_gmm(
	sample: &[Pixel],
	n_components: u8,
	covariance_type: CovarianceType,
	config: &GmmConfig,
	kmeans: &KmeansConfig,
	seed: u64,
) -> Result<GaussianMixture, ComputationError> {
	let k = usize::from(n_components);

	let clustering = fit_kmeans(sample, n_components, kmeans, seed)?;
	let data = ColorCounts::try_from_pixels(sample)?;

	let samples = Samples {
		points: data.colors().iter().map(|c| c.map(f64::from)).collect(),
		counts: data.pairs().map(|(_, n)| f64::from(n)).collect(),
	};

	// one-hot responsibilities from the k-means labels
	let mut resp = vec![0.0; samples.points.len() * k];
	for (&i, &label) in data.indices().iter().zip(&clustering.labels) {
		resp[i as usize * k + usize::from(label)] = 1.0;
	}

	let mut components = Components::maximization(&samples, &resp, k, covariance_type, config.reg_covar)?;

	let mut lower_bound = f64::NEG_INFINITY;
	let mut iterations = 0;
	let mut converged = false;
	while iterations < config.max_iter {
		iterations += 1;
		let previous = lower_bound;

		lower_bound = components.expectation(&samples, &mut resp);
		if !lower_bound.is_finite() {
			return Err(ComputationError::DegenerateModel("log-likelihood is not finite"));
		}

		components = Components::maximization(&samples, &resp, k, covariance_type, config.reg_covar)?;

		if (lower_bound - previous).abs() < config.tolerance {
			converged = true;
			break;
		}
	}

	if converged {
		debug!(n_components, %covariance_type, iterations, lower_bound, "gaussian mixture converged");
	} else {
		warn!(n_components, %covariance_type, iterations, lower_bound, "gaussian mixture did not converge");
	}

	Ok(GaussianMixture { covariance_type, components, iterations, converged, lower_bound })
}

/// Reduce an image to the mean colors of a Gaussian mixture fitted on a bounded pixel sample.
///
/// The palette is sorted by descending mixture weight.
/// Uses [`AnalysisConfig::seed`] if set and [`GmmConfig::default_seed`] otherwise.
///
/// # Errors
/// See [`fit_gmm`].
pub fn gmm_quantize(
	image: &ColorImage,
	n_components: u8,
	covariance_type: CovarianceType,
	config: &AnalysisConfig,
) -> Result<Quantized, ComputationError> {
	let rgb = image.in_space(ColorSpace::Rgb);
	let seed = config.seed.unwrap_or(config.gmm.default_seed);

	let sampled = sample(rgb.pixels(), config.sample_cap, &mut seeded_rng(seed));
	debug!(sampled = sampled.len(), total = rgb.len(), "sampled pixels for mixture fitting");

	let model = fit_gmm(&sampled, n_components, covariance_type, &config.gmm, &config.kmeans, seed)?;

	let labels = model.predict(rgb.pixels())?;
	let means = model.mean_pixels();
	let pixels = map_items(&labels, |&label| means[usize::from(label)]);
	let image = ColorImage::from_pixels(rgb.width(), rgb.height(), ColorSpace::Rgb, pixels)?;

	Ok(Quantized { image, palette: model.palette() })
}
