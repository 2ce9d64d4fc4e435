//! Random sources and bounded pixel sampling for model fitting

use crate::color::Pixel;
use rand::{Rng, RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

/// The random number generator used by every randomized step
pub type AnalysisRng = Xoshiro256PlusPlus;

/// Create the generator for a seed
#[must_use]
pub fn seeded_rng(seed: u64) -> AnalysisRng {
	AnalysisRng::seed_from_u64(seed)
}

/// Use the given seed, or draw one from OS entropy
#[must_use]
pub fn resolve_seed(seed: Option<u64>) -> u64 {
	seed.unwrap_or_else(|| AnalysisRng::from_entropy().next_u64())
}

/// Take at most `cap` pixels uniformly at random without replacement.
///
/// If there are no more than `cap` pixels, all of them are returned in their original order.
#[must_use]
pub fn sample(pixels: &[Pixel], cap: usize, rng: &mut impl Rng) -> Vec<Pixel> {
	if pixels.len() <= cap {
		pixels.to_vec()
	} else {
		rand::seq::index::sample(rng, pixels.len(), cap)
			.into_iter()
			.map(|i| pixels[i])
			.collect()
	}
}
