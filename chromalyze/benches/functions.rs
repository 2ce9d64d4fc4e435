use chromalyze::{
	fit_gmm, fit_kmeans, quantize, sample, seeded_rng, watershed_segment, ColorImage, ColorSpace, CovarianceType,
	GmmConfig, KmeansConfig, WatershedConfig,
};
use criterion::{
	black_box, criterion_group, criterion_main, measurement::WallTime, BenchmarkGroup, BenchmarkId, Criterion,
	SamplingMode,
};
use std::time::Duration;

/// Image sizes to benchmark at
const SIZES: [(u32, u32); 3] = [(160, 90), (480, 270), (960, 540)];

/// A noisy image with a few color blobs on a light background
fn synthetic_image(width: u32, height: u32) -> ColorImage {
	let blobs = [
		(width / 4, height / 3, [200, 40, 40]),
		(width / 2, height * 2 / 3, [30, 60, 160]),
		(width * 3 / 4, height / 3, [40, 150, 60]),
	];
	let radius = u64::from(height / 5).pow(2);

	let pixels = (0..height)
		.flat_map(|y| (0..width).map(move |x| (x, y)))
		.map(|(x, y)| {
			let noise = ((x * 7 + y * 13) % 17) as u8;
			let color = blobs
				.iter()
				.find(|&&(cx, cy, _)| u64::from(x.abs_diff(cx)).pow(2) + u64::from(y.abs_diff(cy)).pow(2) <= radius)
				.map_or([235, 230, 220], |&(_, _, color)| color);
			color.map(|c| c.saturating_add(noise))
		})
		.collect();

	ColorImage::from_pixels(width, height, ColorSpace::Rgb, pixels).expect("matching dimensions")
}

fn images() -> Vec<(String, ColorImage)> {
	SIZES
		.iter()
		.map(|&(width, height)| (format!("{width}x{height}"), synthetic_image(width, height)))
		.collect()
}

fn create_group<'a>(c: &'a mut Criterion, name: &'a str) -> BenchmarkGroup<'a, WallTime> {
	let mut group = c.benchmark_group(name);
	group
		.sample_size(30)
		.noise_threshold(0.05)
		.sampling_mode(SamplingMode::Flat)
		.warm_up_time(Duration::from_millis(500));
	group
}

fn kmeans(c: &mut Criterion) {
	let mut group = create_group(c, "kmeans");
	let images = images();

	fn bench(name: &str, group: &mut BenchmarkGroup<WallTime>, images: &[(String, ColorImage)], k: u8, attempts: u32) {
		let config = KmeansConfig { attempts, ..KmeansConfig::default() };
		for (size, image) in images {
			group.bench_with_input(BenchmarkId::new(name, size), image, |b, image| {
				b.iter(|| fit_kmeans(image.pixels(), black_box(k), &config, black_box(0)));
			});
		}
	}

	group.measurement_time(Duration::from_secs(2));
	bench("default", &mut group, &images, 8, 10);
	bench("single attempt", &mut group, &images, 8, 1);

	group.measurement_time(Duration::from_secs(4));
	bench("high k", &mut group, &images, 32, 10);
}

fn gmm(c: &mut Criterion) {
	let mut group = create_group(c, "gmm");
	group.measurement_time(Duration::from_secs(4));

	for (size, image) in images() {
		let sampled = sample(image.pixels(), 50_000, &mut seeded_rng(42));
		for covariance_type in [CovarianceType::Full, CovarianceType::Tied, CovarianceType::Diag, CovarianceType::Spherical]
		{
			group.bench_with_input(BenchmarkId::new(covariance_type.name(), &size), &sampled, |b, sampled| {
				b.iter(|| {
					fit_gmm(
						sampled,
						black_box(8),
						covariance_type,
						&GmmConfig::default(),
						&KmeansConfig::default(),
						black_box(42),
					)
				});
			});
		}
	}
}

fn segmentation(c: &mut Criterion) {
	let mut group = create_group(c, "watershed");
	group.measurement_time(Duration::from_secs(2));

	for (size, image) in images() {
		group.bench_with_input(BenchmarkId::from_parameter(size), &image, |b, image| {
			b.iter(|| watershed_segment(image, black_box(&WatershedConfig::default())));
		});
	}
}

fn all_steps(c: &mut Criterion) {
	let mut group = create_group(c, "quantize");
	group.measurement_time(Duration::from_secs(4));

	for (size, image) in images() {
		group.bench_with_input(BenchmarkId::from_parameter(size), &image, |b, image| {
			b.iter(|| quantize(image, black_box(8), &KmeansConfig::default(), black_box(0)));
		});
	}
}

criterion_group!(benches, kmeans, gmm, segmentation, all_steps);
criterion_main!(benches);
