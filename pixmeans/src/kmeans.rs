//! Provides the implementation for (Lloyd's) k-means on pixel colors

use crate::{grid::RgbView, visualize::FrameRecorder, Center, ClusterError, LabelGrid, PixelGrid, TerminationPolicy};
use image::RgbImage;
use log::{debug, trace};
use palette::Srgb;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoroshiro128PlusPlus;

/// Default number of k-means attempts
pub const DEFAULT_ATTEMPTS: u32 = 5;

/// What to do with a center that has no pixels assigned to it after an assignment step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyCluster {
	/// Move the center onto a randomly chosen pixel
	#[default]
	Reseed,
	/// Average over zero pixels anyway, which leaves the center as `NaN`.
	///
	/// A `NaN` center never wins an assignment again, so it stays empty for the rest of the attempt
	/// and only shows up in the returned centers.
	Propagate,
}

/// Result from running k-means
#[derive(Debug, Clone)]
pub struct KmeansResult {
	/// The center index of each pixel
	pub labels: LabelGrid,
	/// Final center colors
	pub centers: Vec<Center>,
	/// Sum of the squared distances between each pixel and its center
	///
	/// A lower error indicates a better clustering.
	pub error: f64,
	/// Number of elapsed iterations
	pub iterations: u32,
	/// Index of the attempt this result came from
	pub attempt: u32,
	/// One image per iteration, taken after each assignment step.
	///
	/// Empty unless visualization was requested.
	pub frames: Vec<RgbImage>,
}

/// Runs one or more attempts of k-means on a pixel grid, keeping the attempt with the lowest error
#[derive(Debug, Clone, Copy)]
pub struct Kmeans {
	/// Number of centers
	clusters: u8,
	/// When each attempt stops
	policy: TerminationPolicy,
	/// Number of attempts, at least `1`
	attempts: u32,
	/// Base seed for the random number generator of each attempt
	seed: u64,
	/// Handling of centers that lose all their pixels
	empty_cluster: EmptyCluster,
}

/// Squared euclidean distance between a pixel and a center.
///
/// `f32` is exact enough here: channel differences are at most 255, so a distance is at most `3 * 255^2`.
/// Error sums are accumulated in `f64`.
fn squared_distance(pixel: Srgb<u8>, center: Center) -> f32 {
	let dr = f32::from(pixel.red) - center.red;
	let dg = f32::from(pixel.green) - center.green;
	let db = f32::from(pixel.blue) - center.blue;
	dr * dr + dg * dg + db * db
}

/// Index of the closest center, ties going to the lowest index
// centers.len() <= u8::MAX
#[allow(clippy::cast_possible_truncation)]
fn nearest_center(pixel: Srgb<u8>, centers: &[Center]) -> u8 {
	let mut min_dist = f32::INFINITY;
	let mut min_center = 0;
	for (i, &center) in centers.iter().enumerate() {
		let dist = squared_distance(pixel, center);
		if dist < min_dist {
			min_dist = dist;
			min_center = i as u8;
		}
	}
	min_center
}

/// Convert a pixel into a center
fn to_center(pixel: Srgb<u8>) -> Center {
	Center::new(f32::from(pixel.red), f32::from(pixel.green), f32::from(pixel.blue))
}

/// Data for each center
struct CenterData {
	/// The center colors
	centroid: Vec<Center>,
	/// Vector sum for all pixels in this center
	sum: Vec<Srgb<f64>>,
	/// Number of pixels in this center
	count: Vec<u64>,
}

impl CenterData {
	/// Create a [`CenterData`] with room for `k` centers
	fn new(k: u8) -> Self {
		let k = usize::from(k);
		Self {
			centroid: Vec::with_capacity(k),
			sum: vec![Srgb::new(0.0, 0.0, 0.0); k],
			count: vec![0; k],
		}
	}
}

/// Choose the starting centers by picking `k` pixels uniformly at random, with replacement
fn random_centers(k: u8, rng: &mut impl Rng, pixels: &[Srgb<u8>], centroids: &mut Vec<Center>) {
	centroids.clear();
	for _ in 0..k {
		centroids.push(to_center(pixels[rng.gen_range(0..pixels.len())]));
	}
}

/// For each pixel, update its assigned center
#[cfg(not(feature = "threads"))]
fn update_assignments(pixels: &[Srgb<u8>], centroids: &[Center], labels: &mut [u8]) {
	for (label, &pixel) in labels.iter_mut().zip(pixels) {
		*label = nearest_center(pixel, centroids);
	}
}

/// For each pixel, update its assigned center
#[cfg(feature = "threads")]
fn update_assignments(pixels: &[Srgb<u8>], centroids: &[Center], labels: &mut [u8]) {
	use rayon::prelude::*;

	labels
		.par_iter_mut()
		.zip(pixels)
		.with_min_len((pixels.len() / rayon::current_num_threads()).max(1))
		.for_each(|(label, &pixel)| *label = nearest_center(pixel, centroids));
}

/// For each center, set its centroid to the mean of its pixels
fn update_centroids(
	rng: &mut impl Rng,
	pixels: &[Srgb<u8>],
	labels: &[u8],
	centers: &mut CenterData,
	empty_cluster: EmptyCluster,
) {
	centers.sum.fill(Srgb::new(0.0, 0.0, 0.0));
	centers.count.fill(0);

	for (&pixel, &label) in pixels.iter().zip(labels) {
		let i = usize::from(label);
		let sum = &mut centers.sum[i];
		sum.red += f64::from(pixel.red);
		sum.green += f64::from(pixel.green);
		sum.blue += f64::from(pixel.blue);
		centers.count[i] += 1;
	}

	for (i, ((centroid, &n), sum)) in centers.centroid.iter_mut().zip(&centers.count).zip(&centers.sum).enumerate() {
		if n == 0 {
			if empty_cluster == EmptyCluster::Reseed {
				*centroid = to_center(pixels[rng.gen_range(0..pixels.len())]);
				debug!(
					"center {i} lost all of its pixels and was reseeded at ({}, {}, {})",
					centroid.red, centroid.green, centroid.blue
				);
				continue;
			}
			debug!("center {i} lost all of its pixels and is now undefined");
		}

		// Pixel counts above 2^52 are not realistic
		#[allow(clippy::cast_precision_loss)]
		let n = n as f64;

		// Sums need greater precision, but the average can fall back down to a reduced precision
		#[allow(clippy::cast_possible_truncation)]
		let mean = Center::new((sum.red / n) as f32, (sum.green / n) as f32, (sum.blue / n) as f32);

		*centroid = mean;
	}
}

/// Sum of the squared distances between each pixel and its assigned center
fn total_error(pixels: &[Srgb<u8>], labels: &[u8], centroids: &[Center]) -> f64 {
	pixels
		.iter()
		.zip(labels)
		.map(|(&pixel, &label)| f64::from(squared_distance(pixel, centroids[usize::from(label)])))
		.sum()
}

/// Keep `candidate` only if it has a strictly lower error, so ties go to the earlier attempt
fn better(best: KmeansResult, candidate: KmeansResult) -> KmeansResult {
	if candidate.error < best.error {
		candidate
	} else {
		best
	}
}

impl Kmeans {
	/// Create an engine for `clusters` centers.
	///
	/// Labels are stored as `u8`, so at most 255 clusters are supported.
	/// An `attempts` of `0` is treated as `1`.
	/// The seed defaults to `0` and empty centers are reseeded.
	#[must_use]
	pub fn new(clusters: u8, policy: TerminationPolicy, attempts: u32) -> Self {
		Self {
			clusters,
			policy,
			attempts: attempts.max(1),
			seed: 0,
			empty_cluster: EmptyCluster::default(),
		}
	}

	/// Set the seed used to choose the starting centers.
	///
	/// Attempt `i` seeds its random number generator with `seed ^ i`.
	#[must_use]
	pub const fn with_seed(mut self, seed: u64) -> Self {
		self.seed = seed;
		self
	}

	/// Set how centers without any pixels are handled
	#[must_use]
	pub const fn with_empty_cluster(mut self, empty_cluster: EmptyCluster) -> Self {
		self.empty_cluster = empty_cluster;
		self
	}

	/// The number of centers
	#[must_use]
	pub const fn clusters(&self) -> u8 {
		self.clusters
	}

	/// The number of attempts
	#[must_use]
	pub const fn attempts(&self) -> u32 {
		self.attempts
	}

	/// The termination policy of each attempt
	#[must_use]
	pub const fn policy(&self) -> TerminationPolicy {
		self.policy
	}

	/// Run all attempts of k-means and return the one with the lowest error.
	///
	/// If `visualize` is set, the result holds one frame per iteration of the winning attempt.
	///
	/// # Errors
	/// Returns an error without doing any work if the grid is not 2D with 3 channels,
	/// has no pixels, is too large, or if there are 0 clusters.
	pub fn run(&self, pixels: &PixelGrid, visualize: bool) -> Result<KmeansResult, ClusterError> {
		let view = pixels.rgb()?;
		if self.clusters == 0 {
			return Err(ClusterError::NoClusters);
		}

		debug!(
			"running {} attempt(s) of k-means with {} clusters on a {}x{} image",
			self.attempts, self.clusters, view.width, view.height
		);

		let best = self.run_attempts(&view, visualize);

		debug!(
			"attempt {} won with error {} after {} iterations",
			best.attempt, best.error, best.iterations
		);

		Ok(best)
	}

	/// Run each attempt in order, taking the attempt with the lowest error
	#[cfg(not(feature = "threads"))]
	fn run_attempts(&self, view: &RgbView, visualize: bool) -> KmeansResult {
		(1..self.attempts)
			.map(|i| self.attempt(view, i, visualize))
			.fold(self.attempt(view, 0, visualize), better)
	}

	/// Run the attempts in parallel, taking the attempt with the lowest error
	///
	/// The reduction keeps attempt order, so ties still go to the earliest attempt.
	#[cfg(feature = "threads")]
	fn run_attempts(&self, view: &RgbView, visualize: bool) -> KmeansResult {
		use rayon::prelude::*;

		let (first, rest) = rayon::join(
			|| self.attempt(view, 0, visualize),
			|| {
				(1..self.attempts)
					.into_par_iter()
					.map(|i| self.attempt(view, i, visualize))
					.reduce_with(better)
			},
		);

		match rest {
			Some(rest) => better(first, rest),
			None => first,
		}
	}

	/// Run a single attempt of k-means until the termination policy is met
	fn attempt(&self, view: &RgbView, attempt: u32, visualize: bool) -> KmeansResult {
		let &RgbView { width, height, pixels } = view;
		let policy = self.policy;

		let mut rng = Xoroshiro128PlusPlus::seed_from_u64(self.seed ^ u64::from(attempt));
		let mut centers = CenterData::new(self.clusters);
		let mut labels = LabelGrid::new(width, height);
		let mut recorder = FrameRecorder::new(visualize);

		random_centers(self.clusters, &mut rng, pixels, &mut centers.centroid);

		let mut iterations = 0;
		let mut previous_error = 0.0;
		let measured_error = loop {
			iterations += 1;

			update_assignments(pixels, &centers.centroid, labels.as_mut_slice());
			recorder.record(&labels, &centers.centroid);
			update_centroids(&mut rng, pixels, labels.as_slice(), &mut centers, self.empty_cluster);

			if policy.checks_iterations() && iterations == policy.max_iterations() {
				break None;
			}

			if policy.checks_epsilon() {
				let error = total_error(pixels, labels.as_slice(), &centers.centroid);
				let delta = (error - previous_error).abs();
				trace!("attempt {attempt}, iteration {iterations}: error {error}, delta {delta}");
				previous_error = error;
				if delta <= policy.epsilon() {
					break Some(error);
				}
			}
		};

		let error =
			measured_error.unwrap_or_else(|| total_error(pixels, labels.as_slice(), &centers.centroid));

		debug!("attempt {attempt} finished after {iterations} iterations with error {error}");

		KmeansResult {
			labels,
			centers: centers.centroid,
			error,
			iterations,
			attempt,
			frames: recorder.into_frames(),
		}
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;
	use crate::{reconstruct::apply_labels, Criteria};
	use approx::assert_relative_eq;

	fn init_logger() {
		let _ = env_logger::builder().is_test(true).try_init();
	}

	/// A small image made of four noisy patches of different base colors
	fn test_grid(width: usize, height: usize) -> PixelGrid {
		let bases: [[u8; 3]; 4] = [[20, 30, 200], [230, 40, 40], [225, 225, 215], [30, 160, 60]];
		let mut rng = Xoroshiro128PlusPlus::seed_from_u64(7);
		let mut data = Vec::with_capacity(width * height * 3);
		for y in 0..height {
			for x in 0..width {
				let base = bases[(x * 2 / width) + 2 * (y * 2 / height)];
				for c in base {
					data.push(c + rng.gen_range(0..20));
				}
			}
		}
		PixelGrid::new(vec![height, width], 3, data).unwrap()
	}

	fn black_and_white() -> PixelGrid {
		let mut data = vec![0; 6];
		data.extend([255; 6]);
		PixelGrid::new(vec![2, 2], 3, data).unwrap()
	}

	#[test]
	fn nearest_center_ties_go_to_lowest_index() {
		let centers = [
			Center::new(10.0, 0.0, 0.0),
			Center::new(0.0, 10.0, 0.0),
			Center::new(0.0, 0.0, 10.0),
		];
		assert_eq!(nearest_center(Srgb::new(0, 0, 0), &centers), 0);
		assert_eq!(nearest_center(Srgb::new(0, 9, 9), &centers), 1);
		assert_eq!(nearest_center(Srgb::new(0, 0, 9), &centers), 2);
	}

	#[test]
	fn random_centers_come_from_the_image() {
		let grid = test_grid(8, 8);
		let view = grid.rgb().unwrap();
		let mut centroids = Vec::new();

		random_centers(12, &mut Xoroshiro128PlusPlus::seed_from_u64(0), view.pixels, &mut centroids);

		assert_eq!(centroids.len(), 12);
		for center in centroids {
			assert!(view.pixels.iter().any(|&pixel| to_center(pixel) == center));
		}
	}

	#[test]
	fn update_centroids_averages_pixels() {
		let pixels = [Srgb::new(0, 10, 20), Srgb::new(10, 20, 31), Srgb::new(200, 200, 200)];
		let labels = [0, 0, 1];
		let mut centers = CenterData::new(2);
		centers.centroid = vec![Center::new(0.0, 0.0, 0.0); 2];

		let rng = &mut Xoroshiro128PlusPlus::seed_from_u64(0);
		update_centroids(rng, &pixels, &labels, &mut centers, EmptyCluster::Reseed);

		assert_relative_eq!(centers.centroid[0], Center::new(5.0, 15.0, 25.5));
		assert_relative_eq!(centers.centroid[1], Center::new(200.0, 200.0, 200.0));
		assert_eq!(centers.count, vec![2, 1]);
	}

	#[test]
	fn empty_center_propagates_nan() {
		let pixels = [Srgb::new(1, 2, 3), Srgb::new(4, 5, 6)];
		let mut centers = CenterData::new(2);
		centers.centroid = vec![Center::new(0.0, 0.0, 0.0); 2];

		let rng = &mut Xoroshiro128PlusPlus::seed_from_u64(0);
		update_centroids(rng, &pixels, &[0, 0], &mut centers, EmptyCluster::Propagate);

		let empty = centers.centroid[1];
		assert!(empty.red.is_nan() && empty.green.is_nan() && empty.blue.is_nan());
		assert_eq!(nearest_center(Srgb::new(200, 200, 200), &centers.centroid), 0);
	}

	#[test]
	fn empty_center_is_reseeded_on_a_pixel() {
		let pixels = [Srgb::new(1, 2, 3), Srgb::new(4, 5, 6)];
		let mut centers = CenterData::new(2);
		centers.centroid = vec![Center::new(0.0, 0.0, 0.0); 2];

		let rng = &mut Xoroshiro128PlusPlus::seed_from_u64(0);
		update_centroids(rng, &pixels, &[0, 0], &mut centers, EmptyCluster::Reseed);

		let reseeded = centers.centroid[1];
		assert!(pixels.iter().any(|&pixel| to_center(pixel) == reseeded));
	}

	#[test]
	fn invalid_input_is_rejected() {
		let policy = TerminationPolicy::default();

		let gray = PixelGrid::new(vec![4, 4], 1, vec![0; 16]).unwrap();
		let err = Kmeans::new(2, policy, 1).run(&gray, false).unwrap_err();
		assert_eq!(err, ClusterError::UnsupportedChannels(1));
		assert!(err.is_invalid_input());

		let volume = PixelGrid::new(vec![2, 2, 2], 3, vec![0; 24]).unwrap();
		let err = Kmeans::new(2, policy, 1).run(&volume, false).unwrap_err();
		assert_eq!(err, ClusterError::UnsupportedDimensions(3));

		let err = Kmeans::new(0, policy, 1).run(&test_grid(4, 4), false).unwrap_err();
		assert_eq!(err, ClusterError::NoClusters);
	}

	#[test]
	fn attempts_are_at_least_one() {
		assert_eq!(Kmeans::new(3, TerminationPolicy::default(), 0).attempts(), 1);
	}

	#[test]
	fn labels_index_valid_centers() {
		init_logger();
		let grid = test_grid(16, 12);
		for k in [1, 2, 5, 9] {
			let result = Kmeans::new(k, TerminationPolicy::default(), 3)
				.with_seed(11)
				.run(&grid, false)
				.unwrap();

			assert_eq!(result.centers.len(), usize::from(k));
			assert_eq!((result.labels.width(), result.labels.height()), (16, 12));
			assert!(result.labels.as_slice().iter().all(|&label| label < k));
		}
	}

	#[test]
	fn single_cluster_is_the_mean() {
		let grid = test_grid(10, 10);
		let policy = TerminationPolicy::new(Criteria::Epsilon, 1, 1e-6);
		let result = Kmeans::new(1, policy, 1).run(&grid, false).unwrap();

		let pixels = grid.rgb().unwrap().pixels;
		#[allow(clippy::cast_precision_loss)]
		let n = pixels.len() as f64;
		#[allow(clippy::cast_possible_truncation)]
		let mean = |channel: fn(&Srgb<u8>) -> u8| (pixels.iter().map(|p| f64::from(channel(p))).sum::<f64>() / n) as f32;
		let expected = Center::new(mean(|p| p.red), mean(|p| p.green), mean(|p| p.blue));

		assert_eq!(result.centers, vec![expected]);
		assert!(result.iterations <= 2);

		let image = apply_labels(&result.labels, &result.centers);
		let first = *image.get_pixel(0, 0);
		assert!(image.pixels().all(|&pixel| pixel == first));
	}

	#[test]
	fn first_epsilon_check_compares_against_zero() {
		let mut data = vec![0; 6];
		data.extend([10; 6]);
		let grid = PixelGrid::new(vec![2, 2], 3, data).unwrap();

		// one center always settles on (5, 5, 5), an error of 4 * 75
		let result = Kmeans::new(1, TerminationPolicy::new(Criteria::Epsilon, 1, 1000.0), 1)
			.run(&grid, false)
			.unwrap();
		assert_eq!(result.iterations, 1);
		assert_relative_eq!(result.error, 300.0);

		let result = Kmeans::new(1, TerminationPolicy::new(Criteria::Epsilon, 1, 1.0), 1)
			.run(&grid, false)
			.unwrap();
		assert_eq!(result.iterations, 2);
		assert_relative_eq!(result.error, 300.0);
	}

	#[test]
	fn negative_epsilon_still_terminates() {
		let grid = PixelGrid::new(vec![1, 1], 3, vec![7, 8, 9]).unwrap();
		let result = Kmeans::new(1, TerminationPolicy::new(Criteria::Epsilon, 1, -1.0), 1)
			.run(&grid, false)
			.unwrap();

		// the first error is already 0
		assert_eq!(result.iterations, 1);
		assert_eq!(result.centers, vec![Center::new(7.0, 8.0, 9.0)]);
	}

	#[test]
	fn max_iterations_runs_exactly_n_iterations() {
		let grid = test_grid(8, 8);
		for n in [1, 3, 7] {
			let policy = TerminationPolicy::new(Criteria::MaxIterations, n, 1e9);
			let result = Kmeans::new(4, policy, 2).run(&grid, true).unwrap();

			assert_eq!(result.iterations, n);
			assert_eq!(result.frames.len(), n as usize);
		}
	}

	#[test]
	fn frames_match_iterations() {
		let grid = test_grid(12, 12);
		let kmeans = Kmeans::new(3, TerminationPolicy::default(), 3).with_seed(5);

		let result = kmeans.run(&grid, true).unwrap();
		assert_eq!(result.frames.len(), result.iterations as usize);
		for frame in &result.frames {
			assert_eq!(frame.dimensions(), (12, 12));
		}

		let quiet = kmeans.run(&grid, false).unwrap();
		assert!(quiet.frames.is_empty());
	}

	#[test]
	fn black_and_white_converges() {
		init_logger();
		let grid = black_and_white();
		for seed in 0..16 {
			let result = Kmeans::new(2, TerminationPolicy::default(), 1)
				.with_seed(seed)
				.run(&grid, false)
				.unwrap();

			let mut reds = result.centers.iter().map(|c| c.red).collect::<Vec<_>>();
			reds.sort_by(f32::total_cmp);
			assert_eq!(reds, vec![0.0, 255.0]);

			let labels = &result.labels;
			assert_eq!(labels.get(0, 0), labels.get(1, 0));
			assert_eq!(labels.get(0, 1), labels.get(1, 1));
			assert_ne!(labels.get(0, 0), labels.get(0, 1));

			assert!(result.error.abs() < f64::EPSILON);
		}
	}

	#[test]
	fn best_attempt_has_the_lowest_error() {
		let grid = test_grid(16, 16);
		let view = grid.rgb().unwrap();
		let kmeans = Kmeans::new(6, TerminationPolicy::new(Criteria::Either, 100, 1e-3), 6).with_seed(3);

		let best = kmeans.run(&grid, false).unwrap();

		let errors = (0..kmeans.attempts())
			.map(|i| kmeans.attempt(&view, i, false).error)
			.collect::<Vec<_>>();

		let first_min = errors
			.iter()
			.enumerate()
			.fold(0, |min, (i, &error)| if error < errors[min] { i } else { min });

		assert!(errors.iter().all(|&error| best.error <= error));
		assert_eq!(best.attempt as usize, first_min);
	}

	#[test]
	fn ties_go_to_the_earlier_attempt() {
		let result = |attempt| KmeansResult {
			labels: LabelGrid::new(1, 1),
			centers: vec![Center::new(0.0, 0.0, 0.0)],
			error: 1.0,
			iterations: 1,
			attempt,
			frames: Vec::new(),
		};

		assert_eq!(better(result(0), result(1)).attempt, 0);

		let mut lower = result(2);
		lower.error = 0.5;
		assert_eq!(better(result(0), lower).attempt, 2);
	}

	#[test]
	fn same_seed_same_result() {
		let grid = test_grid(12, 10);
		let kmeans = Kmeans::new(5, TerminationPolicy::default(), 4).with_seed(42);

		let a = kmeans.run(&grid, false).unwrap();
		let b = kmeans.run(&grid, false).unwrap();

		assert_eq!(a.labels, b.labels);
		assert_eq!(a.centers, b.centers);
		assert_eq!(a.attempt, b.attempt);
	}
}
