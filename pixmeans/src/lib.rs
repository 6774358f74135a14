//! Segment an image by performing k-means clustering on its pixel colors.
//!
//! Each pixel is replaced by the average color of the cluster it belongs to,
//! giving an image with at most `k` distinct colors.
//!
//! # Examples
//!
//! ## Read an image file and reduce it to 8 colors.
//!
//! ```no_run
//! use pixmeans::{ClusterOptions, PixelGrid};
//!
//! let image = image::open("some image").unwrap().into_rgb8();
//! let segmentation = pixmeans::cluster_image(&PixelGrid::from(image), 8, &ClusterOptions::default()).unwrap();
//! segmentation.image.save("output_8.png").unwrap();
//! ```
//!
//! ## Record every iteration of the best attempt.
//!
//! ```no_run
//! use pixmeans::{ClusterOptions, PixelGrid};
//!
//! let image = image::open("some image").unwrap().into_rgb8();
//! let options = ClusterOptions { visualize: true, ..ClusterOptions::default() };
//! let segmentation = pixmeans::cluster_image(&PixelGrid::from(image), 4, &options).unwrap();
//! println!("recorded {} frames", segmentation.frames.len());
//! ```
//!
//! ## Use the engine directly with a fixed number of iterations.
//!
//! ```no_run
//! use pixmeans::{Criteria, Kmeans, PixelGrid, TerminationPolicy};
//!
//! let image = image::open("some image").unwrap().into_rgb8();
//! let policy = TerminationPolicy::new(Criteria::MaxIterations, 10, 0.0);
//! let result = Kmeans::new(5, policy, 3).with_seed(42).run(&PixelGrid::from(image), false).unwrap();
//! let segmented = pixmeans::apply_labels(&result.labels, &result.centers);
//! ```
//!
//! # Options
//!
//! ## Attempts
//!
//! k-means can get stuck in a local minimum depending on its random starting centers.
//! Each attempt starts from different centers, and the attempt with the lowest total squared error is kept.
//! If several attempts share the lowest error, the earliest one wins.
//!
//! ## Epsilon and max iterations
//!
//! An attempt stops once the total squared error changes by at most `epsilon` between two iterations,
//! or once it has run `max_iterations` iterations, whichever happens first.
//! The error is measured on the same 0 to 255 scale as the pixel channels.
//!
//! ## Seed
//!
//! This is the value used to seed the random number generator which is used to choose the starting centers.
//! The same seed and input always give the same result, with or without the `threads` feature.
//!
//! ## Empty clusters
//!
//! A center can end up with no pixels after an assignment step.
//! By default such a center is moved onto a random pixel, see [`EmptyCluster`].

#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::cargo)]
#![warn(clippy::use_debug, clippy::dbg_macro, clippy::todo, clippy::unimplemented)]
#![warn(clippy::unwrap_used, clippy::unwrap_in_result)]
#![warn(clippy::unneeded_field_pattern, clippy::rest_pat_in_fully_bound_structs)]
#![warn(clippy::unnecessary_self_imports)]
#![warn(clippy::str_to_string, clippy::string_to_string, clippy::string_slice)]
#![warn(missing_docs, clippy::missing_docs_in_private_items, rustdoc::all)]
#![warn(clippy::float_cmp_const, clippy::lossy_float_literal)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::enum_glob_use)]
#![allow(clippy::unreadable_literal)]

use image::RgbImage;

mod error;
mod grid;
mod kmeans;
mod reconstruct;
mod termination;
mod visualize;

pub use error::ClusterError;
pub use grid::{Center, LabelGrid, PixelGrid};
pub use kmeans::{EmptyCluster, Kmeans, KmeansResult, DEFAULT_ATTEMPTS};
pub use reconstruct::apply_labels;
pub use termination::{Criteria, TerminationPolicy, DEFAULT_EPSILON, DEFAULT_MAX_ITERATIONS};

/// Options for [`cluster_image`]
///
/// See the crate documentation for information on each option.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterOptions {
	/// Number of k-means attempts, `0` is treated as `1`
	pub attempts: u32,
	/// Stop an attempt once its error changes by at most this much
	pub epsilon: f64,
	/// Stop an attempt after this many iterations
	pub max_iterations: u32,
	/// Record one frame per iteration of the best attempt
	pub visualize: bool,
	/// Seed for choosing the starting centers
	pub seed: u64,
	/// Handling of centers that lose all their pixels
	pub empty_cluster: EmptyCluster,
}

impl Default for ClusterOptions {
	fn default() -> Self {
		Self {
			attempts: DEFAULT_ATTEMPTS,
			epsilon: DEFAULT_EPSILON,
			max_iterations: DEFAULT_MAX_ITERATIONS,
			visualize: false,
			seed: 0,
			empty_cluster: EmptyCluster::default(),
		}
	}
}

/// A segmented image along with the clustering that produced it
#[derive(Debug, Clone)]
pub struct Segmentation {
	/// The input image with each pixel replaced by the color of its center
	pub image: RgbImage,
	/// Final center colors
	pub centers: Vec<Center>,
	/// The center index of each pixel
	pub labels: LabelGrid,
	/// Total squared error of the best attempt
	pub error: f64,
	/// Number of iterations of the best attempt
	pub iterations: u32,
	/// Frames of the best attempt, empty unless `visualize` was set
	pub frames: Vec<RgbImage>,
}

/// Cluster the pixels of an image into `clusters` colors and return the segmented image.
///
/// Each attempt stops on whichever comes first of `options.max_iterations` and `options.epsilon`.
/// `clusters` is a `u8`, so at most 255 clusters are supported.
///
/// # Errors
/// Returns an error if the image is not a 2D, 3 channel grid with at least one pixel,
/// or if `clusters` is `0`. No clustering is performed in that case.
pub fn cluster_image(
	pixels: &PixelGrid,
	clusters: u8,
	options: &ClusterOptions,
) -> Result<Segmentation, ClusterError> {
	let policy = TerminationPolicy::new(Criteria::Either, options.max_iterations, options.epsilon);

	let KmeansResult { labels, centers, error, iterations, frames, .. } =
		Kmeans::new(clusters, policy, options.attempts)
			.with_seed(options.seed)
			.with_empty_cluster(options.empty_cluster)
			.run(pixels, options.visualize)?;

	Ok(Segmentation {
		image: apply_labels(&labels, &centers),
		centers,
		labels,
		error,
		iterations,
		frames,
	})
}
