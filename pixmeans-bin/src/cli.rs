//! Specifies the CLI and handles arg parsing

use clap::{Parser, ValueEnum};
use pixmeans::{EmptyCluster, DEFAULT_ATTEMPTS, DEFAULT_EPSILON, DEFAULT_MAX_ITERATIONS};
use std::{
	fmt::{Debug, Display},
	num::ParseFloatError,
	ops::{RangeBounds, RangeInclusive},
	path::PathBuf,
	str::FromStr,
};

/// Supported output formats for the cluster centers
#[derive(Copy, Clone, ValueEnum)]
pub enum FormatOutput {
	/// sRGB hexcode
	Hex,
	/// sRGB (r,g,b) triple
	Rgb,
	/// Whitespace with true color background
	Swatch,
}

/// Ways to colorize the output text
#[derive(Copy, Clone, ValueEnum)]
pub enum ColorizeOutput {
	/// Foreground
	Fg,
	/// Background
	Bg,
}

/// Handling of clusters that lose all of their pixels
#[derive(Copy, Clone, ValueEnum)]
pub enum EmptyClusterOption {
	/// Move the center onto a random pixel
	Reseed,
	/// Leave the center undefined (NaN)
	Propagate,
}

impl From<EmptyClusterOption> for EmptyCluster {
	fn from(value: EmptyClusterOption) -> Self {
		match value {
			EmptyClusterOption::Reseed => Self::Reseed,
			EmptyClusterOption::Propagate => Self::Propagate,
		}
	}
}

/// Segment an image by performing k-means clustering on its pixel colors.
///
/// The clustered image is written to output_<K>.png unless --output is given.
#[allow(clippy::struct_excessive_bools)]
#[derive(Parser)]
#[command(version)]
pub struct Options {
	/// The path to the input image
	pub image: PathBuf,

	/// The number of clusters (colors) to find
	#[arg(short, default_value_t = 8)]
	pub k: u8,

	/// Where to write the clustered image, defaults to output_<K>.png
	#[arg(short, long)]
	pub output: Option<PathBuf>,

	/// The number of attempts of k-means to run
	///
	/// k-means can get stuck in a local minimum, so several attempts are run from different starting centers.
	/// The attempt with the lowest total squared error is picked.
	#[arg(short = 'n', long, default_value_t = DEFAULT_ATTEMPTS)]
	pub attempts: u32,

	/// Stop an attempt once its total squared error changes by at most this much between iterations
	///
	/// The error is summed over all pixels on the 0-255 channel scale, so it grows with the image size.
	#[arg(short, long, default_value_t = DEFAULT_EPSILON, value_parser = parse_valid_epsilon)]
	pub epsilon: f64,

	/// The maximum number of iterations for each attempt
	#[arg(short = 'i', long, default_value_t = DEFAULT_MAX_ITERATIONS)]
	pub max_iter: u32,

	/// The seed value used for the random number generator
	///
	/// Defaults to a value derived from the current time, so each run can give a different result.
	#[arg(long)]
	pub seed: Option<u64>,

	/// What to do with a cluster that loses all of its pixels
	#[arg(long, default_value = "reseed")]
	pub empty_cluster: EmptyClusterOption,

	/// Write every iteration of the best attempt as an animated GIF
	#[arg(long)]
	pub visualize: bool,

	/// Where to write the --visualize animation
	#[arg(long, default_value = "visualize_kmeans.gif")]
	pub visualize_path: PathBuf,

	/// Frames per second of the --visualize animation
	#[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u16).range(1..=100))]
	pub fps: u16,

	/// Cluster the image once for each number of clusters in MIN-MAX and write the results as an animated GIF
	///
	/// This replaces the single clustered image output.
	#[arg(long, value_name = "MIN-MAX", value_parser = parse_cluster_range, conflicts_with_all = ["visualize", "output", "centers"])]
	pub sweep: Option<RangeInclusive<u8>>,

	/// Where to write the --sweep animation
	#[arg(long, default_value = "image_clustering.gif")]
	pub sweep_path: PathBuf,

	/// Frames per second of the --sweep animation
	#[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u16).range(1..=100))]
	pub sweep_fps: u16,

	/// Print the final cluster colors in the given format
	#[arg(short, long)]
	pub centers: Option<FormatOutput>,

	/// Color the foreground or background for each printed color
	#[arg(long, requires = "centers")]
	pub colorize: Option<ColorizeOutput>,

	/// The maximum image size, in number of pixels, before a thumbnail is created
	///
	/// This option is intended for reducing the time needed for large images,
	/// but the clustered image will then have the dimensions of the thumbnail.
	#[arg(short = 'p', long, default_value_t = u32::MAX)]
	pub max_pixels: u32,

	/// The number of threads to use, 0 lets rayon decide
	#[cfg(feature = "threads")]
	#[arg(short, long, default_value_t = 0)]
	pub threads: u8,

	/// Print additional information, such as the number of k-means iterations and timings
	#[arg(long)]
	pub verbose: bool,
}

/// Parse a float value and ensure it in the provided, valid range
fn parse_float_in_range<T>(s: &str, range: impl RangeBounds<T> + Debug) -> Result<T, String>
where
	T: FromStr<Err = ParseFloatError> + Display + PartialOrd,
{
	let value: T = s.parse().map_err(|e| format!("{e}"))?;
	if range.contains(&value) {
		Ok(value)
	} else {
		Err(format!("{value} is not in {range:?}"))
	}
}

/// Parse the epsilon and ensure it is >= `0.0`
fn parse_valid_epsilon(s: &str) -> Result<f64, String> {
	parse_float_in_range(s, 0.0..)
}

/// Parse an inclusive range of cluster counts written as `MIN-MAX`
fn parse_cluster_range(s: &str) -> Result<RangeInclusive<u8>, String> {
	let (min, max) = s
		.split_once('-')
		.ok_or_else(|| format!("expected a range like 2-15, got {s}"))?;

	let min: u8 = min.trim().parse().map_err(|e| format!("{e}"))?;
	let max: u8 = max.trim().parse().map_err(|e| format!("{e}"))?;

	if min <= max {
		Ok(min..=max)
	} else {
		Err(format!("{min} is greater than {max}"))
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;
	use clap::CommandFactory;

	#[test]
	fn command_is_valid() {
		Options::command().debug_assert();
	}

	#[test]
	fn defaults() {
		let options = Options::try_parse_from(["pixmeans", "image.png"]).unwrap();
		assert_eq!(options.k, 8);
		assert_eq!(options.attempts, DEFAULT_ATTEMPTS);
		assert_eq!(options.max_iter, DEFAULT_MAX_ITERATIONS);
		assert!(options.seed.is_none() && options.sweep.is_none() && !options.visualize);
		assert_eq!(options.visualize_path, PathBuf::from("visualize_kmeans.gif"));
	}

	#[test]
	fn cluster_range() {
		assert_eq!(parse_cluster_range("2-15"), Ok(2..=15));
		assert_eq!(parse_cluster_range(" 4 - 4 "), Ok(4..=4));
		assert!(parse_cluster_range("9-3").is_err());
		assert!(parse_cluster_range("3").is_err());
		assert!(parse_cluster_range("1-300").is_err());
	}

	#[test]
	fn negative_epsilon_is_rejected() {
		assert!(parse_valid_epsilon("-0.5").is_err());
		assert_eq!(parse_valid_epsilon("0.25"), Ok(0.25));
		assert!(Options::try_parse_from(["pixmeans", "image.png", "-e", "-1"]).is_err());
	}

	#[test]
	fn sweep_conflicts_with_single_run_outputs() {
		assert!(Options::try_parse_from(["pixmeans", "image.png", "--sweep", "2-5", "--visualize"]).is_err());
		assert!(Options::try_parse_from(["pixmeans", "image.png", "--sweep", "2-5", "-c", "hex"]).is_err());

		let options = Options::try_parse_from(["pixmeans", "image.png", "--sweep", "2-5"]).unwrap();
		assert_eq!(options.sweep, Some(2..=5));
	}
}
