//! Segment an image by performing k-means clustering on its pixel colors.

#![deny(unsafe_code, unsafe_op_in_unsafe_fn)]
#![warn(
	clippy::pedantic,
	clippy::cargo,
	clippy::use_debug,
	clippy::dbg_macro,
	clippy::todo,
	clippy::unimplemented,
	clippy::unwrap_used,
	clippy::unwrap_in_result,
	clippy::unneeded_field_pattern,
	clippy::rest_pat_in_fully_bound_structs,
	clippy::unnecessary_self_imports,
	clippy::str_to_string,
	clippy::string_to_string,
	clippy::string_slice,
	missing_docs,
	clippy::missing_docs_in_private_items,
	rustdoc::all,
	clippy::float_cmp_const,
	clippy::lossy_float_literal
)]
#![allow(
	clippy::doc_markdown,
	clippy::module_name_repetitions,
	clippy::missing_panics_doc,
	clippy::unreadable_literal
)]

mod cli;

#[allow(clippy::wildcard_imports)]
use cli::*;

use std::{
	fs::File,
	io::{BufWriter, Write},
	ops::RangeInclusive,
	path::{Path, PathBuf},
	process::ExitCode,
	time::{Instant, SystemTime, UNIX_EPOCH},
};

use clap::Parser;
use colored::Colorize;
use env_logger::Env;
use image::{
	codecs::gif::{GifEncoder, Repeat},
	Delay, DynamicImage, Frame, GenericImageView, ImageResult, RgbImage,
};
use log::{debug, error, info, warn};
use palette::Srgb;
use pixmeans::{Center, ClusterError, ClusterOptions, PixelGrid, Segmentation};
use thiserror::Error;

/// Record the running time of a function and log the elapsed time
macro_rules! time {
	($name: literal, $func_call: expr) => {{
		let start = Instant::now();
		let result = $func_call;
		debug!("{} took {}ms", $name, start.elapsed().as_millis());
		result
	}};
}

/// Error cases for a run of the binary
#[derive(Debug, Error)]
enum AppError {
	/// Failed to read or decode the image file
	#[error("Failed to load the image file: {0}")]
	ImageLoad(#[source] image::ImageError),
	/// Failed to read or decode the avif file
	#[cfg_attr(not(feature = "avif"), allow(dead_code))]
	#[error("Failed to load the avif file: {0}")]
	AvifLoad(String),
	/// The thread pool could not be started
	#[cfg_attr(not(feature = "threads"), allow(dead_code))]
	#[error("Failed to start the thread pool: {0}")]
	ThreadPool(String),
	/// The image could not be clustered
	#[error("Image clustering failed: {0}")]
	Cluster(#[from] ClusterError),
	/// An output file could not be created
	#[error("Failed to create {}: {source}", .path.display())]
	Create {
		/// The output path
		path: PathBuf,
		/// The underlying error
		#[source]
		source: std::io::Error,
	},
	/// An output image or animation could not be encoded
	#[error("Failed to write {}: {source}", .path.display())]
	Write {
		/// The output path
		path: PathBuf,
		/// The underlying error
		#[source]
		source: image::ImageError,
	},
}

fn main() -> ExitCode {
	let options = Options::parse();

	env_logger::Builder::from_env(Env::default().default_filter_or(if options.verbose { "debug" } else { "info" }))
		.format_timestamp(None)
		.init();

	// Returning Result<_> uses Debug printing instead of Display
	if let Err(e) = run_segment(&options) {
		eprintln!("{e}");
		ExitCode::FAILURE
	} else {
		ExitCode::SUCCESS
	}
}

/// Builds a thread pool and then runs `segment`
#[cfg(feature = "threads")]
fn run_segment(options: &Options) -> Result<(), AppError> {
	let pool = rayon::ThreadPoolBuilder::new()
		.num_threads(usize::from(options.threads))
		.build()
		.map_err(|e| AppError::ThreadPool(e.to_string()))?;

	pool.install(|| segment(options))
}

/// Runs `segment` on a single thread
#[cfg(not(feature = "threads"))]
fn run_segment(options: &Options) -> Result<(), AppError> {
	segment(options)
}

/// Load an image, cluster it, and write the outputs selected by the given options
fn segment(options: &Options) -> Result<(), AppError> {
	// Input
	let img = time!("Image loading", load_image(&options.image))?;
	let img = generate_thumbnail(img, options.max_pixels);
	let grid = PixelGrid::from(img.into_rgb8());

	let seed = options.seed.unwrap_or_else(clock_seed);
	debug!("Using seed {seed}");

	let cluster_options = ClusterOptions {
		attempts: options.attempts,
		epsilon: options.epsilon,
		max_iterations: options.max_iter,
		visualize: options.visualize,
		seed,
		empty_cluster: options.empty_cluster.into(),
	};

	if let Some(clusters) = &options.sweep {
		return sweep(&grid, clusters.clone(), &cluster_options, options);
	}

	// Processing
	let segmentation = time!(
		"k-means",
		pixmeans::cluster_image(&grid, options.k, &cluster_options)
	)?;

	debug!(
		"Best attempt stopped after {} iterations with a total squared error of {}",
		segmentation.iterations, segmentation.error
	);

	// Output
	let output = options
		.output
		.clone()
		.unwrap_or_else(|| PathBuf::from(format!("output_{}.png", options.k)));

	write_outputs(segmentation, &output, options)
}

/// Save the clustered image, then the animation and printed centers if requested.
///
/// The clustered image is written first, so it is kept even if the animation fails.
fn write_outputs(segmentation: Segmentation, output: &Path, options: &Options) -> Result<(), AppError> {
	time!("Image saving", segmentation.image.save(output)).map_err(|source| AppError::Write {
		path: output.to_owned(),
		source,
	})?;

	info!("Wrote the clustered image to {}", output.display());

	if options.visualize {
		write_animation(segmentation.frames, &options.visualize_path, options.fps)?;
	}

	if let Some(format) = options.centers {
		print_centers(&segmentation.centers, format, options.colorize);
	}

	Ok(())
}

/// Cluster the image once for every number of clusters in `clusters`
/// and write the clustered images as one animation.
///
/// A failed clustering is reported and leaves no frame.
fn sweep(
	grid: &PixelGrid,
	clusters: RangeInclusive<u8>,
	cluster_options: &ClusterOptions,
	options: &Options,
) -> Result<(), AppError> {
	let mut frames = Vec::new();

	for k in clusters {
		info!("Running with {k} clusters");
		match time!("k-means", pixmeans::cluster_image(grid, k, cluster_options)) {
			Ok(segmentation) => frames.push(segmentation.image),
			Err(e) => error!("Image clustering failed for {k} clusters: {e}"),
		}
	}

	write_animation(frames, &options.sweep_path, options.sweep_fps)
}

/// Seed derived from the current time, used when no seed is given
// only the low bits vary between runs
#[allow(clippy::cast_possible_truncation)]
fn clock_seed() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map_or(0, |elapsed| elapsed.as_nanos() as u64)
}

/// Load the image at the given path
#[cfg(feature = "avif")]
fn load_image(path: &Path) -> Result<DynamicImage, AppError> {
	if path.extension().map_or(false, |ext| ext == "avif") {
		let buf = std::fs::read(path).map_err(|e| AppError::AvifLoad(e.to_string()))?;
		libavif_image::read(&buf).map_err(|e| AppError::AvifLoad(e.to_string()))
	} else {
		image::open(path).map_err(AppError::ImageLoad)
	}
}

/// Load the image at the given path
#[cfg(not(feature = "avif"))]
fn load_image(path: &Path) -> Result<DynamicImage, AppError> {
	image::open(path).map_err(AppError::ImageLoad)
}

/// Create a thumbnail with at most `max_pixels` pixels if the image has more than `max_pixels` pixels
fn generate_thumbnail(image: DynamicImage, max_pixels: u32) -> DynamicImage {
	// The number of pixels should be < u64::MAX, since image dimensions are (u32, u32)
	let (width, height) = image.dimensions();
	let pixels = u64::from(width) * u64::from(height);
	if pixels <= u64::from(max_pixels) {
		debug!("Skipping image thumbnail since pixels was below max pixels");
		image
	} else {
		// (u64 as f64) only gives innaccurate results for very large u64
		#[allow(clippy::cast_precision_loss)]
		let scale = (f64::from(max_pixels) / pixels as f64).sqrt();

		// multiplying by a positive factor < 1
		#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
		let (thumb_width, thumb_height) = (
			(f64::from(width) * scale) as u32,
			(f64::from(height) * scale) as u32,
		);

		debug!("Creating a thumbnail with dimensions {thumb_width}x{thumb_height}");

		time!("Image thumbnail", image.thumbnail(thumb_width, thumb_height))
	}
}

/// Write `frames` as a looping GIF to `path`, playing `fps` frames per second
fn write_animation(frames: Vec<RgbImage>, path: &Path, fps: u16) -> Result<(), AppError> {
	if frames.is_empty() {
		warn!("No frames to write to {}", path.display());
		return Ok(());
	}

	let count = frames.len();
	let file = File::create(path).map_err(|source| AppError::Create { path: path.to_owned(), source })?;

	time!("Animation encoding", encode_animation(BufWriter::new(file), frames, fps)).map_err(|source| {
		AppError::Write { path: path.to_owned(), source }
	})?;

	info!("Wrote {count} frames to {}", path.display());
	Ok(())
}

/// Encode `frames` as a looping GIF into `writer`
fn encode_animation(writer: impl Write, frames: Vec<RgbImage>, fps: u16) -> ImageResult<()> {
	let delay = Delay::from_numer_denom_ms(1000, u32::from(fps));

	let mut encoder = GifEncoder::new(writer);
	encoder.set_repeat(Repeat::Infinite)?;
	encoder.encode_frames(
		frames
			.into_iter()
			.map(|frame| Frame::from_parts(DynamicImage::ImageRgb8(frame).into_rgba8(), 0, 0, delay)),
	)
}

/// Truncate the finite centers to 8 bit colors, matching the clustered image
// channels of finite centers are averages of u8 values
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn center_colors(centers: &[Center]) -> Vec<Srgb<u8>> {
	centers
		.iter()
		.filter(|center| center.red.is_finite() && center.green.is_finite() && center.blue.is_finite())
		.map(|center| Srgb::new(center.red as u8, center.green as u8, center.blue as u8))
		.collect()
}

/// Print the given centers in the given format
fn print_centers(centers: &[Center], format: FormatOutput, colorize: Option<ColorizeOutput>) {
	let colors = center_colors(centers);
	if colors.len() < centers.len() {
		warn!("Skipping {} empty clusters", centers.len() - colors.len());
	}

	println!("{}", format_centers(&colors, format, colorize));
}

/// Format, and optionally colorize, the text for all colors
fn format_centers(colors: &[Srgb<u8>], format: FormatOutput, colorize: Option<ColorizeOutput>) -> String {
	match format {
		FormatOutput::Hex => color_format(colors, colorize, " ", |color| format!("{color:X}")),

		FormatOutput::Rgb => color_format(colors, colorize, " ", |color| {
			format!("({},{},{})", color.red, color.green, color.blue)
		}),

		FormatOutput::Swatch => format_colors(colors, "", |color| {
			"   ".on_truecolor(color.red, color.green, color.blue).to_string()
		}),
	}
}

/// Format a line of colors using the given format
fn format_colors(colors: &[Srgb<u8>], delimiter: &str, format: impl Fn(Srgb<u8>) -> String) -> String {
	colors
		.iter()
		.map(|&color| format(color))
		.collect::<Vec<_>>()
		.join(delimiter)
}

/// Format the text for all colors and then colorize it
fn color_format(
	colors: &[Srgb<u8>],
	colorize: Option<ColorizeOutput>,
	delimiter: &str,
	format: impl Fn(Srgb<u8>) -> String,
) -> String {
	match colorize {
		Some(ColorizeOutput::Fg) => format_colors(colors, delimiter, |color| {
			format(color).truecolor(color.red, color.green, color.blue).to_string()
		}),

		Some(ColorizeOutput::Bg) => format_colors(colors, delimiter, |color| {
			format(color).on_truecolor(color.red, color.green, color.blue).to_string()
		}),

		None => format_colors(colors, delimiter, format),
	}
}
