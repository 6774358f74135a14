//! Pixel and label grids

use crate::ClusterError;
use image::{DynamicImage, RgbImage};
use palette::Srgb;

/// A cluster center.
///
/// The components are on the same `0.0..=255.0` scale as the 8-bit pixel channels,
/// not the `0.0..=1.0` range `palette` normally uses for floating point colors.
pub type Center = Srgb<f32>;

/// A grid of 8-bit pixels in row-major order.
///
/// The shape can have any number of dimensions and the pixels any number of channels,
/// but k-means only accepts 2D grids with 3 channels.
/// Other grids are rejected when clustering starts rather than here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelGrid {
	/// Length of each dimension, outermost first (rows, then columns for 2D)
	shape: Vec<usize>,
	/// Number of channels per pixel
	channels: usize,
	/// Channel values
	data: Vec<u8>,
}

/// A validated 2D, 3 channel view into a [`PixelGrid`]
pub(crate) struct RgbView<'a> {
	/// Number of columns
	pub(crate) width: u32,
	/// Number of rows
	pub(crate) height: u32,
	/// Pixels in row-major order
	pub(crate) pixels: &'a [Srgb<u8>],
}

impl PixelGrid {
	/// Create a grid from its shape, channel count, and row-major channel data.
	///
	/// # Errors
	/// Returns [`ClusterError::ShapeMismatch`] if `data` does not hold exactly
	/// `product(shape) * channels` values.
	pub fn new(shape: Vec<usize>, channels: usize, data: Vec<u8>) -> Result<Self, ClusterError> {
		let expected = shape
			.iter()
			.try_fold(channels, |len, &dim| len.checked_mul(dim))
			.unwrap_or(usize::MAX);

		if data.len() == expected {
			Ok(Self { shape, channels, data })
		} else {
			Err(ClusterError::ShapeMismatch { len: data.len(), expected })
		}
	}

	/// The length of each dimension
	#[must_use]
	pub fn shape(&self) -> &[usize] {
		&self.shape
	}

	/// The number of channels per pixel
	#[must_use]
	pub const fn channels(&self) -> usize {
		self.channels
	}

	/// The raw channel data
	#[must_use]
	pub fn as_raw(&self) -> &[u8] {
		&self.data
	}

	/// Check that this grid can be clustered and view it as rows of sRGB pixels
	pub(crate) fn rgb(&self) -> Result<RgbView<'_>, ClusterError> {
		if self.channels != 3 {
			return Err(ClusterError::UnsupportedChannels(self.channels));
		}

		let &[height, width] = self.shape.as_slice() else {
			return Err(ClusterError::UnsupportedDimensions(self.shape.len()));
		};

		if width == 0 || height == 0 {
			return Err(ClusterError::EmptyImage);
		}

		match (u32::try_from(width), u32::try_from(height)) {
			(Ok(w), Ok(h)) => Ok(RgbView {
				width: w,
				height: h,
				pixels: palette::cast::from_component_slice(&self.data),
			}),
			_ => Err(ClusterError::TooLarge { width, height }),
		}
	}
}

impl From<RgbImage> for PixelGrid {
	fn from(image: RgbImage) -> Self {
		let (width, height) = image.dimensions();
		Self {
			shape: vec![height as usize, width as usize],
			channels: 3,
			data: image.into_raw(),
		}
	}
}

impl From<&RgbImage> for PixelGrid {
	fn from(image: &RgbImage) -> Self {
		Self::from(image.clone())
	}
}

impl From<&DynamicImage> for PixelGrid {
	/// Keeps the channel count of the image, converting to 8 bits per channel
	fn from(image: &DynamicImage) -> Self {
		let channels = usize::from(image.color().channel_count());
		let data = match channels {
			1 => image.to_luma8().into_raw(),
			2 => image.to_luma_alpha8().into_raw(),
			3 => image.to_rgb8().into_raw(),
			_ => image.to_rgba8().into_raw(),
		};

		Self {
			shape: vec![image.height() as usize, image.width() as usize],
			channels,
			data,
		}
	}
}

/// The cluster index of each pixel, in row-major order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelGrid {
	/// Number of columns
	width: u32,
	/// Number of rows
	height: u32,
	/// Cluster index for each pixel
	labels: Vec<u8>,
}

impl LabelGrid {
	/// Create a grid with every label set to `0`
	pub(crate) fn new(width: u32, height: u32) -> Self {
		Self {
			width,
			height,
			labels: vec![0; width as usize * height as usize],
		}
	}

	/// Create a label grid from row-major labels.
	///
	/// # Errors
	/// Returns [`ClusterError::ShapeMismatch`] if `labels` does not have `width * height` elements.
	pub fn from_raw(width: u32, height: u32, labels: Vec<u8>) -> Result<Self, ClusterError> {
		let expected = width as usize * height as usize;
		if labels.len() == expected {
			Ok(Self { width, height, labels })
		} else {
			Err(ClusterError::ShapeMismatch { len: labels.len(), expected })
		}
	}

	/// Number of columns
	#[must_use]
	pub const fn width(&self) -> u32 {
		self.width
	}

	/// Number of rows
	#[must_use]
	pub const fn height(&self) -> u32 {
		self.height
	}

	/// The label of the pixel at column `x` and row `y`
	#[must_use]
	pub fn get(&self, x: u32, y: u32) -> Option<u8> {
		if x < self.width && y < self.height {
			Some(self.labels[y as usize * self.width as usize + x as usize])
		} else {
			None
		}
	}

	/// All labels in row-major order
	#[must_use]
	pub fn as_slice(&self) -> &[u8] {
		&self.labels
	}

	/// Mutable access to the labels for the assignment step
	pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
		&mut self.labels
	}

	/// Consume the grid, returning the labels
	#[must_use]
	pub fn into_raw(self) -> Vec<u8> {
		self.labels
	}
}
