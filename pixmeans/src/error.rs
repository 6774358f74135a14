//! Error type shared by the clustering entry points

use thiserror::Error;

/// Reasons a clustering run could not be performed
///
/// Every variant is detected before any clustering work starts,
/// so an error never comes with a partial result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
	/// The pixel grid does not have exactly 3 channels
	#[error("only 3 channel images are supported, got {0} channels")]
	UnsupportedChannels(usize),

	/// The pixel grid is not 2 dimensional
	#[error("only 2D pixel grids are supported, got {0} dimensions")]
	UnsupportedDimensions(usize),

	/// The requested number of clusters was 0
	#[error("the number of clusters must be at least 1")]
	NoClusters,

	/// The pixel grid has no pixels to draw initial centers from
	#[error("the image has no pixels")]
	EmptyImage,

	/// A dimension of the pixel grid does not fit in a `u32`
	#[error("image dimensions {width}x{height} are too large")]
	TooLarge {
		/// Number of columns
		width: usize,
		/// Number of rows
		height: usize,
	},

	/// The pixel buffer length does not match the shape and channel count
	#[error("pixel buffer length {len} does not match the expected length {expected}")]
	ShapeMismatch {
		/// Length of the provided buffer
		len: usize,
		/// Length implied by the shape and channel count
		expected: usize,
	},
}

impl ClusterError {
	/// Whether this error comes from an input that k-means does not support
	/// (as opposed to a malformed pixel buffer)
	#[must_use]
	pub const fn is_invalid_input(&self) -> bool {
		!matches!(self, Self::ShapeMismatch { .. })
	}
}
