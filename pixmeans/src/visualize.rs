//! Recording the intermediate states of a k-means attempt

use crate::{reconstruct::apply_labels, Center, LabelGrid};
use image::RgbImage;

/// Collects one reconstructed frame per iteration of an attempt.
///
/// A disabled recorder does no work and yields no frames.
pub(crate) struct FrameRecorder {
	/// Frames so far, `None` when recording is disabled
	frames: Option<Vec<RgbImage>>,
}

impl FrameRecorder {
	/// Create a recorder that records only if `enabled`
	pub(crate) fn new(enabled: bool) -> Self {
		Self { frames: enabled.then(Vec::new) }
	}

	/// Append the image described by the current labels and centers
	pub(crate) fn record(&mut self, labels: &LabelGrid, centers: &[Center]) {
		if let Some(frames) = &mut self.frames {
			frames.push(apply_labels(labels, centers));
		}
	}

	/// The recorded frames in iteration order
	pub(crate) fn into_frames(self) -> Vec<RgbImage> {
		self.frames.unwrap_or_default()
	}
}
