//! Turning labels back into an image

use crate::{Center, LabelGrid};
use image::{Rgb, RgbImage};

/// Truncate a center to 8-bit channels.
///
/// `as` truncates toward zero and saturates, so `NaN` centers become black.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn truncate(center: Center) -> Rgb<u8> {
	Rgb([center.red as u8, center.green as u8, center.blue as u8])
}

/// Create an image where each pixel has the color of the center its label points to.
///
/// The output has the same dimensions as `labels`.
///
/// # Panics
/// Panics if a label is not a valid index into `centers`.
#[must_use]
pub fn apply_labels(labels: &LabelGrid, centers: &[Center]) -> RgbImage {
	let palette = centers.iter().copied().map(truncate).collect::<Vec<_>>();

	let mut image = RgbImage::new(labels.width(), labels.height());
	for (pixel, &label) in image.pixels_mut().zip(labels.as_slice()) {
		*pixel = palette[usize::from(label)];
	}

	image
}
