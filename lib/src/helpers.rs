use std::{
	io::Cursor,
	time::{Duration, Instant},
};

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD as Base64, Engine};
use image::{DynamicImage, ImageOutputFormat};

pub fn base64_encode<T: AsRef<[u8]>>(bytes: T) -> String {
	Base64.encode(bytes)
}

pub fn with_timing<T>(cb: impl FnOnce() -> T) -> (T, Duration) {
	let start = Instant::now();
	let result = cb();

	(result, start.elapsed())
}

/// Encode an image as a PNG data URL.
///
/// # Errors
///
/// Returns an error if the image can't be encoded.
pub fn image_to_dataurl(image: &DynamicImage) -> Result<String> {
	let mut png = Cursor::new(Vec::new());
	image.write_to(&mut png, ImageOutputFormat::Png)?;

	Ok(format!(
		"data:image/png;base64,{}",
		base64_encode(png.into_inner())
	))
}
