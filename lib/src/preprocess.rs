use std::path::Path;

use image::{imageops::FilterType, io::Reader as ImageReader, DynamicImage, ImageError, Rgb, RgbImage};
use imageproc::map::map_colors;
use tch::{Device, Tensor};

/// Side length of the square classifier input.
pub const INPUT_SIZE: u32 = 224;

/// Per-channel mean and standard deviation the classifier was trained with.
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// A decoded upload, ready for inference and overlay rendering.
#[derive(Debug)]
pub struct Preprocessed {
	/// The upload as RGB, at its original resolution.
	pub original: RgbImage,
	/// Grayscale copy of the upload, expanded to three channels.
	pub gray: RgbImage,
	/// `[1, 3, 224, 224]` normalized input.
	pub tensor: Tensor,
}

impl Preprocessed {
	/// Decode an image file, sniffing its format from the contents.
	///
	/// # Errors
	///
	/// Returns an error if the file can't be read or isn't a supported image.
	pub fn from_path(path: &Path, device: Device) -> Result<Self, ImageError> {
		let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;

		Ok(Self::new(&image, device))
	}

	pub fn new(image: &DynamicImage, device: Device) -> Self {
		let original = image.to_rgb8();
		let gray = grayscale(&original);

		tracing::debug!(
			"Decoded {}x{} image",
			original.width(),
			original.height()
		);

		Self {
			tensor: to_tensor(&original).to_device(device),
			original,
			gray,
		}
	}
}

/// BT.601 luma (`0.299 R + 0.587 G + 0.114 B`), repeated over three channels.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn grayscale(image: &RgbImage) -> RgbImage {
	map_colors(image, |Rgb([r, g, b])| {
		let luma = 0.299f32
			.mul_add(f32::from(r), 0.587f32.mul_add(f32::from(g), 0.114 * f32::from(b)))
			.round()
			.clamp(0.0, 255.0) as u8;

		Rgb([luma; 3])
	})
}

/// Resize to the classifier input size and normalize into a CHW tensor with a batch dimension.
fn to_tensor(image: &RgbImage) -> Tensor {
	let resized = image::imageops::resize(image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

	let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
	let mut chw = vec![0f32; 3 * plane];
	for (i, pixel) in resized.pixels().enumerate() {
		for c in 0..3 {
			chw[c * plane + i] = (f32::from(pixel[c]) / 255.0 - MEAN[c]) / STD[c];
		}
	}

	let size = i64::from(INPUT_SIZE);
	Tensor::from_slice(&chw).view([1, 3, size, size])
}
