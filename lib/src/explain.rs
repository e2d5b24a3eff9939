use anyhow::Result;
use image::{imageops::FilterType, ImageBuffer, Luma};
use tch::{Device, Kind, Tensor};

use crate::{model::Classifier, preprocess::INPUT_SIZE};

/// Single-channel importance map with values in `[0, 1]`.
pub type SaliencyMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Something that can tell which regions of an input drove a label's score.
pub trait Explainer: Send {
	/// Compute a saliency map for `target` over a `[1, 3, H, W]` input. The map is `W`x`H`.
	///
	/// # Errors
	///
	/// Returns an error if the map can't be computed.
	fn saliency(&self, model: &Classifier, input: &Tensor, target: usize) -> Result<SaliencyMap>;
}

/// Gradient-weighted class activation mapping over the last residual block.
#[derive(Debug, Default, Clone, Copy)]
pub struct GradCam;

impl Explainer for GradCam {
	fn saliency(&self, model: &Classifier, input: &Tensor, target: usize) -> Result<SaliencyMap> {
		anyhow::ensure!(
			target < model.num_labels(),
			"Label index {target} is out of range for {} labels",
			model.num_labels()
		);

		// Gradients are only taken w.r.t. this detached copy, so nothing accumulates on the weights.
		let activations = model.features(input).detach().set_requires_grad(true);
		let logits = model.head(&activations);
		#[allow(clippy::cast_possible_wrap)]
		let score = logits.get(0).get(target as i64);

		let gradients = Tensor::run_backward(&[&score], &[&activations], false, false);
		let gradients = gradients
			.first()
			.ok_or_else(|| anyhow::anyhow!("No gradient for the target layer"))?;

		let cam = tch::no_grad(|| {
			let weights = gradients.mean_dim([2i64, 3].as_slice(), true, Kind::Float);

			(weights * &activations)
				.sum_dim_intlist([1i64].as_slice(), false, Kind::Float)
				.relu()
				.squeeze_dim(0)
		});

		let size = cam.size();
		let [height, width] = size.as_slice() else {
			anyhow::bail!("Expected a 2D activation map, got shape {size:?}");
		};

		let values = Vec::<f32>::try_from(&cam.flatten(0, -1).to_device(Device::Cpu))?;
		let map = SaliencyMap::from_raw(u32::try_from(*width)?, u32::try_from(*height)?, normalize(values))
			.ok_or_else(|| anyhow::anyhow!("Activation map has the wrong number of values"))?;

		tracing::debug!("Computed {width}x{height} activation map for label {target}");

		let input_size = input.size();
		let (input_height, input_width) = match input_size.as_slice() {
			[.., h, w] => (u32::try_from(*h)?, u32::try_from(*w)?),
			_ => (INPUT_SIZE, INPUT_SIZE),
		};

		Ok(fit(&map, input_width, input_height))
	}
}

/// Shift a map so its minimum is zero, then scale it into `[0, 1]`.
fn normalize(mut values: Vec<f32>) -> Vec<f32> {
	let min = values.iter().copied().fold(f32::INFINITY, f32::min);
	values.iter_mut().for_each(|v| *v -= min);

	let max = values.iter().copied().fold(0f32, f32::max);
	values.iter_mut().for_each(|v| *v /= max + 1e-7);

	values
}

/// Bilinearly resize a saliency map, keeping values in `[0, 1]`.
#[must_use]
pub fn fit(map: &SaliencyMap, width: u32, height: u32) -> SaliencyMap {
	if map.dimensions() == (width, height) {
		return map.clone();
	}

	let mut resized = image::imageops::resize(map, width, height, FilterType::Triangle);
	resized.pixels_mut().for_each(|p| p[0] = p[0].clamp(0.0, 1.0));

	resized
}
