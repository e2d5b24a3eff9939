use anyhow::{Context, Result};
use image::DynamicImage;
use lungscan_core::{http::PredictionResponse, is_detected, LABELS};

use crate::{
	explain::{self, Explainer, GradCam},
	helpers::image_to_dataurl,
	model::Classifier,
	overlay::render_overlay,
	preprocess::Preprocessed,
};

/// The classifier together with the explainer used for its detections.
pub struct Pipeline {
	classifier: Classifier,
	explainer: Box<dyn Explainer>,
}

impl Pipeline {
	pub fn new(classifier: Classifier) -> Self {
		Self::with_explainer(classifier, GradCam)
	}

	pub fn with_explainer(classifier: Classifier, explainer: impl Explainer + 'static) -> Self {
		Self {
			classifier,
			explainer: Box::new(explainer),
		}
	}

	pub const fn classifier(&self) -> &Classifier {
		&self.classifier
	}

	/// Run classification and explanation over an already decoded image.
	///
	/// # Errors
	///
	/// Returns an error if inference, explanation or encoding fails.
	pub fn run(&self, input: &Preprocessed) -> Result<PredictionResponse> {
		let confidences = self
			.classifier
			.predict(&input.tensor)
			.context("Failed to run classifier")?;
		tracing::debug!("Confidences: {confidences:?}");

		let (width, height) = input.gray.dimensions();
		let mut overlays = Vec::new();
		for (index, (label, &confidence)) in LABELS.iter().zip(&confidences).enumerate() {
			if !is_detected(confidence) {
				continue;
			}

			tracing::debug!("Explaining {} ({confidence:.3})", label.name);
			let saliency = self
				.explainer
				.saliency(&self.classifier, &input.tensor, index)
				.with_context(|| format!("Failed to explain {}", label.name))?;

			let overlay = render_overlay(
				&input.gray,
				&explain::fit(&saliency, width, height),
				label.color,
			);
			overlays.push(image_to_dataurl(&DynamicImage::ImageRgb8(overlay))?);
		}

		let original = image_to_dataurl(&DynamicImage::ImageRgb8(input.original.clone()))?;

		Ok(PredictionResponse::new(&confidences, overlays, original)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use base64::{engine::general_purpose::STANDARD as Base64, Engine};
	use image::{Luma, Rgb, RgbImage};
	use std::sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	};
	use tch::{Device, Tensor};

	use crate::explain::SaliencyMap;

	/// Hot in the top-left quadrant, and counts how often it's asked.
	#[derive(Clone, Default)]
	struct QuadrantExplainer {
		calls: Arc<AtomicUsize>,
	}

	impl Explainer for QuadrantExplainer {
		fn saliency(&self, _: &Classifier, _: &Tensor, _: usize) -> Result<SaliencyMap> {
			self.calls.fetch_add(1, Ordering::SeqCst);

			Ok(SaliencyMap::from_fn(224, 224, |x, y| {
				Luma([if x < 112 && y < 112 { 1.0 } else { 0.0 }])
			}))
		}
	}

	fn xray(width: u32, height: u32) -> Preprocessed {
		let image = RgbImage::from_fn(width, height, |x, y| {
			#[allow(clippy::cast_possible_truncation)]
			let v = ((x + y) % 256) as u8;
			Rgb([v, v, v])
		});

		Preprocessed::new(&DynamicImage::ImageRgb8(image), Device::Cpu)
	}

	fn decode(dataurl: &str) -> RgbImage {
		let payload = dataurl.strip_prefix("data:image/png;base64,").unwrap();

		image::load_from_memory(&Base64.decode(payload).unwrap())
			.unwrap()
			.to_rgb8()
	}

	#[test]
	fn one_overlay_per_detection() {
		let explainer = QuadrantExplainer::default();
		let pipeline =
			Pipeline::with_explainer(Classifier::new(LABELS.len(), Device::Cpu), explainer.clone());
		let input = xray(300, 200);

		let response = pipeline.run(&input).unwrap();

		assert_eq!(response.predictions.len(), LABELS.len());
		for prediction in &response.predictions {
			assert!((0.0..=1.0).contains(&prediction.confidence));
			assert_eq!(prediction.detected, prediction.confidence > 0.5);
		}
		assert_eq!(response.overlay_images.len(), response.total_detections);
		assert_eq!(response.detected_diseases.len(), response.total_detections);
		assert_eq!(explainer.calls.load(Ordering::SeqCst), response.total_detections);

		for overlay in &response.overlay_images {
			assert_eq!(decode(&overlay.image).dimensions(), (300, 200));
		}
		assert_eq!(decode(&response.original_image).dimensions(), (300, 200));
	}

	#[test]
	fn repeated_runs_are_identical() {
		let pipeline = Pipeline::new(Classifier::new(LABELS.len(), Device::Cpu));
		let input = xray(64, 64);

		assert_eq!(pipeline.run(&input).unwrap(), pipeline.run(&input).unwrap());
	}
}
