use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::labels::{is_detected, LABELS};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Prediction {
	/// Label name
	pub disease: String,
	/// Independent probability that the finding is present
	pub confidence: f32,
	/// Whether the confidence is above the detection threshold
	pub detected: bool,
	/// Display color, as a CSS `rgb()` string
	pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OverlayImage {
	/// Label the overlay explains
	pub disease: String,
	/// PNG data URL
	pub image: String,
	/// Confidence for this label
	pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PredictionResponse {
	pub success: bool,
	/// One entry per label, in label order
	pub predictions: Vec<Prediction>,
	/// Names of the detected labels, in label order
	pub detected_diseases: Vec<String>,
	/// One overlay per detected label
	pub overlay_images: Vec<OverlayImage>,
	/// The uploaded image, re-encoded as a PNG data URL
	pub original_image: String,
	pub total_detections: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
	#[error("Expected {expected} confidences, got {actual}")]
	LabelCount { expected: usize, actual: usize },

	#[error("Got {overlays} overlays for {detected} detected labels")]
	OverlayCount { detected: usize, overlays: usize },
}

impl PredictionResponse {
	/// Assemble the payload from a confidence vector and the encoded overlays of the detected labels, in label order.
	///
	/// # Errors
	///
	/// Returns an error if the confidence vector doesn't match the label set, or if there isn't exactly one overlay per detected label.
	pub fn new(
		confidences: &[f32],
		overlays: Vec<String>,
		original_image: String,
	) -> Result<Self, ResponseError> {
		if confidences.len() != LABELS.len() {
			return Err(ResponseError::LabelCount {
				expected: LABELS.len(),
				actual: confidences.len(),
			});
		}

		let predictions = LABELS
			.iter()
			.zip(confidences)
			.map(|(label, &confidence)| Prediction {
				disease: label.name.to_string(),
				confidence,
				detected: is_detected(confidence),
				color: label.css_color(),
			})
			.collect::<Vec<_>>();

		let detected = predictions
			.iter()
			.filter(|prediction| prediction.detected)
			.collect::<Vec<_>>();

		if detected.len() != overlays.len() {
			return Err(ResponseError::OverlayCount {
				detected: detected.len(),
				overlays: overlays.len(),
			});
		}

		let overlay_images = detected
			.iter()
			.zip(overlays)
			.map(|(prediction, image)| OverlayImage {
				image,
				disease: prediction.disease.clone(),
				confidence: prediction.confidence,
			})
			.collect();

		let detected_diseases = detected
			.iter()
			.map(|prediction| prediction.disease.clone())
			.collect::<Vec<_>>();

		Ok(Self {
			success: true,
			total_detections: detected_diseases.len(),
			predictions,
			detected_diseases,
			overlay_images,
			original_image,
		})
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ErrorResponse {
	pub detail: String,
}
