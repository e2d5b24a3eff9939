use aide::{
	axum::{routing::post, ApiRouter},
	OperationInput,
};
use async_trait::async_trait;
use axum::{
	body::Body,
	extract::{FromRequest, Multipart},
	http::{Request, StatusCode},
	Extension, Json,
};
use lungscan_core::http::PredictionResponse;

use crate::{errors::HTTPError, runner::Runner, upload::TempUpload};

/// Name of the multipart field carrying the image.
const FILE_FIELD: &str = "file";

pub fn handler() -> ApiRouter {
	ApiRouter::new().api_route("/predict", post(predict))
}

async fn predict(
	Extension(runner): Extension<Runner>,
	ImageUpload(upload): ImageUpload,
) -> Result<Json<PredictionResponse>, HTTPError> {
	tracing::debug!("Received {} prediction request", upload.mime_type());

	let (response, predict_time) = runner.run(upload).await?;

	tracing::info!(
		"Prediction complete in {:.2}s with {} detection(s)",
		predict_time.as_secs_f64(),
		response.total_detections
	);

	Ok(Json(response))
}

/// The image from a multipart upload, checked against both its declared and its actual type.
#[derive(Debug)]
pub struct ImageUpload(pub TempUpload);

#[async_trait]
impl<S: Send + Sync> FromRequest<S, Body> for ImageUpload {
	type Rejection = HTTPError;

	async fn from_request(req: Request<Body>, state: &S) -> Result<Self, Self::Rejection> {
		let mut multipart = Multipart::from_request(req, state)
			.await
			.map_err(|e| HTTPError::new(&e.body_text()).with_status(e.status()))?;

		while let Some(field) = multipart
			.next_field()
			.await
			.map_err(|e| HTTPError::new(&e.to_string()).with_status(StatusCode::BAD_REQUEST))?
		{
			if field.name() != Some(FILE_FIELD) {
				continue;
			}

			if !field
				.content_type()
				.is_some_and(|content_type| content_type.starts_with("image/"))
			{
				tracing::debug!("Rejecting upload with content type {:?}", field.content_type());
				return Err(HTTPError::new("File must be an image").with_status(StatusCode::BAD_REQUEST));
			}

			let bytes = field
				.bytes()
				.await
				.map_err(|e| HTTPError::new(&e.to_string()).with_status(StatusCode::BAD_REQUEST))?;

			let upload = TempUpload::new(&bytes).map_err(|e| {
				tracing::error!("Failed to store upload: {e}");
				HTTPError::new("Failed to store upload").with_status(StatusCode::INTERNAL_SERVER_ERROR)
			})?;

			if !upload.is_image() {
				tracing::debug!("Upload declared as an image but looks like {}", upload.mime_type());
				return Err(HTTPError::new("File must be an image").with_status(StatusCode::BAD_REQUEST));
			}

			return Ok(Self(upload));
		}

		Err(HTTPError::new(&format!(
			"Missing multipart field \"{FILE_FIELD}\""
		)))
	}
}

impl OperationInput for ImageUpload {}
