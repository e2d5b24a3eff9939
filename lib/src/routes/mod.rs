use aide::axum::ApiRouter;

pub mod predict;
pub mod system;

pub fn handler() -> ApiRouter {
	ApiRouter::new()
		.merge(system::handler())
		.merge(predict::handler())
}

#[cfg(test)]
mod tests {
	use super::*;
	use aide::openapi::OpenApi;
	use axum::{
		body::Body,
		http::{header, Request, StatusCode},
		Router,
	};
	use image::{DynamicImage, ImageOutputFormat, RgbImage};
	use serde_json::Value;
	use std::{env::temp_dir, io::Cursor, path::PathBuf};
	use tch::Device;
	use tower::ServiceExt;
	use uuid::Uuid;

	use crate::runner::Runner;

	const BOUNDARY: &str = "lungscan-test-boundary";

	fn missing_checkpoint() -> PathBuf {
		temp_dir().join(format!("{}.safetensors", Uuid::new_v4()))
	}

	fn app(model_path: PathBuf) -> Router {
		handler()
			.finish_api(&mut OpenApi::default())
			.layer(Runner::new(model_path, Device::Cpu).extension())
	}

	fn png_bytes() -> Vec<u8> {
		let mut bytes = Cursor::new(Vec::new());
		DynamicImage::ImageRgb8(RgbImage::new(16, 16))
			.write_to(&mut bytes, ImageOutputFormat::Png)
			.unwrap();

		bytes.into_inner()
	}

	fn upload(field: &str, content_type: &str, bytes: &[u8]) -> Request<Body> {
		let mut body = format!(
			"--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"scan\"\r\nContent-Type: {content_type}\r\n\r\n"
		)
		.into_bytes();
		body.extend_from_slice(bytes);
		body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

		Request::post("/predict")
			.header(
				header::CONTENT_TYPE,
				format!("multipart/form-data; boundary={BOUNDARY}"),
			)
			.body(Body::from(body))
			.unwrap()
	}

	async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
		let response = app.oneshot(request).await.unwrap();
		let status = response.status();
		let body = hyper::body::to_bytes(response.into_body()).await.unwrap();

		(status, serde_json::from_slice(&body).unwrap())
	}

	#[tokio::test]
	async fn root_reports_liveness() {
		let request = Request::get("/").body(Body::empty()).unwrap();

		let (status, body) = send(app(missing_checkpoint()), request).await;

		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["message"], "Lung Disease Detection API is running");
		assert_eq!(body["docs_url"], "/openapi.json");
	}

	#[tokio::test]
	async fn non_image_content_type_is_rejected() {
		let request = upload("file", "text/plain", b"hello");

		let (status, body) = send(app(missing_checkpoint()), request).await;

		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(body["detail"], "File must be an image");
	}

	#[tokio::test]
	async fn mislabeled_text_is_rejected() {
		let request = upload("file", "image/png", b"this is plain text pretending to be a png");

		let (status, body) = send(app(missing_checkpoint()), request).await;

		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(body["detail"], "File must be an image");
	}

	#[tokio::test]
	async fn missing_field_is_unprocessable() {
		let request = upload("image", "image/png", &png_bytes());

		let (status, _) = send(app(missing_checkpoint()), request).await;

		assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
	}

	#[tokio::test]
	async fn missing_checkpoint_is_a_server_error() {
		let model_path = missing_checkpoint();
		let request = upload("file", "image/png", &png_bytes());

		let (status, body) = send(app(model_path.clone()), request).await;

		assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
		let detail = body["detail"].as_str().unwrap();
		assert!(detail.starts_with("Model checkpoint not found"));
		assert!(!detail.contains(&*model_path.to_string_lossy()));
	}
}
