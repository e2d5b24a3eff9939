use aide::OperationOutput;
use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use lungscan_core::http::ErrorResponse;

use crate::runner::Error as RunnerError;

#[derive(Debug)]
pub struct HTTPError {
	detail: String,
	status_code: StatusCode,
}

impl HTTPError {
	pub fn new(detail: &str) -> Self {
		Self {
			detail: detail.to_string(),
			status_code: StatusCode::UNPROCESSABLE_ENTITY,
		}
	}

	pub const fn with_status(mut self, status_code: StatusCode) -> Self {
		self.status_code = status_code;
		self
	}
}

impl IntoResponse for HTTPError {
	fn into_response(self) -> Response {
		(
			self.status_code,
			Json(ErrorResponse {
				detail: self.detail,
			}),
		)
			.into_response()
	}
}

impl OperationOutput for HTTPError {
	type Inner = Self;
}

impl From<RunnerError> for HTTPError {
	fn from(e: RunnerError) -> Self {
		let status_code = match e {
			RunnerError::InvalidImage(_) => StatusCode::BAD_REQUEST,
			RunnerError::Model(_) | RunnerError::Prediction(_) | RunnerError::Unavailable => {
				StatusCode::INTERNAL_SERVER_ERROR
			},
		};

		Self::new(&e.to_string()).with_status(status_code)
	}
}
