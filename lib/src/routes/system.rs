use std::sync::{atomic::Ordering, Arc};

use aide::{
	axum::{
		routing::{get, post},
		ApiRouter,
	},
	openapi::OpenApi,
};
use axum::{Extension, Json};
use schemars::JsonSchema;

use crate::{
	runner::{Health, Runner, RUNNER_HEALTH},
	shutdown::Agent as Shutdown,
};

pub fn handler() -> ApiRouter {
	ApiRouter::new()
		.api_route("/", get(root))
		.api_route("/health-check", get(health_check))
		.api_route("/shutdown", post(shutdown))
}

#[derive(Debug, serde::Serialize, JsonSchema)]
pub struct RootResponse {
	/// Liveness message
	pub message: String,
	/// Relative URL to OpenAPI specification
	pub docs_url: String,
}

#[allow(clippy::unused_async)]
pub async fn root() -> Json<RootResponse> {
	Json(RootResponse {
		message: "Lung Disease Detection API is running".to_string(),
		docs_url: "/openapi.json".to_string(),
	})
}

#[derive(Debug, serde::Serialize, JsonSchema)]
pub struct HealthCheckSetup {
	/// Setup status
	pub status: String,
	/// When the last model load started
	pub started_at: Option<String>,
	/// When the last model load finished
	pub completed_at: Option<String>,
	/// Why the last model load failed
	pub error: Option<String>,
}

#[derive(Debug, serde::Serialize, JsonSchema)]
pub struct HealthCheck {
	/// Current health status
	pub status: Health,
	/// Setup information
	pub setup: HealthCheckSetup,
}

pub async fn health_check(Extension(runner): Extension<Runner>) -> Json<HealthCheck> {
	let setup = runner.setup().await;

	let status = match (&setup.completed_at, &setup.error) {
		(None, _) => "starting",
		(Some(_), None) => "succeeded",
		(Some(_), Some(_)) => "failed",
	};

	Json(HealthCheck {
		status: RUNNER_HEALTH.load(Ordering::SeqCst),
		setup: HealthCheckSetup {
			status: status.to_string(),
			started_at: setup.started_at.map(|t| t.to_rfc3339()),
			completed_at: setup.completed_at.map(|t| t.to_rfc3339()),
			error: setup.error,
		},
	})
}

pub async fn shutdown(Extension(shutdown): Extension<Shutdown>) -> Json<String> {
	shutdown.start().await;

	Json(String::new())
}

#[allow(clippy::unused_async)]
pub async fn openapi(Extension(api): Extension<Arc<OpenApi>>) -> Json<OpenApi> {
	Json(api.as_ref().clone())
}
