use std::{net::SocketAddr, sync::Arc};

use aide::openapi::{self, OpenApi};
use anyhow::Result;
use axum::{routing::get, Extension, Server};
use lungscan_core::{labels::validate_labels, LABELS};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{config::Config, routes, runner::Runner, shutdown::Shutdown};

/// Load the model and serve predictions until a shutdown is requested.
///
/// # Errors
///
/// Returns an error if the label table is invalid, a shutdown handler already exists, or the server fails to start.
pub async fn start(config: Config) -> Result<()> {
	validate_labels(&LABELS)?;

	let shutdown = Shutdown::new()?;
	let runner = Runner::new(config.model_path.clone(), config.device());

	let mut openapi = generate_schema();
	let router = routes::handler()
		.finish_api(&mut openapi)
		.route("/openapi.json", get(routes::system::openapi))
		.layer(runner.extension())
		.layer(shutdown.extension())
		.layer(Extension(Arc::new(openapi)))
		.layer(CorsLayer::permissive())
		.layer(TraceLayer::new_for_http());

	let addr = SocketAddr::from((config.host, config.port));

	tracing::info!("Starting server on {addr}...");
	Server::bind(&addr)
		.serve(router.into_make_service())
		.with_graceful_shutdown(shutdown.handle())
		.await?;

	Ok(())
}

fn generate_schema() -> OpenApi {
	OpenApi {
		info: openapi::Info {
			title: "Lung Disease Detection API".to_string(),
			version: env!("CARGO_PKG_VERSION").to_string(),
			..openapi::Info::default()
		},
		..OpenApi::default()
	}
}
