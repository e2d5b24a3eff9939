use std::{
	panic::{catch_unwind, AssertUnwindSafe},
	path::{Path, PathBuf},
	sync::{atomic::Ordering, Arc},
	time::Duration,
};

use atomic_enum::atomic_enum;
use chrono::{DateTime, Utc};
use lungscan_core::{http::PredictionResponse, LABELS};
use schemars::JsonSchema;
use tch::Device;
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::{
	helpers::with_timing,
	model::{Classifier, ModelError},
	pipeline::Pipeline,
	preprocess::Preprocessed,
	upload::TempUpload,
};

/// How many predictions may wait for the model at once.
const QUEUE_SIZE: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Uploaded file is not a readable image: {0}")]
	InvalidImage(#[from] image::ImageError),

	#[error(transparent)]
	Model(#[from] ModelError),

	#[error("Prediction failed: {0:#}")]
	Prediction(anyhow::Error),

	#[error("Prediction worker is not running")]
	Unavailable,
}

#[atomic_enum]
#[derive(serde::Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
	Unknown,
	Starting,
	Ready,
	Busy,
	SetupFailed,
}

pub static RUNNER_HEALTH: AtomicHealth = AtomicHealth::new(Health::Unknown);

/// Outcome of the most recent attempt to load the model.
#[derive(Debug, Clone, Default)]
pub struct Setup {
	pub started_at: Option<DateTime<Utc>>,
	pub completed_at: Option<DateTime<Utc>>,
	pub error: Option<String>,
}

type ResponseSender = oneshot::Sender<Result<(PredictionResponse, Duration), Error>>;

/// Owns the model on a dedicated blocking thread and feeds it one upload at a time.
#[derive(Clone)]
pub struct Runner {
	setup: Arc<RwLock<Setup>>,
	sender: mpsc::Sender<(ResponseSender, TempUpload)>,
}

impl Runner {
	pub fn new(model_path: PathBuf, device: Device) -> Self {
		RUNNER_HEALTH.swap(Health::Starting, Ordering::SeqCst);

		let (sender, mut rx) = mpsc::channel::<(ResponseSender, TempUpload)>(QUEUE_SIZE);
		let setup = Arc::new(RwLock::new(Setup::default()));

		let worker_setup = setup.clone();
		tokio::task::spawn_blocking(move || {
			let mut pipeline = load(&model_path, device, &worker_setup).ok();

			while let Some((tx, upload)) = rx.blocking_recv() {
				RUNNER_HEALTH.swap(Health::Busy, Ordering::SeqCst);

				let result = match pipeline.take() {
					Some(loaded) => Ok(loaded),
					None => load(&model_path, device, &worker_setup),
				}
				.map_err(Error::from)
				.and_then(|loaded| {
					let result = catch_panic(|| {
						let (result, predict_time) = with_timing(|| predict(&loaded, &upload));
						result.map(|response| (response, predict_time))
					});
					pipeline = Some(loaded);

					result
				});

				drop(upload);
				RUNNER_HEALTH.swap(
					if pipeline.is_some() {
						Health::Ready
					} else {
						Health::SetupFailed
					},
					Ordering::SeqCst,
				);

				if tx.send(result).is_err() {
					tracing::debug!("Prediction finished after its request was dropped");
				}
			}

			tracing::debug!("Prediction queue closed, stopping worker");
		});

		Self { setup, sender }
	}

	/// Queue an upload and wait for its prediction.
	///
	/// The upload is removed from disk once the worker is done with it, whatever the outcome.
	pub async fn run(&self, upload: TempUpload) -> Result<(PredictionResponse, Duration), Error> {
		let (tx, rx) = oneshot::channel();

		self.sender
			.send((tx, upload))
			.await
			.map_err(|_| Error::Unavailable)?;

		rx.await.map_err(|_| Error::Unavailable)?
	}

	pub async fn setup(&self) -> Setup {
		self.setup.read().await.clone()
	}

	pub fn extension(self) -> axum::Extension<Self> {
		axum::Extension(self)
	}
}

fn load(path: &Path, device: Device, setup: &RwLock<Setup>) -> Result<Pipeline, ModelError> {
	let started_at = Utc::now();
	tracing::info!("Loading model weights...");

	let (classifier, load_time) = with_timing(|| Classifier::load(path, LABELS.len(), device));

	let mut setup = setup.blocking_write();
	setup.started_at = Some(started_at);
	setup.completed_at = Some(Utc::now());

	match classifier {
		Ok(classifier) => {
			tracing::info!("Model ready in {:.2}s", load_time.as_secs_f64());
			setup.error = None;

			Ok(Pipeline::new(classifier))
		},
		Err(error) => {
			tracing::error!(?error, "Failed to load model: {error}");
			setup.error = Some(error.to_string());

			Err(error)
		},
	}
}

fn predict(pipeline: &Pipeline, upload: &TempUpload) -> Result<PredictionResponse, Error> {
	let input = Preprocessed::from_path(upload.as_ref(), pipeline.classifier().device())?;

	pipeline.run(&input).map_err(|error| {
		tracing::error!("Prediction failed: {error:?}");
		Error::Prediction(error)
	})
}

/// Run `f`, turning a panic inside libtorch into a failed prediction so the worker keeps going.
fn catch_panic<T>(f: impl FnOnce() -> Result<T, Error>) -> Result<T, Error> {
	catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
		let message = payload
			.downcast_ref::<&str>()
			.map(|message| (*message).to_string())
			.or_else(|| payload.downcast_ref::<String>().cloned())
			.unwrap_or_else(|| "unknown panic".to_string());

		tracing::error!("Prediction panicked: {message}");
		Err(Error::Prediction(anyhow::anyhow!("worker panicked: {message}")))
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn panics_become_prediction_errors() {
		let result = catch_panic::<()>(|| panic!("expected Float but found Half"));

		match result {
			Err(Error::Prediction(error)) => {
				assert!(error.to_string().contains("expected Float but found Half"));
			},
			other => panic!("expected a prediction error, got {other:?}"),
		}
	}

	#[test]
	fn results_pass_through() {
		assert_eq!(catch_panic(|| Ok(42)).unwrap(), 42);
		assert!(matches!(
			catch_panic::<()>(|| Err(Error::Unavailable)),
			Err(Error::Unavailable)
		));
	}
}
