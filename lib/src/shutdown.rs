use axum::Extension;
use std::{
	future::Future,
	sync::atomic::{AtomicBool, Ordering},
};
use tokio::{signal, sync::mpsc};

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("shutdown handler already created")]
pub struct AlreadyCreatedError;

static CREATED: AtomicBool = AtomicBool::new(false);

#[derive(Debug)]
pub struct Shutdown {
	sender: mpsc::Sender<()>,
	receiver: mpsc::Receiver<()>,
}

/// A handle that request handlers can use to stop the server.
#[derive(Debug, Clone)]
pub struct Agent {
	sender: mpsc::Sender<()>,
}

impl Agent {
	pub async fn start(&self) {
		tracing::info!("Shutdown requested");
		self.sender.send(()).await.ok();
	}
}

impl Shutdown {
	/// Install the signal handlers. Only one instance may exist per process.
	///
	/// # Errors
	///
	/// Returns an error if a shutdown handler was already created.
	pub fn new() -> Result<Self, AlreadyCreatedError> {
		if CREATED.swap(true, Ordering::SeqCst) {
			return Err(AlreadyCreatedError);
		}

		let (tx, rx) = mpsc::channel(1);
		let handle = register_handlers();

		let tx_for_handle = tx.clone();
		tokio::spawn(async move {
			handle.await;
			tx_for_handle.send(()).await.ok();
		});

		Ok(Self {
			sender: tx,
			receiver: rx,
		})
	}

	/// Resolves once a signal is received or an [`Agent`] requests a shutdown.
	pub async fn handle(mut self) {
		self.receiver.recv().await;
	}

	pub fn extension(&self) -> Extension<Agent> {
		Extension(Agent {
			sender: self.sender.clone(),
		})
	}
}

fn register_handlers() -> impl Future<Output = ()> {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			tracing::error!("Failed to install Ctrl+C handler: {e}");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut signal) => {
				signal.recv().await;
			},
			Err(e) => {
				tracing::error!("Failed to install SIGTERM handler: {e}");
				std::future::pending::<()>().await;
			},
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	async {
		tokio::select! {
			() = ctrl_c => {},
			() = terminate => {},
		}

		tracing::info!("Received shutdown signal");
	}
}
