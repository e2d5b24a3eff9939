use std::{net::IpAddr, path::PathBuf};

use clap::Parser;
use tch::Device;

#[derive(Debug, Clone, Parser)]
#[clap(author, version, about = "Chest X-ray classification server with Grad-CAM overlays")]
pub struct Config {
	/// Address to listen on
	#[clap(long, env = "HOST", default_value = "0.0.0.0")]
	pub host: IpAddr,

	/// Port to listen on
	#[clap(short, long, env = "PORT", default_value_t = 8000)]
	pub port: u16,

	/// Path to the classifier weights (safetensors or .ot, torchvision ResNet-18 naming)
	#[clap(long, env = "MODEL_PATH", default_value = "model.safetensors")]
	pub model_path: PathBuf,

	/// Run on the CPU even if CUDA is available
	#[clap(long, env = "FORCE_CPU")]
	pub cpu: bool,
}

impl Config {
	pub fn device(&self) -> Device {
		if self.cpu {
			Device::Cpu
		} else {
			Device::cuda_if_available()
		}
	}
}
