use std::{collections::HashMap, ffi::OsStr, path::Path};

use anyhow::Result;
use tch::{
	nn::{self, FuncT, Linear, SequentialT, VarStore},
	Device, TchError, Tensor,
};

/// Number of channels coming out of the last residual block.
pub const FEATURE_CHANNELS: i64 = 512;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
	#[error("Model checkpoint not found. Please ensure the weights file is in place.")]
	CheckpointMissing,

	#[error("Model checkpoint is incompatible with a {labels}-label classifier: {reason}")]
	Incompatible {
		labels: usize,
		reason: String,
		#[source]
		source: Option<TchError>,
	},
}

/// A ResNet-18 whose final layer is replaced by a `labels`-way linear head.
///
/// The network is split after the last residual block so the explainer can get at its activations.
#[derive(Debug)]
pub struct Classifier {
	device: Device,
	backbone: SequentialT,
	head: FuncT<'static>,
	num_labels: usize,
	vs: VarStore,
}

impl Classifier {
	/// Build the network and load its weights from a checkpoint.
	///
	/// Variable names follow torchvision (`conv1`, `bn1`, `layer1.0.conv1`, ..., `fc`).
	///
	/// # Errors
	///
	/// Returns an error if the checkpoint doesn't exist, can't be read, or doesn't match the architecture.
	pub fn load(path: &Path, num_labels: usize, device: Device) -> Result<Self, ModelError> {
		if !path.is_file() {
			return Err(ModelError::CheckpointMissing);
		}

		let incompatible = |reason: String, source: Option<TchError>| ModelError::Incompatible {
			labels: num_labels,
			reason,
			source,
		};

		let tensors = read_checkpoint(path)
			.map_err(|e| incompatible("the file could not be read".to_string(), Some(e)))?;

		let classifier = Self::new(num_labels, device);
		tch::no_grad(|| {
			for (name, mut variable) in classifier.vs.variables() {
				let Some(tensor) = tensors.get(&name) else {
					return Err(incompatible(format!("tensor {name} is missing"), None));
				};

				if tensor.size() != variable.size() {
					return Err(incompatible(
						format!(
							"tensor {name} has shape {:?}, expected {:?}",
							tensor.size(),
							variable.size()
						),
						None,
					));
				}

				// Half precision checkpoints are widened so they accept the f32 input.
				tensor
					.f_to_kind(variable.kind())
					.and_then(|tensor| variable.f_copy_(&tensor))
					.map_err(|e| incompatible(format!("tensor {name} could not be copied"), Some(e)))?;
			}

			Ok(())
		})?;

		tracing::info!("Loaded {num_labels}-label classifier on {device:?}");
		Ok(classifier)
	}

	/// Build the network with randomly initialized, frozen weights.
	pub(crate) fn new(num_labels: usize, device: Device) -> Self {
		let mut vs = VarStore::new(device);
		let root = vs.root();

		let backbone = resnet18_backbone(&root);
		#[allow(clippy::cast_possible_wrap)]
		let fc = nn::linear(&root / "fc", FEATURE_CHANNELS, num_labels as i64, Default::default());
		let head = classifier_head(fc);
		vs.freeze();

		Self {
			device,
			backbone,
			head,
			num_labels,
			vs,
		}
	}

	pub const fn device(&self) -> Device {
		self.device
	}

	pub const fn num_labels(&self) -> usize {
		self.num_labels
	}

	/// Activations of the last residual block, `[N, 512, H/32, W/32]`.
	pub fn features(&self, input: &Tensor) -> Tensor {
		tch::no_grad(|| input.apply_t(&self.backbone, false))
	}

	/// Raw (pre-sigmoid) scores from the activations of the last residual block.
	pub fn head(&self, features: &Tensor) -> Tensor {
		features.apply_t(&self.head, false)
	}

	/// Independent per-label probabilities for a single `[1, 3, 224, 224]` input.
	///
	/// # Errors
	///
	/// Returns an error if the output can't be copied off the device.
	pub fn predict(&self, input: &Tensor) -> Result<Vec<f32>> {
		let probabilities = tch::no_grad(|| self.head(&self.features(input)).sigmoid());
		let probabilities = Vec::<f32>::try_from(&probabilities.flatten(0, -1).to_device(Device::Cpu))?;

		anyhow::ensure!(
			probabilities.len() == self.num_labels,
			"Classifier produced {} scores for {} labels",
			probabilities.len(),
			self.num_labels
		);

		Ok(probabilities)
	}
}

/// Every named tensor in a safetensors or libtorch checkpoint.
fn read_checkpoint(path: &Path) -> Result<HashMap<String, Tensor>, TchError> {
	let tensors = match path.extension().and_then(OsStr::to_str) {
		Some("safetensors") => Tensor::read_safetensors(path)?,
		Some("bin" | "pt") => Tensor::loadz_multi(path)?,
		_ => Tensor::load_multi(path)?,
	};

	Ok(tensors.into_iter().collect())
}

fn conv2d(p: nn::Path, c_in: i64, c_out: i64, ksize: i64, padding: i64, stride: i64) -> nn::Conv2D {
	let config = nn::ConvConfig {
		stride,
		padding,
		bias: false,
		..Default::default()
	};

	nn::conv2d(p, c_in, c_out, ksize, config)
}

fn downsample(p: nn::Path, c_in: i64, c_out: i64, stride: i64) -> SequentialT {
	if stride == 1 && c_in == c_out {
		return nn::seq_t();
	}

	nn::seq_t()
		.add(conv2d(&p / "0", c_in, c_out, 1, 0, stride))
		.add(nn::batch_norm2d(&p / "1", c_out, Default::default()))
}

fn basic_block(p: nn::Path, c_in: i64, c_out: i64, stride: i64) -> FuncT<'static> {
	let conv1 = conv2d(&p / "conv1", c_in, c_out, 3, 1, stride);
	let bn1 = nn::batch_norm2d(&p / "bn1", c_out, Default::default());
	let conv2 = conv2d(&p / "conv2", c_out, c_out, 3, 1, 1);
	let bn2 = nn::batch_norm2d(&p / "bn2", c_out, Default::default());
	let downsample = downsample(&p / "downsample", c_in, c_out, stride);

	nn::func_t(move |xs, train| {
		let ys = xs
			.apply(&conv1)
			.apply_t(&bn1, train)
			.relu()
			.apply(&conv2)
			.apply_t(&bn2, train);

		(xs.apply_t(&downsample, train) + ys).relu()
	})
}

fn layer(p: nn::Path, c_in: i64, c_out: i64, stride: i64) -> SequentialT {
	nn::seq_t()
		.add(basic_block(&p / "0", c_in, c_out, stride))
		.add(basic_block(&p / "1", c_out, c_out, 1))
}

fn resnet18_backbone(p: &nn::Path) -> SequentialT {
	let conv1 = conv2d(p / "conv1", 3, 64, 7, 3, 2);
	let bn1 = nn::batch_norm2d(p / "bn1", 64, Default::default());

	nn::seq_t()
		.add(conv1)
		.add(bn1)
		.add_fn(Tensor::relu)
		.add_fn(|xs| xs.max_pool2d([3, 3], [2, 2], [1, 1], [1, 1], false))
		.add(layer(p / "layer1", 64, 64, 1))
		.add(layer(p / "layer2", 64, 128, 2))
		.add(layer(p / "layer3", 128, 256, 2))
		.add(layer(p / "layer4", 256, FEATURE_CHANNELS, 2))
}

fn classifier_head(fc: Linear) -> FuncT<'static> {
	nn::func_t(move |xs, _train| xs.adaptive_avg_pool2d([1, 1]).flat_view().apply(&fc))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::env::temp_dir;
	use tch::Kind;
	use uuid::Uuid;

	fn input() -> Tensor {
		Tensor::ones([1, 3, 224, 224], (Kind::Float, Device::Cpu))
	}

	#[test]
	fn missing_checkpoint_is_reported() {
		let path = temp_dir().join(format!("{}.safetensors", Uuid::new_v4()));

		let error = Classifier::load(&path, 5, Device::Cpu).unwrap_err();

		assert!(matches!(error, ModelError::CheckpointMissing));
		assert!(!error.to_string().contains(&*path.to_string_lossy()));
	}

	#[test]
	fn checkpoint_with_wrong_label_count_is_rejected() {
		let path = temp_dir().join(format!("{}.safetensors", Uuid::new_v4()));
		let other = Classifier::new(3, Device::Cpu);
		other.vs.save(&path).unwrap();

		let error = Classifier::load(&path, 5, Device::Cpu).unwrap_err();
		std::fs::remove_file(&path).unwrap();

		assert!(matches!(error, ModelError::Incompatible { labels: 5, .. }));
	}

	#[test]
	fn single_label_checkpoint_is_not_broadcast() {
		let path = temp_dir().join(format!("{}.safetensors", Uuid::new_v4()));
		let other = Classifier::new(1, Device::Cpu);
		other.vs.save(&path).unwrap();

		let error = Classifier::load(&path, 5, Device::Cpu).unwrap_err();
		std::fs::remove_file(&path).unwrap();

		assert!(matches!(error, ModelError::Incompatible { labels: 5, .. }));
		assert!(error.to_string().contains("fc."));
	}

	#[test]
	fn unreadable_checkpoint_does_not_leak_its_path() {
		let path = temp_dir().join(format!("{}.safetensors", Uuid::new_v4()));
		std::fs::write(&path, b"not a checkpoint").unwrap();

		let error = Classifier::load(&path, 5, Device::Cpu).unwrap_err();
		std::fs::remove_file(&path).unwrap();

		assert!(matches!(error, ModelError::Incompatible { source: Some(_), .. }));
		assert!(!error.to_string().contains(&*path.to_string_lossy()));
	}

	#[test]
	fn half_precision_checkpoint_loads_as_float() {
		let path = temp_dir().join(format!("{}.safetensors", Uuid::new_v4()));
		let mut other = Classifier::new(5, Device::Cpu);
		other.vs.half();
		other.vs.save(&path).unwrap();

		let loaded = Classifier::load(&path, 5, Device::Cpu).unwrap();
		std::fs::remove_file(&path).unwrap();

		assert!(loaded.vs.variables().values().all(|v| v.kind() == Kind::Float));
		assert_eq!(loaded.predict(&input()).unwrap().len(), 5);
	}

	#[test]
	fn saved_checkpoint_round_trips() {
		let path = temp_dir().join(format!("{}.safetensors", Uuid::new_v4()));
		let original = Classifier::new(5, Device::Cpu);
		original.vs.save(&path).unwrap();

		let loaded = Classifier::load(&path, 5, Device::Cpu).unwrap();
		std::fs::remove_file(&path).unwrap();

		assert_eq!(
			original.predict(&input()).unwrap(),
			loaded.predict(&input()).unwrap()
		);
	}

	#[test]
	fn predicts_one_probability_per_label() {
		let classifier = Classifier::new(5, Device::Cpu);

		let probabilities = classifier.predict(&input()).unwrap();

		assert_eq!(probabilities.len(), 5);
		assert!(probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
		assert_eq!(probabilities, classifier.predict(&input()).unwrap());
	}

	#[test]
	fn features_come_from_the_last_block() {
		let classifier = Classifier::new(5, Device::Cpu);

		let features = classifier.features(&input());

		assert_eq!(features.size(), vec![1, FEATURE_CHANNELS, 7, 7]);
		assert!(!features.requires_grad());
		assert_eq!(classifier.head(&features).size(), vec![1, 5]);
	}
}
