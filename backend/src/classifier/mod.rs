pub mod advice;
pub mod backbone;
pub mod checkpoint;
pub mod postprocess;
pub mod preprocess;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use image::DynamicImage;
use shared::PredictionResult;
use tch::nn::{ModuleT, VarStore};
use tch::Device;

use backbone::MobileNetV3Small;
use checkpoint::CheckpointManifest;

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("model file not found: {}", .0.display())]
    MissingResource(PathBuf),
    #[error("malformed checkpoint: {0}")]
    MalformedCheckpoint(String),
    #[error("checkpoint does not match the network: {0}")]
    IncompatibleModel(String),
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Where the network should run. `Auto` picks CUDA when available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda(usize),
    Mps,
}

impl DevicePreference {
    /// Explicit device override, `None` for automatic selection.
    pub fn explicit(self) -> Option<Device> {
        match self {
            DevicePreference::Auto => None,
            DevicePreference::Cpu => Some(Device::Cpu),
            DevicePreference::Cuda(index) => Some(Device::Cuda(index)),
            DevicePreference::Mps => Some(Device::Mps),
        }
    }
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "" | "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda(0)),
            "mps" => Ok(DevicePreference::Mps),
            other => other
                .strip_prefix("cuda:")
                .and_then(|index| index.parse().ok())
                .map(DevicePreference::Cuda)
                .ok_or_else(|| format!("unknown device `{}`", other)),
        }
    }
}

/// A loaded plant disease classifier. Built once at startup and shared
/// read-only between requests.
pub struct Classifier {
    device: Device,
    class_names: Vec<String>,
    disease_info: HashMap<String, serde_json::Value>,
    network: Mutex<MobileNetV3Small>,
    vs: VarStore,
}

impl Classifier {
    /// Loads the checkpoint manifest at `checkpoint_path` and its weights.
    /// Without an explicit `device`, CUDA is used when available.
    pub fn load(
        checkpoint_path: impl AsRef<Path>,
        device: Option<Device>,
    ) -> Result<Self, ClassifierError> {
        let checkpoint_path = checkpoint_path.as_ref();
        log::debug!("Reading checkpoint manifest {}", checkpoint_path.display());
        let manifest = CheckpointManifest::read(checkpoint_path)?;
        let weights = manifest.weights_path(checkpoint_path);

        let device = device.unwrap_or_else(Device::cuda_if_available);
        let mut vs = VarStore::new(device);
        let network = MobileNetV3Small::new(&vs.root(), manifest.num_classes as i64);
        checkpoint::load_weights(&vs, &weights)?;
        vs.freeze();

        let class_names = manifest.class_names.clone();
        let disease_info = manifest.into_disease_info();
        log::info!(
            "Classifier ready on {:?}: {} classes from {}",
            device,
            class_names.len(),
            weights.display()
        );

        Ok(Self {
            device,
            class_names,
            disease_info,
            network: Mutex::new(network),
            vs,
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    pub fn disease_info(&self) -> &HashMap<String, serde_json::Value> {
        &self.disease_info
    }

    pub fn parameter_count(&self) -> usize {
        self.vs.variables().values().map(|t| t.numel()).sum()
    }

    /// Classifies the image stored at `image_path`.
    pub fn predict(&self, image_path: impl AsRef<Path>) -> Result<PredictionResult, ClassifierError> {
        let image = image::ImageReader::open(image_path.as_ref())
            .map_err(image::ImageError::IoError)?
            .with_guessed_format()
            .map_err(image::ImageError::IoError)?
            .decode()?;
        self.predict_from_image(&image)
    }

    /// Classifies an already decoded image.
    pub fn predict_from_image(&self, image: &DynamicImage) -> Result<PredictionResult, ClassifierError> {
        let input = preprocess::preprocess(image)?;

        // The network is never mutated, so a poisoned lock is still usable.
        let network = self.network.lock().unwrap_or_else(PoisonError::into_inner);
        let logits = panic::catch_unwind(AssertUnwindSafe(|| {
            tch::no_grad(|| {
                network
                    .forward_t(&input.to_device(self.device), false)
                    .to_device(Device::Cpu)
            })
        }))
        .map_err(|payload| ClassifierError::Inference(panic_message(payload.as_ref())))?;
        drop(network);

        let probabilities = postprocess::probabilities(&logits)?;
        postprocess::build_result(&probabilities, &self.class_names, &self.disease_info)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "forward pass panicked".to_string()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tch::nn;

    /// Writes a randomly initialised checkpoint for `class_names` into `dir`,
    /// with the output layer sized for `weight_classes`.
    pub fn write_checkpoint(dir: &Path, class_names: &[&str], weight_classes: i64) -> PathBuf {
        let vs = nn::VarStore::new(Device::Cpu);
        let _net = MobileNetV3Small::new(&vs.root(), weight_classes);
        let weights = dir.join("weights.safetensors");
        vs.save(&weights).unwrap();

        let manifest = CheckpointManifest {
            class_names: class_names.iter().map(|s| s.to_string()).collect(),
            num_classes: class_names.len(),
            disease_info: Some(HashMap::from([(
                "白粉病".to_string(),
                serde_json::json!({"pathogen": "Erysiphales"}),
            )])),
            weights: PathBuf::from("weights.safetensors"),
        };
        let path = dir.join("plant_disease_model.json");
        manifest.save(&path).unwrap();
        path
    }
}
