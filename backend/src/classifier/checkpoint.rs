use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tch::{nn::VarStore, Tensor};

use super::ClassifierError;

/// JSON manifest describing a trained checkpoint. The weights themselves live
/// next to it in a tensor file (`.safetensors`, `.ot` or `.npz`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub class_names: Vec<String>,
    pub num_classes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disease_info: Option<HashMap<String, serde_json::Value>>,
    pub weights: PathBuf,
}

impl CheckpointManifest {
    pub fn read(path: &Path) -> Result<Self, ClassifierError> {
        if !path.exists() {
            return Err(ClassifierError::MissingResource(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path)
            .map_err(|e| ClassifierError::MalformedCheckpoint(format!("{}: {}", path.display(), e)))?;
        let manifest: CheckpointManifest = serde_json::from_str(&raw)
            .map_err(|e| ClassifierError::MalformedCheckpoint(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn save(&self, path: &Path) -> Result<(), ClassifierError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ClassifierError::MalformedCheckpoint(e.to_string()))?;
        fs::write(path, json)
            .map_err(|e| ClassifierError::MalformedCheckpoint(format!("{}: {}", path.display(), e)))
    }

    fn validate(&self) -> Result<(), ClassifierError> {
        if self.num_classes == 0 {
            return Err(ClassifierError::MalformedCheckpoint(
                "num_classes must be positive".into(),
            ));
        }
        if self.num_classes != self.class_names.len() {
            return Err(ClassifierError::MalformedCheckpoint(format!(
                "num_classes is {} but {} class names are listed",
                self.num_classes,
                self.class_names.len()
            )));
        }
        let mut seen = HashSet::with_capacity(self.class_names.len());
        if let Some(duplicate) = self.class_names.iter().find(|name| !seen.insert(name.as_str())) {
            return Err(ClassifierError::MalformedCheckpoint(format!(
                "class name `{}` is listed more than once",
                duplicate
            )));
        }
        Ok(())
    }

    /// Weights path, resolved against the manifest's directory when relative.
    pub fn weights_path(&self, manifest_path: &Path) -> PathBuf {
        if self.weights.is_absolute() {
            return self.weights.clone();
        }
        manifest_path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(&self.weights)
    }

    pub fn into_disease_info(self) -> HashMap<String, serde_json::Value> {
        self.disease_info.unwrap_or_default()
    }
}

fn read_named_tensors(path: &Path) -> Result<Vec<(String, Tensor)>, tch::TchError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("safetensors") => Tensor::read_safetensors(path),
        Some("npz") => Tensor::read_npz(path),
        _ => Tensor::load_multi(path),
    }
}

/// Copies stored tensors into every variable of `vs`. Names and shapes must
/// match exactly; extra stored tensors (e.g. `num_batches_tracked`) are ignored.
pub fn load_weights(vs: &VarStore, weights: &Path) -> Result<(), ClassifierError> {
    if !weights.exists() {
        return Err(ClassifierError::MissingResource(weights.to_path_buf()));
    }
    let stored: HashMap<String, Tensor> = read_named_tensors(weights)
        .map_err(|e| ClassifierError::MalformedCheckpoint(format!("{}: {}", weights.display(), e)))?
        .into_iter()
        .collect();

    let mut variables: Vec<(String, Tensor)> = vs.variables().into_iter().collect();
    variables.sort_by(|a, b| a.0.cmp(&b.0));

    for (name, mut var) in variables {
        let src = stored.get(&name).ok_or_else(|| {
            ClassifierError::IncompatibleModel(format!("tensor `{}` missing from weights", name))
        })?;
        if src.size() != var.size() {
            return Err(ClassifierError::IncompatibleModel(format!(
                "tensor `{}` has shape {:?}, network expects {:?}",
                name,
                src.size(),
                var.size()
            )));
        }
        tch::no_grad(|| var.f_copy_(src))
            .map_err(|e| ClassifierError::IncompatibleModel(format!("{}: {}", name, e)))?;
    }
    log::debug!("Loaded {} tensors from {}", stored.len(), weights.display());
    Ok(())
}
