use std::collections::HashMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Per-class probabilities in class-index order.
///
/// Serialized as a JSON object whose keys keep the order of the class catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassProbabilities(pub Vec<(String, f64)>);

impl ClassProbabilities {
    pub fn get(&self, label: &str) -> Option<f64> {
        self.0.iter().find(|(name, _)| name == label).map(|(_, p)| *p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(name, p)| (name.as_str(), *p))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for ClassProbabilities {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, probability) in &self.0 {
            map.serialize_entry(label, probability)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ClassProbabilities {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ProbabilitiesVisitor;

        impl<'de> Visitor<'de> for ProbabilitiesVisitor {
            type Value = ClassProbabilities;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of class label to probability")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((label, probability)) = access.next_entry::<String, f64>()? {
                    entries.push((label, probability));
                }
                Ok(ClassProbabilities(entries))
            }
        }

        deserializer.deserialize_map(ProbabilitiesVisitor)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PredictionResult {
    pub predicted_class: String,
    pub confidence: f64,
    pub all_probabilities: ClassProbabilities,
    pub class_index: usize,
    pub is_healthy: bool,
    pub disease_info: serde_json::Value,
    pub recommendation: String,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct PredictBase64Request {
    pub image: Option<String>,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct PredictResponse {
    pub success: bool,
    pub prediction: PredictionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub timestamp: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub timestamp: String,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub app_name: String,
    pub version: String,
    pub timestamp: String,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct ClassesResponse {
    pub success: bool,
    pub classes: Vec<String>,
    pub num_classes: usize,
    pub disease_info: HashMap<String, serde_json::Value>,
    pub timestamp: String,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct AppInfoResponse {
    pub app_name: String,
    pub description: String,
    pub version: String,
    pub supported_diseases: usize,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probabilities_serialize_in_catalog_order() {
        let probs = ClassProbabilities(vec![
            ("锈病".to_string(), 0.1),
            ("健康".to_string(), 0.2),
            ("白粉病".to_string(), 0.7),
        ]);
        let json = serde_json::to_string(&probs).unwrap();
        assert_eq!(json, r#"{"锈病":0.1,"健康":0.2,"白粉病":0.7}"#);

        let back: ClassProbabilities = serde_json::from_str(&json).unwrap();
        assert_eq!(back, probs);
        assert_eq!(back.get("白粉病"), Some(0.7));
        assert_eq!(back.get("unknown"), None);
    }
}
