use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Metadata the conversion tooling writes next to the artifact.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelInfo {
    pub description: Option<String>,
    pub model_type: Option<String>,
    /// Class names, negative class first.
    pub classes: Vec<String>,
    pub input_shape: Option<Vec<Option<i64>>>,
    pub output_shape: Option<Vec<Option<i64>>>,
}

impl ModelInfo {
    /// Reads the sidecar if there is one. A broken sidecar never blocks loading.
    pub fn read_optional(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("cannot read {}: {e}", path.display());
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!("ignoring malformed {}: {e}", path.display());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_conversion_output() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model_info.json");
        fs::write(
            &path,
            r#"{
                "input_shape": [null, 224, 224, 3],
                "output_shape": [null, 1],
                "model_type": "binary_classification",
                "classes": ["other_documents", "foreigner_card_back"],
                "conversion_date": "2024-05-01T10:00:00",
                "quantization": "16-bit",
                "description": "Binary classifier for foreigner card back detection"
            }"#,
        )
        .unwrap();
        let info = ModelInfo::read_optional(&path).unwrap();
        assert_eq!(info.classes, vec!["other_documents", "foreigner_card_back"]);
        assert_eq!(info.input_shape, Some(vec![None, Some(224), Some(224), Some(3)]));
        assert_eq!(info.model_type.as_deref(), Some("binary_classification"));
    }

    #[test]
    fn missing_or_broken_sidecar_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model_info.json");
        assert_eq!(ModelInfo::read_optional(&path), None);
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(ModelInfo::read_optional(&path), None);
    }
}
