use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Analyzer settings, as an editor would send them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyzerConfig {
    /// Extra directories searched for imports, in order.
    pub lib_paths: Vec<PathBuf>,
    /// Location of the `jsonnet` executable. Its directory is searched
    /// before `lib_paths`.
    pub executable_path: Option<PathBuf>,
}

impl AnalyzerConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Json(e.to_string()))
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Yaml(e.to_string()))
    }

    /// Loads a `.json`, `.yaml` or `.yml` file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text),
            Some("yaml" | "yml") => Self::from_yaml(&text),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Library search paths with the executable's directory first.
    pub fn effective_lib_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(self.lib_paths.len() + 1);
        if let Some(dir) = self.executable_path.as_deref().and_then(Path::parent) {
            if !dir.as_os_str().is_empty() {
                paths.push(dir.to_path_buf());
            }
        }
        paths.extend(self.lib_paths.iter().cloned());
        paths
    }
}
