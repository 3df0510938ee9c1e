//! Configuration file discovery and loading

use std::path::{Path, PathBuf};
use std::sync::Arc;

use schemars::schema_for;
use tracing::debug;

use super::hl7kit_config::Hl7kitConfig;
use crate::definitions::DefinitionRegistry;
use crate::{Hl7Error, Result};

/// File names searched in each directory, highest priority first
pub const CONFIG_FILE_NAMES: &[&str] = &[
    ".hl7kitrc.json",
    ".hl7kitrc.toml",
    "hl7kit.yaml",
    "hl7kit.yml",
    "hl7kit.json",
];

/// A configuration plus the file it came from
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: Hl7kitConfig,
    /// `None` when no file was found and defaults are in effect
    pub path: Option<PathBuf>,
}

impl LoadedConfig {
    /// Directory relative paths in the config are resolved against
    pub fn base_dir(&self) -> PathBuf {
        self.path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Built-in definitions merged with `definitions.paths`
    pub fn registry(&self) -> Result<Arc<DefinitionRegistry>> {
        let paths = self.config.definition_paths(&self.base_dir());
        if paths.is_empty() {
            DefinitionRegistry::builtin()
        } else {
            DefinitionRegistry::with_extensions(&paths).map(Arc::new)
        }
    }
}

/// Configuration loader for discovering and loading config files
pub struct ConfigLoader;

impl ConfigLoader {
    /// Search `start_path` and its ancestors for a config file.
    ///
    /// Each directory is checked for the names in [`CONFIG_FILE_NAMES`] in
    /// order; the first hit wins.
    pub fn auto_discover(start_path: &Path) -> Result<Option<PathBuf>> {
        let mut current = start_path
            .canonicalize()
            .map_err(|e| Hl7Error::config_error(format!("Invalid path: {e}")))?;

        loop {
            for filename in CONFIG_FILE_NAMES {
                let config_path = current.join(filename);
                if config_path.is_file() {
                    debug!("Found config: {}", config_path.display());
                    return Ok(Some(config_path));
                }
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }

        Ok(None)
    }

    /// Load a config file, choosing the format by extension
    pub fn load_from_file(path: &Path) -> Result<Hl7kitConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| Hl7Error::io_error(path, e))?;
        let parsed = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(|e| e.to_string()),
            Some("json") => serde_json::from_str(&content).map_err(|e| e.to_string()),
            Some("toml") => toml::from_str(&content).map_err(|e| e.to_string()),
            _ => Err("unsupported file extension (expected .json, .toml, .yaml or .yml)".to_string()),
        };
        parsed.map_err(|e| {
            Hl7Error::config_error(format!(
                "Failed to load config from '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Load from `custom_path`, or discover upward from `start_dir`.
    ///
    /// An explicit path must exist. When discovery finds nothing the
    /// defaults are returned.
    pub fn load(custom_path: Option<&Path>, start_dir: Option<&Path>) -> Result<LoadedConfig> {
        let path = match custom_path {
            Some(path) => {
                if !path.exists() {
                    return Err(Hl7Error::config_error(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                Some(path.to_path_buf())
            }
            None => Self::auto_discover(start_dir.unwrap_or_else(|| Path::new(".")))?,
        };

        match path {
            Some(path) => Ok(LoadedConfig {
                config: Self::load_from_file(&path)?,
                path: Some(path),
            }),
            None => {
                debug!("No config file found, using defaults");
                Ok(LoadedConfig::default())
            }
        }
    }

    /// JSON Schema describing the configuration file
    pub fn json_schema() -> Result<String> {
        let schema = schema_for!(Hl7kitConfig);
        serde_json::to_string_pretty(&schema)
            .map_err(|e| Hl7Error::serialization_error(e.to_string()))
    }

    /// Render `config` in the format implied by `path`'s extension
    pub fn render(config: &Hl7kitConfig, path: &Path) -> Result<String> {
        let rendered = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::to_string(config).map_err(|e| e.to_string()),
            Some("toml") => toml::to_string_pretty(config).map_err(|e| e.to_string()),
            _ => serde_json::to_string_pretty(config).map_err(|e| e.to_string()),
        };
        rendered.map_err(Hl7Error::serialization_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    use crate::datatypes::DatePrecision;
    use crate::validation::RuleSeverity;

    fn create_temp_config(dir: &Path, filename: &str, content: &str) -> PathBuf {
        let path = dir.join(filename);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_from_file_json() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_temp_config(
            temp_dir.path(),
            "hl7kit.json",
            r#"{"validation": {"enabled": true, "minDatePrecision": "minute"}}"#,
        );

        let config = ConfigLoader::load_from_file(&config_path).unwrap();
        let validation = config.validation.unwrap();
        assert_eq!(validation.enabled, Some(true));
        assert_eq!(validation.min_date_precision, Some(DatePrecision::Minute));
    }

    #[test]
    fn test_load_from_file_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_temp_config(
            temp_dir.path(),
            ".hl7kitrc.toml",
            r#"
[parser]
strict = true

[validation.rules]
"table/value" = "error"
"#,
        );

        let config = ConfigLoader::load_from_file(&config_path).unwrap();
        assert!(config.parser_options().strict);
        assert_eq!(
            config.validation_options().rules.get("table/value"),
            Some(&RuleSeverity::Error)
        );
    }

    #[test]
    fn test_load_from_file_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_temp_config(
            temp_dir.path(),
            "hl7kit.yaml",
            "files:\n  include:\n    - \"inbound/**/*.hl7\"\n",
        );

        let config = ConfigLoader::load_from_file(&config_path).unwrap();
        assert_eq!(
            config.files_config().include,
            Some(vec!["inbound/**/*.hl7".to_string()])
        );
    }

    #[test]
    fn test_auto_discover() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("inbound/2024");
        fs::create_dir_all(&nested).unwrap();
        create_temp_config(temp_dir.path(), "hl7kit.yml", "parser:\n  strict: false\n");

        let found = ConfigLoader::auto_discover(&nested).unwrap().unwrap();
        assert_eq!(found.file_name().unwrap(), "hl7kit.yml");
    }

    #[test]
    fn test_auto_discover_priority() {
        let temp_dir = TempDir::new().unwrap();
        create_temp_config(temp_dir.path(), "hl7kit.json", "{}");
        create_temp_config(temp_dir.path(), "hl7kit.yaml", "{}");
        create_temp_config(temp_dir.path(), ".hl7kitrc.json", "{}");

        let found = ConfigLoader::auto_discover(temp_dir.path()).unwrap().unwrap();
        assert_eq!(found.file_name().unwrap(), ".hl7kitrc.json");
    }

    #[test]
    fn test_load_missing_custom_path() {
        let result = ConfigLoader::load(Some(Path::new("does-not-exist.json")), None);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_temp_config(temp_dir.path(), "hl7kit.json", "{ invalid json }");
        assert!(ConfigLoader::load_from_file(&config_path).is_err());
    }

    #[test]
    fn test_unsupported_extension() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_temp_config(temp_dir.path(), "hl7kit.ini", "strict=1");
        assert!(ConfigLoader::load_from_file(&config_path).is_err());
    }

    #[test]
    fn test_loaded_registry_merges_definitions() {
        let temp_dir = TempDir::new().unwrap();
        create_temp_config(
            temp_dir.path(),
            "site.yaml",
            r#"
segments:
  ZPI:
    description: Site patient extension
    fields:
      - {name: Set ID, type: SI, len: 4}
      - {name: Favourite Colour, type: ST, opt: R, len: 20}
"#,
        );
        let config_path = create_temp_config(
            temp_dir.path(),
            "hl7kit.yaml",
            "definitions:\n  paths: [site.yaml]\n",
        );

        let loaded = ConfigLoader::load(Some(&config_path), None).unwrap();
        let registry = loaded.registry().unwrap();
        assert!(registry.segment("ZPI").is_some());
        assert!(registry.segment("PID").is_some());
    }

    #[test]
    fn test_json_schema() {
        let schema = ConfigLoader::json_schema().unwrap();
        assert!(schema.contains("minDatePrecision"));
        assert!(schema.contains("allowUnknownStructures"));
    }

    #[test]
    fn test_render_round_trip() {
        let config = Hl7kitConfig::example();
        for name in ["hl7kit.yaml", "hl7kit.json", ".hl7kitrc.toml"] {
            let temp_dir = TempDir::new().unwrap();
            let rendered = ConfigLoader::render(&config, Path::new(name)).unwrap();
            let path = create_temp_config(temp_dir.path(), name, &rendered);
            assert_eq!(ConfigLoader::load_from_file(&path).unwrap(), config);
        }
    }
}
