use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Runtime configuration for the generation pipeline.
///
/// Every recognized option is an explicit field with a typed default.
/// Resolution order: built-in defaults, then an optional config file,
/// then `PREFAB_*` environment overrides, then CLI flags (applied by
/// the binary after loading).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Model identifier passed to the generation service.
    pub model_name: String,
    /// Base URL of the HTTP generation service.
    pub api_base: String,
    /// Directory under which generated projects are created.
    pub base_path: PathBuf,
    /// Directory holding named project templates.
    pub templates_dir: PathBuf,
    /// Directory holding cached model responses.
    pub cache_dir: PathBuf,
    pub cache_enabled: bool,
    /// Cache entries older than this are purged at startup.
    pub cache_max_age_hours: u64,
    /// Worker bound for the parallel file-generation phase.
    pub max_workers: usize,
    /// Attempts per model call before giving up.
    pub max_retries: usize,
    /// Fixed delay between retry attempts.
    pub retry_delay_secs: u64,
    /// Timeout for one HTTP generation request. Generation is slow, so
    /// this is minutes-scale.
    pub http_timeout_secs: u64,
    /// Timeout for one local-executable generation call.
    pub cli_timeout_secs: u64,
    pub temperature: f64,
    pub init_git: bool,
    pub setup_venv: bool,
    pub open_in_editor: bool,
    pub editor_cmd: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model_name: "qwen2.5-coder".to_string(),
            api_base: "http://localhost:11434".to_string(),
            base_path: PathBuf::from("./projects"),
            templates_dir: PathBuf::from("./templates"),
            cache_dir: PathBuf::from("./.prefab-cache"),
            cache_enabled: true,
            cache_max_age_hours: 168,
            max_workers: 3,
            max_retries: 3,
            retry_delay_secs: 2,
            http_timeout_secs: 600,
            cli_timeout_secs: 180,
            temperature: 0.7,
            init_git: true,
            setup_venv: true,
            open_in_editor: false,
            editor_cmd: "code".to_string(),
        }
    }
}

impl GeneratorConfig {
    /// Loads the configuration: defaults, then the optional config file,
    /// then environment overrides. The result is validated once; invalid
    /// values are a startup error.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => match Self::from_file(path) {
                Ok(config) => {
                    info!(path = %path.display(), "configuration loaded");
                    config
                }
                Err(e) => {
                    // Missing or malformed config files fall back to
                    // defaults; the pipeline itself must still run.
                    warn!(path = %path.display(), error = %format!("{e:#}"), "failed to load configuration, using defaults");
                    Self::default()
                }
            },
            None => Self::default(),
        };

        config.apply_env_overrides(std::env::vars());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        match ext {
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid YAML config: {}", path.display())),
            other => anyhow::bail!("Unrecognized config format '.{other}': {}", path.display()),
        }
    }

    /// Applies `PREFAB_*` environment overrides. The mapping is explicit:
    /// only the variables matched here are recognized. Unparseable numeric
    /// or boolean values keep the previous setting with a warning.
    pub fn apply_env_overrides(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            match key.as_str() {
                "PREFAB_MODEL_NAME" => self.model_name = value,
                "PREFAB_API_BASE" => self.api_base = value,
                "PREFAB_BASE_PATH" => self.base_path = PathBuf::from(value),
                "PREFAB_TEMPLATES_DIR" => self.templates_dir = PathBuf::from(value),
                "PREFAB_CACHE_DIR" => self.cache_dir = PathBuf::from(value),
                "PREFAB_CACHE_ENABLED" => set_bool(&mut self.cache_enabled, &key, &value),
                "PREFAB_CACHE_MAX_AGE_HOURS" => set_num(&mut self.cache_max_age_hours, &key, &value),
                "PREFAB_MAX_WORKERS" => set_num(&mut self.max_workers, &key, &value),
                "PREFAB_MAX_RETRIES" => set_num(&mut self.max_retries, &key, &value),
                "PREFAB_RETRY_DELAY_SECS" => set_num(&mut self.retry_delay_secs, &key, &value),
                "PREFAB_HTTP_TIMEOUT_SECS" => set_num(&mut self.http_timeout_secs, &key, &value),
                "PREFAB_CLI_TIMEOUT_SECS" => set_num(&mut self.cli_timeout_secs, &key, &value),
                "PREFAB_TEMPERATURE" => set_num(&mut self.temperature, &key, &value),
                "PREFAB_INIT_GIT" => set_bool(&mut self.init_git, &key, &value),
                "PREFAB_SETUP_VENV" => set_bool(&mut self.setup_venv, &key, &value),
                "PREFAB_OPEN_IN_EDITOR" => set_bool(&mut self.open_in_editor, &key, &value),
                "PREFAB_EDITOR_CMD" => self.editor_cmd = value,
                _ => {}
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            anyhow::bail!("max_workers must be at least 1");
        }
        if self.max_retries == 0 {
            anyhow::bail!("max_retries must be at least 1");
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            anyhow::bail!(
                "temperature must be within [0.0, 2.0], got {}",
                self.temperature
            );
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn cli_timeout(&self) -> Duration {
        Duration::from_secs(self.cli_timeout_secs)
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_hours * 3600)
    }

    pub fn generate_url(&self) -> String {
        format!("{}/api/generate", self.api_base.trim_end_matches('/'))
    }

    pub fn tags_url(&self) -> String {
        format!("{}/api/tags", self.api_base.trim_end_matches('/'))
    }
}

fn set_bool(target: &mut bool, _key: &str, value: &str) {
    *target = matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "y");
}

fn set_num<T: std::str::FromStr>(target: &mut T, key: &str, value: &str) {
    match value.parse::<T>() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!(key, value, "ignoring unparseable environment override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GeneratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_workers, 3);
        assert!(config.cache_enabled);
    }

    #[test]
    fn test_env_overrides_are_explicit() {
        let mut config = GeneratorConfig::default();
        config.apply_env_overrides(vec![
            ("PREFAB_MODEL_NAME".to_string(), "llama3".to_string()),
            ("PREFAB_MAX_WORKERS".to_string(), "8".to_string()),
            ("PREFAB_CACHE_ENABLED".to_string(), "no".to_string()),
            ("UNRELATED_VAR".to_string(), "ignored".to_string()),
        ]);

        assert_eq!(config.model_name, "llama3");
        assert_eq!(config.max_workers, 8);
        assert!(!config.cache_enabled);
    }

    #[test]
    fn test_unparseable_override_keeps_previous_value() {
        let mut config = GeneratorConfig::default();
        config.apply_env_overrides(vec![(
            "PREFAB_MAX_RETRIES".to_string(),
            "not-a-number".to_string(),
        )]);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let config = GeneratorConfig {
            max_workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_urls() {
        let config = GeneratorConfig {
            api_base: "http://localhost:11434/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.generate_url(), "http://localhost:11434/api/generate");
        assert_eq!(config.tags_url(), "http://localhost:11434/api/tags");
    }

    #[test]
    fn test_config_file_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"model_name": "codellama", "max_workers": 5}"#).unwrap();

        let config = GeneratorConfig::from_file(&path).unwrap();
        assert_eq!(config.model_name, "codellama");
        assert_eq!(config.max_workers, 5);
        // Unspecified fields keep defaults
        assert_eq!(config.max_retries, 3);
    }
}
