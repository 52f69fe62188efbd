use config::{ConfigError, File, FileFormat};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV_VAR: &str = "MEDIAQ_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

/// Load `.env` from the working directory into the process environment.
/// Existing variables win. Returns the file loaded, if any.
pub fn load_dotenv() -> Option<PathBuf> {
    // A missing .env file is the common case
    dotenvy::dotenv().ok()
}

/// Snapshot of the process environment taken once at startup
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    vars: HashMap<String, String>,
}

impl EnvSource {
    /// Capture the current environment. Call [`load_dotenv`] first for `.env`
    /// values to be included.
    pub fn from_process() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Value of `name`, treating an empty value as unset
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Static configuration file (YAML, TOML or JSON, picked by extension)
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    inner: Option<config::Config>,
}

impl FileSource {
    /// Load `path`. A missing file yields an empty source so every key has to
    /// come from the environment; a malformed file is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::warn!(
                "Configuration file not found at {}, relying on environment variables",
                path.display()
            );
            return Ok(Self::empty());
        }

        tracing::info!("Loading configuration from: {}", path.display());
        let builder = config::Config::builder();
        let builder = match merge_list_form(path)? {
            Some(merged) => builder.add_source(File::from_str(&merged, FileFormat::Yaml)),
            None => builder.add_source(File::from(path.to_path_buf()).required(true)),
        };

        Ok(Self {
            inner: Some(builder.build()?),
        })
    }

    pub fn empty() -> Self {
        Self { inner: None }
    }

    /// Value at `[section][key]`, stringified (YAML ports are usually integers)
    pub fn get(&self, section: &str, key: &str) -> Option<String> {
        self.inner
            .as_ref()?
            .get_string(&format!("{}.{}", section, key))
            .ok()
    }
}

/// A YAML file whose top level is a list of mappings is merged front to back
/// (a later section replaces an earlier one with the same name) and returned
/// as a single mapping document. Anything else yields `None` and is loaded
/// as-is.
fn merge_list_form(path: &Path) -> Result<Option<String>, ConfigError> {
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml"));
    if !is_yaml {
        return Ok(None);
    }

    let text = fs::read_to_string(path).map_err(|e| ConfigError::Foreign(Box::new(e)))?;
    // Parse errors are left for the config loader to report
    let Ok(serde_yaml::Value::Sequence(entries)) = serde_yaml::from_str(&text) else {
        return Ok(None);
    };

    let mut merged = serde_yaml::Mapping::new();
    for entry in entries {
        match entry {
            serde_yaml::Value::Mapping(section) => merged.extend(section),
            other => {
                return Err(ConfigError::Message(format!(
                    "{}: list entries must be mappings, found {:?}",
                    path.display(),
                    other
                )));
            }
        }
    }

    tracing::debug!(sections = merged.len(), "Merged list-form configuration");
    serde_yaml::to_string(&merged)
        .map(Some)
        .map_err(|e| ConfigError::Foreign(Box::new(e)))
}

/// Pick the config file path: explicit argument, then `MEDIAQ_CONFIG`, then
/// `config.yml` in the working directory.
pub fn config_path(explicit: Option<PathBuf>, env: &EnvSource) -> PathBuf {
    explicit
        .or_else(|| env.get(CONFIG_ENV_VAR).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
