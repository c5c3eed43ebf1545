use config::{Config, Environment, File};
use reel_domain::config::ReelConfig;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use tracing::info;

/// Prefix of environment overrides: `REEL__RUNTIME__DEBOUNCE_MS=250`.
pub const ENV_PREFIX: &str = "REEL";
pub const ENV_SEPARATOR: &str = "__";
/// File stem looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "reel";

#[reel_derive::reel_error]
pub enum ConfigError {
    #[error("Config error{}: {source}", format_context(.context))]
    Config { source: config::ConfigError, context: Option<Cow<'static, str>> },
}

/// Layered configuration: an optional file overlaid with `REEL__` environment variables.
///
/// An explicit file is required to exist; the default `reel.*` file is optional,
/// so a bare environment (or nothing at all) yields the built-in defaults.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
    env: Option<config::Map<String, String>>,
}

impl ConfigLoader {
    #[must_use = "Creates a new configuration loader"]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use = "Sets the configuration file"]
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Reads overrides from `vars` instead of the process environment.
    #[must_use = "Replaces the process environment as override source"]
    pub fn env_source<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Config`] when an explicit file is missing or malformed,
    /// or when a value does not fit the target type.
    pub fn load<T: DeserializeOwned>(self) -> Result<T, ConfigError> {
        let (file, required) = match &self.path {
            Some(path) => (File::from(path.as_path()), true),
            None => (File::with_name(DEFAULT_CONFIG_FILE), false),
        };

        let builder = Config::builder().add_source(file.required(required)).add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(self.env),
        );

        let source =
            self.path.as_ref().map_or_else(|| DEFAULT_CONFIG_FILE.to_owned(), |p| p.display().to_string());
        info!(path = %source, "Loading config");

        let config = builder
            .build()
            .context("Failed to build config")?
            .try_deserialize::<T>()
            .context("Failed to deserialize config")?;

        Ok(config)
    }
}

/// Loads any deserializable configuration from `path` (or the default `reel.*`
/// file) plus `REEL__` environment overrides.
///
/// # Errors
///
/// See [`ConfigLoader::load`].
pub fn load_config<T>(path: Option<impl AsRef<Path>>) -> Result<T, ConfigError>
where
    T: DeserializeOwned,
{
    let loader = ConfigLoader::new();
    match path {
        Some(path) => loader.file(path).load(),
        None => loader.load(),
    }
}

/// [`load_config`] for the workspace-wide [`ReelConfig`].
///
/// # Errors
///
/// See [`ConfigLoader::load`].
pub fn load_reel_config(path: Option<impl AsRef<Path>>) -> Result<ReelConfig, ConfigError> {
    load_config(path)
}
