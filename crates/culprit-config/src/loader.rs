//! Configuration loader with multi-source merging

use crate::{CulpritConfig, Paths};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    include_user_config: bool,
}

impl ConfigLoader {
    /// Loader rooted at the current directory
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "CULPRIT".to_string(),
            include_user_config: true,
        }
    }

    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "CULPRIT")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skip ~/.config/culprit/config.toml
    pub fn without_user_config(mut self) -> Self {
        self.include_user_config = false;
        self
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<CulpritConfig> {
        let mut builder = config::Config::builder();

        // 1. Built-in defaults
        let defaults = CulpritConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config
        if self.include_user_config
            && let Ok(user_config_file) = Paths::new().user_config_file()
        {
            builder = builder.add_source(toml_file(user_config_file));
        }

        // 3. Project config, then 4. local overrides
        builder = builder
            .add_source(toml_file(Paths::project_config_file(&self.project_dir)))
            .add_source(toml_file(Paths::local_config_file(&self.project_dir)));

        // 5. Environment variables (CULPRIT_MCS__DRIVER=efficient)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("failed to build configuration")?;

        let mut culprit_config: CulpritConfig = config
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        culprit_config.validate()?;
        culprit_config.resolve_paths(&self.project_dir);

        Ok(culprit_config)
    }

    /// Load configuration or return defaults if anything fails
    pub fn load_or_default(self) -> CulpritConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn toml_file(path: PathBuf) -> config::File<config::FileSourceFile, config::FileFormat> {
    config::File::from(path)
        .required(false)
        .format(config::FileFormat::Toml)
}
