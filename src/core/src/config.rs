use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MigrateError, Result};

/// Default non-root identity used by Docker Hardened Images.
pub const DEFAULT_USER: &str = "nonroot";

/// Default offset added to privileged ports.
pub const DEFAULT_PORT_OFFSET: u16 = 8000;

/// Default application directory.
pub const DEFAULT_APP_PATH: &str = "/app";

/// Runtime image used for statically compiled Go binaries.
pub const DEFAULT_STATIC_RUNTIME_IMAGE: &str = "docker/dhi-static:20241121";

/// Ports below this number are privileged.
const PRIVILEGED_PORT_LIMIT: u16 = 1024;

/// Migration configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    /// User the final stage runs as (symbolic or numeric UID)
    pub user: String,

    /// Group for `--chown=`; defaults to `user`
    pub group: Option<String>,

    /// Inject `USER <user>` when the final stage would run as root
    pub inject_nonroot: bool,

    /// Offset added to every privileged port
    pub port_offset: u16,

    /// Application directory copied between stages when WORKDIR is unknown
    pub app_path: String,

    /// Alias given to a synthesized build stage
    pub build_stage_alias: String,

    /// Alias given to a synthesized runtime stage
    pub runtime_stage_alias: String,

    /// Runtime image for compiled Go builds (None keeps the language image)
    pub static_runtime_image: Option<String>,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            user: DEFAULT_USER.to_string(),
            group: None,
            inject_nonroot: true,
            port_offset: DEFAULT_PORT_OFFSET,
            app_path: DEFAULT_APP_PATH.to_string(),
            build_stage_alias: "build-stage".to_string(),
            runtime_stage_alias: "runtime-stage".to_string(),
            static_runtime_image: Some(DEFAULT_STATIC_RUNTIME_IMAGE.to_string()),
        }
    }
}

impl MigrateConfig {
    /// Load a configuration file (YAML). Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MigrateError::ConfigError(format!(
                "Failed to read config at {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: MigrateConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), user = %config.user, "Loaded migration config");
        Ok(config)
    }

    /// Check field ranges.
    pub fn validate(&self) -> Result<()> {
        if self.user.trim().is_empty() {
            return Err(MigrateError::ConfigError("user must not be empty".to_string()));
        }
        if self.user.contains(char::is_whitespace) {
            return Err(MigrateError::ConfigError(format!(
                "user '{}' must not contain whitespace",
                self.user
            )));
        }
        if self.port_offset < PRIVILEGED_PORT_LIMIT - 1 {
            return Err(MigrateError::ConfigError(format!(
                "port_offset {} would leave remapped ports below {}",
                self.port_offset, PRIVILEGED_PORT_LIMIT
            )));
        }
        if u32::from(PRIVILEGED_PORT_LIMIT - 1) + u32::from(self.port_offset) > u32::from(u16::MAX)
        {
            return Err(MigrateError::ConfigError(format!(
                "port_offset {} would push privileged ports past 65535",
                self.port_offset
            )));
        }
        if !self.app_path.starts_with('/') {
            return Err(MigrateError::ConfigError(format!(
                "app_path '{}' must be absolute",
                self.app_path
            )));
        }
        if self.build_stage_alias.is_empty() || self.runtime_stage_alias.is_empty() {
            return Err(MigrateError::ConfigError(
                "stage aliases must not be empty".to_string(),
            ));
        }
        if self.build_stage_alias.eq_ignore_ascii_case(&self.runtime_stage_alias) {
            return Err(MigrateError::ConfigError(
                "build and runtime stage aliases must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Group used for ownership flags.
    pub fn group(&self) -> &str {
        self.group.as_deref().unwrap_or(&self.user)
    }

    /// `user:group` pair for `--chown=`.
    pub fn chown(&self) -> String {
        format!("{}:{}", self.user, self.group())
    }
}

/// Options for one `migrate` invocation.
#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    /// Replaces the registry namespace of the target image
    pub namespace: Option<String>,

    /// Caller-only flag; the engine always renders
    pub dry_run: bool,

    /// Header timestamp; `None` stamps the current time
    pub generated_at: Option<DateTime<Utc>>,

    /// Rewrite settings
    pub config: MigrateConfig,
}

impl MigrateOptions {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_timestamp(mut self, generated_at: DateTime<Utc>) -> Self {
        self.generated_at = Some(generated_at);
        self
    }

    pub fn with_config(mut self, config: MigrateConfig) -> Self {
        self.config = config;
        self
    }
}
