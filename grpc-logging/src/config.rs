//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: GRPC_LOGGING_, `__` separates nested keys)
//! 2. Current working directory: ./grpc-logging.toml
//! 3. XDG config directory: ~/.config/grpc-logging/{service_name}/config.toml
//! 4. System directory: /etc/grpc-logging/{service_name}/config.toml
//! 5. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::logging::{
    duration_field, keys, with_decider, with_payload_decider, with_payload_max_bytes,
    DurationUnit, LoggingOption,
};

const ENV_PREFIX: &str = "GRPC_LOGGING_";
const CONFIG_DIR: &str = "grpc-logging";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,

    /// Interceptor behaviour
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Request tagging
    #[serde(default)]
    pub tags: TagsConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Log filter directive (trace, debug, info, warn, error, or full EnvFilter syntax)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            json: false,
        }
    }
}

/// Logging interceptor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Name of the elapsed-time field
    #[serde(default = "default_duration_field")]
    pub duration_field: String,

    /// Unit of the elapsed-time field
    #[serde(default)]
    pub duration_unit: DurationUnit,

    /// Full method names whose successful calls are not logged
    #[serde(default)]
    pub suppress_success: Vec<String>,

    /// Full method names whose payloads are logged
    #[serde(default)]
    pub payload_methods: Vec<String>,

    /// Cap on rendered payload size in bytes
    #[serde(default)]
    pub payload_max_bytes: Option<usize>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            duration_field: default_duration_field(),
            duration_unit: DurationUnit::default(),
            suppress_success: Vec::new(),
            payload_methods: Vec::new(),
            payload_max_bytes: None,
        }
    }
}

impl LoggingConfig {
    /// Translate into interceptor options
    ///
    /// Options passed after these override them, kind by kind.
    pub fn options(&self) -> Vec<LoggingOption> {
        let mut options = vec![LoggingOption::DurationField(duration_field(
            self.duration_field.clone(),
            self.duration_unit,
        ))];

        if !self.suppress_success.is_empty() {
            let quiet: Arc<BTreeSet<String>> =
                Arc::new(self.suppress_success.iter().cloned().collect());
            options.push(with_decider(move |method, error| {
                error.is_some() || !quiet.contains(method)
            }));
        }

        if !self.payload_methods.is_empty() {
            let loud: Arc<BTreeSet<String>> =
                Arc::new(self.payload_methods.iter().cloned().collect());
            options.push(with_payload_decider(move |_ctx, method, _msg| {
                loud.contains(method)
            }));
        }

        if let Some(max) = self.payload_max_bytes {
            options.push(with_payload_max_bytes(max));
        }

        options
    }
}

/// Request tagging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagsConfig {
    /// Header carrying the request id (generated when absent)
    #[serde(default = "default_request_id_header")]
    pub request_id_header: String,

    /// Metadata headers copied into tags as `grpc.metadata.<name>`
    #[serde(default)]
    pub metadata_headers: Vec<String>,
}

impl Default for TagsConfig {
    fn default() -> Self {
        Self {
            request_id_header: default_request_id_header(),
            metadata_headers: Vec::new(),
        }
    }
}

// Default value functions
fn default_service_name() -> String {
    "grpc-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_duration_field() -> String {
    keys::TIME_MS.to_string()
}

fn default_request_id_header() -> String {
    "x-request-id".to_string()
}

impl Config {
    /// Load configuration from all sources
    ///
    /// The service name is inferred from the binary name.
    pub fn load() -> Result<Self> {
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(default_service_name);

        Self::load_for_service(&service_name)
    }

    /// Load configuration for a specific service name
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        tracing::debug!("Searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // lowest priority first so higher priority files override
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// Bypasses directory discovery. Environment variables still apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Find all possible config file paths for a service
    ///
    /// Returns paths in priority order (highest first).
    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("grpc-logging.toml")];

        let xdg_dirs = xdg::BaseDirectories::with_prefix(CONFIG_DIR);
        let config_file_path = Path::new(service_name).join("config.toml");
        if let Ok(path) = xdg_dirs.place_config_file(&config_file_path) {
            paths.push(path);
        }

        paths.push(
            PathBuf::from("/etc")
                .join(CONFIG_DIR)
                .join(service_name)
                .join("config.toml"),
        );

        paths
    }

    /// Reject values that would only fail later, at call time
    pub fn validate(&self) -> Result<()> {
        if self.logging.duration_field.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "logging.duration_field must not be empty".to_string(),
            ));
        }
        if keys::RESERVED.contains(&self.logging.duration_field.as_str()) {
            return Err(Error::InvalidConfig(format!(
                "logging.duration_field {:?} collides with a reserved field",
                self.logging.duration_field
            )));
        }
        if self.logging.payload_max_bytes == Some(0) {
            return Err(Error::InvalidConfig(
                "logging.payload_max_bytes must be at least 1".to_string(),
            ));
        }
        if self.tags.request_id_header.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "tags.request_id_header must not be empty".to_string(),
            ));
        }
        if let Some(empty) = self
            .tags
            .metadata_headers
            .iter()
            .position(|h| h.trim().is_empty())
        {
            return Err(Error::InvalidConfig(format!(
                "tags.metadata_headers[{empty}] must not be empty"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{MemoryLogger, Options};
    use std::io::Write;
    use std::time::Duration;
    use tonic::Status;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service.log_level, "info");
        assert!(!config.service.json);
        assert_eq!(config.logging.duration_field, "grpc.time_ms");
        assert_eq!(config.logging.duration_unit, DurationUnit::Millis);
        assert_eq!(config.tags.request_id_header, "x-request-id");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[service]
name = "healthcheck"
json = true

[logging]
duration_field = "elapsed_s"
duration_unit = "seconds"
suppress_success = ["/blah.foo.healthcheck/Check"]
payload_max_bytes = 256

[tags]
metadata_headers = ["x-tenant"]
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.service.name, "healthcheck");
        assert!(config.service.json);
        assert_eq!(config.service.log_level, "info");
        assert_eq!(config.logging.duration_unit, DurationUnit::Seconds);
        assert_eq!(config.logging.payload_max_bytes, Some(256));
        assert_eq!(config.tags.metadata_headers, vec!["x-tenant".to_string()]);
    }

    #[test]
    fn test_load_from_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\npayload_max_bytes = 0").unwrap();

        let err = Config::load_from(file.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_load_from_reports_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nduration_unit = \"fortnights\"").unwrap();

        let err = Config::load_from(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_reserved_duration_field() {
        let mut config = Config::default();
        config.logging.duration_field = keys::CODE.to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_find_config_paths_priority() {
        let paths = Config::find_config_paths("svc");
        assert_eq!(paths.first(), Some(&PathBuf::from("grpc-logging.toml")));
        assert_eq!(
            paths.last(),
            Some(&PathBuf::from("/etc/grpc-logging/svc/config.toml"))
        );
    }

    #[test]
    fn test_logging_options() {
        let logging = LoggingConfig {
            duration_field: "elapsed".to_string(),
            duration_unit: DurationUnit::Seconds,
            suppress_success: vec!["/blah.foo.healthcheck/Check".to_string()],
            payload_methods: vec!["/blah.foo.healthcheck/Check".to_string()],
            payload_max_bytes: Some(64),
        };

        let options =
            Options::resolve(Arc::new(MemoryLogger::new()), logging.options()).unwrap();

        assert!(!options.should_log("/blah.foo.healthcheck/Check", None));
        assert!(options.should_log(
            "/blah.foo.healthcheck/Check",
            Some(&Status::unavailable("down"))
        ));
        assert!(options.should_log("/blah.foo.Other/Call", None));
        assert!(options.payload_logging());

        let fields = options.duration_fields(Duration::from_millis(1500));
        assert_eq!(fields.get("elapsed"), Some(&serde_json::json!(1.5)));
    }

    #[test]
    fn test_default_logging_options_leave_payloads_off() {
        let options =
            Options::resolve(Arc::new(MemoryLogger::new()), LoggingConfig::default().options())
                .unwrap();
        assert!(!options.payload_logging());
        assert!(options.duration_fields(Duration::ZERO).contains_key(keys::TIME_MS));
    }
}
