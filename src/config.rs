//! Proxy configuration.
//!
//! Loaded from YAML. Every field has a default, so an empty file (or no file
//! at all) yields a working proxy for a local origin on port 8081.
//!
//! ```yaml
//! listen: 127.0.0.1:8080
//! upstream: http://127.0.0.1:8081
//! version: 1700000000
//! cache_dir: /var/cache/swproxy
//! files_to_cache:
//!   - /
//!   - /js/app.js
//! api_fns:
//!   - get_individual
//!   - get_rights
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::proxy::ProxySettings;

/// Config file looked up in the working directory when none is given.
pub const LOCAL_CONFIG: &str = "swproxy.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config{}: {source}", origin(.path.as_deref()))]
    Parse {
        path: Option<PathBuf>,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

fn origin(path: Option<&Path>) -> String {
    path.map(|p| format!(" file {}", p.display()))
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the proxy listens on.
    pub listen: String,
    /// Origin every request is forwarded to.
    pub upstream: String,
    /// Partition version stamp. Bump it to evict everything cached so far.
    pub version: u64,
    /// Directory for the persistent store. In-memory when unset.
    pub cache_dir: Option<PathBuf>,
    /// Static asset paths cached at install time.
    pub files_to_cache: Vec<String>,
    /// API function names, matched against the last path segment.
    pub api_fns: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_owned(),
            upstream: "http://127.0.0.1:8081".to_owned(),
            version: 1,
            cache_dir: None,
            files_to_cache: [
                "/",
                "/manifest",
                "/favicon.ico",
                "/css/bootstrap.min.css",
                "/css/app.css",
                "/fonts/glyphicons-halflings-regular.woff2",
                "/js/app.js",
            ]
            .map(String::from)
            .to_vec(),
            api_fns: [
                "authenticate",
                "get_individual",
                "get_individuals",
                "get_membership",
                "get_rights",
                "get_rights_origin",
                "get_ticket_trusted",
                "is_ticket_valid",
                "logout",
                "query",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

impl Config {
    /// Loads configuration.
    ///
    /// Search order:
    /// 1. Explicit path if provided (must exist)
    /// 2. `./swproxy.yaml`
    /// 3. Built-in defaults
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit_path {
            Some(p) if p.exists() => Some(p.to_path_buf()),
            Some(p) => {
                return Err(ConfigError::NotFound {
                    path: p.to_path_buf(),
                });
            }
            None => Some(PathBuf::from(LOCAL_CONFIG)).filter(|p| p.exists()),
        };

        match path {
            Some(p) => Self::load_from_path(&p),
            None => Ok(Self::default()),
        }
    }

    fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&contents).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: Some(path.to_path_buf()),
                source,
            },
            other => other,
        })
    }

    /// Parses and validates YAML text.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as null, not as an empty mapping.
        let config: Config = if yaml.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(yaml)
                .map_err(|source| ConfigError::Parse { path: None, source })?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version == 0 {
            return Err(ConfigError::Invalid("version must be positive".to_owned()));
        }
        if let Some(bad) = self.files_to_cache.iter().find(|p| !p.starts_with('/')) {
            return Err(ConfigError::Invalid(format!(
                "files_to_cache entry {bad:?} must be an absolute path"
            )));
        }
        if let Some(bad) = self
            .api_fns
            .iter()
            .find(|f| f.is_empty() || f.contains(['/', '?']))
        {
            return Err(ConfigError::Invalid(format!(
                "api_fns entry {bad:?} must be a single path segment"
            )));
        }
        Ok(())
    }

    pub fn proxy_settings(&self) -> ProxySettings {
        ProxySettings {
            version: self.version,
            files_to_cache: self.files_to_cache.clone(),
            api_fns: self.api_fns.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = Config::parse("version: 1700000000\ncache_dir: /tmp/sw\n").unwrap();
        assert_eq!(config.version, 1_700_000_000);
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/sw")));
        assert_eq!(config.listen, Config::default().listen);
        assert!(config.api_fns.iter().any(|f| f == "get_individual"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            Config::parse("lisen: 0.0.0.0:80\n"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn relative_asset_path_is_invalid() {
        let err = Config::parse("files_to_cache: [js/app.js]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn api_fn_must_be_a_segment() {
        assert!(Config::parse("api_fns: [api/get_rights]\n").is_err());
        assert!(Config::parse("api_fns: ['']\n").is_err());
    }

    #[test]
    fn zero_version_is_invalid() {
        assert!(Config::parse("version: 0\n").is_err());
    }

    #[test]
    fn missing_explicit_file() {
        let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swproxy.yaml");
        std::fs::write(&path, "upstream: http://origin:9000\napi_fns: [get_rights]\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.upstream, "http://origin:9000");
        assert_eq!(config.proxy_settings().api_fns, vec!["get_rights"]);
    }

    #[test]
    fn parse_error_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "version: [").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }
}
