//! Layered configuration.
//!
//! Values are merged in order, later layers winning:
//!
//! 1. Built-in defaults.
//! 2. An optional configuration file (TOML, YAML or JSON, chosen by
//!    extension; anything else is read as TOML).
//! 3. Environment variables prefixed with `VAULT_`, using `__` to reach
//!    nested keys (`VAULT_BLOBSTORE__ROOT=/srv/blobs`).

pub mod error;
mod models;

pub use crate::models::{BlobStoreConfig, ObjectStorageOptions, Scheme, SourceDescriptor, ToolConfig};

use crate::error::{ErrorKind, Result};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "VAULT_";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub blobstore: BlobStoreConfig,
    #[serde(default)]
    pub sources: Vec<SourceDescriptor>,
    #[serde(default)]
    pub object_storage: ObjectStorageOptions,
    /// Identification tools, run in this order.
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
}

impl Config {
    /// Load and validate configuration from defaults, an optional file and
    /// the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(path))
    }

    /// The layered provider chain behind [`load()`](Self::load), exposed so
    /// callers can merge extra layers (command-line flags, say) on top.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
            figment = match extension.as_deref() {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().map_err(|e| ErrorKind::Load(e.to_string()))?;
        config.validate()?;
        tracing::debug!(
            sources = config.sources.len(),
            tools = config.tools.len(),
            blobstore = %config.blobstore.root.display(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Reject configurations that would only fail later, at connect time.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                exn::bail!(ErrorKind::Invalid("source name must not be empty".to_string()));
            }
            if source.location.trim().is_empty() {
                exn::bail!(ErrorKind::Invalid(format!("source `{}` has no location", source.name)));
            }
            if !names.insert(source.name.as_str()) {
                exn::bail!(ErrorKind::Invalid(format!("duplicate source name `{}`", source.name)));
            }
        }
        let mut tools = HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() || tool.name.contains('.') {
                exn::bail!(ErrorKind::Invalid(format!("invalid tool name `{}`", tool.name)));
            }
            if tool.program.trim().is_empty() {
                exn::bail!(ErrorKind::Invalid(format!("tool `{}` has no program", tool.name)));
            }
            if !tools.insert(tool.name.as_str()) {
                exn::bail!(ErrorKind::Invalid(format!("duplicate tool name `{}`", tool.name)));
            }
        }
        Ok(())
    }

    /// Look up a source descriptor by name.
    pub fn source(&self, name: &str) -> Option<&SourceDescriptor> {
        self.sources.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::PathBuf;

    const TOML: &str = r#"
        [blobstore]
        root = "/srv/vault/blobs"

        [object_storage]
        region = "eu-west-2"
        endpoint = "http://localhost:9000"

        [[sources]]
        name = "scans"
        scheme = "local-file"
        location = "/data/scans"

        [[sources]]
        name = "archive"
        scheme = "object-storage"
        location = "preservation-bucket/incoming"

        [[tools]]
        name = "file"
        program = "file"
        args = ["--brief", "--mime"]

        [[tools]]
        name = "siegfried"
        program = "sf"
        enabled = false
    "#;

    fn from_toml(toml: &str) -> Result<Config> {
        Config::from_figment(Figment::from(Serialized::defaults(Config::default())).merge(Toml::string(toml)))
    }

    #[test]
    fn test_defaults() {
        let config = from_toml("").unwrap();
        assert!(config.sources.is_empty());
        assert!(config.tools.is_empty());
        assert_eq!(config.object_storage.region, "us-east-1");
        assert!(config.blobstore.root.ends_with("blobs"));
    }

    #[test]
    fn test_full_toml() {
        let config = from_toml(TOML).unwrap();
        assert_eq!(config.blobstore.root, PathBuf::from("/srv/vault/blobs"));
        assert_eq!(config.object_storage.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.sources.len(), 2);
        let scans = config.source("scans").unwrap();
        assert_eq!(scans.scheme, Scheme::LocalFile);
        let archive = config.source("archive").unwrap();
        assert_eq!(archive.scheme, Scheme::ObjectStorage);
        assert_eq!(archive.bucket_and_prefix(), ("preservation-bucket", Some("incoming")));
        assert!(config.source("nope").is_none());
        assert_eq!(config.tools[0].args, vec!["--brief", "--mime"]);
        assert!(config.tools[0].enabled);
        assert!(!config.tools[1].enabled);
    }

    #[test]
    fn test_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.yaml");
        std::fs::write(
            &path,
            "sources:\n  - name: local\n    scheme: local-file\n    location: /tmp/data\n",
        )
        .unwrap();
        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.sources[0].name, "local");
        assert_eq!(config.sources[0].scheme, Scheme::LocalFile);
    }

    #[rstest]
    #[case(
        "[[sources]]\nname = \"a\"\nscheme = \"local-file\"\nlocation = \"/x\"\n[[sources]]\nname = \"a\"\nscheme = \"local-file\"\nlocation = \"/y\"",
        "duplicate source name"
    )]
    #[case("[[sources]]\nname = \"a\"\nscheme = \"local-file\"\nlocation = \"\"", "has no location")]
    #[case("[[tools]]\nname = \"fi.le\"\nprogram = \"file\"", "invalid tool name")]
    #[case("[[tools]]\nname = \"file\"\nprogram = \"\"", "has no program")]
    fn test_invalid(#[case] toml: &str, #[case] message: &str) {
        let err = from_toml(toml).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
        assert!((*err).to_string().contains(message), "{err:?}");
    }

    #[test]
    fn test_unknown_scheme() {
        let err = from_toml("[[sources]]\nname = \"a\"\nscheme = \"ftp\"\nlocation = \"/x\"").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Load(_)));
    }
}
