//! Server configuration.

use std::path::{Path, PathBuf};

use circuit_anchor::AnchorPath;
use circuit_container::Tool;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Settings for one circuit server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Name of the root anchor.
    pub name: String,

    /// Address this server advertises to the cluster.
    pub addr: String,

    /// Docker binary, by name or path. `docker` elements are disabled when
    /// unset or when the binary does not answer `version`.
    pub docker: Option<String>,

    /// Podman binary for `container`, `pod`, `network` and `volume`
    /// elements.
    pub podman: Option<String>,

    /// Bind address for `dns` elements made without one.
    pub dns_bind: String,

    /// Buffer between processes or messages and their byte streams.
    pub std_buffer: usize,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        CircuitConfig {
            name: "circuit".to_string(),
            addr: "127.0.0.1:0".to_string(),
            docker: None,
            podman: None,
            dns_bind: circuit_dns::DEFAULT_BIND.to_string(),
            std_buffer: circuit_proc::STD_BUFFER,
        }
    }
}

/// Container tools that resolved on this host.
#[derive(Debug, Clone, Default)]
pub struct Tools {
    pub docker: Option<Tool>,
    pub podman: Option<Tool>,
}

impl CircuitConfig {
    /// Parse JSON text. Missing fields take their defaults.
    ///
    /// ```rust
    /// use circuit::CircuitConfig;
    ///
    /// let config = CircuitConfig::from_json(r#"{"name": "lab", "docker": "docker"}"#).unwrap();
    /// assert_eq!(config.name, "lab");
    /// assert_eq!(config.std_buffer, 32_000);
    /// ```
    pub fn from_json(src: &str) -> Result<Self> {
        let config: CircuitConfig = serde_json::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&src)
    }

    /// `<config dir>/circuit/config.json` for the current user.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("circuit").join("config.json"))
    }

    /// The user's configuration file if present, defaults otherwise.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "loading configuration");
                Self::from_file(path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        AnchorPath::try_from_segments(vec![self.name.clone()])
            .map_err(|err| ConfigError::Invalid(format!("name: {}", err)))?;
        if self.std_buffer == 0 {
            return Err(ConfigError::Invalid("std_buffer must be positive".to_string()));
        }
        Ok(())
    }

    /// Detect the configured container tools. A tool that cannot be found or
    /// does not answer `version` is left disabled.
    pub async fn resolve_tools(&self) -> Tools {
        async fn detect(program: &Option<String>) -> Option<Tool> {
            let program = program.as_deref()?;
            match Tool::detect(program).await {
                Ok(tool) => Some(tool),
                Err(err) => {
                    warn!(program, %err, "container tool disabled");
                    None
                }
            }
        }
        Tools {
            docker: detect(&self.docker).await,
            podman: detect(&self.podman).await,
        }
    }
}
