//! Arguments accepted by container and resource elements.

use std::fmt;

use circuit_anchor::{AnchorError, Value};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// How to run a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub image: String,

    /// Container name. A unique one is generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Memory limit in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_shares: Option<u64>,

    /// `host:container` bind mounts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,

    /// `host:container` port publications.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Entrypoint override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Remove the element from its anchor once the container exits.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub scrub: bool,
}

impl Run {
    pub fn new(image: &str) -> Self {
        Run {
            image: image.to_string(),
            ..Run::default()
        }
    }

    /// Tool arguments running this container interactively as `name`.
    ///
    /// ```rust
    /// use circuit_container::Run;
    ///
    /// let mut run = Run::new("alpine");
    /// run.ports.push("8080:80".to_string());
    /// run.args = vec!["echo".to_string(), "hi".to_string()];
    /// assert_eq!(
    ///     run.args("web").join(" "),
    ///     "container run -i --name web -p 8080:80 alpine echo hi"
    /// );
    /// ```
    pub fn args(&self, name: &str) -> Vec<String> {
        let mut args: Vec<String> = ["container", "run", "-i", "--name", name]
            .iter()
            .map(|s| s.to_string())
            .collect();
        if let Some(memory) = self.memory {
            args.extend(["--memory".to_string(), memory.to_string()]);
        }
        if let Some(shares) = self.cpu_shares {
            args.extend(["--cpu-shares".to_string(), shares.to_string()]);
        }
        for v in &self.volumes {
            args.extend(["-v".to_string(), v.clone()]);
        }
        for p in &self.ports {
            args.extend(["-p".to_string(), p.clone()]);
        }
        for e in &self.env {
            args.extend(["-e".to_string(), e.clone()]);
        }
        if let Some(entry) = &self.entry {
            args.extend(["--entrypoint".to_string(), entry.clone()]);
        }
        args.push(self.image.clone());
        args.extend(self.args.iter().cloned());
        args
    }
}

/// The tool noun a resource element manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Noun {
    Pod,
    Network,
    Volume,
}

impl Noun {
    pub fn as_str(&self) -> &'static str {
        match self {
            Noun::Pod => "pod",
            Noun::Network => "network",
            Noun::Volume => "volume",
        }
    }

    pub(crate) fn create_args(&self, name: &str, options: &[String]) -> Vec<String> {
        let mut args = vec![self.as_str().to_string(), "create".to_string()];
        match self {
            Noun::Pod => {
                args.extend(["--name".to_string(), name.to_string()]);
                args.extend(options.iter().cloned());
            }
            Noun::Network | Noun::Volume => {
                args.extend(options.iter().cloned());
                args.push(name.to_string());
            }
        }
        args
    }

    pub(crate) fn inspect_args(&self, name: &str) -> Vec<String> {
        vec![self.as_str().into(), "inspect".into(), name.into()]
    }

    pub(crate) fn rm_args(&self, name: &str) -> Vec<String> {
        let mut args = vec![self.as_str().to_string(), "rm".to_string()];
        match self {
            Noun::Pod => args.extend(["--force".to_string(), "--ignore".to_string()]),
            Noun::Network | Noun::Volume => args.push("-f".to_string()),
        }
        args.push(name.to_string());
        args
    }
}

impl fmt::Display for Noun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments for pod, network and volume elements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Create {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Extra tool flags, passed through verbatim.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// Decode an element argument given as a map or as JSON text. `Null`
/// yields the default record.
pub(crate) fn decode_arg<T>(kind: &str, arg: &Value) -> circuit_anchor::Result<T>
where
    T: DeserializeOwned + Default,
{
    let parsed = match arg {
        Value::Null => return Ok(T::default()),
        Value::String(src) => serde_json::from_str(src),
        other => other.decode::<T>(),
    };
    parsed.map_err(|err| AnchorError::invalid_argument(kind, err.to_string()))
}
