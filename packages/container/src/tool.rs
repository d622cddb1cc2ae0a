//! The external container runtime command.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use circuit_proc::Cmd;
use serde_json::Value as Json;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{ContainerError, Result};

/// A container runtime binary (`docker` or `podman`) resolved on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    name: String,
    path: PathBuf,
}

impl Tool {
    /// Use `path` without probing it.
    pub fn at(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Tool {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Find `program` on `PATH` (or at the given path) and check that
    /// `<program> version` succeeds.
    pub async fn detect(program: &str) -> Result<Tool> {
        let unavailable = || ContainerError::ToolUnavailable(program.to_string());
        let path = which::which(program).map_err(|err| {
            debug!(program, %err, "container tool not found");
            unavailable()
        })?;

        let status = Command::new(&path)
            .arg("version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|_| unavailable())?;
        if !status.success() {
            warn!(program, path = %path.display(), %status, "container tool does not answer `version`");
            return Err(unavailable());
        }

        let name = Path::new(program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.to_string());
        info!(tool = %name, path = %path.display(), "container tool resolved");
        Ok(Tool { name, path })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A process command record invoking the tool with `args`.
    pub fn cmd(&self, args: Vec<String>) -> Cmd {
        Cmd {
            path: self.path.to_string_lossy().into_owned(),
            args,
            ..Cmd::default()
        }
    }

    /// Run to completion and return stdout. A non-zero exit is an error
    /// carrying stderr.
    pub async fn output(&self, args: &[String]) -> Result<Vec<u8>> {
        debug!(tool = %self.name, ?args, "running container tool");
        let out = Command::new(&self.path)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !out.status.success() {
            return Err(ContainerError::Command {
                command: format!("{} {}", self.name, args.join(" ")),
                status: out.status.to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(out.stdout)
    }

    pub async fn run(&self, args: &[String]) -> Result<()> {
        self.output(args).await.map(|_| ())
    }

    /// Fire-and-forget invocation for cleanup paths that cannot await.
    pub(crate) fn run_detached(&self, args: Vec<String>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(tool = %self.name, ?args, "no runtime for cleanup, skipping");
            return;
        };
        let tool = self.clone();
        handle.spawn(async move {
            if let Err(err) = tool.run(&args).await {
                debug!(%err, "best-effort cleanup failed");
            }
        });
    }
}

/// The single record of an `inspect` array.
pub fn parse_json_array_first(buf: &[u8]) -> Result<Json> {
    let mut records: Vec<Json> = serde_json::from_slice(buf)?;
    if records.len() != 1 {
        return Err(ContainerError::NotOneRecord(records.len()));
    }
    Ok(records.remove(0))
}

/// `name` if given, otherwise a fresh `via-circuit-` name.
pub fn element_name(name: Option<&str>) -> String {
    match name.map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("via-circuit-{}", &id[..16])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::fake_tool;

    #[test]
    fn inspect_arrays() {
        let rec = parse_json_array_first(br#"[{"Name": "a"}]"#).unwrap();
        assert_eq!(rec["Name"], "a");
        assert!(matches!(
            parse_json_array_first(b"[]"),
            Err(ContainerError::NotOneRecord(0))
        ));
        assert!(matches!(
            parse_json_array_first(b"{}"),
            Err(ContainerError::Json(_))
        ));
    }

    #[test]
    fn generated_names() {
        let a = element_name(None);
        let b = element_name(Some("  "));
        assert!(a.starts_with("via-circuit-"));
        assert_eq!(a.len(), "via-circuit-".len() + 16);
        assert_ne!(a, b);
        assert_eq!(element_name(Some("web")), "web");
    }

    #[tokio::test]
    async fn detect_finds_working_tools() {
        let fake = fake_tool();
        let tool = Tool::detect(&fake.path().to_string_lossy()).await.unwrap();
        assert_eq!(tool.path(), fake.path());
        assert_eq!(tool.name(), "fake-runtime");
    }

    #[tokio::test]
    async fn detect_rejects_missing_and_broken_tools() {
        assert!(matches!(
            Tool::detect("/no/such/runtime").await,
            Err(ContainerError::ToolUnavailable(_))
        ));
        assert!(matches!(
            Tool::detect("false").await,
            Err(ContainerError::ToolUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn failed_commands_carry_stderr() {
        let tool = fake_tool();
        let err = tool.run(&["bogus".to_string()]).await.unwrap_err();
        match err {
            ContainerError::Command { stderr, command, .. } => {
                assert_eq!(stderr, "unknown command");
                assert!(command.ends_with("bogus"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
