//! Process commands and status records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What to run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cmd {
    /// `KEY=VALUE` entries. When non-empty, the process sees only these.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Working directory, if non-empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dir: String,

    /// Path to the binary on the server running the process.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    /// Arguments, not including the binary itself.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Remove the element from its anchor once the process exits.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub scrub: bool,
}

impl Cmd {
    pub fn new(path: &str) -> Self {
        Cmd {
            path: path.to_string(),
            ..Cmd::default()
        }
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn with_scrub(mut self, scrub: bool) -> Self {
        self.scrub = scrub;
        self
    }

    /// Parse a command written as JSON.
    ///
    /// ```rust
    /// use circuit_proc::Cmd;
    ///
    /// let cmd = Cmd::parse(r#"{"path": "/bin/ls", "args": ["-l", "/"]}"#).unwrap();
    /// assert_eq!(cmd.args, vec!["-l", "/"]);
    /// assert!(!cmd.scrub);
    /// ```
    pub fn parse(src: &str) -> Result<Cmd, serde_json::Error> {
        serde_json::from_str(src)
    }

    /// Environment entries split into key and value. Entries without `=`
    /// are kept as keys with an empty value.
    pub(crate) fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env
            .iter()
            .map(|entry| entry.split_once('=').unwrap_or((entry.as_str(), "")))
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string_pretty(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => Err(fmt::Error),
        }
    }
}

/// Lifecycle phase of a process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// The spawn itself failed.
    NotStarted,
    Running,
    Exited,
    Stopped,
    Signaled,
    Continued,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::NotStarted => "notstarted",
            Phase::Running => "running",
            Phase::Exited => "exited",
            Phase::Stopped => "stopped",
            Phase::Signaled => "signaled",
            Phase::Continued => "continued",
        }
    }

    /// Phases after which the process will not run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::NotStarted | Phase::Exited | Phase::Signaled)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcStat {
    pub cmd: Cmd,
    /// Why the process ended, if it ended badly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<String>,
    pub phase: Phase,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_command() {
        let cmd = Cmd::parse(
            r#"{"env": ["A=1"], "dir": "/tmp", "path": " /bin/echo ", "args": ["x"], "scrub": true}"#,
        )
        .unwrap();
        assert_eq!(cmd.env, vec!["A=1"]);
        assert_eq!(cmd.dir, "/tmp");
        assert!(cmd.scrub);
        assert_eq!(cmd.env_pairs().collect::<Vec<_>>(), vec![("A", "1")]);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Cmd::parse("not json").is_err());
    }

    #[test]
    fn display_omits_defaults() {
        let text = Cmd::new("/bin/true").to_string();
        assert!(text.contains("\"path\""));
        assert!(!text.contains("scrub"));
        assert!(!text.contains("env"));
    }

    #[test]
    fn phase_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Phase::NotStarted).unwrap(),
            "\"notstarted\""
        );
        assert_eq!(Phase::Signaled.to_string(), "signaled");
        assert!(Phase::Exited.is_terminal());
        assert!(!Phase::Stopped.is_terminal());
    }
}
