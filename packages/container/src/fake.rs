//! A shell script standing in for docker/podman in tests.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use lazy_static::lazy_static;
use tempfile::TempDir;

use crate::tool::Tool;

const SCRIPT: &str = r#"#!/bin/sh
echo "$*" >> "$0.log"
case "$1" in
version) exit 0 ;;
container)
    case "$2" in
    run) exec cat ;;
    inspect) printf '[{"Name":"%s","State":{"Status":"exited"}}]\n' "$3" ;;
    rm) exit 0 ;;
    esac ;;
pod|network|volume)
    case "$2" in
    create) echo "id-$1" ;;
    inspect) printf '[{"Name":"%s","Kind":"%s"}]\n' "$3" "$1" ;;
    rm) exit 0 ;;
    esac ;;
*) echo "unknown command" >&2; exit 125 ;;
esac
"#;

lazy_static! {
    static ref FAKE: (TempDir, PathBuf) = {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fake-runtime");
        fs::write(&path, SCRIPT).expect("write fake runtime");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        (dir, path)
    };
}

pub(crate) fn fake_tool() -> Tool {
    Tool::at("fake-runtime", FAKE.1.clone())
}

/// Every invocation of the fake tool so far, one argument line each.
pub(crate) fn calls() -> Vec<String> {
    let mut log = FAKE.1.clone().into_os_string();
    log.push(".log");
    fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}
