//! ---
//! nest_section: "03-persistence-logging"
//! nest_subsection: "module"
//! nest_type: "source"
//! nest_scope: "code"
//! nest_description: "Settings snapshot written at the start of every session."
//! nest_version: "v0.0.0-prealpha"
//! nest_owner: "tbd"
//! ---
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nest_common::config::Settings;
use thiserror::Error;
use tracing::debug;

/// File name of the snapshot inside the session logs directory.
pub const SETTINGS_SNAPSHOT_FILE: &str = "settings.json";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("unable to create snapshot directory {}: {source}", .path.display())]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("unable to write settings snapshot {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("unable to read settings snapshot {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("settings snapshot serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Write the full resolved settings as pretty JSON to
/// `<out_dir>/settings.json`, creating `out_dir` and replacing any previous
/// snapshot. Returns the snapshot path.
pub fn write_settings_snapshot(settings: &Settings, out_dir: &Path) -> Result<PathBuf, SnapshotError> {
    fs::create_dir_all(out_dir).map_err(|source| SnapshotError::CreateDir {
        path: out_dir.to_path_buf(),
        source,
    })?;
    let path = out_dir.join(SETTINGS_SNAPSHOT_FILE);
    let json = serde_json::to_vec_pretty(settings)?;
    fs::write(&path, json).map_err(|source| SnapshotError::Write {
        path: path.clone(),
        source,
    })?;
    debug!(path = %path.display(), "settings snapshot written");
    Ok(path)
}

/// Load a snapshot written by [`write_settings_snapshot`].
pub fn read_settings_snapshot(path: &Path) -> Result<Settings, SnapshotError> {
    let bytes = fs::read(path).map_err(|source| SnapshotError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use nest_common::config::{ConnectionMode, RunSettings, Settings};

    use super::*;

    fn settings(root: &Path) -> Settings {
        Settings {
            mode: ConnectionMode::Udp,
            dry_run: true,
            run: RunSettings::rooted_at(root),
            radio: Default::default(),
            swarm: Default::default(),
            vision: Default::default(),
            features: Default::default(),
            uri: None,
        }
    }

    #[test]
    fn snapshot_creates_nested_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out_dir = temp.path().join("runs").join("today");
        let path = write_settings_snapshot(&settings(temp.path()), &out_dir).expect("write");
        assert_eq!(path, out_dir.join(SETTINGS_SNAPSHOT_FILE));
        assert!(path.is_file());
    }

    #[test]
    fn snapshot_overwrites_previous_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut first = settings(temp.path());
        write_settings_snapshot(&first, temp.path()).expect("first write");
        first.dry_run = false;
        first.uri = Some("udp://127.0.0.1:2390".into());
        let path = write_settings_snapshot(&first, temp.path()).expect("second write");
        let loaded = read_settings_snapshot(&path).expect("read back");
        assert_eq!(loaded, first);
    }

    #[test]
    fn paths_are_rendered_as_text() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = settings(temp.path());
        let path = write_settings_snapshot(&settings, temp.path()).expect("write");
        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(path).expect("read")).expect("json");
        assert_eq!(
            value["run"]["logs_dir"].as_str(),
            Some(settings.run.logs_dir.to_string_lossy().as_ref())
        );
        assert_eq!(value["mode"], "udp");
    }

    #[test]
    fn unwritable_directory_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("occupied");
        fs::write(&blocker, b"not a directory").expect("blocker file");
        let err = write_settings_snapshot(&settings(temp.path()), &blocker.join("logs"))
            .expect_err("parent is a file");
        assert!(matches!(err, SnapshotError::CreateDir { .. }));
    }
}
