use crate::models::Configuration;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;
use thiserror::Error;

/// Reserved file name of a suspended session.
///
/// Selecting a file with exactly this name as the job input resumes the
/// session instead of building a fresh configuration.
pub const SNAPSHOT_FILE_NAME: &str = "suspended_session_data.yaml";

/// Errors reading or writing a session snapshot
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Failed to read session snapshot {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse session snapshot {path}: {source}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("Failed to serialize session snapshot: {0}")]
    Serialize(#[from] serde_yaml_ng::Error),

    #[error("Failed to write session snapshot {path}: {source}")]
    Write {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}

/// True when `path` names a session snapshot.
pub fn is_snapshot_file(path: &Utf8Path) -> bool {
    path.file_name() == Some(SNAPSHOT_FILE_NAME)
}

/// Where the snapshot of `config` is written.
///
/// Snapshots live next to the output file, outside the workspace, so tearing
/// down a workspace never destroys the data needed to resume it.
pub fn snapshot_path_for(config: &Configuration) -> Utf8PathBuf {
    config
        .user_settings
        .output_file
        .parent()
        .unwrap_or(Utf8Path::new(""))
        .join(SNAPSHOT_FILE_NAME)
}

/// Load a configuration from a session snapshot.
pub fn load_snapshot(path: &Utf8Path) -> Result<Configuration, SnapshotError> {
    let contents = fs::read_to_string(path).map_err(|source| SnapshotError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let config = Configuration::from_yaml(&contents).map_err(|source| SnapshotError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::info!("Loaded session snapshot from {}", path);
    Ok(config)
}

/// Write `config` as a session snapshot.
///
/// The file is written next to its final location and renamed into place, so
/// a reader never observes a half-written snapshot.
pub fn write_snapshot(config: &Configuration, path: &Utf8Path) -> Result<(), SnapshotError> {
    let yaml = serde_yaml_ng::to_string(config)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| SnapshotError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let tmp_path = path.with_extension("yaml.tmp");
    fs::write(&tmp_path, yaml).map_err(|source| SnapshotError::Write {
        path: tmp_path.clone(),
        source,
    })?;
    fs::rename(&tmp_path, path).map_err(|source| SnapshotError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::info!("Saved session snapshot to {}", path);
    Ok(())
}

/// Delete a snapshot once its session has completed.
///
/// Returns `Ok(false)` when there was nothing to delete.
pub fn remove_snapshot(path: &Utf8Path) -> Result<bool, SnapshotError> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("Removed session snapshot {}", path);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(SnapshotError::Write {
            path: path.to_path_buf(),
            source,
        }),
    }
}
