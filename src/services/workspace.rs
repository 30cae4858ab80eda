use crate::models::{PermissionPolicy, WorkspacePolicy};
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep};

/// Fatal errors while preparing a workspace
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Failed to inspect workspace {path}: {source}")]
    Inspect {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to remove workspace {path}: {source}")]
    Removal {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Permission denied while removing workspace {path}: {source}")]
    PermissionDenied {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Workspace {path} still exists {elapsed:?} after it was deleted")]
    DeletionTimeout { path: Utf8PathBuf, elapsed: Duration },
}

/// Non-fatal problems the caller may still want to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceWarning {
    /// The stale workspace could not be removed and may corrupt the new job.
    PermissionDenied { path: Utf8PathBuf, message: String },

    /// A resumed session's workspace is gone; the pipeline starts from scratch.
    MissingResumeWorkspace { path: Utf8PathBuf },
}

impl fmt::Display for WorkspaceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkspaceWarning::PermissionDenied { path, message } => write!(
                f,
                "could not delete stale workspace {} ({}), the job may not work",
                path, message
            ),
            WorkspaceWarning::MissingResumeWorkspace { path } => {
                write!(f, "workspace {} of the suspended session is missing", path)
            }
        }
    }
}

/// What `prepare`/`adopt` did to the workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceReport {
    /// A leftover directory was found and deleted.
    pub removed: bool,
    pub warnings: Vec<WorkspaceWarning>,
}

impl WorkspaceReport {
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Owns teardown of the per-job working directory.
///
/// Deletion is not always visible immediately (network drives, some Windows
/// setups), so after deleting a stale workspace the manager polls with
/// exponential backoff until the directory is gone or the policy's timeout
/// elapses.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceManager {
    policy: WorkspacePolicy,
}

impl WorkspaceManager {
    pub fn new(policy: WorkspacePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &WorkspacePolicy {
        &self.policy
    }

    /// Make sure `path` does not exist so the pipeline can create it fresh.
    ///
    /// Calling this on an absent path is a no-op, so it is idempotent.
    pub async fn prepare(&self, path: &Utf8Path) -> Result<WorkspaceReport, WorkspaceError> {
        if !Self::exists(path).await? {
            tracing::debug!("Workspace {} does not exist, nothing to clean", path);
            return Ok(WorkspaceReport::default());
        }

        tracing::info!("Deleting stale workspace {}", path);

        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("Workspace {} vanished before it was deleted", path);
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return self.permission_denied(path, e);
            }
            Err(source) => {
                return Err(WorkspaceError::Removal {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }

        self.wait_until_gone(path).await?;

        tracing::info!("Workspace {} deleted", path);
        Ok(WorkspaceReport {
            removed: true,
            warnings: Vec::new(),
        })
    }

    /// Keep the workspace of a resumed session instead of deleting it.
    pub async fn adopt(&self, path: &Utf8Path) -> Result<WorkspaceReport, WorkspaceError> {
        if Self::exists(path).await? {
            tracing::info!("Reusing workspace {} of suspended session", path);
            return Ok(WorkspaceReport::default());
        }

        let warning = WorkspaceWarning::MissingResumeWorkspace {
            path: path.to_path_buf(),
        };
        tracing::warn!("{}", warning);

        Ok(WorkspaceReport {
            removed: false,
            warnings: vec![warning],
        })
    }

    fn permission_denied(
        &self,
        path: &Utf8Path,
        source: io::Error,
    ) -> Result<WorkspaceReport, WorkspaceError> {
        match self.policy.permission_policy {
            PermissionPolicy::Strict => {
                tracing::error!("Permission denied deleting workspace {}: {}", path, source);
                Err(WorkspaceError::PermissionDenied {
                    path: path.to_path_buf(),
                    source,
                })
            }
            PermissionPolicy::Lenient => {
                let warning = WorkspaceWarning::PermissionDenied {
                    path: path.to_path_buf(),
                    message: source.to_string(),
                };
                tracing::warn!("{}", warning);

                // The delete was refused, so polling for it to disappear would only time out.
                Ok(WorkspaceReport {
                    removed: false,
                    warnings: vec![warning],
                })
            }
        }
    }

    async fn wait_until_gone(&self, path: &Utf8Path) -> Result<(), WorkspaceError> {
        let started = Instant::now();
        let timeout = self.policy.deletion_timeout();
        let mut backoff = self.policy.initial_backoff();

        loop {
            if !Self::exists(path).await? {
                return Ok(());
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                tracing::error!("Workspace {} still present after {:?}", path, elapsed);
                return Err(WorkspaceError::DeletionTimeout {
                    path: path.to_path_buf(),
                    elapsed,
                });
            }

            tracing::debug!("Waiting {:?} for workspace {} to disappear", backoff, path);
            sleep(backoff.min(timeout - elapsed)).await;
            backoff = (backoff * 2).min(self.policy.max_backoff());
        }
    }

    async fn exists(path: &Utf8Path) -> Result<bool, WorkspaceError> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|source| WorkspaceError::Inspect {
                path: path.to_path_buf(),
                source,
            })
    }
}
