use crate::error::{Result, RuntimeError};
use crate::language::{LanguageProfile, TemplateVars};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const CREATE_ATTEMPTS: usize = 3;

/// An exclusively-owned directory holding one submission's source and build
/// artifacts. The directory is removed by [`Workspace::release`] or, failing
/// that, when the value is dropped.
#[derive(Debug)]
pub struct Workspace {
    id: String,
    dir: PathBuf,
    source_path: PathBuf,
    released: bool,
}

impl Workspace {
    /// Creates a uniquely named directory under `root` and writes `source`
    /// into it using the profile's file name.
    pub async fn acquire(root: &Path, profile: &LanguageProfile, source: &str) -> Result<Self> {
        tokio::fs::create_dir_all(root).await.map_err(|e| {
            RuntimeError::Workspace(format!(
                "Failed to create workspace root {}: {}",
                root.display(),
                e
            ))
        })?;
        let root = tokio::fs::canonicalize(root).await?;

        let mut workspace = None;
        for _ in 0..CREATE_ATTEMPTS {
            let id = Uuid::new_v4().simple().to_string();
            let dir = root.join(format!("run_{}", id));

            match tokio::fs::create_dir(&dir).await {
                Ok(()) => {
                    workspace = Some(Self {
                        id,
                        source_path: dir.join(profile.source_file()),
                        dir,
                        released: false,
                    });
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(RuntimeError::Workspace(format!(
                        "Failed to create workspace directory {}: {}",
                        dir.display(),
                        e
                    )))
                }
            }
        }

        let workspace = workspace.ok_or_else(|| {
            RuntimeError::Workspace("Could not allocate a unique workspace directory".into())
        })?;

        tokio::fs::write(&workspace.source_path, source)
            .await
            .map_err(|e| {
                RuntimeError::Workspace(format!(
                    "Failed to write source file {}: {}",
                    workspace.source_path.display(),
                    e
                ))
            })?;

        debug!("Acquired workspace {}", workspace.dir.display());
        Ok(workspace)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn template_vars(&self, profile: &LanguageProfile) -> TemplateVars {
        TemplateVars::new(&self.dir, profile)
    }

    /// Recursively deletes the workspace. Failures are logged, never returned.
    pub async fn release(mut self) {
        self.released = true;
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => debug!("Released workspace {}", self.dir.display()),
            Err(e) => warn!(
                "Could not remove workspace directory {}: {}",
                self.dir.display(),
                e
            ),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "Could not remove workspace directory {}: {}",
                    self.dir.display(),
                    e
                );
            }
        }
    }
}
