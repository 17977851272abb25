//! Publishes a configmap's `data` entries as files Envoy reads.
//!
//! Every file is staged under `new/` and renamed into `current/`, so a reader
//! of `current/` sees the previous bytes or the new bytes, never a torn file.
//! Publication is per file, not per batch: each xDS file is self-contained
//! for Envoy, so a crash between files leaving a mix of old and new is fine.
use std::path::{Path, PathBuf};

use k8s_openapi::api::core::v1::ConfigMap;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

const DEFAULT_DIR: &str = "/srv/runtime";

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stage {}: {source}", path.display())]
    StageFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to move {} into place: {source}", path.display())]
    PublishFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub struct Writer {
    dir: PathBuf,
}

impl Writer {
    pub fn new(dir: &str) -> Self {
        let dir = if dir.is_empty() { DEFAULT_DIR } else { dir };
        Self {
            dir: PathBuf::from(dir),
        }
    }

    pub async fn write(&self, cm: &ConfigMap) -> Result<()> {
        let staging = self.dir.join("new");
        let current = self.dir.join("current");
        ensure_dir(&staging).await?;
        ensure_dir(&current).await?;

        let name = cm.metadata.name.as_deref().unwrap_or_default();
        let Some(data) = cm.data.as_ref().filter(|data| !data.is_empty()) else {
            info!(configmap = %name, "nothing to write, configmap has no data");
            return Ok(());
        };

        for (file, content) in data {
            let staged = staging.join(file);
            let published = current.join(file);
            debug!(path = %staged.display(), "writing file");
            fs::write(&staged, content).await.map_err(|source| Error::StageFile {
                path: staged.clone(),
                source,
            })?;
            debug!(path = %published.display(), "moving file into place");
            fs::rename(&staged, &published)
                .await
                .map_err(|source| Error::PublishFile {
                    path: published.clone(),
                    source,
                })?;
        }

        Ok(())
    }
}

async fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).await.map_err(|source| Error::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}
