//! Boot loader blobs served to every client.

use crate::error::PxeError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// File name of the pxelinux chainloader served over TFTP.
pub const LPXELINUX: &str = "lpxelinux.0";
/// File name of the pxelinux core module served over HTTP.
pub const LDLINUX: &str = "ldlinux.c32";

/// pxelinux binaries, loaded once at startup.
#[derive(Debug, Clone)]
pub struct BootAssets {
    pub lpxelinux: Arc<[u8]>,
    pub ldlinux: Arc<[u8]>,
}

impl BootAssets {
    /// Read both blobs from `dir`. Either one missing is fatal.
    pub async fn load(dir: &Path) -> Result<Self, PxeError> {
        let lpxelinux = read(dir.join(LPXELINUX)).await?;
        let ldlinux = read(dir.join(LDLINUX)).await?;
        info!(
            "Loaded boot assets from {} ({} and {} bytes)",
            dir.display(),
            lpxelinux.len(),
            ldlinux.len()
        );
        Ok(Self { lpxelinux, ldlinux })
    }

    pub fn from_bytes(lpxelinux: impl Into<Arc<[u8]>>, ldlinux: impl Into<Arc<[u8]>>) -> Self {
        Self {
            lpxelinux: lpxelinux.into(),
            ldlinux: ldlinux.into(),
        }
    }
}

async fn read(path: PathBuf) -> Result<Arc<[u8]>, PxeError> {
    match tokio::fs::read(&path).await {
        Ok(bytes) if bytes.is_empty() => Err(PxeError::Configuration(format!("{} is empty", path.display()))),
        Ok(bytes) => Ok(bytes.into()),
        Err(e) => Err(PxeError::Configuration(format!("cannot read {}: {}", path.display(), e))),
    }
}
