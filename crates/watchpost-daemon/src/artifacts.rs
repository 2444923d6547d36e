use std::path::PathBuf;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;
use watchpost_core::ArtifactRef;
use watchpost_worker::{ArtifactError, ArtifactStore};

/// Content-addressed filesystem artifact store.
///
/// Bytes are written once under their sha256 hex digest; identical
/// screenshots share a single file and the digest doubles as the
/// artifact reference.
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, digest: &str) -> PathBuf {
        self.dir.join(digest)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, bytes: &[u8]) -> Result<ArtifactRef, ArtifactError> {
        let digest = hex::encode(Sha256::digest(bytes));
        let path = self.path_for(&digest);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(%digest, "artifact already stored");
            return Ok(ArtifactRef(digest));
        }
        tokio::fs::write(&path, bytes).await?;
        debug!(%digest, size = bytes.len(), "artifact written");
        Ok(ArtifactRef(digest))
    }

    async fn get(&self, reference: &ArtifactRef) -> Result<Vec<u8>, ArtifactError> {
        let path = self.path_for(reference.as_str());
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ArtifactError::NotFound {
                reference: reference.as_str().to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();

        let r = store.put(b"screenshot bytes").await.unwrap();
        assert_eq!(store.get(&r).await.unwrap(), b"screenshot bytes");
    }

    #[tokio::test]
    async fn identical_bytes_share_a_reference() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();

        let a = store.put(b"same").await.unwrap();
        let b = store.put(b"same").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn missing_reference_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();

        let err = store.get(&ArtifactRef("deadbeef".into())).await.unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound { .. }));
    }
}
