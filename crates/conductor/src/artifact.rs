//! Artifact storage used by metered tools that produce persisted side
//! effects (image output). The engine's only contract with the store is
//! "upload returns path-or-error" and "delete is best-effort".

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use uuid::Uuid;

use crate::error::Error;

/// Trait for artifact stores.
///
/// Uses `Pin<Box<dyn Future>>` for dyn-compatibility, matching the `Tool`
/// trait pattern.
pub trait ArtifactStore: Send + Sync {
    /// Upload bytes, returning the storage path of the new artifact.
    fn upload(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String, Error>> + Send + '_>>;

    /// Delete an artifact by path. Best-effort: callers log failures and
    /// move on.
    fn delete(&self, path: &str) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>>;
}

/// Thread-safe in-memory artifact store.
///
/// Backed by `RwLock<HashMap>`. Suitable for tests and single-process use.
#[derive(Default)]
pub struct InMemoryArtifacts {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts. Test helper.
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects
            .read()
            .map(|o| o.contains_key(path))
            .unwrap_or(false)
    }
}

impl ArtifactStore for InMemoryArtifacts {
    fn upload(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String, Error>> + Send + '_>> {
        let path = format!(
            "artifacts/{}.{}",
            Uuid::new_v4(),
            extension_for(content_type)
        );
        Box::pin(async move {
            let mut objects = self
                .objects
                .write()
                .map_err(|e| Error::Artifact(format!("lock poisoned: {e}")))?;
            objects.insert(path.clone(), bytes);
            Ok(path)
        })
    }

    fn delete(&self, path: &str) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            let mut objects = self
                .objects
                .write()
                .map_err(|e| Error::Artifact(format!("lock poisoned: {e}")))?;
            objects
                .remove(&path)
                .map(|_| ())
                .ok_or_else(|| Error::Artifact(format!("no such artifact: {path}")))
        })
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_delete() {
        let store = InMemoryArtifacts::new();
        let path = store.upload(vec![1, 2, 3], "image/png").await.unwrap();
        assert!(path.starts_with("artifacts/"));
        assert!(path.ends_with(".png"));
        assert!(store.contains(&path));

        store.delete(&path).await.unwrap();
        assert!(!store.contains(&path));
    }

    #[tokio::test]
    async fn delete_missing_artifact_errors() {
        let store = InMemoryArtifacts::new();
        let err = store.delete("artifacts/nope.png").await.unwrap_err();
        assert!(matches!(err, Error::Artifact(_)));
    }

    #[tokio::test]
    async fn unknown_content_type_gets_bin_extension() {
        let store = InMemoryArtifacts::new();
        let path = store.upload(vec![0], "application/x-custom").await.unwrap();
        assert!(path.ends_with(".bin"));
    }
}
