// Jackson Coxson
//! Memoisation and resource cache (C3): one-shot lazy computation with
//! double-checked publication, and an interned resource registry whose
//! `to_path()` lazily extracts an embedded blob under a per-process temp
//! root (itself lazy). Grounded in the teacher's use of `OnceLock`/`once`
//! guards for expensive one-time setup (e.g. the TLS session start in
//! `Idevice::start_session`), generalized into a reusable primitive.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::OnceCell;

/// A lazily-computed, cached value or failure. The producer runs at most
/// once; every subsequent call returns (or re-raises) the cached outcome.
pub struct Lazy<T, E> {
    cell: OnceCell<Result<T, E>>,
}

impl<T, E> Default for Lazy<T, E> {
    fn default() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }
}

impl<T, E> Lazy<T, E>
where
    T: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached outcome, computing it via `producer` on first
    /// call. Concurrent callers race to run `producer` exactly once;
    /// tokio's `OnceCell` resolves this with double-checked publication.
    pub async fn get_or_try_init<F, Fut>(&self, producer: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.cell.get_or_init(|| async { producer().await }).await.clone()
    }
}

/// Per-process temp root, lazily created on first use and shared by every
/// [`ResourceRegistry`] in the process.
static TEMP_ROOT: OnceCell<PathBuf> = OnceCell::const_new();

async fn temp_root() -> &'static PathBuf {
    TEMP_ROOT
        .get_or_init(|| async {
            let dir = std::env::temp_dir().join(format!("iosdevicectl-{}", std::process::id()));
            let _ = tokio::fs::create_dir_all(&dir).await;
            dir
        })
        .await
}

/// An embedded resource blob, interned by name: two [`ResourceRegistry::get`]
/// calls with the same name return the same `Arc<Resource>`, and its
/// `to_path()` extracts the blob to disk only once.
pub struct Resource {
    name: String,
    bytes: &'static [u8],
    path: OnceCell<PathBuf>,
}

impl Resource {
    /// Lazily copies the embedded blob under the per-process temp root
    /// and returns the path it was written to.
    pub async fn to_path(&self) -> std::io::Result<&Path> {
        self.path
            .get_or_try_init(|| async {
                let path = temp_root().await.join(&self.name);
                tokio::fs::write(&path, self.bytes).await?;
                Ok::<_, std::io::Error>(path)
            })
            .await
            .map(PathBuf::as_path)
    }
}

/// Intern-by-name registry over embedded resource blobs.
#[derive(Default)]
pub struct ResourceRegistry {
    interned: std::sync::Mutex<HashMap<String, Arc<Resource>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the interned [`Resource`] for `name`, registering it with
    /// `bytes` the first time this name is seen. Later calls with the
    /// same name ignore `bytes` and return the existing instance.
    pub fn get(&self, name: &str, bytes: &'static [u8]) -> Arc<Resource> {
        let mut interned = self.interned.lock().expect("resource registry mutex poisoned");
        interned
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Resource {
                    name: name.to_string(),
                    bytes,
                    path: OnceCell::new(),
                })
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn lazy_producer_runs_exactly_once() {
        let calls = AtomicU32::new(0);
        let lazy: Lazy<u32, String> = Lazy::new();

        let a = lazy
            .get_or_try_init(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(1) }
            })
            .await
            .unwrap();
        let b = lazy
            .get_or_try_init(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(2) }
            })
            .await
            .unwrap();

        assert_eq!(a, 1);
        assert_eq!(b, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lazy_caches_failure_too() {
        let calls = AtomicU32::new(0);
        let lazy: Lazy<u32, String> = Lazy::new();

        let first = lazy
            .get_or_try_init(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>("boom".to_string()) }
            })
            .await;
        let second = lazy
            .get_or_try_init(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(7) }
            })
            .await;

        assert_eq!(first.unwrap_err(), "boom");
        assert_eq!(second.unwrap_err(), "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn registry_interns_by_name() {
        let registry = ResourceRegistry::new();
        let a = registry.get("developer-disk-image-lookup.plist", b"hello");
        let b = registry.get("developer-disk-image-lookup.plist", b"ignored-second-payload");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn resource_extracts_to_path_once() {
        let registry = ResourceRegistry::new();
        let resource = registry.get("test-resource.bin", b"payload");
        let path = resource.to_path().await.unwrap().to_path_buf();
        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(contents, b"payload");
    }
}
