// Where the store's two files actually live
use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Named-file persistence used by the credential store
///
/// Kept as a trait so tests can swap in a backend that fails on demand.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Contents of the named file, or None if it does not exist
    async fn read(&self, name: &str) -> Result<Option<String>>;
    /// Replace the named file. Either the old or the new contents survive a failure.
    async fn write(&self, name: &str, contents: &str) -> Result<()>;
    async fn exists(&self, name: &str) -> Result<bool>;
}

/// Files in a single directory, written via temp file + rename
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn read(&self, name: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path(name)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, name: &str, contents: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let target = self.path(name);
        let tmp = self.path(&format!("{}.tmp", name));
        tokio::fs::write(&tmp, contents).await?;

        // Credentials should not be world readable
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }

        tokio::fs::rename(&tmp, &target).await?;
        debug!("Wrote {}", target.display());
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path(name)).await?)
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory backend with switchable write failures
    #[derive(Default)]
    pub struct MemoryBackend {
        files: Mutex<HashMap<String, String>>,
        failing: Mutex<Option<String>>,
    }

    impl MemoryBackend {
        /// Make writes to `name` fail; "*" fails every write, None heals
        pub fn fail_writes(&self, name: Option<&str>) {
            *self.failing.lock().unwrap() = name.map(str::to_string);
        }

        pub fn contents(&self, name: &str) -> Option<String> {
            self.files.lock().unwrap().get(name).cloned()
        }

        pub fn insert(&self, name: &str, contents: &str) {
            self.files
                .lock()
                .unwrap()
                .insert(name.to_string(), contents.to_string());
        }
    }

    #[async_trait]
    impl StorageBackend for MemoryBackend {
        async fn read(&self, name: &str) -> Result<Option<String>> {
            Ok(self.contents(name))
        }

        async fn write(&self, name: &str, contents: &str) -> Result<()> {
            let failing = self.failing.lock().unwrap().clone();
            if matches!(failing.as_deref(), Some("*")) || failing.as_deref() == Some(name) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("simulated write failure for {}", name),
                )
                .into());
            }
            self.insert(name, contents);
            Ok(())
        }

        async fn exists(&self, name: &str) -> Result<bool> {
            Ok(self.files.lock().unwrap().contains_key(name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("nested"));

        assert!(!backend.exists("auth.json").await.unwrap());
        assert_eq!(backend.read("auth.json").await.unwrap(), None);

        backend.write("auth.json", "{}").await.unwrap();
        backend.write("auth.json", "{\"salt\":\"00\"}").await.unwrap();

        assert!(backend.exists("auth.json").await.unwrap());
        assert_eq!(
            backend.read("auth.json").await.unwrap().as_deref(),
            Some("{\"salt\":\"00\"}")
        );
        assert!(!backend.dir().join("auth.json.tmp").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_backend_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        backend.write("credentials.enc", "blob").await.unwrap();

        let mode = std::fs::metadata(dir.path().join("credentials.enc"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
